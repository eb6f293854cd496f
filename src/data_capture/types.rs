//! Common data types used across the data_capture subsystem.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of TCP flow for captured bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes read from the client on their way to the destination.
    Request,
    /// Bytes written back to the client by the destination.
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

/// One direction's raw capture, sealed once that direction reached
/// end-of-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMessage {
    /// When the direction began being observed.
    pub timestamp: DateTime<Utc>,
    /// Every byte observed in that direction, in order.
    pub content: Vec<u8>,
}

impl CapturedMessage {
    pub fn new(timestamp: DateTime<Utc>, content: Vec<u8>) -> Self {
        Self { timestamp, content }
    }
}

/// Lifecycle of a single connection capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    Idle,
    Streaming,
    Draining,
    Archiving,
    Stored,
    Failed,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaptureState::Idle => "idle",
            CaptureState::Streaming => "streaming",
            CaptureState::Draining => "draining",
            CaptureState::Archiving => "archiving",
            CaptureState::Stored => "stored",
            CaptureState::Failed => "failed",
        };
        f.write_str(s)
    }
}
