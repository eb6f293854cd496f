//! Per-direction capture streams.
//!
//! A [`capture_stream`] pair links the mirroring side ([`CaptureSink`], owned by
//! the duplex tee) to a background consumer ([`CaptureDrain`]) that accumulates
//! every chunk into one buffer until the sink is closed. The channel is
//! unbounded, so mirroring never waits on the drain and the proxied
//! connection never waits on mirroring.

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::types::Direction;
use crate::error_handling::types::CaptureError;

/// Creates a linked sink/drain pair for one direction.
///
/// The drain must be spawned before any byte is mirrored into the sink. Both
/// halves log under `log_target`.
pub fn capture_stream(
    session_id: Uuid,
    direction: Direction,
    limit: usize,
    log_target: &str,
) -> (CaptureSink, CaptureDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CaptureSink {
            session_id,
            direction,
            state: SinkState::Open(tx),
            dropped: 0,
            log_target: log_target.to_string(),
        },
        CaptureDrain {
            session_id,
            direction,
            rx,
            limit,
            log_target: log_target.to_string(),
        },
    )
}

#[derive(Debug)]
enum SinkState {
    Open(UnboundedSender<Bytes>),
    Closed,
    Abandoned,
}

/// Producer half of a capture stream.
#[derive(Debug)]
pub struct CaptureSink {
    session_id: Uuid,
    direction: Direction,
    state: SinkState,
    dropped: usize,
    log_target: String,
}

impl CaptureSink {
    /// Copies `data` into the capture stream.
    ///
    /// Never fails: if the drain is gone the sink is abandoned, a warning is
    /// logged once, and this and all later bytes are dropped.
    pub fn mirror(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        match &self.state {
            SinkState::Open(tx) => {
                if tx.send(Bytes::copy_from_slice(data)).is_err() {
                    warn!(
                        target: self.log_target.as_str(),
                        "[{}] {} capture sink lost its drain; abandoning capture for this direction",
                        self.session_id, self.direction
                    );
                    self.state = SinkState::Abandoned;
                    self.dropped += data.len();
                    return;
                }
                let preview = &data[..std::cmp::min(data.len(), 64)];
                trace!(
                    target: self.log_target.as_str(),
                    "[{}] mirrored {} {} bytes: {}{}",
                    self.session_id,
                    self.direction,
                    data.len(),
                    String::from_utf8_lossy(preview),
                    if data.len() > 64 { " ..." } else { "" }
                );
            }
            SinkState::Abandoned => {
                self.dropped += data.len();
                trace!(
                    target: self.log_target.as_str(),
                    "[{}] dropped {} {} bytes after abandonment",
                    self.session_id,
                    data.len(),
                    self.direction
                );
            }
            SinkState::Closed => {
                self.dropped += data.len();
                warn!(
                    target: self.log_target.as_str(),
                    "[{}] {} bytes observed on {} after end-of-stream were not captured",
                    self.session_id,
                    data.len(),
                    self.direction
                );
            }
        }
    }

    /// Signals end-of-stream to the drain. Idempotent.
    pub fn close(&mut self) {
        if let SinkState::Open(_) = self.state {
            self.state = SinkState::Closed;
            debug!(
                target: self.log_target.as_str(),
                "[{}] {} capture sealed",
                self.session_id,
                self.direction
            );
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SinkState::Open(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.state, SinkState::Abandoned)
    }

    pub fn log_target(&self) -> &str {
        &self.log_target
    }

    /// Bytes that could not be captured.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }
}

impl Drop for CaptureSink {
    fn drop(&mut self) {
        if self.dropped > 0 {
            warn!(
                target: self.log_target.as_str(),
                "[{}] {} capture missed {} bytes",
                self.session_id, self.direction, self.dropped
            );
        }
    }
}

/// Consumer half of a capture stream.
#[derive(Debug)]
pub struct CaptureDrain {
    session_id: Uuid,
    direction: Direction,
    rx: UnboundedReceiver<Bytes>,
    limit: usize,
    log_target: String,
}

impl CaptureDrain {
    /// Accumulates every mirrored chunk until the sink closes.
    ///
    /// Errors
    /// - [`CaptureError::LimitExceeded`] once more than `limit` bytes arrive;
    ///   the receiver is dropped so the sink abandons further mirroring.
    pub async fn drain(mut self) -> Result<Vec<u8>, CaptureError> {
        let mut content = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            if content.len() + chunk.len() > self.limit {
                return Err(CaptureError::LimitExceeded {
                    direction: self.direction,
                    limit: self.limit,
                });
            }
            content.extend_from_slice(&chunk);
        }
        debug!(
            target: self.log_target.as_str(),
            "[{}] {} drain complete: {} bytes",
            self.session_id,
            self.direction,
            content.len()
        );
        Ok(content)
    }
}
