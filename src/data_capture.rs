//! Traffic capture subsystem
//!
//! Components:
//! - `types`: directions, captured messages and the capture lifecycle.
//! - `capture_stream`: mirrored-bytes channel feeding one drain per direction.
//! - `tee`: the duplex wrapper that mirrors a connection into two captures.
//! - `context`: connection-scoped metadata (session id, target, variables).
//! - `pipeline`: orchestration from tee to stored archive.

pub mod capture_stream;
pub mod context;
pub mod pipeline;
pub mod tee;
pub mod types;


pub use capture_stream::{capture_stream, CaptureDrain, CaptureSink};
pub use context::{ConnVar, ConnectionContext, HttpRequestMeta};
pub use pipeline::{
    ArchiveOutcome, CapturePipeline, CapturePipelineBuilder, NextHandler, ProxyStream,
    ShutdownReport,
};
pub use tee::DuplexTee;
pub use types::{CaptureState, CapturedMessage, Direction};
