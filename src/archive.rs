//! WARC archive subsystem
//!
//! Components:
//! - `identity`: timestamps and record identifiers.
//! - `types`: the in-memory archive built from two sealed captures.
//! - `renderer`: streams an archive out in WARC/1.0 form.
//! - `reader`: parses rendered archives back into records.

pub mod identity;
pub mod reader;
pub mod renderer;
pub mod types;

pub use identity::{IdentityProvider, SystemIdentity};
pub use reader::{parse_records, RecordSummary, WarcRecord};
pub use renderer::WarcRenderer;
pub use types::{Archive, InfoRecord, MessageRecord, WARC_KEY_SUFFIX};
