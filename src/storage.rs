//! Storage subsystem
//!
//! Key-addressed persistence for rendered archives.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `file_storage`: filesystem-backed implementation, one file per key.
//! - `memory_storage`: in-process implementation for embedding and tests.

pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::{validate_key, Storage};
