pub mod archive;
pub mod configuration;
pub mod data_capture;
pub mod error_handling;
pub mod network;
pub mod storage;
