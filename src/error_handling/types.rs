use std::fmt;

use crate::data_capture::types::Direction;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadAddress(String),
    DirectoryDoesNotExist(String),
    NotInRange(String),
    MissingStorage,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::MissingStorage => write!(f, "A storage backend is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    AcceptFailed(std::io::Error),
    UpstreamConnectFailed(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::AcceptFailed(e) => write!(f, "Accept failed: {}", e),
            NetworkError::UpstreamConnectFailed(e) => {
                write!(f, "Upstream connection failed: {}", e)
            }
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum StorageError {
    InvalidKey(String),
    NotFound(String),
    WriteFailed(std::io::Error),
    ReadFailed(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidKey(k) => write!(f, "Invalid storage key: {:?}", k),
            StorageError::NotFound(k) => write!(f, "No object stored under {:?}", k),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum CaptureError {
    LimitExceeded { direction: Direction, limit: usize },
    DrainTimedOut(Direction),
    DrainFailed(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::LimitExceeded { direction, limit } => {
                write!(f, "{} capture exceeded {} bytes", direction, limit)
            }
            CaptureError::DrainTimedOut(direction) => {
                write!(f, "{} capture did not reach end-of-stream in time", direction)
            }
            CaptureError::DrainFailed(e) => write!(f, "Capture drain failed: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum RenderError {
    InvalidHeaderValue { field: &'static str, value: String },
    IoError(std::io::Error),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InvalidHeaderValue { field, value } => {
                write!(f, "Value {:?} cannot be rendered in header {}", value, field)
            }
            RenderError::IoError(e) => write!(f, "Render output error: {}", e),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ParseError {
    MissingVersionLine(usize),
    MalformedHeader(String),
    MissingContentLength(usize),
    InvalidContentLength(String),
    Truncated(usize),
    MissingSeparator(usize),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingVersionLine(at) => {
                write!(f, "Expected WARC version line at offset {}", at)
            }
            ParseError::MalformedHeader(line) => write!(f, "Malformed header line: {:?}", line),
            ParseError::MissingContentLength(at) => {
                write!(f, "Record at offset {} has no Content-Length", at)
            }
            ParseError::InvalidContentLength(v) => write!(f, "Invalid Content-Length: {:?}", v),
            ParseError::Truncated(at) => write!(f, "Record at offset {} is truncated", at),
            ParseError::MissingSeparator(at) => {
                write!(f, "Missing record separator at offset {}", at)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Outcome of a failed archival for one connection. Never surfaced to the
/// proxied connection itself.
#[derive(Debug)]
pub enum ArchiveError {
    Capture(CaptureError),
    Render(RenderError),
    Storage(StorageError),
    JoinFailed(String),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Capture(e) => write!(f, "Capture error: {}", e),
            ArchiveError::Render(e) => write!(f, "Render error: {}", e),
            ArchiveError::Storage(e) => write!(f, "Storage error: {}", e),
            ArchiveError::JoinFailed(e) => write!(f, "Archival task failed: {}", e),
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<CaptureError> for ArchiveError {
    fn from(err: CaptureError) -> Self {
        ArchiveError::Capture(err)
    }
}

impl From<RenderError> for ArchiveError {
    fn from(err: RenderError) -> Self {
        ArchiveError::Render(err)
    }
}

impl From<StorageError> for ArchiveError {
    fn from(err: StorageError) -> Self {
        ArchiveError::Storage(err)
    }
}
