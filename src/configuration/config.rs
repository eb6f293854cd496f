use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data_capture::pipeline::DEFAULT_MAX_CAPTURE_BYTES;
use crate::error_handling::types::ConfigError;

pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SNIFF_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

fn default_max_capture_bytes() -> usize {
    DEFAULT_MAX_CAPTURE_BYTES
}

fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

fn default_sniff_timeout_ms() -> u64 {
    DEFAULT_SNIFF_TIMEOUT_MS
}

fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

/// Application configuration structure that defines all runtime parameters.
///
/// Loaded either from a TOML file ([`Config::from_file`]) or from command-line
/// flags (the `clap` derive), then checked with [`Config::validate`].
///
/// ```toml
/// bind_address = "0.0.0.0:8080"
/// upstream_address = "10.0.0.5:80"
/// storage_path = "/var/lib/warctap"
/// source_identity = "edge-1"
/// ```
#[derive(Parser, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the capturing proxy listens on.
    #[arg(long, env = "WARCTAP_BIND_ADDRESS")]
    pub bind_address: String,

    /// Real destination every accepted connection is forwarded to
    /// (`host:port`).
    #[arg(long, env = "WARCTAP_UPSTREAM_ADDRESS")]
    pub upstream_address: String,

    /// Directory archives are written to. Created if missing.
    #[arg(long, env = "WARCTAP_STORAGE_PATH")]
    pub storage_path: PathBuf,

    /// Opaque identifier of this capturing node, rendered into every
    /// request/response record. Defaults to the listener's IP.
    #[arg(long)]
    #[serde(default)]
    pub source_identity: Option<String>,

    /// Per-direction capture limit in bytes. A connection going over it is
    /// still proxied but not archived.
    #[arg(long, default_value_t = DEFAULT_MAX_CAPTURE_BYTES)]
    #[serde(default = "default_max_capture_bytes")]
    pub max_capture_bytes: usize,

    /// How long an archival job waits for both captures to seal.
    #[arg(long, default_value_t = DEFAULT_DRAIN_TIMEOUT_SECS)]
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Upper bound on a single proxied connection; 0 means none.
    #[arg(long, default_value_t = 0)]
    #[serde(default)]
    pub connection_timeout_secs: u64,

    /// How long to wait for the client's first bytes when detecting HTTP.
    #[arg(long, default_value_t = DEFAULT_SNIFF_TIMEOUT_MS)]
    #[serde(default = "default_sniff_timeout_ms")]
    pub sniff_timeout_ms: u64,

    /// How long shutdown waits for in-flight archival jobs.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Checks addresses and limits, and makes sure the storage directory
    /// exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        match self.upstream_address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(ConfigError::BadAddress(format!(
                    "upstream_address {:?} is not host:port",
                    self.upstream_address
                )))
            }
        }

        if self.max_capture_bytes == 0 {
            return Err(ConfigError::NotInRange(
                "max_capture_bytes must be greater than 0".to_string(),
            ));
        }
        if self.drain_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "drain_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(identity) = &self.source_identity {
            if identity.contains(['\r', '\n']) {
                return Err(ConfigError::NotInRange(
                    "source_identity must be a single line".to_string(),
                ));
            }
        }

        fs::create_dir_all(&self.storage_path).map_err(|e| {
            ConfigError::DirectoryDoesNotExist(format!(
                "{}: {}",
                self.storage_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            ConfigError::BadAddress(format!(
                "bind_address {:?} is not a socket address",
                self.bind_address
            ))
        })
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        (self.connection_timeout_secs > 0).then(|| Duration::from_secs(self.connection_timeout_secs))
    }

    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_millis(self.sniff_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
