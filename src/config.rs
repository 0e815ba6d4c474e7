//! Debugger configuration.
//!
//! The kernel hands the debugger a JSON object; the `dap-bridge` binary reads the same keys from
//! a TOML file. Every key is optional.

use crate::debugger::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Python executable the backend should use for spawned processes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    /// Loopback host the backend listens on.
    pub host: String,
    /// Fixed backend port, a free one in `port_min..=port_max` is picked if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub port_min: u16,
    pub port_max: u16,
    pub port_attempts: u32,
    pub request_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Eagerly fetch the stack of a thread as soon as it stops.
    pub prefetch_stack_frames: bool,
    /// Append DAP traffic with the backend to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<PathBuf>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            python: None,
            host: "127.0.0.1".to_string(),
            port: None,
            port_min: 5678,
            port_max: 5900,
            port_attempts: 100,
            request_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,
            prefetch_stack_frames: false,
            trace_file: None,
        }
    }
}

impl DebuggerConfig {
    const DEFAULT_PATH: &'static str = ".config/debugpy-bridge/config.toml";

    /// Build a configuration out of the kernel debugger config object.
    /// `null` means "all defaults".
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_value(value.clone())?;
        config.validate()
    }

    /// Load configuration from a TOML file, `None` means the default location in the home
    /// directory. A missing default file is not an error.
    pub fn from_file(path: Option<&Path>) -> Result<Self, Error> {
        let data = match path {
            Some(path) => read_to_string(path)
                .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?,
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                match read_to_string(home.join(Self::DEFAULT_PATH)) {
                    Ok(data) => data,
                    Err(_) => return Ok(Self::default()),
                }
            }
        };

        let config: Self = toml::de::from_str(&data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()
    }

    fn validate(self) -> Result<Self, Error> {
        if self.port.is_none() && self.port_min > self.port_max {
            return Err(Error::Config(format!(
                "empty port range {}..={}",
                self.port_min, self.port_max
            )));
        }
        if self.request_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
