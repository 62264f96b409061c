//! Firmware configuration: one JSON document plus a couple of environment
//! overrides for the addresses that change per deployment.

use std::path::Path;

use armctl::settings::{HttpSettings, OrchestratorSettings, SessionSettings};
use armctl_common::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Overrides [`HttpSettings::bind`].
pub const HTTP_BIND_VAR: &str = "ARMCTL_HTTP_BIND";
/// Overrides [`SessionSettings::url`].
pub const BACKEND_URL_VAR: &str = "ARMCTL_BACKEND_URL";

/// Everything the firmware reads at boot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Joint table and loop timings
    pub orchestrator: OrchestratorSettings,
    /// Backend session link
    pub session: SessionSettings,
    /// Request/response adapter
    pub http: HttpSettings,
    /// Worker threads for network I/O
    pub io_threads: usize,
    /// Control loop frame period
    pub frame_interval_ms: u64,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorSettings::default(),
            session: SessionSettings::default(),
            http: HttpSettings::default(),
            io_threads: 2,
            frame_interval_ms: 5,
        }
    }
}

impl FirmwareConfig {
    /// Reads `path`, or the defaults when no path is given, then applies the
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parses one JSON document. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Unreadable(format!("{}: {}", path.display(), err)))?;
        serde_json::from_str(&text)
            .map_err(|err| ConfigError::Unreadable(format!("{}: {}", path.display(), err)))
    }

    /// Applies overrides found through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup(HTTP_BIND_VAR) {
            self.http.bind = bind;
        }
        if let Some(url) = lookup(BACKEND_URL_VAR) {
            self.session.url = url;
        }
    }
}
