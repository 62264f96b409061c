//! Configuration, loaded once at boot.

use std::time::Duration;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::registry::JointSpec;

/// Timing, capacity and joint-table settings for the orchestrator.
///
/// Every field has a default; a settings file only needs the fields it
/// changes.
#[derive(Resource, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Joint table, validated when the registry is built
    pub joints: Vec<JointSpec>,
    /// Age at which a partial batch is applied
    pub batch_timeout_ms: u64,
    /// Minimum interval between two dequeues on the same joint
    pub queue_tick_ms: u64,
    /// Entries a single joint queue may hold
    pub queue_capacity: usize,
    /// Settle delay between sequence steps
    pub step_delay_ms: u64,
    /// Byte budget for one sequence document and its parsed plan
    pub sequence_budget_bytes: usize,
    /// Status indicator toggle period
    pub heartbeat_interval_ms: u64,
    /// Restart the device after a calibration
    pub restart_after_calibration: bool,
    /// Delay between calibration and the restart
    pub restart_delay_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            joints: JointSpec::default_table(),
            batch_timeout_ms: 1000,
            queue_tick_ms: 50,
            queue_capacity: 256,
            step_delay_ms: 400,
            sequence_budget_bytes: 32 * 1024,
            heartbeat_interval_ms: 1000,
            restart_after_calibration: false,
            restart_delay_ms: 500,
        }
    }
}

impl OrchestratorSettings {
    /// Batch timeout as a duration.
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Queue tick as a duration.
    pub fn queue_tick(&self) -> Duration {
        Duration::from_millis(self.queue_tick_ms)
    }

    /// Inter-step delay as a duration.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Heartbeat period as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Restart delay as a duration.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Settings for the persistent link to the movement backend.
#[derive(Resource, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// Open the link at boot
    pub enabled: bool,
    /// Backend base address, e.g. `ws://192.168.1.20:5000`
    pub url: String,
    /// Socket.IO namespace to join
    pub namespace: String,
    /// Event carrying movement sequences
    pub movement_event: String,
    /// First reconnect delay
    pub reconnect_base_ms: u64,
    /// Reconnect delay ceiling
    pub reconnect_max_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://127.0.0.1:5000".to_string(),
            namespace: "/".to_string(),
            movement_event: "final_movements".to_string(),
            reconnect_base_ms: 2000,
            reconnect_max_ms: 60_000,
        }
    }
}

/// Settings for the plain request/response adapter.
#[derive(Resource, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    /// Serve requests at all
    pub enabled: bool,
    /// Listen address
    pub bind: String,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
            max_body_bytes: 16 * 1024,
        }
    }
}
