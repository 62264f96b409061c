//! Assembles the orchestrator app from a [`FirmwareConfig`].

pub mod config;

use std::time::Duration;

use armctl::{
    ArmctlPlugin,
    bus::SimulatedBus,
    calibration::DeviceRestart,
    http::HttpAdapterPlugin,
    registry::ActuatorRegistry,
    runtime::ArmctlRuntime,
    session::{SessionLink, SessionLinkPlugin},
};
use armctl_common::error::{ConfigError, SessionError};
use armctl_websockets::WebSocketTransport;
use bevy::{app::ScheduleRunnerPlugin, log::LogPlugin, prelude::*};
use thiserror::Error;
use tracing::{info, warn};

pub use config::FirmwareConfig;

/// Exit status asking the supervisor to start the firmware again.
pub const RESTART_EXIT_CODE: u8 = 75;

/// Raised when the app cannot be assembled.
#[derive(Debug, Error)]
pub enum FirmwareError {
    /// The joint table was refused
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The tokio runtime did not start
    #[error("Could not start the I/O runtime: {0}")]
    Runtime(#[from] std::io::Error),
    /// The backend address is unusable
    #[error("Invalid session settings: {0}")]
    Session(#[from] SessionError),
}

/// Builds the app without running it.
pub fn build(config: FirmwareConfig) -> Result<App, FirmwareError> {
    let runtime = ArmctlRuntime::new(config.io_threads)?;
    let (bus, _) = SimulatedBus::new();
    let registry = ActuatorRegistry::new(config.orchestrator.joints.clone(), bus)?;

    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_millis(
            config.frame_interval_ms,
        ))),
        LogPlugin::default(),
    ));

    if config.session.enabled {
        let transport = WebSocketTransport::new(runtime.handle());
        app.insert_resource(SessionLink::new(transport, &config.session)?);
    } else {
        info!("Session link disabled");
    }

    app.insert_resource(config.orchestrator)
        .insert_resource(config.http)
        .insert_resource(registry)
        .insert_resource(runtime)
        .add_plugins(ArmctlPlugin)
        .add_plugins(HttpAdapterPlugin)
        .add_plugins(SessionLinkPlugin::<WebSocketTransport>::default())
        .add_systems(Last, exit_on_restart);

    Ok(app)
}

/// Stops the app when a restart comes due. The supervisor sees
/// [`RESTART_EXIT_CODE`] and starts the firmware again.
fn exit_on_restart(mut restarts: MessageReader<DeviceRestart>, mut exit: MessageWriter<AppExit>) {
    if restarts.read().next().is_some() {
        warn!("🔄 Restarting");
        exit.write(AppExit::from_code(RESTART_EXIT_CODE));
    }
}
