#![deny(
    missing_docs,
    trivial_casts,
    unstable_features,
    unused_import_braces,
    clippy::unwrap_used
)]
#![allow(clippy::type_complexity)]

/*!
A real-time servo command orchestrator for a six-joint arm pair, built as a
Bevy plugin.

Commands reach the arm on two paths. Request/response calls (single joint,
full pose, queued joint, sequence, calibrate, status) arrive through the
[`RequestBridge`](requests::RequestBridge), usually fed by the HTTP adapter.
Movement sequences are pushed by the backend over an Engine.IO / Socket.IO
[`SessionLink`](session::SessionLink). Both paths are validated by
[`admission`] and end in the [`ActuatorRegistry`](registry::ActuatorRegistry),
the only owner of the servo bus.

All state lives in resources and is mutated by systems chained in
[`ControlLoopSet`] order, so there is exactly one writer at a time.

## Example
```rust,no_run
use std::time::Duration;

use armctl::{
    ArmctlPlugin,
    bus::SimulatedBus,
    registry::ActuatorRegistry,
    settings::OrchestratorSettings,
};
use bevy::{app::ScheduleRunnerPlugin, prelude::*};

fn main() {
    let settings = OrchestratorSettings::default();
    let (bus, _log) = SimulatedBus::new();
    let registry = ActuatorRegistry::new(settings.joints.clone(), bus)
        .expect("default joint table is valid");

    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(
            Duration::from_millis(5),
        )))
        .insert_resource(settings)
        .insert_resource(registry)
        .add_plugins(ArmctlPlugin)
        .run();
}
```
*/

pub mod admission;
pub mod batch;
pub mod bus;
pub mod calibration;
pub mod heartbeat;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod requests;
pub mod runtime;
pub mod sequence;
pub mod session;
pub mod settings;

pub use armctl_common::*;

use bevy::prelude::*;
use tracing::{error, info};

use crate::{
    batch::BatchCoordinator,
    bus::SimulatedBus,
    calibration::{DeviceRestart, PendingRestart, check_pending_restart},
    heartbeat::{Heartbeat, blink_heartbeat},
    memory::SequenceArena,
    orchestrator::{drain_joint_queues, flush_expired_batch},
    queue::JointQueues,
    registry::ActuatorRegistry,
    requests::{RequestBridge, request_channel, service_requests},
    sequence::{SequenceFinished, StepPacer},
    settings::OrchestratorSettings,
};

/// Order of the control loop within `Update`. Each set runs after the
/// previous one, every frame.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLoopSet {
    /// Answer queued requests
    Requests,
    /// Apply due per-joint queue entries
    Queues,
    /// Flush a timed-out batch
    Batch,
    /// Drive the session link
    Session,
    /// Blink the status indicator
    Heartbeat,
    /// Emit a scheduled restart
    Restart,
}

/// Adds the orchestrator to an app.
///
/// Uses the [`OrchestratorSettings`] and [`ActuatorRegistry`] already in the
/// world when present. Without a registry, one is built from the settings on
/// a [`SimulatedBus`].
#[derive(Default, Debug, Clone, Copy)]
pub struct ArmctlPlugin;

impl Plugin for ArmctlPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<OrchestratorSettings>();
        let settings = app.world().resource::<OrchestratorSettings>().clone();

        if !app.world().contains_resource::<ActuatorRegistry>() {
            app.insert_resource(simulated_registry(&settings));
        }
        if !app.world().contains_resource::<RequestBridge>() {
            let (bridge, inbox) = request_channel();
            app.insert_resource(bridge).insert_resource(inbox);
        }

        app.insert_resource(BatchCoordinator::new(settings.batch_timeout()))
            .insert_resource(JointQueues::new(
                settings.queue_tick(),
                settings.queue_capacity,
            ))
            .insert_resource(SequenceArena::new(settings.sequence_budget_bytes))
            .insert_resource(Heartbeat::new(settings.heartbeat_interval()))
            .init_resource::<StepPacer>()
            .init_resource::<PendingRestart>()
            .add_message::<SequenceFinished>()
            .add_message::<DeviceRestart>();

        app.configure_sets(
            Update,
            (
                ControlLoopSet::Requests,
                ControlLoopSet::Queues,
                ControlLoopSet::Batch,
                ControlLoopSet::Session,
                ControlLoopSet::Heartbeat,
                ControlLoopSet::Restart,
            )
                .chain(),
        );

        app.add_systems(Startup, neutralize_on_boot);
        app.add_systems(
            Update,
            (
                service_requests.in_set(ControlLoopSet::Requests),
                drain_joint_queues.in_set(ControlLoopSet::Queues),
                flush_expired_batch.in_set(ControlLoopSet::Batch),
                blink_heartbeat.in_set(ControlLoopSet::Heartbeat),
                check_pending_restart.in_set(ControlLoopSet::Restart),
            ),
        );
    }
}

fn simulated_registry(settings: &OrchestratorSettings) -> ActuatorRegistry {
    let (bus, _) = SimulatedBus::new();
    match ActuatorRegistry::new(settings.joints.clone(), bus) {
        Ok(registry) => registry,
        Err(err) => {
            error!("Invalid joint table ({}), using the default table", err);
            ActuatorRegistry::with_default_table(SimulatedBus::default())
        }
    }
}

/// Drives every joint to neutral before the first command is served.
fn neutralize_on_boot(mut registry: ResMut<ActuatorRegistry>) {
    match registry.neutralize_all() {
        Ok(()) => info!(
            "🤖 Orchestrator ready: {} joints at {}",
            registry.joints().len(),
            Angle::NEUTRAL
        ),
        Err(err) => error!("Boot neutralize failed: {}", err),
    }
}
