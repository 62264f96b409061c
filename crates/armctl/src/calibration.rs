//! Calibration and the opt-in restart that may follow it.

use std::time::Duration;

use armctl_common::{Angle, error::CommandError};
use bevy::prelude::*;
use tracing::info;

use crate::{batch::BatchCoordinator, queue::JointQueues, registry::ActuatorRegistry};

/// Emitted when a scheduled restart is due. The binary exits on it and its
/// supervisor starts it again.
#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRestart;

/// Deadline of a restart scheduled by calibration.
#[derive(Resource, Debug, Default)]
pub struct PendingRestart(Option<Duration>);

impl PendingRestart {
    /// Schedules a restart at `deadline` (loop time).
    pub fn schedule(&mut self, deadline: Duration) {
        self.0 = Some(deadline);
    }

    /// The scheduled deadline, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.0
    }
}

/// Drops pending work and returns every joint to neutral.
///
/// The batch and all queues are emptied first so nothing queued before the
/// calibration is applied after it.
pub fn calibrate(
    registry: &mut ActuatorRegistry,
    batch: &mut BatchCoordinator,
    queues: &mut JointQueues,
) -> Result<Vec<Angle>, CommandError> {
    batch.clear();
    queues.clear();
    registry.neutralize_all()?;
    info!("🎯 Calibrated: all joints at {}", Angle::NEUTRAL);
    Ok(registry.angles())
}

/// Emits [`DeviceRestart`] once the scheduled deadline passes.
pub fn check_pending_restart(
    time: Res<Time<Real>>,
    mut pending: ResMut<PendingRestart>,
    mut restarts: MessageWriter<DeviceRestart>,
) {
    let Some(deadline) = pending.0 else {
        return;
    };
    if time.elapsed() >= deadline {
        info!("🔄 Restart deadline reached");
        pending.0 = None;
        restarts.write(DeviceRestart);
    }
}
