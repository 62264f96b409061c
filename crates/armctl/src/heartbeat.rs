//! Status indicator heartbeat.

use std::time::Duration;

use bevy::prelude::*;
use tracing::warn;

use crate::registry::ActuatorRegistry;

/// Status indicator blink state.
#[derive(Resource, Debug)]
pub struct Heartbeat {
    interval: Duration,
    last_toggle: Duration,
    lit: bool,
}

impl Heartbeat {
    /// Blinks with the given period.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_toggle: Duration::ZERO,
            lit: false,
        }
    }

    /// Indicator level after the last toggle.
    pub fn is_lit(&self) -> bool {
        self.lit
    }
}

/// Toggles the indicator once per interval. Joint state is never touched.
pub fn blink_heartbeat(
    time: Res<Time<Real>>,
    mut heartbeat: ResMut<Heartbeat>,
    mut registry: ResMut<ActuatorRegistry>,
) {
    let now = time.elapsed();
    if now.saturating_sub(heartbeat.last_toggle) < heartbeat.interval {
        return;
    }
    heartbeat.last_toggle = now;
    heartbeat.lit = !heartbeat.lit;
    if let Err(err) = registry.set_indicator(heartbeat.lit) {
        warn!("Heartbeat indicator failed: {}", err);
    }
}
