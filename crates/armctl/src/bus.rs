//! The servo bus: the only place angles leave the process.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

/// One physical write to a servo output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServoWrite {
    /// Channel index of the joint (0-based, id order)
    pub channel: usize,
    /// Output pin driving the servo
    pub pin: u8,
    /// Angle after inversion, in degrees
    pub physical_angle: u8,
    /// Pulse width derived from the joint's calibration range
    pub pulse_us: u16,
}

/// Errors reported by a [`ServoBus`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The output refused the write
    #[error("pin {pin} rejected the write")]
    Rejected {
        /// Output pin that failed
        pin: u8,
    },
    /// The bus itself is unavailable
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Hardware seam for servo outputs and the status indicator.
///
/// Only [`ActuatorRegistry`](crate::registry::ActuatorRegistry) holds a bus.
pub trait ServoBus: Send + Sync + 'static {
    /// Drive one servo to the given physical position.
    fn write(&mut self, write: ServoWrite) -> Result<(), BusError>;

    /// Switch the status indicator. Boards without one ignore this.
    fn set_indicator(&mut self, lit: bool) -> Result<(), BusError> {
        let _ = lit;
        Ok(())
    }
}

/// Writes kept by a [`BusLog`]; older ones are only counted.
pub const WRITE_HISTORY: usize = 64;

#[derive(Debug, Default)]
struct BusRecord {
    recent: VecDeque<ServoWrite>,
    last: HashMap<usize, ServoWrite>,
    write_count: usize,
    indicator: bool,
    indicator_changes: usize,
    failing_pins: HashSet<u8>,
}

/// Shared view of everything a [`SimulatedBus`] has been asked to do.
///
/// Cloning the log shares the same record, so a test can keep a handle while
/// the bus itself is owned by the registry.
#[derive(Clone, Debug, Default)]
pub struct BusLog(Arc<Mutex<BusRecord>>);

impl BusLog {
    /// The last [`WRITE_HISTORY`] accepted writes, oldest first.
    pub fn writes(&self) -> Vec<ServoWrite> {
        self.0.lock().recent.iter().copied().collect()
    }

    /// Last accepted write on `channel`.
    pub fn last_write(&self, channel: usize) -> Option<ServoWrite> {
        self.0.lock().last.get(&channel).copied()
    }

    /// Number of accepted writes.
    pub fn write_count(&self) -> usize {
        self.0.lock().write_count
    }

    /// Current indicator level.
    pub fn indicator(&self) -> bool {
        self.0.lock().indicator
    }

    /// How many times the indicator has been switched.
    pub fn indicator_changes(&self) -> usize {
        self.0.lock().indicator_changes
    }

    /// Make every following write to `pin` fail.
    pub fn fail_pin(&self, pin: u8) {
        self.0.lock().failing_pins.insert(pin);
    }

    /// Forget recorded writes, keeping injected failures.
    pub fn clear(&self) {
        let mut record = self.0.lock();
        record.recent.clear();
        record.last.clear();
        record.write_count = 0;
    }
}

/// A bus that records writes instead of driving hardware.
///
/// Used on hosts without servo outputs and in tests. The log keeps the last
/// write per channel and a bounded history, so a long-running host does not
/// grow it.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    log: BusLog,
}

impl SimulatedBus {
    /// Creates a bus and the log handle observing it.
    pub fn new() -> (Self, BusLog) {
        let log = BusLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl ServoBus for SimulatedBus {
    fn write(&mut self, write: ServoWrite) -> Result<(), BusError> {
        let mut record = self.log.0.lock();
        if record.failing_pins.contains(&write.pin) {
            return Err(BusError::Rejected { pin: write.pin });
        }
        trace!(
            "pin {} -> {}° ({} us)",
            write.pin, write.physical_angle, write.pulse_us
        );
        if record.recent.len() == WRITE_HISTORY {
            record.recent.pop_front();
        }
        record.recent.push_back(write);
        record.last.insert(write.channel, write);
        record.write_count += 1;
        Ok(())
    }

    fn set_indicator(&mut self, lit: bool) -> Result<(), BusError> {
        let mut record = self.log.0.lock();
        record.indicator = lit;
        record.indicator_changes += 1;
        Ok(())
    }
}
