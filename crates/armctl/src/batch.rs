//! Batch Coordinator: turns six independent single-joint commands into one
//! pose change.

use std::time::Duration;

use armctl_common::{Angle, JOINT_COUNT, error::CommandError};
use bevy::prelude::*;
use tracing::{debug, info};

use crate::registry::{ActuatorRegistry, ChannelIndex};

/// The batch currently being collected.
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    slots: [Option<Angle>; JOINT_COUNT],
    count: usize,
    opened_at: Option<Duration>,
}

impl PendingBatch {
    /// Joints set so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Time the first entry arrived, if the batch is open.
    pub fn opened_at(&self) -> Option<Duration> {
        self.opened_at
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Where a submitted command left the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Joints still waiting after this command
    pub pending: usize,
    /// True when this command completed the batch and it was written out
    pub flushed: bool,
}

/// Collects single-joint commands and writes them as one pose, either when
/// all joints are set or when the batch times out.
#[derive(Resource, Debug)]
pub struct BatchCoordinator {
    pending: PendingBatch,
    timeout: Duration,
}

impl BatchCoordinator {
    /// Creates a coordinator that flushes partial batches after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: PendingBatch::default(),
            timeout,
        }
    }

    /// Adds or overwrites one joint in the open batch, flushing when the
    /// batch becomes full.
    pub fn submit(
        &mut self,
        registry: &mut ActuatorRegistry,
        channel: ChannelIndex,
        angle: Angle,
        now: Duration,
    ) -> Result<BatchProgress, CommandError> {
        let batch = &mut self.pending;
        if batch.is_empty() {
            batch.opened_at = Some(now);
        }

        let slot = batch
            .slots
            .get_mut(channel.index())
            .ok_or_else(|| CommandError::UnknownJoint(format!("channel {}", channel.index())))?;
        if slot.is_none() {
            batch.count += 1;
        }
        *slot = Some(angle);
        debug!("Batch {}/{} (channel {})", batch.count, JOINT_COUNT, channel.index());

        if batch.count == JOINT_COUNT {
            self.flush(registry)?;
            return Ok(BatchProgress {
                pending: 0,
                flushed: true,
            });
        }

        Ok(BatchProgress {
            pending: self.pending.count,
            flushed: false,
        })
    }

    /// Flushes the open batch if it has been open for at least the timeout.
    ///
    /// Returns how many joints were written.
    pub fn flush_if_expired(
        &mut self,
        registry: &mut ActuatorRegistry,
        now: Duration,
    ) -> Result<usize, CommandError> {
        match self.pending.opened_at {
            Some(opened) if !self.pending.is_empty() && now.saturating_sub(opened) >= self.timeout => {
                info!(
                    "⏱️ Batch timed out with {}/{} joints, applying partial pose",
                    self.pending.count, JOINT_COUNT
                );
                self.flush(registry)
            }
            _ => Ok(0),
        }
    }

    /// Writes every set joint and resets the batch. The batch is reset even
    /// if a write fails; the first failure is returned.
    fn flush(&mut self, registry: &mut ActuatorRegistry) -> Result<usize, CommandError> {
        let batch = std::mem::take(&mut self.pending);
        let mut written = 0;
        let mut first_error = None;
        for (index, angle) in batch.slots.iter().enumerate() {
            let (Some(angle), Some(channel)) = (angle, registry.channel(index)) else {
                continue;
            };
            match registry.apply_angle(channel, *angle) {
                Ok(()) => written += 1,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        debug!("Batch flushed ({written} joints)");
        first_error.map_or(Ok(written), Err)
    }

    /// Drops the open batch without writing it.
    pub fn clear(&mut self) {
        self.pending = PendingBatch::default();
    }

    /// The open batch.
    pub fn pending(&self) -> &PendingBatch {
        &self.pending
    }

    /// Time left before the open batch is flushed by timeout.
    pub fn remaining_timeout(&self, now: Duration) -> Option<Duration> {
        let opened = self.pending.opened_at.filter(|_| !self.pending.is_empty())?;
        Some(self.timeout.saturating_sub(now.saturating_sub(opened)))
    }
}
