//! Per-joint execution queues, drained at a fixed cadence.

use std::{collections::VecDeque, time::Duration};

use armctl_common::{Angle, JOINT_COUNT, error::CommandError};
use bevy::prelude::*;

use crate::registry::ChannelIndex;

/// A queued target angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedAngle {
    /// Logical angle to apply
    pub angle: Angle,
    /// Loop time the entry was accepted
    pub enqueued_at: Duration,
}

#[derive(Debug, Default)]
struct Lane {
    entries: VecDeque<QueuedAngle>,
    last_dequeue: Option<Duration>,
}

impl Lane {
    fn is_due(&self, now: Duration, tick: Duration) -> bool {
        self.last_dequeue
            .is_none_or(|last| now.saturating_sub(last) >= tick)
    }
}

/// One FIFO per joint. Each joint applies at most one entry per tick,
/// independently of the others.
#[derive(Resource, Debug)]
pub struct JointQueues {
    lanes: Vec<Lane>,
    tick: Duration,
    capacity: usize,
}

impl JointQueues {
    /// Creates empty queues draining one entry per joint every `tick`, each
    /// holding at most `capacity` entries.
    pub fn new(tick: Duration, capacity: usize) -> Self {
        Self {
            lanes: (0..JOINT_COUNT).map(|_| Lane::default()).collect(),
            tick,
            capacity,
        }
    }

    /// Appends an entry to a joint's queue and returns the new depth.
    ///
    /// Growth is reserved up front; a queue that cannot grow refuses the
    /// entry with [`CommandError::AllocationFailure`] and keeps its contents.
    pub fn enqueue(
        &mut self,
        channel: ChannelIndex,
        angle: Angle,
        now: Duration,
    ) -> Result<usize, CommandError> {
        let capacity = self.capacity;
        let lane = self
            .lanes
            .get_mut(channel.index())
            .ok_or_else(|| CommandError::UnknownJoint(format!("channel {}", channel.index())))?;

        if lane.entries.len() >= capacity {
            return Err(CommandError::AllocationFailure(format!(
                "queue for joint {} is full ({capacity} entries)",
                channel.index() + 1
            )));
        }
        lane.entries
            .try_reserve(1)
            .map_err(|err| CommandError::AllocationFailure(err.to_string()))?;
        lane.entries.push_back(QueuedAngle {
            angle,
            enqueued_at: now,
        });
        Ok(lane.entries.len())
    }

    /// Pops the oldest entry of every joint whose tick has elapsed.
    pub fn drain_due(&mut self, now: Duration) -> Vec<(ChannelIndex, QueuedAngle)> {
        let tick = self.tick;
        let mut due = Vec::new();
        for (index, lane) in self.lanes.iter_mut().enumerate() {
            if lane.entries.is_empty() || !lane.is_due(now, tick) {
                continue;
            }
            if let Some(entry) = lane.entries.pop_front() {
                lane.last_dequeue = Some(now);
                due.push((ChannelIndex::from_index(index), entry));
            }
        }
        due
    }

    /// Entries waiting on one joint.
    pub fn depth(&self, channel: ChannelIndex) -> usize {
        self.lanes
            .get(channel.index())
            .map_or(0, |lane| lane.entries.len())
    }

    /// Entries waiting on every joint, in channel order.
    pub fn depths(&self) -> Vec<usize> {
        self.lanes.iter().map(|lane| lane.entries.len()).collect()
    }

    /// Empties every queue.
    pub fn clear(&mut self) {
        for lane in &mut self.lanes {
            lane.entries.clear();
            lane.last_dequeue = None;
        }
    }
}
