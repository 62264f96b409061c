//! Fixed working-memory budget for sequence documents.

use std::mem::size_of;

use armctl_common::{SequenceRequest, SequenceStep, StepCommand, JointRef, error::CommandError};
use bevy::prelude::*;
use tracing::warn;

/// Fixed byte budget for sequence documents.
///
/// A sequence is held twice while it runs: the raw body and the parsed plan.
/// Both are reserved here before they exist, so an oversized document is
/// refused with [`CommandError::AllocationFailure`] instead of exhausting
/// memory mid-execution. The free budget is what `heap_before` and
/// `heap_after` report.
#[derive(Resource, Debug)]
pub struct SequenceArena {
    capacity: usize,
    used: usize,
}

impl SequenceArena {
    /// Creates an arena with `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0 }
    }

    /// Claims `bytes` for `what`, or refuses without claiming anything.
    pub fn reserve(&mut self, bytes: usize, what: &str) -> Result<(), CommandError> {
        if bytes > self.free() {
            warn!(
                "Sequence arena exhausted: {what} needs {bytes} bytes, {} free",
                self.free()
            );
            return Err(CommandError::AllocationFailure(format!(
                "{what} needs {bytes} bytes but only {} of {} are free",
                self.free(),
                self.capacity
            )));
        }
        self.used += bytes;
        Ok(())
    }

    /// Returns `bytes` to the budget.
    pub fn release(&mut self, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
    }

    /// Unclaimed bytes.
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }

    /// Total budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Approximate heap footprint of a parsed sequence.
pub fn plan_footprint(request: &SequenceRequest) -> usize {
    let steps: usize = request
        .sequence
        .iter()
        .map(|step| {
            size_of::<SequenceStep>()
                + step
                    .commands
                    .iter()
                    .map(|command| {
                        size_of::<StepCommand>()
                            + match &command.id {
                                JointRef::Name(name) => name.len(),
                                JointRef::Id(_) => 0,
                            }
                    })
                    .sum::<usize>()
        })
        .sum();
    size_of::<SequenceRequest>() + request.skill.len() + steps
}
