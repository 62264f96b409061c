//! The orchestrator's operations over the shared loop state.
//!
//! [`Orchestrator`] bundles every resource a command can touch. Systems that
//! take it get exclusive access for the duration of the system, so
//! request handling, queue draining and sequence runs never interleave.

use std::time::Duration;

use armctl_common::{
    AnglePolicy, BatchStatus, CalibrationReport, JointAck, JointCommand, JointStatus, PoseAck,
    PoseCommand, QueueAck, Route, StatusReport, error::CommandError,
};
use bevy::{ecs::system::SystemParam, prelude::*};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    admission::{admit, admit_pose, decode_body},
    batch::BatchCoordinator,
    calibration::{PendingRestart, calibrate},
    memory::SequenceArena,
    queue::JointQueues,
    registry::{ActuatorRegistry, ChannelIndex},
    requests::Reply,
    sequence::{SequenceFinished, SequenceOrigin, SequenceRun, SequenceRunner, StepPacer},
    settings::OrchestratorSettings,
};

/// Joint layout description reported by `GET /`.
pub const MAPPING: &str = "indices 0-2 left arm joints, 3-5 right arm joints";

/// Loop state shared by every command path.
#[derive(SystemParam)]
pub struct Orchestrator<'w> {
    time: Res<'w, Time<Real>>,
    settings: Res<'w, OrchestratorSettings>,
    registry: ResMut<'w, ActuatorRegistry>,
    batch: ResMut<'w, BatchCoordinator>,
    queues: ResMut<'w, JointQueues>,
    arena: ResMut<'w, SequenceArena>,
    pacer: ResMut<'w, StepPacer>,
    restart: ResMut<'w, PendingRestart>,
    finished: MessageWriter<'w, SequenceFinished>,
}

impl Orchestrator<'_> {
    /// Loop time of the current frame.
    pub fn now(&self) -> Duration {
        self.time.elapsed()
    }

    /// Answers one request.
    pub fn handle(&mut self, route: &Route, body: &[u8]) -> Reply {
        debug!("Handling {:?} ({} bytes)", route, body.len());
        let reply = match route {
            Route::Status => Reply::ok(&self.status()),
            Route::SetJoint => {
                Reply::from_result(decode_body::<JointCommand>(body).and_then(|command| self.set_joint(&command)))
            }
            Route::SetPose => {
                Reply::from_result(decode_body::<PoseCommand>(body).and_then(|command| self.set_pose(&command)))
            }
            Route::Enqueue => {
                Reply::from_result(decode_body::<JointCommand>(body).and_then(|command| self.enqueue(&command)))
            }
            Route::Calibrate => Reply::from_result(self.calibrate()),
            Route::RunSequence => match self.run_sequence_document(body) {
                Ok(SequenceRun {
                    report,
                    failure: None,
                }) => Reply::ok(&report),
                Ok(SequenceRun {
                    report,
                    failure: Some(err),
                }) => Reply::json(err.http_status(), &report),
                Err(err) => Reply::error(&err),
            },
            Route::NotFound(what) => {
                debug!("No route for {}", what);
                Reply::not_found()
            }
        };
        if reply.status >= 400 {
            warn!("{:?} refused with {}: {}", route, reply.status, reply.body);
        }
        reply
    }

    /// Current joint, queue, batch and memory state.
    pub fn status(&self) -> StatusReport {
        let now = self.now();
        let depths = self.queues.depths();
        let joints = self
            .registry
            .joints()
            .iter()
            .zip(depths)
            .map(|(joint, queue_depth)| JointStatus {
                id: joint.spec.id,
                name: joint.spec.name.clone(),
                pin: joint.spec.pin,
                inverted: joint.spec.inverted,
                angle: joint.current_angle,
                queue_depth,
            })
            .collect();

        StatusReport {
            status: "ok".to_string(),
            pins: self.registry.pins(),
            angles: self.registry.angles(),
            mapping: MAPPING.to_string(),
            joints,
            batch: BatchStatus {
                pending: self.batch.pending().count(),
                remaining_timeout_ms: self
                    .batch
                    .remaining_timeout(now)
                    .map(|left| left.as_millis() as u64),
            },
            free_memory: self.arena.free(),
        }
    }

    /// Routes one joint command through the batch coordinator.
    pub fn set_joint(&mut self, command: &JointCommand) -> Result<JointAck, CommandError> {
        let now = self.now();
        let admitted = admit(&self.registry, &command.id, command.angle, AnglePolicy::Reject)?;
        let progress = self
            .batch
            .submit(&mut self.registry, admitted.channel, admitted.angle, now)?;
        Ok(JointAck {
            id: self.joint_id(admitted.channel),
            angle: admitted.angle,
            pending: progress.pending,
            flushed: progress.flushed,
        })
    }

    /// Applies a full pose immediately. All six angles are validated first.
    pub fn set_pose(&mut self, command: &PoseCommand) -> Result<PoseAck, CommandError> {
        let angles = admit_pose(&command.angles)?;
        for (index, angle) in angles.into_iter().enumerate() {
            if let Some(channel) = self.registry.channel(index) {
                self.registry.apply_angle(channel, angle)?;
            }
        }
        Ok(PoseAck {
            angles: self.registry.angles(),
        })
    }

    /// Appends one joint command to that joint's queue.
    pub fn enqueue(&mut self, command: &JointCommand) -> Result<QueueAck, CommandError> {
        let now = self.now();
        let admitted = admit(&self.registry, &command.id, command.angle, AnglePolicy::Reject)?;
        let depth = self.queues.enqueue(admitted.channel, admitted.angle, now)?;
        Ok(QueueAck {
            id: self.joint_id(admitted.channel),
            angle: admitted.angle,
            depth,
        })
    }

    /// Neutralizes everything and, when configured, schedules a restart.
    pub fn calibrate(&mut self) -> Result<CalibrationReport, CommandError> {
        let angles = calibrate(&mut self.registry, &mut self.batch, &mut self.queues)?;
        let restart_scheduled = self.settings.restart_after_calibration;
        if restart_scheduled {
            let deadline = self.now() + self.settings.restart_delay();
            self.restart.schedule(deadline);
        }
        Ok(CalibrationReport {
            status: "calibrated".to_string(),
            angles,
            restart_scheduled,
        })
    }

    /// Runs a sequence request body. Out-of-range angles are refused.
    pub fn run_sequence_document(&mut self, body: &[u8]) -> Result<SequenceRun, CommandError> {
        let outcome = self.runner().run_document(body, AnglePolicy::Reject);
        self.finished.write(SequenceFinished {
            origin: SequenceOrigin::Request,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Runs a sequence pushed over the session link. Joints are addressed
    /// by name and out-of-range angles are clamped.
    pub fn run_pushed_sequence(&mut self, payload: Value, encoded_len: usize) {
        let outcome = self.runner().run_with(encoded_len, AnglePolicy::Clamp, || {
            serde_json::from_value(payload)
                .map_err(|err| CommandError::MalformedInput(format!("Invalid movement payload: {err}")))
        });
        if let Err(err) = &outcome {
            error!("Pushed sequence refused: {}", err);
        }
        self.finished.write(SequenceFinished {
            origin: SequenceOrigin::SessionEvent,
            outcome,
        });
    }

    /// Applies every queue entry whose tick has come.
    pub fn drain_queues(&mut self) {
        let now = self.now();
        for (channel, entry) in self.queues.drain_due(now) {
            if let Err(err) = self.registry.apply_angle(channel, entry.angle) {
                error!("Queued command for channel {} failed: {}", channel.index(), err);
            }
        }
    }

    /// Applies a partial batch that has waited long enough.
    pub fn flush_expired_batch(&mut self) {
        let now = self.now();
        if let Err(err) = self.batch.flush_if_expired(&mut self.registry, now) {
            error!("Batch flush failed: {}", err);
        }
    }

    fn runner(&mut self) -> SequenceRunner<'_> {
        SequenceRunner {
            registry: &mut *self.registry,
            arena: &mut *self.arena,
            pacer: self.pacer.0.as_mut(),
            step_delay: self.settings.step_delay(),
        }
    }

    fn joint_id(&self, channel: ChannelIndex) -> u8 {
        self.registry
            .joint(channel)
            .map_or(0, |joint| joint.spec.id)
    }
}

/// Applies due queue entries.
pub fn drain_joint_queues(mut orchestrator: Orchestrator) {
    orchestrator.drain_queues();
}

/// Flushes a timed-out batch.
pub fn flush_expired_batch(mut orchestrator: Orchestrator) {
    orchestrator.flush_expired_batch();
}
