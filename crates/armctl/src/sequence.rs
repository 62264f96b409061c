//! Sequence Executor: runs ordered steps with a settle delay in between.
//!
//! Execution is synchronous. The loop is blocked for the whole sequence,
//! which keeps queue ticks and batch flushes from interleaving with steps.

use std::{sync::Arc, time::Duration};

use armctl_common::{
    Angle, AnglePolicy, SequenceReport, SequenceRequest, SequenceStep, error::CommandError,
};
use bevy::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    admission::{Admitted, admit},
    memory::{SequenceArena, plan_footprint},
    registry::ActuatorRegistry,
};

/// Waits between sequence steps.
pub trait Pacer: Send + Sync + 'static {
    /// Blocks for `delay`.
    fn settle(&mut self, delay: Duration);
}

/// Sleeps the loop thread. Used on the device.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleepPacer;

impl Pacer for ThreadSleepPacer {
    fn settle(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default, Clone)]
pub struct RecordingPacer(Arc<Mutex<Vec<Duration>>>);

impl RecordingPacer {
    /// Every delay requested so far.
    pub fn delays(&self) -> Vec<Duration> {
        self.0.lock().clone()
    }
}

impl Pacer for RecordingPacer {
    fn settle(&mut self, delay: Duration) {
        self.0.lock().push(delay);
    }
}

/// The pacer used by the running orchestrator.
#[derive(Resource)]
pub struct StepPacer(pub Box<dyn Pacer>);

impl Default for StepPacer {
    fn default() -> Self {
        Self(Box::new(ThreadSleepPacer))
    }
}

/// Result of a sequence that started executing.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceRun {
    /// Report sent back to the caller
    pub report: SequenceReport,
    /// Why execution stopped early, if it did
    pub failure: Option<CommandError>,
}

/// Where a sequence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOrigin {
    /// `POST /sequence`
    Request,
    /// A movement event pushed over the session link
    SessionEvent,
}

/// Emitted after every sequence, whether it ran or was refused.
#[derive(Message, Debug, Clone)]
pub struct SequenceFinished {
    /// Path the sequence arrived on
    pub origin: SequenceOrigin,
    /// The run, or why it never started
    pub outcome: Result<SequenceRun, CommandError>,
}

/// Checks the shape of a sequence before anything runs: at least one step,
/// and at least one command in every step.
pub fn validate_structure(request: &SequenceRequest) -> Result<(), CommandError> {
    if request.sequence.is_empty() {
        return Err(CommandError::MalformedInput("sequence has no steps".into()));
    }
    if let Some(index) = request
        .sequence
        .iter()
        .position(|step| step.commands.is_empty())
    {
        return Err(CommandError::MalformedInput(format!(
            "step {} has no commands",
            index + 1
        )));
    }
    Ok(())
}

/// Runs sequences against the registry.
pub struct SequenceRunner<'a> {
    /// Joint table and bus
    pub registry: &'a mut ActuatorRegistry,
    /// Budget for the document and plan
    pub arena: &'a mut SequenceArena,
    /// Inter-step wait
    pub pacer: &'a mut dyn Pacer,
    /// Delay between consecutive steps
    pub step_delay: Duration,
}

impl SequenceRunner<'_> {
    /// Reserves and parses a raw JSON document, then runs it.
    ///
    /// Failures before the first step (budget, decoding, shape) are returned
    /// as `Err` with nothing applied. Failures during execution produce a
    /// report with `error` set; steps already applied stay applied.
    pub fn run_document(
        &mut self,
        raw: &[u8],
        policy: AnglePolicy,
    ) -> Result<SequenceRun, CommandError> {
        self.run_with(raw.len(), policy, || {
            serde_json::from_slice(raw)
                .map_err(|err| CommandError::MalformedInput(format!("Invalid JSON: {err}")))
        })
    }

    /// Runs a document that was already decoded by the caller; `raw_len` is
    /// the size of the text it came from.
    pub fn run_with(
        &mut self,
        raw_len: usize,
        policy: AnglePolicy,
        parse: impl FnOnce() -> Result<SequenceRequest, CommandError>,
    ) -> Result<SequenceRun, CommandError> {
        let heap_before = self.arena.free();
        self.arena.reserve(raw_len, "sequence document")?;

        let result = parse()
            .and_then(|request| validate_structure(&request).map(|()| request))
            .and_then(|request| {
                let footprint = plan_footprint(&request);
                self.arena.reserve(footprint, "sequence plan")?;
                let run = self.execute(&request, policy, heap_before);
                self.arena.release(footprint);
                Ok(run)
            });

        self.arena.release(raw_len);
        result
    }

    fn execute(
        &mut self,
        request: &SequenceRequest,
        policy: AnglePolicy,
        heap_before: usize,
    ) -> SequenceRun {
        info!(
            "▶️ Running sequence '{}' ({} steps, {} commands)",
            request.skill,
            request.sequence.len(),
            request.command_count()
        );

        let mut steps_executed = 0;
        let mut failure = None;
        for (index, step) in request.sequence.iter().enumerate() {
            let admitted = match self.admit_step(step, policy) {
                Ok(admitted) => admitted,
                Err(err) => {
                    warn!("Step {} rejected: {}", index + 1, err);
                    failure = Some(err);
                    break;
                }
            };

            if index > 0 {
                self.pacer.settle(self.step_delay);
            }

            if let Err(err) = self.apply_step(&admitted) {
                warn!("Step {} failed: {}", index + 1, err);
                failure = Some(err);
                break;
            }
            debug!("Step {} applied ({} joints)", index + 1, admitted.len());
            steps_executed += 1;
        }

        let heap_after = self.arena.free();
        let final_angles: Vec<Angle> = self.registry.angles();
        match &failure {
            None => info!("✅ Sequence '{}' complete", request.skill),
            Some(_) => warn!(
                "Sequence '{}' aborted after {} steps",
                request.skill, steps_executed
            ),
        }

        let report = SequenceReport {
            status: if failure.is_none() { "completed" } else { "aborted" }.to_string(),
            skill: request.skill.clone(),
            steps_executed,
            heap_before,
            heap_after,
            final_angles,
            error: failure.as_ref().map(CommandError::to_body),
        };
        SequenceRun { report, failure }
    }

    /// Validates every command of a step before any of it is applied.
    fn admit_step(&self, step: &SequenceStep, policy: AnglePolicy) -> Result<Vec<Admitted>, CommandError> {
        step.commands
            .iter()
            .map(|command| admit(&*self.registry, &command.id, command.deg, policy))
            .collect()
    }

    fn apply_step(&mut self, admitted: &[Admitted]) -> Result<(), CommandError> {
        for command in admitted {
            self.registry.apply_angle(command.channel, command.angle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{BusLog, SimulatedBus},
        registry::JointSpec,
    };

    const DELAY: Duration = Duration::from_millis(400);

    struct Fixture {
        registry: ActuatorRegistry,
        arena: SequenceArena,
        pacer: RecordingPacer,
        log: BusLog,
    }

    impl Fixture {
        fn new(budget: usize) -> Self {
            let (bus, log) = SimulatedBus::new();
            Self {
                registry: ActuatorRegistry::new(JointSpec::default_table(), bus).unwrap(),
                arena: SequenceArena::new(budget),
                pacer: RecordingPacer::default(),
                log,
            }
        }

        fn run(&mut self, body: &str, policy: AnglePolicy) -> Result<SequenceReport, CommandError> {
            let mut pacer = self.pacer.clone();
            SequenceRunner {
                registry: &mut self.registry,
                arena: &mut self.arena,
                pacer: &mut pacer,
                step_delay: DELAY,
            }
            .run_document(body.as_bytes(), policy)
            .map(|run| run.report)
        }
    }

    fn degrees(angles: &[Angle]) -> Vec<u8> {
        angles.iter().map(|angle| angle.degrees()).collect()
    }

    #[test]
    fn runs_steps_in_order_with_delays_between() {
        let mut fixture = Fixture::new(32 * 1024);
        let report = fixture
            .run(
                r#"{"skill":"wave","sequence":[
                    {"seq_num":1,"commands":[{"id":1,"deg":10},{"id":2,"deg":20}]},
                    {"seq_num":2,"commands":[{"id":1,"deg":30}]},
                    {"seq_num":3,"commands":[{"id":6,"deg":0}]}
                ]}"#,
                AnglePolicy::Reject,
            )
            .unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.steps_executed, 3);
        assert_eq!(report.skill, "wave");
        assert_eq!(degrees(&report.final_angles), vec![30, 20, 90, 90, 90, 0]);
        assert_eq!(fixture.pacer.delays(), vec![DELAY, DELAY]);
        assert_eq!(fixture.log.write_count(), 4);
        assert_eq!(report.error, None);
    }

    #[test]
    fn array_order_wins_over_seq_num() {
        let mut fixture = Fixture::new(32 * 1024);
        let report = fixture
            .run(
                r#"{"skill":"s","sequence":[
                    {"seq_num":2,"commands":[{"id":1,"deg":20}]},
                    {"seq_num":1,"commands":[{"id":1,"deg":10}]}
                ]}"#,
                AnglePolicy::Reject,
            )
            .unwrap();
        assert_eq!(report.final_angles[0].degrees(), 10);
    }

    #[test]
    fn invalid_step_aborts_and_keeps_earlier_steps() {
        let mut fixture = Fixture::new(32 * 1024);
        let report = fixture
            .run(
                r#"{"skill":"reach","sequence":[
                    {"commands":[{"id":1,"deg":10}]},
                    {"commands":[{"id":2,"deg":20}]},
                    {"commands":[{"id":3,"deg":30},{"id":9,"deg":40}]},
                    {"commands":[{"id":4,"deg":50}]}
                ]}"#,
                AnglePolicy::Reject,
            )
            .unwrap();

        assert_eq!(report.status, "aborted");
        assert_eq!(report.steps_executed, 2);
        assert_eq!(degrees(&report.final_angles), vec![10, 20, 90, 90, 90, 90]);
        assert_eq!(report.error.unwrap().code, "unknown_joint");
        assert_eq!(fixture.pacer.delays().len(), 1);
    }

    #[test]
    fn out_of_range_is_rejected_or_clamped_by_policy() {
        let body = r#"{"sequence":[{"commands":[{"id":"left_shoulder_vertical","deg":200}]}]}"#;

        let mut strict = Fixture::new(32 * 1024);
        let report = strict.run(body, AnglePolicy::Reject).unwrap();
        assert_eq!(report.steps_executed, 0);
        assert_eq!(report.error.unwrap().code, "angle_out_of_range");

        let mut lenient = Fixture::new(32 * 1024);
        let report = lenient.run(body, AnglePolicy::Clamp).unwrap();
        assert_eq!(report.steps_executed, 1);
        assert_eq!(report.final_angles[0], Angle::MAX);
    }

    #[test]
    fn structural_errors_apply_nothing() {
        let mut fixture = Fixture::new(32 * 1024);
        for body in [
            r#"{"skill":"x","sequence":[]}"#,
            r#"{"skill":"x","sequence":[{"commands":[{"id":1,"deg":10}]},{"commands":[]}]}"#,
            r#"{"skill":"x"}"#,
            "not json",
        ] {
            assert!(matches!(
                fixture.run(body, AnglePolicy::Reject),
                Err(CommandError::MalformedInput(_))
            ));
        }
        assert_eq!(fixture.log.write_count(), 0);
        assert_eq!(fixture.arena.free(), 32 * 1024);
    }

    #[test]
    fn oversized_documents_are_allocation_failures() {
        let mut fixture = Fixture::new(64);
        let body = r#"{"skill":"too long for the budget","sequence":[{"commands":[{"id":1,"deg":10}]}]}"#;
        assert!(matches!(
            fixture.run(body, AnglePolicy::Reject),
            Err(CommandError::AllocationFailure(_))
        ));
        assert_eq!(fixture.log.write_count(), 0);
        assert_eq!(fixture.arena.free(), 64);
    }

    #[test]
    fn heap_figures_describe_the_held_document() {
        let mut fixture = Fixture::new(32 * 1024);
        let body = r#"{"skill":"nod","sequence":[{"commands":[{"id":2,"deg":45}]}]}"#;
        let report = fixture.run(body, AnglePolicy::Reject).unwrap();
        assert_eq!(report.heap_before, 32 * 1024);
        assert!(report.heap_after < report.heap_before - body.len());
        assert_eq!(fixture.arena.free(), 32 * 1024);
    }

    #[test]
    fn actuator_fault_stops_the_sequence() {
        let mut fixture = Fixture::new(32 * 1024);
        fixture.log.fail_pin(12);
        let report = fixture
            .run(
                r#"{"skill":"s","sequence":[
                    {"commands":[{"id":1,"deg":10}]},
                    {"commands":[{"id":3,"deg":20}]},
                    {"commands":[{"id":1,"deg":30}]}
                ]}"#,
                AnglePolicy::Reject,
            )
            .unwrap();
        assert_eq!(report.steps_executed, 1);
        assert_eq!(report.error.unwrap().code, "actuator_fault");
        assert_eq!(report.final_angles[0].degrees(), 10);
    }
}
