//! Drives the whole orchestrator through the request bridge with a manual
//! clock, a simulated bus and a recording pacer.

use std::time::Duration;

use armctl::{
    ArmctlPlugin, JOINT_COUNT,
    bus::{BusLog, SimulatedBus},
    calibration::{DeviceRestart, PendingRestart},
    heartbeat::Heartbeat,
    registry::ActuatorRegistry,
    requests::{Reply, RequestBridge},
    sequence::{RecordingPacer, SequenceFinished, SequenceOrigin, StepPacer},
    settings::OrchestratorSettings,
    Route,
};
use bevy::{prelude::*, time::TimeUpdateStrategy};
use serde_json::{Value, json};

#[derive(Resource, Default)]
struct Observed {
    restarts: usize,
    sequences: Vec<SequenceOrigin>,
}

fn observe(
    mut observed: ResMut<Observed>,
    mut restarts: MessageReader<DeviceRestart>,
    mut finished: MessageReader<SequenceFinished>,
) {
    observed.restarts += restarts.read().count();
    for message in finished.read() {
        observed.sequences.push(message.origin);
    }
}

struct Harness {
    app: App,
    bus: BusLog,
    pacer: RecordingPacer,
    bridge: RequestBridge,
}

impl Harness {
    fn new(settings: OrchestratorSettings) -> Self {
        let (bus, log) = SimulatedBus::new();
        let registry = ActuatorRegistry::new(settings.joints.clone(), bus).unwrap();
        let pacer = RecordingPacer::default();

        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::ZERO))
            .insert_resource(settings)
            .insert_resource(registry)
            .insert_resource(StepPacer(Box::new(pacer.clone())))
            .add_plugins(ArmctlPlugin)
            .init_resource::<Observed>()
            .add_systems(Last, observe);
        app.update();

        let bridge = app.world().resource::<RequestBridge>().clone();
        Self {
            app,
            bus: log,
            pacer,
            bridge,
        }
    }

    fn request(&mut self, method: &str, path: &str, body: Value) -> Reply {
        let reply = self
            .bridge
            .submit(
                Route::resolve(method, path),
                serde_json::to_vec(&body).unwrap(),
            )
            .unwrap();
        self.app.update();
        reply.try_recv().unwrap()
    }

    fn advance(&mut self, millis: u64) {
        self.app
            .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(
                millis,
            )));
        self.app.update();
        self.app
            .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::ZERO));
    }

    fn physical(&self, channel: usize) -> Option<u8> {
        self.bus.last_write(channel).map(|write| write.physical_angle)
    }

    fn observed(&self) -> &Observed {
        self.app.world().resource::<Observed>()
    }
}

#[test]
fn boot_drives_every_joint_to_neutral() {
    let harness = Harness::new(OrchestratorSettings::default());
    assert_eq!(harness.bus.write_count(), JOINT_COUNT);
    for channel in 0..JOINT_COUNT {
        assert_eq!(harness.physical(channel), Some(90));
    }
}

#[test]
fn status_reports_layout_and_budget() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    let reply = harness.request("GET", "/", Value::Null);

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "ok");
    assert_eq!(reply.body["pins"], json!([13, 14, 12, 17, 18, 19]));
    assert_eq!(reply.body["angles"], json!([90, 90, 90, 90, 90, 90]));
    assert_eq!(
        reply.body["mapping"],
        "indices 0-2 left arm joints, 3-5 right arm joints"
    );
    assert_eq!(reply.body["free_memory"], 32 * 1024);
    assert_eq!(reply.body["batch"]["pending"], 0);
    assert_eq!(reply.body["joints"][3]["inverted"], true);
}

#[test]
fn six_joint_commands_apply_as_one_pose() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    harness.bus.clear();

    for id in 1..JOINT_COUNT as i64 {
        let reply = harness.request("POST", "/servo", json!({ "id": id, "angle": 10 * id }));
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["flushed"], false);
        assert_eq!(reply.body["pending"], id);
    }
    assert_eq!(harness.bus.write_count(), 0);

    let reply = harness.request("POST", "/servo", json!({ "id": 6, "angle": 60 }));
    assert_eq!(reply.body["flushed"], true);
    assert_eq!(reply.body["pending"], 0);
    assert_eq!(harness.bus.write_count(), JOINT_COUNT);
    assert_eq!(harness.physical(0), Some(10));
    // Right arm joints are mirrored on the bus
    assert_eq!(harness.physical(5), Some(120));
}

#[test]
fn partial_batch_applies_after_timeout() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    harness.bus.clear();

    harness.request("POST", "/servo", json!({ "id": 2, "angle": 30 }));
    let status = harness.request("GET", "/", Value::Null);
    assert_eq!(status.body["batch"]["pending"], 1);
    assert_eq!(status.body["batch"]["remaining_timeout_ms"], 1000);

    harness.advance(999);
    assert_eq!(harness.bus.write_count(), 0);

    harness.advance(1);
    assert_eq!(harness.bus.write_count(), 1);
    assert_eq!(harness.physical(1), Some(30));

    let status = harness.request("GET", "/", Value::Null);
    assert_eq!(status.body["batch"]["pending"], 0);
    assert_eq!(status.body["batch"]["remaining_timeout_ms"], Value::Null);
}

#[test]
fn invalid_joint_commands_are_refused() {
    let mut harness = Harness::new(OrchestratorSettings::default());

    let reply = harness.request("POST", "/servo", json!({ "id": 1, "angle": 181 }));
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["code"], "angle_out_of_range");

    let reply = harness.request("POST", "/servo", json!({ "id": 7, "angle": 90 }));
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["code"], "unknown_joint");

    let reply = harness.request("POST", "/servo", json!({ "angle": 90 }));
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["code"], "malformed_input");

    let status = harness.request("GET", "/", Value::Null);
    assert_eq!(status.body["batch"]["pending"], 0);
}

#[test]
fn pose_applies_immediately_or_not_at_all() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    harness.bus.clear();

    let reply = harness.request("POST", "/servos", json!({ "angles": [0, 30, 60, 90, 120, 180] }));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["angles"], json!([0, 30, 60, 90, 120, 180]));
    assert_eq!(harness.physical(0), Some(0));
    assert_eq!(harness.physical(4), Some(60));
    assert_eq!(harness.physical(5), Some(0));

    harness.bus.clear();
    let reply = harness.request("POST", "/servos", json!({ "angles": [10, 10, 10, 10, 10, 200] }));
    assert_eq!(reply.status, 400);
    let reply = harness.request("POST", "/servos", json!({ "angles": [10, 10, 10] }));
    assert_eq!(reply.status, 400);
    assert_eq!(harness.bus.write_count(), 0);
}

#[test]
fn queued_commands_drain_one_per_tick() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    harness.bus.clear();

    for angle in [20, 40, 60] {
        let reply = harness.request("POST", "/queue", json!({ "id": 3, "angle": angle }));
        assert_eq!(reply.status, 200);
    }
    // The first entry goes out on the frame it arrives
    assert_eq!(harness.physical(2), Some(20));
    let status = harness.request("GET", "/", Value::Null);
    assert_eq!(status.body["joints"][2]["queue_depth"], 2);

    harness.advance(49);
    assert_eq!(harness.physical(2), Some(20));
    harness.advance(1);
    assert_eq!(harness.physical(2), Some(40));
    harness.advance(50);
    assert_eq!(harness.physical(2), Some(60));
    assert_eq!(harness.bus.write_count(), 3);
}

#[test]
fn sequence_runs_steps_with_settle_delay() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    let reply = harness.request(
        "POST",
        "/sequence",
        json!({
            "skill": "wave",
            "sequence": [
                { "seq_num": 1, "commands": [{ "id": 1, "deg": 45 }] },
                { "seq_num": 2, "commands": [{ "id": 1, "deg": 135 }, { "id": 4, "deg": 45 }] },
                { "seq_num": 3, "commands": [{ "id": 1, "deg": 90 }] }
            ]
        }),
    );

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "completed");
    assert_eq!(reply.body["skill"], "wave");
    assert_eq!(reply.body["steps_executed"], 3);
    assert_eq!(reply.body["heap_before"], 32 * 1024);
    assert!(reply.body["heap_after"].as_u64().unwrap() < 32 * 1024);
    assert_eq!(reply.body["final_angles"], json!([90, 90, 90, 45, 90, 90]));
    assert_eq!(harness.pacer.delays(), vec![Duration::from_millis(400); 2]);
    assert_eq!(harness.physical(3), Some(135));
    assert_eq!(harness.observed().sequences, vec![SequenceOrigin::Request]);

    // The document's memory is returned once the run ends
    let status = harness.request("GET", "/", Value::Null);
    assert_eq!(status.body["free_memory"], 32 * 1024);
}

#[test]
fn sequence_aborts_at_the_first_bad_step() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    let reply = harness.request(
        "POST",
        "/sequence",
        json!({
            "skill": "reach",
            "sequence": [
                { "commands": [{ "id": 2, "deg": 10 }] },
                { "commands": [{ "id": 2, "deg": 20 }, { "id": 3, "deg": 500 }] },
                { "commands": [{ "id": 2, "deg": 30 }] }
            ]
        }),
    );

    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["status"], "aborted");
    assert_eq!(reply.body["steps_executed"], 1);
    assert_eq!(reply.body["error"]["code"], "angle_out_of_range");
    // The bad step is refused as a whole
    assert_eq!(reply.body["final_angles"][1], 10);
    assert_eq!(reply.body["final_angles"][2], 90);
}

#[test]
fn calibration_clears_work_and_schedules_restart() {
    let settings = OrchestratorSettings {
        restart_after_calibration: true,
        ..Default::default()
    };
    let mut harness = Harness::new(settings);

    harness.request("POST", "/servo", json!({ "id": 1, "angle": 10 }));
    harness.request("POST", "/queue", json!({ "id": 2, "angle": 10 }));
    harness.request("POST", "/queue", json!({ "id": 2, "angle": 20 }));

    let reply = harness.request("POST", "/calibrate", Value::Null);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["restart_scheduled"], true);
    assert_eq!(reply.body["angles"], json!([90, 90, 90, 90, 90, 90]));

    let status = harness.request("GET", "/", Value::Null);
    assert_eq!(status.body["batch"]["pending"], 0);
    assert_eq!(status.body["joints"][1]["queue_depth"], 0);

    let deadline = harness.app.world().resource::<PendingRestart>().deadline();
    assert_eq!(deadline, Some(Duration::from_millis(500)));

    harness.advance(499);
    assert_eq!(harness.observed().restarts, 0);
    harness.advance(1);
    assert_eq!(harness.observed().restarts, 1);
    assert_eq!(harness.app.world().resource::<PendingRestart>().deadline(), None);
    harness.advance(1000);
    assert_eq!(harness.observed().restarts, 1);
}

#[test]
fn calibration_without_restart_only_neutralizes() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    let reply = harness.request("POST", "/calibrate", Value::Null);
    assert_eq!(reply.body["restart_scheduled"], false);
    harness.advance(5000);
    assert_eq!(harness.observed().restarts, 0);
}

#[test]
fn heartbeat_blinks_without_touching_joints() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    harness.bus.clear();

    harness.advance(1000);
    assert!(harness.bus.indicator());
    assert!(harness.app.world().resource::<Heartbeat>().is_lit());
    harness.advance(1000);
    assert!(!harness.bus.indicator());
    assert!(!harness.app.world().resource::<Heartbeat>().is_lit());
    assert_eq!(harness.bus.indicator_changes(), 2);
    assert_eq!(harness.bus.write_count(), 0);
}

#[test]
fn unknown_routes_answer_not_found() {
    let mut harness = Harness::new(OrchestratorSettings::default());
    let reply = harness.request("GET", "/servo", Value::Null);
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["error"], "Not found");
}
