//! Request and response bodies exchanged with the orchestrator.
//!
//! Inbound bodies keep raw numbers (`f64`) and raw joint references so that
//! range and identity checks happen in one place, during admission, instead
//! of failing inside the JSON decoder with an unhelpful message.

use serde::{Deserialize, Serialize};

use crate::{Angle, JointRef};

/// `POST /servo` and `POST /queue` body: one joint, one angle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JointCommand {
    /// Joint id or name
    pub id: JointRef,
    /// Requested angle in degrees, checked during admission
    pub angle: f64,
}

/// `POST /servos` body: a full pose, one angle per joint in id order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PoseCommand {
    /// Requested angles, checked during admission
    pub angles: Vec<f64>,
}

/// `POST /sequence` body, and the payload of a `final_movements` event.
///
/// Pushed events carry no `skill`; it defaults to an empty label.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct SequenceRequest {
    /// Label echoed back in the report
    #[serde(default)]
    pub skill: String,
    /// Steps in execution order
    pub sequence: Vec<SequenceStep>,
}

/// One step of a sequence. Commands inside a step are applied together
/// before the executor moves on.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SequenceStep {
    /// Informational ordering hint from the producer; steps run in array order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_num: Option<u32>,
    /// Joint targets applied together
    pub commands: Vec<StepCommand>,
}

/// A single joint target inside a step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StepCommand {
    /// Joint id or name
    pub id: JointRef,
    /// Target angle in degrees
    pub deg: f64,
}

impl SequenceRequest {
    /// Total number of joint commands across all steps.
    pub fn command_count(&self) -> usize {
        self.sequence.iter().map(|step| step.commands.len()).sum()
    }
}

/// Acknowledgement for a single-joint command routed through the batch coordinator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JointAck {
    /// Joint id, 1-based
    pub id: u8,
    /// Accepted angle
    pub angle: Angle,
    /// Joints waiting in the batch after this command (0 right after a flush)
    pub pending: usize,
    /// True when this command completed the batch and it was applied
    pub flushed: bool,
}

/// Acknowledgement for a full-pose command.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PoseAck {
    /// Angles applied, in id order
    pub angles: Vec<Angle>,
}

/// Acknowledgement for a queued joint command.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueueAck {
    /// Joint id, 1-based
    pub id: u8,
    /// Queued angle
    pub angle: Angle,
    /// Entries waiting on this joint, including this one
    pub depth: usize,
}

/// Result of a sequence run. Sent for both success and failure so the
/// caller always learns how far execution got.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SequenceReport {
    /// `completed` or `aborted`
    pub status: String,
    /// Label from the request
    pub skill: String,
    /// Steps fully applied
    pub steps_executed: usize,
    /// Free sequence budget before the document was reserved
    pub heap_before: usize,
    /// Free sequence budget while the document was held
    pub heap_after: usize,
    /// Joint angles after the run, in id order
    pub final_angles: Vec<Angle>,
    /// Why the run stopped early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// `POST /calibrate` body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CalibrationReport {
    /// Always `calibrated`
    pub status: String,
    /// Angles after neutralizing, in id order
    pub angles: Vec<Angle>,
    /// True when a device restart follows
    pub restart_scheduled: bool,
}

/// Per-joint entry of the status report.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JointStatus {
    /// Joint id, 1-based
    pub id: u8,
    /// Symbolic name used by pushed events
    pub name: String,
    /// Output pin on the servo bus
    pub pin: u8,
    /// Whether the physical angle is mirrored
    pub inverted: bool,
    /// Current logical angle
    pub angle: Angle,
    /// Entries waiting in this joint's queue
    pub queue_depth: usize,
}

/// Open batch summary inside the status report.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BatchStatus {
    /// Joints set in the open batch
    pub pending: usize,
    /// Milliseconds until the open batch is flushed by timeout, if one is open
    pub remaining_timeout_ms: Option<u64>,
}

/// `GET /` body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusReport {
    /// Always `ok`
    pub status: String,
    /// Output pins in id order
    pub pins: Vec<u8>,
    /// Current angles in id order
    pub angles: Vec<Angle>,
    /// Human readable joint layout
    pub mapping: String,
    /// One entry per joint
    pub joints: Vec<JointStatus>,
    /// Open batch
    pub batch: BatchStatus,
    /// Free sequence budget in bytes
    pub free_memory: usize,
}

/// Body of every refused request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human readable message
    pub error: String,
    /// Stable machine readable code
    pub code: String,
}

/// Operations reachable over the request/response path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// `GET /`
    Status,
    /// `POST /servo`
    SetJoint,
    /// `POST /servos`
    SetPose,
    /// `POST /sequence`
    RunSequence,
    /// `POST /queue`
    Enqueue,
    /// `POST /calibrate`
    Calibrate,
    /// Anything else; answered with 404
    NotFound(String),
}

impl Route {
    /// Maps an HTTP method and path onto a route.
    pub fn resolve(method: &str, path: &str) -> Self {
        let path = path.split('?').next().unwrap_or(path);
        match (method.to_ascii_uppercase().as_str(), path) {
            ("GET", "/") => Route::Status,
            ("POST", "/servo") => Route::SetJoint,
            ("POST", "/servos") => Route::SetPose,
            ("POST", "/sequence") => Route::RunSequence,
            ("POST", "/queue") => Route::Enqueue,
            ("POST", "/calibrate") => Route::Calibrate,
            (method, path) => Route::NotFound(format!("{method} {path}")),
        }
    }
}
