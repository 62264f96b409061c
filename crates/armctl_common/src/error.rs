//! Error enums, one per concern: commands, session frames, the session link
//! and configuration.

use thiserror::Error;

use crate::messages::ErrorBody;

/// Reasons a command is refused or aborted.
///
/// Every variant except [`CommandError::ActuatorFault`] is raised before any
/// joint is touched, so a refused request never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// The referenced joint id or name does not exist
    #[error("Invalid servo id: {0}")]
    UnknownJoint(String),
    /// The angle is outside 0-180
    #[error("Angle out of range 0-180: {0}")]
    AngleOutOfRange(f64),
    /// The body could not be decoded or is structurally wrong
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    /// Not enough memory to hold the request; the request is aborted, the device continues
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),
    /// The servo bus refused a write
    #[error("Actuator fault on channel {channel}: {reason}")]
    ActuatorFault {
        /// Channel index of the joint that failed
        channel: usize,
        /// Error reported by the bus
        reason: String,
    },
}

impl CommandError {
    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::UnknownJoint(_) => "unknown_joint",
            CommandError::AngleOutOfRange(_) => "angle_out_of_range",
            CommandError::MalformedInput(_) => "malformed_input",
            CommandError::AllocationFailure(_) => "allocation_failure",
            CommandError::ActuatorFault { .. } => "actuator_fault",
        }
    }

    /// HTTP status the request adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            CommandError::AllocationFailure(_) => 413,
            CommandError::ActuatorFault { .. } => 500,
            _ => 400,
        }
    }

    /// Error body sent back to the caller.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        }
    }
}

/// A session-protocol frame that could not be decoded.
///
/// These never reach the actuators: the frame is logged and dropped and the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The packet had no characters
    #[error("Empty frame")]
    Empty,
    /// The leading packet type is not one Engine.IO or Socket.IO defines
    #[error("Unknown packet type '{0}'")]
    UnknownPacketType(char),
    /// A known packet the link does not handle, such as binary events
    #[error("Unsupported packet: {0}")]
    Unsupported(String),
    /// The JSON part of the packet did not decode
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidPayload(err.to_string())
    }
}

/// Errors raised by the session link and its transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The transport dropped the connection
    #[error("Transport lost: {0}")]
    TransportLost(String),
    /// The transport could not establish a connection
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    /// A send was attempted without an open connection
    #[error("Not connected")]
    NotConnected,
    /// The configured backend address is not usable
    #[error("Invalid backend url: {0}")]
    InvalidUrl(String),
}

/// Invalid orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The joint table does not have one entry per joint
    #[error("Expected {expected} joints, found {found}")]
    JointCount {
        /// Joints the arm pair has
        expected: usize,
        /// Entries in the table
        found: usize,
    },
    /// Two entries share an id or a name
    #[error("Duplicate joint {0}")]
    DuplicateJoint(String),
    /// An entry's id is not between 1 and 6
    #[error("Joint id {0} is outside 1-6")]
    JointIdOutOfRange(u8),
    /// An entry's minimum pulse is not below its maximum
    #[error("Joint {name} has an empty pulse range ({min_us}..{max_us} us)")]
    PulseRange {
        /// Joint name
        name: String,
        /// Pulse width at 0 degrees
        min_us: u16,
        /// Pulse width at 180 degrees
        max_us: u16,
    },
    /// The settings file could not be read or parsed
    #[error("Could not read settings: {0}")]
    Unreadable(String),
}
