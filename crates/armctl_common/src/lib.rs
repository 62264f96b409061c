#![deny(
    missing_docs,
    trivial_casts,
    unstable_features,
    unused_import_braces,
    clippy::unwrap_used
)]

//! Types shared by the orchestrator, its transports and anything talking to
//! it: validated angles, joint references, request and reply bodies, the
//! session-protocol codec and the error enums.

pub mod messages;
pub use messages::*;

pub mod codec;

pub mod error;

use serde::{Deserialize, Serialize};

use std::fmt::Display;

use crate::error::CommandError;

/// Number of joints on the arm pair (three per arm).
pub const JOINT_COUNT: usize = 6;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
/// A validated joint angle in whole degrees, always within `0..=180`.
///
/// An [`Angle`] is always *logical*: it is the value that was requested and
/// that is reported back. Physical inversion of mirrored joints happens at
/// the bus boundary and never changes the stored value.
pub struct Angle(u8);

impl Angle {
    /// Lowest accepted angle.
    pub const MIN: Self = Angle(0);
    /// Highest accepted angle.
    pub const MAX: Self = Angle(180);
    /// Neutral pose used at boot and by calibration.
    pub const NEUTRAL: Self = Angle(90);

    /// Returns `None` when `degrees` is above 180.
    pub fn new(degrees: u8) -> Option<Self> {
        (degrees <= Self::MAX.0).then_some(Angle(degrees))
    }

    /// Validates a raw inbound number according to `policy`.
    ///
    /// Non-finite numbers are always malformed. Finite numbers are rounded to
    /// the nearest degree after the range check (or clamp).
    pub fn from_raw(raw: f64, policy: AnglePolicy) -> Result<Self, CommandError> {
        if !raw.is_finite() {
            return Err(CommandError::MalformedInput(format!(
                "angle must be a finite number, got {raw}"
            )));
        }

        let bounded = match policy {
            AnglePolicy::Reject => {
                if !(0.0..=180.0).contains(&raw) {
                    return Err(CommandError::AngleOutOfRange(raw));
                }
                raw
            }
            AnglePolicy::Clamp => raw.clamp(0.0, 180.0),
        };

        // bounded is within 0..=180 so the cast cannot truncate
        Ok(Angle(bounded.round() as u8))
    }

    /// The angle in degrees.
    pub fn degrees(self) -> u8 {
        self.0
    }

    /// Mirror of this angle around the neutral position (`180 - angle`).
    pub fn complement(self) -> Self {
        Angle(Self::MAX.0 - self.0)
    }
}

impl TryFrom<u8> for Angle {
    type Error = CommandError;

    fn try_from(degrees: u8) -> Result<Self, Self::Error> {
        Angle::new(degrees).ok_or(CommandError::AngleOutOfRange(f64::from(degrees)))
    }
}

impl From<Angle> for u8 {
    fn from(angle: Angle) -> Self {
        angle.0
    }
}

impl Default for Angle {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl Display for Angle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.0)
    }
}

/// How out-of-range angles are treated during admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnglePolicy {
    /// Reject with [`CommandError::AngleOutOfRange`]. Used by request paths.
    Reject,
    /// Clamp into `0..=180`. Used by pushed movement events.
    Clamp,
}

/// Reference to a joint, either by numeric id (1-6) or by symbolic name.
///
/// Request bodies address joints by number while pushed movement events use
/// names such as `left_shoulder_vertical`; both resolve through the same
/// lookup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum JointRef {
    /// Stable numeric identity, 1-based.
    Id(i64),
    /// Symbolic joint name.
    Name(String),
}

impl From<i64> for JointRef {
    fn from(id: i64) -> Self {
        JointRef::Id(id)
    }
}

impl From<&str> for JointRef {
    fn from(name: &str) -> Self {
        JointRef::Name(name.to_string())
    }
}

impl Display for JointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JointRef::Id(id) => write!(f, "{id}"),
            JointRef::Name(name) => f.write_str(name),
        }
    }
}
