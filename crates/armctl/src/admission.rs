//! Command admission: every inbound joint command is checked here before
//! any component acts on it. Nothing in this module mutates state.

use armctl_common::{Angle, AnglePolicy, JOINT_COUNT, JointRef, error::CommandError};
use serde::de::DeserializeOwned;

use crate::registry::{ActuatorRegistry, ChannelIndex};

/// A command that passed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admitted {
    /// Resolved joint
    pub channel: ChannelIndex,
    /// Validated logical angle
    pub angle: Angle,
}

/// Resolves the joint, then validates the angle under `policy`.
pub fn admit(
    registry: &ActuatorRegistry,
    joint: &JointRef,
    raw_angle: f64,
    policy: AnglePolicy,
) -> Result<Admitted, CommandError> {
    let channel = registry.resolve(joint)?;
    let angle = Angle::from_raw(raw_angle, policy)?;
    Ok(Admitted { channel, angle })
}

/// Validates a full pose: exactly one angle per joint, all in range.
///
/// Either every angle is returned or none is, so a pose is never half-applied.
pub fn admit_pose(raw_angles: &[f64]) -> Result<Vec<Angle>, CommandError> {
    if raw_angles.len() != JOINT_COUNT {
        return Err(CommandError::MalformedInput(format!(
            "angles array must have {JOINT_COUNT} values, got {}",
            raw_angles.len()
        )));
    }
    raw_angles
        .iter()
        .map(|raw| Angle::from_raw(*raw, AnglePolicy::Reject))
        .collect()
}

/// Decodes a JSON request body, mapping every decoding failure to
/// [`CommandError::MalformedInput`].
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CommandError> {
    serde_json::from_slice(body).map_err(|err| CommandError::MalformedInput(format!("Invalid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::SimulatedBus, registry::JointSpec};
    use armctl_common::JointCommand;

    fn registry() -> ActuatorRegistry {
        ActuatorRegistry::new(JointSpec::default_table(), SimulatedBus::default()).unwrap()
    }

    #[test]
    fn admits_by_id_and_name() {
        let registry = registry();
        let by_id = admit(&registry, &JointRef::Id(3), 45.0, AnglePolicy::Reject).unwrap();
        let by_name = admit(&registry, &"left_elbow_vertical".into(), 45.0, AnglePolicy::Reject).unwrap();
        assert_eq!(by_id, by_name);
        assert_eq!(by_id.angle.degrees(), 45);
    }

    #[test]
    fn unknown_joint_is_reported_before_the_angle() {
        let registry = registry();
        assert_eq!(
            admit(&registry, &JointRef::Id(9), 500.0, AnglePolicy::Reject),
            Err(CommandError::UnknownJoint("9".into()))
        );
    }

    #[test]
    fn policy_decides_out_of_range_handling() {
        let registry = registry();
        assert_eq!(
            admit(&registry, &JointRef::Id(1), 181.0, AnglePolicy::Reject),
            Err(CommandError::AngleOutOfRange(181.0))
        );
        let clamped = admit(&registry, &JointRef::Id(1), 181.0, AnglePolicy::Clamp).unwrap();
        assert_eq!(clamped.angle, Angle::MAX);
    }

    #[test]
    fn pose_requires_six_valid_angles() {
        assert!(matches!(
            admit_pose(&[90.0; 5]),
            Err(CommandError::MalformedInput(_))
        ));
        assert_eq!(
            admit_pose(&[90.0, 90.0, 90.0, 90.0, 90.0, -5.0]),
            Err(CommandError::AngleOutOfRange(-5.0))
        );
        assert_eq!(admit_pose(&[0.0, 30.0, 60.0, 90.0, 120.0, 180.0]).unwrap().len(), 6);
    }

    #[test]
    fn undecodable_bodies_are_malformed() {
        assert!(matches!(
            decode_body::<JointCommand>(b"{not json"),
            Err(CommandError::MalformedInput(_))
        ));
        assert!(matches!(
            decode_body::<JointCommand>(br#"{"id": 1, "angle": "high"}"#),
            Err(CommandError::MalformedInput(_))
        ));
    }
}
