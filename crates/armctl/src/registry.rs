//! Actuator Registry: the joint table and the single mutation point for
//! hardware state.

use std::collections::HashSet;

use armctl_common::{
    Angle, JOINT_COUNT, JointRef,
    error::{CommandError, ConfigError},
};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::bus::{ServoBus, ServoWrite};

/// Static description of one joint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct JointSpec {
    /// Stable numeric identity, 1-6
    pub id: u8,
    /// Symbolic name used by pushed movement events
    pub name: String,
    /// Output pin
    pub pin: u8,
    /// Pulse width at 0°
    pub min_pulse_us: u16,
    /// Pulse width at 180°
    pub max_pulse_us: u16,
    /// Mechanically mirrored; the bus receives `180 - angle`
    #[serde(default)]
    pub inverted: bool,
}

impl JointSpec {
    fn new(id: u8, name: &str, pin: u8, inverted: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            pin,
            min_pulse_us: 500,
            max_pulse_us: 2400,
            inverted,
        }
    }

    /// The arm pair as wired on the reference board. The right arm is
    /// mounted mirrored, so its joints are inverted.
    pub fn default_table() -> Vec<JointSpec> {
        vec![
            JointSpec::new(1, "left_shoulder_vertical", 13, false),
            JointSpec::new(2, "left_shoulder_horizontal", 14, false),
            JointSpec::new(3, "left_elbow_vertical", 12, false),
            JointSpec::new(4, "right_shoulder_vertical", 17, true),
            JointSpec::new(5, "right_shoulder_horizontal", 18, true),
            JointSpec::new(6, "right_elbow_vertical", 19, true),
        ]
    }

    /// Angle actually sent to the servo for a logical angle.
    pub fn physical(&self, logical: Angle) -> Angle {
        if self.inverted {
            logical.complement()
        } else {
            logical
        }
    }

    /// Pulse width for a physical angle, linear over the calibration range.
    pub fn pulse_width(&self, physical: Angle) -> u16 {
        let span = u32::from(self.max_pulse_us - self.min_pulse_us);
        let offset = span * u32::from(physical.degrees()) / 180;
        // offset <= span, so the sum stays within max_pulse_us
        self.min_pulse_us + offset as u16
    }
}

/// Position of a joint in the registry, resolved from a [`JointRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelIndex(usize);

impl ChannelIndex {
    pub(crate) fn from_index(index: usize) -> Self {
        ChannelIndex(index)
    }

    /// The 0-based index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A joint and its last accepted logical angle.
#[derive(Clone, Debug)]
pub struct Joint {
    /// Static description
    pub spec: JointSpec,
    /// Last accepted logical angle (before inversion)
    pub current_angle: Angle,
}

/// Owns the joint table and the servo bus.
///
/// Every hardware write in the orchestrator goes through [`apply_angle`].
///
/// [`apply_angle`]: ActuatorRegistry::apply_angle
#[derive(Resource)]
pub struct ActuatorRegistry {
    joints: Vec<Joint>,
    bus: Box<dyn ServoBus>,
}

impl std::fmt::Debug for ActuatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorRegistry")
            .field("joints", &self.joints)
            .finish_non_exhaustive()
    }
}

impl ActuatorRegistry {
    /// Validates the table and takes ownership of the bus.
    ///
    /// Joints are ordered by id, so channel `n` is joint `n + 1`. All joints
    /// start at the neutral angle; nothing is written until
    /// [`neutralize_all`](Self::neutralize_all).
    pub fn new(mut specs: Vec<JointSpec>, bus: impl ServoBus) -> Result<Self, ConfigError> {
        if specs.len() != JOINT_COUNT {
            return Err(ConfigError::JointCount {
                expected: JOINT_COUNT,
                found: specs.len(),
            });
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for spec in &specs {
            if spec.id == 0 || usize::from(spec.id) > JOINT_COUNT {
                return Err(ConfigError::JointIdOutOfRange(spec.id));
            }
            if !ids.insert(spec.id) {
                return Err(ConfigError::DuplicateJoint(spec.id.to_string()));
            }
            if !names.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateJoint(spec.name.clone()));
            }
            if spec.min_pulse_us >= spec.max_pulse_us {
                return Err(ConfigError::PulseRange {
                    name: spec.name.clone(),
                    min_us: spec.min_pulse_us,
                    max_us: spec.max_pulse_us,
                });
            }
        }

        specs.sort_by_key(|spec| spec.id);
        let joints = specs
            .into_iter()
            .map(|spec| Joint {
                spec,
                current_angle: Angle::NEUTRAL,
            })
            .collect();

        Ok(Self {
            joints,
            bus: Box::new(bus),
        })
    }

    /// Registry over [`JointSpec::default_table`].
    pub fn with_default_table(bus: impl ServoBus) -> Self {
        Self {
            joints: JointSpec::default_table()
                .into_iter()
                .map(|spec| Joint {
                    spec,
                    current_angle: Angle::NEUTRAL,
                })
                .collect(),
            bus: Box::new(bus),
        }
    }

    /// Resolves a numeric id or a symbolic name to a channel.
    pub fn resolve(&self, joint: &JointRef) -> Result<ChannelIndex, CommandError> {
        match joint {
            JointRef::Id(id) => self.resolve_index(*id),
            JointRef::Name(name) => self
                .joints
                .iter()
                .position(|joint| joint.spec.name == *name)
                .map(ChannelIndex)
                .ok_or_else(|| CommandError::UnknownJoint(name.clone())),
        }
    }

    /// Resolves a numeric joint id (1-6).
    pub fn resolve_index(&self, id: i64) -> Result<ChannelIndex, CommandError> {
        self.joints
            .iter()
            .position(|joint| i64::from(joint.spec.id) == id)
            .map(ChannelIndex)
            .ok_or_else(|| CommandError::UnknownJoint(id.to_string()))
    }

    /// Writes a logical angle to one joint.
    ///
    /// The bus receives the physical angle; `current_angle` keeps the
    /// logical one. A failed write leaves `current_angle` unchanged.
    pub fn apply_angle(&mut self, channel: ChannelIndex, logical: Angle) -> Result<(), CommandError> {
        let joint = self
            .joints
            .get_mut(channel.0)
            .ok_or_else(|| CommandError::UnknownJoint(format!("channel {}", channel.0)))?;

        let physical = joint.spec.physical(logical);
        let write = ServoWrite {
            channel: channel.0,
            pin: joint.spec.pin,
            physical_angle: physical.degrees(),
            pulse_us: joint.spec.pulse_width(physical),
        };

        match self.bus.write(write) {
            Ok(()) => {
                debug!("{} -> {}", joint.spec.name, logical);
                joint.current_angle = logical;
                Ok(())
            }
            Err(err) => {
                error!("Write to {} failed: {}", joint.spec.name, err);
                Err(CommandError::ActuatorFault {
                    channel: channel.0,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Drives every joint to the neutral angle.
    ///
    /// All joints are attempted even if one fails; the first failure is
    /// returned.
    pub fn neutralize_all(&mut self) -> Result<(), CommandError> {
        let mut first_error = None;
        for index in 0..self.joints.len() {
            if let Err(err) = self.apply_angle(ChannelIndex(index), Angle::NEUTRAL) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Switches the status indicator.
    pub fn set_indicator(&mut self, lit: bool) -> Result<(), CommandError> {
        self.bus
            .set_indicator(lit)
            .map_err(|err| CommandError::ActuatorFault {
                channel: JOINT_COUNT,
                reason: err.to_string(),
            })
    }

    /// Current logical angles in channel order.
    pub fn angles(&self) -> Vec<Angle> {
        self.joints.iter().map(|joint| joint.current_angle).collect()
    }

    /// Output pins in channel order.
    pub fn pins(&self) -> Vec<u8> {
        self.joints.iter().map(|joint| joint.spec.pin).collect()
    }

    /// The joint table in channel order.
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// One joint by channel.
    pub fn joint(&self, channel: ChannelIndex) -> Option<&Joint> {
        self.joints.get(channel.0)
    }

    /// Channel for a 0-based index, if in range.
    pub fn channel(&self, index: usize) -> Option<ChannelIndex> {
        (index < self.joints.len()).then_some(ChannelIndex(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;

    fn registry() -> (ActuatorRegistry, crate::bus::BusLog) {
        let (bus, log) = SimulatedBus::new();
        (
            ActuatorRegistry::new(JointSpec::default_table(), bus).unwrap(),
            log,
        )
    }

    fn angle(degrees: u8) -> Angle {
        Angle::new(degrees).unwrap()
    }

    #[test]
    fn resolves_ids_and_names_to_the_same_channel() {
        let (registry, _) = registry();
        let by_id = registry.resolve(&JointRef::Id(4)).unwrap();
        let by_name = registry.resolve(&"right_shoulder_vertical".into()).unwrap();
        assert_eq!(by_id, by_name);
        assert_eq!(by_id.index(), 3);
    }

    #[test]
    fn unknown_joints_are_refused() {
        let (registry, _) = registry();
        assert_eq!(
            registry.resolve(&JointRef::Id(0)),
            Err(CommandError::UnknownJoint("0".into()))
        );
        assert_eq!(
            registry.resolve(&JointRef::Id(7)),
            Err(CommandError::UnknownJoint("7".into()))
        );
        assert!(registry.resolve(&"tail".into()).is_err());
    }

    #[test]
    fn inverted_joints_store_logical_and_write_physical() {
        let (mut registry, log) = registry();
        let right = registry.resolve_index(4).unwrap();
        registry.apply_angle(right, angle(30)).unwrap();

        assert_eq!(registry.angles()[3], angle(30));
        let write = log.last_write(3).unwrap();
        assert_eq!(write.pin, 17);
        assert_eq!(write.physical_angle, 150);
    }

    #[test]
    fn plain_joints_write_the_logical_angle() {
        let (mut registry, log) = registry();
        let left = registry.resolve_index(1).unwrap();
        registry.apply_angle(left, angle(30)).unwrap();
        assert_eq!(log.last_write(0).unwrap().physical_angle, 30);
    }

    #[test]
    fn pulse_width_spans_the_calibration_range() {
        let spec = &JointSpec::default_table()[0];
        assert_eq!(spec.pulse_width(Angle::MIN), 500);
        assert_eq!(spec.pulse_width(Angle::NEUTRAL), 1450);
        assert_eq!(spec.pulse_width(Angle::MAX), 2400);
    }

    #[test]
    fn failed_write_keeps_current_angle() {
        let (mut registry, log) = registry();
        log.fail_pin(14);
        let channel = registry.resolve_index(2).unwrap();
        let err = registry.apply_angle(channel, angle(10)).unwrap_err();
        assert!(matches!(err, CommandError::ActuatorFault { channel: 1, .. }));
        assert_eq!(registry.angles()[1], Angle::NEUTRAL);
    }

    #[test]
    fn neutralize_all_writes_every_joint() {
        let (mut registry, log) = registry();
        let channel = registry.resolve_index(6).unwrap();
        registry.apply_angle(channel, angle(0)).unwrap();
        log.clear();

        registry.neutralize_all().unwrap();
        assert_eq!(registry.angles(), vec![Angle::NEUTRAL; JOINT_COUNT]);
        assert_eq!(log.write_count(), JOINT_COUNT);
        assert!(log.writes().iter().all(|write| write.physical_angle == 90));
    }

    #[test]
    fn rejects_bad_tables() {
        let mut short = JointSpec::default_table();
        short.pop();
        assert!(matches!(
            ActuatorRegistry::new(short, SimulatedBus::default()),
            Err(ConfigError::JointCount { found: 5, .. })
        ));

        let mut duplicate = JointSpec::default_table();
        duplicate[5].name = duplicate[0].name.clone();
        assert!(matches!(
            ActuatorRegistry::new(duplicate, SimulatedBus::default()),
            Err(ConfigError::DuplicateJoint(_))
        ));

        let mut out_of_range = JointSpec::default_table();
        out_of_range[2].id = 9;
        assert_eq!(
            ActuatorRegistry::new(out_of_range, SimulatedBus::default()).unwrap_err(),
            ConfigError::JointIdOutOfRange(9)
        );
    }

    #[test]
    fn table_order_does_not_matter() {
        let mut reversed = JointSpec::default_table();
        reversed.reverse();
        let registry = ActuatorRegistry::new(reversed, SimulatedBus::default()).unwrap();
        assert_eq!(registry.pins(), vec![13, 14, 12, 17, 18, 19]);
    }
}
