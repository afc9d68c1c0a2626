use serde::{Deserialize, Serialize};

/// Mount operating mode. Numeric values follow MAV_MOUNT_MODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    /// Stowed at the configured retract angles.
    Retract,
    /// Held at the configured neutral angles.
    Neutral,
    /// Angle target supplied over MAVLink.
    MavlinkTargeting,
    /// Pilot RC inputs drive the angles.
    #[default]
    RcTargeting,
    /// Pointing at the region-of-interest location.
    GpsPoint,
    /// Pointing at another system's reported position.
    SysidTarget,
    /// Pointing at the vehicle's home location.
    HomeLocation,
}

impl MountMode {
    pub const ALL: [MountMode; 7] = [
        MountMode::Retract,
        MountMode::Neutral,
        MountMode::MavlinkTargeting,
        MountMode::RcTargeting,
        MountMode::GpsPoint,
        MountMode::SysidTarget,
        MountMode::HomeLocation,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            MountMode::Retract => 0,
            MountMode::Neutral => 1,
            MountMode::MavlinkTargeting => 2,
            MountMode::RcTargeting => 3,
            MountMode::GpsPoint => 4,
            MountMode::SysidTarget => 5,
            MountMode::HomeLocation => 6,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Decodes a mode carried in a float command parameter. Rejects NaN,
    /// fractional and out-of-range values.
    pub fn from_param(p: f32) -> Option<Self> {
        if !p.is_finite() || p < 0.0 || p.fract() != 0.0 || p > u8::MAX as f32 {
            return None;
        }
        Self::from_u8(p as u8)
    }

    /// Modes that point at a location rather than at fixed angles.
    pub fn is_location_pointing(self) -> bool {
        matches!(
            self,
            MountMode::GpsPoint | MountMode::SysidTarget | MountMode::HomeLocation
        )
    }
}
