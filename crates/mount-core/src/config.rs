use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::frontend::MAX_INSTANCES;
use crate::mode::MountMode;
use crate::state::MountAngles;

pub const CONFIG_VERSION: i64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(i64),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backend selector for one mount slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountType {
    #[default]
    None,
    Servo,
    SoloGimbal,
    Alexmos,
    /// SToRM32 over MAVLink v1 commands.
    Storm32,
    /// SToRM32 over its native serial protocol.
    Storm32Serial,
    /// MAVLink gimbal-device protocol v2.
    Gremsy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Roll,
    Tilt,
    Pan,
}

/// Persisted configuration of one mount slot. Angle limits are in
/// centidegrees, position vectors in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    #[serde(rename = "type")]
    pub mount_type: MountType,
    pub default_mode: MountMode,

    /// Stabilise the earth-frame axis against vehicle attitude.
    pub stab_roll: bool,
    pub stab_tilt: bool,
    pub stab_pan: bool,

    /// RC channel (1-based) giving direct pilot input, 0 = none.
    pub roll_rc_in: u8,
    pub tilt_rc_in: u8,
    pub pan_rc_in: u8,

    pub roll_angle_min: i16,
    pub roll_angle_max: i16,
    pub tilt_angle_min: i16,
    pub tilt_angle_max: i16,
    pub pan_angle_min: i16,
    pub pan_angle_max: i16,

    pub retract_angles: [f32; 3],
    pub neutral_angles: [f32; 3],

    pub roll_stb_lead: f32,
    pub pitch_stb_lead: f32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_type: MountType::None,
            default_mode: MountMode::RcTargeting,
            stab_roll: false,
            stab_tilt: false,
            stab_pan: false,
            roll_rc_in: 0,
            tilt_rc_in: 0,
            pan_rc_in: 0,
            roll_angle_min: -4500,
            roll_angle_max: 4500,
            tilt_angle_min: -4500,
            tilt_angle_max: 4500,
            pan_angle_min: -4500,
            pan_angle_max: 4500,
            retract_angles: [0.0; 3],
            neutral_angles: [0.0; 3],
            roll_stb_lead: 0.0,
            pitch_stb_lead: 0.0,
        }
    }
}

impl MountConfig {
    pub fn new(mount_type: MountType) -> Self {
        Self { mount_type, ..Self::default() }
    }

    /// (min, max) in degrees.
    pub fn limits_deg(&self, axis: Axis) -> (f32, f32) {
        let (min, max) = match axis {
            Axis::Roll => (self.roll_angle_min, self.roll_angle_max),
            Axis::Tilt => (self.tilt_angle_min, self.tilt_angle_max),
            Axis::Pan => (self.pan_angle_min, self.pan_angle_max),
        };
        (min as f32 * 0.01, max as f32 * 0.01)
    }

    pub fn rc_channel(&self, axis: Axis) -> Option<u8> {
        let ch = match axis {
            Axis::Roll => self.roll_rc_in,
            Axis::Tilt => self.tilt_rc_in,
            Axis::Pan => self.pan_rc_in,
        };
        (ch > 0).then_some(ch)
    }

    pub fn retract(&self) -> MountAngles {
        self.retract_angles.into()
    }

    pub fn neutral(&self) -> MountAngles {
        self.neutral_angles.into()
    }

    pub fn has_pan_range(&self) -> bool {
        self.pan_angle_max > self.pan_angle_min
    }

    /// Clamps each axis into its configured range.
    pub fn constrain(&self, angles: MountAngles) -> MountAngles {
        let clamp = |v: f32, axis| {
            let (lo, hi) = self.limits_deg(axis);
            v.clamp(lo, hi)
        };
        MountAngles {
            roll: clamp(angles.roll, Axis::Roll),
            tilt: clamp(angles.tilt, Axis::Tilt),
            pan: clamp(angles.pan, Axis::Pan),
        }
    }

    /// Checks limits are ordered and angle vectors and gains are finite.
    pub fn validate(&self, slot: usize) -> Result<(), ConfigError> {
        for (axis, name) in [(Axis::Roll, "roll"), (Axis::Tilt, "tilt"), (Axis::Pan, "pan")] {
            let (lo, hi) = self.limits_deg(axis);
            if lo > hi {
                return Err(ConfigError::Invalid(format!(
                    "mount[{slot}].{name}_angle_min exceeds {name}_angle_max"
                )));
            }
        }
        let finite = self
            .retract_angles
            .iter()
            .chain(self.neutral_angles.iter())
            .chain([self.roll_stb_lead, self.pitch_stb_lead].iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(ConfigError::Invalid(format!("mount[{slot}] has non-finite values")));
        }
        Ok(())
    }
}

/// Frontend configuration: the slot table plus settings shared by every
/// instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub version: i64,
    /// Instance addressed by instance-unqualified operations.
    pub primary: u8,
    /// Pilot rate control maximum in deg/s. 0 selects RC angle control.
    pub rc_rate_max: f32,
    #[serde(rename = "mount")]
    pub mounts: Vec<MountConfig>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            primary: 0,
            rc_rate_max: 0.0,
            mounts: Vec::new(),
        }
    }
}

impl FrontendConfig {
    pub fn with_mounts(mounts: Vec<MountConfig>) -> Self {
        Self { mounts, ..Self::default() }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    /// Parses either layout. Legacy single-mount files are converted to the
    /// current shape.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(s)?;
        let version = value.get("version").and_then(|v| v.as_integer());
        let legacy_shape = value.get("mount").map(|m| m.is_table()).unwrap_or(false);

        let cfg = match version {
            None if legacy_shape => migrate_legacy(value)?,
            Some(1) => migrate_legacy(value)?,
            None | Some(CONFIG_VERSION) => {
                let mut cfg: FrontendConfig = value.try_into()?;
                cfg.version = CONFIG_VERSION;
                cfg
            }
            Some(other) => return Err(ConfigError::UnsupportedVersion(other)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mounts.len() > MAX_INSTANCES {
            return Err(ConfigError::Invalid(format!(
                "{} mounts configured, at most {MAX_INSTANCES} supported",
                self.mounts.len()
            )));
        }
        if !self.rc_rate_max.is_finite() || self.rc_rate_max < 0.0 {
            return Err(ConfigError::Invalid("rc_rate_max must be >= 0".into()));
        }
        for (slot, m) in self.mounts.iter().enumerate() {
            m.validate(slot)?;
        }
        Ok(())
    }
}

// Single-mount layout: limits in whole degrees, older key names.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct LegacyMount {
    #[serde(rename = "type")]
    mount_type: MountType,
    default_mode: MountMode,
    stab_roll: bool,
    stab_tilt: bool,
    stab_pan: bool,
    rc_in_roll: u8,
    rc_in_tilt: u8,
    rc_in_pan: u8,
    angmin_rol: i16,
    angmax_rol: i16,
    angmin_til: i16,
    angmax_til: i16,
    angmin_pan: i16,
    angmax_pan: i16,
    retract_angles: [f32; 3],
    neutral_angles: [f32; 3],
    lead_rll: f32,
    lead_ptch: f32,
}

impl Default for LegacyMount {
    fn default() -> Self {
        let d = MountConfig::default();
        Self {
            mount_type: d.mount_type,
            default_mode: d.default_mode,
            stab_roll: d.stab_roll,
            stab_tilt: d.stab_tilt,
            stab_pan: d.stab_pan,
            rc_in_roll: 0,
            rc_in_tilt: 0,
            rc_in_pan: 0,
            angmin_rol: d.roll_angle_min / 100,
            angmax_rol: d.roll_angle_max / 100,
            angmin_til: d.tilt_angle_min / 100,
            angmax_til: d.tilt_angle_max / 100,
            angmin_pan: d.pan_angle_min / 100,
            angmax_pan: d.pan_angle_max / 100,
            retract_angles: d.retract_angles,
            neutral_angles: d.neutral_angles,
            lead_rll: 0.0,
            lead_ptch: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyFile {
    #[serde(default)]
    rc_rate_max: f32,
    mount: LegacyMount,
}

fn centidegrees(deg: i16, key: &str) -> Result<i16, ConfigError> {
    deg.checked_mul(100)
        .ok_or_else(|| ConfigError::Invalid(format!("legacy {key} = {deg} out of range")))
}

fn migrate_legacy(value: toml::Value) -> Result<FrontendConfig, ConfigError> {
    let old: LegacyFile = value.try_into()?;
    let m = old.mount;
    let mount = MountConfig {
        mount_type: m.mount_type,
        default_mode: m.default_mode,
        stab_roll: m.stab_roll,
        stab_tilt: m.stab_tilt,
        stab_pan: m.stab_pan,
        roll_rc_in: m.rc_in_roll,
        tilt_rc_in: m.rc_in_tilt,
        pan_rc_in: m.rc_in_pan,
        roll_angle_min: centidegrees(m.angmin_rol, "angmin_rol")?,
        roll_angle_max: centidegrees(m.angmax_rol, "angmax_rol")?,
        tilt_angle_min: centidegrees(m.angmin_til, "angmin_til")?,
        tilt_angle_max: centidegrees(m.angmax_til, "angmax_til")?,
        pan_angle_min: centidegrees(m.angmin_pan, "angmin_pan")?,
        pan_angle_max: centidegrees(m.angmax_pan, "angmax_pan")?,
        retract_angles: m.retract_angles,
        neutral_angles: m.neutral_angles,
        roll_stb_lead: m.lead_rll,
        pitch_stb_lead: m.lead_ptch,
    };
    info!("config: migrated legacy single-mount layout (type={:?})", mount.mount_type);
    Ok(FrontendConfig {
        version: CONFIG_VERSION,
        primary: 0,
        rc_rate_max: old.rc_rate_max,
        mounts: vec![mount],
    })
}
