//! Capability interface implemented by every mount driver, plus the
//! vehicle context handed to drivers on each tick.

use mavlink::ardupilotmega::{MavMessage, PARAM_VALUE_DATA};
use mavlink::MavHeader;

use crate::config::{MountConfig, MountType};
use crate::location::Location;
use crate::mode::MountMode;
use crate::state::{MountAngles, MountState};
use mount_proto::Channel;

pub const RC_CHANNELS: usize = 18;

/// Vehicle attitude in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Snapshot of the vehicle supplied by the host on every tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleState {
    pub attitude: Attitude,
    /// Body rates in rad/s (x, y, z).
    pub gyro: [f32; 3],
    pub location: Option<Location>,
    pub home: Option<Location>,
    /// RC inputs normalised to [-1, 1], index 0 = channel 1.
    pub rc_in: [Option<f32>; RC_CHANNELS],
    /// Monotonic control-loop time.
    pub now_ms: u32,
}

impl VehicleState {
    /// Normalised input for a 1-based RC channel.
    pub fn rc_input(&self, channel: u8) -> Option<f32> {
        let idx = (channel as usize).checked_sub(1)?;
        self.rc_in.get(idx).copied().flatten()
    }
}

/// Everything a backend may read during an update.
pub struct BackendContext<'a> {
    pub config: &'a MountConfig,
    pub state: &'a MountState,
    pub vehicle: &'a VehicleState,
    /// Frontend pilot rate limit in deg/s, 0 = angle control.
    pub rc_rate_max: f32,
}

/// Resolved pointing demand.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MountTarget {
    pub angles: MountAngles,
    /// Pan is an earth-frame heading rather than relative to the vehicle nose.
    pub yaw_is_ef: bool,
}

impl MountTarget {
    pub fn body(angles: MountAngles) -> Self {
        Self { angles, yaw_is_ef: false }
    }
}

impl BackendContext<'_> {
    /// Location the current mode points at, if it has one and it is known.
    pub fn pointing_location(&self) -> Option<Location> {
        match self.state.mode() {
            MountMode::GpsPoint => self.state.roi_target(),
            MountMode::SysidTarget => self.state.target_sysid_location(),
            MountMode::HomeLocation => self.vehicle.home,
            _ => None,
        }
    }

    /// Earth-frame angles from the vehicle to the pointing location. `None`
    /// when either end is unknown; callers then hold their last target.
    pub fn location_target(&self) -> Option<MountTarget> {
        let target = self.pointing_location()?;
        let vehicle = self.vehicle.location?;
        let tilt = vehicle.elevation_deg(&target) as f32;
        let pan = wrap_180(vehicle.bearing_deg(&target) as f32);
        Some(MountTarget {
            angles: MountAngles::new(0.0, tilt, pan),
            yaw_is_ef: true,
        })
    }
}

/// Readiness failure reported by pre-arm checks. The text carries no
/// instance prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PreArmFailure(pub String);

impl PreArmFailure {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Contract every mount driver satisfies. Drivers see only their own
/// configuration and state, passed in explicitly.
pub trait MountBackend: Send {
    fn mount_type(&self) -> MountType;

    /// True if the pan axis can be driven independently of the vehicle.
    fn has_pan_control(&self, config: &MountConfig) -> bool;

    fn set_mode(&mut self, state: &mut MountState, mode: MountMode) {
        state.set_mode(mode);
    }

    fn set_angle_targets(&mut self, state: &mut MountState, target: MountAngles) {
        state.set_angle_target(target);
    }

    fn set_roi_target(&mut self, state: &mut MountState, target: Location) {
        state.set_roi_target(target);
    }

    fn set_target_sysid(&mut self, state: &mut MountState, sysid: u8) {
        state.set_target_sysid(sysid);
    }

    /// Mode servicing and output generation, called at 10 Hz or faster.
    fn update(&mut self, cx: &BackendContext<'_>);

    /// High-rate attitude-dependent work, called every loop iteration.
    /// Must not block.
    fn update_fast(&mut self, _cx: &BackendContext<'_>) {}

    fn pre_arm_check(&self) -> Result<(), PreArmFailure> {
        Ok(())
    }

    /// Current mount orientation in degrees, for status reporting.
    fn orientation(&self) -> MountAngles;

    /// True if the sender is the gimbal device this driver is bound to.
    fn claims_gimbal_device(&self, _header: &MavHeader) -> bool {
        false
    }

    /// GIMBAL_DEVICE_INFORMATION, GIMBAL_DEVICE_ATTITUDE_STATUS or
    /// GIMBAL_REPORT. Returns true if the driver consumed the message,
    /// binding itself to the sender if it was not bound yet.
    fn handle_gimbal_device_message(&mut self, _chan: Channel, _header: &MavHeader, _msg: &MavMessage) -> bool {
        false
    }

    fn handle_param_value(&mut self, _header: &MavHeader, _param: &PARAM_VALUE_DATA) {}

    /// Moves queued outbound messages into `out`.
    fn drain_outbound(&mut self, _out: &mut Vec<(Channel, MavMessage)>) {}
}

/// Wraps an angle in degrees into [-180, 180).
pub fn wrap_180(deg: f32) -> f32 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_180_folds_angles() {
        assert_eq!(wrap_180(190.0), -170.0);
        assert_eq!(wrap_180(-190.0), 170.0);
        assert_eq!(wrap_180(45.0), 45.0);
    }

    #[test]
    fn rc_input_is_one_based() {
        let mut v = VehicleState::default();
        v.rc_in[5] = Some(0.5);
        assert_eq!(v.rc_input(6), Some(0.5));
        assert_eq!(v.rc_input(0), None);
        assert_eq!(v.rc_input(40), None);
    }

    #[test]
    fn location_target_needs_both_ends() {
        let config = MountConfig::new(MountType::Servo);
        let mut state = MountState::new(MountMode::GpsPoint);
        let mut vehicle = VehicleState::default();

        let cx = BackendContext { config: &config, state: &state, vehicle: &vehicle, rc_rate_max: 0.0 };
        assert!(cx.location_target().is_none());

        state.set_roi_target(Location::from_degrees(0.0, 0.001, 0.0).unwrap());
        vehicle.location = Location::from_degrees(0.0, 0.0, 0.0);
        let cx = BackendContext { config: &config, state: &state, vehicle: &vehicle, rc_rate_max: 0.0 };
        let t = cx.location_target().unwrap();
        assert!(t.yaw_is_ef);
        assert!((t.angles.pan - 90.0).abs() < 0.01);
        assert!(t.angles.tilt.abs() < 0.01);
    }
}
