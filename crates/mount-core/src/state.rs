use serde::{Deserialize, Serialize};

use crate::location::Location;
use crate::mode::MountMode;

/// Roll/tilt/pan triple in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MountAngles {
    pub roll: f32,
    pub tilt: f32,
    pub pan: f32,
}

impl MountAngles {
    pub fn new(roll: f32, tilt: f32, pan: f32) -> Self {
        Self { roll, tilt, pan }
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.tilt.is_finite() && self.pan.is_finite()
    }
}

impl From<[f32; 3]> for MountAngles {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Per-instance runtime target model.
///
/// The ROI and sysid targets are independent: setting one never clears the
/// other, and neither changes the mode. The mode decides which one a
/// backend acts on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountState {
    mode: MountMode,
    yaw_lock: bool,
    angle_target: MountAngles,
    roi_target: Option<Location>,
    target_sysid: u8,
    target_sysid_location: Option<Location>,
}

impl MountState {
    pub fn new(mode: MountMode) -> Self {
        Self { mode, ..Self::default() }
    }

    pub fn mode(&self) -> MountMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MountMode) {
        self.mode = mode;
    }

    /// True when the yaw target is held in earth frame, false when it
    /// follows the vehicle's heading.
    pub fn yaw_lock(&self) -> bool {
        self.yaw_lock
    }

    pub fn set_yaw_lock(&mut self, yaw_lock: bool) {
        self.yaw_lock = yaw_lock;
    }

    pub fn angle_target(&self) -> MountAngles {
        self.angle_target
    }

    pub fn set_angle_target(&mut self, target: MountAngles) {
        self.angle_target = target;
    }

    pub fn roi_target(&self) -> Option<Location> {
        self.roi_target
    }

    pub fn set_roi_target(&mut self, target: Location) {
        self.roi_target = Some(target);
    }

    /// 0 means no system is tracked.
    pub fn target_sysid(&self) -> u8 {
        self.target_sysid
    }

    /// Changes the tracked system. The location is absent until the first
    /// position report from the new system arrives. Re-selecting the system
    /// already tracked keeps its location.
    pub fn set_target_sysid(&mut self, sysid: u8) {
        if sysid == self.target_sysid {
            return;
        }
        self.target_sysid = sysid;
        self.target_sysid_location = None;
    }

    pub fn target_sysid_location(&self) -> Option<Location> {
        self.target_sysid_location
    }

    /// Records a position report. Returns false and leaves the state
    /// untouched unless `sysid` is the tracked system.
    pub fn update_sysid_location(&mut self, sysid: u8, location: Location) -> bool {
        if self.target_sysid == 0 || self.target_sysid != sysid {
            return false;
        }
        self.target_sysid_location = Some(location);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_and_sysid_targets_are_independent() {
        let mut st = MountState::new(MountMode::Neutral);
        let roi = Location::new(10, 20, 30);
        st.set_roi_target(roi);
        st.set_target_sysid(7);
        assert!(st.update_sysid_location(7, Location::new(1, 2, 3)));

        st.set_mode(MountMode::GpsPoint);
        st.set_mode(MountMode::SysidTarget);
        assert_eq!(st.roi_target(), Some(roi));
        assert_eq!(st.target_sysid_location(), Some(Location::new(1, 2, 3)));
    }

    #[test]
    fn new_sysid_clears_stale_location() {
        let mut st = MountState::default();
        st.set_target_sysid(7);
        st.update_sysid_location(7, Location::new(1, 2, 3));
        st.set_target_sysid(9);
        assert_eq!(st.target_sysid_location(), None);
        assert!(!st.update_sysid_location(7, Location::new(4, 5, 6)));
        assert_eq!(st.target_sysid_location(), None);
    }

    #[test]
    fn reselecting_tracked_sysid_keeps_location() {
        let mut st = MountState::default();
        st.set_target_sysid(7);
        st.update_sysid_location(7, Location::new(1, 2, 3));
        st.set_target_sysid(7);
        assert_eq!(st.target_sysid_location(), Some(Location::new(1, 2, 3)));
    }

    #[test]
    fn untracked_state_ignores_reports() {
        let mut st = MountState::default();
        assert!(!st.update_sysid_location(0, Location::new(1, 1, 1)));
        assert_eq!(st.target_sysid_location(), None);
    }
}
