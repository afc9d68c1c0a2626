//! Inbound MAVLink handling. Commands always answer with a result code;
//! telemetry and gimbal-device traffic is consumed silently.

use mavlink::ardupilotmega::{
    MavCmd, MavMessage, MavResult, COMMAND_LONG_DATA, GLOBAL_POSITION_INT_DATA,
    MOUNT_CONFIGURE_DATA, MOUNT_CONTROL_DATA, PARAM_VALUE_DATA,
};
use mavlink::MavHeader;
use tracing::{debug, warn};

use crate::frontend::{Mount, MAX_INSTANCES};
use crate::location::Location;
use crate::mode::MountMode;
use mount_proto::Channel;

const GIMBAL_MANAGER_FLAGS_RETRACT: u32 = 1;
const GIMBAL_MANAGER_FLAGS_NEUTRAL: u32 = 2;
const GIMBAL_MANAGER_FLAGS_YAW_LOCK: u32 = 16;

fn flag_param(p: f32) -> Option<bool> {
    p.is_finite().then_some(p != 0.0)
}

impl Mount {
    /// Handles COMMAND_LONG. Commands outside the mount set are
    /// `MAV_RESULT_UNSUPPORTED`.
    #[allow(deprecated)]
    pub fn handle_command_long(&mut self, packet: &COMMAND_LONG_DATA) -> MavResult {
        let result = match packet.command {
            MavCmd::MAV_CMD_DO_MOUNT_CONFIGURE => self.handle_command_do_mount_configure(packet),
            MavCmd::MAV_CMD_DO_MOUNT_CONTROL => self.handle_command_do_mount_control(packet),
            MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW => {
                self.handle_command_do_gimbal_manager_pitchyaw(packet)
            }
            _ => MavResult::MAV_RESULT_UNSUPPORTED,
        };
        if result != MavResult::MAV_RESULT_ACCEPTED {
            warn!("mount: command {:?} -> {:?}", packet.command, result);
        }
        result
    }

    /// Routes telemetry and gimbal-device messages. Anything else is ignored.
    pub fn handle_message(&mut self, chan: Channel, header: &MavHeader, msg: &MavMessage) {
        match msg {
            MavMessage::GLOBAL_POSITION_INT(data) => {
                self.handle_global_position_int(header.system_id, data)
            }
            MavMessage::GIMBAL_DEVICE_INFORMATION(_)
            | MavMessage::GIMBAL_DEVICE_ATTITUDE_STATUS(_)
            | MavMessage::GIMBAL_REPORT(_) => self.handle_gimbal_report(chan, header, msg),
            MavMessage::MOUNT_CONFIGURE(data) => self.handle_mount_configure(data),
            MavMessage::MOUNT_CONTROL(data) => self.handle_mount_control(data),
            MavMessage::PARAM_VALUE(data) => self.handle_param_value(header, data),
            _ => {}
        }
    }

    /// Hands a PARAM_VALUE to every backend; only the one that asked its
    /// device for parameters keeps it.
    pub fn handle_param_value(&mut self, header: &MavHeader, param: &PARAM_VALUE_DATA) {
        for i in self.live_instances_mut() {
            i.backend.handle_param_value(header, param);
        }
    }

    // A device already claimed by one instance is delivered to that instance
    // only. An unclaimed device goes to the first instance that accepts it.
    fn handle_gimbal_report(&mut self, chan: Channel, header: &MavHeader, msg: &MavMessage) {
        let claimed = self
            .live_instances_mut()
            .any(|i| i.backend.claims_gimbal_device(header));
        for i in self.live_instances_mut() {
            if claimed && !i.backend.claims_gimbal_device(header) {
                continue;
            }
            if i.backend.handle_gimbal_device_message(chan, header, msg) {
                break;
            }
        }
    }

    // MOUNT_CONFIGURE message: same effect as the command, no reply.
    fn handle_mount_configure(&mut self, data: &MOUNT_CONFIGURE_DATA) {
        let primary = self.primary();
        let Some(mode) = MountMode::from_u8(data.mount_mode as u8) else {
            debug!("mount: MOUNT_CONFIGURE with unknown mode {:?}", data.mount_mode);
            return;
        };
        let stab = [data.stab_roll, data.stab_pitch, data.stab_yaw].map(|v| Some(v != 0));
        self.configure(primary, mode, stab);
    }

    // MOUNT_CONTROL message: inputs are read according to the current mode,
    // angles in centidegrees (a pitch, b roll, c yaw) or a location
    // (a lat, b lon in deg*1e7, c alt in cm).
    fn handle_mount_control(&mut self, data: &MOUNT_CONTROL_DATA) {
        let primary = self.primary();
        match self.mode_for(primary) {
            MountMode::MavlinkTargeting => {
                let (tilt, roll, pan) = (
                    data.input_a as f32 * 0.01,
                    data.input_b as f32 * 0.01,
                    data.input_c as f32 * 0.01,
                );
                self.set_angle_targets_for(primary, roll, tilt, pan);
            }
            MountMode::GpsPoint => {
                let target = Location::new(data.input_a, data.input_b, data.input_c);
                if target.lat.unsigned_abs() > 900_000_000 || target.lon.unsigned_abs() > 1_800_000_000 {
                    debug!("mount: MOUNT_CONTROL location out of range");
                    return;
                }
                self.set_roi_target_for(primary, target);
            }
            _ => {}
        }
    }

    fn configure(&mut self, instance: u8, mode: MountMode, stab: [Option<bool>; 3]) {
        self.set_mode_for(instance, mode);
        if let Some(i) = self.instance_mut(instance) {
            let [roll, tilt, pan] = stab;
            if let Some(v) = roll {
                i.config.stab_roll = v;
            }
            if let Some(v) = tilt {
                i.config.stab_tilt = v;
            }
            if let Some(v) = pan {
                i.config.stab_pan = v;
            }
        }
    }

    fn handle_global_position_int(&mut self, sysid: u8, data: &GLOBAL_POSITION_INT_DATA) {
        let location = Location::new(data.lat, data.lon, data.alt / 10);
        for i in self.live_instances_mut() {
            if i.state.update_sysid_location(sysid, location) {
                debug!("mount: sysid {} at {:?}", sysid, location);
            }
        }
    }

    // param1 mode, param2..4 stabilise roll/pitch/yaw
    fn handle_command_do_mount_configure(&mut self, packet: &COMMAND_LONG_DATA) -> MavResult {
        let primary = self.primary();
        if !self.is_live(primary) {
            return MavResult::MAV_RESULT_UNSUPPORTED;
        }
        let Some(mode) = MountMode::from_param(packet.param1) else {
            return MavResult::MAV_RESULT_FAILED;
        };
        let stab = [packet.param2, packet.param3, packet.param4].map(flag_param);
        self.configure(primary, mode, stab);
        MavResult::MAV_RESULT_ACCEPTED
    }

    // param1 pitch, param2 roll, param3 yaw (deg); param4 alt (m), param5
    // lat, param6 lon (deg); param7 mode selecting which fields apply
    fn handle_command_do_mount_control(&mut self, packet: &COMMAND_LONG_DATA) -> MavResult {
        let primary = self.primary();
        if !self.is_live(primary) {
            return MavResult::MAV_RESULT_UNSUPPORTED;
        }
        let Some(mode) = MountMode::from_param(packet.param7) else {
            return MavResult::MAV_RESULT_FAILED;
        };
        match mode {
            MountMode::MavlinkTargeting => {
                let (roll, tilt, pan) = (packet.param2, packet.param1, packet.param3);
                if !(roll.is_finite() && tilt.is_finite() && pan.is_finite()) {
                    return MavResult::MAV_RESULT_FAILED;
                }
                self.set_angle_targets_for(primary, roll, tilt, pan);
            }
            MountMode::GpsPoint => {
                let Some(target) = Location::from_degrees(
                    packet.param5 as f64,
                    packet.param6 as f64,
                    packet.param4 as f64,
                ) else {
                    return MavResult::MAV_RESULT_FAILED;
                };
                self.set_roi_target_for(primary, target);
            }
            _ => {}
        }
        self.set_mode_for(primary, mode);
        MavResult::MAV_RESULT_ACCEPTED
    }

    // param1 pitch, param2 yaw (deg); param3/4 rates (unused); param5
    // manager flags; param7 gimbal device id (0 = primary)
    fn handle_command_do_gimbal_manager_pitchyaw(&mut self, packet: &COMMAND_LONG_DATA) -> MavResult {
        let Some(instance) = self.instance_from_gimbal_device_id(packet.param7) else {
            return MavResult::MAV_RESULT_UNSUPPORTED;
        };
        if !self.is_live(instance) {
            return MavResult::MAV_RESULT_UNSUPPORTED;
        }

        let flags = if packet.param5.is_finite() && packet.param5 >= 0.0 {
            packet.param5 as u32
        } else {
            0
        };
        if flags & GIMBAL_MANAGER_FLAGS_RETRACT != 0 {
            self.set_mode_for(instance, MountMode::Retract);
            return MavResult::MAV_RESULT_ACCEPTED;
        }
        if flags & GIMBAL_MANAGER_FLAGS_NEUTRAL != 0 {
            self.set_mode_for(instance, MountMode::Neutral);
            return MavResult::MAV_RESULT_ACCEPTED;
        }

        let (pitch, yaw) = (packet.param1, packet.param2);
        if !(pitch.is_finite() && yaw.is_finite()) {
            return MavResult::MAV_RESULT_FAILED;
        }
        let roll = self
            .state_for(instance)
            .map(|s| s.angle_target().roll)
            .unwrap_or(0.0);
        self.set_angle_targets_for(instance, roll, pitch, yaw);
        self.set_yaw_lock_for(instance, flags & GIMBAL_MANAGER_FLAGS_YAW_LOCK != 0);
        self.set_mode_for(instance, MountMode::MavlinkTargeting);
        MavResult::MAV_RESULT_ACCEPTED
    }

    fn instance_from_gimbal_device_id(&self, param: f32) -> Option<u8> {
        if !param.is_finite() || param < 0.0 || param.fract() != 0.0 {
            return None;
        }
        match param as usize {
            0 => Some(self.primary()),
            id if id <= MAX_INSTANCES => Some((id - 1) as u8),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FrontendConfig, MountConfig, MountType};
    use mavlink::ardupilotmega::MavMountMode;

    fn mount(types: &[MountType]) -> Mount {
        let cfgs = types.iter().map(|t| MountConfig::new(*t)).collect();
        let mut m = Mount::new(FrontendConfig::with_mounts(cfgs));
        m.init();
        m
    }

    fn cmd(command: MavCmd, p: [f32; 7]) -> COMMAND_LONG_DATA {
        COMMAND_LONG_DATA {
            target_system: 1,
            target_component: 1,
            command,
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        }
    }

    #[test]
    #[allow(deprecated)]
    fn configure_sets_mode_and_stabilisation() {
        let mut m = mount(&[MountType::Servo]);
        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_MOUNT_CONFIGURE,
            [MountMode::Neutral.as_u8() as f32, 1.0, 1.0, f32::NAN, 0.0, 0.0, 0.0],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_ACCEPTED);
        assert_eq!(m.mode(), MountMode::Neutral);
        let c = m.config_for(0).unwrap();
        assert!(c.stab_roll && c.stab_tilt && !c.stab_pan);
    }

    #[test]
    #[allow(deprecated)]
    fn malformed_configure_fails_without_mutation() {
        let mut m = mount(&[MountType::Servo]);
        let before = m.state_for(0).cloned();
        let r = m.handle_command_long(&cmd(MavCmd::MAV_CMD_DO_MOUNT_CONFIGURE, [42.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(r, MavResult::MAV_RESULT_FAILED);
        assert_eq!(m.state_for(0).cloned(), before);
    }

    #[test]
    #[allow(deprecated)]
    fn commands_without_instance_are_unsupported() {
        let mut m = mount(&[]);
        let r = m.handle_command_long(&cmd(MavCmd::MAV_CMD_DO_MOUNT_CONTROL, [0.0; 7]));
        assert_eq!(r, MavResult::MAV_RESULT_UNSUPPORTED);
        let r = m.handle_command_long(&cmd(MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW, [0.0; 7]));
        assert_eq!(r, MavResult::MAV_RESULT_UNSUPPORTED);
        let mut m = mount(&[MountType::Servo]);
        let r = m.handle_command_long(&cmd(MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH, [0.0; 7]));
        assert_eq!(r, MavResult::MAV_RESULT_UNSUPPORTED);
    }

    #[test]
    #[allow(deprecated)]
    fn control_routes_by_sub_mode() {
        let mut m = mount(&[MountType::Servo]);
        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_MOUNT_CONTROL,
            [-30.0, 5.0, 90.0, 0.0, 0.0, 0.0, MountMode::MavlinkTargeting.as_u8() as f32],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_ACCEPTED);
        let st = m.state_for(0).unwrap();
        assert_eq!(st.mode(), MountMode::MavlinkTargeting);
        assert_eq!(st.angle_target().tilt, -30.0);
        assert_eq!(st.angle_target().roll, 5.0);
        assert_eq!(st.angle_target().pan, 90.0);

        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_MOUNT_CONTROL,
            [0.0, 0.0, 0.0, 100.0, -35.36, 149.16, MountMode::GpsPoint.as_u8() as f32],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_ACCEPTED);
        let st = m.state_for(0).unwrap();
        assert_eq!(st.mode(), MountMode::GpsPoint);
        let roi = st.roi_target().unwrap();
        assert_eq!(roi.alt_cm, 10_000);
        assert!((roi.lat_deg() + 35.36).abs() < 1e-5);

        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_MOUNT_CONTROL,
            [0.0, 0.0, 0.0, 0.0, 95.0, 0.0, MountMode::GpsPoint.as_u8() as f32],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_FAILED);
    }

    #[test]
    fn mount_configure_message_sets_mode_and_flags() {
        let mut m = mount(&[MountType::Servo]);
        let header = MavHeader { system_id: 255, component_id: 190, sequence: 0 };
        let msg = MavMessage::MOUNT_CONFIGURE(MOUNT_CONFIGURE_DATA {
            mount_mode: MavMountMode::MAV_MOUNT_MODE_GPS_POINT,
            stab_roll: 0,
            stab_pitch: 1,
            stab_yaw: 0,
            ..Default::default()
        });
        m.handle_message(Channel(0), &header, &msg);
        assert_eq!(m.mode(), MountMode::GpsPoint);
        let c = m.config_for(0).unwrap();
        assert!(!c.stab_roll && c.stab_tilt && !c.stab_pan);
    }

    #[test]
    fn mount_control_message_follows_current_mode() {
        let mut m = mount(&[MountType::Servo]);
        let header = MavHeader { system_id: 255, component_id: 190, sequence: 0 };
        let control = |a, b, c| {
            MavMessage::MOUNT_CONTROL(MOUNT_CONTROL_DATA {
                input_a: a,
                input_b: b,
                input_c: c,
                ..Default::default()
            })
        };

        // RcTargeting ignores the inputs.
        let before = m.state_for(0).cloned();
        m.handle_message(Channel(0), &header, &control(-3000, 500, 9000));
        assert_eq!(m.state_for(0).cloned(), before);

        m.set_mode(MountMode::MavlinkTargeting);
        m.handle_message(Channel(0), &header, &control(-3000, 500, 9000));
        let t = m.state_for(0).unwrap().angle_target();
        assert_eq!((t.roll, t.tilt, t.pan), (5.0, -30.0, 90.0));

        m.set_mode(MountMode::GpsPoint);
        m.handle_message(Channel(0), &header, &control(-353_600_000, 1_491_600_000, 12_000));
        assert_eq!(
            m.state_for(0).unwrap().roi_target(),
            Some(Location::new(-353_600_000, 1_491_600_000, 12_000))
        );
        assert_eq!(m.mode(), MountMode::GpsPoint);
    }

    #[test]
    fn pitchyaw_addresses_instances_and_honours_flags() {
        let mut m = mount(&[MountType::Servo, MountType::Servo]);
        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW,
            [-20.0, 45.0, f32::NAN, f32::NAN, GIMBAL_MANAGER_FLAGS_YAW_LOCK as f32, 0.0, 2.0],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_ACCEPTED);
        let st = m.state_for(1).unwrap();
        assert_eq!(st.mode(), MountMode::MavlinkTargeting);
        assert!(st.yaw_lock());
        assert_eq!(st.angle_target().tilt, -20.0);
        assert_eq!(m.mode_for(0), MountMode::RcTargeting);

        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW,
            [f32::NAN, f32::NAN, 0.0, 0.0, GIMBAL_MANAGER_FLAGS_RETRACT as f32, 0.0, 1.0],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_ACCEPTED);
        assert_eq!(m.mode_for(0), MountMode::Retract);

        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW,
            [f32::NAN, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_FAILED);

        let r = m.handle_command_long(&cmd(
            MavCmd::MAV_CMD_DO_GIMBAL_MANAGER_PITCHYAW,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 9.0],
        ));
        assert_eq!(r, MavResult::MAV_RESULT_UNSUPPORTED);
    }
}
