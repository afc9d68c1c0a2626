//! MAVLink gimbal-device (protocol v2) backend.
//!
//! The device is discovered from its own traffic: the first
//! GIMBAL_DEVICE_INFORMATION or GIMBAL_DEVICE_ATTITUDE_STATUS seen fixes
//! the channel, system id and component id this backend listens to.
//! Until the device information arrives it is re-requested once a second.

use std::collections::BTreeMap;

use mavlink::ardupilotmega::{
    MavCmd, MavMessage, COMMAND_LONG_DATA, GIMBAL_DEVICE_SET_ATTITUDE_DATA, PARAM_VALUE_DATA,
};
use mavlink::MavHeader;
use tracing::{debug, info};

use crate::backend::{wrap_180, BackendContext, MountBackend, MountTarget, PreArmFailure};
use crate::config::{MountConfig, MountType};
use crate::mode::MountMode;
use crate::state::MountAngles;
use mount_proto::Channel;

const MSG_ID_GIMBAL_DEVICE_INFORMATION: f32 = 283.0;
const INFO_REQUEST_INTERVAL_MS: u32 = 1000;
const ATTITUDE_TIMEOUT_MS: u32 = 1000;
const MAX_OUTBOUND: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceLink {
    chan: Channel,
    sysid: u8,
    compid: u8,
}

#[derive(Debug, Default)]
pub struct GimbalBackend {
    link: Option<DeviceLink>,
    found: bool,
    attitude: MountAngles,
    last_attitude_ms: Option<u32>,
    now_ms: u32,
    target: MountTarget,
    last_info_request_ms: Option<u32>,
    params: BTreeMap<String, f32>,
    outbox: Vec<(Channel, MavMessage)>,
}

impl GimbalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the device has answered with its information message.
    pub fn found(&self) -> bool {
        self.found
    }

    /// Parameter value reported by the device, if received.
    pub fn device_param(&self, name: &str) -> Option<f32> {
        self.params.get(name).copied()
    }

    fn from_device(&self, header: &MavHeader) -> bool {
        match self.link {
            Some(l) => l.sysid == header.system_id && l.compid == header.component_id,
            None => false,
        }
    }

    fn latch(&mut self, chan: Channel, header: &MavHeader) -> bool {
        match self.link {
            Some(_) => self.from_device(header),
            None => {
                info!(
                    "gimbal: device found sysid={} compid={} chan={:?}",
                    header.system_id, header.component_id, chan
                );
                self.link = Some(DeviceLink {
                    chan,
                    sysid: header.system_id,
                    compid: header.component_id,
                });
                true
            }
        }
    }

    fn queue(&mut self, chan: Channel, msg: MavMessage) {
        if self.outbox.len() >= MAX_OUTBOUND {
            self.outbox.remove(0);
        }
        self.outbox.push((chan, msg));
    }

    fn request_device_information(&mut self) {
        let (chan, sysid, compid) = match self.link {
            Some(l) => (l.chan, l.sysid, l.compid),
            None => (Channel::default(), 0, 0),
        };
        let cmd = COMMAND_LONG_DATA {
            target_system: sysid,
            target_component: compid,
            command: MavCmd::MAV_CMD_REQUEST_MESSAGE,
            confirmation: 0,
            param1: MSG_ID_GIMBAL_DEVICE_INFORMATION,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        };
        debug!("gimbal: requesting device information");
        self.queue(chan, MavMessage::COMMAND_LONG(cmd));
    }

    fn send_target(&mut self, cx: &BackendContext<'_>) {
        let Some(link) = self.link else { return };
        let mut angles = cx.config.constrain(self.target.angles);
        if self.target.yaw_is_ef {
            angles.pan = wrap_180(angles.pan - cx.vehicle.attitude.yaw.to_degrees());
        }
        let msg = GIMBAL_DEVICE_SET_ATTITUDE_DATA {
            target_system: link.sysid,
            target_component: link.compid,
            q: euler_to_quaternion(angles),
            angular_velocity_x: f32::NAN,
            angular_velocity_y: f32::NAN,
            angular_velocity_z: f32::NAN,
            ..Default::default()
        };
        self.queue(link.chan, MavMessage::GIMBAL_DEVICE_SET_ATTITUDE(msg));
    }
}

impl MountBackend for GimbalBackend {
    fn mount_type(&self) -> MountType {
        MountType::Gremsy
    }

    fn has_pan_control(&self, config: &MountConfig) -> bool {
        self.found && config.has_pan_range()
    }

    fn update(&mut self, cx: &BackendContext<'_>) {
        self.now_ms = cx.vehicle.now_ms;

        if !self.found {
            let due = match self.last_info_request_ms {
                Some(t) => self.now_ms.wrapping_sub(t) >= INFO_REQUEST_INTERVAL_MS,
                None => true,
            };
            if due {
                self.last_info_request_ms = Some(self.now_ms);
                self.request_device_information();
            }
            return;
        }

        let target = match cx.state.mode() {
            MountMode::Retract => Some(MountTarget::body(cx.config.retract())),
            MountMode::Neutral => Some(MountTarget::body(cx.config.neutral())),
            MountMode::MavlinkTargeting => Some(MountTarget {
                angles: cx.state.angle_target(),
                yaw_is_ef: cx.state.yaw_lock(),
            }),
            // The device reads the pilot sticks itself; hold the last demand.
            MountMode::RcTargeting => None,
            MountMode::GpsPoint | MountMode::SysidTarget | MountMode::HomeLocation => {
                cx.location_target()
            }
        };
        if let Some(t) = target {
            self.target = t;
        }
        self.send_target(cx);
    }

    fn pre_arm_check(&self) -> Result<(), PreArmFailure> {
        if !self.found {
            return Err(PreArmFailure::new("not found"));
        }
        let fresh = self
            .last_attitude_ms
            .map(|t| self.now_ms.wrapping_sub(t) <= ATTITUDE_TIMEOUT_MS)
            .unwrap_or(false);
        if !fresh {
            return Err(PreArmFailure::new("not healthy"));
        }
        Ok(())
    }

    fn orientation(&self) -> MountAngles {
        self.attitude
    }

    fn claims_gimbal_device(&self, header: &MavHeader) -> bool {
        self.from_device(header)
    }

    fn handle_gimbal_device_message(&mut self, chan: Channel, header: &MavHeader, msg: &MavMessage) -> bool {
        match msg {
            MavMessage::GIMBAL_DEVICE_INFORMATION(_) => {
                if !self.latch(chan, header) {
                    return false;
                }
                self.found = true;
            }
            MavMessage::GIMBAL_DEVICE_ATTITUDE_STATUS(status) => {
                if !self.latch(chan, header) {
                    return false;
                }
                self.attitude = quaternion_to_euler(status.q);
                self.last_attitude_ms = Some(self.now_ms);
            }
            _ => return false,
        }
        true
    }

    fn handle_param_value(&mut self, header: &MavHeader, param: &PARAM_VALUE_DATA) {
        if !self.from_device(header) {
            return;
        }
        let name = decode_param_id(&param.param_id[..]);
        debug!("gimbal: param {}={}", name, param.param_value);
        self.params.insert(name, param.param_value);
    }

    fn drain_outbound(&mut self, out: &mut Vec<(Channel, MavMessage)>) {
        out.append(&mut self.outbox);
    }
}

fn decode_param_id<C: Copy + Into<char>>(raw: &[C]) -> String {
    raw.iter()
        .map(|&c| c.into())
        .take_while(|c: &char| *c != '\0')
        .collect()
}

/// Degrees roll/tilt/pan to a MAVLink (w, x, y, z) quaternion.
fn euler_to_quaternion(a: MountAngles) -> [f32; 4] {
    let (sr, cr) = (a.roll.to_radians() * 0.5).sin_cos();
    let (sp, cp) = (a.tilt.to_radians() * 0.5).sin_cos();
    let (sy, cy) = (a.pan.to_radians() * 0.5).sin_cos();
    [
        cr * cp * cy + sr * sp * sy,
        sr * cp * cy - cr * sp * sy,
        cr * sp * cy + sr * cp * sy,
        cr * cp * sy - sr * sp * cy,
    ]
}

fn quaternion_to_euler(q: [f32; 4]) -> MountAngles {
    let [w, x, y, z] = q;
    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
    MountAngles::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VehicleState;
    use crate::state::MountState;
    use mavlink::ardupilotmega::{GIMBAL_DEVICE_ATTITUDE_STATUS_DATA, GIMBAL_DEVICE_INFORMATION_DATA};

    fn header(sysid: u8, compid: u8) -> MavHeader {
        MavHeader { system_id: sysid, component_id: compid, sequence: 0 }
    }

    fn attitude(q: [f32; 4]) -> MavMessage {
        MavMessage::GIMBAL_DEVICE_ATTITUDE_STATUS(GIMBAL_DEVICE_ATTITUDE_STATUS_DATA {
            q,
            ..Default::default()
        })
    }

    fn tick(g: &mut GimbalBackend, state: &MountState, now_ms: u32) {
        let config = MountConfig::new(MountType::Gremsy);
        let vehicle = VehicleState { now_ms, ..Default::default() };
        g.update(&BackendContext { config: &config, state, vehicle: &vehicle, rc_rate_max: 0.0 });
    }

    #[test]
    fn quaternion_conversion_round_trips() {
        let a = MountAngles::new(5.0, -30.0, 60.0);
        let b = quaternion_to_euler(euler_to_quaternion(a));
        assert!((a.roll - b.roll).abs() < 1e-3);
        assert!((a.tilt - b.tilt).abs() < 1e-3);
        assert!((a.pan - b.pan).abs() < 1e-3);
    }

    #[test]
    fn requests_information_until_found() {
        let mut g = GimbalBackend::new();
        let state = MountState::new(MountMode::Neutral);
        let mut out = Vec::new();

        tick(&mut g, &state, 0);
        tick(&mut g, &state, 500);
        g.drain_outbound(&mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0].1, MavMessage::COMMAND_LONG(c) if c.command == MavCmd::MAV_CMD_REQUEST_MESSAGE));
        assert_eq!(g.pre_arm_check(), Err(PreArmFailure::new("not found")));

        g.handle_gimbal_device_message(
            Channel(1),
            &header(1, 154),
            &MavMessage::GIMBAL_DEVICE_INFORMATION(GIMBAL_DEVICE_INFORMATION_DATA::default()),
        );
        assert!(g.found());

        out.clear();
        tick(&mut g, &state, 2000);
        g.drain_outbound(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, Channel(1));
        assert!(matches!(&out[0].1, MavMessage::GIMBAL_DEVICE_SET_ATTITUDE(_)));
    }

    #[test]
    fn health_follows_attitude_reports_from_own_device() {
        let mut g = GimbalBackend::new();
        let state = MountState::new(MountMode::Neutral);
        let info = MavMessage::GIMBAL_DEVICE_INFORMATION(GIMBAL_DEVICE_INFORMATION_DATA::default());
        g.handle_gimbal_device_message(Channel(0), &header(1, 154), &info);
        assert_eq!(g.pre_arm_check(), Err(PreArmFailure::new("not healthy")));

        tick(&mut g, &state, 100);
        g.handle_gimbal_device_message(Channel(0), &header(1, 154), &attitude(euler_to_quaternion(MountAngles::new(0.0, -45.0, 0.0))));
        assert!(g.pre_arm_check().is_ok());
        assert!((g.orientation().tilt + 45.0).abs() < 1e-3);

        // Another gimbal on the network is ignored.
        assert!(!g.handle_gimbal_device_message(Channel(0), &header(2, 154), &attitude([1.0, 0.0, 0.0, 0.0])));
        assert!((g.orientation().tilt + 45.0).abs() < 1e-3);

        tick(&mut g, &state, 1500);
        assert_eq!(g.pre_arm_check(), Err(PreArmFailure::new("not healthy")));
    }

    #[test]
    fn records_params_from_own_device_only() {
        let mut g = GimbalBackend::new();
        let info = MavMessage::GIMBAL_DEVICE_INFORMATION(GIMBAL_DEVICE_INFORMATION_DATA::default());
        g.handle_gimbal_device_message(Channel(0), &header(1, 154), &info);

        let mut p = PARAM_VALUE_DATA::default();
        for (dst, b) in p.param_id.iter_mut().zip(b"PITCH_MAX".iter()) {
            *dst = (*b).into();
        }
        p.param_value = 30.0;

        g.handle_param_value(&header(3, 1), &p);
        assert_eq!(g.device_param("PITCH_MAX"), None);
        g.handle_param_value(&header(1, 154), &p);
        assert_eq!(g.device_param("PITCH_MAX"), Some(30.0));
    }
}
