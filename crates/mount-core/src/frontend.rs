//! Instance registry and dispatcher.
//!
//! Every operation comes in an instance-qualified form (`*_for`) and a form
//! addressed to the primary instance. Calls naming an unknown or empty slot
//! are silent: mutators do nothing, accessors return a sentinel. The control
//! loop must never fault on a mount problem.

use mavlink::ardupilotmega::MavMessage;
use tracing::{debug, info, warn};

use crate::backend::{BackendContext, MountBackend, PreArmFailure, VehicleState};
use crate::config::{FrontendConfig, MountConfig, MountType};
use crate::gimbal::GimbalBackend;
use crate::location::Location;
use crate::mode::MountMode;
use crate::servo::ServoBackend;
use crate::state::{MountAngles, MountState};
use mount_proto::{Channel, MountStatus};

pub const MAX_INSTANCES: usize = 2;

/// Longest pre-arm diagnostic, in bytes.
pub const PREARM_MSG_MAX: usize = 50;

/// Receives outbound MOUNT status records.
pub trait StatusSink {
    fn send_mount_status(&mut self, chan: Channel, status: MountStatus);
}

impl StatusSink for Vec<(Channel, MountStatus)> {
    fn send_mount_status(&mut self, chan: Channel, status: MountStatus) {
        self.push((chan, status));
    }
}

pub(crate) struct MountInstance {
    pub(crate) config: MountConfig,
    pub(crate) state: MountState,
    pub(crate) backend: Box<dyn MountBackend>,
}

/// Built-in drivers. Vendor serial and MAVLink v1 gimbals have no driver
/// here; hosts supply them through [`Mount::init_with`].
pub fn default_backend(mount_type: MountType, _config: &MountConfig) -> Option<Box<dyn MountBackend>> {
    match mount_type {
        MountType::Servo => Some(Box::new(ServoBackend::new())),
        MountType::Gremsy => Some(Box::new(GimbalBackend::new())),
        MountType::None
        | MountType::SoloGimbal
        | MountType::Alexmos
        | MountType::Storm32
        | MountType::Storm32Serial => None,
    }
}

pub struct Mount {
    config: FrontendConfig,
    instances: Vec<Option<MountInstance>>,
    primary: u8,
}

impl Mount {
    pub fn new(config: FrontendConfig) -> Self {
        let primary = config.primary;
        Self {
            config,
            instances: Vec::new(),
            primary,
        }
    }

    /// Creates instances with the built-in drivers. Call once.
    pub fn init(&mut self) {
        self.init_with(default_backend)
    }

    /// Creates one instance per configured slot whose type the factory
    /// can build. Slots it declines stay empty.
    pub fn init_with<F>(&mut self, mut factory: F)
    where
        F: FnMut(MountType, &MountConfig) -> Option<Box<dyn MountBackend>>,
    {
        self.instances.clear();
        if !self.config.rc_rate_max.is_finite() || self.config.rc_rate_max < 0.0 {
            warn!("mount: rc_rate_max {} invalid, using angle control", self.config.rc_rate_max);
            self.config.rc_rate_max = 0.0;
        }
        for (slot, config) in self.config.mounts.iter().take(MAX_INSTANCES).enumerate() {
            if let Err(e) = config.validate(slot) {
                warn!("mount[{}]: skipped: {}", slot, e);
                self.instances.push(None);
                continue;
            }
            let backend = match config.mount_type {
                MountType::None => None,
                ty => factory(ty, config),
            };
            let Some(backend) = backend else {
                debug!("mount[{}]: type {:?} not instantiated", slot, config.mount_type);
                self.instances.push(None);
                continue;
            };
            info!(
                "mount[{}]: {:?} backend, default mode {:?}",
                slot, config.mount_type, config.default_mode
            );
            self.instances.push(Some(MountInstance {
                config: config.clone(),
                state: MountState::new(config.default_mode),
                backend,
            }));
        }
        // Trailing empty slots do not count as instances.
        while matches!(self.instances.last(), Some(None)) {
            self.instances.pop();
        }

        if self.instance(self.primary).is_none() {
            let fallback = self.instances.iter().position(|i| i.is_some());
            if let Some(idx) = fallback {
                warn!("mount: primary {} not available, using {}", self.primary, idx);
                self.primary = idx as u8;
            }
        }
    }

    /// Number of slots up to and including the last live instance.
    pub fn num_instances(&self) -> u8 {
        self.instances.len() as u8
    }

    pub fn primary(&self) -> u8 {
        self.primary
    }

    pub fn rc_rate_max(&self) -> f32 {
        self.config.rc_rate_max
    }

    pub(crate) fn instance(&self, instance: u8) -> Option<&MountInstance> {
        self.instances.get(instance as usize)?.as_ref()
    }

    pub(crate) fn instance_mut(&mut self, instance: u8) -> Option<&mut MountInstance> {
        self.instances.get_mut(instance as usize)?.as_mut()
    }

    pub(crate) fn live_instances_mut(&mut self) -> impl Iterator<Item = &mut MountInstance> {
        self.instances.iter_mut().flatten()
    }

    pub fn is_live(&self, instance: u8) -> bool {
        self.instance(instance).is_some()
    }

    pub fn state_for(&self, instance: u8) -> Option<&MountState> {
        self.instance(instance).map(|i| &i.state)
    }

    pub fn config_for(&self, instance: u8) -> Option<&MountConfig> {
        self.instance(instance).map(|i| &i.config)
    }

    // ---- accessors ----

    /// `MountType::None` for unknown instances.
    pub fn mount_type_for(&self, instance: u8) -> MountType {
        self.instance(instance)
            .map(|i| i.backend.mount_type())
            .unwrap_or(MountType::None)
    }

    pub fn mount_type(&self) -> MountType {
        self.mount_type_for(self.primary)
    }

    pub fn has_pan_control_for(&self, instance: u8) -> bool {
        self.instance(instance)
            .map(|i| i.backend.has_pan_control(&i.config))
            .unwrap_or(false)
    }

    pub fn has_pan_control(&self) -> bool {
        self.has_pan_control_for(self.primary)
    }

    /// `MountMode::Retract` for unknown instances.
    pub fn mode_for(&self, instance: u8) -> MountMode {
        self.instance(instance)
            .map(|i| i.state.mode())
            .unwrap_or(MountMode::Retract)
    }

    pub fn mode(&self) -> MountMode {
        self.mode_for(self.primary)
    }

    /// Current orientation in degrees, zero for unknown instances.
    pub fn orientation_for(&self, instance: u8) -> MountAngles {
        self.instance(instance)
            .map(|i| i.backend.orientation())
            .unwrap_or_default()
    }

    // ---- mutators ----

    pub fn set_mode_for(&mut self, instance: u8, mode: MountMode) {
        if let Some(i) = self.instance_mut(instance) {
            if i.state.mode() != mode {
                debug!("mount[{}]: mode {:?} -> {:?}", instance, i.state.mode(), mode);
            }
            i.backend.set_mode(&mut i.state, mode);
        }
    }

    pub fn set_mode(&mut self, mode: MountMode) {
        self.set_mode_for(self.primary, mode)
    }

    /// Restores the configured default mode. Constant time, no I/O.
    pub fn set_mode_to_default_for(&mut self, instance: u8) {
        if let Some(i) = self.instance_mut(instance) {
            let mode = i.config.default_mode;
            i.backend.set_mode(&mut i.state, mode);
        }
    }

    pub fn set_mode_to_default(&mut self) {
        self.set_mode_to_default_for(self.primary)
    }

    pub fn set_yaw_lock_for(&mut self, instance: u8, yaw_lock: bool) {
        if let Some(i) = self.instance_mut(instance) {
            i.state.set_yaw_lock(yaw_lock);
        }
    }

    pub fn set_yaw_lock(&mut self, yaw_lock: bool) {
        self.set_yaw_lock_for(self.primary, yaw_lock)
    }

    /// Records a fixed-angle target in degrees. The mode is left alone;
    /// the target is acted on in `MavlinkTargeting`. Non-finite components
    /// keep their previous value.
    pub fn set_angle_targets_for(&mut self, instance: u8, roll: f32, tilt: f32, pan: f32) {
        if let Some(i) = self.instance_mut(instance) {
            let old = i.state.angle_target();
            let keep = |new: f32, old: f32| if new.is_finite() { new } else { old };
            let target = MountAngles::new(keep(roll, old.roll), keep(tilt, old.tilt), keep(pan, old.pan));
            i.backend.set_angle_targets(&mut i.state, target);
        }
    }

    pub fn set_angle_targets(&mut self, roll: f32, tilt: f32, pan: f32) {
        self.set_angle_targets_for(self.primary, roll, tilt, pan)
    }

    pub fn set_roi_target_for(&mut self, instance: u8, target: Location) {
        if let Some(i) = self.instance_mut(instance) {
            i.backend.set_roi_target(&mut i.state, target);
        }
    }

    pub fn set_roi_target(&mut self, target: Location) {
        self.set_roi_target_for(self.primary, target)
    }

    /// Starts tracking `sysid`. Its location stays absent until a position
    /// report from that system arrives.
    pub fn set_target_sysid_for(&mut self, instance: u8, sysid: u8) {
        if let Some(i) = self.instance_mut(instance) {
            i.backend.set_target_sysid(&mut i.state, sysid);
        }
    }

    pub fn set_target_sysid(&mut self, sysid: u8) {
        self.set_target_sysid_for(self.primary, sysid)
    }

    // ---- scheduling ----

    /// Normal-rate tick (10 Hz or faster): mode servicing and outputs.
    pub fn update(&mut self, vehicle: &VehicleState) {
        let rate = self.config.rc_rate_max;
        for i in self.live_instances_mut() {
            let MountInstance { config, state, backend } = i;
            backend.update(&BackendContext { config, state, vehicle, rc_rate_max: rate });
        }
    }

    /// Control-loop tick for attitude-driven stabilisation.
    pub fn update_fast(&mut self, vehicle: &VehicleState) {
        let rate = self.config.rc_rate_max;
        for i in self.live_instances_mut() {
            let MountInstance { config, state, backend } = i;
            backend.update_fast(&BackendContext { config, state, vehicle, rc_rate_max: rate });
        }
    }

    /// Emits one status record per live instance.
    pub fn send_mount_status(&self, chan: Channel, sink: &mut impl StatusSink) {
        for (idx, inst) in self.instances.iter().enumerate() {
            let Some(inst) = inst else { continue };
            let o = inst.backend.orientation();
            sink.send_mount_status(
                chan,
                MountStatus {
                    instance: idx as u8,
                    mode: inst.state.mode().as_u8(),
                    roll: o.roll,
                    tilt: o.tilt,
                    pan: o.pan,
                },
            );
        }
    }

    /// Fails with the first instance that is not ready. Passes when there
    /// are no instances.
    pub fn pre_arm_checks(&self) -> Result<(), PreArmFailure> {
        for inst in self.instances.iter().flatten() {
            if let Err(mut failure) = inst.backend.pre_arm_check() {
                truncate_utf8(&mut failure.0, PREARM_MSG_MAX);
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Takes every message the backends have queued for transmission.
    pub fn drain_outbound(&mut self) -> Vec<(Channel, MavMessage)> {
        let mut out = Vec::new();
        for i in self.live_instances_mut() {
            i.backend.drain_outbound(&mut out);
        }
        out
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
