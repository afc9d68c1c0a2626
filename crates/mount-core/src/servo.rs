//! Servo-driven mount. Resolves the target for the current mode, then
//! converts it to body-frame servo angles, stabilising against vehicle
//! attitude on the fast tick.

use tracing::trace;

use crate::backend::{wrap_180, BackendContext, MountBackend, MountTarget};
use crate::config::{Axis, MountConfig, MountType};
use crate::mode::MountMode;
use crate::state::MountAngles;

#[derive(Debug, Default)]
pub struct ServoBackend {
    target: MountTarget,
    rc_angles: MountAngles,
    output: MountAngles,
    last_update_ms: Option<u32>,
}

impl ServoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earth- or body-frame demand currently being held.
    pub fn target(&self) -> MountTarget {
        self.target
    }

    fn rc_target(&mut self, cx: &BackendContext<'_>) -> MountTarget {
        let dt_s = match self.last_update_ms {
            Some(last) => cx.vehicle.now_ms.wrapping_sub(last) as f32 * 0.001,
            None => 0.0,
        };
        let cfg = cx.config;
        let axis_angle = |axis: Axis, current: f32| -> f32 {
            let Some(input) = cfg.rc_channel(axis).and_then(|ch| cx.vehicle.rc_input(ch)) else {
                return current;
            };
            let input = input.clamp(-1.0, 1.0);
            let (lo, hi) = cfg.limits_deg(axis);
            if cx.rc_rate_max > 0.0 {
                (current + input * cx.rc_rate_max * dt_s).clamp(lo, hi)
            } else {
                lo + (input + 1.0) * 0.5 * (hi - lo)
            }
        };
        let angles = MountAngles {
            roll: axis_angle(Axis::Roll, self.rc_angles.roll),
            tilt: axis_angle(Axis::Tilt, self.rc_angles.tilt),
            pan: axis_angle(Axis::Pan, self.rc_angles.pan),
        };
        self.rc_angles = angles;
        MountTarget { angles, yaw_is_ef: cx.state.yaw_lock() }
    }

    fn compute_output(&mut self, cx: &BackendContext<'_>) {
        let cfg = cx.config;
        let mut out = self.target.angles;

        if cx.state.mode() != MountMode::Retract {
            let att = &cx.vehicle.attitude;
            if self.target.yaw_is_ef || cfg.stab_pan {
                out.pan = wrap_180(out.pan - att.yaw.to_degrees());
            }
            if cfg.stab_roll {
                out.roll -= (att.roll + cfg.roll_stb_lead * cx.vehicle.gyro[0]).to_degrees();
            }
            if cfg.stab_tilt {
                out.tilt -= (att.pitch + cfg.pitch_stb_lead * cx.vehicle.gyro[1]).to_degrees();
            }
        }
        self.output = cfg.constrain(out);
    }
}

impl MountBackend for ServoBackend {
    fn mount_type(&self) -> MountType {
        MountType::Servo
    }

    fn has_pan_control(&self, config: &MountConfig) -> bool {
        config.has_pan_range()
    }

    fn update(&mut self, cx: &BackendContext<'_>) {
        let target = match cx.state.mode() {
            MountMode::Retract => Some(MountTarget::body(cx.config.retract())),
            MountMode::Neutral => Some(MountTarget::body(cx.config.neutral())),
            MountMode::MavlinkTargeting => Some(MountTarget {
                angles: cx.state.angle_target(),
                yaw_is_ef: cx.state.yaw_lock(),
            }),
            MountMode::RcTargeting => Some(self.rc_target(cx)),
            MountMode::GpsPoint | MountMode::SysidTarget | MountMode::HomeLocation => {
                cx.location_target()
            }
        };
        // No pointing data yet: keep the last demand.
        if let Some(t) = target {
            self.target = t;
        }
        self.last_update_ms = Some(cx.vehicle.now_ms);
        self.compute_output(cx);
        trace!("servo mount: mode={:?} output={:?}", cx.state.mode(), self.output);
    }

    fn update_fast(&mut self, cx: &BackendContext<'_>) {
        self.compute_output(cx);
    }

    fn orientation(&self) -> MountAngles {
        self.output
    }
}
