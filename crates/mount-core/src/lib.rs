//! Frontend dispatcher and target model for camera/sensor mounts.
//!
//! A [`Mount`] owns up to [`MAX_INSTANCES`] mount devices, each a
//! [`MountConfig`] + [`MountState`] pair bound to a [`MountBackend`]
//! driver. The host control loop calls [`Mount::update_fast`] every
//! iteration and [`Mount::update`] at 10 Hz or faster; inbound MAVLink
//! traffic is fed through [`Mount::handle_command_long`] and
//! [`Mount::handle_message`].

pub mod backend;
pub mod config;
pub mod frontend;
pub mod gimbal;
mod handler;
pub mod location;
pub mod mode;
pub mod servo;
pub mod state;

pub use backend::{Attitude, BackendContext, MountBackend, MountTarget, PreArmFailure, VehicleState};
pub use config::{ConfigError, FrontendConfig, MountConfig, MountType};
pub use frontend::{Mount, StatusSink, MAX_INSTANCES, PREARM_MSG_MAX};
pub use location::Location;
pub use mode::MountMode;
pub use mount_proto::{Channel, MountStatus};
pub use state::{MountAngles, MountState};
