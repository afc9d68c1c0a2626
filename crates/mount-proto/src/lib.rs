pub mod status;

pub use status::{Channel, MountStatus};
