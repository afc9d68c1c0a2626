use serde::{Deserialize, Serialize};

/// Outbound link a message is addressed to (telemetry port, companion, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Channel(pub u8);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountStatus {
    pub instance: u8,
    // MAV_MOUNT_MODE numeric value
    pub mode: u8,
    // Degrees
    pub roll: f32,
    pub tilt: f32,
    pub pan: f32,
}
