use std::sync::Arc;

use anyhow::{Context, Result};
use mavlink::{
    ardupilotmega::{
        MavAutopilot, MavMessage, MavModeFlag, MavResult, MavState, MavType, COMMAND_ACK_DATA,
        COMMAND_LONG_DATA, HEARTBEAT_DATA,
    },
    MavConnection, MavHeader,
};
use tracing::{debug, info};

type Conn = Arc<Box<dyn MavConnection<MavMessage> + Send + Sync>>;

/// MAVLink link to the autopilot / GCS. Sending happens on the control
/// loop; receiving on a dedicated blocking reader.
pub struct MountLink {
    conn: Conn,
    hdr: MavHeader,
}

impl MountLink {
    pub fn open(url: &str, sys_id: u8, comp_id: u8) -> Result<Self> {
        let conn = mavlink::connect::<MavMessage>(url)
            .with_context(|| format!("mavlink connect {}", url))?;
        info!("link: connected {} as {}/{}", url, sys_id, comp_id);
        Ok(Self {
            conn: Arc::new(conn),
            hdr: MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 },
        })
    }

    pub fn reader(&self) -> LinkReader {
        LinkReader { conn: self.conn.clone() }
    }

    /// True if a COMMAND_LONG is addressed to us (or broadcast).
    pub fn is_for_us(&self, cmd: &COMMAND_LONG_DATA) -> bool {
        (cmd.target_system == 0 || cmd.target_system == self.hdr.system_id)
            && (cmd.target_component == 0 || cmd.target_component == self.hdr.component_id)
    }

    pub fn send_heartbeat(&mut self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GIMBAL,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    pub fn send_ack(&mut self, cmd: &COMMAND_LONG_DATA, result: MavResult) -> Result<()> {
        let ack = COMMAND_ACK_DATA {
            command: cmd.command,
            result,
            ..Default::default()
        };
        debug!("link: ack {:?} {:?}", cmd.command, result);
        self.send(MavMessage::COMMAND_ACK(ack))
    }

    pub fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn.send(&self.hdr, &msg).context("mavlink send")?;
        Ok(())
    }
}

pub struct LinkReader {
    conn: Conn,
}

impl LinkReader {
    /// Blocks until a message arrives. Returns `None` on a receive error.
    pub fn recv(&self) -> Option<(MavHeader, MavMessage)> {
        self.conn.recv().ok()
    }
}
