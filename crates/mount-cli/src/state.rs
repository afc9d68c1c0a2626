use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub last_heartbeat: Option<Instant>,
    pub rx_count: u64,
    pub commands: u64,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}
