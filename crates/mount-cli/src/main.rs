mod link;
mod state;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mavlink::ardupilotmega::MavMessage;
use mavlink::MavHeader;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mount_core::backend::RC_CHANNELS;
use mount_core::{Attitude, Channel, FrontendConfig, Location, Mount, MountStatus, StatusSink, VehicleState};

use crate::link::MountLink;
use crate::state::LinkStatus;

#[derive(Debug, Parser)]
#[command(name = "mountctl", version, about = "Camera mount frontend")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialise the mounts and run pre-arm checks.
    Doctor,
    /// Print the effective configuration (after legacy migration) as JSON.
    Inspect,
    /// Drive the mounts from a live MAVLink link.
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    link: Option<LinkCfg>,
    #[serde(default)]
    schedule: ScheduleCfg,
}

#[derive(Debug, serde::Deserialize)]
struct LinkCfg {
    /// mavlink connection string, e.g. "udpin:0.0.0.0:14550"
    url: String,
    /// Our ids; 154 is MAV_COMP_ID_GIMBAL.
    sys_id: u8,
    comp_id: u8,
    /// System id of the vehicle whose position/attitude we follow.
    vehicle_sysid: Option<u8>,
    send_heartbeat_hz: Option<f32>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct ScheduleCfg {
    fast_hz: f32,
    update_hz: f32,
    /// Emit status every n-th update.
    status_every: u32,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self { fast_hz: 400.0, update_hz: 50.0, status_every: 5 }
    }
}

fn load_config(path: &str) -> Result<(Config, FrontendConfig)> {
    let s = std::fs::read_to_string(path).context("read config")?;
    let cli_cfg: Config = toml::from_str(&s).context("parse config toml")?;
    let mount_cfg = FrontendConfig::from_toml_str(&s).context("parse mount config")?;
    Ok((cli_cfg, mount_cfg))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let (cfg, mount_cfg) = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(mount_cfg),
        Command::Inspect => inspect(&mount_cfg),
        Command::Run => run(&cfg, mount_cfg).await,
    }
}

fn doctor(mount_cfg: FrontendConfig) -> Result<()> {
    info!("doctor: starting");
    let mut mount = Mount::new(mount_cfg);
    mount.init();

    for idx in 0..mount.num_instances() {
        if !mount.is_live(idx) {
            println!("mount[{}]: empty", idx);
            continue;
        }
        println!(
            "mount[{}]: type={:?} mode={:?} pan_control={}{}",
            idx,
            mount.mount_type_for(idx),
            mount.mode_for(idx),
            mount.has_pan_control_for(idx),
            if idx == mount.primary() { " (primary)" } else { "" },
        );
    }

    mount.pre_arm_checks().map_err(|e| anyhow::anyhow!("pre-arm: {}", e))?;
    info!("doctor: OK");
    Ok(())
}

fn inspect(mount_cfg: &FrontendConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(mount_cfg)?);
    Ok(())
}

/// Prints status records as JSON lines.
struct StdoutSink;

#[derive(serde::Serialize)]
struct StatusLine<'a> {
    ts_unix_ms: i64,
    chan: Channel,
    #[serde(flatten)]
    status: &'a MountStatus,
}

impl StatusSink for StdoutSink {
    fn send_mount_status(&mut self, chan: Channel, status: MountStatus) {
        let line = StatusLine {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            chan,
            status: &status,
        };
        match serde_json::to_string(&line) {
            Ok(s) => println!("{}", s),
            Err(e) => warn!("status encode failed: {}", e),
        }
    }
}

async fn run(cfg: &Config, mount_cfg: FrontendConfig) -> Result<()> {
    info!("run: starting");
    let link_cfg = cfg.link.as_ref().context("no [link] config section")?;
    let sched = &cfg.schedule;
    anyhow::ensure!(sched.fast_hz > 0.0, "schedule.fast_hz must be > 0");
    anyhow::ensure!(sched.update_hz >= 10.0, "schedule.update_hz must be >= 10");

    let mut mount = Mount::new(mount_cfg);
    mount.init();

    let mut link = MountLink::open(&link_cfg.url, link_cfg.sys_id, link_cfg.comp_id)?;
    let vehicle_sysid = link_cfg.vehicle_sysid.unwrap_or(1);
    let chan = Channel(0);

    let reader = link.reader();
    let mut rx = spawn_reader(move || reader.recv());

    let mut fast = tokio::time::interval(Duration::from_secs_f32(1.0 / sched.fast_hz));
    let mut normal = tokio::time::interval(Duration::from_secs_f32(1.0 / sched.update_hz));
    let hb_hz = link_cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
    let mut heartbeat = tokio::time::interval(Duration::from_secs_f32(1.0 / hb_hz));
    let mut report = tokio::time::interval(Duration::from_secs(10));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let started = Instant::now();
    let mut vehicle = VehicleState::default();
    let mut status = LinkStatus::default();
    let mut sink = StdoutSink;
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            Some((hdr, msg)) = rx.recv() => {
                status.connected = true;
                status.rx_count += 1;
                on_message(&mut mount, &mut link, &mut vehicle, &mut status, vehicle_sysid, chan, &hdr, &msg);
            }
            _ = fast.tick() => {
                vehicle.now_ms = started.elapsed().as_millis() as u32;
                mount.update_fast(&vehicle);
            }
            _ = normal.tick() => {
                vehicle.now_ms = started.elapsed().as_millis() as u32;
                mount.update(&vehicle);
                ticks = ticks.wrapping_add(1);
                if ticks % sched.status_every.max(1) == 0 {
                    mount.send_mount_status(chan, &mut sink);
                }
                for (_chan, msg) in mount.drain_outbound() {
                    if let Err(e) = link.send(msg) {
                        warn!("link send failed: {:#}", e);
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = link.send_heartbeat() {
                    warn!("heartbeat send failed: {:#}", e);
                }
            }
            _ = report.tick() => {
                info!(
                    "link: connected={} rx={} commands={} hb_age={:?}",
                    status.connected, status.rx_count, status.commands, status.hb_age()
                );
            }
            _ = &mut shutdown => {
                info!("run: shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Runs a blocking receive loop on its own thread and forwards what it reads.
/// The thread is detached: shutdown does not wait for a receive that may
/// never return on a quiet link.
fn spawn_reader<T, F>(mut recv: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnMut() -> Option<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<T>(64);
    std::thread::spawn(move || loop {
        match recv() {
            Some(m) => {
                if tx.blocking_send(m).is_err() {
                    break;
                }
            }
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    });
    rx
}

#[allow(clippy::too_many_arguments)]
fn on_message(
    mount: &mut Mount,
    link: &mut MountLink,
    vehicle: &mut VehicleState,
    status: &mut LinkStatus,
    vehicle_sysid: u8,
    chan: Channel,
    hdr: &MavHeader,
    msg: &MavMessage,
) {
    let from_vehicle = hdr.system_id == vehicle_sysid;
    match msg {
        MavMessage::HEARTBEAT(_) if from_vehicle => {
            status.last_heartbeat = Some(Instant::now());
        }
        MavMessage::COMMAND_LONG(cmd) if link.is_for_us(cmd) => {
            status.commands += 1;
            let result = mount.handle_command_long(cmd);
            if let Err(e) = link.send_ack(cmd, result) {
                warn!("ack send failed: {:#}", e);
            }
        }
        MavMessage::ATTITUDE(att) if from_vehicle => {
            vehicle.attitude = Attitude { roll: att.roll, pitch: att.pitch, yaw: att.yaw };
            vehicle.gyro = [att.rollspeed, att.pitchspeed, att.yawspeed];
        }
        MavMessage::GLOBAL_POSITION_INT(pos) if from_vehicle => {
            vehicle.location = Some(Location::new(pos.lat, pos.lon, pos.alt / 10));
        }
        MavMessage::HOME_POSITION(home) if from_vehicle => {
            vehicle.home = Some(Location::new(home.latitude, home.longitude, home.altitude / 10));
        }
        MavMessage::RC_CHANNELS(rc) if from_vehicle => {
            let raw = [
                rc.chan1_raw, rc.chan2_raw, rc.chan3_raw, rc.chan4_raw, rc.chan5_raw, rc.chan6_raw,
                rc.chan7_raw, rc.chan8_raw, rc.chan9_raw, rc.chan10_raw, rc.chan11_raw, rc.chan12_raw,
                rc.chan13_raw, rc.chan14_raw, rc.chan15_raw, rc.chan16_raw, rc.chan17_raw, rc.chan18_raw,
            ];
            let count = (rc.chancount as usize).min(RC_CHANNELS);
            for (i, pwm) in raw.iter().enumerate() {
                vehicle.rc_in[i] = if i < count { normalize_pwm(*pwm) } else { None };
            }
        }
        _ => {}
    }
    debug!("rx {}/{}", hdr.system_id, hdr.component_id);
    mount.handle_message(chan, hdr, msg);
}

/// PWM microseconds to [-1, 1]. 0 and 65535 mark unused channels.
fn normalize_pwm(pwm: u16) -> Option<f32> {
    if pwm == 0 || pwm == u16::MAX {
        return None;
    }
    Some(((pwm as f32 - 1500.0) / 500.0).clamp(-1.0, 1.0))
}
