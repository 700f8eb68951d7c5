mod console;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use rover_link::devices::{is_rfcomm_port, scan_ports};
use rover_link::{doctor, DeviceId, DeviceRegistry, LinkManager, LinkPolicy, LinkStatus, PairedDevice, RfcommConnector};
use rover_proto::TelemetryRecord;

use console::ConsoleCmd;

#[derive(Debug, Parser)]
#[command(name = "rover", version, about = "Tesla2 rover remote link")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// List paired rovers and the serial ports the OS exposes.
    Devices,
    /// Open the link and drive from stdin.
    Drive {
        /// Connect to this device (address or name) on start.
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    link: LinkPolicy,
    #[serde(default)]
    devices: Vec<PairedDevice>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor_cmd(&cfg)?,
        Command::Devices => devices_cmd(&cfg)?,
        Command::Drive { device } => drive(&cfg, device).await?,
    }
    Ok(())
}

fn doctor_cmd(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    doctor::check_policy(&cfg.link)?;
    doctor::check_devices(&cfg.devices)?;
    if cfg.devices.is_empty() {
        warn!("doctor: no [[devices]] configured; drive will have nothing to connect to");
    }
    for d in &cfg.devices {
        if !std::path::Path::new(&d.port).exists() {
            warn!("doctor: {} port {} not present (rfcomm bind missing?)", d.id, d.port);
        }
    }
    info!("doctor: OK");
    Ok(())
}

fn devices_cmd(cfg: &Config) -> Result<()> {
    for d in &cfg.devices {
        println!("{}  {:<16} {} @ {}", d.id, d.name, d.port, d.baud);
    }
    match scan_ports() {
        Ok(ports) => {
            for p in ports.iter().filter(|p| is_rfcomm_port(p)) {
                let configured = cfg.devices.iter().any(|d| &d.port == p);
                println!("port {} {}", p, if configured { "(configured)" } else { "(unconfigured)" });
            }
        }
        Err(e) => warn!("port scan failed: {:#}", e),
    }
    Ok(())
}

fn resolve_device(registry: &DeviceRegistry, key: &str) -> DeviceId {
    registry.resolve(key).map(|d| d.id.clone()).unwrap_or_else(|| DeviceId::new(key))
}

async fn drive(cfg: &Config, device: Option<String>) -> Result<()> {
    doctor::check_policy(&cfg.link)?;
    let registry = DeviceRegistry::new(cfg.devices.clone());
    let mgr = LinkManager::spawn(RfcommConnector::new(registry.clone()), cfg.link.clone());
    let control = mgr.control();

    if let Some(d) = device {
        mgr.request_connect(resolve_device(&registry, &d))?;
    }

    let mut status = mgr.subscribe_status();
    let mut telemetry = mgr.subscribe_telemetry();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", console::HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                let cmd = match console::parse(&line) {
                    Ok(Some(cmd)) => cmd,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("? {:#}", e);
                        continue;
                    }
                };
                match cmd {
                    ConsoleCmd::Connect(d) => mgr.request_connect(resolve_device(&registry, &d))?,
                    ConsoleCmd::Disconnect => mgr.request_disconnect()?,
                    ConsoleCmd::Left(v) => control.set_left_stick(v),
                    ConsoleCmd::Right(v) => control.set_right_stick(v),
                    ConsoleCmd::Drive(v) => control.set_drive(v),
                    ConsoleCmd::Release => control.release_sticks(),
                    ConsoleCmd::Swap(on) => control.set_swapped(on),
                    ConsoleCmd::Sweep(on) => control.set_sweep(on),
                    ConsoleCmd::Dodge(on) => control.set_dodge_mode(on),
                    ConsoleCmd::Sound(on) => control.set_sound(on),
                    ConsoleCmd::Status => {
                        let st = mgr.status();
                        println!("status: {}", st);
                        if let Some(dev) = st.device().and_then(|id| registry.resolve(id.as_str())) {
                            println!("device: {} on {} @ {}", dev.name, dev.port, dev.baud);
                        }
                        println!("inputs: {:?}", control.inputs());
                        println!("command: {:?}", control.snapshot());
                    }
                    ConsoleCmd::Stats => println!("{:?}", mgr.stats()),
                    ConsoleCmd::Devices => {
                        for d in registry.devices() {
                            println!("{}  {}", d.id, d.name);
                        }
                    }
                    ConsoleCmd::Help => println!("{}", console::HELP),
                    ConsoleCmd::Quit => break,
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let st = status.borrow_and_update().clone();
                if let LinkStatus::Failed(e) = &st {
                    warn!("connection failed: {}", e);
                }
                println!("status: {}", st);
            }
            changed = telemetry.changed() => {
                if changed.is_err() {
                    break;
                }
                let rec = telemetry.borrow_and_update().clone();
                print_telemetry(&rec);
            }
        }
    }

    mgr.shutdown().await;
    Ok(())
}

fn print_telemetry(rec: &TelemetryRecord) {
    let ts_ms = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    match rec.nearest() {
        Some(n) => println!("{} distances={:?} nearest={}", ts_ms, rec.distances, n),
        None => println!("{} distances=[]", ts_ms),
    }
}
