use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use telink_rs::ble::BleTransport;
use telink_rs::report::{DeviceInfo, Report};
use telink_rs::{MeshConfig, NoopHandler, TelinkLight, TelinkMesh};

/// Talk to a Telink Bluetooth mesh light.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with address, name, password and optional vendor.
    #[arg(short, long, conflicts_with_all = ["address", "name", "password"])]
    config: Option<PathBuf>,
    /// Device MAC address, e.g. A4:C1:38:00:11:22.
    #[arg(short, long, required_unless_present = "config")]
    address: Option<String>,
    /// Mesh name.
    #[arg(short, long, required_unless_present = "config")]
    name: Option<String>,
    /// Mesh password.
    #[arg(short, long, required_unless_present = "config")]
    password: Option<String>,
    /// Seconds to wait for reports after sending the command.
    #[arg(short, long, default_value_t = 3.0)]
    wait: f64,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Query device info and firmware version.
    Info,
    /// Query or change the mesh address.
    MeshId {
        #[arg(long)]
        set: Option<u32>,
    },
    /// Query or edit group membership.
    Groups {
        #[arg(long, conflicts_with = "delete")]
        add: Option<u8>,
        #[arg(long)]
        delete: Option<u8>,
    },
    /// Query the device clock, or set it to local time.
    Time {
        #[arg(long)]
        sync: bool,
    },
    /// Light control.
    #[command(subcommand)]
    Light(LightAction),
}

#[derive(Subcommand, Debug)]
enum LightAction {
    On,
    Off,
    /// Brightness in percent (0-100).
    Brightness { value: u8 },
    /// Colour temperature in kelvin (2700-6500).
    Temperature { kelvin: u16 },
    Color { red: u8, green: u8, blue: u8 },
    /// Query the current light state.
    Status,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; btleplug capped at WARN
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy()
        .add_directive("btleplug=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<MeshConfig> {
    if let Some(path) = &cli.config {
        return MeshConfig::from_json_file(path).with_context(|| format!("Failed to load config from {:?}", path));
    }
    match (&cli.address, &cli.name, &cli.password) {
        (Some(address), Some(name), Some(password)) => Ok(MeshConfig::new(address, name, password)),
        _ => bail!("--address, --name and --password are required without --config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let wait = Duration::try_from_secs_f64(cli.wait).context("--wait must be a non-negative number of seconds")?;
    let transport = BleTransport::new().await.context("Failed to open Bluetooth adapter")?;
    let mesh = TelinkMesh::with_config(transport, &config, Arc::new(NoopHandler))
        .context("Invalid device configuration")?;
    let mut light = TelinkLight::new(mesh);

    light.connect().await.context("Failed to connect")?;
    let mut reports = light.subscribe_reports();

    let result = execute(&mut light, cli.command).await;
    if result.is_ok() {
        collect_reports(&mut reports, wait).await;
    }

    if let Err(e) = light.disconnect().await {
        error!("Disconnect failed: {e}");
    }
    result
}

async fn execute(light: &mut TelinkLight<BleTransport>, action: Action) -> Result<()> {
    match action {
        Action::Info => {
            light.query_device_info().await?;
            light.query_device_version().await?;
        }
        Action::MeshId { set: Some(id) } => light.set_mesh_id(id).await?,
        Action::MeshId { set: None } => light.query_mesh_id().await?,
        Action::Groups { add, delete } => {
            if let Some(group) = add {
                light.add_group(group).await?;
            }
            if let Some(group) = delete {
                light.delete_group(group).await?;
            }
            light.query_groups().await?;
        }
        Action::Time { sync } => {
            if sync {
                light.set_time().await?;
            }
            light.query_time().await?;
        }
        Action::Light(LightAction::On) => light.set_state(true).await?,
        Action::Light(LightAction::Off) => light.set_state(false).await?,
        Action::Light(LightAction::Brightness { value }) => light.set_brightness(value).await?,
        Action::Light(LightAction::Temperature { kelvin }) => light.set_temperature(kelvin).await?,
        Action::Light(LightAction::Color { red, green, blue }) => light.set_color(red, green, blue).await?,
        Action::Light(LightAction::Status) => light.query_status().await?,
    }
    Ok(())
}

async fn collect_reports(reports: &mut broadcast::Receiver<Report>, wait: Duration) {
    let deadline = Instant::now() + wait;
    loop {
        match timeout_at(deadline, reports.recv()).await {
            Ok(Ok(report)) => println!("{}", describe(&report)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => info!("Skipped {skipped} reports"),
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }
}

fn describe(report: &Report) -> String {
    match report {
        Report::Time(r) => match r.datetime() {
            Some(datetime) => format!("[{}] time: {}", r.source, datetime),
            None => format!("[{}] time: invalid clock {:?}", r.source, r),
        },
        Report::Address(r) => format!("[{}] mesh id: {}", r.source, r.mesh_id),
        Report::DeviceInfo(r) => match &r.info {
            DeviceInfo::Version(version) => format!("[{}] firmware: {}", r.source, version),
            DeviceInfo::Info(raw) => format!("[{}] device info: {}", r.source, hex::encode(raw)),
            DeviceInfo::Other { kind, data } => format!("[{}] device info {kind}: {}", r.source, hex::encode(data)),
        },
        Report::GroupId(r) => format!("[{}] groups: {:?}", r.source, r.groups),
        Report::OnlineStatus(r) => format!(
            "[{}] node {} {} brightness {}",
            r.source,
            r.mesh_id,
            if r.is_on() { "on" } else { "off" },
            r.brightness
        ),
        Report::Status(r) => format!(
            "[{}] brightness {} rgb ({}, {}, {}) white {}",
            r.source, r.brightness, r.red, r.green, r.blue, r.white
        ),
        Report::OtaStatus(r) => format!("[{}] ota: {}", r.source, hex::encode(r.data)),
    }
}
