//! thermo_pi - Raspberry Pi thermostat daemon
//!
//! Runs the control loop and the JSON API, or takes a one-off sensor snapshot.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use thermo_pi::hardware::OneWireBus;
use thermo_pi::{
    start_web_server, HardwareBackend, MockBackend, RaspberryPiBackend, SensorMap, ThermoConfig,
    ThermoService, WebConfig, DEFAULT_CONTROL_INTERVAL_MS, DEFAULT_W1_BASE_DIR, DEFAULT_WEB_PORT,
};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "thermo_pi")]
#[command(about = "🌡️ thermo_pi - One-wire thermostat for Raspberry Pi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
#[command(long_about = "Holds a zone at a target temperature using DS18B20 sensors and GPIO relays")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Web server bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Web server port
    #[arg(short, long, default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Directory for persisted settings and the history log
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// One-wire device directory
    #[arg(long, default_value = DEFAULT_W1_BASE_DIR)]
    w1_dir: PathBuf,

    /// Use simulated sensors and relays (no hardware required)
    #[arg(long)]
    mock: bool,

    /// Sensor ids to serve (repeatable); discovered on the bus when omitted
    #[arg(long = "sensor")]
    sensors: Vec<String>,

    /// Room sensor used until settings are saved
    #[arg(long)]
    room_sensor: Option<String>,

    /// Safety sensor used until settings are saved
    #[arg(long)]
    safety_sensor: Option<String>,

    /// Control loop interval in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_CONTROL_INTERVAL_MS)]
    interval: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop and API server (default)
    Serve(ServeArgs),

    /// Read every sensor once and exit
    Snapshot(SnapshotArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve(args)) => {
            print_banner();
            serve_command(&cli, args).await?;
        }
        Some(Commands::Snapshot(args)) => {
            snapshot_command(&cli, args).await?;
        }
        None => {
            print_banner();
            serve_command(&cli, &ServeArgs::default()).await?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn print_banner() {
    println!("🌡️ thermo_pi - Raspberry Pi thermostat");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}

fn build_config(cli: &Cli) -> ThermoConfig {
    let mut config = ThermoConfig::new(&cli.data_dir)
        .with_w1_base_dir(&cli.w1_dir)
        .with_sensor_ids(cli.sensors.clone())
        .with_control_ttl_ms(cli.interval);
    if let Some(room) = &cli.room_sensor {
        config.room_sensor_id = room.clone();
    }
    if let Some(safety) = &cli.safety_sensor {
        config.safety_sensor_id = safety.clone();
    }
    config
}

fn build_web_config(cli: &Cli, args: &ServeArgs) -> WebConfig {
    WebConfig::default()
        .with_host(cli.host.as_str())
        .with_port(cli.port)
        .with_cors(!args.no_cors)
}

fn build_backend(cli: &Cli, config: &ThermoConfig) -> anyhow::Result<Arc<dyn HardwareBackend>> {
    if cli.mock {
        info!("Using simulated sensors and relays");
        return Ok(Arc::new(MockBackend::with_demo_sensors()));
    }
    if !OneWireBus::new(&config.w1_base_dir).is_present() {
        warn!(
            "One-wire directory {} not found, falling back to simulated hardware",
            config.w1_base_dir.display()
        );
        return Ok(Arc::new(MockBackend::with_demo_sensors()));
    }

    let backend = RaspberryPiBackend::new(&config.w1_base_dir, config.pins)
        .context("Failed to open Raspberry Pi hardware")?;
    Ok(Arc::new(backend))
}

async fn serve_command(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    info!("Starting thermo_pi...");

    let config = build_config(cli);
    let backend = build_backend(cli, &config)?;
    let service = ThermoService::start(config, backend)
        .await
        .context("Failed to start controller")?;

    let settings = service.settings();
    info!("Controller configuration:");
    info!("  - Data directory: {}", cli.data_dir.display());
    info!("  - Room sensor: {}", settings.room_sensor_id);
    info!("  - Safety sensor: {}", settings.safety_sensor_id);
    info!(
        "  - Target: {:.2}°C ± {:.2}°C",
        settings.target_c,
        settings.deadband_c / 2.0
    );
    info!("  - Control interval: {}ms", cli.interval);

    let (stop, shutdown) = watch::channel(false);
    let control = service.spawn_control_loop(shutdown.clone());

    let web_config = build_web_config(cli, args);
    let mut server_shutdown = shutdown;
    let server = start_web_server(web_config, service.clone(), async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("API server stopped: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
    }

    // Stopping the loop switches heating and cooling off.
    let _ = stop.send(true);
    if let Err(e) = control.await {
        error!("Control loop task failed: {}", e);
        service.control_loop().relays().shutdown()?;
    }

    info!("thermo_pi stopped");
    Ok(())
}

async fn snapshot_command(cli: &Cli, args: &SnapshotArgs) -> anyhow::Result<()> {
    let config = build_config(cli);
    let backend = build_backend(cli, &config)?;
    let service = ThermoService::start(config, backend)
        .await
        .context("Failed to start controller")?;
    let sensors = service.get_all_sensors().await;

    match args.format.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&sensors)?;
            println!("{}", json);
        }
        "pretty" => {
            print_pretty_snapshot(&sensors);
        }
        _ => {
            error!("Unsupported format: {}. Use 'json' or 'pretty'", args.format);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_pretty_snapshot(sensors: &SensorMap) {
    println!(
        "🌡️ Sensor Snapshot ({})",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("==========================================");
    if sensors.is_empty() {
        println!("  No sensors could be read");
    }
    for (id, reading) in sensors {
        println!(
            "  {}: {:.2}°C{}",
            id,
            reading.temperature_c,
            if reading.stale { " (stale)" } else { "" }
        );
    }
}
