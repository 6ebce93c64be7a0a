//! edgesim - simulated industrial edge device
//!
//! Generates sensor readings, scales them, flags anomalies and publishes
//! telemetry to Azure IoT Hub (or a local JSONL file).

use clap::{Parser, Subcommand, ValueEnum};
use edgesim_core::config::{ConfigError, ConfigLoader, SimulatorConfig};
use edgesim_core::readings::{evaluate, generate, transform};
use edgesim_core::{Readings, RecordingClient, Sensor, Session, SessionConfig, SessionExit};
use edgesim_export::{JsonlClient, JsonlClientConfig};
use edgesim_hub::{ConnectionString, IotHubClient, IotHubConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "edgesim")]
#[command(version)]
#[command(about = "Simulated industrial edge device", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: LogFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "EDGESIM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to IoT Hub and publish telemetry until Ctrl+C
    Run,

    /// Run the device against a local JSONL file instead of IoT Hub
    Record {
        /// Output file (defaults to record.path from config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of iterations (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        count: u64,

        /// Loop interval in milliseconds (defaults to simulator.interval_ms)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show sensor table and resolved configuration
    Status,

    /// Self-test the reading pipeline
    Test,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging is not installed yet; report load problems once it is
    let (config, load_error) = load_config(cli.config.clone());

    // CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.simulator.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    match cli.format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .json()
                .with_max_level(log_level)
                .with_target(false)
                .with_current_span(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    match load_error {
        Some(e) => warn!("Failed to load configuration: {}, using defaults", e),
        None => info!("Configuration loaded successfully"),
    }

    match cli.command {
        Commands::Run => run_command(config).await,
        Commands::Record {
            output,
            count,
            interval,
        } => record_command(config, output, count, interval).await,
        Commands::Status => status_command(&config),
        Commands::Test => test_command().await,
    }
}

/// Load configuration from file/env, with fallback to defaults
///
/// The load error is handed back so it can be logged after the subscriber
/// is installed.
fn load_config(cli_path: Option<PathBuf>) -> (SimulatorConfig, Option<ConfigError>) {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => (config, None),
        Err(e) => (SimulatorConfig::default(), Some(e)),
    }
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn run_command(config: SimulatorConfig) -> anyhow::Result<()> {
    let hub_config = IotHubConfig::from_settings(&config.hub)?;

    println!();
    println!("  edgesim v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Device: {}", hub_config.connection_string.device_id);
    println!("  Hub:    {}", hub_config.connection_string.endpoint_host());
    println!("  Every:  {:?}", config.simulator.interval());
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let client = IotHubClient::connect(hub_config).await?;
    let report = Session::new(client, config.session())
        .run(interrupted())
        .await?;

    info!(
        "Session ended after {} iterations, {} messages sent",
        report.iterations, report.messages_sent
    );
    Ok(())
}

async fn record_command(
    config: SimulatorConfig,
    output: Option<PathBuf>,
    count: u64,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    let mut client_config = JsonlClientConfig::from(&config.record);
    if let Some(path) = output {
        client_config.path = path;
    }

    let mut session_config = config.session();
    session_config.max_iterations = count;
    if let Some(ms) = interval {
        anyhow::ensure!(ms > 0, "--interval must be greater than 0");
        session_config.interval = Duration::from_millis(ms);
    }

    println!();
    println!("  edgesim v{} - RECORD MODE", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Output: {}", client_config.path.display());
    if count > 0 {
        println!("  Will run {} iterations", count);
    } else {
        println!("  Running until Ctrl+C");
    }
    println!();

    let client = JsonlClient::open(client_config)?;
    let report = Session::new(client, session_config)
        .run(interrupted())
        .await?;

    if report.exit == SessionExit::Completed {
        println!(
            "  Recorded {} messages over {} iterations",
            report.messages_sent, report.iterations
        );
    }
    Ok(())
}

fn status_command(config: &SimulatorConfig) -> anyhow::Result<()> {
    println!("edgesim v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Sensors:");
    println!("  {:<12} {:>16} {:>10}", "NAME", "RANGE", "THRESHOLD");
    for sensor in Sensor::ALL {
        let (low, high) = sensor.range();
        println!(
            "  {:<12} {:>16} {:>10}",
            sensor.name(),
            format!("[{}, {})", low, high),
            sensor.threshold()
        );
    }
    println!();

    println!("Configuration:");
    match ConfigLoader::default_config_path() {
        Some(path) => println!("  Default config path: {}", path.display()),
        None => println!("  Default config path: unavailable"),
    }
    println!("  Log level: {}", config.simulator.log_level);
    println!("  Interval: {:?}", config.simulator.interval());
    println!(
        "  Metadata: device={} location={} type={}",
        config.metadata.device, config.metadata.location, config.metadata.device_type
    );

    let connection = match config.hub.connection_string.as_deref() {
        None => "not configured".to_string(),
        Some(raw) => match raw.parse::<ConnectionString>() {
            Ok(cs) => cs.redacted(),
            Err(e) => format!("invalid ({})", e),
        },
    };
    println!("  Connection: {}", connection);
    println!("  Record path: {}", config.record.path);

    Ok(())
}

async fn test_command() -> anyhow::Result<()> {
    println!("Running edgesim self-test...\n");
    let mut rng = StdRng::seed_from_u64(0);
    let mut failures = 0;

    let mut check = |name: &str, passed: bool| {
        println!("  {:<36} {}", name, if passed { "OK" } else { "FAILED" });
        if !passed {
            failures += 1;
        }
    };

    let raw = generate(&mut rng);
    let in_range = Sensor::ALL.iter().all(|sensor| {
        let (low, high) = sensor.range();
        raw.get(sensor.name())
            .is_some_and(|value| value >= low && value < high)
    });
    check("Generated readings within range", in_range);

    let pressure: Readings = [("PRESSURE", 250.0)].into_iter().collect();
    let scaled = transform(&pressure);
    let evaluated = evaluate(&scaled, &mut rng);
    check(
        "PRESSURE 250.0 -> 252.5, no anomaly",
        scaled.get("PRESSURE") == Some(252.5) && !evaluated[0].anomaly,
    );

    let vibration: Readings = [("VIBRATION", 1.9)].into_iter().collect();
    let scaled = transform(&vibration);
    let evaluated = evaluate(&scaled, &mut rng);
    check(
        "VIBRATION 1.9 -> 1.92, anomaly",
        scaled.get("VIBRATION") == Some(1.92) && evaluated[0].anomaly,
    );

    let mac = edgesim_hub::sas::hmac_sha256(b"Jefe", b"what do ya want for nothing?")?;
    check("HMAC-SHA256 signing", mac[..4] == [0x5b, 0xdc, 0xc1, 0x46]);

    let client = RecordingClient::new();
    let report = Session::new(
        client.clone(),
        SessionConfig {
            interval: Duration::from_millis(1),
            max_iterations: 1,
            ..Default::default()
        },
    )
    .with_rng(StdRng::seed_from_u64(1))
    .run(std::future::pending::<()>())
    .await?;
    check(
        "Session sends startup + 5 readings",
        report.messages_sent == 6 && client.startups().len() == 1 && client.readings().len() == 5,
    );
    check("Session shuts down once", client.shutdown_calls() == 1);

    if failures > 0 {
        anyhow::bail!("{} self-test check(s) failed", failures);
    }
    println!("\nAll tests passed!\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_reports_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hub\nconnection_string = ").unwrap();

        let (config, error) = load_config(Some(file.path().to_path_buf()));
        assert!(matches!(error, Some(ConfigError::ParseError(_))));
        assert!(config.hub.connection_string.is_none());
    }

    #[test]
    fn test_load_config_from_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[simulator]\ninterval_ms = 1500").unwrap();

        let (config, error) = load_config(Some(file.path().to_path_buf()));
        assert!(error.is_none());
        assert_eq!(config.simulator.interval_ms, 1500);
    }
}
