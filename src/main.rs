//! CLI Entry Point for serial_telemetry
//!
//! Subcommands:
//! - `record`: acquire for a fixed time, then export per-channel files
//! - `monitor`: live queue depth and latest values until Ctrl+C
//! - `shell`: read `start`/`stop`/`status`/`export ...` commands from stdin
//! - `ports`: list serial ports
//! - `config`: print the effective configuration
//!
//! # Usage
//!
//! ```bash
//! serial_telemetry --port /dev/ttyACM0 --channels 3 record --duration 30
//! serial_telemetry --simulate --channels 4 monitor
//! TELEMETRY_SERIAL__BAUD_RATE=921600 serial_telemetry shell
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::providers::Serialized;
use serial_telemetry::config::{LogFormat, TelemetryConfig, DEFAULT_CONFIG_PATH};
use serial_telemetry::logging;
use serial_telemetry::session::TelemetrySession;
use serial_telemetry::transport::{self, SerialPortFactory, SimulatedFactory, TransportFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// How often the CLI moves queued rows into the channel buffers.
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "serial_telemetry")]
#[command(about = "Serial telemetry acquisition with bounded per-channel history", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port path
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Values per frame
    #[arg(long, global = true)]
    channels: Option<usize>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Generate synthetic frames instead of opening the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire for a fixed duration, then export
    Record {
        /// Seconds to record
        #[arg(long, default_value_t = 10.0)]
        duration: f64,

        /// Output directory (default: a timestamped folder under export.directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// File name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// File extension; .dat/.bin are binary, anything else is text
        #[arg(long)]
        extension: Option<String>,

        /// Write CSV instead of binary/text files
        #[arg(long)]
        csv: bool,

        /// One combined CSV file instead of one per channel
        #[arg(long, requires = "csv")]
        combined: bool,

        /// Leave out the zero prefill of channels that never filled up
        #[arg(long, requires = "csv")]
        skip_initial_zeros: bool,

        /// Add a time column at this sample rate (Hz, must be > 0)
        #[arg(long, requires = "csv", value_parser = parse_sample_rate)]
        sample_rate: Option<f64>,
    },

    /// Print queue depth and latest values until Ctrl+C
    Monitor {
        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Read commands from stdin
    Shell,

    /// List available serial ports
    Ports,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init_from_config(&config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Ports => list_ports(),
        Commands::Record {
            duration,
            output,
            prefix,
            extension,
            csv,
            combined,
            skip_initial_zeros,
            sample_rate,
        } => {
            let options = RecordOptions {
                duration: Duration::from_secs_f64(duration.max(0.0)),
                output,
                prefix,
                extension,
                csv,
                combined,
                skip_initial_zeros,
                sample_rate,
            };
            record(open_session(config, cli.simulate)?, options).await
        }
        Commands::Monitor { interval_ms } => {
            monitor(open_session(config, cli.simulate)?, Duration::from_millis(interval_ms.max(1))).await
        }
        Commands::Shell => shell(open_session(config, cli.simulate)?).await,
    }
}

/// Defaults, then the TOML file, then `TELEMETRY_*`, then command-line flags.
/// Positive, finite rate in Hz.
fn parse_sample_rate(value: &str) -> std::result::Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|e| format!("`{value}` is not a number: {e}"))?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(format!("sample rate must be a positive number of Hz, got {value}"))
    }
}

fn load_config(cli: &Cli) -> Result<TelemetryConfig> {
    let mut figment = TelemetryConfig::figment(Some(&cli.config));
    if let Some(port) = &cli.port {
        figment = figment.merge(Serialized::default("serial.port", port));
    }
    if let Some(baud) = cli.baud {
        figment = figment.merge(Serialized::default("serial.baud_rate", baud));
    }
    if let Some(channels) = cli.channels {
        figment = figment.merge(Serialized::default("acquisition.channels", channels));
    }
    if let Some(level) = &cli.log_level {
        figment = figment.merge(Serialized::default("logging.level", level));
    }
    if let Some(format) = cli.log_format {
        figment = figment.merge(Serialized::default("logging.format", format));
    }

    let config: TelemetryConfig = figment
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_session(config: TelemetryConfig, simulate: bool) -> Result<Arc<TelemetrySession>> {
    let factory: Arc<dyn TransportFactory> = if simulate {
        Arc::new(SimulatedFactory::new(
            config.acquisition.channels,
            config.simulation.clone(),
        ))
    } else {
        Arc::new(SerialPortFactory)
    };
    let session = TelemetrySession::new(config, factory).context("Failed to create session")?;
    Ok(Arc::new(session))
}

fn list_ports() -> Result<()> {
    let ports = transport::list_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

/// Moves queued rows into the buffers on a fixed tick until aborted.
fn spawn_drain_task(session: Arc<TelemetrySession>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            session.drain();
        }
    })
}

/// `stop()` waits for the acquisition thread, so keep it off the async workers.
async fn stop_session(session: &Arc<TelemetrySession>) -> Result<()> {
    let session = Arc::clone(session);
    let outcome = tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("Stop task panicked")?;
    info!(?outcome, "Acquisition stop");
    Ok(())
}

struct RecordOptions {
    duration: Duration,
    output: Option<PathBuf>,
    prefix: Option<String>,
    extension: Option<String>,
    csv: bool,
    combined: bool,
    skip_initial_zeros: bool,
    sample_rate: Option<f64>,
}

async fn record(session: Arc<TelemetrySession>, mut options: RecordOptions) -> Result<()> {
    let export = session.config().export.clone();
    let directory = options.output.take().unwrap_or_else(|| {
        export
            .directory
            .join(chrono::Local::now().format("session_%Y%m%d_%H%M%S").to_string())
    });
    let prefix = options.prefix.take().unwrap_or(export.prefix);

    session.start()?;
    let drain = spawn_drain_task(Arc::clone(&session));
    info!(seconds = options.duration.as_secs_f64(), "Recording");

    tokio::select! {
        _ = tokio::time::sleep(options.duration) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, saving what was recorded"),
    }

    stop_session(&session).await?;
    drain.abort();
    session.drain();

    let written = if options.csv {
        write_csv(&session, directory.clone(), prefix, &options)?
    } else {
        let extension = options.extension.take().unwrap_or(export.extension);
        session.export(&prefix, &extension, &directory)
    };

    let stats = session.stats();
    println!(
        "Recorded {} rows ({} evicted, {} rejected), wrote {} of {} files to {}",
        stats.acquisition.rows_pushed,
        stats.acquisition.queue_evictions,
        stats.acquisition.lines_rejected,
        written.len(),
        if options.csv && options.combined { 1 } else { stats.channels },
        directory.display()
    );
    Ok(())
}

#[cfg(feature = "storage_csv")]
fn write_csv(
    session: &TelemetrySession,
    directory: PathBuf,
    prefix: String,
    options: &RecordOptions,
) -> Result<Vec<PathBuf>> {
    use serial_telemetry::export::CsvExportOptions;

    Ok(session.export_csv(&CsvExportOptions {
        directory,
        prefix,
        skip_initial_zeros: options.skip_initial_zeros,
        sample_rate: options.sample_rate,
        timestamp_start: 0.0,
        combined: options.combined,
    }))
}

#[cfg(not(feature = "storage_csv"))]
fn write_csv(
    _session: &TelemetrySession,
    _directory: PathBuf,
    _prefix: String,
    _options: &RecordOptions,
) -> Result<Vec<PathBuf>> {
    anyhow::bail!("CSV export not enabled. Rebuild with --features storage_csv")
}

async fn monitor(session: Arc<TelemetrySession>, interval: Duration) -> Result<()> {
    session.start()?;
    println!("Monitoring - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.drain();
                let latest: Vec<String> = session.latest().iter().map(|v| format!("{v:>8.1}")).collect();
                println!(
                    "[{}] queue={:>5} | {}",
                    session.state(),
                    session.queue_depth(),
                    latest.join(" ")
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stop_session(&session).await
}

async fn shell(session: Arc<TelemetrySession>) -> Result<()> {
    println!("Commands: start, stop, status, depth, drain, clear, export [prefix] [ext] [dir], quit");
    let drain = spawn_drain_task(Arc::clone(&session));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if matches!(line.as_str(), "quit" | "exit") {
            break;
        }

        let session = Arc::clone(&session);
        let reply = tokio::task::spawn_blocking(move || session.execute_line(&line))
            .await
            .context("Command task panicked")?;
        match reply {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    drain.abort();
    stop_session(&session).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_must_be_positive() {
        assert_eq!(parse_sample_rate("1000"), Ok(1000.0));
        assert!(parse_sample_rate("0").is_err());
        assert!(parse_sample_rate("-1").is_err());
        assert!(parse_sample_rate("inf").is_err());
        assert!(parse_sample_rate("fast").is_err());
    }

    #[test]
    fn record_rejects_zero_sample_rate() {
        let parsed = Cli::try_parse_from(["serial_telemetry", "record", "--csv", "--sample-rate", "0"]);
        assert!(parsed.is_err());

        let parsed =
            Cli::try_parse_from(["serial_telemetry", "record", "--csv", "--sample-rate", "250"]).unwrap();
        match parsed.command {
            Commands::Record { sample_rate, .. } => assert_eq!(sample_rate, Some(250.0)),
            _ => panic!("expected record"),
        }
    }
}
