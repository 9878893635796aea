//! CLI entry point for xystage
//!
//! Provides one-shot commands against the stage and the wave-plate rotator:
//!
//! ```bash
//! xystage ports
//! xystage show-config
//! xystage status
//! xystage home
//! xystage goto 1500 800
//! xystage rotate -- -25
//! xystage --mock home
//! xystage --mock scan --x 0 3000 500 --y 0 2000 500
//! xystage --mock scan --x 0 1000 500 --y 0 0 1 --frequencies 90 100 110
//! ```
//!
//! `--mock` swaps the serial ports for simulated boards, which is handy for
//! trying the commands without hardware. `scan` needs a detector driver and
//! currently only runs against the simulated spot detector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xystage::config::{XyStageConfig, DEFAULT_CONFIG_PATH};
use xystage::scan::{Detector, Measurement, ScanPlan, ScanPoint, ScanRunner, Source};
use xystage::tracing_setup::{self, OutputFormat, TracingConfig};
use xystage::{AxisController, IndexedRotator};
use xystage_driver_mock::{mock_transport, AxisBoardSim, RotatorSim};

#[derive(Parser)]
#[command(name = "xystage")]
#[command(about = "Two-axis stage and wave-plate rotator control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated boards instead of serial ports
    #[arg(long, global = true)]
    mock: bool,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports visible to the system
    Ports,
    /// Print the effective configuration (file, environment and flags merged)
    ShowConfig,
    /// Print stage position, status registers and limit switches
    Status,
    /// Initialize and home the stage
    Home,
    /// Move the stage to absolute step targets
    Goto {
        x: i64,
        y: i64,
        /// Return without waiting for the move to finish
        #[arg(long)]
        no_wait: bool,
    },
    /// Stop both stage axes immediately
    Stop,
    /// Home the wave-plate rotator on its index switch
    RotatorHome,
    /// Step the wave-plate rotator (negative values step backward)
    Rotate {
        #[arg(allow_hyphen_values = true)]
        steps: i64,
    },
    /// Raster-scan the stage and write one CSV row per point
    #[cfg(feature = "storage_csv")]
    Scan {
        /// X range in steps
        #[arg(long, num_args = 3, value_names = ["START", "STOP", "STEP"])]
        x: Vec<i64>,
        /// Y range in steps
        #[arg(long, num_args = 3, value_names = ["START", "STOP", "STEP"])]
        y: Vec<i64>,
        /// Source frequencies in GHz, swept at every point
        #[arg(long, num_args = 1..)]
        frequencies: Vec<f64>,
        /// Output file, overriding `[scan] output`
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = XyStageConfig::load_from(&cli.config)?;
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    config.validate()?;

    let tracing_config = TracingConfig::from_config(&config)?;
    tracing_setup::init(tracing_config)?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            Ok(())
        }
        Commands::Status => {
            let mut stage = open_stage(&config, cli.mock).await?;
            print_status(&mut stage).await
        }
        Commands::Home => {
            let mut stage = open_stage(&config, cli.mock).await?;
            stage.initialize(config.stage.controller.profile).await?;
            stage.find_home().await?;
            println!("Stage homed at {:?}", stage.get_position().await?);
            Ok(())
        }
        Commands::Goto { x, y, no_wait } => {
            let mut stage = open_stage(&config, cli.mock).await?;
            config
                .scan
                .retry_policy()
                .run(&mut stage, |stage| Box::pin(stage.go_to_position(x, y, !no_wait)))
                .await?;
            println!("Position {:?}", stage.get_position().await?);
            Ok(())
        }
        Commands::Stop => {
            let mut stage = open_stage(&config, cli.mock).await?;
            stage.hard_stop().await?;
            println!("Stopped");
            Ok(())
        }
        Commands::RotatorHome => {
            let mut rotator = open_rotator(&config, cli.mock).await?;
            let state = rotator.find_home().await?;
            println!("Rotator homed: steps={} index={}", state.steps, state.index_switch);
            Ok(())
        }
        Commands::Rotate { steps } => {
            let mut rotator = open_rotator(&config, cli.mock).await?;
            rotator.initialize().await?;
            let state = rotator.move_steps(steps).await?;
            println!("Rotator at steps={} index={}", state.steps, state.index_switch);
            Ok(())
        }
        #[cfg(feature = "storage_csv")]
        Commands::Scan {
            x,
            y,
            frequencies,
            output,
        } => {
            if !cli.mock {
                anyhow::bail!("No detector driver is available; run the scan with --mock");
            }
            let plan = ScanPlan::new(axis_range(&x)?, axis_range(&y)?).with_frequencies(frequencies);
            let path = output.unwrap_or_else(|| config.scan.output.clone());
            let mut sink = xystage::scan::CsvSink::create(&path)?;
            let mut detector = SpotDetector::default();
            let mut source = LoggingSource;

            let mut stage = open_stage(&config, cli.mock).await?;
            stage.initialize(config.stage.controller.profile).await?;
            let summary = ScanRunner::new(&mut stage)
                .with_source(&mut source)
                .with_settle_time(config.scan.settle_time())
                .with_retry(config.scan.retry_policy())
                .run(&plan, &mut detector, &mut sink)
                .await?;
            println!(
                "Scanned {} points ({} failed) in {:.1?}, wrote {}",
                summary.points,
                summary.failed_measurements,
                summary.elapsed,
                path.display()
            );
            Ok(())
        }
    }
}

fn axis_range(values: &[i64]) -> Result<Vec<i64>> {
    match values {
        [start, stop, step] => Ok(ScanPlan::range(*start, *stop, *step)),
        _ => anyhow::bail!("Expected START STOP STEP, got {:?}", values),
    }
}

/// Gaussian spot used by `--mock` scans.
struct SpotDetector {
    center: (f64, f64),
    width: f64,
}

impl Default for SpotDetector {
    fn default() -> Self {
        Self {
            center: (3500.0, 2250.0),
            width: 800.0,
        }
    }
}

#[async_trait]
impl Detector for SpotDetector {
    async fn measure(&mut self, point: &ScanPoint) -> Result<Measurement> {
        let dx = point.x as f64 - self.center.0;
        let dy = point.y as f64 - self.center.1;
        let value = (-(dx * dx + dy * dy) / (2.0 * self.width * self.width)).exp();
        Ok(Measurement::new(value).with_sensitivity(1.0))
    }
}

/// Stand-in source for `--mock` scans; only logs the tuning requests.
struct LoggingSource;

#[async_trait]
impl Source for LoggingSource {
    async fn set_frequency(&mut self, frequency: f64) -> Result<()> {
        tracing::debug!(frequency, "Simulated source tuned");
        Ok(())
    }
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(info) => println!(
                "{}  USB {:04x}:{:04x} {}",
                port.port_name,
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            other => println!("{}  {:?}", port.port_name, other),
        }
    }
    Ok(())
}

async fn open_stage(config: &XyStageConfig, mock: bool) -> Result<AxisController> {
    let controller_config = config.stage.controller.clone();
    if mock {
        tracing::info!("Using simulated stage board");
        let (transport, _handle) = mock_transport("sim-stage", AxisBoardSim::at(2500, 1800));
        return Ok(AxisController::new(transport, controller_config));
    }
    AxisController::open(&config.stage.port, config.stage.baud_rate, controller_config)
        .await
        .with_context(|| format!("Failed to open stage on {}", config.stage.port))
}

async fn open_rotator(config: &XyStageConfig, mock: bool) -> Result<IndexedRotator> {
    let driver_config = config.rotator.driver.clone();
    if mock {
        tracing::info!("Using simulated rotator board");
        let (transport, _handle) = mock_transport("sim-hwp", RotatorSim::at(137));
        return Ok(IndexedRotator::new(transport, driver_config));
    }
    IndexedRotator::open(&config.rotator.port, config.rotator.baud_rate, driver_config)
        .await
        .with_context(|| format!("Failed to open rotator on {}", config.rotator.port))
}

async fn print_status(stage: &mut AxisController) -> Result<()> {
    let (x, y) = stage.get_position().await?;
    let (x_status, y_status) = stage.get_status().await?;
    let limits = stage.get_limits().await?;

    println!("Position   X={} Y={}", x, y);
    println!("Limits     0x{:02x}", limits);
    println!("Status X   {:?}", x_status);
    println!("Status Y   {:?}", y_status);
    Ok(())
}
