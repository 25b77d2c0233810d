//! DLPC900 Control Tool
//!
//! CLI for driving DLPC900 DMD controllers over USB: power and display
//! control, pattern sequence loading and offline sequence encoding.

mod config;
mod patterns;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dlpc900_hw::image::rle;
use dlpc900_hw::protocol::TriggerOut;
use dlpc900_hw::{
    DisplayMode, DmdDevice, EncodedSequence, HidTransport, PatternTiming, Sequence, Transport,
    PLANES_PER_SLOT,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Config, DeviceConfig, PatternConfig, TransportKind};

#[derive(Parser)]
#[command(name = "dmdctl")]
#[command(about = "Control tool for DLPC900 DMD controllers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// USB binding, overrides the configuration
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Reply timeout in milliseconds, overrides the configuration
    #[arg(long)]
    timeout: Option<u64>,

    /// HID device path, overrides the configuration
    #[arg(long)]
    path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror idle mode
    Idle {
        #[command(subcommand)]
        action: IdleCommands,
    },
    /// Put the controller in standby
    Standby,
    /// Wake the controller from standby
    Wakeup,
    /// Software reset
    Reset,
    /// Change the display mode
    Mode {
        /// Mode: video, pre-stored, video-pattern, on-the-fly
        mode: DisplayMode,
    },
    /// Start the loaded sequence
    Start,
    /// Pause the running sequence
    Pause,
    /// Stop the running sequence
    Stop,
    /// Encode pattern images and load them as a sequence
    Load {
        /// Pattern images or directories of images, in display order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[command(flatten)]
        timing: TimingArgs,
    },
    /// Encode pattern images into a sequence file
    Encode {
        /// Pattern images or directories of images, in display order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Output sequence file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Load a previously encoded sequence file
    Upload {
        /// Sequence file
        file: PathBuf,

        #[command(flatten)]
        timing: TimingArgs,
    },
    /// Describe a sequence file
    Inspect {
        /// Sequence file
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Decode every slot and count lit mirrors per pattern
        #[arg(long)]
        verify: bool,
    },
    /// Controller test commands
    Test {
        #[command(subcommand)]
        action: TestCommands,
    },
}

#[derive(Subcommand)]
enum IdleCommands {
    /// Enter idle mode
    On,
    /// Leave idle mode
    Off,
}

#[derive(Subcommand)]
enum TestCommands {
    /// Issue the test read and print the reply
    Read,
    /// Issue the test write
    Write,
}

#[derive(Args)]
struct TimingArgs {
    /// Exposure time in microseconds for every pattern
    #[arg(long)]
    exposure: Option<u32>,

    /// Per-pattern exposure times in microseconds (comma separated)
    #[arg(long, value_delimiter = ',', conflicts_with = "exposure")]
    exposures: Vec<u32>,

    /// Dark time in microseconds
    #[arg(long)]
    dark: Option<u32>,

    /// Wait for an external trigger before each pattern
    #[arg(long)]
    trigger_in: bool,

    /// Do not drive the trigger output
    #[arg(long)]
    no_trigger_out: bool,

    /// LUT repeat count (0 loops forever)
    #[arg(long)]
    repeat: Option<u32>,

    /// Configure trigger out 1 before defining patterns
    #[arg(long)]
    trigger_out1: bool,

    /// Start the sequence once loaded
    #[arg(long)]
    start: bool,
}

impl TimingArgs {
    fn timings(&self, defaults: &PatternConfig) -> Vec<PatternTiming> {
        let mut base = defaults.timing();
        if let Some(exposure) = self.exposure {
            base.exposure_us = exposure;
        }
        if let Some(dark) = self.dark {
            base.dark_time_us = dark;
        }
        base.trigger_in |= self.trigger_in;
        base.trigger_out &= !self.no_trigger_out;

        if self.exposures.is_empty() {
            vec![base]
        } else {
            self.exposures
                .iter()
                .map(|&exposure_us| PatternTiming {
                    exposure_us,
                    ..base
                })
                .collect()
        }
    }

    fn repeat(&self, defaults: &PatternConfig) -> u32 {
        self.repeat.unwrap_or(defaults.repeat)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => Config::default(),
    };
    if let Some(transport) = cli.transport {
        config.device.transport = transport;
    }
    if let Some(timeout) = cli.timeout {
        config.device.timeout = timeout;
    }
    if let Some(path) = cli.path {
        config.device.path = Some(path);
    }

    match cli.command {
        Commands::Idle { action } => handle_idle(action, &config),
        Commands::Standby => {
            open_device(&config.device)?.standby()?;
            println!("Controller in standby");
            Ok(())
        }
        Commands::Wakeup => {
            open_device(&config.device)?.wakeup()?;
            println!("Controller awake");
            Ok(())
        }
        Commands::Reset => {
            open_device(&config.device)?.reset()?;
            println!("Controller reset");
            Ok(())
        }
        Commands::Mode { mode } => {
            open_device(&config.device)?.change_mode(mode)?;
            println!("Display mode set to: {}", mode);
            Ok(())
        }
        Commands::Start => {
            open_device(&config.device)?.start_sequence()?;
            println!("Sequence started");
            Ok(())
        }
        Commands::Pause => {
            open_device(&config.device)?.pause_sequence()?;
            println!("Sequence paused");
            Ok(())
        }
        Commands::Stop => {
            open_device(&config.device)?.stop_sequence()?;
            println!("Sequence stopped");
            Ok(())
        }
        Commands::Load { images, timing } => handle_load(&images, &timing, &config),
        Commands::Encode { images, output } => handle_encode(&images, &output),
        Commands::Upload { file, timing } => handle_upload(&file, &timing, &config),
        Commands::Inspect { file, json, verify } => handle_inspect(&file, json, verify),
        Commands::Test { action } => handle_test(action, &config),
    }
}

/// Opens the controller over the configured USB binding.
fn open_device(device: &DeviceConfig) -> Result<DmdDevice> {
    let transport: Box<dyn Transport> = match device.transport {
        TransportKind::Hid => {
            let transport = match &device.path {
                Some(path) => HidTransport::open_path(path),
                None => HidTransport::open(device.vid, device.pid),
            };
            Box::new(transport.context("Failed to open DMD controller over HID")?)
        }
        TransportKind::Bulk => open_bulk(device)?,
    };
    Ok(DmdDevice::new(transport).with_timeout(device.timeout()))
}

#[cfg(feature = "libusb")]
fn open_bulk(device: &DeviceConfig) -> Result<Box<dyn Transport>> {
    let transport = dlpc900_hw::BulkTransport::open(device.vid, device.pid, device.timeout())
        .context("Failed to open DMD controller over bulk USB")?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "libusb"))]
fn open_bulk(_device: &DeviceConfig) -> Result<Box<dyn Transport>> {
    anyhow::bail!("Bulk transport unavailable: dmdctl was built without the libusb feature")
}

fn handle_idle(action: IdleCommands, config: &Config) -> Result<()> {
    let dmd = open_device(&config.device)?;
    match action {
        IdleCommands::On => {
            dmd.idle_on()?;
            println!("Idle mode on");
        }
        IdleCommands::Off => {
            dmd.idle_off()?;
            println!("Idle mode off");
        }
    }

    Ok(())
}

fn handle_load(images: &[PathBuf], timing: &TimingArgs, config: &Config) -> Result<()> {
    let planes = patterns::load_planes(images)?;
    let sequence = Sequence::build(
        &planes,
        &timing.timings(&config.pattern),
        timing.repeat(&config.pattern),
    )
    .context("Failed to build sequence")?;

    program(sequence, timing, config)
}

fn handle_upload(file: &Path, timing: &TimingArgs, config: &Config) -> Result<()> {
    let encoded = EncodedSequence::load(file)
        .with_context(|| format!("Failed to load sequence file {}", file.display()))?;
    let sequence = Sequence::from_encoded(
        encoded,
        &timing.timings(&config.pattern),
        timing.repeat(&config.pattern),
    )
    .context("Failed to build sequence")?;

    program(sequence, timing, config)
}

/// Switches mode, loads the sequence and optionally starts it.
fn program(sequence: Sequence, timing: &TimingArgs, config: &Config) -> Result<()> {
    let mode = config.display_mode()?;
    let sequence = if timing.trigger_out1 {
        sequence.with_trigger_out1(TriggerOut::default())
    } else {
        sequence
    };

    let dmd = open_device(&config.device)?;
    dmd.change_mode(mode)?;
    dmd.load_sequence(&sequence)
        .context("Failed to load sequence")?;
    println!(
        "Loaded {} patterns in {} slots",
        sequence.patterns().len(),
        sequence.slots().len()
    );

    if timing.start {
        dmd.start_sequence()?;
        println!("Sequence started");
    }

    if let Some(error) = dmd.last_protocol_error() {
        println!("Controller reported: {}", error);
    }

    Ok(())
}

fn handle_encode(images: &[PathBuf], output: &Path) -> Result<()> {
    let planes = patterns::load_planes(images)?;
    let encoded = EncodedSequence::encode(&planes).context("Failed to encode patterns")?;
    encoded
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Encoded {} patterns into {} slots ({} bytes) at {}",
        encoded.pattern_count(),
        encoded.slots().len(),
        encoded.total_bytes(),
        output.display()
    );
    Ok(())
}

/// Summary of a sequence file.
#[derive(Debug, Serialize)]
struct SequenceSummary {
    patterns: u32,
    total_bytes: u64,
    slots: Vec<SlotSummary>,
}

/// Summary of one composite slot.
#[derive(Debug, Serialize)]
struct SlotSummary {
    index: u16,
    bytes: u32,
    patterns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    lit: Option<Vec<usize>>,
}

fn summarize(encoded: &EncodedSequence, verify: bool) -> Result<SequenceSummary> {
    let total = encoded.pattern_count() as usize;
    let slots = encoded
        .slots()
        .iter()
        .map(|slot| -> Result<SlotSummary> {
            let first = slot.index() as usize * PLANES_PER_SLOT;
            let patterns = (total - first).min(PLANES_PER_SLOT);
            let lit = if verify {
                let composite = rle::decode(slot.bytes())
                    .with_context(|| format!("Slot {} does not decode", slot.index()))?;
                let counts = (0..patterns)
                    .map(|i| {
                        composite
                            .plane(i)
                            .map(|plane| plane.data().iter().filter(|&&on| on).count())
                    })
                    .collect::<dlpc900_hw::Result<Vec<_>>>()?;
                Some(counts)
            } else {
                None
            };
            Ok(SlotSummary {
                index: slot.index(),
                bytes: slot.byte_count(),
                patterns,
                lit,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SequenceSummary {
        patterns: encoded.pattern_count(),
        total_bytes: encoded.total_bytes(),
        slots,
    })
}

fn handle_inspect(file: &Path, json: bool, verify: bool) -> Result<()> {
    let encoded = EncodedSequence::load(file)
        .with_context(|| format!("Failed to load sequence file {}", file.display()))?;
    let summary = summarize(&encoded, verify)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Sequence: {}", file.display());
    println!("  Patterns: {}", summary.patterns);
    println!("  Total bytes: {}", summary.total_bytes);
    for slot in &summary.slots {
        println!(
            "  Slot {}: {} patterns, {} bytes",
            slot.index, slot.patterns, slot.bytes
        );
        if let Some(lit) = &slot.lit {
            for (bit, count) in lit.iter().enumerate() {
                println!("      bit {:2}: {} mirrors on", bit, count);
            }
        }
    }

    Ok(())
}

fn handle_test(action: TestCommands, config: &Config) -> Result<()> {
    let dmd = open_device(&config.device)?;
    match action {
        TestCommands::Read => {
            let reply = dmd.test_read()?;
            let hex: Vec<String> = reply.iter().map(|b| format!("{:02X}", b)).collect();
            println!("Test read reply: {}", hex.join(" "));
        }
        TestCommands::Write => {
            dmd.test_write()?;
            println!("Test write sent");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlpc900_hw::BitPlane;

    fn timing_args(exposures: Vec<u32>) -> TimingArgs {
        TimingArgs {
            exposure: None,
            exposures,
            dark: Some(50),
            trigger_in: false,
            no_trigger_out: true,
            repeat: None,
            trigger_out1: false,
            start: false,
        }
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "dmdctl",
            "--transport",
            "bulk",
            "load",
            "a.png",
            "b.png",
            "--exposures",
            "100,200",
            "--start",
        ])
        .unwrap();
        assert_eq!(cli.transport, Some(TransportKind::Bulk));
        assert_eq!(cli.path, None);
        match cli.command {
            Commands::Load { images, timing } => {
                assert_eq!(images.len(), 2);
                assert_eq!(timing.exposures, vec![100, 200]);
                assert!(timing.start);
            }
            _ => panic!("expected load"),
        }

        let cli =
            Cli::try_parse_from(["dmdctl", "--path", "/dev/hidraw2", "mode", "video"]).unwrap();
        assert_eq!(cli.path.as_deref(), Some("/dev/hidraw2"));
        assert!(matches!(
            cli.command,
            Commands::Mode {
                mode: DisplayMode::Video
            }
        ));
    }

    #[test]
    fn test_timings_merge_defaults() {
        let defaults = PatternConfig::default();

        let shared = timing_args(Vec::new()).timings(&defaults);
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].exposure_us, 1_000_000);
        assert_eq!(shared[0].dark_time_us, 50);
        assert!(!shared[0].trigger_out);

        let each = timing_args(vec![10, 20, 30]).timings(&defaults);
        assert_eq!(
            each.iter().map(|t| t.exposure_us).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        assert!(each.iter().all(|t| t.dark_time_us == 50));
    }

    #[test]
    fn test_timings_start_from_config() {
        let defaults = PatternConfig {
            exposure: 4000,
            dark: 10,
            trigger_in: true,
            trigger_out: true,
            repeat: 2,
        };
        let mut args = timing_args(Vec::new());
        args.dark = None;
        args.no_trigger_out = false;
        assert_eq!(args.timings(&defaults), vec![defaults.timing()]);

        args.exposure = Some(250);
        let timings = args.timings(&defaults);
        assert_eq!(timings[0].exposure_us, 250);
        assert_eq!(timings[0].dark_time_us, 10);
        assert!(timings[0].trigger_in);
        assert_eq!(args.repeat(&defaults), 2);
    }

    #[test]
    fn test_summarize() {
        let mut plane = BitPlane::new();
        plane.fill_rect(0, 0, 4, 2, true);
        let encoded = EncodedSequence::encode(&[plane, BitPlane::new()]).unwrap();

        let summary = summarize(&encoded, true).unwrap();
        assert_eq!(summary.patterns, 2);
        assert_eq!(summary.slots.len(), 1);
        assert_eq!(summary.slots[0].patterns, 2);
        assert_eq!(summary.slots[0].lit, Some(vec![8, 0]));

        let json = serde_json::to_value(summarize(&encoded, false).unwrap()).unwrap();
        assert_eq!(json["patterns"], 2);
        assert!(json["slots"][0].get("lit").is_none());
    }
}
