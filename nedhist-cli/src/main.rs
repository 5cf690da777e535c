//!
//! Command-line front end for the nedhist histogramming engine.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::too_many_lines
)]

mod table;

use clap::{Parser, Subcommand};

use nedhist_core::{EngineConfig, EventBatch, PulseTime};
use nedhist_engine::BufferLayout;
use nedhist_stream::{Controller, Snapshot};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use table::TableError;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Engine error: {0}")]
    Core(#[from] nedhist_core::Error),
}

/// Event-mode neutron detector histogramming engine.
#[derive(Parser)]
#[command(name = "nedhist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic acquisition against a detector configuration
    Run {
        /// Detector configuration (JSON)
        config: PathBuf,

        /// Number of pulses to generate
        #[arg(short, long, default_value = "100")]
        pulses: u32,

        /// Events per pulse per channel
        #[arg(short, long, default_value = "1000")]
        events_per_pulse: usize,

        /// Number of ingestion channels
        #[arg(short, long, default_value = "1")]
        channels: usize,

        /// Snapshot publish period in milliseconds
        #[arg(long, default_value = "100")]
        publish_ms: u64,

        /// Pixel map table (ASCII, first line = entry count)
        #[arg(long)]
        pixel_map: Option<PathBuf>,

        /// Detector index the pixel map applies to
        #[arg(long, default_value = "0")]
        pixel_map_detector: usize,

        /// Per-pixel transform coefficient table (ASCII)
        #[arg(long)]
        coeff_table: Option<PathBuf>,

        /// Detector index the coefficient table applies to
        #[arg(long, default_value = "0")]
        coeff_detector: usize,

        /// Parameter slot the coefficient table loads into
        #[arg(long, default_value = "0")]
        coeff_slot: usize,

        /// Simulated proton charge per pulse
        #[arg(long, default_value = "1.0")]
        proton_charge: f64,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a configuration and print its computed buffer layout
    CheckConfig {
        /// Detector configuration (JSON)
        config: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            pulses,
            events_per_pulse,
            channels,
            publish_ms,
            pixel_map,
            pixel_map_detector,
            coeff_table,
            coeff_detector,
            coeff_slot,
            proton_charge,
            verbose,
        } => run_acquisition(&RunArgs {
            config,
            pulses,
            events_per_pulse,
            channels,
            publish_ms,
            pixel_map,
            pixel_map_detector,
            coeff_table,
            coeff_detector,
            coeff_slot,
            proton_charge,
            verbose,
        }),
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

struct RunArgs {
    config: PathBuf,
    pulses: u32,
    events_per_pulse: usize,
    channels: usize,
    publish_ms: u64,
    pixel_map: Option<PathBuf>,
    pixel_map_detector: usize,
    coeff_table: Option<PathBuf>,
    coeff_detector: usize,
    coeff_slot: usize,
    proton_charge: f64,
    verbose: bool,
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let reader = BufReader::new(File::open(path)?);
    let config: EngineConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let layout = BufferLayout::compute(&config)?;

    println!("Configuration OK: {}", path.display());
    println!(
        "  {} detector(s), TOF range 0..={}",
        layout.detector_count(),
        layout.tof_max()
    );
    for (index, region) in layout.regions().iter().enumerate() {
        let detector = &config.detectors[index];
        println!(
            "  detector {index}: pixels {}..={} -> spatial [{}, {}), tof [{}, {})",
            detector.pixel_range_start,
            detector.pixel_range_end,
            region.spatial_offset,
            region.spatial_offset + region.spatial_size,
            region.tof_offset,
            region.tof_offset + region.tof_size,
        );
    }
    println!("  total buffer: {} counters", layout.total_size());
    Ok(())
}

/// Multiplicative congruential generator, good enough for synthetic
/// event streams and fully deterministic across runs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        self.0 >> 33
    }
}

fn run_acquisition(args: &RunArgs) -> Result<()> {
    let config = load_config(&args.config)?;

    let mut controller = Controller::new(args.channels, Duration::from_millis(args.publish_ms))?;
    controller.reconfigure(&config)?;

    if let Some(path) = &args.pixel_map {
        let map: Vec<u32> = table::read_table(path)?;
        controller.load_pixel_map(args.pixel_map_detector, map)?;
        if args.verbose {
            eprintln!(
                "Loaded pixel map for detector {} from {}",
                args.pixel_map_detector,
                path.display()
            );
        }
    }
    if let Some(path) = &args.coeff_table {
        let coefficients: Vec<f64> = table::read_table(path)?;
        controller.load_transform_array(args.coeff_detector, args.coeff_slot, coefficients)?;
        if args.verbose {
            eprintln!(
                "Loaded transform coefficients for detector {} slot {} from {}",
                args.coeff_detector,
                args.coeff_slot,
                path.display()
            );
        }
    }

    let snapshot_count = Arc::new(AtomicU64::new(0));
    let sink_count = Arc::clone(&snapshot_count);
    controller.start(Box::new(move |_snapshot: Snapshot| {
        sink_count.fetch_add(1, Ordering::Relaxed);
    }))?;

    // Each detector gets an even share of every batch's events.
    let ranges: Vec<(u32, u32)> = config
        .detectors
        .iter()
        .map(|detector| (detector.pixel_range_start, detector.pixel_count()))
        .collect();
    let tof_span = u64::from(config.tof_max) + 1;

    let start = Instant::now();
    let mut rng = Lcg(0x5EED_CAFE);
    let mut generated: u64 = 0;
    for pulse in 0..args.pulses {
        for channel in 0..args.channels {
            let mut pixel_ids = Vec::with_capacity(args.events_per_pulse);
            let mut tofs = Vec::with_capacity(args.events_per_pulse);
            for _ in 0..args.events_per_pulse {
                let (range_start, range_count) = ranges[rng.next() as usize % ranges.len()];
                pixel_ids.push(range_start + (rng.next() % u64::from(range_count)) as u32);
                tofs.push((rng.next() % tof_span) as u32);
            }
            let batch = EventBatch {
                channel,
                pixel_ids,
                tofs,
                sequence_tag: pulse,
                timestamp: PulseTime::new(pulse, 0),
                proton_charge: args.proton_charge,
            };
            generated += args.events_per_pulse as u64;
            controller.ingest(&batch)?;
        }
        if args.verbose && (pulse + 1) % 100 == 0 {
            eprintln!("  pulse {}/{}", pulse + 1, args.pulses);
        }
    }
    let elapsed = start.elapsed();
    controller.stop();

    let metrics = controller.metrics();
    let accumulated: u64 = metrics
        .detectors
        .iter()
        .map(|detector| detector.total_events)
        .sum();

    eprintln!(
        "Processed {} events in {:.3} s ({:.0} events/s), {} snapshot(s) published",
        generated,
        elapsed.as_secs_f64(),
        generated as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        snapshot_count.load(Ordering::Relaxed)
    );
    if args.verbose {
        eprintln!("Accumulated {accumulated} of {generated} generated events");
    }
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
