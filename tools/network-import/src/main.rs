use anyhow::{bail, Context, Result};
use busnet_transit::spatial::DEFAULT_SRID;
use busnet_transit::{Crs, EngineConfig, MemoryStorage, TopologyEngine, DEFAULT_MAX_DISTANCE};
use clap::Parser;
use std::path::PathBuf;

mod input;
mod load;
mod output;

use input::read_network;
use load::load_network;
use output::write_network_geojson;

#[derive(Parser, Debug)]
#[command(
    name = "network-import",
    author,
    version,
    about = "Load a bus network from GeoJSON and audit its consistency",
    long_about = "Reads stops (Point features) and lines (LineString features listing their \
                  stop refs) from a GeoJSON FeatureCollection and replays them through the \
                  topology engine.\n\n\
                  Lines that reference unknown stops, or stops too far from their path, are \
                  reported and skipped. The loaded network is then audited; the tool exits \
                  with an error if any stored state disagrees with the derived state."
)]
struct Args {
    /// Input GeoJSON FeatureCollection
    #[arg(short, long)]
    input: PathBuf,

    /// Write the resulting network (with derived stop state) to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum distance between a stop and the path of a line serving it
    #[arg(long, default_value_t = DEFAULT_MAX_DISTANCE)]
    max_distance: f64,

    /// EPSG code of the input coordinates (must be a projected CRS)
    #[arg(long, default_value_t = DEFAULT_SRID)]
    srid: u32,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    log::info!("=== Bus Network Import ===");
    log::info!("Input: {}", args.input.display());

    if !args.input.exists() {
        bail!("Input file does not exist: {}", args.input.display());
    }

    let config = EngineConfig::default()
        .with_crs(Crs::new(args.srid))
        .with_max_distance(args.max_distance);
    let engine = TopologyEngine::with_config(MemoryStorage::new(), config)
        .context("Invalid engine configuration")?;
    log::info!(
        "CRS: {}, max stop distance: {}",
        engine.config().crs,
        engine.config().max_distance
    );

    // Phase 1: Parse features
    log::info!("");
    log::info!("Phase 1: Reading features...");
    let network = read_network(&args.input)?;
    log::info!(
        "  {} stops, {} lines, {} features skipped",
        network.stops.len(),
        network.lines.len(),
        network.skipped
    );

    // Phase 2: Replay through the engine
    log::info!("");
    log::info!("Phase 2: Building topology...");
    let stats = load_network(&engine, network)?;

    // Phase 3: Audit
    log::info!("");
    log::info!("Phase 3: Auditing network...");
    let report = engine.audit().context("Audit failed")?;
    log::info!(
        "  {} stops, {} lines, {} associations checked",
        report.stops,
        report.lines,
        report.associations
    );

    let stops = engine.stops().context("Failed to read stops")?;
    let active = stops.iter().filter(|stop| stop.active).count();
    let locked = stops.iter().filter(|stop| stop.locked).count();
    log::info!("  {} active stops, {} locked (line endpoints)", active, locked);

    // Phase 4: Optional output
    if let Some(output_path) = &args.output {
        log::info!("");
        log::info!("Phase 4: Writing output...");
        write_network_geojson(&engine, output_path).context("Failed to write network GeoJSON")?;
    }

    // Summary
    log::info!("");
    stats.log_summary();
    log::info!("");

    if !report.is_clean() {
        for violation in &report.violations {
            log::error!("  {}", violation);
        }
        bail!("Audit found {} violations", report.violations.len());
    }

    log::info!("Done!");

    Ok(())
}
