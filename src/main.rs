// src/main.rs

mod config;
mod features;
mod io;
mod overlay;
mod pipeline;
mod tracker;
mod types;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Multi-object tracker for bio-behavioral detection streams.
#[derive(Parser, Debug)]
#[command(name = "biotrack", version, about)]
struct Args {
    /// Location of the YAML parameters file
    #[arg(long)]
    params: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::Config::load(&args.params)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("biotrack={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🐛 Bio-behavioral Tracking Starting");
    info!("✓ Parameters loaded from {}", args.params.display());
    info!(
        "Tracking thresholds: move_distance={:.1}, max_move_distance={:.1}, min_active={}, max_inactive={}",
        config.tracking.move_distance,
        config.tracking.max_move_distance,
        config.tracking.min_active,
        config.tracking.max_inactive
    );

    let started = Instant::now();
    let stats = pipeline::run(&config)?;
    let elapsed = started.elapsed().as_secs_f64();

    info!("\n📊 Final Report:");
    info!("  Frames Processed: {}", stats.frames);
    info!("  Detection Rows In: {}", stats.rows_in);
    info!("  Rows Without Usable Landmarks: {}", stats.rows_skipped);
    info!("  Track Rows Out: {}", stats.rows_out);
    info!("  Tracks Spawned: {}", stats.tracks_spawned);
    info!("  Tracks Live at End: {}", stats.tracks_live);
    if elapsed > 0.0 {
        info!(
            "  Processing Speed: {:.1} frames/s",
            stats.frames as f64 / elapsed
        );
    }

    Ok(())
}
