use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use quadterra_common::{FrameStamp, Profile};
use quadterra_render::{DebugTextRenderer, RenderView, Renderer, TopDownRenderer};
use quadterra_tile::{ProceduralSource, TerrainCuller, TerrainEngine, TerrainOptions, UpdateStats};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quadterra-cli", about = "CLI tool for the quadterra terrain engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Fly a camera across procedural terrain and report the tile tree
    Fly {
        /// Number of frames to simulate
        #[arg(short, long, default_value = "120")]
        frames: u64,
        /// Starting camera height; the camera descends to a tenth of it
        #[arg(short, long, default_value = "5000")]
        altitude: f32,
        /// Side length of the square terrain
        #[arg(long, default_value = "100000")]
        extent: f64,
        /// Terrain options as JSON; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the deepest LOD from the config
        #[arg(long)]
        max_lod: Option<u32>,
        /// Override the loader worker count (0 loads inline)
        #[arg(long)]
        threads: Option<usize>,
        /// Stitch normal-map edges between neighbors
        #[arg(long)]
        normalize_edges: bool,
        /// Write a top-down PNG preview of the final frame
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
        /// Print the final draw list
        #[arg(long)]
        draws: bool,
    },
    /// Print the effective terrain options as JSON
    Config {
        /// Validate and echo this file instead of the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("quadterra-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", quadterra_common::crate_info());
            println!("tile: {}", quadterra_tile::crate_info());
            println!("render: {}", quadterra_render::crate_info());
        }
        Commands::Fly {
            frames,
            altitude,
            extent,
            config,
            max_lod,
            threads,
            normalize_edges,
            snapshot,
            draws,
        } => {
            let mut options = match &config {
                Some(path) => TerrainOptions::from_json_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => TerrainOptions {
                    lod0_visibility_range: extent as f32,
                    ..TerrainOptions::default()
                },
            };
            if let Some(max_lod) = max_lod {
                options.max_lod = max_lod;
            }
            if let Some(threads) = threads {
                options.loader_threads = threads;
            }
            options.normalize_edges |= normalize_edges;
            fly(options, frames, altitude, extent, snapshot, draws)?
        }
        Commands::Config { config, out } => {
            let options = match &config {
                Some(path) => TerrainOptions::from_json_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => TerrainOptions::default(),
            };
            options.validate()?;
            let json = options.to_json_pretty()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

fn fly(
    options: TerrainOptions,
    frames: u64,
    altitude: f32,
    extent: f64,
    snapshot: Option<PathBuf>,
    print_draws: bool,
) -> anyhow::Result<()> {
    let profile = Profile::square(extent)?;
    let source = Arc::new(ProceduralSource::new(profile.clone(), options.tile_size));
    let lod_scale = options.lod_scale;
    let mut engine = TerrainEngine::new(options, profile.clone(), source)?;

    println!("Fly-through: frames={frames}, altitude={altitude}, extent={extent}");

    // West to east across the middle of the terrain, descending.
    let half = (extent * 0.5) as f32;
    let mut frame = FrameStamp::new(1, 0.0);
    let mut eye = Vec3::new(-half, 0.0, altitude);
    let mut totals = UpdateStats::default();
    let mut last_draws = Vec::new();

    for i in 0..frames {
        let t = if frames > 1 { i as f32 / (frames - 1) as f32 } else { 0.0 };
        eye.x = -half + t * 2.0 * half;
        eye.z = altitude * (1.0 - 0.9 * t);

        let mut culler = TerrainCuller::new(eye, frame).with_lod_scale(lod_scale);
        engine.cull(&mut culler);
        let stats = engine.update(frame);

        totals.dispatched += stats.dispatched;
        totals.merged += stats.merged;
        totals.dropped += stats.dropped;
        totals.failed += stats.failed;
        totals.expired += stats.expired;
        totals.stitched_pixels += stats.stitched_pixels;

        if i % 30 == 0 {
            info!(
                frame = frame.frame_number,
                altitude = eye.z,
                drawn = culler.draws.len(),
                tiles = stats.live_tiles,
                merged = stats.merged,
                expired = stats.expired,
                "Fly-through progress"
            );
        }

        last_draws = culler.draws;
        frame = frame.next(1.0 / 60.0);
    }

    println!(
        "Tiles: live={}, drawn={}, deepest lod={}",
        engine.tile_count(),
        last_draws.len(),
        last_draws.iter().map(|d| d.key.lod()).max().unwrap_or(0)
    );
    println!(
        "Loads: dispatched={}, merged={}, dropped={}, failed={}",
        totals.dispatched, totals.merged, totals.dropped, totals.failed
    );
    println!(
        "Expired: {}, stitched pixels: {}",
        totals.expired, totals.stitched_pixels
    );

    let view = RenderView { eye, frame };
    if print_draws {
        print!("{}", DebugTextRenderer::new().render(&last_draws, &view));
    }
    if let Some(path) = snapshot {
        let image = TopDownRenderer::new(profile, 512).render(&last_draws, &view);
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Snapshot written to {}", path.display());
    }

    Ok(())
}
