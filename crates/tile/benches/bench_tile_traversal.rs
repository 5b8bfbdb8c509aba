use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use quadterra_common::{FrameStamp, Profile};
use quadterra_tile::{ProceduralSource, TerrainCuller, TerrainEngine, TerrainOptions};

fn make_engine(max_lod: u32) -> TerrainEngine {
    let profile = Profile::square(10_000.0).expect("valid profile");
    let source = Arc::new(ProceduralSource::new(profile.clone(), 17));
    let options = TerrainOptions {
        max_lod,
        lod0_visibility_range: 20_000.0,
        loader_threads: 0,
        max_loads_per_frame: 256,
        ..TerrainOptions::default()
    };
    TerrainEngine::new(options, profile, source).expect("valid options")
}

/// Cull and update until the tree stops growing.
fn settle(engine: &mut TerrainEngine, eye: Vec3) -> u64 {
    let mut frame = FrameStamp::new(1, 0.0);
    let mut last = 0;
    loop {
        let mut culler = TerrainCuller::new(eye, frame);
        engine.cull(&mut culler);
        engine.update(frame);
        let count = engine.tile_count();
        if count == last {
            return frame.frame_number;
        }
        last = count;
        frame = frame.next(1.0 / 60.0);
    }
}

fn bench_cull(max_lod: u32, iterations: usize) {
    let mut engine = make_engine(max_lod);
    let eye = Vec3::new(120.0, -40.0, 50.0);
    let frames = settle(&mut engine, eye);

    let start = Instant::now();
    let mut drawn = 0;
    for i in 0..iterations {
        let mut culler = TerrainCuller::new(black_box(eye), FrameStamp::new(frames + i as u64, 0.0));
        engine.cull(&mut culler);
        drawn = culler.draws.len();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  cull (max_lod={max_lod}, {} tiles, {drawn} drawn, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}",
        engine.tile_count()
    );
}

fn bench_parallel_cull(max_lod: u32, views: usize, iterations: usize) {
    let mut engine = make_engine(max_lod);
    settle(&mut engine, Vec3::new(0.0, 0.0, 50.0));
    let eyes: Vec<Vec3> = (0..views)
        .map(|i| Vec3::new(i as f32 * 300.0 - 600.0, 200.0, 50.0))
        .collect();

    let start = Instant::now();
    for i in 0..iterations {
        let frame = FrameStamp::new(1_000 + i as u64, 0.0);
        std::thread::scope(|s| {
            for &eye in &eyes {
                let engine = &engine;
                s.spawn(move || {
                    let mut culler = TerrainCuller::new(eye, frame);
                    engine.cull(&mut culler);
                    black_box(culler.draws.len())
                });
            }
        });
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  parallel cull ({views} views, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_descent(max_lod: u32) {
    let mut engine = make_engine(max_lod);
    let start = Instant::now();
    let frames = settle(&mut engine, Vec3::new(0.0, 0.0, 10.0));
    let elapsed = start.elapsed();
    println!(
        "  descent (max_lod={max_lod}): {} tiles after {frames} frames, total {elapsed:?}",
        engine.tile_count()
    );
}

fn main() {
    println!("=== Tile Traversal Benchmarks ===\n");

    println!("[Cull]");
    bench_cull(8, 200);
    bench_cull(12, 100);

    println!("\n[Parallel cull]");
    bench_parallel_cull(10, 4, 50);

    println!("\n[Descent]");
    bench_descent(10);
    bench_descent(14);

    println!("\nDone.");
}
