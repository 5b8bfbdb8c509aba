use std::sync::Arc;
use std::time::{Duration, Instant};

use quadterra_common::{FrameStamp, Profile, TileKey};

use crate::context::EngineContext;
use crate::culler::TerrainCuller;
use crate::loader::PriorityLoader;
use crate::options::{ConfigError, TerrainOptions};
use crate::source::TileDataSource;
use crate::surface::{HeightfieldSurfaceFactory, SurfaceFactory};
use crate::tile::TileNode;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start loader workers: {0}")]
    Loader(#[from] std::io::Error),
}

/// Work done by one [`TerrainEngine::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub dispatched: usize,
    pub deferred: usize,
    pub merged: usize,
    /// Finished loads whose tile was evicted (or replaced) meanwhile.
    pub dropped: usize,
    pub failed: usize,
    pub stitched_pixels: usize,
    /// Sibling groups removed.
    pub expired: usize,
    pub live_tiles: usize,
    pub frame_time: Duration,
}

/// Owns the root tiles of a profile and drives loading, merging and
/// expiry at the per-frame synchronization point.
///
/// `cull` takes `&self` and may run from several threads; `update` takes
/// `&mut self`, so merges never overlap a traversal.
pub struct TerrainEngine {
    context: Arc<EngineContext>,
    loader: Arc<PriorityLoader>,
    roots: Vec<TileNode>,
}

impl TerrainEngine {
    pub fn new(
        options: TerrainOptions,
        profile: Profile,
        source: Arc<dyn TileDataSource>,
    ) -> Result<Self, EngineError> {
        Self::with_surfaces(options, profile, source, Box::new(HeightfieldSurfaceFactory))
    }

    pub fn with_surfaces(
        options: TerrainOptions,
        profile: Profile,
        source: Arc<dyn TileDataSource>,
        surfaces: Box<dyn SurfaceFactory>,
    ) -> Result<Self, EngineError> {
        options.validate()?;
        if options.max_lod > profile.max_lod() {
            return Err(ConfigError::Invalid {
                field: "max_lod",
                reason: format!("this profile supports at most {}", profile.max_lod()),
            }
            .into());
        }
        let loader = Arc::new(PriorityLoader::new(
            Arc::clone(&source),
            options.loader_threads,
            options.max_loads_per_frame,
        )?);
        let context = Arc::new(EngineContext::new(options, profile, surfaces, loader.clone(), source));
        let frame = FrameStamp::default();
        let roots = context
            .profile
            .root_keys()
            .into_iter()
            .map(|key| TileNode::new_root(key, Arc::clone(&context), frame))
            .collect();
        Ok(Self {
            context,
            loader,
            roots,
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn options(&self) -> &TerrainOptions {
        &self.context.options
    }

    pub fn roots(&self) -> &[TileNode] {
        &self.roots
    }

    pub fn loader(&self) -> &PriorityLoader {
        &self.loader
    }

    /// Select tiles for one view. Safe to call concurrently with other
    /// culls, one culler per thread.
    pub fn cull(&self, culler: &mut TerrainCuller<'_>) {
        for root in &self.roots {
            root.accept(culler);
        }
        tracing::trace!(
            frame = culler.frame.frame_number,
            drawn = culler.draws.len(),
            visited = culler.stats.visited,
            loads = culler.stats.load_requests,
            "cull"
        );
    }

    /// The synchronization point: start queued loads, merge finished ones,
    /// re-stitch edges and expire dormant sibling groups.
    pub fn update(&mut self, frame: FrameStamp) -> UpdateStats {
        let _span = tracing::info_span!("terrain_update", frame = frame.frame_number).entered();
        let start = Instant::now();
        let mut stats = UpdateStats::default();

        let dispatch = self.loader.dispatch();
        stats.dispatched = dispatch.dispatched;
        stats.deferred = dispatch.deferred;

        for done in self.loader.drain() {
            let key = done.request.key();
            let Some(tile) = self.find_mut(&key) else {
                tracing::debug!(%key, "dropping load for evicted tile");
                stats.dropped += 1;
                continue;
            };
            if !tile
                .load_request()
                .is_some_and(|r| Arc::ptr_eq(r, &done.request))
            {
                tracing::debug!(%key, "dropping load for replaced tile");
                stats.dropped += 1;
                continue;
            }
            match tile.apply_load(done.result) {
                Ok(()) => stats.merged += 1,
                Err(err) => {
                    tracing::warn!(%key, %err, "tile load failed");
                    stats.failed += 1;
                }
            }
        }

        let arrivals = self.context.live_tiles.take_arrivals();
        if self.context.options.normalize_edges {
            for key in arrivals {
                if let Some(tile) = self.find(&key) {
                    stats.stitched_pixels += tile.update_normal_map();
                }
            }
        }

        stats.expired = self.expire_dormant(frame);
        stats.live_tiles = self.context.live_tiles.len();
        stats.frame_time = start.elapsed();
        tracing::debug!(
            merged = stats.merged,
            expired = stats.expired,
            live = stats.live_tiles,
            "update"
        );
        stats
    }

    /// Remove dormant sibling groups, shallowest first, up to the
    /// per-frame cap. Returns the number of groups removed.
    pub fn expire_dormant(&mut self, now: FrameStamp) -> usize {
        let mut budget = self.context.options.expire_per_frame;
        let mut expired = 0;
        for root in &mut self.roots {
            expired += expire(root, now, &mut budget);
        }
        expired
    }

    pub fn find(&self, key: &TileKey) -> Option<&TileNode> {
        self.roots.iter().find_map(|root| root.find(key))
    }

    pub fn find_mut(&mut self, key: &TileKey) -> Option<&mut TileNode> {
        self.roots.iter_mut().find_map(|root| root.find_mut(key))
    }

    /// Number of tiles in the tree.
    pub fn tile_count(&self) -> usize {
        let mut count = 0;
        for root in &self.roots {
            root.visit(&mut |_| count += 1);
        }
        count
    }
}

fn expire(tile: &mut TileNode, now: FrameStamp, budget: &mut usize) -> usize {
    if *budget == 0 {
        return 0;
    }
    if tile.are_sub_tiles_dormant(now) {
        tile.remove_sub_tiles();
        *budget -= 1;
        return 1;
    }
    let mut expired = 0;
    if let Some(children) = tile.children_mut() {
        for child in children.iter_mut() {
            expired += expire(child, now, budget);
        }
    }
    expired
}

impl std::fmt::Debug for TerrainEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainEngine")
            .field("roots", &self.roots.len())
            .field("live_tiles", &self.context.live_tiles.len())
            .field("loader", &self.loader)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use quadterra_common::Extent;

    use crate::source::{LoadError, ProceduralSource, TerrainTileModel};

    fn options() -> TerrainOptions {
        TerrainOptions {
            max_lod: 3,
            lod0_visibility_range: 16.0,
            loader_threads: 0,
            max_loads_per_frame: 64,
            ..TerrainOptions::default()
        }
    }

    fn engine(options: TerrainOptions) -> TerrainEngine {
        let profile = Profile::square(16.0).unwrap();
        let source = Arc::new(ProceduralSource::new(profile.clone(), 5));
        TerrainEngine::new(options, profile, source).unwrap()
    }

    fn frame(n: u64) -> FrameStamp {
        FrameStamp::new(n, n as f64 * 0.1)
    }

    fn cull(engine: &TerrainEngine, eye: Vec3, n: u64) -> TerrainCuller<'static> {
        let mut culler = TerrainCuller::new(eye, frame(n));
        engine.cull(&mut culler);
        culler
    }

    #[test]
    fn rejects_invalid_options() {
        let profile = Profile::square(1.0).unwrap();
        let source = Arc::new(ProceduralSource::new(profile.clone(), 5));
        let bad = TerrainOptions {
            tile_size: 0,
            ..TerrainOptions::default()
        };
        assert!(matches!(
            TerrainEngine::new(bad, profile, source),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn rejects_max_lod_beyond_profile() {
        let profile = Profile::new(Extent::new(0.0, 0.0, 5.0, 1.0), 5, 1).unwrap();
        let source = Arc::new(ProceduralSource::new(profile.clone(), 5));
        let deep = TerrainOptions {
            max_lod: 30,
            ..options()
        };
        let err = TerrainEngine::new(deep, profile.clone(), source.clone()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::Invalid { field: "max_lod", .. })
        ));

        let deepest = TerrainOptions {
            max_lod: 29,
            ..options()
        };
        let engine = TerrainEngine::new(deepest, profile, source).unwrap();
        assert_eq!(engine.roots().len(), 5);
    }

    #[test]
    fn one_root_per_profile_tile() {
        let source = Arc::new(ProceduralSource::new(Profile::global_geodetic(), 5));
        let engine = TerrainEngine::new(options(), Profile::global_geodetic(), source).unwrap();
        assert_eq!(engine.roots().len(), 2);
        assert_eq!(engine.tile_count(), 2);
    }

    #[test]
    fn loads_merge_at_update() {
        let mut engine = engine(options());
        let far = Vec3::new(0.0, 0.0, 1000.0);
        cull(&engine, far, 1);
        let stats = engine.update(frame(1));
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.merged, 1);
        assert!(!engine.roots()[0].is_dirty());

        // Clean tiles stop asking.
        let culler = cull(&engine, far, 2);
        assert_eq!(culler.stats.load_requests, 0);
    }

    #[test]
    fn descending_camera_refines_then_expires() {
        let mut engine = engine(options());
        let low = Vec3::new(1.0, 1.0, 0.5);
        let mut n = 1;
        for _ in 0..12 {
            cull(&engine, low, n);
            engine.update(frame(n));
            n += 1;
        }
        assert!(engine.find(&TileKey::new(3, 4, 3)).is_some());
        let deep = engine.tile_count();
        assert!(deep > 5);

        // Fly away; everything below the root goes dormant.
        let far = Vec3::new(0.0, 0.0, 1000.0);
        let mut expired = 0;
        for _ in 0..8 {
            cull(&engine, far, n);
            expired += engine.update(frame(n)).expired;
            n += 1;
        }
        assert!(expired >= 1);
        assert_eq!(engine.tile_count(), 1);
        assert_eq!(engine.context().live_tiles.len(), 1);
    }

    #[test]
    fn expiry_respects_per_frame_cap() {
        let mut engine = engine(TerrainOptions {
            expire_per_frame: 1,
            ..options()
        });
        let root = &engine.roots()[0];
        root.load_children(frame(0)).unwrap();
        for child in root.children().unwrap() {
            child.load_children(frame(0)).unwrap();
        }
        assert_eq!(engine.tile_count(), 21);

        // Keep the LOD-1 tiles fresh; their four child groups are dormant.
        let mut culler = TerrainCuller::new(Vec3::new(0.0, 0.0, 1000.0), frame(10));
        for child in engine.roots()[0].children().unwrap() {
            child.accept(&mut culler);
        }
        assert_eq!(engine.expire_dormant(frame(10)), 1);
        assert_eq!(engine.tile_count(), 17);
        assert_eq!(engine.expire_dormant(frame(10)), 1);
        assert_eq!(engine.tile_count(), 13);
    }

    #[test]
    fn load_for_evicted_tile_is_dropped() {
        let mut engine = engine(options());
        // Close enough for LOD 1 (range 8) but not LOD 2 (range 4).
        let eye = Vec3::new(0.0, 0.0, 6.0);
        cull(&engine, eye, 1);
        let culler = cull(&engine, eye, 2);
        assert_eq!(culler.stats.load_requests, 5);

        engine.roots[0].remove_sub_tiles();
        let stats = engine.update(frame(3));
        assert_eq!(stats.dispatched, 5);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.dropped, 4);
        assert_eq!(stats.live_tiles, 1);
    }

    #[test]
    fn failed_loads_are_retried() {
        let profile = Profile::square(16.0).unwrap();
        let source = Arc::new(|_: &TileKey| -> Result<TerrainTileModel, LoadError> {
            Err(LoadError::Source("offline".into()))
        });
        let mut engine = TerrainEngine::new(options(), profile, source).unwrap();
        let far = Vec3::new(0.0, 0.0, 1000.0);
        cull(&engine, far, 1);
        assert_eq!(engine.update(frame(1)).failed, 1);
        assert!(engine.roots()[0].is_dirty());
        let culler = cull(&engine, far, 2);
        assert_eq!(culler.stats.load_requests, 1);
    }

    #[test]
    fn parallel_culls_share_the_tree() {
        let mut engine = engine(options());
        let eyes = [Vec3::new(-4.0, 4.0, 0.5), Vec3::new(4.0, -4.0, 0.5)];
        for n in 1..6 {
            std::thread::scope(|s| {
                for eye in eyes {
                    let engine = &engine;
                    s.spawn(move || cull(engine, eye, n));
                }
            });
            engine.update(frame(n));
        }
        assert!(engine.find(&TileKey::new(2, 0, 0)).is_some());
        assert!(engine.find(&TileKey::new(2, 3, 3)).is_some());
    }

    #[test]
    fn edges_stitch_when_enabled() {
        let mut engine = engine(TerrainOptions {
            normalize_edges: true,
            ..options()
        });
        engine.roots()[0].load_children(frame(0)).unwrap();
        let stats = engine.update(frame(1));
        assert!(stats.stitched_pixels > 0);
    }
}
