use glam::{Vec2, Vec3, Vec4};
use quadterra_common::{BoundingSphere, FrameStamp, TileKey};

use crate::model::RenderingPass;

/// How a traversal treats the tiles it reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraversalMode {
    /// Normal LOD selection: may subdivide and request loads.
    #[default]
    Cull,
    /// Replays the tiles drawn by the last cull without changing the tree
    /// (shadow or reflection passes).
    Stealth,
}

/// View-volume test supplied by the host.
pub trait CullVolume: Send + Sync {
    fn is_culled(&self, bound: &BoundingSphere) -> bool;
}

impl<F> CullVolume for F
where
    F: Fn(&BoundingSphere) -> bool + Send + Sync,
{
    fn is_culled(&self, bound: &BoundingSphere) -> bool {
        self(bound)
    }
}

/// One tile selected for drawing this frame.
#[derive(Debug, Clone)]
pub struct DrawTile {
    pub key: TileKey,
    pub key_value: Vec4,
    pub morph_constants: Vec2,
    pub bound: BoundingSphere,
    pub passes: Vec<RenderingPass>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    pub visited: usize,
    pub culled: usize,
    pub subdivided: usize,
    pub load_requests: usize,
}

/// Per-traversal state: the viewpoint, frame stamp and collected output.
/// One culler belongs to one traversal thread.
pub struct TerrainCuller<'a> {
    pub viewpoint: Vec3,
    pub lod_scale: f32,
    pub frame: FrameStamp,
    pub mode: TraversalMode,
    /// The camera borrows another camera's LOD selection and must not
    /// change the tree.
    pub inherit_viewpoint: bool,
    volume: Option<&'a dyn CullVolume>,
    pub draws: Vec<DrawTile>,
    pub stats: CullStats,
}

impl<'a> TerrainCuller<'a> {
    pub fn new(viewpoint: Vec3, frame: FrameStamp) -> Self {
        Self {
            viewpoint,
            lod_scale: 1.0,
            frame,
            mode: TraversalMode::Cull,
            inherit_viewpoint: false,
            volume: None,
            draws: Vec::new(),
            stats: CullStats::default(),
        }
    }

    pub fn with_mode(mut self, mode: TraversalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_lod_scale(mut self, lod_scale: f32) -> Self {
        self.lod_scale = lod_scale;
        self
    }

    pub fn with_volume(mut self, volume: &'a dyn CullVolume) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn inheriting_viewpoint(mut self) -> Self {
        self.inherit_viewpoint = true;
        self
    }

    pub fn is_culled(&self, bound: &BoundingSphere) -> bool {
        self.volume.is_some_and(|v| v.is_culled(bound))
    }

    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.viewpoint.distance(point)
    }

    /// Keys drawn so far, in traversal order.
    pub fn drawn_keys(&self) -> Vec<TileKey> {
        self.draws.iter().map(|d| d.key).collect()
    }
}

impl std::fmt::Debug for TerrainCuller<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainCuller")
            .field("viewpoint", &self.viewpoint)
            .field("frame", &self.frame)
            .field("mode", &self.mode)
            .field("draws", &self.draws.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
