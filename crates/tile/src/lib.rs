//! Terrain tile quadtree: LOD selection, streaming loads, render-data
//! inheritance and dormancy.
//!
//! # Invariants
//! - A tile has no children or exactly four; a partial set is never visible.
//! - Every inheritable pass of an ancestor has a same-uid pass in each
//!   descendant, with matrices composed through the quadrant scale/bias chain.
//! - Samplers past COLOR_PARENT are identical across the passes of one tile.
//! - Traversal (`&self`) never overlaps a merge or an eviction (`&mut self`).
//! - The live-tile registry never keeps a tile's data alive.

mod bindings;
mod context;
mod culler;
mod engine;
mod loader;
mod model;
mod options;
mod registry;
mod selection;
mod source;
mod surface;
mod tile;

pub use bindings::{RenderBindings, SamplerBinding};
pub use context::EngineContext;
pub use culler::{CullStats, CullVolume, DrawTile, TerrainCuller, TraversalMode};
pub use engine::{EngineError, TerrainEngine, UpdateStats};
pub use loader::{CompletedLoad, DispatchStats, LoadRequest, Loader, PriorityLoader, RequestState, load_priority};
pub use model::{DEFAULT_PASS_UID, RenderModel, RenderingPass, Sampler, SharedModel};
pub use options::{ConfigError, TerrainOptions};
pub use registry::LiveTiles;
pub use selection::{SelectionInfo, VisParameters};
pub use source::{ColorLayerModel, LoadError, PROCEDURAL_COLOR_UID, ProceduralSource, TerrainTileModel, TileDataSource};
pub use surface::{HeightfieldSurface, HeightfieldSurfaceFactory, Surface, SurfaceFactory};
pub use tile::{MIN_EXPIRY_FRAMES_FLOOR, TileNode};

pub fn crate_info() -> &'static str {
    "quadterra-tile v0.1.0"
}
