use std::sync::Arc;

use quadterra_common::Profile;

use crate::bindings::RenderBindings;
use crate::loader::Loader;
use crate::options::TerrainOptions;
use crate::registry::LiveTiles;
use crate::selection::SelectionInfo;
use crate::source::TileDataSource;
use crate::surface::SurfaceFactory;

/// Everything a tile needs from the engine that owns it. Shared read-only
/// by every tile; interior state (registry, loader) is synchronized.
pub struct EngineContext {
    pub options: TerrainOptions,
    pub profile: Profile,
    pub selection: SelectionInfo,
    pub bindings: RenderBindings,
    pub live_tiles: LiveTiles,
    pub surfaces: Box<dyn SurfaceFactory>,
    pub loader: Arc<dyn Loader>,
    pub source: Arc<dyn TileDataSource>,
}

impl EngineContext {
    pub fn new(
        options: TerrainOptions,
        profile: Profile,
        surfaces: Box<dyn SurfaceFactory>,
        loader: Arc<dyn Loader>,
        source: Arc<dyn TileDataSource>,
    ) -> Self {
        let selection = SelectionInfo::new(
            options.num_lods(),
            options.lod0_visibility_range,
            options.morph_start_ratio,
        );
        let bindings = RenderBindings::new(options.shared_layers);
        Self {
            options,
            profile,
            selection,
            bindings,
            live_tiles: LiveTiles::new(),
            surfaces,
            loader,
            source,
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("options", &self.options)
            .field("profile", &self.profile)
            .field("live_tiles", &self.live_tiles.len())
            .finish_non_exhaustive()
    }
}
