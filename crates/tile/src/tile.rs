//! The quadtree node: subdivision, load submission, data inheritance,
//! dormancy and edge stitching.
//!
//! Traversal methods take `&self` and may run on several threads at once.
//! Methods that change render data or drop children take `&mut self` and
//! run at the engine's synchronization point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard};

use glam::{Mat4, Vec2, Vec3, Vec4};
use quadterra_common::{BoundingSphere, Edge, FrameStamp, TextureRef, TileKey, scale_bias};

use crate::bindings::{RenderBindings, SamplerBinding};
use crate::context::EngineContext;
use crate::culler::{DrawTile, TerrainCuller, TraversalMode};
use crate::loader::{LoadRequest, load_priority};
use crate::model::{DEFAULT_PASS_UID, RenderModel, Sampler, SharedModel, read_model, write_model};
use crate::source::{LoadError, TerrainTileModel};
use crate::surface::Surface;

/// Tiles are never dormant until this many frames have passed unvisited.
pub const MIN_EXPIRY_FRAMES_FLOOR: u64 = 3;

/// Stealth traversals replay a surface accepted within this many frames.
const STEALTH_FRAMES: u64 = 2;

const NEVER: u64 = u64::MAX;

pub struct TileNode {
    key: TileKey,
    context: Arc<EngineContext>,
    model: SharedModel,
    surface: Box<dyn Surface>,
    bound: BoundingSphere,
    key_value: Vec4,
    morph_constants: Vec2,
    /// Index is the child's quadrant. Set once, as a full group of four.
    children: OnceLock<Box<[TileNode; 4]>>,
    /// Guards child creation and load-request creation.
    create_lock: Mutex<()>,
    load_request: OnceLock<Arc<LoadRequest>>,
    dirty: bool,
    last_traversal_frame: AtomicU64,
    last_traversal_time: AtomicU64,
    last_accept_surface_frame: AtomicU64,
    min_expiry_frames: u64,
    min_expiry_time: f64,
}

impl TileNode {
    /// A LOD-0 tile carrying only the default pass.
    pub fn new_root(key: TileKey, context: Arc<EngineContext>, frame: FrameStamp) -> Self {
        Self::create(key, None, context, frame)
    }

    fn create(key: TileKey, parent: Option<&TileNode>, context: Arc<EngineContext>, frame: FrameStamp) -> Self {
        let bindings = &context.bindings;
        let mut surface = context.surfaces.create(&key, &context.profile);
        let mut model = RenderModel::new();

        match parent {
            Some(parent) => {
                let sb = scale_bias(key.quadrant());
                let parent_model = read_model(&parent.model);
                for parent_pass in parent_model.passes.iter().filter(|p| p.inheritable) {
                    let mut pass = parent_pass.clone();
                    pass.scale_bias(sb);
                    if bindings.is_active(SamplerBinding::COLOR_PARENT) {
                        if let Some(color) = pass.color().cloned() {
                            pass.set_sampler(SamplerBinding::COLOR_PARENT, color);
                        }
                    }
                    model.passes.push(pass);
                }
            }
            None => {
                model.add_pass(DEFAULT_PASS_UID, bindings.len());
            }
        }

        if bindings.is_active(SamplerBinding::ELEVATION) {
            let elevation = model
                .passes
                .iter()
                .filter_map(|p| p.elevation())
                .find_map(|s| s.texture.clone().map(|t| (t, s.matrix)));
            if let Some((raster, matrix)) = elevation {
                surface.set_elevation_raster(raster, matrix);
            }
        }

        let options = &context.options;
        let morph_constants = context.selection.vis_parameters(key.lod()).morph_constants();
        let mut tile = Self {
            key,
            key_value: key.encode(&context.profile),
            morph_constants,
            model: Arc::new(RwLock::new(model)),
            bound: surface.bound(),
            surface,
            children: OnceLock::new(),
            create_lock: Mutex::new(()),
            load_request: OnceLock::new(),
            dirty: true,
            last_traversal_frame: AtomicU64::new(frame.frame_number),
            last_traversal_time: AtomicU64::new(frame.reference_time.max(0.0).to_bits()),
            last_accept_surface_frame: AtomicU64::new(NEVER),
            min_expiry_frames: options.min_expiry_frames.unwrap_or(0),
            min_expiry_time: options.min_expiry_time.unwrap_or(0.0),
            context,
        };
        tile.dirty_bound();
        tile.context.live_tiles.add(key, &tile.model, &tile.context.profile);
        tile
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// True until the first merge.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn children_ready(&self) -> bool {
        self.children.get().is_some()
    }

    pub fn children(&self) -> Option<&[TileNode; 4]> {
        self.children.get().map(|c| &**c)
    }

    pub fn children_mut(&mut self) -> Option<&mut [TileNode; 4]> {
        self.children.get_mut().map(|c| &mut **c)
    }

    pub fn render_model(&self) -> RwLockReadGuard<'_, RenderModel> {
        read_model(&self.model)
    }

    pub fn surface(&self) -> &dyn Surface {
        &*self.surface
    }

    pub fn bound(&self) -> BoundingSphere {
        self.bound
    }

    /// `(x, flipped y, lod, extent)`; see [`TileKey::encode`].
    pub fn key_value(&self) -> Vec4 {
        self.key_value
    }

    pub fn morph_constants(&self) -> Vec2 {
        self.morph_constants
    }

    pub fn load_request(&self) -> Option<&Arc<LoadRequest>> {
        self.load_request.get()
    }

    pub fn last_traversal_frame(&self) -> u64 {
        self.last_traversal_frame.load(Ordering::Acquire)
    }

    pub fn last_traversal_time(&self) -> f64 {
        f64::from_bits(self.last_traversal_time.load(Ordering::Acquire))
    }

    /// Recompute the cached bound and the extent component of the key value.
    pub fn dirty_bound(&mut self) {
        self.bound = self.surface.bound();
        let size = self.surface.aligned_box().size();
        self.key_value.w = size.x.max(size.y);
    }

    /// Entry point for every traversal.
    pub fn accept(&self, culler: &mut TerrainCuller<'_>) -> bool {
        match culler.mode {
            TraversalMode::Cull => self.accept_cull(culler),
            TraversalMode::Stealth => self.cull_stealth(culler),
        }
    }

    fn accept_cull(&self, culler: &mut TerrainCuller<'_>) -> bool {
        self.touch(culler.frame);
        culler.stats.visited += 1;
        if culler.is_culled(&self.bound) {
            culler.stats.culled += 1;
            return false;
        }
        self.cull(culler)
    }

    /// Both stamps only move forward. Non-negative `f64` bit patterns
    /// order like the values, so the time takes `fetch_max` as well.
    fn touch(&self, frame: FrameStamp) {
        self.last_traversal_frame.fetch_max(frame.frame_number, Ordering::AcqRel);
        self.last_traversal_time
            .fetch_max(frame.reference_time.max(0.0).to_bits(), Ordering::AcqRel);
    }

    fn cull(&self, culler: &mut TerrainCuller<'_>) -> bool {
        if !self.surface.is_visible_from(culler.viewpoint) {
            return false;
        }

        let options = &self.context.options;
        let children_in_range = self.should_subdivide(culler.viewpoint, culler.lod_scale);
        let mut can_create = true;
        let mut can_load = true;
        if options.progressive && self.dirty {
            can_create = false;
        }
        if culler.inherit_viewpoint {
            can_create = false;
            can_load = false;
        }

        if children_in_range {
            match self.children.get() {
                Some(children) => {
                    for child in children.iter() {
                        child.accept(culler);
                    }
                }
                None if can_create => {
                    if self.create_children(culler.frame) {
                        culler.stats.subdivided += 1;
                        // Children start dirty; they load from the next frame.
                        can_load = false;
                        self.accept_surface(culler);
                    } else if let Some(children) = self.children.get() {
                        for child in children.iter() {
                            child.accept(culler);
                        }
                    }
                }
                None => self.accept_surface(culler),
            }
        } else {
            self.accept_surface(culler);
        }

        if self.dirty && can_load {
            self.load(culler);
        }
        true
    }

    fn cull_stealth(&self, culler: &mut TerrainCuller<'_>) -> bool {
        let frame = culler.frame.frame_number;
        let accepted = self.last_accept_surface_frame.load(Ordering::Acquire);
        if accepted != NEVER && frame.saturating_sub(accepted) < STEALTH_FRAMES {
            self.push_draw(culler);
            true
        } else if let Some(children) = self.children.get() {
            let mut visible = false;
            for child in children.iter() {
                visible |= child.accept(culler);
            }
            visible
        } else {
            false
        }
    }

    fn accept_surface(&self, culler: &mut TerrainCuller<'_>) {
        self.last_accept_surface_frame
            .store(culler.frame.frame_number, Ordering::Release);
        self.push_draw(culler);
    }

    fn push_draw(&self, culler: &mut TerrainCuller<'_>) {
        let passes = read_model(&self.model).passes.clone();
        culler.draws.push(DrawTile {
            key: self.key,
            key_value: self.key_value,
            morph_constants: self.morph_constants,
            bound: self.bound,
            passes,
        });
    }

    /// Whether the viewpoint is close enough to any child footprint to
    /// warrant the next LOD. Always false at the deepest LOD.
    pub fn should_subdivide(&self, viewpoint: Vec3, lod_scale: f32) -> bool {
        let selection = &self.context.selection;
        let lod = self.key.lod();
        if lod + 1 >= selection.num_lods() {
            return false;
        }
        let range2 = selection.vis_parameters(lod + 1).visibility_range2;
        self.surface
            .any_child_box_intersects_sphere(viewpoint, range2, lod_scale)
    }

    /// Create all four children unless another thread already did.
    /// Returns whether this call created them.
    pub(crate) fn create_children(&self, frame: FrameStamp) -> bool {
        let _guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.children.get().is_some() {
            return false;
        }
        let children = std::array::from_fn(|q| self.create_child(q as u32, frame));
        let created = self.children.set(Box::new(children)).is_ok();
        tracing::debug!(key = %self.key, "subdivided");
        created
    }

    fn create_child(&self, quadrant: u32, frame: FrameStamp) -> TileNode {
        TileNode::create(
            self.key.create_child_key(quadrant),
            Some(self),
            Arc::clone(&self.context),
            frame,
        )
    }

    fn request(&self) -> &Arc<LoadRequest> {
        if let Some(request) = self.load_request.get() {
            return request;
        }
        let _guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_request
            .get_or_init(|| Arc::new(LoadRequest::new(self.key)))
    }

    fn load(&self, culler: &mut TerrainCuller<'_>) {
        let request = self.request();
        let selection = &self.context.selection;
        let priority = load_priority(
            self.key.lod(),
            selection.num_lods(),
            culler.distance_to(self.bound.center),
            selection.visibility_range(0),
            self.context.options.high_resolution_first,
        );
        culler.stats.load_requests += 1;
        self.context
            .loader
            .load(request, priority, culler.frame.frame_number);
    }

    /// Fetch and merge this tile's data on the calling thread. A source
    /// with no data here leaves the tile clean and inheriting.
    pub fn load_sync(&mut self) -> Result<(), LoadError> {
        let source = Arc::clone(&self.context.source);
        self.apply_load(source.create_tile_model(&self.key))
    }

    /// Merge the outcome of a load.
    pub fn apply_load(&mut self, result: Result<TerrainTileModel, LoadError>) -> Result<(), LoadError> {
        let data = match result {
            Ok(data) => data,
            Err(LoadError::NoData(_)) => TerrainTileModel::default(),
            Err(err) => return Err(err),
        };
        let context = Arc::clone(&self.context);
        self.merge(&data, &context.bindings);
        Ok(())
    }

    /// Create the children (if absent) and load each one synchronously
    /// before publishing them. Returns whether children were created.
    pub fn load_children(&self, frame: FrameStamp) -> Result<bool, LoadError> {
        let _guard = self.create_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.children.get().is_some() {
            return Ok(false);
        }
        let mut children: [TileNode; 4] = std::array::from_fn(|q| self.create_child(q as u32, frame));
        for child in children.iter_mut() {
            child.load_sync()?;
        }
        Ok(self.children.set(Box::new(children)).is_ok())
    }

    /// Install freshly loaded data as this tile's own and push it down to
    /// any children still inheriting.
    pub fn merge(&mut self, data: &TerrainTileModel, bindings: &RenderBindings) {
        let slots = bindings.len();
        let mut elevation = None;
        let mut normal_installed = false;
        {
            let mut model = write_model(&self.model);

            if bindings.is_active(SamplerBinding::COLOR) {
                for layer in &data.color_layers {
                    let Some(texture) = &layer.texture else {
                        continue;
                    };
                    let pass = match model.pass_index(layer.uid) {
                        Some(index) => &mut model.passes[index],
                        None => {
                            let pass = model.add_pass(layer.uid, slots);
                            pass.inheritable = layer.inheritable;
                            // First appearance at this LOD: blend against itself.
                            pass.set_sampler(SamplerBinding::COLOR_PARENT, Sampler::authoritative(texture.clone()));
                            pass
                        }
                    };
                    pass.set_sampler(SamplerBinding::COLOR, Sampler::authoritative(texture.clone()));
                }
            }

            if bindings.is_active(SamplerBinding::ELEVATION) {
                if let Some(texture) = &data.elevation {
                    model.set_common_sampler(SamplerBinding::ELEVATION, &Sampler::authoritative(texture.clone()));
                    elevation = Some(texture.clone());
                }
            }

            if bindings.is_active(SamplerBinding::NORMAL) {
                if let Some(texture) = &data.normal {
                    model.set_common_sampler(SamplerBinding::NORMAL, &Sampler::authoritative(texture.clone()));
                    normal_installed = true;
                }
            }

            for (i, texture) in data.shared_layers.iter().enumerate() {
                let slot = SamplerBinding::SHARED + i;
                let Some(texture) = texture else {
                    continue;
                };
                if bindings.is_active(slot) {
                    model.set_common_sampler(slot, &Sampler::authoritative(texture.clone()));
                }
            }

            model.copy_common_samplers();
        }

        if elevation.is_some() {
            self.set_elevation_raster(elevation, Mat4::IDENTITY);
        }

        if let Some(children) = self.children.get_mut() {
            let parent = read_model(&self.model);
            for child in children.iter_mut() {
                child.refresh_inherited_data(&parent, bindings);
            }
        }

        self.dirty = false;
        self.dirty_bound();
        tracing::debug!(key = %self.key, "merged");

        if normal_installed {
            self.context.live_tiles.announce(self.key, &self.context.profile);
            self.update_normal_map();
        }
    }

    /// Re-derive every inherited sampler from the parent's model. Returns
    /// the number of samplers changed in this subtree; a tile with no
    /// changes does not recurse.
    pub fn refresh_inherited_data(&mut self, parent: &RenderModel, bindings: &RenderBindings) -> usize {
        let sb = scale_bias(self.key.quadrant());
        let blend_parent = bindings.is_active(SamplerBinding::COLOR_PARENT);
        let mut changes = 0;
        let mut inherited_elevation = None;
        {
            let mut model = write_model(&self.model);
            for parent_pass in parent.passes.iter().filter(|p| p.inheritable) {
                let Some(index) = model.pass_index(parent_pass.source_uid) else {
                    let mut pass = parent_pass.clone();
                    pass.scale_bias(sb);
                    model.passes.push(pass);
                    changes += 1;
                    continue;
                };

                let pass = &mut model.passes[index];
                for slot in 0..pass.samplers.len() {
                    let wanted = if slot == SamplerBinding::COLOR_PARENT && blend_parent {
                        match parent_pass.color() {
                            Some(color) if color.is_populated() => color.scale_biased(sb),
                            _ => pass.samplers[SamplerBinding::COLOR].clone(),
                        }
                    } else if pass.samplers[slot].is_inherited() {
                        match parent_pass.sampler(slot) {
                            Some(sampler) => sampler.scale_biased(sb),
                            None => continue,
                        }
                    } else {
                        continue;
                    };
                    if !pass.samplers[slot].same_as(&wanted) {
                        pass.samplers[slot] = wanted;
                        changes += 1;
                    }
                }
            }

            if changes > 0 {
                model.copy_common_samplers();
                if bindings.is_active(SamplerBinding::ELEVATION) {
                    inherited_elevation = model
                        .first_pass()
                        .and_then(|p| p.elevation())
                        .filter(|s| s.is_populated() && s.is_inherited())
                        .cloned();
                }
            }
        }

        if changes == 0 {
            return 0;
        }

        if let Some(sampler) = inherited_elevation {
            self.set_elevation_raster(sampler.texture, sampler.matrix);
        }
        self.dirty_bound();

        if let Some(children) = self.children.get_mut() {
            let parent = read_model(&self.model);
            for child in children.iter_mut() {
                changes += child.refresh_inherited_data(&parent, bindings);
            }
        }
        changes
    }

    /// Point the surface at a new elevation raster. A missing raster is
    /// logged and ignored.
    pub fn set_elevation_raster(&mut self, raster: Option<TextureRef>, matrix: Mat4) {
        let Some(raster) = raster else {
            tracing::warn!(key = %self.key, "ignoring missing elevation raster");
            return;
        };
        self.surface.set_elevation_raster(raster, matrix);
    }

    /// Copy the east and south neighbors' adjoining normal-map edges into
    /// this tile's own normal map. Best effort: any missing or borrowed
    /// normal map skips the stitch, and an east neighbor whose normal map
    /// cannot be stitched (size or format mismatch) skips both edges.
    /// Returns the number of pixels written.
    pub fn update_normal_map(&self) -> usize {
        if !self.context.options.normalize_edges {
            return 0;
        }
        let Some(own) = own_normal_map(&self.model) else {
            return 0;
        };
        let profile = &self.context.profile;
        let live = &self.context.live_tiles;
        let east = live.find(&self.key.create_neighbor_key(1, 0, profile));
        let south = live.find(&self.key.create_neighbor_key(0, 1, profile));
        let (Some(east), Some(south)) = (east, south) else {
            return 0;
        };

        let Some(east_normal) = own_normal_map(&east) else {
            return 0;
        };
        let mut written = own.copy_edge_from(&east_normal, Edge::East);
        if written == 0 {
            return 0;
        }
        let Some(south_normal) = own_normal_map(&south) else {
            return written;
        };
        written += own.copy_edge_from(&south_normal, Edge::South);
        if written > 0 {
            tracing::trace!(key = %self.key, written, "stitched normal map");
        }
        written
    }

    /// Unvisited for more than `max(min_expiry_frames, 3)` frames and more
    /// than `min_expiry_time` seconds.
    pub fn is_dormant(&self, now: FrameStamp) -> bool {
        let frames = now.frame_number.saturating_sub(self.last_traversal_frame());
        let seconds = now.reference_time - self.last_traversal_time();
        frames > self.min_expiry_frames.max(MIN_EXPIRY_FRAMES_FLOOR) && seconds > self.min_expiry_time
    }

    /// True only when all four children exist and are dormant together.
    pub fn are_sub_tiles_dormant(&self, now: FrameStamp) -> bool {
        self.children
            .get()
            .is_some_and(|children| children.iter().all(|c| c.is_dormant(now)))
    }

    /// Drop the whole child subtree, releasing its graphics resources.
    pub fn remove_sub_tiles(&mut self) {
        if let Some(mut children) = self.children.take() {
            for child in children.iter_mut() {
                child.release_graphics_resources();
            }
            tracing::debug!(key = %self.key, "collapsed");
        }
    }

    pub fn release_graphics_resources(&mut self) {
        read_model(&self.model).release_graphics_resources();
        self.surface.release_graphics_resources();
        if let Some(children) = self.children.get_mut() {
            for child in children.iter_mut() {
                child.release_graphics_resources();
            }
        }
    }

    /// Pre-order walk over this tile and its descendants.
    pub fn visit<F: FnMut(&TileNode)>(&self, f: &mut F) {
        f(self);
        if let Some(children) = self.children.get() {
            for child in children.iter() {
                child.visit(f);
            }
        }
    }

    /// Pre-order walk with mutable access.
    pub fn visit_mut<F: FnMut(&mut TileNode)>(&mut self, f: &mut F) {
        f(self);
        if let Some(children) = self.children.get_mut() {
            for child in children.iter_mut() {
                child.visit_mut(f);
            }
        }
    }

    /// The descendant (or self) with the given key, if it exists.
    pub fn find(&self, key: &TileKey) -> Option<&TileNode> {
        if key.ancestor_at(self.key.lod())? != self.key {
            return None;
        }
        let mut node = self;
        while node.key.lod() < key.lod() {
            let next = key.ancestor_at(node.key.lod() + 1)?;
            node = &node.children.get()?[next.quadrant() as usize];
        }
        Some(node)
    }

    pub fn find_mut(&mut self, key: &TileKey) -> Option<&mut TileNode> {
        if key.ancestor_at(self.key.lod())? != self.key {
            return None;
        }
        let mut node = self;
        while node.key.lod() < key.lod() {
            let next = key.ancestor_at(node.key.lod() + 1)?;
            node = &mut node.children.get_mut()?[next.quadrant() as usize];
        }
        Some(node)
    }
}

fn own_normal_map(model: &RwLock<RenderModel>) -> Option<TextureRef> {
    read_model(model)
        .first_pass()
        .and_then(|p| p.normal())
        .filter(|s| s.is_self_authoritative())
        .and_then(|s| s.texture.clone())
}

impl Drop for TileNode {
    fn drop(&mut self) {
        self.context.live_tiles.remove(&self.key, &self.model);
    }
}

impl std::fmt::Debug for TileNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileNode")
            .field("key", &self.key)
            .field("dirty", &self.dirty)
            .field("children_ready", &self.children_ready())
            .field("last_traversal_frame", &self.last_traversal_frame())
            .finish_non_exhaustive()
    }
}
