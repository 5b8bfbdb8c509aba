use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::Mat4;
use quadterra_common::TextureRef;

use crate::bindings::SamplerBinding;

/// Source id of the pass every tile carries even without data layers.
pub const DEFAULT_PASS_UID: i32 = -1;

/// A texture plus the matrix mapping this tile's UV space into it.
///
/// An identity matrix with a texture means the tile owns the data; any
/// other matrix means the data is borrowed from an ancestor.
#[derive(Debug, Clone)]
pub struct Sampler {
    pub texture: Option<TextureRef>,
    pub matrix: Mat4,
}

impl Sampler {
    /// A sampler holding this tile's own data.
    pub fn authoritative(texture: TextureRef) -> Self {
        Self {
            texture: Some(texture),
            matrix: Mat4::IDENTITY,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.texture.is_some()
    }

    pub fn is_self_authoritative(&self) -> bool {
        self.texture.is_some() && self.matrix == Mat4::IDENTITY
    }

    /// Empty or borrowed: inheritance may overwrite it.
    pub fn is_inherited(&self) -> bool {
        !self.is_self_authoritative()
    }

    /// Same texture handle (by identity) and same matrix.
    pub fn same_as(&self, other: &Sampler) -> bool {
        same_texture(&self.texture, &other.texture) && self.matrix == other.matrix
    }

    /// A copy of this sampler composed with a quadrant scale/bias matrix.
    pub fn scale_biased(&self, scale_bias: Mat4) -> Sampler {
        Sampler {
            texture: self.texture.clone(),
            matrix: self.matrix * scale_bias,
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            texture: None,
            matrix: Mat4::IDENTITY,
        }
    }
}

pub(crate) fn same_texture(a: &Option<TextureRef>, b: &Option<TextureRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// One data layer's contribution to a tile.
#[derive(Debug, Clone)]
pub struct RenderingPass {
    pub source_uid: i32,
    /// One-shot passes are not copied into children.
    pub inheritable: bool,
    /// Indexed by [`SamplerBinding`] slot.
    pub samplers: Vec<Sampler>,
}

impl RenderingPass {
    pub fn new(source_uid: i32, slots: usize) -> Self {
        Self {
            source_uid,
            inheritable: true,
            samplers: vec![Sampler::default(); slots],
        }
    }

    pub fn sampler(&self, slot: usize) -> Option<&Sampler> {
        self.samplers.get(slot)
    }

    pub fn color(&self) -> Option<&Sampler> {
        self.sampler(SamplerBinding::COLOR)
    }

    pub fn elevation(&self) -> Option<&Sampler> {
        self.sampler(SamplerBinding::ELEVATION)
    }

    pub fn normal(&self) -> Option<&Sampler> {
        self.sampler(SamplerBinding::NORMAL)
    }

    /// Replace a slot's sampler; slots beyond the table are ignored.
    pub fn set_sampler(&mut self, slot: usize, sampler: Sampler) {
        if let Some(s) = self.samplers.get_mut(slot) {
            *s = sampler;
        }
    }

    /// Compose every sampler matrix with a quadrant scale/bias matrix.
    pub fn scale_bias(&mut self, scale_bias: Mat4) {
        for sampler in &mut self.samplers {
            sampler.matrix *= scale_bias;
        }
    }
}

/// Ordered passes of one tile. Order is arrival order of the data layers
/// and is visually significant: later passes composite over earlier ones.
#[derive(Debug, Clone, Default)]
pub struct RenderModel {
    pub passes: Vec<RenderingPass>,
}

impl RenderModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, source_uid: i32, slots: usize) -> &mut RenderingPass {
        self.passes.push(RenderingPass::new(source_uid, slots));
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    pub fn pass_index(&self, source_uid: i32) -> Option<usize> {
        self.passes.iter().position(|p| p.source_uid == source_uid)
    }

    pub fn get_pass(&self, source_uid: i32) -> Option<&RenderingPass> {
        self.passes.iter().find(|p| p.source_uid == source_uid)
    }

    pub fn get_pass_mut(&mut self, source_uid: i32) -> Option<&mut RenderingPass> {
        self.passes.iter_mut().find(|p| p.source_uid == source_uid)
    }

    pub fn first_pass(&self) -> Option<&RenderingPass> {
        self.passes.first()
    }

    /// Install one sampler into the given slot of every pass.
    pub fn set_common_sampler(&mut self, slot: usize, sampler: &Sampler) {
        for pass in &mut self.passes {
            pass.set_sampler(slot, sampler.clone());
        }
    }

    /// Make every slot past COLOR_PARENT identical to the first pass's, so
    /// the tile has one elevation/normal/shared state whatever the color layer.
    pub fn copy_common_samplers(&mut self) {
        let Some((first, rest)) = self.passes.split_first_mut() else {
            return;
        };
        for pass in rest {
            for slot in (SamplerBinding::COLOR_PARENT + 1)..pass.samplers.len() {
                if let Some(sampler) = first.samplers.get(slot) {
                    pass.samplers[slot] = sampler.clone();
                }
            }
        }
    }

    /// Every texture referenced by any pass (duplicates included).
    pub fn textures(&self) -> impl Iterator<Item = &TextureRef> {
        self.passes
            .iter()
            .flat_map(|p| p.samplers.iter())
            .filter_map(|s| s.texture.as_ref())
    }

    /// Release the textures this tile owns. Borrowed textures belong to an
    /// ancestor and stay resident.
    pub fn release_graphics_resources(&self) {
        let owned = self
            .passes
            .iter()
            .flat_map(|p| p.samplers.iter())
            .filter(|s| s.is_self_authoritative())
            .filter_map(|s| s.texture.as_ref());
        for texture in owned {
            texture.release();
        }
    }
}

/// Render model shared with the live-tile registry through weak handles.
pub type SharedModel = Arc<RwLock<RenderModel>>;

pub(crate) fn read_model(model: &RwLock<RenderModel>) -> RwLockReadGuard<'_, RenderModel> {
    model.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_model(model: &RwLock<RenderModel>) -> RwLockWriteGuard<'_, RenderModel> {
    model.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use quadterra_common::{Texture, scale_bias};

    fn tex() -> TextureRef {
        Texture::color(RgbaImage::new(2, 2))
    }

    #[test]
    fn authority_depends_on_texture_and_matrix() {
        let s = Sampler::authoritative(tex());
        assert!(s.is_self_authoritative());
        assert!(!s.scale_biased(scale_bias(1)).is_self_authoritative());
        assert!(Sampler::default().is_inherited());
    }

    #[test]
    fn same_as_compares_handles_not_pixels() {
        let a = Sampler::authoritative(tex());
        let b = Sampler::authoritative(tex());
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn pass_lookup_by_uid() {
        let mut m = RenderModel::new();
        m.add_pass(DEFAULT_PASS_UID, 4);
        m.add_pass(7, 4);
        assert_eq!(m.pass_index(7), Some(1));
        assert!(m.get_pass(3).is_none());
    }

    #[test]
    fn copy_common_leaves_color_slots_alone() {
        let mut m = RenderModel::new();
        m.add_pass(1, 5);
        m.add_pass(2, 5);
        let elevation = Sampler::authoritative(tex());
        let color = Sampler::authoritative(tex());
        m.passes[0].set_sampler(SamplerBinding::ELEVATION, elevation.clone());
        m.passes[0].set_sampler(SamplerBinding::SHARED, elevation.clone());
        m.passes[1].set_sampler(SamplerBinding::COLOR, color.clone());

        m.copy_common_samplers();

        let second = &m.passes[1];
        assert!(second.elevation().unwrap().same_as(&elevation));
        assert!(second.sampler(SamplerBinding::SHARED).unwrap().same_as(&elevation));
        assert!(second.color().unwrap().same_as(&color));
    }

    #[test]
    fn set_sampler_ignores_missing_slot() {
        let mut pass = RenderingPass::new(1, 4);
        pass.set_sampler(9, Sampler::authoritative(tex()));
        assert_eq!(pass.samplers.len(), 4);
    }

    #[test]
    fn release_clears_residency() {
        let t = tex();
        t.mark_resident();
        let mut m = RenderModel::new();
        m.add_pass(1, 4).set_sampler(SamplerBinding::COLOR, Sampler::authoritative(t.clone()));
        m.release_graphics_resources();
        assert!(!t.is_resident());
    }

    #[test]
    fn release_keeps_borrowed_textures() {
        let t = tex();
        t.mark_resident();
        let mut m = RenderModel::new();
        let borrowed = Sampler::authoritative(t.clone()).scale_biased(scale_bias(2));
        m.add_pass(1, 4).set_sampler(SamplerBinding::COLOR, borrowed);
        m.release_graphics_resources();
        assert!(t.is_resident());
    }
}
