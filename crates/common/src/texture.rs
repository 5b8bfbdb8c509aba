//! Shared raster handles.
//!
//! A [`Texture`] is published once and then shared by every sampler that
//! references it, across tiles and threads. Pixel contents are treated as
//! immutable after publication; the single exception is normal-map edge
//! stitching ([`Texture::copy_edge_from`]), which only runs at the engine's
//! synchronization point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use image::{ImageBuffer, Luma, RgbaImage};

/// Single-channel floating point heightfield.
pub type HeightImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Shared handle; lifetime is that of the longest holder.
pub type TextureRef = Arc<Texture>;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Pixel payload of a texture.
#[derive(Debug, Clone)]
pub enum Raster {
    Color(RgbaImage),
    Height(HeightImage),
}

impl Raster {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Color(img) => img.dimensions(),
            Raster::Height(img) => img.dimensions(),
        }
    }
}

/// Which edge of a tile's raster a stitch writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Last column, copied from the east neighbor's first column.
    East,
    /// Bottom row, copied from the south neighbor's top row.
    South,
}

#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    raster: RwLock<Raster>,
    resident: AtomicBool,
}

impl Texture {
    pub fn new(raster: Raster) -> TextureRef {
        Arc::new(Self {
            id: TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
            raster: RwLock::new(raster),
            resident: AtomicBool::new(false),
        })
    }

    pub fn color(image: RgbaImage) -> TextureRef {
        Self::new(Raster::Color(image))
    }

    pub fn height(image: HeightImage) -> TextureRef {
        Self::new(Raster::Height(image))
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Raster> {
        self.raster.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.read().dimensions()
    }

    pub fn is_height(&self) -> bool {
        matches!(*self.read(), Raster::Height(_))
    }

    /// Whether a graphics-side copy currently exists.
    pub fn is_resident(&self) -> bool {
        self.resident.load(Ordering::Acquire)
    }

    pub fn mark_resident(&self) {
        self.resident.store(true, Ordering::Release);
    }

    /// Drop the graphics-side copy; the CPU raster stays so it can be
    /// uploaded again on demand.
    pub fn release(&self) {
        self.resident.store(false, Ordering::Release);
    }

    /// Min/max height inside a UV window (`v` pointing up, so `v = 1` is
    /// image row 0). `None` for color rasters or empty windows.
    pub fn height_range(&self, u0: f32, v0: f32, u1: f32, v1: f32) -> Option<(f32, f32)> {
        let raster = self.read();
        let Raster::Height(img) = &*raster else {
            return None;
        };
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        let col = |u: f32| ((u.clamp(0.0, 1.0) * (w - 1) as f32).round()) as u32;
        let row = |v: f32| (((1.0 - v.clamp(0.0, 1.0)) * (h - 1) as f32).round()) as u32;
        let (c0, c1) = (col(u0.min(u1)), col(u0.max(u1)));
        let (r0, r1) = (row(v0.max(v1)), row(v0.min(v1)));

        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for y in r0..=r1 {
            for x in c0..=c1 {
                let z = img.get_pixel(x, y)[0];
                lo = lo.min(z);
                hi = hi.max(z);
            }
        }
        (lo <= hi).then_some((lo, hi))
    }

    /// Copy the neighbor's adjoining edge into this raster's far edge, in
    /// place. Returns the number of pixels written; mismatched formats or
    /// dimensions (or stitching a texture with itself) write nothing.
    pub fn copy_edge_from(&self, neighbor: &Texture, edge: Edge) -> usize {
        if std::ptr::eq(self, neighbor) {
            return 0;
        }
        let src = neighbor.read();
        let mut dst = self.raster.write().unwrap_or_else(PoisonError::into_inner);
        if src.dimensions() != dst.dimensions() {
            return 0;
        }
        match (&mut *dst, &*src) {
            (Raster::Color(dst), Raster::Color(src)) => copy_edge(dst, src, edge),
            (Raster::Height(dst), Raster::Height(src)) => copy_edge(dst, src, edge),
            _ => 0,
        }
    }
}

fn copy_edge<P: image::Pixel>(
    dst: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    edge: Edge,
) -> usize {
    let (w, h) = dst.dimensions();
    if w == 0 || h == 0 {
        return 0;
    }
    match edge {
        Edge::East => {
            for y in 0..h {
                dst.put_pixel(w - 1, y, *src.get_pixel(0, y));
            }
            h as usize
        }
        Edge::South => {
            for x in 0..w {
                dst.put_pixel(x, h - 1, *src.get_pixel(x, 0));
            }
            w as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, v: u8) -> TextureRef {
        Texture::color(RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255])))
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(solid(1, 1, 0).id(), solid(1, 1, 0).id());
    }

    #[test]
    fn east_edge_copies_neighbor_first_column() {
        let this = solid(4, 3, 10);
        let east = solid(4, 3, 200);
        assert_eq!(this.copy_edge_from(&east, Edge::East), 3);
        let guard = this.read();
        let Raster::Color(img) = &*guard else {
            panic!("expected color raster");
        };
        assert_eq!(img.get_pixel(3, 1)[0], 200);
        assert_eq!(img.get_pixel(2, 1)[0], 10);
    }

    #[test]
    fn south_edge_copies_neighbor_top_row() {
        let this = solid(2, 2, 1);
        let south = solid(2, 2, 9);
        assert_eq!(this.copy_edge_from(&south, Edge::South), 2);
        let guard = this.read();
        let Raster::Color(img) = &*guard else {
            panic!("expected color raster");
        };
        assert_eq!(img.get_pixel(0, 1)[0], 9);
        assert_eq!(img.get_pixel(0, 0)[0], 1);
    }

    #[test]
    fn mismatched_dimensions_write_nothing() {
        let this = solid(4, 4, 10);
        assert_eq!(this.copy_edge_from(&solid(4, 5, 200), Edge::East), 0);
        assert_eq!(this.copy_edge_from(&solid(5, 4, 200), Edge::South), 0);
        let guard = this.read();
        let Raster::Color(img) = &*guard else {
            panic!("expected color raster");
        };
        assert!(img.pixels().all(|p| p[0] == 10));
    }

    #[test]
    fn self_stitch_is_a_no_op() {
        let this = solid(2, 2, 1);
        assert_eq!(this.copy_edge_from(&this, Edge::East), 0);
    }

    #[test]
    fn height_range_respects_window() {
        let img = HeightImage::from_fn(3, 3, |x, y| Luma([(x + 10 * y) as f32]));
        let tex = Texture::height(img);
        assert_eq!(tex.height_range(0.0, 0.0, 1.0, 1.0), Some((0.0, 22.0)));
        // Upper-left corner only: image row 0, column 0.
        assert_eq!(tex.height_range(0.0, 1.0, 0.0, 1.0), Some((0.0, 0.0)));
        assert_eq!(solid(2, 2, 0).height_range(0.0, 0.0, 1.0, 1.0), None);
    }

    #[test]
    fn residency_toggles() {
        let tex = solid(1, 1, 0);
        assert!(!tex.is_resident());
        tex.mark_resident();
        assert!(tex.is_resident());
        tex.release();
        assert!(!tex.is_resident());
    }
}
