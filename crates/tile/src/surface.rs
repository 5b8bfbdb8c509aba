//! Per-tile drawable surface.
//!
//! The tile core treats its surface as a black box that has a bounding
//! volume, can answer visibility and child-range queries, and holds the
//! elevation raster the bound is computed from.

use glam::{Mat4, Vec3, Vec4};
use quadterra_common::{Aabb, BoundingSphere, Profile, TextureRef, TileKey};

pub trait Surface: Send + Sync {
    fn bound(&self) -> BoundingSphere;

    fn aligned_box(&self) -> Aabb;

    /// Horizon test for the whole surface.
    fn is_visible_from(&self, viewpoint: Vec3) -> bool;

    /// Whether any of the four child footprints lies within the range
    /// (given squared) of `center`, with distances scaled by `lod_scale`.
    fn any_child_box_intersects_sphere(&self, center: Vec3, radius2: f32, lod_scale: f32) -> bool;

    fn set_elevation_raster(&mut self, raster: TextureRef, matrix: Mat4);

    fn elevation_raster(&self) -> Option<&TextureRef>;

    fn elevation_matrix(&self) -> Mat4;

    fn release_graphics_resources(&mut self);
}

/// Builds the surface for a newly created tile.
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, key: &TileKey, profile: &Profile) -> Box<dyn Surface>;
}

/// Surface over the tile's profile footprint, with its vertical extent taken
/// from the elevation raster window the tile samples.
#[derive(Debug, Clone)]
pub struct HeightfieldSurface {
    footprint: (Vec3, Vec3),
    aabb: Aabb,
    children: [Aabb; 4],
    raster: Option<TextureRef>,
    matrix: Mat4,
}

impl HeightfieldSurface {
    pub fn new(key: &TileKey, profile: &Profile) -> Self {
        let footprint = key.footprint(profile);
        let aabb = Aabb::new(footprint.0, footprint.1);
        Self {
            footprint,
            aabb,
            children: aabb.quadrants(),
            raster: None,
            matrix: Mat4::IDENTITY,
        }
    }

    fn recompute_box(&mut self) {
        let (lo, hi) = self
            .raster
            .as_ref()
            .and_then(|raster| {
                let a = self.matrix * Vec4::new(0.0, 0.0, 0.0, 1.0);
                let b = self.matrix * Vec4::new(1.0, 1.0, 0.0, 1.0);
                raster.height_range(a.x, a.y, b.x, b.y)
            })
            .unwrap_or((0.0, 0.0));
        let (min, max) = self.footprint;
        self.aabb = Aabb::new(Vec3::new(min.x, min.y, lo), Vec3::new(max.x, max.y, hi));
        self.children = self.aabb.quadrants();
    }
}

impl Surface for HeightfieldSurface {
    fn bound(&self) -> BoundingSphere {
        self.aabb.bounding_sphere()
    }

    fn aligned_box(&self) -> Aabb {
        self.aabb
    }

    /// A viewpoint beneath the lowest point of the surface only sees its
    /// underside.
    fn is_visible_from(&self, viewpoint: Vec3) -> bool {
        viewpoint.z >= self.aabb.min.z
    }

    fn any_child_box_intersects_sphere(&self, center: Vec3, radius2: f32, lod_scale: f32) -> bool {
        let scale2 = lod_scale * lod_scale;
        self.children
            .iter()
            .any(|b| b.distance_squared(center) * scale2 <= radius2)
    }

    fn set_elevation_raster(&mut self, raster: TextureRef, matrix: Mat4) {
        self.raster = Some(raster);
        self.matrix = matrix;
        self.recompute_box();
    }

    fn elevation_raster(&self) -> Option<&TextureRef> {
        self.raster.as_ref()
    }

    fn elevation_matrix(&self) -> Mat4 {
        self.matrix
    }

    fn release_graphics_resources(&mut self) {
        if let Some(raster) = &self.raster {
            if self.matrix == Mat4::IDENTITY {
                raster.release();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeightfieldSurfaceFactory;

impl SurfaceFactory for HeightfieldSurfaceFactory {
    fn create(&self, key: &TileKey, profile: &Profile) -> Box<dyn Surface> {
        Box::new(HeightfieldSurface::new(key, profile))
    }
}
