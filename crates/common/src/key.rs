use std::fmt;

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::profile::Profile;

/// Scale/bias matrices mapping a child's UV space into its parent's, one
/// per quadrant. Each halves the UV range and offsets it into the child's
/// corner; quadrant 0 is the upper-left (north-west) child.
pub const SCALE_BIAS: [Mat4; 4] = [
    Mat4::from_cols_array(&[
        0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.5, 0.0, 1.0,
    ]),
    Mat4::from_cols_array(&[
        0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.5, 0.5, 0.0, 1.0,
    ]),
    Mat4::from_cols_array(&[
        0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ]),
    Mat4::from_cols_array(&[
        0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.5, 0.0, 0.0, 1.0,
    ]),
];

/// Scale/bias matrix for a quadrant index (taken modulo 4).
pub fn scale_bias(quadrant: u32) -> Mat4 {
    SCALE_BIAS[(quadrant & 3) as usize]
}

/// Identifies one cell of the tiling quadtree.
///
/// Keys are plain values; operations that depend on the number of tiles at
/// a LOD (neighbor wrap-around, extents) take the [`Profile`] explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    lod: u32,
    x: u32,
    y: u32,
}

impl TileKey {
    pub fn new(lod: u32, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    pub fn lod(&self) -> u32 {
        self.lod
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Which quadrant of its parent this key occupies, derived from the
    /// parity of x and y. Root keys report quadrant 0.
    pub fn quadrant(&self) -> u32 {
        if self.lod == 0 {
            return 0;
        }
        let x_even = self.x & 1 == 0;
        let y_even = self.y & 1 == 0;
        match (x_even, y_even) {
            (true, true) => 0,
            (false, true) => 1,
            (true, false) => 2,
            (false, false) => 3,
        }
    }

    /// Key of the child in the given quadrant (0..4). Only meaningful
    /// up to the profile's [`Profile::max_lod`].
    pub fn create_child_key(&self, quadrant: u32) -> TileKey {
        let x = (self.x << 1) | (quadrant & 1);
        let y = (self.y << 1) | ((quadrant >> 1) & 1);
        TileKey::new(self.lod + 1, x, y)
    }

    /// All four child keys, indexed by quadrant.
    pub fn child_keys(&self) -> [TileKey; 4] {
        std::array::from_fn(|q| self.create_child_key(q as u32))
    }

    pub fn parent(&self) -> Option<TileKey> {
        if self.lod == 0 {
            return None;
        }
        Some(TileKey::new(self.lod - 1, self.x >> 1, self.y >> 1))
    }

    /// The ancestor (or self) at a shallower-or-equal LOD.
    pub fn ancestor_at(&self, lod: u32) -> Option<TileKey> {
        if lod > self.lod {
            return None;
        }
        let shift = self.lod - lod;
        Some(TileKey::new(lod, self.x >> shift, self.y >> shift))
    }

    /// Key of the tile offset by `(dx, dy)` at the same LOD. Offsets that
    /// leave the profile wrap to the opposite edge.
    pub fn create_neighbor_key(&self, dx: i32, dy: i32, profile: &Profile) -> TileKey {
        let (tw, th) = profile.num_tiles(self.lod);
        TileKey::new(self.lod, wrap(self.x, dx, tw), wrap(self.y, dy, th))
    }

    /// Product of quadrant scale/bias matrices from the root down to this
    /// key: maps this tile's UV space into its LOD-0 ancestor's.
    pub fn root_matrix(&self) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        for lod in 1..=self.lod {
            if let Some(ancestor) = self.ancestor_at(lod) {
                matrix *= scale_bias(ancestor.quadrant());
            }
        }
        matrix
    }

    /// Shader-friendly encoding: x and flipped y modulo 2^16 (so they fit
    /// single precision), the LOD, and `-1` for the not-yet-known extent.
    pub fn encode(&self, profile: &Profile) -> Vec4 {
        const M: f64 = 65536.0;
        let (_, th) = profile.num_tiles(self.lod);
        let x = self.x as f64;
        let y = (th - self.y - 1) as f64;
        Vec4::new((x % M) as f32, (y % M) as f32, self.lod as f32, -1.0)
    }

    /// Local-space 3D box corners of this tile's footprint at height zero.
    pub fn footprint(&self, profile: &Profile) -> (Vec3, Vec3) {
        let e = profile.tile_extent(self);
        (
            Vec3::new(e.xmin as f32, e.ymin as f32, 0.0),
            Vec3::new(e.xmax as f32, e.ymax as f32, 0.0),
        )
    }
}

fn wrap(value: u32, offset: i32, count: u32) -> u32 {
    let shifted = value as i64 + offset as i64;
    if shifted < 0 {
        count - 1
    } else if shifted >= count as i64 {
        0
    } else {
        shifted as u32
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.lod, self.x, self.y)
    }
}
