use serde::{Deserialize, Serialize};

use crate::key::TileKey;

/// Errors raised while constructing a tiling profile.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProfileError {
    #[error("extent is empty or inverted: ({xmin}, {ymin}) .. ({xmax}, {ymax})")]
    InvalidExtent {
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },
    #[error("profile needs at least one LOD-0 tile in each direction, got {wide}x{high}")]
    NoTiles { wide: u32, high: u32 },
}

/// Axis-aligned rectangle in profile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.xmin + self.xmax),
            0.5 * (self.ymin + self.ymax),
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }
}

/// Tiling profile: the extent covered by the quadtree and how many tiles
/// make up LOD 0. Every deeper LOD doubles the tile count on both axes.
///
/// Tile rows are numbered from the top (`ymax`) down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    extent: Extent,
    tiles_wide: u32,
    tiles_high: u32,
}

impl Profile {
    pub fn new(extent: Extent, tiles_wide: u32, tiles_high: u32) -> Result<Self, ProfileError> {
        if !(extent.width() > 0.0 && extent.height() > 0.0) {
            return Err(ProfileError::InvalidExtent {
                xmin: extent.xmin,
                ymin: extent.ymin,
                xmax: extent.xmax,
                ymax: extent.ymax,
            });
        }
        if tiles_wide == 0 || tiles_high == 0 {
            return Err(ProfileError::NoTiles {
                wide: tiles_wide,
                high: tiles_high,
            });
        }
        Ok(Self {
            extent,
            tiles_wide,
            tiles_high,
        })
    }

    /// Whole-earth geodetic profile: 2x1 tiles of 180 degrees at LOD 0.
    pub fn global_geodetic() -> Self {
        Self {
            extent: Extent::new(-180.0, -90.0, 180.0, 90.0),
            tiles_wide: 2,
            tiles_high: 1,
        }
    }

    /// Single square root tile centred on the origin.
    pub fn square(size: f64) -> Result<Self, ProfileError> {
        let half = 0.5 * size;
        Self::new(Extent::new(-half, -half, half, half), 1, 1)
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    /// Deepest LOD whose tile counts still fit in a `u32` index.
    pub fn max_lod(&self) -> u32 {
        self.tiles_wide.max(self.tiles_high).leading_zeros()
    }

    /// Number of tiles `(wide, high)` at the given LOD. Saturates at
    /// `u32::MAX` past [`Profile::max_lod`].
    pub fn num_tiles(&self, lod: u32) -> (u32, u32) {
        let scale = |count: u32| {
            if lod > count.leading_zeros() {
                u32::MAX
            } else {
                count << lod
            }
        };
        (scale(self.tiles_wide), scale(self.tiles_high))
    }

    /// All LOD-0 keys in row-major order.
    pub fn root_keys(&self) -> Vec<TileKey> {
        let mut keys = Vec::with_capacity((self.tiles_wide * self.tiles_high) as usize);
        for y in 0..self.tiles_high {
            for x in 0..self.tiles_wide {
                keys.push(TileKey::new(0, x, y));
            }
        }
        keys
    }

    /// Extent covered by one tile.
    pub fn tile_extent(&self, key: &TileKey) -> Extent {
        let (tw, th) = self.num_tiles(key.lod());
        let width = self.extent.width() / tw as f64;
        let height = self.extent.height() / th as f64;
        let xmin = self.extent.xmin + width * key.x() as f64;
        let ymax = self.extent.ymax - height * key.y() as f64;
        Extent::new(xmin, ymax - height, xmin + width, ymax)
    }
}
