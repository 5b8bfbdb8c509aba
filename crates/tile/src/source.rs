use std::time::Duration;

use glam::Vec3;
use image::{Luma, Rgba, RgbaImage};
use quadterra_common::{HeightImage, Profile, Texture, TextureRef, TileKey};

/// Failure to produce data for one tile.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// The source has nothing at this key; the tile keeps inheriting.
    #[error("no data for tile {0}")]
    NoData(TileKey),
    #[error("tile source failed: {0}")]
    Source(String),
}

/// One color layer's raster for a tile.
#[derive(Debug, Clone)]
pub struct ColorLayerModel {
    pub uid: i32,
    /// `None` when the layer has no coverage here.
    pub texture: Option<TextureRef>,
    /// Whether children should inherit this layer.
    pub inheritable: bool,
}

/// Freshly loaded data for one tile, ready to merge.
#[derive(Debug, Clone, Default)]
pub struct TerrainTileModel {
    pub color_layers: Vec<ColorLayerModel>,
    pub elevation: Option<TextureRef>,
    pub normal: Option<TextureRef>,
    /// Indexed by shared slot (0 is the first slot after NORMAL).
    pub shared_layers: Vec<Option<TextureRef>>,
}

impl TerrainTileModel {
    pub fn is_empty(&self) -> bool {
        self.color_layers.iter().all(|l| l.texture.is_none())
            && self.elevation.is_none()
            && self.normal.is_none()
            && self.shared_layers.iter().all(Option::is_none)
    }
}

/// Produces tile data. Called from loader worker threads.
pub trait TileDataSource: Send + Sync {
    fn create_tile_model(&self, key: &TileKey) -> Result<TerrainTileModel, LoadError>;
}

impl<F> TileDataSource for F
where
    F: Fn(&TileKey) -> Result<TerrainTileModel, LoadError> + Send + Sync,
{
    fn create_tile_model(&self, key: &TileKey) -> Result<TerrainTileModel, LoadError> {
        self(key)
    }
}

/// Uid of the single color layer [`ProceduralSource`] produces.
pub const PROCEDURAL_COLOR_UID: i32 = 0;

/// Deterministic rolling terrain generated from world position, so adjacent
/// tiles agree along shared edges.
#[derive(Debug, Clone)]
pub struct ProceduralSource {
    profile: Profile,
    tile_size: u32,
    max_data_lod: u32,
    shared_layers: usize,
    amplitude: f32,
    latency: Option<Duration>,
}

impl ProceduralSource {
    pub fn new(profile: Profile, tile_size: u32) -> Self {
        let amplitude = (profile.extent().width() * 0.01) as f32;
        Self {
            profile,
            tile_size: tile_size.max(2),
            max_data_lod: u32::MAX,
            shared_layers: 0,
            amplitude,
            latency: None,
        }
    }

    /// Keys deeper than `lod` report [`LoadError::NoData`].
    pub fn with_max_data_lod(mut self, lod: u32) -> Self {
        self.max_data_lod = lod;
        self
    }

    pub fn with_shared_layers(mut self, count: usize) -> Self {
        self.shared_layers = count;
        self
    }

    /// Sleep this long per tile, imitating a slow backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn height_at(&self, x: f32, y: f32) -> f32 {
        let k = std::f32::consts::TAU * 3.0 / self.profile.extent().width() as f32;
        self.amplitude * (1.0 + (x * k).sin() * (y * k).cos())
    }

    fn normal_at(&self, x: f32, y: f32) -> Vec3 {
        let k = std::f32::consts::TAU * 3.0 / self.profile.extent().width() as f32;
        let dx = self.amplitude * k * (x * k).cos() * (y * k).cos();
        let dy = -self.amplitude * k * (x * k).sin() * (y * k).sin();
        Vec3::new(-dx, -dy, 1.0).normalize()
    }

    /// World position of pixel `(i, j)`; row 0 is the tile's north edge.
    fn sample_point(&self, key: &TileKey, i: u32, j: u32) -> (f32, f32) {
        let e = self.profile.tile_extent(key);
        let step = (self.tile_size - 1) as f64;
        let x = e.xmin + e.width() * i as f64 / step;
        let y = e.ymax - e.height() * j as f64 / step;
        (x as f32, y as f32)
    }
}

impl TileDataSource for ProceduralSource {
    fn create_tile_model(&self, key: &TileKey) -> Result<TerrainTileModel, LoadError> {
        if key.lod() > self.max_data_lod {
            return Err(LoadError::NoData(*key));
        }
        let (tw, th) = self.profile.num_tiles(key.lod());
        if key.x() >= tw || key.y() >= th {
            return Err(LoadError::Source(format!("key {key} outside profile")));
        }
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        let n = self.tile_size;
        let heights = HeightImage::from_fn(n, n, |i, j| {
            let (x, y) = self.sample_point(key, i, j);
            Luma([self.height_at(x, y)])
        });
        let normals = RgbaImage::from_fn(n, n, |i, j| {
            let (x, y) = self.sample_point(key, i, j);
            let v = self.normal_at(x, y) * 0.5 + Vec3::splat(0.5);
            Rgba([(v.x * 255.0) as u8, (v.y * 255.0) as u8, (v.z * 255.0) as u8, 255])
        });
        let tint = (key.lod() * 20).min(255) as u8;
        let colors = RgbaImage::from_fn(n, n, |i, j| {
            let t = heights.get_pixel(i, j)[0] / (2.0 * self.amplitude).max(f32::EPSILON);
            let g = (t.clamp(0.0, 1.0) * 200.0) as u8 + 40;
            Rgba([tint, g, 255 - g, 255])
        });
        let shared_layers = (0..self.shared_layers)
            .map(|slot| Some(Texture::color(RgbaImage::from_pixel(2, 2, Rgba([slot as u8, 0, 0, 255])))))
            .collect();

        Ok(TerrainTileModel {
            color_layers: vec![ColorLayerModel {
                uid: PROCEDURAL_COLOR_UID,
                texture: Some(Texture::color(colors)),
                inheritable: true,
            }],
            elevation: Some(Texture::height(heights)),
            normal: Some(Texture::color(normals)),
            shared_layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadterra_common::Raster;

    fn source() -> ProceduralSource {
        ProceduralSource::new(Profile::square(1000.0).unwrap(), 9)
    }

    #[test]
    fn produces_every_layer() {
        let model = source().with_shared_layers(2).create_tile_model(&TileKey::new(1, 1, 0)).unwrap();
        assert_eq!(model.color_layers.len(), 1);
        assert_eq!(model.shared_layers.len(), 2);
        assert!(model.elevation.as_ref().unwrap().is_height());
        assert_eq!(model.normal.as_ref().unwrap().dimensions(), (9, 9));
        assert!(!model.is_empty());
    }

    #[test]
    fn adjacent_tiles_share_edge_heights() {
        let s = source();
        let west = s.create_tile_model(&TileKey::new(2, 1, 1)).unwrap();
        let east = s.create_tile_model(&TileKey::new(2, 2, 1)).unwrap();
        let (w, e) = (west.elevation.unwrap(), east.elevation.unwrap());
        let (wg, eg) = (w.read(), e.read());
        let (Raster::Height(wi), Raster::Height(ei)) = (&*wg, &*eg) else {
            panic!("elevation rasters must be height rasters");
        };
        for row in 0..9 {
            let (a, b) = (wi.get_pixel(8, row)[0], ei.get_pixel(0, row)[0]);
            assert!((a - b).abs() < 1e-3, "row {row}: {a} vs {b}");
        }
    }

    #[test]
    fn beyond_max_data_lod_is_no_data() {
        let key = TileKey::new(4, 0, 0);
        let err = source().with_max_data_lod(3).create_tile_model(&key).unwrap_err();
        assert_eq!(err, LoadError::NoData(key));
    }

    #[test]
    fn out_of_profile_key_is_an_error() {
        let err = source().create_tile_model(&TileKey::new(1, 5, 0)).unwrap_err();
        assert!(matches!(err, LoadError::Source(_)));
    }

    #[test]
    fn closures_are_sources() {
        let src = |key: &TileKey| -> Result<TerrainTileModel, LoadError> { Err(LoadError::NoData(*key)) };
        assert!(src.create_tile_model(&TileKey::new(0, 0, 0)).is_err());
    }
}
