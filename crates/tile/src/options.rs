use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors from loading or validating terrain options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid option `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Terrain engine options: LOD policy, expiry and loader budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainOptions {
    /// Forbid creating children while a tile's own data is still pending.
    pub progressive: bool,
    /// Load deep tiles before shallow ones.
    pub high_resolution_first: bool,
    /// Overrides the per-tile minimum number of unvisited frames before expiry.
    pub min_expiry_frames: Option<u64>,
    /// Overrides the per-tile minimum unvisited seconds before expiry.
    pub min_expiry_time: Option<f64>,
    /// Stitch normal-map edges of neighboring tiles.
    pub normalize_edges: bool,
    /// Deepest LOD the quadtree may reach.
    pub max_lod: u32,
    /// Raster size (pixels per side) of generated tile data.
    pub tile_size: u32,
    /// Visibility range of LOD 0; each deeper LOD halves it.
    pub lod0_visibility_range: f32,
    /// Fraction of a LOD's range at which vertex morphing starts.
    pub morph_start_ratio: f32,
    /// Multiplier on viewpoint distance in the subdivision test.
    pub lod_scale: f32,
    /// Number of shared sampler slots after the fixed ones.
    pub shared_layers: usize,
    /// Loader worker threads; zero runs loads inline at dispatch.
    pub loader_threads: usize,
    /// Maximum loads dispatched per frame.
    pub max_loads_per_frame: usize,
    /// Maximum sibling groups expired per frame.
    pub expire_per_frame: usize,
}

impl Default for TerrainOptions {
    fn default() -> Self {
        Self {
            progressive: false,
            high_resolution_first: false,
            min_expiry_frames: None,
            min_expiry_time: None,
            normalize_edges: false,
            max_lod: 12,
            tile_size: 17,
            lod0_visibility_range: 1.0e6,
            morph_start_ratio: 0.66,
            lod_scale: 1.0,
            shared_layers: 0,
            loader_threads: 2,
            max_loads_per_frame: 16,
            expire_per_frame: 16,
        }
    }
}

impl TerrainOptions {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of LODs the selection table covers.
    pub fn num_lods(&self) -> u32 {
        self.max_lod + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.max_lod > 30 {
            return invalid("max_lod", "must be at most 30");
        }
        if self.tile_size < 2 {
            return invalid("tile_size", "must be at least 2");
        }
        if !(self.lod0_visibility_range > 0.0) {
            return invalid("lod0_visibility_range", "must be positive");
        }
        if !(0.0..1.0).contains(&self.morph_start_ratio) {
            return invalid("morph_start_ratio", "must be in [0, 1)");
        }
        if !(self.lod_scale > 0.0) {
            return invalid("lod_scale", "must be positive");
        }
        if self.min_expiry_time.is_some_and(|t| t < 0.0) {
            return invalid("min_expiry_time", "must not be negative");
        }
        if self.max_loads_per_frame == 0 {
            return invalid("max_loads_per_frame", "must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TerrainOptions::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let o = TerrainOptions::from_json_str(r#"{ "progressive": true, "max_lod": 5 }"#).unwrap();
        assert!(o.progressive);
        assert_eq!(o.max_lod, 5);
        assert_eq!(o.num_lods(), 6);
        assert_eq!(o.tile_size, TerrainOptions::default().tile_size);
    }

    #[test]
    fn rejects_bad_morph_ratio() {
        let err = TerrainOptions::from_json_str(r#"{ "morph_start_ratio": 1.0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "morph_start_ratio",
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            TerrainOptions::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn json_round_trip_preserves_overrides() {
        let o = TerrainOptions {
            min_expiry_frames: Some(10),
            ..TerrainOptions::default()
        };
        let back = TerrainOptions::from_json_str(&o.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back, o);
    }
}
