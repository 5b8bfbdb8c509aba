//! Shared types for the quadtree terrain engine.
//!
//! # Invariants
//! - A [`TileKey`] is immutable; child, parent and neighbor keys are derived
//!   deterministically from it (and the [`Profile`] where tile counts matter).
//! - Published [`Texture`] pixels are only mutated by edge stitching.

mod bounds;
mod frame;
mod key;
mod profile;
mod texture;

pub use bounds::{Aabb, BoundingSphere};
pub use frame::FrameStamp;
pub use key::{SCALE_BIAS, TileKey, scale_bias};
pub use profile::{Extent, Profile, ProfileError};
pub use texture::{Edge, HeightImage, Raster, Texture, TextureId, TextureRef};

pub fn crate_info() -> &'static str {
    "quadterra-common v0.1.0"
}
