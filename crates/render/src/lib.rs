//! Rendering adapter: renderer-agnostic interface over the tiles a cull
//! selected.
//!
//! # Invariants
//! - Renderers read the draw list; they never change the quadtree.
//! - Textures a renderer touches are marked resident; eviction releases
//!   them again.
//!
//! # Workaround
//! Provides a debug text renderer and a top-down raster preview in place of
//! a GPU backend. The trait is stable; a GPU implementation consumes the
//! same draw list.

mod preview;
mod renderer;

pub use preview::TopDownRenderer;
pub use renderer::{DebugTextRenderer, RenderView, Renderer};

pub fn crate_info() -> &'static str {
    "quadterra-render v0.1.0"
}
