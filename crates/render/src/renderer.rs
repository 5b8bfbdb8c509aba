use glam::Vec3;
use quadterra_common::FrameStamp;
use quadterra_tile::{DrawTile, RenderingPass, Sampler};

/// Camera position and frame of one render.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    /// Camera position in world space.
    pub eye: Vec3,
    pub frame: FrameStamp,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 1000.0),
            frame: FrameStamp::default(),
        }
    }
}

/// Renderer-agnostic interface. All renderers implement this trait.
///
/// A renderer consumes the draw list produced by a cull. It never touches
/// the quadtree itself.
pub trait Renderer {
    /// The output type produced by this renderer.
    type Output;

    /// Render one frame from the given draw list and view.
    fn render(&self, draws: &[DrawTile], view: &RenderView) -> Self::Output;
}

/// Marks every texture a draw references as resident.
pub(crate) fn upload(draw: &DrawTile) {
    for pass in &draw.passes {
        for texture in pass.samplers.iter().filter_map(|s| s.texture.as_ref()) {
            texture.mark_resident();
        }
    }
}

/// The pass whose color the tile shows: the last one with color data.
pub(crate) fn visible_pass(draw: &DrawTile) -> Option<&RenderingPass> {
    draw.passes
        .iter()
        .rev()
        .find(|p| p.color().is_some_and(Sampler::is_populated))
}

fn describe(sampler: Option<&Sampler>) -> &'static str {
    match sampler {
        Some(s) if s.is_self_authoritative() => "own",
        Some(s) if s.is_populated() => "inherited",
        _ => "none",
    }
}

/// Debug text renderer, standing in for a GPU backend.
///
/// Produces one line per drawn tile. Useful for CLI output, logging, and
/// testing the render interface.
#[derive(Debug, Default)]
pub struct DebugTextRenderer;

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, draws: &[DrawTile], view: &RenderView) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "=== Terrain (frame={}, t={:.2}s) ===\n",
            view.frame.frame_number, view.frame.reference_time
        ));
        out.push_str(&format!("Tiles drawn: {}\n", draws.len()));
        out.push_str(&format!(
            "Camera: eye=({:.1}, {:.1}, {:.1})\n",
            view.eye.x, view.eye.y, view.eye.z
        ));

        for draw in draws {
            upload(draw);
            let pass = visible_pass(draw).or_else(|| draw.passes.first());
            let kv = draw.key_value;
            out.push_str(&format!(
                "  [{}] lod={} passes={} color={} elevation={} normal={} key=({:.0}, {:.0}, {:.0}, {:.1}) r={:.1}\n",
                draw.key,
                draw.key.lod(),
                draw.passes.len(),
                describe(pass.and_then(RenderingPass::color)),
                describe(pass.and_then(RenderingPass::elevation)),
                describe(pass.and_then(RenderingPass::normal)),
                kv.x,
                kv.y,
                kv.z,
                kv.w,
                draw.bound.radius
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec2, Vec4};
    use image::{Rgba, RgbaImage};
    use quadterra_common::{BoundingSphere, Texture, TileKey, scale_bias};
    use quadterra_tile::{DEFAULT_PASS_UID, SamplerBinding};

    fn draw_with_color(key: TileKey, matrix: Mat4) -> DrawTile {
        let texture = Texture::color(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])));
        let mut pass = RenderingPass::new(0, SamplerBinding::SHARED);
        pass.set_sampler(
            SamplerBinding::COLOR,
            Sampler {
                texture: Some(texture),
                matrix,
            },
        );
        DrawTile {
            key,
            key_value: Vec4::new(key.x() as f32, key.y() as f32, key.lod() as f32, 8.0),
            morph_constants: Vec2::new(1.0, 0.5),
            bound: BoundingSphere::new(Vec3::ZERO, 4.0),
            passes: vec![RenderingPass::new(DEFAULT_PASS_UID, SamplerBinding::SHARED), pass],
        }
    }

    #[test]
    fn debug_renderer_empty_draw_list() {
        let renderer = DebugTextRenderer::new();
        let view = RenderView::default();
        let output = renderer.render(&[], &view);

        assert!(output.contains("frame=0"));
        assert!(output.contains("Tiles drawn: 0"));
    }

    #[test]
    fn debug_renderer_lists_tiles() {
        let draws = [
            draw_with_color(TileKey::new(1, 0, 0), Mat4::IDENTITY),
            draw_with_color(TileKey::new(1, 1, 0), scale_bias(1)),
        ];
        let renderer = DebugTextRenderer::new();
        let output = renderer.render(&draws, &RenderView::default());

        assert!(output.contains("Tiles drawn: 2"));
        assert!(output.contains("[1/0/0] lod=1 passes=2 color=own"));
        assert!(output.contains("[1/1/0] lod=1 passes=2 color=inherited"));
        assert!(output.contains("elevation=none"));
    }

    #[test]
    fn rendering_marks_textures_resident() {
        let draw = draw_with_color(TileKey::new(0, 0, 0), Mat4::IDENTITY);
        let texture = draw.passes[1].color().and_then(|s| s.texture.clone()).unwrap();
        assert!(!texture.is_resident());

        DebugTextRenderer::new().render(std::slice::from_ref(&draw), &RenderView::default());
        assert!(texture.is_resident());
    }

    #[test]
    fn visible_pass_skips_empty_color() {
        let mut draw = draw_with_color(TileKey::new(0, 0, 0), Mat4::IDENTITY);
        assert_eq!(visible_pass(&draw).map(|p| p.source_uid), Some(0));

        draw.passes.truncate(1);
        assert!(visible_pass(&draw).is_none());
    }

    #[test]
    fn render_view_default() {
        let view = RenderView::default();
        assert_eq!(view.frame.frame_number, 0);
        assert!(view.eye.z > 0.0);
    }
}
