use glam::Vec4;
use image::{Rgba, RgbaImage};
use quadterra_common::{Profile, Raster, Texture};
use quadterra_tile::{DrawTile, Sampler};
use tracing::debug;

use crate::renderer::{RenderView, Renderer, upload, visible_pass};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Orthographic top-down raster of the draw list.
///
/// Each drawn tile fills its footprint with its visible color layer, sampled
/// through the layer's matrix, so inherited data shows up exactly as a GPU
/// would sample it. Row 0 of the output is the north edge of the profile.
#[derive(Debug, Clone)]
pub struct TopDownRenderer {
    profile: Profile,
    size: u32,
}

impl TopDownRenderer {
    pub fn new(profile: Profile, size: u32) -> Self {
        Self {
            profile,
            size: size.max(1),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn paint(&self, image: &mut RgbaImage, draw: &DrawTile, sampler: &Sampler, texture: &Texture) {
        let world = *self.profile.extent();
        let tile = self.profile.tile_extent(&draw.key);
        let size = self.size as f64;

        let to_col = |x: f64| (x - world.xmin) / world.width() * size;
        let to_row = |y: f64| (world.ymax - y) / world.height() * size;
        let col0 = to_col(tile.xmin).floor().max(0.0) as u32;
        let col1 = (to_col(tile.xmax).ceil() as u32).min(self.size);
        let row0 = to_row(tile.ymax).floor().max(0.0) as u32;
        let row1 = (to_row(tile.ymin).ceil() as u32).min(self.size);

        // Taken before the read guard below; `None` for color rasters.
        let range = texture.height_range(0.0, 0.0, 1.0, 1.0);
        let raster = texture.read();

        for row in row0..row1 {
            for col in col0..col1 {
                let x = world.xmin + (col as f64 + 0.5) / size * world.width();
                let y = world.ymax - (row as f64 + 0.5) / size * world.height();
                if !tile.contains(x, y) {
                    continue;
                }
                let u = ((x - tile.xmin) / tile.width()) as f32;
                let v = ((y - tile.ymin) / tile.height()) as f32;
                let uv = sampler.matrix * Vec4::new(u, v, 0.0, 1.0);
                if let Some(color) = sample(&raster, range, uv.x, uv.y) {
                    image.put_pixel(col, row, color);
                }
            }
        }
    }
}

impl Renderer for TopDownRenderer {
    type Output = RgbaImage;

    fn render(&self, draws: &[DrawTile], view: &RenderView) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(self.size, self.size, BACKGROUND);
        let mut painted = 0usize;
        for draw in draws {
            upload(draw);
            let Some(sampler) = visible_pass(draw).and_then(|p| p.color()) else {
                continue;
            };
            let Some(texture) = sampler.texture.as_deref() else {
                continue;
            };
            self.paint(&mut image, draw, sampler, texture);
            painted += 1;
        }
        debug!(
            frame = view.frame.frame_number,
            draws = draws.len(),
            painted,
            "Rendered top-down preview"
        );
        image
    }
}

/// Nearest-pixel lookup; `v = 1` is image row 0. Heights map to gray
/// across the texture's own range.
fn sample(raster: &Raster, range: Option<(f32, f32)>, u: f32, v: f32) -> Option<Rgba<u8>> {
    let (w, h) = raster.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let col = (u.clamp(0.0, 1.0) * (w - 1) as f32).round() as u32;
    let row = ((1.0 - v.clamp(0.0, 1.0)) * (h - 1) as f32).round() as u32;
    match raster {
        Raster::Color(img) => Some(*img.get_pixel(col, row)),
        Raster::Height(img) => {
            let (lo, hi) = range?;
            let z = img.get_pixel(col, row).0[0];
            let t = if hi > lo { (z - lo) / (hi - lo) } else { 0.5 };
            let g = (t.clamp(0.0, 1.0) * 255.0).round() as u8;
            Some(Rgba([g, g, g, 255]))
        }
    }
}
