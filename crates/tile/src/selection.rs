use glam::Vec2;

/// Visibility and morphing parameters for one LOD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisParameters {
    pub visibility_range: f32,
    pub visibility_range2: f32,
    pub morph_start: f32,
    pub morph_end: f32,
}

impl VisParameters {
    /// `(end / (end - start), 1 / (end - start))`, consumed by the vertex
    /// morphing stage.
    pub fn morph_constants(&self) -> Vec2 {
        let one_by_range = 1.0 / (self.morph_end - self.morph_start);
        Vec2::new(self.morph_end * one_by_range, one_by_range)
    }
}

/// Per-LOD visibility ranges that drive subdivision and load priority.
///
/// Each LOD sees half as far as the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionInfo {
    params: Vec<VisParameters>,
}

impl SelectionInfo {
    pub fn new(num_lods: u32, lod0_range: f32, morph_start_ratio: f32) -> Self {
        let params = (0..num_lods.max(1))
            .map(|lod| {
                let range = lod0_range / (1u64 << lod.min(63)) as f32;
                VisParameters {
                    visibility_range: range,
                    visibility_range2: range * range,
                    morph_start: range * morph_start_ratio,
                    morph_end: range,
                }
            })
            .collect();
        Self { params }
    }

    pub fn num_lods(&self) -> u32 {
        self.params.len() as u32
    }

    /// Parameters for `lod`; LODs past the deepest one reuse the deepest.
    pub fn vis_parameters(&self, lod: u32) -> &VisParameters {
        let last = self.params.len() - 1;
        &self.params[(lod as usize).min(last)]
    }

    pub fn visibility_range(&self, lod: u32) -> f32 {
        self.vis_parameters(lod).visibility_range
    }
}
