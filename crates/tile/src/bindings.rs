/// A named sampler slot in every rendering pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerBinding {
    pub name: String,
    /// Inactive bindings are never populated by merges or inheritance seeding.
    pub active: bool,
}

impl SamplerBinding {
    pub const COLOR: usize = 0;
    pub const COLOR_PARENT: usize = 1;
    pub const ELEVATION: usize = 2;
    pub const NORMAL: usize = 3;
    /// First of the shared-layer slots.
    pub const SHARED: usize = 4;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }
}

/// Ordered slot table shared by every pass of every tile in one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderBindings {
    bindings: Vec<SamplerBinding>,
}

impl RenderBindings {
    /// The four fixed slots plus `shared_layers` shared slots, all active.
    pub fn new(shared_layers: usize) -> Self {
        let mut bindings = vec![
            SamplerBinding::new("color"),
            SamplerBinding::new("color_parent"),
            SamplerBinding::new("elevation"),
            SamplerBinding::new("normal"),
        ];
        bindings.extend((0..shared_layers).map(|i| SamplerBinding::new(format!("shared_{i}"))));
        Self { bindings }
    }

    /// Number of sampler slots in each pass.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&SamplerBinding> {
        self.bindings.get(slot)
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.bindings.get(slot).is_some_and(|b| b.active)
    }

    pub fn set_active(&mut self, slot: usize, active: bool) {
        if let Some(binding) = self.bindings.get_mut(slot) {
            binding.active = active;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SamplerBinding> {
        self.bindings.iter()
    }
}

impl Default for RenderBindings {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_slots_follow_fixed_slots() {
        let b = RenderBindings::new(2);
        assert_eq!(b.len(), 6);
        assert_eq!(b.get(SamplerBinding::SHARED).unwrap().name, "shared_0");
        assert_eq!(b.get(SamplerBinding::NORMAL).unwrap().name, "normal");
    }

    #[test]
    fn out_of_range_slots_are_inactive() {
        let mut b = RenderBindings::default();
        assert!(!b.is_active(SamplerBinding::SHARED));
        b.set_active(SamplerBinding::SHARED, true);
        assert!(!b.is_active(SamplerBinding::SHARED));
    }

    #[test]
    fn toggling_a_slot() {
        let mut b = RenderBindings::default();
        b.set_active(SamplerBinding::COLOR_PARENT, false);
        assert!(!b.is_active(SamplerBinding::COLOR_PARENT));
        assert!(b.is_active(SamplerBinding::COLOR));
    }
}
