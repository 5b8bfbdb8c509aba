use glam::Vec3;

/// Bounding sphere used for culling and load-priority distances.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Squared distance from `p` to the closest point of the box; zero inside.
    pub fn distance_squared(&self, p: Vec3) -> f32 {
        let closest = p.clamp(self.min, self.max);
        closest.distance_squared(p)
    }

    /// The four horizontal quarters, indexed like tile quadrants
    /// (0 = north-west, 1 = north-east, 2 = south-west, 3 = south-east).
    pub fn quadrants(&self) -> [Aabb; 4] {
        let mid = self.center();
        let (lo, hi) = (self.min, self.max);
        [
            Aabb::new(Vec3::new(lo.x, mid.y, lo.z), Vec3::new(mid.x, hi.y, hi.z)),
            Aabb::new(Vec3::new(mid.x, mid.y, lo.z), Vec3::new(hi.x, hi.y, hi.z)),
            Aabb::new(Vec3::new(lo.x, lo.y, lo.z), Vec3::new(mid.x, mid.y, hi.z)),
            Aabb::new(Vec3::new(mid.x, lo.y, lo.z), Vec3::new(hi.x, mid.y, hi.z)),
        ]
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere::new(self.center(), 0.5 * self.size().length())
    }
}
