//! src/utils/math.rs
//! Geometric helpers for culling
use crate::world::chunk_coord::SectionKey;
use crate::world::column::SECTION_SIZE;
use glam::{Mat4, Vec3, Vec4};

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// World-space box of one 16x16x16 section.
    pub fn for_section(key: SectionKey) -> Self {
        let size = SECTION_SIZE as f32;
        let min = key.column.to_world_pos() + Vec3::new(0.0, 0.0, key.section as f32 * size);
        Self::new(min, min + Vec3::splat(size))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// View frustum for culling
#[derive(Debug, Clone)]
pub struct ViewFrustum {
    pub planes: [Plane; 6],
}

impl ViewFrustum {
    /// Extracts the six planes from a view-projection matrix with a 0..1
    /// depth range (glam's `perspective_rh`).
    pub fn from_matrix(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);
        let mut planes = [
            Plane::from_vec4(r3 + r0),
            Plane::from_vec4(r3 - r0),
            Plane::from_vec4(r3 + r1),
            Plane::from_vec4(r3 - r1),
            Plane::from_vec4(r2),
            Plane::from_vec4(r3 - r2),
        ];
        for plane in &mut planes {
            plane.normalize();
        }
        Self { planes }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }

    /// Conservative box test: rejects only boxes fully outside one plane.
    pub fn intersects_aabb(&self, aabb: &AABB) -> bool {
        self.planes.iter().all(|plane| {
            let corner = Vec3::select(plane.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            plane.signed_distance(corner) >= 0.0
        })
    }
}

/// Geometric plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    fn from_vec4(v: Vec4) -> Self {
        Self::new(v.truncate(), v.w)
    }

    pub fn normalize(&mut self) {
        let length = self.normal.length();
        if length > 0.0 {
            self.normal /= length;
            self.distance /= length;
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3::ZERO,
            distance: 0.0,
        }
    }
}
