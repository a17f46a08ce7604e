use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::utils::math;

/// Axis-aligned bounding box used for particle, collider and mesh bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half: Vec3) -> Self {
        Self::new(center - half, center + half)
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut bounds = Self::empty();
        for &p in points {
            bounds.extend(p);
        }
        bounds
    }

    pub fn expanded(&self, amount: f32) -> Self {
        Self::new(self.min - Vec3::splat(amount), self.max + Vec3::splat(amount))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }
}

/// Triangle mesh used as collision geometry and distance field source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    pub bounds: Aabb,
}

impl TriangleMesh {
    pub fn builder(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> MeshBuilder {
        MeshBuilder::new(vertices, indices)
    }

    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let [a, b, c] = self.indices[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        (0..self.indices.len()).map(move |i| self.triangle(i))
    }

    /// Closest point on the surface together with the face normal there.
    pub fn closest_point(&self, point: Vec3) -> Option<(Vec3, Vec3)> {
        let mut best: Option<(f32, Vec3, Vec3)> = None;
        for [a, b, c] in self.triangles() {
            let candidate = math::closest_point_on_triangle(point, a, b, c);
            let dist = candidate.distance_squared(point);
            if best.map_or(true, |(d, _, _)| dist < d) {
                let normal = (b - a).cross(c - a).normalize_or_zero();
                best = Some((dist, candidate, normal));
            }
        }
        best.map(|(_, p, n)| (p, n))
    }

    /// Signed distance, negative inside. Inside/outside uses the generalized
    /// winding number so it stays robust for slightly open meshes.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        let mut nearest = f32::INFINITY;
        let mut winding = 0.0;
        for [a, b, c] in self.triangles() {
            let candidate = math::closest_point_on_triangle(point, a, b, c);
            nearest = nearest.min(candidate.distance_squared(point));
            winding += math::solid_angle(point, a, b, c);
        }
        let distance = nearest.sqrt();
        if winding / (4.0 * std::f32::consts::PI) > 0.5 {
            -distance
        } else {
            distance
        }
    }
}

/// Helper used to cook triangle meshes from raw vertex/index buffers.
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    vertices: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
}

impl MeshBuilder {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        Self { vertices, indices }
    }

    /// Drops triangles that reference missing vertices or have collapsed edges.
    pub fn remove_degenerate(mut self) -> Self {
        let count = self.vertices.len() as u32;
        let vertices = &self.vertices;
        let before = self.indices.len();
        self.indices.retain(|&[a, b, c]| {
            if a >= count || b >= count || c >= count || a == b || b == c || a == c {
                return false;
            }
            let (pa, pb, pc) = (vertices[a as usize], vertices[b as usize], vertices[c as usize]);
            (pb - pa).cross(pc - pa).length_squared() > 1e-12
        });
        let dropped = before - self.indices.len();
        if dropped > 0 {
            log::warn!("dropped {dropped} degenerate triangles while building mesh");
        }
        self
    }

    pub fn build(self) -> TriangleMesh {
        let bounds = Aabb::from_points(&self.vertices);
        TriangleMesh {
            vertices: self.vertices,
            indices: self.indices,
            bounds,
        }
    }
}
