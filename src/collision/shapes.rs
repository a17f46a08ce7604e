use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::{
    mesh::{Aabb, TriangleMesh},
    types::Transform,
};

/// Principal axis a capsule is aligned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Axis {
    X,
    #[default]
    Y,
    Z,
}

impl Axis {
    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }
}

/// Regular grid of normalized heights spanning `size` in local space.
///
/// Sample `(u, v)` sits at `(u / (columns - 1) * size.x, h * size.y, v / (rows - 1) * size.z)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heightmap {
    pub size: Vec3,
    pub columns: usize,
    pub rows: usize,
    pub heights: Vec<f32>,
}

impl Heightmap {
    pub fn new(size: Vec3, columns: usize, rows: usize, heights: Vec<f32>) -> Self {
        Self {
            size,
            columns,
            rows,
            heights,
        }
    }

    pub fn flat(size: Vec3, height: f32) -> Self {
        Self::new(size, 2, 2, vec![height; 4])
    }

    fn sample(&self, u: usize, v: usize) -> f32 {
        let u = u.min(self.columns.saturating_sub(1));
        let v = v.min(self.rows.saturating_sub(1));
        self.heights.get(v * self.columns + u).copied().unwrap_or(0.0) * self.size.y
    }

    /// Bilinear height and its partial derivatives at local `(x, z)`.
    pub fn height_and_gradient(&self, x: f32, z: f32) -> Option<(f32, f32, f32)> {
        if self.columns < 2 || self.rows < 2 || self.size.x <= 0.0 || self.size.z <= 0.0 {
            return None;
        }
        if x < 0.0 || z < 0.0 || x > self.size.x || z > self.size.z {
            return None;
        }
        let cell_x = self.size.x / (self.columns - 1) as f32;
        let cell_z = self.size.z / (self.rows - 1) as f32;
        let fu = (x / cell_x).min((self.columns - 1) as f32 - 1e-4);
        let fv = (z / cell_z).min((self.rows - 1) as f32 - 1e-4);
        let (u, v) = (fu.floor() as usize, fv.floor() as usize);
        let (tu, tv) = (fu - u as f32, fv - v as f32);

        let h00 = self.sample(u, v);
        let h10 = self.sample(u + 1, v);
        let h01 = self.sample(u, v + 1);
        let h11 = self.sample(u + 1, v + 1);

        let h0 = h00 + (h10 - h00) * tu;
        let h1 = h01 + (h11 - h01) * tu;
        let height = h0 + (h1 - h0) * tv;
        let dx = ((h10 - h00) * (1.0 - tv) + (h11 - h01) * tv) / cell_x;
        let dz = (h1 - h0) / cell_z;
        Some((height, dx, dz))
    }
}

/// Closed set of collision geometry kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Sphere { center: Vec3, radius: f32 },
    Box { center: Vec3, half_extents: Vec3 },
    /// `height` spans cap to cap.
    Capsule { center: Vec3, radius: f32, height: f32, axis: Axis },
    Heightmap(Heightmap),
    TriangleMesh(TriangleMesh),
}

/// Result of a closest-surface query in shape space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub point: Vec3,
    pub normal: Vec3,
    /// Signed distance from the query point to the surface, positive outside.
    pub distance: f32,
}

impl Shape {
    pub fn sphere(radius: f32) -> Self {
        Shape::Sphere {
            center: Vec3::ZERO,
            radius,
        }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Shape::Box {
            center: Vec3::ZERO,
            half_extents,
        }
    }

    pub fn capsule(radius: f32, height: f32, axis: Axis) -> Self {
        Shape::Capsule {
            center: Vec3::ZERO,
            radius,
            height,
            axis,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Shape::Sphere { .. } => "sphere",
            Shape::Box { .. } => "box",
            Shape::Capsule { .. } => "capsule",
            Shape::Heightmap(_) => "heightmap",
            Shape::TriangleMesh(_) => "triangle mesh",
        }
    }

    pub fn local_bounds(&self) -> Aabb {
        match self {
            Shape::Sphere { center, radius } => {
                Aabb::from_center_half_extents(*center, Vec3::splat(*radius))
            }
            Shape::Box {
                center,
                half_extents,
            } => Aabb::from_center_half_extents(*center, *half_extents),
            Shape::Capsule {
                center,
                radius,
                height,
                axis,
            } => {
                let half = axis.unit() * (height * 0.5 - radius).max(0.0);
                Aabb::from_center_half_extents(*center, half.abs() + Vec3::splat(*radius))
            }
            Shape::Heightmap(map) => Aabb::new(Vec3::ZERO, map.size),
            Shape::TriangleMesh(mesh) => mesh.bounds,
        }
    }

    /// World-space bounds of the shape placed at `transform`.
    pub fn world_bounds(&self, transform: &Transform) -> Aabb {
        transformed_bounds(&self.local_bounds(), transform)
    }

    /// Closest surface point to a shape-space `point`.
    pub fn closest_surface(&self, point: Vec3) -> Option<SurfacePoint> {
        match self {
            Shape::Sphere { center, radius } => Some(sphere_surface(point, *center, *radius)),
            Shape::Box {
                center,
                half_extents,
            } => Some(box_surface(point, *center, *half_extents)),
            Shape::Capsule {
                center,
                radius,
                height,
                axis,
            } => {
                let half = axis.unit() * (height * 0.5 - radius).max(0.0);
                let a = *center - half;
                let b = *center + half;
                let ab = b - a;
                let t = if ab.length_squared() > 0.0 {
                    ((point - a).dot(ab) / ab.length_squared()).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                Some(sphere_surface(point, a + ab * t, *radius))
            }
            Shape::Heightmap(map) => heightmap_surface(map, point),
            Shape::TriangleMesh(mesh) => {
                let (closest, face_normal) = mesh.closest_point(point)?;
                let offset = point - closest;
                let distance = offset.length();
                let outside = offset.dot(face_normal) >= 0.0;
                let normal = if distance > 1e-6 {
                    if outside {
                        offset / distance
                    } else {
                        -offset / distance
                    }
                } else {
                    face_normal
                };
                Some(SurfacePoint {
                    point: closest,
                    normal,
                    distance: if outside { distance } else { -distance },
                })
            }
        }
    }
}

/// Bounds of `local` after placing it at `transform`.
pub(crate) fn transformed_bounds(local: &Aabb, transform: &Transform) -> Aabb {
    let mut bounds = Aabb::empty();
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 == 0 { local.min.x } else { local.max.x },
            if i & 2 == 0 { local.min.y } else { local.max.y },
            if i & 4 == 0 { local.min.z } else { local.max.z },
        );
        bounds.extend(transform.transform_point(corner));
    }
    bounds
}

fn sphere_surface(point: Vec3, center: Vec3, radius: f32) -> SurfacePoint {
    let offset = point - center;
    let length = offset.length();
    let normal = if length > 1e-6 { offset / length } else { Vec3::Y };
    SurfacePoint {
        point: center + normal * radius,
        normal,
        distance: length - radius,
    }
}

fn box_surface(point: Vec3, center: Vec3, half_extents: Vec3) -> SurfacePoint {
    let local = point - center;
    let clamped = local.clamp(-half_extents, half_extents);
    if clamped != local {
        let offset = local - clamped;
        let distance = offset.length();
        return SurfacePoint {
            point: center + clamped,
            normal: offset / distance,
            distance,
        };
    }

    // Inside: push out through the nearest face.
    let gaps = half_extents - local.abs();
    let axis = if gaps.x <= gaps.y && gaps.x <= gaps.z {
        0
    } else if gaps.y <= gaps.z {
        1
    } else {
        2
    };
    let mut normal = Vec3::ZERO;
    normal[axis] = if local[axis] >= 0.0 { 1.0 } else { -1.0 };
    let mut surface = local;
    surface[axis] = half_extents[axis] * normal[axis];
    SurfacePoint {
        point: center + surface,
        normal,
        distance: -gaps[axis],
    }
}

fn heightmap_surface(map: &Heightmap, point: Vec3) -> Option<SurfacePoint> {
    let (height, dx, dz) = map.height_and_gradient(point.x, point.z)?;
    let normal = Vec3::new(-dx, 1.0, -dz).normalize();
    let distance = (point.y - height) * normal.y;
    Some(SurfacePoint {
        point: point - normal * distance,
        normal,
        distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sphere_distance_is_signed() {
        let shape = Shape::sphere(1.0);
        let outside = shape.closest_surface(Vec3::new(0.0, 3.0, 0.0)).expect("sphere");
        assert_relative_eq!(outside.distance, 2.0, epsilon = 1e-6);
        let inside = shape.closest_surface(Vec3::new(0.5, 0.0, 0.0)).expect("sphere");
        assert_relative_eq!(inside.distance, -0.5, epsilon = 1e-6);
        assert_eq!(inside.normal, Vec3::X);
    }

    #[test]
    fn box_inside_pushes_through_nearest_face() {
        let shape = Shape::cuboid(Vec3::new(2.0, 1.0, 2.0));
        let hit = shape.closest_surface(Vec3::new(0.0, 0.8, 0.5)).expect("box");
        assert_eq!(hit.normal, Vec3::Y);
        assert_relative_eq!(hit.distance, -0.2, epsilon = 1e-6);
        assert_relative_eq!(hit.point.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn capsule_uses_segment_distance() {
        let shape = Shape::capsule(0.5, 3.0, Axis::Y);
        let hit = shape.closest_surface(Vec3::new(0.0, 3.0, 0.0)).expect("capsule");
        // Segment ends at y = 1.0, cap reaches 1.5.
        assert_relative_eq!(hit.distance, 1.5, epsilon = 1e-5);
        let side = shape.closest_surface(Vec3::new(2.0, 0.3, 0.0)).expect("capsule");
        assert_relative_eq!(side.distance, 1.5, epsilon = 1e-5);
        assert_eq!(side.normal, Vec3::X);
    }

    #[test]
    fn heightmap_slope_normal() {
        // Height rises 1 unit over 10 along x.
        let map = Heightmap::new(Vec3::new(10.0, 1.0, 10.0), 2, 2, vec![0.0, 1.0, 0.0, 1.0]);
        let shape = Shape::Heightmap(map);
        let hit = shape.closest_surface(Vec3::new(5.0, 2.0, 5.0)).expect("inside footprint");
        assert!(hit.normal.x < 0.0 && hit.normal.y > 0.9);
        assert!(hit.distance > 1.4 && hit.distance < 1.5);
        assert!(shape.closest_surface(Vec3::new(-1.0, 0.0, 5.0)).is_none());
    }

    #[test]
    fn world_bounds_follow_transform() {
        let shape = Shape::cuboid(Vec3::ONE);
        let transform = Transform::from_position(Vec3::new(10.0, 0.0, 0.0));
        let bounds = shape.world_bounds(&transform);
        assert_relative_eq!(bounds.min.x, 9.0, epsilon = 1e-6);
        assert_relative_eq!(bounds.max.x, 11.0, epsilon = 1e-6);
    }
}
