//! Barycentric binding of a slave surface onto the triangles of a master surface.

use glam::{Vec3, Vec4};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{SolverError, SolverResult},
    utils::math::{barycentric, closest_point_on_triangle, triangle_normal},
};

/// Flag used for every vertex when no flags are supplied.
pub const DEFAULT_SKIN_FLAG: u32 = 0x1;

/// A point expressed on a triangle: barycentric coordinates plus an offset
/// along the interpolated surface normal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BarycentricPoint {
    pub coords: Vec3,
    pub height: f32,
}

impl BarycentricPoint {
    pub fn evaluate(&self, positions: [Vec3; 3], normals: [Vec3; 3]) -> Vec3 {
        let c = self.coords;
        let base = positions[0] * c.x + positions[1] * c.y + positions[2] * c.z;
        let normal = (normals[0] * c.x + normals[1] * c.y + normals[2] * c.z).normalize_or_zero();
        base + normal * self.height
    }
}

/// Binding of one slave vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkinInfo {
    /// Master triangle id.
    pub triangle: u32,
    pub position: BarycentricPoint,
    /// Tip of the vertex normal.
    pub normal: BarycentricPoint,
    /// Tip of the vertex tangent.
    pub tangent: BarycentricPoint,
}

/// Borrowed view of a triangle surface used as a skinning source or target.
#[derive(Debug, Clone, Copy)]
pub struct SkinSurface<'a> {
    pub positions: &'a [Vec3],
    pub normals: &'a [Vec3],
    /// May be empty; tangent tips then collapse onto the vertex.
    pub tangents: &'a [Vec4],
    pub triangles: &'a [[u32; 3]],
}

impl SkinSurface<'_> {
    fn validate(&self) -> SolverResult<()> {
        let count = self.positions.len();
        if self.normals.len() != count {
            return Err(SolverError::LengthMismatch {
                expected: count,
                actual: self.normals.len(),
            });
        }
        if !self.tangents.is_empty() && self.tangents.len() != count {
            return Err(SolverError::LengthMismatch {
                expected: count,
                actual: self.tangents.len(),
            });
        }
        match self.triangles.iter().flatten().find(|&&v| v as usize >= count) {
            Some(&index) => Err(SolverError::VertexOutOfRange {
                index: index as usize,
                count,
            }),
            None => Ok(()),
        }
    }

    fn corners(&self, triangle: [u32; 3]) -> ([Vec3; 3], [Vec3; 3]) {
        let [a, b, c] = triangle.map(|v| v as usize);
        (
            [self.positions[a], self.positions[b], self.positions[c]],
            [self.normals[a], self.normals[b], self.normals[c]],
        )
    }
}

fn flag_of(flags: &[u32], vertex: usize) -> u32 {
    if flags.is_empty() {
        DEFAULT_SKIN_FLAG
    } else {
        flags[vertex]
    }
}

fn check_flags(flags: &[u32], count: usize) -> SolverResult<()> {
    if flags.is_empty() || flags.len() == count {
        Ok(())
    } else {
        Err(SolverError::LengthMismatch {
            expected: count,
            actual: flags.len(),
        })
    }
}

/// Per slave vertex binding onto the closest eligible master triangle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriangleSkinMap {
    bindings: Vec<Option<SkinInfo>>,
}

impl TriangleSkinMap {
    /// Binds every flagged slave vertex onto the nearest master triangle whose
    /// three vertices share a flag bit with it. Empty flag slices mean
    /// [`DEFAULT_SKIN_FLAG`] everywhere.
    pub fn bind(
        master: &SkinSurface<'_>,
        slave: &SkinSurface<'_>,
        master_flags: &[u32],
        slave_flags: &[u32],
    ) -> SolverResult<Self> {
        master.validate()?;
        slave.validate()?;
        check_flags(master_flags, master.positions.len())?;
        check_flags(slave_flags, slave.positions.len())?;

        let mut skipped = 0usize;
        let candidates: Vec<(u32, u32, Vec3)> = master
            .triangles
            .iter()
            .enumerate()
            .filter_map(|(id, &triangle)| {
                let (p, _) = master.corners(triangle);
                let normal = triangle_normal(p[0], p[1], p[2]);
                if normal == Vec3::ZERO {
                    skipped += 1;
                    return None;
                }
                let [a, b, c] = triangle.map(|v| flag_of(master_flags, v as usize));
                Some((id as u32, a & b & c, normal))
            })
            .collect();
        if skipped > 0 {
            warn!("skin map binding skipped {skipped} degenerate master triangles");
        }

        let bindings: Vec<Option<SkinInfo>> = (0..slave.positions.len())
            .map(|vertex| {
                let flag = flag_of(slave_flags, vertex);
                if flag == 0 {
                    return None;
                }
                let position = slave.positions[vertex];
                let (triangle, normal) = candidates
                    .iter()
                    .filter(|(_, mask, _)| mask & flag != 0)
                    .map(|&(id, _, normal)| {
                        let (p, _) = master.corners(master.triangles[id as usize]);
                        let closest = closest_point_on_triangle(position, p[0], p[1], p[2]);
                        (id, normal, closest.distance_squared(position))
                    })
                    .min_by(|a, b| a.2.total_cmp(&b.2))
                    .map(|(id, normal, _)| (id, normal))?;

                let (p, n) = master.corners(master.triangles[triangle as usize]);
                let project = |point: Vec3| {
                    let coords = barycentric(point, p[0], p[1], p[2]);
                    let base = p[0] * coords.x + p[1] * coords.y + p[2] * coords.z;
                    // Height is measured along the face normal oriented like the vertex normals.
                    let smooth = n[0] * coords.x + n[1] * coords.y + n[2] * coords.z;
                    let normal = if smooth.dot(normal) < 0.0 { -normal } else { normal };
                    BarycentricPoint {
                        coords,
                        height: (point - base).dot(normal),
                    }
                };
                let tangent = slave
                    .tangents
                    .get(vertex)
                    .map_or(Vec3::ZERO, |t| t.truncate());
                Some(SkinInfo {
                    triangle,
                    position: project(position),
                    normal: project(position + slave.normals[vertex]),
                    tangent: project(position + tangent),
                })
            })
            .collect();

        debug!(
            "bound {} of {} slave vertices onto {} master triangles",
            bindings.iter().flatten().count(),
            bindings.len(),
            master.triangles.len()
        );
        Ok(Self { bindings })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn skin_info(&self) -> &[Option<SkinInfo>] {
        &self.bindings
    }

    pub fn set_skin_info(&mut self, bindings: Vec<Option<SkinInfo>>) {
        self.bindings = bindings;
    }

    /// Rebuilds bound slave vertices from the master's current pose. Unbound
    /// vertices and the tangent handedness in `w` are left untouched.
    pub fn evaluate(
        &self,
        master: &SkinSurface<'_>,
        positions: &mut [Vec3],
        normals: &mut [Vec3],
        tangents: &mut [Vec4],
    ) -> SolverResult<()> {
        master.validate()?;
        for len in [positions.len(), normals.len(), tangents.len()] {
            if len < self.bindings.len() {
                return Err(SolverError::LengthMismatch {
                    expected: self.bindings.len(),
                    actual: len,
                });
            }
        }

        for (vertex, info) in self.bindings.iter().enumerate() {
            let Some(info) = info else { continue };
            let Some(&triangle) = master.triangles.get(info.triangle as usize) else {
                continue;
            };
            let (p, n) = master.corners(triangle);
            let position = info.position.evaluate(p, n);
            positions[vertex] = position;
            normals[vertex] = (info.normal.evaluate(p, n) - position).normalize_or_zero();
            let tangent = (info.tangent.evaluate(p, n) - position).normalize_or_zero();
            tangents[vertex] = tangent.extend(tangents[vertex].w);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vec3>, Vec<Vec3>, Vec<[u32; 3]>) {
        (
            vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 0.0, 1.0), Vec3::Z],
            vec![Vec3::NEG_Y; 4],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn point_above_triangle_keeps_height() {
        let (positions, normals, triangles) = quad();
        let master = SkinSurface {
            positions: &positions,
            normals: &normals,
            tangents: &[],
            triangles: &triangles,
        };
        let slave_positions = [Vec3::new(0.7, -0.3, 0.2)];
        let slave_normals = [Vec3::X];
        let slave = SkinSurface {
            positions: &slave_positions,
            normals: &slave_normals,
            tangents: &[],
            triangles: &[],
        };
        let map = TriangleSkinMap::bind(&master, &slave, &[], &[]).unwrap();
        let info = map.skin_info()[0].unwrap();
        assert_eq!(info.triangle, 0);
        // Face normal of [0, 1, 2] points down -Y.
        assert!((info.position.height - 0.3).abs() < 1e-6);
    }

    #[test]
    fn flags_restrict_candidate_triangles() {
        let (positions, normals, triangles) = quad();
        let master = SkinSurface {
            positions: &positions,
            normals: &normals,
            tangents: &[],
            triangles: &triangles,
        };
        let slave_positions = [Vec3::new(0.1, 0.0, 0.9), Vec3::new(0.5, 0.0, 0.5)];
        let slave_normals = [Vec3::Y; 2];
        let slave = SkinSurface {
            positions: &slave_positions,
            normals: &slave_normals,
            tangents: &[],
            triangles: &[],
        };
        // Vertex 3 lacks bit 2, so only triangle [0, 1, 2] is eligible for slave vertex 0.
        let map = TriangleSkinMap::bind(&master, &slave, &[0b11, 0b11, 0b11, 0b01], &[0b10, 0b00])
            .unwrap();
        assert_eq!(map.skin_info()[0].map(|i| i.triangle), Some(0));
        assert!(map.skin_info()[1].is_none());

        assert_eq!(
            TriangleSkinMap::bind(&master, &slave, &[1], &[]),
            Err(SolverError::LengthMismatch { expected: 4, actual: 1 })
        );
    }
}
