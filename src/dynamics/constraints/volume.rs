use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::error::{SolverError, SolverResult};

/// Preserves the enclosed volume of closed triangle meshes, one constraint per mesh.
///
/// `C = V - pressure·V₀`, so pressures above one inflate the mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeConstraints {
    pub triangles: Vec<Vec<[u32; 3]>>,
    pub rest_volumes: Vec<f32>,
    pub pressures: Vec<f32>,
    pub stiffnesses: Vec<f32>,
}

/// Signed volume enclosed by `triangles`, positive for outward winding.
pub fn mesh_volume(triangles: &[[u32; 3]], positions: &[Vec3]) -> f32 {
    triangles
        .iter()
        .map(|&[a, b, c]| {
            let (a, b, c) = (positions[a as usize], positions[b as usize], positions[c as usize]);
            a.dot(b.cross(c))
        })
        .sum::<f32>()
        / 6.0
}

impl VolumeConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        triangles: Vec<[u32; 3]>,
        rest_volume: f32,
        pressure: f32,
        stiffness: f32,
    ) -> usize {
        self.triangles.push(triangles);
        self.rest_volumes.push(rest_volume);
        self.pressures.push(pressure);
        self.stiffnesses.push(stiffness);
        self.triangles.len() - 1
    }

    /// Adds a constraint whose rest volume is the volume `triangles` enclose at `positions`.
    pub fn add_at_rest(
        &mut self,
        triangles: Vec<[u32; 3]>,
        positions: &[Vec3],
        pressure: f32,
        stiffness: f32,
    ) -> SolverResult<usize> {
        if let Some(&index) = triangles
            .iter()
            .flatten()
            .find(|&&i| i as usize >= positions.len())
        {
            return Err(SolverError::ParticleOutOfRange {
                index: index as usize,
                max: positions.len(),
            });
        }
        let rest_volume = mesh_volume(&triangles, positions);
        Ok(self.add(triangles, rest_volume, pressure, stiffness))
    }
}

impl ConstraintSet for VolumeConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Volume
    }

    fn len(&self) -> usize {
        self.triangles.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        let start = out.len();
        for triangle in &self.triangles[index] {
            out.extend_from_slice(triangle);
        }
        out[start..].sort_unstable();
        let mut unique = out.split_off(start);
        unique.dedup();
        out.extend(unique);
    }

    fn project(
        &self,
        index: usize,
        lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let Some(compliance) = ctx.compliance(self.stiffnesses[index]) else {
            return;
        };
        let triangles = &self.triangles[index];
        if triangles.is_empty() {
            return;
        }

        let mut volume = 0.0;
        let mut gradients: HashMap<u32, Vec3> = HashMap::new();
        for &[a, b, c] in triangles {
            let (pa, pb, pc) = (ctx.position(a), ctx.position(b), ctx.position(c));
            volume += pa.dot(pb.cross(pc));
            *gradients.entry(a).or_default() += pb.cross(pc);
            *gradients.entry(b).or_default() += pc.cross(pa);
            *gradients.entry(c).or_default() += pa.cross(pb);
        }
        volume /= 6.0;

        let weight: f32 = gradients
            .iter()
            .map(|(&i, g)| ctx.inv_mass(i) * (*g / 6.0).length_squared())
            .sum();
        if weight <= 0.0 {
            return;
        }

        let constraint = volume - self.pressures[index] * self.rest_volumes[index];
        let delta = xpbd_delta(constraint, weight, compliance, &mut lambda[0]);
        for (i, gradient) in gradients {
            let w = ctx.inv_mass(i);
            if w > 0.0 {
                out.position(i, gradient / 6.0 * (delta * w));
            }
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.triangles.len(),
            &[
                self.rest_volumes.len(),
                self.pressures.len(),
                self.stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.triangles, order)?;
        permute_vec(&mut self.rest_volumes, order)?;
        permute_vec(&mut self.pressures, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{project_once, store_with};
    use super::*;

    fn tetrahedron() -> (Vec<[u32; 3]>, Vec<Vec3>) {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
        let triangles = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
        (triangles, positions)
    }

    #[test]
    fn tetrahedron_volume_is_one_sixth() {
        let (triangles, positions) = tetrahedron();
        assert!((mesh_volume(&triangles, &positions) - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn rest_volume_is_measured_from_positions() {
        let (triangles, positions) = tetrahedron();
        let mut constraints = VolumeConstraints::new();
        let index = constraints
            .add_at_rest(triangles.clone(), &positions, 1.0, 1.0)
            .expect("indices in range");
        assert!((constraints.rest_volumes[index] - 1.0 / 6.0).abs() < 1e-6);

        let store = store_with(&positions);
        let out = project_once(&constraints, index, &store);
        assert!(out.positions.iter().all(|(_, d)| d.length() < 1e-6));

        // Squashing the apex toward the base pushes it back out.
        let squashed = store_with(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(0.0, 0.0, 0.5)]);
        let out = project_once(&constraints, index, &squashed);
        let apex: Vec3 = out
            .positions
            .iter()
            .filter(|(i, _)| *i == 3)
            .map(|(_, d)| *d)
            .sum();
        assert!(apex.z > 0.0, "apex moved by {apex:?}");

        assert_eq!(
            constraints.add_at_rest(triangles, &positions[..3], 1.0, 1.0),
            Err(SolverError::ParticleOutOfRange { index: 3, max: 3 })
        );
    }

    #[test]
    fn particles_are_listed_once() {
        let (triangles, _) = tetrahedron();
        let mut constraints = VolumeConstraints::new();
        constraints.add(triangles, 1.0 / 6.0, 1.0, 1.0);
        let mut out = vec![9];
        constraints.particles(0, &mut out);
        assert_eq!(out, vec![9, 0, 1, 2, 3]);
    }
}
