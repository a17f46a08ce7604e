use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, ConstraintSet, ConstraintType, Corrections, Multipliers,
    ProjectionContext,
};
use crate::{error::SolverResult, utils::math::pure_quat};

/// Cosserat rod stretch and shear between two particles and the orientation of their segment.
///
/// The segment direction `(p1 - p0) / l` is driven toward the third material
/// axis of `orientation · rest_orientation`. Stiffness is given per material axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StretchShearConstraints {
    pub particles: Vec<[u32; 2]>,
    /// Particle whose orientation frames the segment.
    pub orientation_indices: Vec<u32>,
    pub rest_lengths: Vec<f32>,
    pub rest_orientations: Vec<Quat>,
    pub stiffnesses: Vec<Vec3>,
}

/// `q · conj(e₃)`, with `e₃` the pure quaternion along Z.
fn q_e3_bar(q: Quat) -> Quat {
    Quat::from_xyzw(-q.y, q.x, -q.w, q.z)
}

impl StretchShearConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        particles: [u32; 2],
        orientation_index: u32,
        rest_length: f32,
        rest_orientation: Quat,
        stiffness: Vec3,
    ) -> usize {
        self.particles.push(particles);
        self.orientation_indices.push(orientation_index);
        self.rest_lengths.push(rest_length);
        self.rest_orientations.push(rest_orientation);
        self.stiffnesses.push(stiffness.clamp(Vec3::ZERO, Vec3::ONE));
        self.particles.len() - 1
    }
}

impl ConstraintSet for StretchShearConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::StretchShear
    }

    fn len(&self) -> usize {
        self.particles.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        let [p0, p1] = self.particles[index];
        out.extend_from_slice(&[p0, p1]);
        let q = self.orientation_indices[index];
        if q != p0 && q != p1 {
            out.push(q);
        }
    }

    fn project(
        &self,
        index: usize,
        _lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let [p0, p1] = self.particles[index];
        let q_index = self.orientation_indices[index];
        let length = self.rest_lengths[index];
        if length <= f32::EPSILON {
            return;
        }
        let (w0, w1) = (ctx.inv_mass(p0), ctx.inv_mass(p1));
        let wq = ctx.inv_rotational_mass(q_index);
        let denominator = (w0 + w1) / length + 4.0 * wq * length + 1e-6;

        let rest = self.rest_orientations[index];
        let frame = ctx.orientation(q_index) * rest;
        let director = frame * Vec3::Z;
        let gamma = (ctx.position(p1) - ctx.position(p0)) / length - director;

        // Scale the residual per material axis.
        let local = frame.conjugate() * gamma;
        let gamma = frame * (local * self.stiffnesses[index]) / denominator;

        if w0 > 0.0 {
            out.position(p0, gamma * w0);
        }
        if w1 > 0.0 {
            out.position(p1, -gamma * w1);
        }
        if wq > 0.0 {
            let correction = pure_quat(gamma) * q_e3_bar(frame) * (2.0 * wq * length);
            out.orientation(q_index, correction * rest.conjugate());
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.particles.len(),
            &[
                self.orientation_indices.len(),
                self.rest_lengths.len(),
                self.rest_orientations.len(),
                self.stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.orientation_indices, order)?;
        permute_vec(&mut self.rest_lengths, order)?;
        permute_vec(&mut self.rest_orientations, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}
