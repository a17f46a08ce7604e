use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::error::SolverResult;

/// Resists bending of particle triplets `[b0, b1, v]`.
///
/// The constraint keeps the middle particle `v` at its rest distance from the
/// triplet centroid, `C = |v - c| - h0` with `c = (b0 + b1 + v) / 3`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BendingConstraints {
    pub particles: Vec<[u32; 3]>,
    pub rest_bends: Vec<f32>,
    pub stiffnesses: Vec<f32>,
    /// Bending tolerated before the constraint engages.
    pub max_bending: Vec<f32>,
}

impl BendingConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, particles: [u32; 3], rest_bend: f32, stiffness: f32, max_bending: f32) -> usize {
        self.particles.push(particles);
        self.rest_bends.push(rest_bend);
        self.stiffnesses.push(stiffness);
        self.max_bending.push(max_bending.max(0.0));
        self.particles.len() - 1
    }
}

impl ConstraintSet for BendingConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Bending
    }

    fn len(&self) -> usize {
        self.particles.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.extend_from_slice(&self.particles[index]);
    }

    fn project(
        &self,
        index: usize,
        lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let [b0, b1, v] = self.particles[index];
        let Some(compliance) = ctx.compliance(self.stiffnesses[index]) else {
            return;
        };
        let (w0, w1, wv) = (ctx.inv_mass(b0), ctx.inv_mass(b1), ctx.inv_mass(v));
        let weight = (w0 + w1 + 4.0 * wv) / 9.0;
        if weight <= 0.0 {
            return;
        }

        let (p0, p1, pv) = (ctx.position(b0), ctx.position(b1), ctx.position(v));
        let centroid = (p0 + p1 + pv) / 3.0;
        let offset = pv - centroid;
        let distance = offset.length();
        if distance < 1e-6 {
            return;
        }

        let mut constraint = distance - self.rest_bends[index];
        let slack = self.max_bending[index];
        if constraint.abs() <= slack {
            return;
        }
        constraint -= slack.copysign(constraint);

        let normal = offset / distance;
        let delta = xpbd_delta(constraint, weight, compliance, &mut lambda[0]);
        out.position(b0, normal * (-delta * w0 / 3.0));
        out.position(b1, normal * (-delta * w1 / 3.0));
        out.position(v, normal * (2.0 * delta * wv / 3.0));
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.particles.len(),
            &[
                self.rest_bends.len(),
                self.stiffnesses.len(),
                self.max_bending.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.rest_bends, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        permute_vec(&mut self.max_bending, order)?;
        Ok(())
    }
}
