use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::error::SolverResult;

/// One-sided maximum distance from an anchor particle.
///
/// The anchor is only read, so a tether writes to its tethered particle alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConstraints {
    /// `[particle, anchor]` pairs.
    pub particles: Vec<[u32; 2]>,
    pub max_lengths: Vec<f32>,
    /// Multiplier applied to `max_lengths`.
    pub scales: Vec<f32>,
    pub stiffnesses: Vec<f32>,
}

impl TetherConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, particle: u32, anchor: u32, max_length: f32, scale: f32, stiffness: f32) -> usize {
        self.particles.push([particle, anchor]);
        self.max_lengths.push(max_length);
        self.scales.push(scale);
        self.stiffnesses.push(stiffness);
        self.particles.len() - 1
    }
}

impl ConstraintSet for TetherConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Tether
    }

    fn len(&self) -> usize {
        self.particles.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.push(self.particles[index][0]);
    }

    fn project(
        &self,
        index: usize,
        lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let [particle, anchor] = self.particles[index];
        let w = ctx.inv_mass(particle);
        if w <= 0.0 {
            return;
        }
        let Some(compliance) = ctx.compliance(self.stiffnesses[index]) else {
            return;
        };
        let offset = ctx.position(particle) - ctx.position(anchor);
        let distance = offset.length();
        let limit = self.max_lengths[index] * self.scales[index];
        if distance <= limit || distance < 1e-6 {
            return;
        }
        let normal = offset / distance;
        let delta = xpbd_delta(distance - limit, w, compliance, &mut lambda[0]);
        out.position(particle, normal * (delta * w));
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.particles.len(),
            &[
                self.max_lengths.len(),
                self.scales.len(),
                self.stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.max_lengths, order)?;
        permute_vec(&mut self.scales, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}
