use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::error::SolverResult;

/// Welds particle pairs from different actors together (`C = |pᵢ - pⱼ|`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StitchConstraints {
    pub particles: Vec<[u32; 2]>,
    pub stiffnesses: Vec<f32>,
}

impl StitchConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, a: u32, b: u32, stiffness: f32) -> usize {
        self.particles.push([a, b]);
        self.stiffnesses.push(stiffness);
        self.particles.len() - 1
    }
}

impl ConstraintSet for StitchConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Stitch
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
        let [a, b] = self.particles[index];
        let (wa, wb) = (ctx.inv_mass(a), ctx.inv_mass(b));
        let Some(compliance) = ctx.compliance(self.stiffnesses[index]) else {
            return;
        };
        let offset = ctx.position(a) - ctx.position(b);
        let distance = offset.length();
        if distance < 1e-6 || wa + wb <= 0.0 {
            return;
        }
        let normal = offset / distance;
        let delta = xpbd_delta(distance, wa + wb, compliance, &mut lambda[0]);
        out.position(a, normal * (delta * wa));
        out.position(b, -normal * (delta * wb));
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(self.particles.len(), &[self.stiffnesses.len()])
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}
