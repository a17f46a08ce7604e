use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::error::SolverResult;

/// Keeps particle pairs at a rest length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraints {
    pub particles: Vec<[u32; 2]>,
    pub rest_lengths: Vec<f32>,
    /// Stiffness used when the pair is stretched.
    pub stretch_stiffnesses: Vec<f32>,
    /// Stiffness used when the pair is compressed.
    pub compression_stiffnesses: Vec<f32>,
}

impl DistanceConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, a: u32, b: u32, rest_length: f32, stiffness: f32) -> usize {
        self.add_with_compression(a, b, rest_length, stiffness, stiffness)
    }

    pub fn add_with_compression(
        &mut self,
        a: u32,
        b: u32,
        rest_length: f32,
        stretch_stiffness: f32,
        compression_stiffness: f32,
    ) -> usize {
        self.particles.push([a, b]);
        self.rest_lengths.push(rest_length);
        self.stretch_stiffnesses.push(stretch_stiffness);
        self.compression_stiffnesses.push(compression_stiffness);
        self.particles.len() - 1
    }
}

impl ConstraintSet for DistanceConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Distance
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
        if wa + wb <= 0.0 {
            return;
        }
        let offset = ctx.position(a) - ctx.position(b);
        let length = offset.length();
        if length < 1e-6 {
            return;
        }

        let constraint = length - self.rest_lengths[index];
        let stiffness = if constraint >= 0.0 {
            self.stretch_stiffnesses[index]
        } else {
            self.compression_stiffnesses[index]
        };
        let Some(compliance) = ctx.compliance(stiffness) else {
            return;
        };

        let normal = offset / length;
        let delta = xpbd_delta(constraint, wa + wb, compliance, &mut lambda[0]);
        out.position(a, normal * (delta * wa));
        out.position(b, -normal * (delta * wb));
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.particles.len(),
            &[
                self.rest_lengths.len(),
                self.stretch_stiffnesses.len(),
                self.compression_stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.rest_lengths, order)?;
        permute_vec(&mut self.stretch_stiffnesses, order)?;
        permute_vec(&mut self.compression_stiffnesses, order)?;
        Ok(())
    }
}
