use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::error::SolverResult;

/// Keeps particles within a sphere around an animated skin point and in
/// front of a backstop plane behind it.
///
/// Skin points and normals are rewritten every frame from skeletal animation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinConstraints {
    pub particles: Vec<u32>,
    pub skin_points: Vec<Vec3>,
    pub skin_normals: Vec<Vec3>,
    pub radii: Vec<f32>,
    /// Distance behind the skin point at which the backstop plane sits.
    pub backstops: Vec<f32>,
    pub stiffnesses: Vec<f32>,
}

impl SkinConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        particle: u32,
        skin_point: Vec3,
        skin_normal: Vec3,
        radius: f32,
        backstop: f32,
        stiffness: f32,
    ) -> usize {
        self.particles.push(particle);
        self.skin_points.push(skin_point);
        self.skin_normals.push(skin_normal.normalize_or_zero());
        self.radii.push(radius.max(0.0));
        self.backstops.push(backstop);
        self.stiffnesses.push(stiffness);
        self.particles.len() - 1
    }

    /// Index of the constraint driving `particle`, if any.
    pub fn find(&self, particle: u32) -> Option<usize> {
        self.particles.iter().position(|&p| p == particle)
    }
}

impl ConstraintSet for SkinConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Skin
    }

    fn len(&self) -> usize {
        self.particles.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.push(self.particles[index]);
    }

    fn project(
        &self,
        index: usize,
        lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let particle = self.particles[index];
        let w = ctx.inv_mass(particle);
        if w <= 0.0 {
            return;
        }
        let anchor = self.skin_points[index];
        let normal = self.skin_normals[index];
        let mut position = ctx.position(particle);

        if let Some(compliance) = ctx.compliance(self.stiffnesses[index]) {
            let offset = position - anchor;
            let distance = offset.length();
            let radius = self.radii[index];
            if distance > radius && distance > 1e-6 {
                let direction = offset / distance;
                let delta = xpbd_delta(distance - radius, w, compliance, &mut lambda[0]);
                let correction = direction * (delta * w);
                position += correction;
                out.position(particle, correction);
            }
        }

        // The backstop is a hard limit regardless of stiffness.
        let depth = (position - anchor).dot(normal) + self.backstops[index];
        if depth < 0.0 && normal != Vec3::ZERO {
            out.position(particle, normal * -depth);
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.particles.len(),
            &[
                self.skin_points.len(),
                self.skin_normals.len(),
                self.radii.len(),
                self.backstops.len(),
                self.stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.skin_points, order)?;
        permute_vec(&mut self.skin_normals, order)?;
        permute_vec(&mut self.radii, order)?;
        permute_vec(&mut self.backstops, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}
