use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, xpbd_delta, ConstraintSet, ConstraintType, Corrections,
    Multipliers, ProjectionContext,
};
use crate::{collision::ColliderHandle, error::SolverResult};

/// Attaches particles to a point fixed in a collider's local frame.
///
/// Particles with rotational mass also have their orientation pulled toward
/// `collider rotation · rest_darboux`. Pins whose collider no longer exists
/// are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinConstraints {
    pub particles: Vec<u32>,
    pub colliders: Vec<ColliderHandle>,
    /// Attachment point in collider space.
    pub offsets: Vec<Vec3>,
    pub rest_darboux: Vec<Quat>,
    pub stiffnesses: Vec<f32>,
}

impl PinConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        particle: u32,
        collider: ColliderHandle,
        offset: Vec3,
        rest_darboux: Quat,
        stiffness: f32,
    ) -> usize {
        self.particles.push(particle);
        self.colliders.push(collider);
        self.offsets.push(offset);
        self.rest_darboux.push(rest_darboux);
        self.stiffnesses.push(stiffness);
        self.particles.len() - 1
    }

    /// Removes every pin attached to `collider`. Returns how many were removed.
    pub fn remove_collider(&mut self, collider: ColliderHandle) -> usize {
        let keep: Vec<usize> = (0..self.colliders.len())
            .filter(|&i| self.colliders[i] != collider)
            .collect();
        let removed = self.colliders.len() - keep.len();
        if removed > 0 {
            self.particles = keep.iter().map(|&i| self.particles[i]).collect();
            self.colliders = keep.iter().map(|&i| self.colliders[i]).collect();
            self.offsets = keep.iter().map(|&i| self.offsets[i]).collect();
            self.rest_darboux = keep.iter().map(|&i| self.rest_darboux[i]).collect();
            self.stiffnesses = keep.iter().map(|&i| self.stiffnesses[i]).collect();
        }
        removed
    }
}

impl ConstraintSet for PinConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Pin
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
        let Some(collider) = ctx.world.collider(self.colliders[index]) else {
            return;
        };
        let Some(compliance) = ctx.compliance(self.stiffnesses[index]) else {
            return;
        };
        let particle = self.particles[index];
        let transform = collider.transform;

        let w = ctx.inv_mass(particle);
        if w > 0.0 {
            let target = transform.transform_point(self.offsets[index]);
            let offset = ctx.position(particle) - target;
            let distance = offset.length();
            if distance > 1e-6 {
                let delta = xpbd_delta(distance, w, compliance, &mut lambda[0]);
                out.position(particle, offset / distance * (delta * w));
            }
        }

        let wq = ctx.inv_rotational_mass(particle);
        if wq > 0.0 {
            let current = ctx.orientation(particle);
            let mut target = transform.rotation * self.rest_darboux[index];
            if current.dot(target) < 0.0 {
                target = -target;
            }
            let factor = wq / (wq + compliance);
            let correction = (target - current) * factor;
            out.orientation(particle, correction);
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.particles.len(),
            &[
                self.colliders.len(),
                self.offsets.len(),
                self.rest_darboux.len(),
                self.stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.particles, order)?;
        permute_vec(&mut self.colliders, order)?;
        permute_vec(&mut self.offsets, order)?;
        permute_vec(&mut self.rest_darboux, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}
