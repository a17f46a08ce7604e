use log::{debug, warn};

use super::Solver;
use crate::{
    dynamics::{BatchHandle, ConstraintBatch, ConstraintType},
    error::{SolverError, SolverResult},
};

impl Solver {
    /// Takes ownership of a batch. It must be cooked against this solver's
    /// capacity before the next update; a batch cooked for a larger particle
    /// range counts as uncooked here.
    pub fn add_batch(&mut self, batch: ConstraintBatch) -> BatchHandle {
        debug!(
            "added {:?} batch with {} constraints",
            batch.constraint_type(),
            batch.len()
        );
        if batch.is_cooked() && !batch.is_cooked_for(self.particles.capacity()) {
            warn!(
                "{:?} batch references particles past capacity {}, recook before updating",
                batch.constraint_type(),
                self.particles.capacity()
            );
        }
        self.batches.insert(batch)
    }

    pub fn remove_batch(&mut self, handle: BatchHandle) -> SolverResult<ConstraintBatch> {
        self.batches
            .remove(handle)
            .ok_or(SolverError::InvalidHandle("batch"))
    }

    pub fn batch(&self, handle: BatchHandle) -> Option<&ConstraintBatch> {
        self.batches.get(handle)
    }

    pub fn batch_mut(&mut self, handle: BatchHandle) -> Option<&mut ConstraintBatch> {
        self.batches.get_mut(handle)
    }

    pub fn batches(&self) -> impl Iterator<Item = (BatchHandle, &ConstraintBatch)> + '_ {
        self.batches.iter()
    }

    /// Cooks one batch against this solver's particle capacity.
    pub fn cook_batch(&mut self, handle: BatchHandle) -> SolverResult<Vec<usize>> {
        let max_particles = self.particles.capacity();
        self.batches
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("batch"))?
            .cook(max_particles)
    }

    /// Cooks every batch modified since it was last cooked.
    pub fn cook_all_batches(&mut self) -> SolverResult<()> {
        let max_particles = self.particles.capacity();
        for (_, batch) in self.batches.iter_mut() {
            if !batch.is_cooked_for(max_particles) {
                batch.cook(max_particles)?;
            }
        }
        Ok(())
    }

    pub fn set_batch_phase_sizes(&mut self, handle: BatchHandle, sizes: &[u32]) -> SolverResult<()> {
        let max_particles = self.particles.capacity();
        self.batches
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("batch"))?
            .set_phase_sizes(sizes, max_particles)
    }

    /// Number of constraints of `kind`: stored constraints for batch kinds,
    /// contacts of the last substep for contact kinds.
    pub fn constraint_count(&self, kind: ConstraintType) -> usize {
        match kind {
            ConstraintType::ParticleCollision | ConstraintType::ParticleFriction => {
                self.particle_contacts.len()
            }
            ConstraintType::Collision | ConstraintType::Friction => self.collision_contacts.len(),
            _ => self
                .batches
                .iter()
                .filter(|(_, batch)| batch.constraint_type() == kind)
                .map(|(_, batch)| batch.len())
                .sum(),
        }
    }
}
