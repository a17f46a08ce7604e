//! Homogeneous constraint batches and their phase partition.

use std::ops::Range;

use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    coloring,
    constraints::{
        AerodynamicConstraints, BendTwistConstraints, BendingConstraints, ChainConstraints,
        ConstraintSet, ConstraintType, Corrections, DistanceConstraints, Multipliers,
        PinConstraints, ProjectionContext, ShapeMatchingConstraints, SkinConstraints,
        StitchConstraints, StretchShearConstraints, TetherConstraints, VolumeConstraints,
    },
};
use crate::{
    error::{SolverError, SolverResult},
    utils::{allocator::Handle, tasks::TaskScheduler},
};

pub type BatchHandle = Handle<ConstraintBatch>;

/// Constraint storage of one batch, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchData {
    Distance(DistanceConstraints),
    Bending(BendingConstraints),
    Skin(SkinConstraints),
    Aerodynamic(AerodynamicConstraints),
    Volume(VolumeConstraints),
    ShapeMatching(ShapeMatchingConstraints),
    StretchShear(StretchShearConstraints),
    BendTwist(BendTwistConstraints),
    Tether(TetherConstraints),
    Pin(PinConstraints),
    Stitch(StitchConstraints),
    Chain(ChainConstraints),
}

macro_rules! dispatch {
    ($data:expr, $set:ident => $body:expr) => {
        match $data {
            BatchData::Distance($set) => $body,
            BatchData::Bending($set) => $body,
            BatchData::Skin($set) => $body,
            BatchData::Aerodynamic($set) => $body,
            BatchData::Volume($set) => $body,
            BatchData::ShapeMatching($set) => $body,
            BatchData::StretchShear($set) => $body,
            BatchData::BendTwist($set) => $body,
            BatchData::Tether($set) => $body,
            BatchData::Pin($set) => $body,
            BatchData::Stitch($set) => $body,
            BatchData::Chain($set) => $body,
        }
    };
}

/// Constraint kinds that can be stored in a [`ConstraintBatch`].
pub trait BatchKind: ConstraintSet + Sized {
    fn from_data(data: &BatchData) -> Option<&Self>;
    fn from_data_mut(data: &mut BatchData) -> Option<&mut Self>;
}

macro_rules! batch_kind {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BatchData {
                fn from(set: $ty) -> Self {
                    BatchData::$variant(set)
                }
            }

            impl BatchKind for $ty {
                fn from_data(data: &BatchData) -> Option<&Self> {
                    match data {
                        BatchData::$variant(set) => Some(set),
                        _ => None,
                    }
                }

                fn from_data_mut(data: &mut BatchData) -> Option<&mut Self> {
                    match data {
                        BatchData::$variant(set) => Some(set),
                        _ => None,
                    }
                }
            }
        )*
    };
}

batch_kind! {
    Distance => DistanceConstraints,
    Bending => BendingConstraints,
    Skin => SkinConstraints,
    Aerodynamic => AerodynamicConstraints,
    Volume => VolumeConstraints,
    ShapeMatching => ShapeMatchingConstraints,
    StretchShear => StretchShearConstraints,
    BendTwist => BendTwistConstraints,
    Tether => TetherConstraints,
    Pin => PinConstraints,
    Stitch => StitchConstraints,
    Chain => ChainConstraints,
}

impl BatchData {
    pub fn constraint_type(&self) -> ConstraintType {
        dispatch!(self, set => set.constraint_type())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, set => set.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn particles(&self, index: usize, out: &mut Vec<u32>) {
        dispatch!(self, set => set.particles(index, out))
    }

    pub fn validate(&self) -> SolverResult<()> {
        dispatch!(self, set => set.validate())
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        dispatch!(self, set => set.permute(order))
    }

    /// One past the highest particle index any constraint references.
    fn particle_bound(&self) -> usize {
        let mut scratch = Vec::new();
        let mut bound = 0;
        for i in 0..self.len() {
            scratch.clear();
            self.particles(i, &mut scratch);
            bound = scratch.iter().fold(bound, |b, &p| b.max(p as usize + 1));
        }
        bound
    }

    fn end_substep(&mut self, ctx: &ProjectionContext<'_>) {
        dispatch!(self, set => set.end_substep(ctx))
    }
}

/// A homogeneous set of constraints partitioned into particle-disjoint phases.
///
/// Cooking reorders storage so every phase is a contiguous range; any mutable
/// access to the constraints invalidates it. Enabling, disabling and toggling
/// individual constraints keep the partition. A cooked batch is only valid for
/// solvers holding every particle it references, see [`Self::is_cooked_for`].
#[derive(Debug, Clone)]
pub struct ConstraintBatch {
    data: BatchData,
    lambdas: Vec<Multipliers>,
    active: Vec<bool>,
    phase_sizes: Vec<u32>,
    cooked: bool,
    particle_bound: usize,
    enabled: bool,
}

impl ConstraintBatch {
    pub fn new(data: impl Into<BatchData>) -> Self {
        let data = data.into();
        let len = data.len();
        Self {
            data,
            lambdas: vec![[0.0; 4]; len],
            active: vec![true; len],
            phase_sizes: Vec::new(),
            cooked: len == 0,
            particle_bound: 0,
            enabled: true,
        }
    }

    pub fn constraint_type(&self) -> ConstraintType {
        self.data.constraint_type()
    }

    pub fn data(&self) -> &BatchData {
        &self.data
    }

    /// Mutable access to the constraints. Invalidates the phase partition.
    pub fn data_mut(&mut self) -> &mut BatchData {
        self.cooked = false;
        &mut self.data
    }

    pub fn get<C: BatchKind>(&self) -> Option<&C> {
        C::from_data(&self.data)
    }

    /// Typed mutable access to the constraints. Invalidates the phase partition.
    pub fn get_mut<C: BatchKind>(&mut self) -> Option<&mut C> {
        self.cooked = false;
        C::from_data_mut(&mut self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn sync_len(&mut self) {
        let len = self.data.len();
        self.lambdas.resize(len, [0.0; 4]);
        self.active.resize(len, true);
    }

    /// Partitions the constraints into phases and reorders storage to match.
    ///
    /// Returns the applied permutation: constraint `i` is the old constraint `order[i]`.
    ///
    /// Fails without touching storage if the parallel arrays disagree in length
    /// or a constraint references a particle at or past `max_particles`.
    pub fn cook(&mut self, max_particles: usize) -> SolverResult<Vec<usize>> {
        self.data.validate()?;
        self.sync_len();
        let data = &self.data;
        let assignment =
            coloring::color_constraints(data.len(), max_particles, |i, out| data.particles(i, out))?;
        let (order, sizes) = coloring::phase_order(&assignment);

        self.data.permute(&order)?;
        self.lambdas = order.iter().map(|&i| self.lambdas[i]).collect();
        self.active = order.iter().map(|&i| self.active[i]).collect();
        self.phase_sizes = sizes;
        self.particle_bound = self.data.particle_bound();
        self.cooked = true;
        debug!(
            "Cooked {:?} batch: {} constraints in {} phases",
            self.constraint_type(),
            self.len(),
            self.phase_sizes.len()
        );
        Ok(order)
    }

    pub fn is_cooked(&self) -> bool {
        self.cooked
    }

    /// Whether the partition is current and every referenced particle is below `max_particles`.
    pub fn is_cooked_for(&self, max_particles: usize) -> bool {
        self.cooked && self.particle_bound <= max_particles
    }

    pub fn phase_sizes(&self) -> &[u32] {
        &self.phase_sizes
    }

    /// Restores a previously computed partition after validating it.
    pub fn set_phase_sizes(&mut self, sizes: &[u32], max_particles: usize) -> SolverResult<()> {
        self.data.validate()?;
        self.sync_len();
        let data = &self.data;
        coloring::validate_partition(sizes, data.len(), max_particles, |i, out| {
            data.particles(i, out)
        })?;
        self.phase_sizes = sizes.to_vec();
        self.particle_bound = self.data.particle_bound();
        self.cooked = true;
        Ok(())
    }

    pub fn phase_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        coloring::phase_ranges(&self.phase_sizes)
    }

    /// Activates exactly the listed constraints; every other one is skipped at solve time.
    pub fn set_active_constraints(&mut self, indices: &[u32]) -> SolverResult<()> {
        self.sync_len();
        let count = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= count) {
            return Err(SolverError::ConstraintOutOfRange {
                index: index as usize,
                count,
            });
        }
        self.active.iter_mut().for_each(|a| *a = false);
        for &i in indices {
            self.active[i as usize] = true;
        }
        Ok(())
    }

    pub fn active_constraint_indices(&self) -> Vec<u32> {
        (0..self.len())
            .filter(|&i| self.active.get(i).copied().unwrap_or(true))
            .map(|i| i as u32)
            .collect()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn lambdas(&self) -> &[Multipliers] {
        &self.lambdas
    }

    /// Force magnitude of every constraint during the last substep, `λ / dt²`.
    pub fn constraint_forces(&self, dt: f32) -> Vec<f32> {
        if dt <= 0.0 {
            return vec![0.0; self.lambdas.len()];
        }
        let inv_dt2 = 1.0 / (dt * dt);
        self.lambdas.iter().map(|l| l[0] * inv_dt2).collect()
    }

    pub(crate) fn reset_lambdas(&mut self) {
        self.sync_len();
        self.lambdas.iter_mut().for_each(|l| *l = [0.0; 4]);
    }

    /// Projects every active constraint of one phase into per-worker correction buffers.
    pub(crate) fn project_phase(
        &mut self,
        phase: Range<usize>,
        ctx: &ProjectionContext<'_>,
        scheduler: &TaskScheduler,
    ) -> Vec<Corrections> {
        let active = &self.active[phase.clone()];
        let lambdas = &mut self.lambdas[phase.clone()];
        dispatch!(&self.data, set => project_range(set, phase.start, active, lambdas, ctx, scheduler))
    }

    pub(crate) fn end_substep(&mut self, ctx: &ProjectionContext<'_>) {
        self.data.end_substep(ctx);
    }
}

fn project_range<C: ConstraintSet>(
    set: &C,
    offset: usize,
    active: &[bool],
    lambdas: &mut [Multipliers],
    ctx: &ProjectionContext<'_>,
    scheduler: &TaskScheduler,
) -> Vec<Corrections> {
    scheduler.fold_mut(lambdas, Corrections::default, |out, i, lambda| {
        if active[i] {
            set.project(offset + i, lambda, ctx, out);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rope(segments: u32) -> DistanceConstraints {
        let mut constraints = DistanceConstraints::new();
        for i in 0..segments {
            constraints.add(i, i + 1, 1.0, 1.0);
        }
        constraints
    }

    #[test]
    fn cooking_groups_phases_contiguously() {
        let mut batch = ConstraintBatch::new(rope(4));
        assert!(!batch.is_cooked());
        let order = batch.cook(5).unwrap();
        assert_eq!(order, vec![0, 2, 1, 3]);
        assert_eq!(batch.phase_sizes(), &[2, 2]);

        let distances = batch.get::<DistanceConstraints>().unwrap();
        assert_eq!(distances.particles, vec![[0, 1], [2, 3], [1, 2], [3, 4]]);
    }

    #[test]
    fn recooking_is_identity() {
        let mut batch = ConstraintBatch::new(rope(6));
        batch.cook(10).unwrap();
        let sizes = batch.phase_sizes().to_vec();
        let order = batch.cook(10).unwrap();
        assert_eq!(order, (0..6).collect::<Vec<_>>());
        assert_eq!(batch.phase_sizes(), sizes.as_slice());
    }

    #[test]
    fn mutation_invalidates_cooking_but_enable_does_not() {
        let mut batch = ConstraintBatch::new(rope(2));
        batch.cook(3).unwrap();
        batch.set_enabled(false);
        assert!(batch.is_cooked());
        batch.get_mut::<DistanceConstraints>().unwrap().add(2, 0, 1.0, 1.0);
        assert!(!batch.is_cooked());
    }

    #[test]
    fn active_constraints_are_validated() {
        let mut batch = ConstraintBatch::new(rope(3));
        batch.set_active_constraints(&[0, 2]).unwrap();
        assert_eq!(batch.active_constraint_indices(), vec![0, 2]);
        assert_eq!(
            batch.set_active_constraints(&[3]),
            Err(SolverError::ConstraintOutOfRange { index: 3, count: 3 })
        );
    }

    #[test]
    fn ragged_arrays_fail_to_cook() {
        let mut constraints = DistanceConstraints::new();
        constraints.add(0, 1, 1.0, 1.0);
        constraints.particles.push([1, 2]);
        let mut batch = ConstraintBatch::new(constraints);
        assert_eq!(
            batch.cook(3),
            Err(SolverError::LengthMismatch { expected: 2, actual: 1 })
        );
        assert!(!batch.is_cooked());
        assert_eq!(
            batch.set_phase_sizes(&[2], 3),
            Err(SolverError::LengthMismatch { expected: 2, actual: 1 })
        );
        assert!(!batch.is_cooked());

        let distances = batch.get_mut::<DistanceConstraints>().expect("distance batch");
        distances.rest_lengths.push(1.0);
        distances.stretch_stiffnesses.push(1.0);
        distances.compression_stiffnesses.push(1.0);
        assert_eq!(batch.cook(3).expect("matching arrays").len(), 2);
    }

    #[test]
    fn cooking_records_the_particles_it_needs() {
        let mut constraints = DistanceConstraints::new();
        constraints.add(0, 500, 1.0, 1.0);
        let mut batch = ConstraintBatch::new(constraints);
        batch.cook(1000).expect("in range");
        assert!(batch.is_cooked());
        assert!(batch.is_cooked_for(501));
        assert!(!batch.is_cooked_for(2));
        assert_eq!(
            batch.cook(2),
            Err(SolverError::ParticleOutOfRange { index: 500, max: 2 })
        );
    }

    #[test]
    fn wrong_kind_is_not_exposed() {
        let batch = ConstraintBatch::new(rope(1));
        assert!(batch.get::<TetherConstraints>().is_none());
        assert_eq!(batch.constraint_type(), ConstraintType::Distance);
    }
}
