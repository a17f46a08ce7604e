use std::collections::HashSet;

use particle_loom::dynamics::constraints::{DistanceConstraints, StitchConstraints};
use particle_loom::{ConstraintBatch, ConstraintType, SolverError};

const MAX_PARTICLES: usize = 64;

/// Structural distance constraints of a `size`×`size` particle grid.
fn cloth_grid(size: u32) -> DistanceConstraints {
    let mut set = DistanceConstraints::new();
    let index = |x: u32, y: u32| y * size + x;
    for y in 0..size {
        for x in 0..size {
            if x + 1 < size {
                set.add(index(x, y), index(x + 1, y), 1.0, 1.0);
            }
            if y + 1 < size {
                set.add(index(x, y), index(x, y + 1), 1.0, 1.0);
            }
            if x + 1 < size && y + 1 < size {
                set.add(index(x, y), index(x + 1, y + 1), 1.4, 1.0);
            }
        }
    }
    set
}

fn chain(count: u32) -> DistanceConstraints {
    let mut set = DistanceConstraints::new();
    for i in 0..count - 1 {
        set.add(i, i + 1, 1.0, 1.0);
    }
    set
}

fn assert_phases_disjoint(batch: &ConstraintBatch) {
    let mut particles = Vec::new();
    for range in batch.phase_ranges() {
        let mut seen = HashSet::new();
        for constraint in range {
            particles.clear();
            batch.data().particles(constraint, &mut particles);
            for &p in &particles {
                assert!(seen.insert(p), "particle {p} appears twice in one phase");
            }
        }
    }
}

#[test]
fn cooked_cloth_phases_are_particle_disjoint() {
    let mut batch = ConstraintBatch::new(cloth_grid(6));
    assert!(!batch.is_cooked());
    batch.cook(MAX_PARTICLES).expect("indices in range");

    assert!(batch.is_cooked());
    let total: u32 = batch.phase_sizes().iter().sum();
    assert_eq!(total as usize, batch.len());
    assert_phases_disjoint(&batch);
}

#[test]
fn cook_reorders_storage_by_the_returned_permutation() {
    let original = cloth_grid(4);
    let mut batch = ConstraintBatch::new(original.clone());
    let order = batch.cook(MAX_PARTICLES).expect("indices in range");

    let cooked = batch.get::<DistanceConstraints>().expect("distance batch");
    for (new, &old) in order.iter().enumerate() {
        assert_eq!(cooked.particles[new], original.particles[old]);
        assert_eq!(cooked.rest_lengths[new], original.rest_lengths[old]);
    }
}

#[test]
fn cooking_twice_is_idempotent() {
    let mut batch = ConstraintBatch::new(cloth_grid(5));
    batch.cook(MAX_PARTICLES).expect("first cook");
    let sizes = batch.phase_sizes().to_vec();
    let storage = batch.get::<DistanceConstraints>().cloned();

    let order = batch.cook(MAX_PARTICLES).expect("second cook");
    assert_eq!(order, (0..batch.len()).collect::<Vec<_>>());
    assert_eq!(batch.phase_sizes(), sizes.as_slice());
    assert_eq!(batch.get::<DistanceConstraints>().cloned(), storage);
}

#[test]
fn chain_needs_two_phases() {
    let mut batch = ConstraintBatch::new(chain(5));
    batch.cook(MAX_PARTICLES).expect("indices in range");
    assert_eq!(batch.phase_sizes(), &[2, 2]);
    assert_phases_disjoint(&batch);
}

#[test]
fn out_of_range_particles_are_rejected() {
    let mut set = DistanceConstraints::new();
    set.add(0, 1, 1.0, 1.0);
    set.add(1, 12, 1.0, 1.0);
    let mut batch = ConstraintBatch::new(set);
    assert_eq!(
        batch.cook(8),
        Err(SolverError::ParticleOutOfRange { index: 12, max: 8 })
    );
    assert!(!batch.is_cooked());
}

#[test]
fn ragged_parameter_arrays_are_rejected_before_reordering() {
    let mut set = StitchConstraints::new();
    set.add(0, 1, 1.0);
    set.add(2, 3, 1.0);
    set.particles.push([1, 2]);
    let snapshot = set.clone();

    let mut batch = ConstraintBatch::new(set);
    assert_eq!(
        batch.cook(MAX_PARTICLES),
        Err(SolverError::LengthMismatch { expected: 3, actual: 2 })
    );
    assert!(!batch.is_cooked());
    assert_eq!(batch.get::<StitchConstraints>(), Some(&snapshot));
}

#[test]
fn restored_phase_sizes_are_validated() {
    let mut batch = ConstraintBatch::new(chain(5));
    batch.cook(MAX_PARTICLES).expect("indices in range");
    let sizes = batch.phase_sizes().to_vec();

    // Wrong total.
    assert!(matches!(
        batch.set_phase_sizes(&[2, 1], MAX_PARTICLES),
        Err(SolverError::InvalidPhasePartition(_))
    ));
    // Right total, but the single phase shares particles.
    assert!(matches!(
        batch.set_phase_sizes(&[4], MAX_PARTICLES),
        Err(SolverError::InvalidPhasePartition(_))
    ));
    batch
        .set_phase_sizes(&sizes, MAX_PARTICLES)
        .expect("cooked partition is valid");
    assert!(batch.is_cooked());
}

#[test]
fn mutable_access_invalidates_the_partition() {
    let mut batch = ConstraintBatch::new(chain(3));
    batch.cook(MAX_PARTICLES).expect("indices in range");
    batch
        .get_mut::<DistanceConstraints>()
        .expect("distance batch")
        .add(2, 3, 1.0, 1.0);
    assert!(!batch.is_cooked());
    assert!(batch.get::<StitchConstraints>().is_none());
}

#[test]
fn active_constraints_are_bounds_checked() {
    let mut batch = ConstraintBatch::new(chain(4));
    assert_eq!(batch.constraint_type(), ConstraintType::Distance);
    batch.set_active_constraints(&[0, 2]).expect("in range");
    assert_eq!(batch.active_constraint_indices(), vec![0, 2]);
    assert_eq!(
        batch.set_active_constraints(&[3]),
        Err(SolverError::ConstraintOutOfRange { index: 3, count: 3 })
    );
}
