use approx::assert_abs_diff_eq;
use particle_loom::config::STIFFNESS_COMPLIANCE_SCALE;
use particle_loom::dynamics::constraints::DistanceConstraints;
use particle_loom::{
    CollisionWorld, ConstraintBatch, ConstraintParameters, ConstraintType, EvaluationOrder,
    Interpolation, SimulationContext, Solver, SolverError, SolverParameters, Vec3,
};

const DT: f32 = 1.0 / 60.0;

fn weightless() -> SolverParameters {
    SolverParameters {
        gravity: Vec3::ZERO,
        ..SolverParameters::default()
    }
}

fn solver_with(positions: &[Vec3], parameters: SolverParameters) -> Solver {
    let context = SimulationContext::new(Some(2)).expect("thread pool");
    let mut solver = Solver::new(context, positions.len().max(1), parameters);
    let particles = solver.particles_mut();
    for (i, &p) in positions.iter().enumerate() {
        particles.positions[i] = p;
        particles.inv_masses[i] = 1.0;
        particles.principal_radii[i] = Vec3::splat(0.05);
    }
    let active: Vec<u32> = (0..positions.len() as u32).collect();
    solver.set_active_particles(&active).expect("in range");
    solver
}

fn add_cooked(solver: &mut Solver, set: DistanceConstraints) {
    let handle = solver.add_batch(ConstraintBatch::new(set));
    solver.cook_batch(handle).expect("cook");
}

fn separation(solver: &Solver, a: usize, b: usize) -> f32 {
    let p = &solver.particles().positions;
    p[a].distance(p[b])
}

/// Four unit links between five particles laid out at twice their rest spacing.
fn stretched_chain(
    parameters: SolverParameters,
    order: EvaluationOrder,
    iterations: u32,
) -> Solver {
    let positions: Vec<Vec3> = (0..5).map(|i| Vec3::new(2.0 * i as f32, 0.0, 0.0)).collect();
    let mut solver = solver_with(&positions, parameters);
    let mut set = DistanceConstraints::new();
    for i in 0..4 {
        set.add(i, i + 1, 1.0, 1.0);
    }
    add_cooked(&mut solver, set);
    solver.set_constraint_parameters(
        ConstraintType::Distance,
        ConstraintParameters::new(true, order, iterations),
    );
    solver
}

fn chain_residual(solver: &Solver) -> f32 {
    (0..4)
        .map(|i| (separation(solver, i, i + 1) - 1.0).abs())
        .sum()
}

/// Removes all velocity at the start of every substep.
fn overdamped() -> SolverParameters {
    SolverParameters {
        damping: 2.0 / DT,
        ..weightless()
    }
}

#[test]
fn stretched_pair_closes_without_overshoot() {
    let mut solver = solver_with(&[Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)], weightless());
    let mut set = DistanceConstraints::new();
    set.add(0, 1, 1.0, 1.0);
    add_cooked(&mut solver, set);

    let world = CollisionWorld::new();
    solver.update(&world, 1, DT).expect("update");

    let d = separation(&solver, 0, 1);
    assert!(d < 2.0, "pair did not move closer");
    assert!(d >= 1.0 - 1e-4, "pair overshot the rest length: {d}");
    // Equal masses share the correction symmetrically.
    assert_abs_diff_eq!(solver.particles().positions[0].x + solver.particles().positions[1].x, 2.0, epsilon = 1e-4);
}

#[test]
fn more_iterations_never_increase_the_residual() {
    let residual_after = |iterations: u32| {
        let mut solver = stretched_chain(weightless(), EvaluationOrder::Sequential, iterations);
        solver.update(&CollisionWorld::new(), 1, DT).expect("update");
        chain_residual(&solver)
    };

    let initial = 4.0;
    let residuals: Vec<f32> = [1, 2, 4, 8].into_iter().map(residual_after).collect();
    assert!(residuals[0] < initial);
    for pair in residuals.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-3, "residuals {residuals:?}");
    }
}

#[test]
fn residual_never_grows_across_substeps() {
    let mut solver = stretched_chain(overdamped(), EvaluationOrder::Sequential, 1);
    let world = CollisionWorld::new();
    let mut residuals = vec![chain_residual(&solver)];
    for _ in 0..10 {
        solver.update(&world, 1, DT).expect("update");
        residuals.push(chain_residual(&solver));
    }
    for pair in residuals.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-3, "residuals {residuals:?}");
    }
    assert!(residuals[10] < 0.5 * residuals[0], "residuals {residuals:?}");
}

#[test]
fn both_evaluation_orders_converge_on_a_chain() {
    let world = CollisionWorld::new();
    for order in [EvaluationOrder::Sequential, EvaluationOrder::Parallel] {
        let mut solver = stretched_chain(overdamped(), order, 3);
        for _ in 0..200 {
            solver.update(&world, 1, DT).expect("update");
        }
        let residual = chain_residual(&solver);
        assert!(residual < 1e-3, "{order:?} left residual {residual}");
    }
}

#[test]
fn doubling_substeps_settles_to_the_same_stretch() {
    let settle = |substeps: u32| {
        let parameters = SolverParameters {
            damping: 2.0,
            ..SolverParameters::default()
        };
        let mut solver = solver_with(&[Vec3::ZERO, Vec3::new(0.0, -1.0, 0.0)], parameters);
        solver.particles_mut().inv_masses[0] = 0.0;
        let mut set = DistanceConstraints::new();
        set.add(0, 1, 1.0, 0.5);
        add_cooked(&mut solver, set);

        let world = CollisionWorld::new();
        let substep_dt = DT / substeps as f32;
        for _ in 0..600 {
            solver.update(&world, substeps, substep_dt).expect("update");
        }
        separation(&solver, 0, 1)
    };

    let coarse = settle(2);
    let fine = settle(4);
    assert_abs_diff_eq!(coarse, fine, epsilon = 1e-3);
    // A compliant link hanging a unit mass stretches by α·g.
    assert_abs_diff_eq!(fine, 1.0 + STIFFNESS_COMPLIANCE_SCALE * 9.81, epsilon = 1e-3);
}

#[test]
fn batches_cooked_for_a_larger_solver_are_refused() {
    let mut set = DistanceConstraints::new();
    set.add(0, 500, 1.0, 1.0);
    let mut batch = ConstraintBatch::new(set);
    batch.cook(1000).expect("in range for the larger solver");

    let mut solver = solver_with(&[Vec3::ZERO, Vec3::X], weightless());
    solver.add_batch(batch);
    let before = solver.particles().positions.clone();
    assert_eq!(
        solver.update(&CollisionWorld::new(), 1, DT),
        Err(SolverError::BatchNotCooked)
    );
    assert_eq!(solver.particles().positions, before);
    assert_eq!(
        solver.cook_all_batches(),
        Err(SolverError::ParticleOutOfRange { index: 500, max: 2 })
    );
}

#[test]
fn modified_batches_must_be_recooked() {
    let mut solver = solver_with(&[Vec3::ZERO, Vec3::X], weightless());
    let mut set = DistanceConstraints::new();
    set.add(0, 1, 1.0, 1.0);
    let handle = solver.add_batch(ConstraintBatch::new(set));

    let world = CollisionWorld::new();
    let before = solver.particles().positions.clone();
    assert_eq!(solver.update(&world, 1, DT), Err(SolverError::BatchNotCooked));
    assert_eq!(solver.particles().positions, before);

    solver.cook_all_batches().expect("cook");
    solver.update(&world, 1, DT).expect("cooked update");

    // Disabled batches are not checked.
    solver
        .batch_mut(handle)
        .expect("live batch")
        .get_mut::<DistanceConstraints>()
        .expect("distance batch")
        .add(0, 1, 0.5, 1.0);
    solver.batch_mut(handle).expect("live batch").set_enabled(false);
    solver.update(&world, 1, DT).expect("disabled batch is skipped");
}

#[test]
fn zero_substeps_is_a_no_op() {
    let mut solver = solver_with(&[Vec3::ZERO], SolverParameters::default());
    solver.particles_mut().velocities[0] = Vec3::X;
    solver.update(&CollisionWorld::new(), 0, DT).expect("update");
    assert_eq!(solver.particles().positions[0], Vec3::ZERO);
}

#[test]
fn gravity_accelerates_free_particles() {
    let mut solver = solver_with(&[Vec3::ZERO], SolverParameters::default());
    solver.update(&CollisionWorld::new(), 2, DT).expect("update");
    let velocity = solver.particles().velocities[0];
    assert_abs_diff_eq!(velocity.y, -9.81 * 2.0 * DT, epsilon = 1e-4);
}

#[test]
fn kinematic_particles_stay_put() {
    let mut solver = solver_with(&[Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)], SolverParameters::default());
    solver.particles_mut().inv_masses[0] = 0.0;
    let mut set = DistanceConstraints::new();
    set.add(0, 1, 1.0, 1.0);
    add_cooked(&mut solver, set);

    solver.update(&CollisionWorld::new(), 4, DT).expect("update");
    assert_eq!(solver.particles().positions[0], Vec3::ZERO);
}

#[test]
fn simulation_time_is_consumed_by_updates() {
    let mut solver = solver_with(&[Vec3::ZERO], weightless());
    let world = CollisionWorld::new();
    solver.add_simulation_time(3.0 * DT);
    solver.update(&world, 2, DT).expect("update");
    assert_abs_diff_eq!(solver.simulation_time(), DT, epsilon = 1e-6);

    solver.update(&world, 2, DT).expect("update");
    assert_eq!(solver.simulation_time(), 0.0);

    solver.add_simulation_time(-1.0);
    assert_eq!(solver.simulation_time(), 0.0);
}

#[test]
fn interpolation_blends_from_the_start_of_the_update() {
    let parameters = SolverParameters {
        interpolation: Interpolation::Interpolate,
        ..weightless()
    };
    let mut solver = solver_with(&[Vec3::ZERO], parameters);
    solver.particles_mut().velocities[0] = Vec3::X;

    solver.add_simulation_time(1.5 * DT);
    solver.update(&CollisionWorld::new(), 1, DT).expect("update");
    solver.apply_position_interpolation(DT);

    let particles = solver.particles();
    assert_abs_diff_eq!(particles.positions[0].x, DT, epsilon = 1e-6);
    assert_abs_diff_eq!(particles.renderable_positions[0].x, 0.5 * DT, epsilon = 1e-6);
}

#[test]
fn without_interpolation_renderable_matches_physics() {
    let mut solver = solver_with(&[Vec3::ZERO], weightless());
    solver.particles_mut().velocities[0] = Vec3::Y;
    solver.add_simulation_time(1.5 * DT);
    solver.update(&CollisionWorld::new(), 1, DT).expect("update");
    solver.apply_position_interpolation(DT);
    let particles = solver.particles();
    assert_eq!(particles.renderable_positions[0], particles.positions[0]);
}

#[test]
fn constraint_forces_report_the_last_substep() {
    let mut solver = solver_with(&[Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)], weightless());
    let mut set = DistanceConstraints::new();
    set.add(0, 1, 1.0, 1.0);
    let handle = solver.add_batch(ConstraintBatch::new(set));
    solver.cook_batch(handle).expect("cook");
    solver.update(&CollisionWorld::new(), 1, DT).expect("update");

    let forces = solver.batch(handle).expect("live batch").constraint_forces(DT);
    assert_eq!(forces.len(), 1);
    assert!(forces[0].abs() > 0.0);
    assert_eq!(solver.constraint_count(ConstraintType::Distance), 1);
}
