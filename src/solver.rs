//! The particle solver: owns particle state, constraint batches and meshes,
//! and advances them in substeps against a collision world snapshot.

mod batches;
mod meshes;

use std::sync::Arc;

use glam::{Quat, Vec3};
use log::debug;

use crate::{
    collision::{
        broadphase::{CellCoord, ParticleGrid},
        narrowphase::{self, NarrowPhaseInput},
        Contact, CollisionWorld,
    },
    config::{ConstraintParameters, EvaluationOrder, Interpolation, SolverParameters},
    context::SimulationContext,
    core::{mesh::Aabb, particles::ParticleStore},
    dynamics::{
        integrator::normalize_or_identity, ConstraintBatch, ConstraintType, ContactPass,
        ContactSet, Corrections, Integrator, ProjectionContext,
    },
    error::{SolverError, SolverResult},
    mesh::DeformableMesh,
    utils::{allocator::Arena, math::quat_add_scaled, profiling::Profiler, tasks::TaskScheduler},
};

/// Default evaluation settings of each constraint type.
pub fn default_constraint_parameters(kind: ConstraintType) -> ConstraintParameters {
    use ConstraintType::*;
    use EvaluationOrder::{Parallel, Sequential};
    match kind {
        Distance | ParticleCollision | Collision | Skin | StretchShear | BendTwist => {
            ConstraintParameters::new(true, Sequential, 3)
        }
        Bending | ParticleFriction | Friction | Volume | ShapeMatching | Tether | Pin => {
            ConstraintParameters::new(true, Parallel, 3)
        }
        Stitch => ConstraintParameters::new(true, Parallel, 2),
        Chain => ConstraintParameters::new(false, Sequential, 3),
        Aerodynamic => ConstraintParameters::new(true, Parallel, 1),
    }
}

fn stage_name(kind: ConstraintType) -> &'static str {
    match kind {
        ConstraintType::Aerodynamic => "constraints::aerodynamic",
        ConstraintType::Distance => "constraints::distance",
        ConstraintType::Bending => "constraints::bending",
        ConstraintType::StretchShear => "constraints::stretch_shear",
        ConstraintType::BendTwist => "constraints::bend_twist",
        ConstraintType::Chain => "constraints::chain",
        ConstraintType::Volume => "constraints::volume",
        ConstraintType::ShapeMatching => "constraints::shape_matching",
        ConstraintType::Tether => "constraints::tether",
        ConstraintType::Skin => "constraints::skin",
        ConstraintType::Pin => "constraints::pin",
        ConstraintType::Stitch => "constraints::stitch",
        ConstraintType::ParticleCollision => "constraints::particle_collision",
        ConstraintType::ParticleFriction => "constraints::particle_friction",
        ConstraintType::Collision => "constraints::collision",
        ConstraintType::Friction => "constraints::friction",
    }
}

/// Accumulates corrections into the particle scratch buffers, remembering
/// which particles were touched so commits only visit those.
fn accumulate(particles: &mut ParticleStore, touched: &mut Vec<u32>, buffers: Vec<Corrections>) {
    for buffer in buffers {
        for (index, delta) in buffer.positions {
            let i = index as usize;
            if particles.position_constraint_counts[i] == 0
                && particles.orientation_constraint_counts[i] == 0
            {
                touched.push(index);
            }
            particles.position_deltas[i] += delta;
            particles.position_constraint_counts[i] += 1;
        }
        for (index, delta) in buffer.orientations {
            let i = index as usize;
            if particles.position_constraint_counts[i] == 0
                && particles.orientation_constraint_counts[i] == 0
            {
                touched.push(index);
            }
            particles.orientation_deltas[i] = quat_add_scaled(particles.orientation_deltas[i], delta, 1.0);
            particles.orientation_constraint_counts[i] += 1;
        }
    }
}

/// Applies the averaged, over-relaxed deltas and clears the scratch buffers.
fn commit(particles: &mut ParticleStore, touched: &mut Vec<u32>, sor: f32) {
    for index in touched.drain(..) {
        let i = index as usize;
        let count = particles.position_constraint_counts[i];
        if count > 0 {
            let delta = particles.position_deltas[i] * (sor / count as f32);
            particles.positions[i] += delta;
            particles.warm_start_deltas[i] += delta;
            particles.position_deltas[i] = Vec3::ZERO;
            particles.position_constraint_counts[i] = 0;
        }
        let count = particles.orientation_constraint_counts[i];
        if count > 0 {
            let q = quat_add_scaled(
                particles.orientations[i],
                particles.orientation_deltas[i],
                sor / count as f32,
            );
            particles.orientations[i] = normalize_or_identity(q);
            particles.orientation_deltas[i] = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
            particles.orientation_constraint_counts[i] = 0;
        }
    }
}

/// Position-based particle solver.
pub struct Solver {
    context: SimulationContext,
    particles: ParticleStore,
    parameters: SolverParameters,
    constraint_parameters: [ConstraintParameters; ConstraintType::COUNT],
    batches: Arena<ConstraintBatch>,
    meshes: Arena<DeformableMesh>,
    grid: ParticleGrid,
    collision_contacts: ContactSet,
    particle_contacts: ContactSet,
    touched: Vec<u32>,
    simulation_time: f32,
}

impl Solver {
    pub fn new(context: SimulationContext, max_particles: usize, parameters: SolverParameters) -> Self {
        debug!("solver created with {max_particles} particles");
        Self {
            context,
            particles: ParticleStore::new(max_particles),
            parameters,
            constraint_parameters: ConstraintType::PRIORITY.map(default_constraint_parameters),
            batches: Arena::new(),
            meshes: Arena::new(),
            grid: ParticleGrid::default(),
            collision_contacts: ContactSet::new(),
            particle_contacts: ContactSet::new(),
            touched: Vec::new(),
            simulation_time: 0.0,
        }
    }

    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    pub fn max_particles(&self) -> usize {
        self.particles.capacity()
    }

    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    /// Direct access to particle state and its bulk accessors.
    pub fn particles_mut(&mut self) -> &mut ParticleStore {
        &mut self.particles
    }

    pub fn set_active_particles(&mut self, indices: &[u32]) -> SolverResult<()> {
        self.particles.set_active(indices)
    }

    pub fn active_particles(&self) -> &[u32] {
        self.particles.active()
    }

    pub fn parameters(&self) -> &SolverParameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: SolverParameters) {
        self.parameters = parameters;
    }

    pub fn constraint_parameters(&self, kind: ConstraintType) -> ConstraintParameters {
        self.constraint_parameters[kind.index()]
    }

    pub fn set_constraint_parameters(&mut self, kind: ConstraintType, parameters: ConstraintParameters) {
        self.constraint_parameters[kind.index()] = parameters;
    }

    pub fn add_simulation_time(&mut self, dt: f32) {
        self.simulation_time += dt.max(0.0);
    }

    pub fn reset_simulation_time(&mut self) {
        self.simulation_time = 0.0;
    }

    /// Accumulated time not yet consumed by [`Solver::update`].
    pub fn simulation_time(&self) -> f32 {
        self.simulation_time
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.particles.bounds()
    }

    /// Occupied broad-phase cells of the last substep.
    pub fn particle_grid(&self) -> Vec<(CellCoord, Vec<u32>)> {
        self.grid.cells()
    }

    pub fn collision_contacts(&self) -> &[Contact] {
        self.collision_contacts.contacts()
    }

    pub fn particle_contacts(&self) -> &[Contact] {
        self.particle_contacts.contacts()
    }

    pub fn recalculate_inertia_tensors(&mut self) {
        self.particles.recalculate_inertia_tensors();
    }

    /// Runs `substeps` substeps of `substep_dt` against `world`.
    ///
    /// Fails with [`SolverError::BatchNotCooked`] before touching any state if
    /// an enabled batch has not been cooked since it was last modified, or was
    /// cooked for particles this solver does not hold.
    pub fn update(&mut self, world: &CollisionWorld, substeps: u32, substep_dt: f32) -> SolverResult<()> {
        let max_particles = self.particles.capacity();
        if self
            .batches
            .iter()
            .any(|(_, batch)| batch.is_enabled() && !batch.is_cooked_for(max_particles))
        {
            return Err(SolverError::BatchNotCooked);
        }
        if substeps == 0 || substep_dt <= 0.0 {
            return Ok(());
        }

        let profiler = Arc::clone(self.context.profiler());
        let scheduler = Arc::clone(self.context.scheduler());
        let _update = profiler.scope("solver::update");

        for index in 0..self.particles.active().len() {
            let i = self.particles.active()[index] as usize;
            self.particles.start_positions[i] = self.particles.positions[i];
            self.particles.start_orientations[i] = self.particles.orientations[i];
        }

        let integrator = Integrator::new(&self.parameters);
        for _ in 0..substeps {
            self.substep(world, &integrator, &scheduler, &profiler, substep_dt)?;
        }

        self.simulation_time = (self.simulation_time - substeps as f32 * substep_dt).max(0.0);
        self.particles.clear_external_inputs();
        Ok(())
    }

    fn substep(
        &mut self,
        world: &CollisionWorld,
        integrator: &Integrator,
        scheduler: &TaskScheduler,
        profiler: &Profiler,
        dt: f32,
    ) -> SolverResult<()> {
        {
            let _scope = profiler.scope("solver::predict");
            integrator.predict(&mut self.particles, dt);
        }

        {
            let _scope = profiler.scope("solver::collisions");
            self.grid.rebuild(&self.particles, self.parameters.collision_margin);
            let input = NarrowPhaseInput {
                world,
                particles: &self.particles,
                grid: &self.grid,
                margin: self.parameters.collision_margin,
            };
            let max_particles = self.particles.capacity();
            let colliders = narrowphase::collider_contacts(&input, scheduler);
            let pairs = narrowphase::particle_contacts(&input, scheduler);
            self.collision_contacts.rebuild(colliders, max_particles)?;
            self.particle_contacts.rebuild(pairs, max_particles)?;
        }

        for (_, batch) in self.batches.iter_mut() {
            batch.reset_lambdas();
        }

        for kind in ConstraintType::PRIORITY {
            let parameters = self.constraint_parameters[kind.index()];
            if !parameters.enabled || parameters.iterations == 0 {
                continue;
            }
            let _scope = profiler.scope(stage_name(kind));
            for _ in 0..parameters.iterations {
                if kind.is_contact() {
                    self.project_contacts(kind, parameters, world, scheduler, dt);
                } else {
                    self.project_batches(kind, parameters, world, scheduler, dt);
                }
            }
        }

        {
            let _scope = profiler.scope("solver::finish_substep");
            let ctx = ProjectionContext {
                particles: &self.particles,
                world,
                dt,
                air_density: self.parameters.air_density,
            };
            for (_, batch) in self.batches.iter_mut() {
                if batch.is_enabled() {
                    batch.end_substep(&ctx);
                }
            }
            integrator.update_velocities(&mut self.particles, dt);
        }
        Ok(())
    }

    fn project_batches(
        &mut self,
        kind: ConstraintType,
        parameters: ConstraintParameters,
        world: &CollisionWorld,
        scheduler: &TaskScheduler,
        dt: f32,
    ) {
        let sequential = parameters.evaluation_order == EvaluationOrder::Sequential;
        for (_, batch) in self.batches.iter_mut() {
            if batch.constraint_type() != kind || !batch.is_enabled() || batch.is_empty() {
                continue;
            }
            let phases: Vec<_> = batch.phase_ranges().collect();
            for phase in phases {
                let ctx = ProjectionContext {
                    particles: &self.particles,
                    world,
                    dt,
                    air_density: self.parameters.air_density,
                };
                let buffers = batch.project_phase(phase, &ctx, scheduler);
                accumulate(&mut self.particles, &mut self.touched, buffers);
                if sequential {
                    commit(&mut self.particles, &mut self.touched, parameters.sor_factor);
                }
            }
        }
        commit(&mut self.particles, &mut self.touched, parameters.sor_factor);
    }

    fn project_contacts(
        &mut self,
        kind: ConstraintType,
        parameters: ConstraintParameters,
        world: &CollisionWorld,
        scheduler: &TaskScheduler,
        dt: f32,
    ) {
        let (set, pass) = match kind {
            ConstraintType::ParticleCollision => (&mut self.particle_contacts, ContactPass::Collision),
            ConstraintType::ParticleFriction => (&mut self.particle_contacts, ContactPass::Friction),
            ConstraintType::Collision => (&mut self.collision_contacts, ContactPass::Collision),
            ConstraintType::Friction => (&mut self.collision_contacts, ContactPass::Friction),
            _ => return,
        };
        let sequential = parameters.evaluation_order == EvaluationOrder::Sequential;
        for phase in set.phase_ranges() {
            let ctx = ProjectionContext {
                particles: &self.particles,
                world,
                dt,
                air_density: self.parameters.air_density,
            };
            let buffers = set.project_phase(phase, pass, &ctx, scheduler);
            accumulate(&mut self.particles, &mut self.touched, buffers);
            if sequential {
                commit(&mut self.particles, &mut self.touched, parameters.sor_factor);
            }
        }
        commit(&mut self.particles, &mut self.touched, parameters.sor_factor);
    }

    /// Computes renderable poses from the physics poses.
    ///
    /// With [`Interpolation::Interpolate`] the pose is blended from the start of
    /// the last update by the fraction of a substep still accumulated.
    pub fn apply_position_interpolation(&mut self, substep_dt: f32) {
        let alpha = match self.parameters.interpolation {
            Interpolation::Interpolate if substep_dt > 0.0 => {
                (self.simulation_time / substep_dt).clamp(0.0, 1.0)
            }
            _ => 1.0,
        };
        let particles = &mut self.particles;
        for index in 0..particles.active().len() {
            let i = particles.active()[index] as usize;
            if alpha >= 1.0 {
                particles.renderable_positions[i] = particles.positions[i];
                particles.renderable_orientations[i] = particles.orientations[i];
            } else {
                particles.renderable_positions[i] =
                    particles.start_positions[i].lerp(particles.positions[i], alpha);
                particles.renderable_orientations[i] = particles.start_orientations[i]
                    .slerp(particles.orientations[i], alpha)
                    .normalize();
            }
        }
    }
}
