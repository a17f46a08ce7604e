//! Constraint kinds and the projection contract shared by every batch.
//!
//! Each kind stores its constraints as parallel arrays. Projection never
//! writes particle state directly: it appends corrections to a per-worker
//! [`Corrections`] buffer that the solver merges once the phase is done.

mod aerodynamic;
mod bend_twist;
mod bending;
mod chain;
mod distance;
mod pin;
mod shape_matching;
mod skin;
mod stitch;
mod stretch_shear;
mod tether;
mod volume;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::{
    collision::CollisionWorld,
    config::stiffness_to_compliance,
    core::particles::ParticleStore,
    error::{SolverError, SolverResult},
};

pub use aerodynamic::AerodynamicConstraints;
pub use bend_twist::BendTwistConstraints;
pub use bending::BendingConstraints;
pub use chain::ChainConstraints;
pub use distance::DistanceConstraints;
pub use pin::PinConstraints;
pub use shape_matching::{ElastoplasticMaterial, ShapeMatchingConstraints};
pub use skin::SkinConstraints;
pub use stitch::StitchConstraints;
pub use stretch_shear::StretchShearConstraints;
pub use tether::TetherConstraints;
pub use volume::{mesh_volume, VolumeConstraints};

/// Lagrange multipliers of one constraint. Scalar kinds only use the first slot.
pub type Multipliers = [f32; 4];

/// Every constraint kind the solver evaluates, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintType {
    Aerodynamic,
    Distance,
    Bending,
    StretchShear,
    BendTwist,
    Chain,
    Volume,
    ShapeMatching,
    Tether,
    Skin,
    Pin,
    Stitch,
    ParticleCollision,
    ParticleFriction,
    Collision,
    Friction,
}

impl ConstraintType {
    pub const PRIORITY: [ConstraintType; 16] = [
        ConstraintType::Aerodynamic,
        ConstraintType::Distance,
        ConstraintType::Bending,
        ConstraintType::StretchShear,
        ConstraintType::BendTwist,
        ConstraintType::Chain,
        ConstraintType::Volume,
        ConstraintType::ShapeMatching,
        ConstraintType::Tether,
        ConstraintType::Skin,
        ConstraintType::Pin,
        ConstraintType::Stitch,
        ConstraintType::ParticleCollision,
        ConstraintType::ParticleFriction,
        ConstraintType::Collision,
        ConstraintType::Friction,
    ];

    pub const COUNT: usize = Self::PRIORITY.len();

    pub fn index(self) -> usize {
        self as usize
    }

    /// Contact-based kinds are generated each substep instead of stored in batches.
    pub fn is_contact(self) -> bool {
        matches!(
            self,
            ConstraintType::ParticleCollision
                | ConstraintType::ParticleFriction
                | ConstraintType::Collision
                | ConstraintType::Friction
        )
    }
}

/// Read-only state visible to projections during a phase.
pub struct ProjectionContext<'a> {
    pub particles: &'a ParticleStore,
    pub world: &'a CollisionWorld,
    /// Substep length.
    pub dt: f32,
    pub air_density: f32,
}

impl ProjectionContext<'_> {
    pub fn position(&self, index: u32) -> Vec3 {
        self.particles.positions[index as usize]
    }

    pub fn inv_mass(&self, index: u32) -> f32 {
        self.particles.inv_masses[index as usize]
    }

    pub fn orientation(&self, index: u32) -> Quat {
        self.particles.orientations[index as usize]
    }

    pub fn inv_rotational_mass(&self, index: u32) -> f32 {
        self.particles.inv_rotational_masses[index as usize]
    }

    /// Time-step scaled compliance `α / dt²`, or `None` when the stiffness disables the constraint.
    pub fn compliance(&self, stiffness: f32) -> Option<f32> {
        stiffness_to_compliance(stiffness).map(|c| c / (self.dt * self.dt))
    }
}

/// Position and orientation corrections produced by one worker.
#[derive(Debug, Default, Clone)]
pub struct Corrections {
    pub positions: Vec<(u32, Vec3)>,
    pub orientations: Vec<(u32, Quat)>,
}

impl Corrections {
    pub fn position(&mut self, particle: u32, delta: Vec3) {
        self.positions.push((particle, delta));
    }

    pub fn orientation(&mut self, particle: u32, delta: Quat) {
        self.orientations.push((particle, delta));
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.orientations.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.orientations.clear();
    }
}

/// Storage and projection of one homogeneous constraint kind.
pub trait ConstraintSet: Send + Sync {
    fn constraint_type(&self) -> ConstraintType;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends the particles constraint `index` writes to.
    fn particles(&self, index: usize, out: &mut Vec<u32>);

    /// Projects one constraint, updating its multipliers.
    fn project(
        &self,
        index: usize,
        lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    );

    /// Checks that every parallel array holds one entry per constraint.
    fn validate(&self) -> SolverResult<()>;

    /// Reorders storage so constraint `i` becomes the old constraint `order[i]`.
    fn permute(&mut self, order: &[usize]) -> SolverResult<()>;

    /// Runs once per substep after every iteration of this kind.
    fn end_substep(&mut self, _ctx: &ProjectionContext<'_>) {}
}

/// Fails on the first array length that differs from `expected`.
pub(crate) fn check_parallel(expected: usize, lengths: &[usize]) -> SolverResult<()> {
    match lengths.iter().find(|&&actual| actual != expected) {
        Some(&actual) => Err(SolverError::LengthMismatch { expected, actual }),
        None => Ok(()),
    }
}

/// Applies `order` to one parallel array.
pub(crate) fn permute_vec<T: Clone>(values: &mut Vec<T>, order: &[usize]) -> SolverResult<()> {
    if values.len() != order.len() {
        return Err(SolverError::LengthMismatch {
            expected: order.len(),
            actual: values.len(),
        });
    }
    let permuted: Vec<T> = order.iter().map(|&i| values[i].clone()).collect();
    *values = permuted;
    Ok(())
}

/// XPBD multiplier update for a scalar constraint.
///
/// Returns `Δλ = (-C - α̃λ) / (Σ w|∇C|² + α̃)` and accumulates it into `lambda`.
pub(crate) fn xpbd_delta(constraint: f32, weight: f32, compliance: f32, lambda: &mut f32) -> f32 {
    let denominator = weight + compliance;
    if denominator <= f32::EPSILON {
        return 0.0;
    }
    let delta = (-constraint - compliance * *lambda) / denominator;
    *lambda += delta;
    delta
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Projects constraint `index` once against `particles` with no colliders.
    pub(crate) fn project_once<C: ConstraintSet>(
        set: &C,
        index: usize,
        particles: &ParticleStore,
    ) -> Corrections {
        let world = CollisionWorld::default();
        let ctx = ProjectionContext {
            particles,
            world: &world,
            dt: 1.0 / 60.0,
            air_density: 1.2,
        };
        let mut lambda = [0.0; 4];
        let mut out = Corrections::default();
        set.project(index, &mut lambda, &ctx, &mut out);
        out
    }

    pub(crate) fn store_with(positions: &[Vec3]) -> ParticleStore {
        let mut store = ParticleStore::new(positions.len().max(1));
        for (i, &p) in positions.iter().enumerate() {
            store.positions[i] = p;
            store.inv_masses[i] = 1.0;
        }
        store
    }
}
