//! Particle dynamics: constraint kinds, batches, phase coloring, contacts and integration.

pub mod batch;
pub mod coloring;
pub mod constraints;
pub mod contacts;
pub mod integrator;

pub use batch::{BatchData, BatchHandle, BatchKind, ConstraintBatch};
pub use constraints::{ConstraintSet, ConstraintType, Corrections, Multipliers, ProjectionContext};
pub use contacts::{ContactPass, ContactSet};
pub use integrator::Integrator;
