//! Particle Loom – position-based particle dynamics for Rust.
//!
//! The crate simulates cloth, ropes and soft bodies as particles bound by
//! constraint batches, collides them against analytic shapes and sampled
//! distance fields, and maps the result onto deformable render meshes that
//! can tear at runtime.

pub mod collision;
pub mod config;
pub mod context;
pub mod core;
pub mod distance_field;
pub mod dynamics;
pub mod error;
pub mod mesh;
pub mod solver;
pub mod utils;

pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

pub use collision::{
    Collider, ColliderHandle, CollisionMaterial, CollisionWorld, Contact, ContactTarget, Shape,
};
pub use config::{
    ConstraintParameters, EvaluationOrder, Interpolation, SimulationMode, SolverParameters,
};
pub use context::SimulationContext;
pub use core::{ParticleStore, Phase, QuaternionUnaligned, Transform, Vector4Unaligned};
pub use distance_field::{DistanceField, DistanceFieldNode, DistanceFieldState};
pub use dynamics::{BatchHandle, ConstraintBatch, ConstraintType};
pub use error::{SolverError, SolverResult};
pub use mesh::{DeformableMesh, MeshHandle, TriangleSkinMap};
pub use solver::Solver;
