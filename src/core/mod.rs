//! Particle storage and the shared value types it is built from.

pub mod mesh;
pub mod particles;
pub mod types;

pub use mesh::{Aabb, MeshBuilder, TriangleMesh};
pub use particles::ParticleStore;
pub use types::{Phase, QuaternionUnaligned, Transform, Vector4Unaligned};
