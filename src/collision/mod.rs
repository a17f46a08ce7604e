//! Collision detection: particle grid, collider world, shape and distance-field narrow phase.

pub mod broadphase;
pub mod collider;
pub mod contact;
pub mod material;
pub mod narrowphase;
pub mod shapes;

pub use broadphase::ParticleGrid;
pub use collider::{
    Collider, ColliderBuilder, ColliderHandle, ColliderShape, CollisionWorld, DistanceFieldHandle,
    Rigidbody, RigidbodyHandle, ShapeHandle,
};
pub use contact::{Contact, ContactTarget};
pub use material::{CollisionMaterial, ContactMaterial, MaterialHandle, MixingMode};
pub use shapes::{Axis, Heightmap, Shape, SurfacePoint};
