//! Render meshes driven by particles, skin maps and bones, with runtime tearing.

pub mod deformable;
pub mod skin_map;
pub mod topology;

pub use deformable::{
    DeformableMesh, MeshHandle, MeshUpdateMode, NormalUpdate, SkinSource, TearResult, UV_CHANNELS,
};
pub use skin_map::{BarycentricPoint, SkinInfo, SkinSurface, TriangleSkinMap, DEFAULT_SKIN_FLAG};
pub use topology::{Edge, MeshTopology};
