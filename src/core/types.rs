use glam::{Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Common math types re-exported for convenience.
pub use glam::Vec2;

/// Position, orientation, and non-uniform scale of a collider or mesh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * (self.scale * point)
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        (self.rotation.inverse() * (point - self.position)) / safe_scale(self.scale)
    }

    /// Maps a local-space surface normal into world space.
    pub fn transform_normal(&self, normal: Vec3) -> Vec3 {
        (self.rotation * (normal / safe_scale(self.scale))).normalize_or_zero()
    }
}

fn safe_scale(scale: Vec3) -> Vec3 {
    Vec3::select(scale.abs().cmplt(Vec3::splat(1e-6)), Vec3::ONE, scale)
}

/// Four-component vector with no alignment requirement beyond `f32`.
///
/// Used for bulk get/set so host buffers can be read regardless of layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector4Unaligned {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vector4Unaligned {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn xyz(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl From<Vec3> for Vector4Unaligned {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z, 0.0)
    }
}

impl From<Vec4> for Vector4Unaligned {
    fn from(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }
}

impl From<Vector4Unaligned> for Vec3 {
    fn from(v: Vector4Unaligned) -> Self {
        v.xyz()
    }
}

impl From<Vector4Unaligned> for Vec4 {
    fn from(v: Vector4Unaligned) -> Self {
        Vec4::new(v.x, v.y, v.z, v.w)
    }
}

/// Quaternion counterpart of [`Vector4Unaligned`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionUnaligned {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for QuaternionUnaligned {
    fn default() -> Self {
        Quat::IDENTITY.into()
    }
}

impl From<Quat> for QuaternionUnaligned {
    fn from(q: Quat) -> Self {
        Self {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

impl From<QuaternionUnaligned> for Quat {
    fn from(q: QuaternionUnaligned) -> Self {
        Quat::from_xyzw(q.x, q.y, q.z, q.w)
    }
}

/// Collision phase of a particle: a group id plus behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Phase(pub u32);

impl Phase {
    pub const GROUP_MASK: u32 = 0x00ff_ffff;
    pub const SELF_COLLIDE: u32 = 1 << 24;
    pub const FLUID: u32 = 1 << 25;

    pub fn new(group: u32, flags: u32) -> Self {
        Self((group & Self::GROUP_MASK) | (flags & !Self::GROUP_MASK))
    }

    pub fn group(self) -> u32 {
        self.0 & Self::GROUP_MASK
    }

    pub fn self_collides(self) -> bool {
        self.0 & Self::SELF_COLLIDE != 0
    }

    pub fn is_fluid(self) -> bool {
        self.0 & Self::FLUID != 0
    }

    /// Whether two particles with these phases may generate contacts.
    pub fn interacts_with(self, other: Phase) -> bool {
        self.group() != other.group() || (self.self_collides() && other.self_collides())
    }
}

impl From<Phase> for u32 {
    fn from(phase: Phase) -> Self {
        phase.0
    }
}

impl From<u32> for Phase {
    fn from(bits: u32) -> Self {
        Phase(bits)
    }
}
