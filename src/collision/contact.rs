use glam::Vec3;

use super::{collider::ColliderHandle, material::ContactMaterial};

/// What a particle is touching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactTarget {
    Collider(ColliderHandle),
    Particle(u32),
}

/// Contact between a particle and a collider or a second particle.
///
/// `point` and `normal` describe the other surface; the normal points
/// towards the particle. `distance` is the signed gap between the particle
/// surface and the target surface at detection time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub particle: u32,
    pub target: ContactTarget,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub material: ContactMaterial,
    /// Velocity of the target surface at the contact point.
    pub target_velocity: Vec3,
    pub normal_lambda: f32,
    pub tangent_lambda: f32,
    pub stick_lambda: f32,
}

impl Contact {
    pub fn new(particle: u32, target: ContactTarget, point: Vec3, normal: Vec3, distance: f32) -> Self {
        Self {
            particle,
            target,
            point,
            normal,
            distance,
            material: ContactMaterial::default(),
            target_velocity: Vec3::ZERO,
            normal_lambda: 0.0,
            tangent_lambda: 0.0,
            stick_lambda: 0.0,
        }
    }

    pub fn with_material(mut self, material: ContactMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_target_velocity(mut self, velocity: Vec3) -> Self {
        self.target_velocity = velocity;
        self
    }

    /// Particles touched by this contact: one for colliders, two for particle pairs.
    pub fn particles(&self, out: &mut Vec<u32>) {
        out.push(self.particle);
        if let ContactTarget::Particle(other) = self.target {
            out.push(other);
        }
    }

    pub fn reset_lambdas(&mut self) {
        self.normal_lambda = 0.0;
        self.tangent_lambda = 0.0;
        self.stick_lambda = 0.0;
    }
}
