use serde::{Deserialize, Serialize};

use crate::utils::allocator::Handle;

pub type MaterialHandle = Handle<CollisionMaterial>;

/// Surface coefficients used when particles touch colliders or each other.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionMaterial {
    pub dynamic_friction: f32,
    pub static_friction: f32,
    /// Fraction of the separating distance pulled back per substep.
    pub stickiness: f32,
    /// Distance below which stickiness applies.
    pub stick_distance: f32,
    pub friction_combine: MixingMode,
    pub stickiness_combine: MixingMode,
}

impl Default for CollisionMaterial {
    fn default() -> Self {
        Self {
            dynamic_friction: 0.3,
            static_friction: 0.3,
            stickiness: 0.0,
            stick_distance: 0.0,
            friction_combine: MixingMode::Average,
            stickiness_combine: MixingMode::Average,
        }
    }
}

impl CollisionMaterial {
    pub fn frictionless() -> Self {
        Self {
            dynamic_friction: 0.0,
            static_friction: 0.0,
            ..Default::default()
        }
    }

    pub fn sticky(stickiness: f32, stick_distance: f32) -> Self {
        Self {
            stickiness,
            stick_distance,
            ..Default::default()
        }
    }

    /// Resolves the coefficients used by a contact between two surfaces.
    pub fn combine(a: Option<&Self>, b: Option<&Self>) -> ContactMaterial {
        match (a, b) {
            (None, None) => ContactMaterial::default(),
            (Some(m), None) | (None, Some(m)) => ContactMaterial::from(m),
            (Some(a), Some(b)) => {
                let friction = a.friction_combine.resolve(b.friction_combine);
                let stickiness = a.stickiness_combine.resolve(b.stickiness_combine);
                let static_friction = friction.combine(a.static_friction, b.static_friction);
                ContactMaterial {
                    dynamic_friction: friction
                        .combine(a.dynamic_friction, b.dynamic_friction)
                        .min(static_friction),
                    static_friction,
                    stickiness: stickiness.combine(a.stickiness, b.stickiness),
                    stick_distance: stickiness.combine(a.stick_distance, b.stick_distance),
                }
            }
        }
    }
}

/// Coefficients resolved for a single contact.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactMaterial {
    pub dynamic_friction: f32,
    pub static_friction: f32,
    pub stickiness: f32,
    pub stick_distance: f32,
}

impl From<&CollisionMaterial> for ContactMaterial {
    fn from(m: &CollisionMaterial) -> Self {
        Self {
            dynamic_friction: m.dynamic_friction.min(m.static_friction),
            static_friction: m.static_friction,
            stickiness: m.stickiness,
            stick_distance: m.stick_distance,
        }
    }
}

/// How two coefficients are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MixingMode {
    #[default]
    Average,
    Min,
    Multiply,
    Max,
    GeometricMean,
}

impl MixingMode {
    pub fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            MixingMode::Average => 0.5 * (a + b),
            MixingMode::Min => a.min(b),
            MixingMode::Multiply => a * b,
            MixingMode::Max => a.max(b),
            MixingMode::GeometricMean => (a.abs() * b.abs()).sqrt(),
        }
    }

    /// The stronger of two requested modes wins; `Average` defers to the other side.
    pub fn resolve(self, other: MixingMode) -> MixingMode {
        if matches!(self, MixingMode::Average) {
            other
        } else {
            self
        }
    }
}
