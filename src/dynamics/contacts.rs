//! Contacts projected as implicit unilateral constraints with Coulomb friction.
//!
//! Multipliers are position-level: a multiplier `λ` moves a particle of inverse
//! mass `w` by `λ·w` along the contact direction.

use std::ops::Range;

use glam::Vec3;

use super::{coloring, constraints::Corrections};
use crate::{
    collision::{Contact, ContactTarget},
    dynamics::constraints::ProjectionContext,
    error::SolverResult,
    utils::tasks::TaskScheduler,
};

/// Which half of a contact is projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPass {
    /// Non-penetration plus stickiness.
    Collision,
    /// Static and dynamic friction, limited by the accumulated normal multiplier.
    Friction,
}

/// Contacts of one kind, grouped into particle-disjoint phases.
#[derive(Debug, Clone, Default)]
pub struct ContactSet {
    contacts: Vec<Contact>,
    phase_sizes: Vec<u32>,
}

impl ContactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contacts and colors them with the batch scheduler.
    pub fn rebuild(&mut self, contacts: Vec<Contact>, max_particles: usize) -> SolverResult<()> {
        let assignment = coloring::color_constraints(contacts.len(), max_particles, |i, out| {
            contacts[i].particles(out)
        })?;
        let (order, sizes) = coloring::phase_order(&assignment);
        self.contacts = order.iter().map(|&i| contacts[i]).collect();
        self.phase_sizes = sizes;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
        self.phase_sizes.clear();
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn phase_ranges(&self) -> Vec<Range<usize>> {
        coloring::phase_ranges(&self.phase_sizes).collect()
    }

    pub(crate) fn project_phase(
        &mut self,
        phase: Range<usize>,
        pass: ContactPass,
        ctx: &ProjectionContext<'_>,
        scheduler: &TaskScheduler,
    ) -> Vec<Corrections> {
        scheduler.fold_mut(
            &mut self.contacts[phase],
            Corrections::default,
            |out, _, contact| match pass {
                ContactPass::Collision => project_collision(contact, ctx, out),
                ContactPass::Friction => project_friction(contact, ctx, out),
            },
        )
    }
}

/// Current gap, contact normal and combined inverse mass of a contact.
fn contact_state(contact: &Contact, ctx: &ProjectionContext<'_>) -> (f32, Vec3, f32) {
    let particle = contact.particle;
    let radius = ctx.particles.collision_radius(particle as usize);
    let position = ctx.position(particle);
    match contact.target {
        ContactTarget::Collider(_) => {
            let gap = (position - contact.point).dot(contact.normal) - radius;
            (gap, contact.normal, ctx.inv_mass(particle))
        }
        ContactTarget::Particle(other) => {
            let other_radius = ctx.particles.collision_radius(other as usize);
            let gap = (position - ctx.position(other)).dot(contact.normal) - radius - other_radius;
            (gap, contact.normal, ctx.inv_mass(particle) + ctx.inv_mass(other))
        }
    }
}

/// Splits a correction along `direction` between the contact's particles.
fn apply(contact: &Contact, direction: Vec3, lambda: f32, ctx: &ProjectionContext<'_>, out: &mut Corrections) {
    let w = ctx.inv_mass(contact.particle);
    if w > 0.0 {
        out.position(contact.particle, direction * (lambda * w));
    }
    if let ContactTarget::Particle(other) = contact.target {
        let w = ctx.inv_mass(other);
        if w > 0.0 {
            out.position(other, -direction * (lambda * w));
        }
    }
}

fn project_collision(contact: &mut Contact, ctx: &ProjectionContext<'_>, out: &mut Corrections) {
    let (gap, normal, weight) = contact_state(contact, ctx);
    if weight <= 0.0 {
        return;
    }

    // Accumulated push never turns into a pull.
    let delta = -gap / weight;
    let lambda = (contact.normal_lambda + delta).max(0.0);
    let applied = lambda - contact.normal_lambda;
    contact.normal_lambda = lambda;
    if applied != 0.0 {
        apply(contact, normal, applied, ctx, out);
    }

    let material = contact.material;
    let remaining = gap + applied * weight;
    if material.stickiness > 0.0 && remaining > 0.0 && remaining < material.stick_distance {
        let limit = -material.stick_distance / weight;
        let pull = -remaining * material.stickiness.min(1.0) / weight;
        let lambda = (contact.stick_lambda + pull).max(limit);
        let applied = lambda - contact.stick_lambda;
        contact.stick_lambda = lambda;
        if applied != 0.0 {
            apply(contact, normal, applied, ctx, out);
        }
    }
}

fn project_friction(contact: &mut Contact, ctx: &ProjectionContext<'_>, out: &mut Corrections) {
    if contact.normal_lambda <= 0.0 {
        return;
    }
    let (_, normal, weight) = contact_state(contact, ctx);
    if weight <= 0.0 {
        return;
    }

    let particles = ctx.particles;
    let a = contact.particle as usize;
    let mut displacement = particles.positions[a] - particles.prev_positions[a];
    match contact.target {
        ContactTarget::Collider(_) => displacement -= contact.target_velocity * ctx.dt,
        ContactTarget::Particle(other) => {
            let b = other as usize;
            displacement -= particles.positions[b] - particles.prev_positions[b];
        }
    }
    let tangential = displacement - normal * displacement.dot(normal);
    let slip = tangential.length();
    if slip < 1e-7 {
        return;
    }

    let material = contact.material;
    let needed = slip / weight;
    let static_limit = material.static_friction * contact.normal_lambda;
    let applied = if contact.tangent_lambda + needed <= static_limit {
        needed
    } else {
        let dynamic_limit = material.dynamic_friction * contact.normal_lambda;
        (dynamic_limit - contact.tangent_lambda).clamp(0.0, needed)
    };
    if applied <= 0.0 {
        return;
    }
    contact.tangent_lambda += applied;
    apply(contact, -tangential / slip, applied, ctx, out);
}
