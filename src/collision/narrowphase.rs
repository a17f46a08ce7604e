use glam::Vec3;

use super::{
    broadphase::ParticleGrid,
    collider::{ColliderHandle, CollisionWorld},
    contact::{Contact, ContactTarget},
    material::CollisionMaterial,
    shapes::SurfacePoint,
};
use crate::{core::particles::ParticleStore, utils::tasks::TaskScheduler};

/// Read-only inputs shared by every narrow-phase worker.
pub struct NarrowPhaseInput<'a> {
    pub world: &'a CollisionWorld,
    pub particles: &'a ParticleStore,
    pub grid: &'a ParticleGrid,
    /// Contacts are generated up to this gap ahead of touching.
    pub margin: f32,
}

/// Contacts between active particles and every active collider.
///
/// Colliders are processed in parallel into per-worker buffers; the merged
/// result is sorted so contact order does not depend on scheduling.
pub fn collider_contacts(input: &NarrowPhaseInput<'_>, scheduler: &TaskScheduler) -> Vec<Contact> {
    let colliders = input.world.active_colliders();
    let buffers = scheduler.fold_range(
        colliders.len(),
        || (Vec::new(), Vec::new()),
        |(contacts, candidates): &mut (Vec<Contact>, Vec<u32>), index| {
            let handle = colliders[index];
            let Some(bounds) = input.world.collider_bounds(handle) else {
                return;
            };
            candidates.clear();
            input.grid.query_aabb(&bounds.expanded(input.margin), candidates);
            for &particle in candidates.iter() {
                if let Some(contact) = particle_collider_contact(input, particle, handle) {
                    contacts.push(contact);
                }
            }
        },
    );

    let mut contacts: Vec<Contact> = buffers.into_iter().flat_map(|(c, _)| c).collect();
    contacts.sort_by_key(|c| (c.particle, target_key(&c.target)));
    contacts
}

/// Contact between one particle and one collider, if within the margin.
pub fn particle_collider_contact(
    input: &NarrowPhaseInput<'_>,
    particle: u32,
    handle: ColliderHandle,
) -> Option<Contact> {
    let world = input.world;
    let particles = input.particles;
    let index = particle as usize;
    let collider = world.collider(handle)?;
    if !particles.phases[index].interacts_with(collider.phase) {
        return None;
    }
    let shape = world.shape(collider.shape)?;

    let position = particles.positions[index];
    let local = collider.transform.inverse_transform_point(position);

    let field = shape
        .distance_field
        .and_then(|h| world.distance_field(h))
        .filter(|field| field.is_built());
    let surface = match field {
        Some(field) => {
            let (distance, normal) = field.sample_with_normal(local).ok()?;
            SurfacePoint {
                point: local - normal * distance,
                normal,
                distance,
            }
        }
        None => shape.shape.closest_surface(local)?,
    };

    let point = collider.transform.transform_point(surface.point);
    let normal = collider.transform.transform_normal(surface.normal);
    if normal == Vec3::ZERO {
        return None;
    }
    let mut distance = (position - point).dot(normal);
    if surface.distance < 0.0 && distance > 0.0 {
        // Scaling can flip the projected sign; trust the shape's classification.
        distance = -distance;
    }
    let gap = distance - collider.thickness - particles.collision_radius(index);
    if gap > input.margin {
        return None;
    }

    let particle_material = particles.collision_materials[index].and_then(|h| world.material(h));
    let material = CollisionMaterial::combine(particle_material, world.collider_material(collider));
    let velocity = collider
        .rigidbody
        .and_then(|h| world.rigidbody(h))
        .map(|body| body.velocity_at_point(point))
        .unwrap_or(Vec3::ZERO);

    Some(
        Contact::new(
            particle,
            ContactTarget::Collider(handle),
            point + normal * collider.thickness,
            normal,
            gap,
        )
        .with_material(material)
        .with_target_velocity(velocity),
    )
}

/// Contacts between pairs of active particles allowed to collide.
///
/// Pairs whose rest positions already overlap are skipped, so neighbours in
/// the same cloth do not push each other apart.
pub fn particle_contacts(input: &NarrowPhaseInput<'_>, scheduler: &TaskScheduler) -> Vec<Contact> {
    let particles = input.particles;
    let active = particles.active();
    let buffers = scheduler.fold_range(active.len(), Vec::new, |contacts: &mut Vec<Contact>, i| {
        let a = active[i];
        let ia = a as usize;
        let pa = particles.positions[ia];
        let ra = particles.collision_radius(ia);
        input.grid.for_each_neighbor(pa, |b| {
            if b <= a {
                return;
            }
            let ib = b as usize;
            if !particles.phases[ia].interacts_with(particles.phases[ib]) {
                return;
            }
            let rb = particles.collision_radius(ib);
            if rest_overlap(particles, ia, ib, ra + rb) {
                return;
            }
            let pb = particles.positions[ib];
            let offset = pa - pb;
            let length = offset.length();
            let gap = length - ra - rb;
            if gap > input.margin {
                return;
            }
            let normal = if length > 1e-6 { offset / length } else { Vec3::Y };
            let material = CollisionMaterial::combine(
                particles.collision_materials[ia].and_then(|h| input.world.material(h)),
                particles.collision_materials[ib].and_then(|h| input.world.material(h)),
            );
            contacts.push(
                Contact::new(a, ContactTarget::Particle(b), pb, normal, gap).with_material(material),
            );
        });
    });

    let mut contacts: Vec<Contact> = buffers.into_iter().flatten().collect();
    contacts.sort_by_key(|c| (c.particle, target_key(&c.target)));
    contacts
}

/// Rest positions with a non-zero `w` are considered authored.
fn rest_overlap(particles: &ParticleStore, a: usize, b: usize, radius_sum: f32) -> bool {
    let (rest_a, rest_b) = (particles.rest_positions[a], particles.rest_positions[b]);
    if rest_a.w == 0.0 || rest_b.w == 0.0 {
        return false;
    }
    rest_a.truncate().distance_squared(rest_b.truncate()) < radius_sum * radius_sum
}

fn target_key(target: &ContactTarget) -> (u8, usize, u32) {
    match *target {
        ContactTarget::Collider(handle) => (0, handle.index(), handle.generation()),
        ContactTarget::Particle(index) => (1, index as usize, 0),
    }
}
