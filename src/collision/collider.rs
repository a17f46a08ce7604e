use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{
    material::{CollisionMaterial, MaterialHandle},
    shapes::{transformed_bounds, Shape},
};
use crate::{
    core::{
        mesh::Aabb,
        types::{Phase, Transform},
    },
    distance_field::DistanceField,
    error::{SolverError, SolverResult},
    utils::allocator::{Arena, Handle, Release},
};

pub type ShapeHandle = Handle<ColliderShape>;
pub type RigidbodyHandle = Handle<Rigidbody>;
pub type ColliderHandle = Handle<Collider>;
pub type DistanceFieldHandle = Handle<DistanceField>;

/// Shape geometry plus an optional distance field that replaces the
/// analytic narrow phase once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ColliderShape {
    pub shape: Shape,
    pub distance_field: Option<DistanceFieldHandle>,
}

/// Velocity and inertial data of the body a collider is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rigidbody {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// World-space center of mass.
    pub center_of_mass: Vec3,
    pub inverse_mass: f32,
    pub inverse_inertia: Vec3,
    pub kinematic: bool,
}

impl Default for Rigidbody {
    fn default() -> Self {
        Self {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            center_of_mass: Vec3::ZERO,
            inverse_mass: 0.0,
            inverse_inertia: Vec3::ZERO,
            kinematic: true,
        }
    }
}

impl Rigidbody {
    pub fn velocity_at_point(&self, point: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(point - self.center_of_mass)
    }
}

/// Collider component referencing its shape, body and material by handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Collider {
    pub shape: ShapeHandle,
    pub rigidbody: Option<RigidbodyHandle>,
    pub material: Option<MaterialHandle>,
    pub transform: Transform,
    /// Extra skin added around the shape surface.
    pub thickness: f32,
    pub phase: Phase,
}

impl Collider {
    pub fn builder(shape: ShapeHandle) -> ColliderBuilder {
        ColliderBuilder::new(shape)
    }

    /// Colliders live in a reserved group so default particles hit them.
    pub fn default_phase() -> Phase {
        Phase::new(Phase::GROUP_MASK, 0)
    }
}

pub struct ColliderBuilder {
    collider: Collider,
}

impl ColliderBuilder {
    pub fn new(shape: ShapeHandle) -> Self {
        Self {
            collider: Collider {
                shape,
                rigidbody: None,
                material: None,
                transform: Transform::default(),
                thickness: 0.0,
                phase: Collider::default_phase(),
            },
        }
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.collider.transform = transform;
        self
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.collider.transform.position = position;
        self
    }

    pub fn rigidbody(mut self, rigidbody: RigidbodyHandle) -> Self {
        self.collider.rigidbody = Some(rigidbody);
        self
    }

    pub fn material(mut self, material: MaterialHandle) -> Self {
        self.collider.material = Some(material);
        self
    }

    pub fn thickness(mut self, thickness: f32) -> Self {
        self.collider.thickness = thickness;
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.collider.phase = phase;
        self
    }

    pub fn build(self) -> Collider {
        self.collider
    }
}

/// Owns every collision object and the set of colliders the solver sees.
///
/// Objects are reference counted: `create_*` hands out the first reference,
/// colliders and shape/field links hold their own, and `destroy_*` drops
/// the caller's. An object is freed when its last reference goes.
#[derive(Default)]
pub struct CollisionWorld {
    shapes: Arena<ColliderShape>,
    rigidbodies: Arena<Rigidbody>,
    materials: Arena<CollisionMaterial>,
    distance_fields: Arena<DistanceField>,
    colliders: Arena<Collider>,
    active: Vec<ColliderHandle>,
}

impl CollisionWorld {
    pub fn new() -> Self {
        Self::default()
    }

    // Shapes

    pub fn create_shape(&mut self, shape: Shape) -> ShapeHandle {
        self.shapes.insert(ColliderShape {
            shape,
            distance_field: None,
        })
    }

    pub fn update_shape(&mut self, handle: ShapeHandle, shape: Shape) -> SolverResult<()> {
        let slot = self
            .shapes
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("shape"))?;
        slot.shape = shape;
        Ok(())
    }

    /// Attaches (or detaches with `None`) a distance field, taking a reference to it.
    pub fn set_shape_distance_field(
        &mut self,
        handle: ShapeHandle,
        field: Option<DistanceFieldHandle>,
    ) -> SolverResult<()> {
        if let Some(field) = field {
            if !self.distance_fields.retain(field) {
                return Err(SolverError::InvalidHandle("distance field"));
            }
        }
        let Some(slot) = self.shapes.get_mut(handle) else {
            if let Some(field) = field {
                self.distance_fields.release(field);
            }
            return Err(SolverError::InvalidHandle("shape"));
        };
        if let Some(previous) = std::mem::replace(&mut slot.distance_field, field) {
            self.distance_fields.release(previous);
        }
        Ok(())
    }

    pub fn shape(&self, handle: ShapeHandle) -> Option<&ColliderShape> {
        self.shapes.get(handle)
    }

    pub fn destroy_shape(&mut self, handle: ShapeHandle) -> SolverResult<()> {
        self.release_shape(handle)
    }

    fn release_shape(&mut self, handle: ShapeHandle) -> SolverResult<()> {
        match self.shapes.release(handle) {
            Release::Stale => Err(SolverError::InvalidHandle("shape")),
            Release::Shared => Ok(()),
            Release::Freed(shape) => {
                if let Some(field) = shape.distance_field {
                    self.distance_fields.release(field);
                }
                Ok(())
            }
        }
    }

    // Rigidbodies

    pub fn create_rigidbody(&mut self, rigidbody: Rigidbody) -> RigidbodyHandle {
        self.rigidbodies.insert(rigidbody)
    }

    pub fn update_rigidbody(
        &mut self,
        handle: RigidbodyHandle,
        rigidbody: Rigidbody,
    ) -> SolverResult<()> {
        let slot = self
            .rigidbodies
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("rigidbody"))?;
        *slot = rigidbody;
        Ok(())
    }

    pub fn rigidbody(&self, handle: RigidbodyHandle) -> Option<&Rigidbody> {
        self.rigidbodies.get(handle)
    }

    pub fn destroy_rigidbody(&mut self, handle: RigidbodyHandle) -> SolverResult<()> {
        release_or_invalid(&mut self.rigidbodies, handle, "rigidbody")
    }

    // Materials

    pub fn create_material(&mut self, material: CollisionMaterial) -> MaterialHandle {
        self.materials.insert(material)
    }

    pub fn update_material(
        &mut self,
        handle: MaterialHandle,
        material: CollisionMaterial,
    ) -> SolverResult<()> {
        let slot = self
            .materials
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("material"))?;
        *slot = material;
        Ok(())
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&CollisionMaterial> {
        self.materials.get(handle)
    }

    pub fn destroy_material(&mut self, handle: MaterialHandle) -> SolverResult<()> {
        release_or_invalid(&mut self.materials, handle, "material")
    }

    // Distance fields

    pub fn create_distance_field(&mut self) -> DistanceFieldHandle {
        self.distance_fields.insert(DistanceField::new())
    }

    pub fn distance_field(&self, handle: DistanceFieldHandle) -> Option<&DistanceField> {
        self.distance_fields.get(handle)
    }

    pub fn distance_field_mut(&mut self, handle: DistanceFieldHandle) -> Option<&mut DistanceField> {
        self.distance_fields.get_mut(handle)
    }

    pub fn destroy_distance_field(&mut self, handle: DistanceFieldHandle) -> SolverResult<()> {
        release_or_invalid(&mut self.distance_fields, handle, "distance field")
    }

    // Colliders

    /// Registers a collider, taking a reference on its shape, body and material.
    pub fn create_collider(&mut self, collider: Collider) -> SolverResult<ColliderHandle> {
        if !self.shapes.contains(collider.shape) {
            return Err(SolverError::InvalidHandle("shape"));
        }
        if collider.rigidbody.is_some_and(|h| !self.rigidbodies.contains(h)) {
            return Err(SolverError::InvalidHandle("rigidbody"));
        }
        if collider.material.is_some_and(|h| !self.materials.contains(h)) {
            return Err(SolverError::InvalidHandle("material"));
        }
        self.shapes.retain(collider.shape);
        if let Some(body) = collider.rigidbody {
            self.rigidbodies.retain(body);
        }
        if let Some(material) = collider.material {
            self.materials.retain(material);
        }
        Ok(self.colliders.insert(collider))
    }

    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    pub fn set_collider_transform(
        &mut self,
        handle: ColliderHandle,
        transform: Transform,
    ) -> SolverResult<()> {
        self.collider_mut(handle)?.transform = transform;
        Ok(())
    }

    pub fn set_collider_thickness(&mut self, handle: ColliderHandle, thickness: f32) -> SolverResult<()> {
        self.collider_mut(handle)?.thickness = thickness;
        Ok(())
    }

    pub fn set_collider_phase(&mut self, handle: ColliderHandle, phase: Phase) -> SolverResult<()> {
        self.collider_mut(handle)?.phase = phase;
        Ok(())
    }

    pub fn set_collider_shape(&mut self, handle: ColliderHandle, shape: ShapeHandle) -> SolverResult<()> {
        if !self.colliders.contains(handle) {
            return Err(SolverError::InvalidHandle("collider"));
        }
        if !self.shapes.retain(shape) {
            return Err(SolverError::InvalidHandle("shape"));
        }
        let previous = std::mem::replace(&mut self.collider_mut(handle)?.shape, shape);
        self.release_shape(previous)
    }

    pub fn set_collider_rigidbody(
        &mut self,
        handle: ColliderHandle,
        rigidbody: Option<RigidbodyHandle>,
    ) -> SolverResult<()> {
        if !self.colliders.contains(handle) {
            return Err(SolverError::InvalidHandle("collider"));
        }
        if let Some(body) = rigidbody {
            if !self.rigidbodies.retain(body) {
                return Err(SolverError::InvalidHandle("rigidbody"));
            }
        }
        if let Some(previous) = std::mem::replace(&mut self.collider_mut(handle)?.rigidbody, rigidbody) {
            self.rigidbodies.release(previous);
        }
        Ok(())
    }

    pub fn set_collider_material(
        &mut self,
        handle: ColliderHandle,
        material: Option<MaterialHandle>,
    ) -> SolverResult<()> {
        if !self.colliders.contains(handle) {
            return Err(SolverError::InvalidHandle("collider"));
        }
        if let Some(material) = material {
            if !self.materials.retain(material) {
                return Err(SolverError::InvalidHandle("material"));
            }
        }
        if let Some(previous) = std::mem::replace(&mut self.collider_mut(handle)?.material, material) {
            self.materials.release(previous);
        }
        Ok(())
    }

    /// Drops the caller's reference. The collider's own references go with it once freed.
    pub fn destroy_collider(&mut self, handle: ColliderHandle) -> SolverResult<()> {
        match self.colliders.release(handle) {
            Release::Stale => Err(SolverError::InvalidHandle("collider")),
            Release::Shared => Ok(()),
            Release::Freed(collider) => {
                self.release_shape(collider.shape)?;
                if let Some(body) = collider.rigidbody {
                    self.rigidbodies.release(body);
                }
                if let Some(material) = collider.material {
                    self.materials.release(material);
                }
                Ok(())
            }
        }
    }

    /// Makes a collider visible to solvers. Adding twice is a no-op.
    pub fn add_collider(&mut self, handle: ColliderHandle) -> SolverResult<()> {
        if !self.colliders.contains(handle) {
            return Err(SolverError::InvalidHandle("collider"));
        }
        if !self.active.contains(&handle) {
            self.colliders.retain(handle);
            self.active.push(handle);
        }
        Ok(())
    }

    pub fn remove_collider(&mut self, handle: ColliderHandle) -> SolverResult<()> {
        let Some(position) = self.active.iter().position(|&h| h == handle) else {
            return Err(SolverError::InvalidHandle("collider"));
        };
        self.active.swap_remove(position);
        self.destroy_collider(handle)
    }

    pub fn active_colliders(&self) -> &[ColliderHandle] {
        &self.active
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// World bounds of an active collider, thickness included.
    ///
    /// A built distance field replaces the analytic shape, so its root cell
    /// bounds the collider instead.
    pub fn collider_bounds(&self, handle: ColliderHandle) -> Option<Aabb> {
        let collider = self.colliders.get(handle)?;
        let shape = self.shapes.get(collider.shape)?;
        let local = shape
            .distance_field
            .and_then(|h| self.distance_fields.get(h))
            .filter(|field| field.is_built())
            .and_then(DistanceField::bounds)
            .unwrap_or_else(|| shape.shape.local_bounds());
        Some(transformed_bounds(&local, &collider.transform).expanded(collider.thickness))
    }

    /// Resolved material of a collider, if it has a live one.
    pub fn collider_material(&self, collider: &Collider) -> Option<&CollisionMaterial> {
        collider.material.and_then(|h| self.materials.get(h))
    }

    fn collider_mut(&mut self, handle: ColliderHandle) -> SolverResult<&mut Collider> {
        self.colliders
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("collider"))
    }
}

fn release_or_invalid<T>(
    arena: &mut Arena<T>,
    handle: Handle<T>,
    kind: &'static str,
) -> SolverResult<()> {
    if arena.release(handle).is_stale() {
        Err(SolverError::InvalidHandle(kind))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_outlives_caller_reference_while_collider_holds_it() {
        let mut world = CollisionWorld::new();
        let shape = world.create_shape(Shape::sphere(1.0));
        let collider = world
            .create_collider(Collider::builder(shape).build())
            .expect("valid shape");

        world.destroy_shape(shape).expect("caller reference");
        assert!(world.shape(shape).is_some());

        world.destroy_collider(collider).expect("caller reference");
        assert!(world.shape(shape).is_none());
        assert_eq!(
            world.destroy_shape(shape),
            Err(SolverError::InvalidHandle("shape"))
        );
    }

    #[test]
    fn active_set_keeps_collider_alive() {
        let mut world = CollisionWorld::new();
        let shape = world.create_shape(Shape::cuboid(Vec3::ONE));
        let collider = world
            .create_collider(Collider::builder(shape).build())
            .expect("valid shape");
        world.add_collider(collider).expect("live collider");
        world.add_collider(collider).expect("idempotent");
        assert_eq!(world.active_colliders().len(), 1);

        world.destroy_collider(collider).expect("caller reference");
        assert!(world.collider(collider).is_some());

        world.remove_collider(collider).expect("was active");
        assert!(world.collider(collider).is_none());
        assert!(world.active_colliders().is_empty());
    }

    #[test]
    fn distance_field_link_is_released_with_shape() {
        let mut world = CollisionWorld::new();
        let field = world.create_distance_field();
        let shape = world.create_shape(Shape::sphere(1.0));
        world
            .set_shape_distance_field(shape, Some(field))
            .expect("live handles");
        world.destroy_distance_field(field).expect("caller reference");
        assert!(world.distance_field(field).is_some());

        world.destroy_shape(shape).expect("caller reference");
        assert!(world.distance_field(field).is_none());
    }

    #[test]
    fn collider_creation_rejects_dead_handles() {
        let mut world = CollisionWorld::new();
        let shape = world.create_shape(Shape::sphere(1.0));
        let body = world.create_rigidbody(Rigidbody::default());
        world.destroy_rigidbody(body).expect("caller reference");
        let result = world.create_collider(Collider::builder(shape).rigidbody(body).build());
        assert_eq!(result, Err(SolverError::InvalidHandle("rigidbody")));
        // The shape reference was not leaked by the failed call.
        world.destroy_shape(shape).expect("caller reference");
        assert!(world.shape(shape).is_none());
    }

    #[test]
    fn rigidbody_point_velocity_includes_spin() {
        let body = Rigidbody {
            angular_velocity: Vec3::Z,
            ..Default::default()
        };
        let v = body.velocity_at_point(Vec3::X);
        assert!((v - Vec3::Y).length() < 1e-6);
    }
}
