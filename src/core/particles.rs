use glam::{Quat, Vec3, Vec4};

use crate::{
    collision::material::MaterialHandle,
    core::{
        mesh::Aabb,
        types::{Phase, QuaternionUnaligned, Vector4Unaligned},
    },
    error::{SolverError, SolverResult},
};

/// Structure-of-arrays storage for every particle a solver can simulate.
///
/// Capacity is fixed at creation. Indices are dense; the active subset is an
/// explicit index list, and inactive particles keep their state untouched.
#[derive(Debug, Clone)]
pub struct ParticleStore {
    capacity: usize,
    active: Vec<u32>,

    // Linear state
    pub positions: Vec<Vec3>,
    pub prev_positions: Vec<Vec3>,
    pub start_positions: Vec<Vec3>,
    pub renderable_positions: Vec<Vec3>,
    pub rest_positions: Vec<Vec4>,
    pub velocities: Vec<Vec3>,

    // Angular state
    pub orientations: Vec<Quat>,
    pub prev_orientations: Vec<Quat>,
    pub start_orientations: Vec<Quat>,
    pub renderable_orientations: Vec<Quat>,
    pub rest_orientations: Vec<Quat>,
    pub angular_velocities: Vec<Vec3>,

    // Mass & shape
    pub inv_masses: Vec<f32>,
    pub inv_rotational_masses: Vec<f32>,
    pub principal_radii: Vec<Vec3>,
    pub inv_inertia_tensors: Vec<Vec3>,
    pub phases: Vec<Phase>,
    pub normals: Vec<Vec3>,
    pub collision_materials: Vec<Option<MaterialHandle>>,

    // Per-frame inputs, cleared after each update
    pub external_forces: Vec<Vec3>,
    pub external_torques: Vec<Vec3>,
    pub wind: Vec<Vec3>,

    // Solver scratch
    pub position_deltas: Vec<Vec3>,
    pub orientation_deltas: Vec<Quat>,
    pub position_constraint_counts: Vec<u32>,
    pub orientation_constraint_counts: Vec<u32>,
    pub warm_start_deltas: Vec<Vec3>,

    // Fluid attributes (stored for the host, not simulated)
    pub smoothing_radii: Vec<f32>,
    pub rest_densities: Vec<f32>,
    pub viscosities: Vec<f32>,
    pub surface_tension: Vec<f32>,
    pub vorticity_confinement: Vec<f32>,
    pub buoyancies: Vec<f32>,
    pub atmospheric_drag: Vec<f32>,
    pub atmospheric_pressure: Vec<f32>,
    pub diffusion: Vec<f32>,
    pub diffusion_data: Vec<Vec4>,
    pub anisotropies: Vec<[Vec4; 3]>,
    pub user_data: Vec<Vec4>,
}

impl ParticleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: Vec::new(),
            positions: vec![Vec3::ZERO; capacity],
            prev_positions: vec![Vec3::ZERO; capacity],
            start_positions: vec![Vec3::ZERO; capacity],
            renderable_positions: vec![Vec3::ZERO; capacity],
            rest_positions: vec![Vec4::ZERO; capacity],
            velocities: vec![Vec3::ZERO; capacity],
            orientations: vec![Quat::IDENTITY; capacity],
            prev_orientations: vec![Quat::IDENTITY; capacity],
            start_orientations: vec![Quat::IDENTITY; capacity],
            renderable_orientations: vec![Quat::IDENTITY; capacity],
            rest_orientations: vec![Quat::IDENTITY; capacity],
            angular_velocities: vec![Vec3::ZERO; capacity],
            inv_masses: vec![0.0; capacity],
            inv_rotational_masses: vec![0.0; capacity],
            principal_radii: vec![Vec3::splat(0.05); capacity],
            inv_inertia_tensors: vec![Vec3::ZERO; capacity],
            phases: vec![Phase::default(); capacity],
            normals: vec![Vec3::ZERO; capacity],
            collision_materials: vec![None; capacity],
            external_forces: vec![Vec3::ZERO; capacity],
            external_torques: vec![Vec3::ZERO; capacity],
            wind: vec![Vec3::ZERO; capacity],
            position_deltas: vec![Vec3::ZERO; capacity],
            orientation_deltas: vec![Quat::from_xyzw(0.0, 0.0, 0.0, 0.0); capacity],
            position_constraint_counts: vec![0; capacity],
            orientation_constraint_counts: vec![0; capacity],
            warm_start_deltas: vec![Vec3::ZERO; capacity],
            smoothing_radii: vec![0.0; capacity],
            rest_densities: vec![0.0; capacity],
            viscosities: vec![0.0; capacity],
            surface_tension: vec![0.0; capacity],
            vorticity_confinement: vec![0.0; capacity],
            buoyancies: vec![0.0; capacity],
            atmospheric_drag: vec![0.0; capacity],
            atmospheric_pressure: vec![0.0; capacity],
            diffusion: vec![0.0; capacity],
            diffusion_data: vec![Vec4::ZERO; capacity],
            anisotropies: vec![[Vec4::X, Vec4::Y, Vec4::Z]; capacity],
            user_data: vec![Vec4::ZERO; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn check_index(&self, index: usize) -> SolverResult<()> {
        if index < self.capacity {
            Ok(())
        } else {
            Err(SolverError::ParticleOutOfRange {
                index,
                max: self.capacity,
            })
        }
    }

    pub fn active(&self) -> &[u32] {
        &self.active
    }

    /// Replaces the active subset. Duplicates are removed, order is kept.
    pub fn set_active(&mut self, indices: &[u32]) -> SolverResult<()> {
        for &index in indices {
            self.check_index(index as usize)?;
        }
        let mut seen = vec![false; self.capacity];
        self.active.clear();
        for &index in indices {
            if !std::mem::replace(&mut seen[index as usize], true) {
                self.active.push(index);
            }
        }
        Ok(())
    }

    pub fn is_kinematic(&self, index: usize) -> bool {
        self.inv_masses[index] <= 0.0
    }

    /// Radius used for collision detection: the largest principal radius.
    pub fn collision_radius(&self, index: usize) -> f32 {
        self.principal_radii[index].max_element()
    }

    pub fn max_active_radius(&self) -> f32 {
        self.active
            .iter()
            .map(|&i| self.collision_radius(i as usize))
            .fold(0.0, f32::max)
    }

    /// Bounds of all active particles, radii included.
    pub fn bounds(&self) -> Option<Aabb> {
        if self.active.is_empty() {
            return None;
        }
        let mut bounds = Aabb::empty();
        for &i in &self.active {
            let i = i as usize;
            let r = Vec3::splat(self.collision_radius(i));
            bounds.extend(self.positions[i] - r);
            bounds.extend(self.positions[i] + r);
        }
        Some(bounds)
    }

    /// Solid-ellipsoid inverse inertia from radii and rotational mass.
    pub fn recalculate_inertia_tensors(&mut self) {
        for &i in &self.active {
            let i = i as usize;
            let inv_mass = self.inv_rotational_masses[i];
            if inv_mass <= 0.0 {
                self.inv_inertia_tensors[i] = Vec3::ZERO;
                continue;
            }
            let r2 = self.principal_radii[i] * self.principal_radii[i];
            let inertia = Vec3::new(r2.y + r2.z, r2.x + r2.z, r2.x + r2.y) * (0.2 / inv_mass);
            self.inv_inertia_tensors[i] = Vec3::select(
                inertia.cmpgt(Vec3::splat(1e-12)),
                Vec3::ONE / inertia,
                Vec3::ZERO,
            );
        }
    }

    /// Copies every simulation attribute of `source` onto `target`.
    pub fn copy_particle(&mut self, source: usize, target: usize) -> SolverResult<()> {
        self.check_index(source)?;
        self.check_index(target)?;
        let (s, t) = (source, target);
        copy_slot(&mut self.positions, s, t);
        copy_slot(&mut self.prev_positions, s, t);
        copy_slot(&mut self.start_positions, s, t);
        copy_slot(&mut self.renderable_positions, s, t);
        copy_slot(&mut self.rest_positions, s, t);
        copy_slot(&mut self.velocities, s, t);
        copy_slot(&mut self.orientations, s, t);
        copy_slot(&mut self.prev_orientations, s, t);
        copy_slot(&mut self.start_orientations, s, t);
        copy_slot(&mut self.renderable_orientations, s, t);
        copy_slot(&mut self.rest_orientations, s, t);
        copy_slot(&mut self.angular_velocities, s, t);
        copy_slot(&mut self.inv_masses, s, t);
        copy_slot(&mut self.inv_rotational_masses, s, t);
        copy_slot(&mut self.principal_radii, s, t);
        copy_slot(&mut self.inv_inertia_tensors, s, t);
        copy_slot(&mut self.phases, s, t);
        copy_slot(&mut self.normals, s, t);
        copy_slot(&mut self.collision_materials, s, t);
        copy_slot(&mut self.user_data, s, t);
        Ok(())
    }

    pub fn clear_external_inputs(&mut self) {
        self.external_forces.fill(Vec3::ZERO);
        self.external_torques.fill(Vec3::ZERO);
    }

    pub fn anisotropies(&self, out: &mut [Vector4Unaligned]) -> SolverResult<()> {
        check_bulk_len(self.capacity * 3, out.len())?;
        for (chunk, axes) in out.chunks_mut(3).zip(&self.anisotropies) {
            for (slot, axis) in chunk.iter_mut().zip(axes) {
                *slot = (*axis).into();
            }
        }
        Ok(())
    }

    pub fn set_anisotropies(&mut self, data: &[Vector4Unaligned]) -> SolverResult<()> {
        check_bulk_len(self.capacity * 3, data.len())?;
        for (axes, chunk) in self.anisotropies.iter_mut().zip(data.chunks(3)) {
            for (axis, value) in axes.iter_mut().zip(chunk) {
                *axis = (*value).into();
            }
        }
        Ok(())
    }
}

fn copy_slot<T: Copy>(values: &mut [T], source: usize, target: usize) {
    values[target] = values[source];
}

fn check_bulk_len(capacity: usize, len: usize) -> SolverResult<()> {
    if len > capacity {
        Err(SolverError::CapacityExceeded { capacity })
    } else {
        Ok(())
    }
}

/// Fills `out` in index order from `src`, converting to the boundary type.
pub fn read_into<T: Copy, U: From<T>>(src: &[T], out: &mut [U]) -> SolverResult<()> {
    check_bulk_len(src.len(), out.len())?;
    for (slot, value) in out.iter_mut().zip(src) {
        *slot = U::from(*value);
    }
    Ok(())
}

/// Overwrites the first `data.len()` entries of `dst`.
pub fn write_from<T: From<U>, U: Copy>(dst: &mut [T], data: &[U]) -> SolverResult<()> {
    check_bulk_len(dst.len(), data.len())?;
    for (slot, value) in dst.iter_mut().zip(data) {
        *slot = T::from(*value);
    }
    Ok(())
}

macro_rules! bulk_accessors {
    ($($field:ident : $boundary:ty => $get:ident, $set:ident;)*) => {
        impl ParticleStore {
            $(
                pub fn $get(&self, out: &mut [$boundary]) -> SolverResult<()> {
                    read_into(&self.$field, out)
                }

                pub fn $set(&mut self, data: &[$boundary]) -> SolverResult<()> {
                    write_from(&mut self.$field, data)
                }
            )*
        }
    };
}

bulk_accessors! {
    positions: Vector4Unaligned => get_positions, set_positions;
    prev_positions: Vector4Unaligned => get_prev_positions, set_prev_positions;
    start_positions: Vector4Unaligned => get_start_positions, set_start_positions;
    renderable_positions: Vector4Unaligned => get_renderable_positions, set_renderable_positions;
    rest_positions: Vector4Unaligned => get_rest_positions, set_rest_positions;
    velocities: Vector4Unaligned => get_velocities, set_velocities;
    orientations: QuaternionUnaligned => get_orientations, set_orientations;
    prev_orientations: QuaternionUnaligned => get_prev_orientations, set_prev_orientations;
    start_orientations: QuaternionUnaligned => get_start_orientations, set_start_orientations;
    renderable_orientations: QuaternionUnaligned => get_renderable_orientations, set_renderable_orientations;
    rest_orientations: QuaternionUnaligned => get_rest_orientations, set_rest_orientations;
    angular_velocities: Vector4Unaligned => get_angular_velocities, set_angular_velocities;
    inv_masses: f32 => get_inv_masses, set_inv_masses;
    inv_rotational_masses: f32 => get_inv_rotational_masses, set_inv_rotational_masses;
    principal_radii: Vector4Unaligned => get_principal_radii, set_principal_radii;
    inv_inertia_tensors: Vector4Unaligned => get_inv_inertia_tensors, set_inv_inertia_tensors;
    phases: u32 => get_phases, set_phases;
    normals: Vector4Unaligned => get_normals, set_normals;
    external_forces: Vector4Unaligned => get_external_forces, set_external_forces;
    external_torques: Vector4Unaligned => get_external_torques, set_external_torques;
    wind: Vector4Unaligned => get_wind, set_wind;
    position_deltas: Vector4Unaligned => get_position_deltas, set_position_deltas;
    position_constraint_counts: u32 => get_position_constraint_counts, set_position_constraint_counts;
    orientation_constraint_counts: u32 => get_orientation_constraint_counts, set_orientation_constraint_counts;
    smoothing_radii: f32 => get_smoothing_radii, set_smoothing_radii;
    rest_densities: f32 => get_rest_densities, set_rest_densities;
    viscosities: f32 => get_viscosities, set_viscosities;
    surface_tension: f32 => get_surface_tension, set_surface_tension;
    vorticity_confinement: f32 => get_vorticity_confinement, set_vorticity_confinement;
    buoyancies: f32 => get_buoyancies, set_buoyancies;
    atmospheric_drag: f32 => get_atmospheric_drag, set_atmospheric_drag;
    atmospheric_pressure: f32 => get_atmospheric_pressure, set_atmospheric_pressure;
    diffusion: f32 => get_diffusion, set_diffusion;
    diffusion_data: Vector4Unaligned => get_diffusion_data, set_diffusion_data;
    user_data: Vector4Unaligned => get_user_data, set_user_data;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_set_rejects_out_of_range_indices() {
        let mut store = ParticleStore::new(4);
        assert_eq!(
            store.set_active(&[0, 4]),
            Err(SolverError::ParticleOutOfRange { index: 4, max: 4 })
        );
        store.set_active(&[2, 0, 2]).expect("valid indices");
        assert_eq!(store.active(), &[2, 0]);
    }

    #[test]
    fn bulk_accessors_convert_boundary_types() {
        let mut store = ParticleStore::new(3);
        store
            .set_positions(&[Vector4Unaligned::new(1.0, 2.0, 3.0, 9.0)])
            .expect("fits capacity");
        assert_eq!(store.positions[0], Vec3::new(1.0, 2.0, 3.0));

        let mut out = [Vector4Unaligned::default(); 2];
        store.get_positions(&mut out).expect("fits capacity");
        assert_eq!(out[0], Vector4Unaligned::new(1.0, 2.0, 3.0, 0.0));

        let too_long = [0.0_f32; 4];
        assert!(store.set_inv_masses(&too_long).is_err());
    }

    #[test]
    fn copy_particle_duplicates_state() {
        let mut store = ParticleStore::new(2);
        store.positions[0] = Vec3::X;
        store.inv_masses[0] = 2.0;
        store.phases[0] = Phase::new(3, Phase::SELF_COLLIDE);
        store.copy_particle(0, 1).expect("in range");
        assert_eq!(store.positions[1], Vec3::X);
        assert_eq!(store.inv_masses[1], 2.0);
        assert_eq!(store.phases[1].group(), 3);
    }

    #[test]
    fn inertia_of_unit_sphere_particle() {
        let mut store = ParticleStore::new(1);
        store.set_active(&[0]).expect("valid");
        store.principal_radii[0] = Vec3::ONE;
        store.inv_rotational_masses[0] = 1.0;
        store.recalculate_inertia_tensors();
        // I = 2/5 m r^2 for a solid sphere.
        assert!((store.inv_inertia_tensors[0] - Vec3::splat(2.5)).length() < 1e-5);
    }
}
