use glam::Vec3;
use log::debug;

use super::Solver;
use crate::{
    error::{SolverError, SolverResult},
    mesh::{DeformableMesh, MeshHandle, SkinSource, TearResult, TriangleSkinMap},
};

impl Solver {
    /// Registers a mesh after checking that its vertex particles exist.
    pub fn add_deformable_mesh(&mut self, mesh: DeformableMesh) -> SolverResult<MeshHandle> {
        for &particle in mesh.vertex_particles().iter().flatten() {
            self.particles.check_index(particle as usize)?;
        }
        if let Some(source) = mesh.skin_source() {
            if !self.meshes.contains(source.master) {
                return Err(SolverError::InvalidHandle("mesh"));
            }
        }
        Ok(self.meshes.insert(mesh))
    }

    pub fn remove_deformable_mesh(&mut self, handle: MeshHandle) -> SolverResult<DeformableMesh> {
        self.meshes
            .remove(handle)
            .ok_or(SolverError::InvalidHandle("mesh"))
    }

    pub fn deformable_mesh(&self, handle: MeshHandle) -> Option<&DeformableMesh> {
        self.meshes.get(handle)
    }

    pub fn deformable_mesh_mut(&mut self, handle: MeshHandle) -> Option<&mut DeformableMesh> {
        self.meshes.get_mut(handle)
    }

    /// Binds `slave` onto the current surface of `master` and makes the
    /// master drive it from then on.
    pub fn bind_skin_map(
        &mut self,
        slave: MeshHandle,
        master: MeshHandle,
        master_flags: &[u32],
        slave_flags: &[u32],
    ) -> SolverResult<()> {
        let (slave_mesh, master_mesh) = self
            .meshes
            .get2_mut(slave, master)
            .ok_or(SolverError::InvalidHandle("mesh"))?;
        let map = TriangleSkinMap::bind(
            &master_mesh.surface(),
            &slave_mesh.surface(),
            master_flags,
            slave_flags,
        )?;
        slave_mesh.set_skin_source(Some(SkinSource { master, map }));
        Ok(())
    }

    /// Moves kinematic particles to the pose their mesh's bones give them.
    pub fn update_skeletal_animation(&mut self) {
        let _scope = self.context.profiler().scope("solver::skeletal_animation");
        for (_, mesh) in self.meshes.iter() {
            let local_to_world = mesh.world_to_local().inverse();
            for vertex in 0..mesh.vertex_count() as u32 {
                let Some(particle) = mesh.vertex_particle(vertex) else {
                    continue;
                };
                let p = particle as usize;
                if p >= self.particles.capacity() || !self.particles.is_kinematic(p) {
                    continue;
                }
                if let Some(local) = mesh.skinned_position(vertex) {
                    let world = local_to_world.transform_point3(local);
                    self.particles.positions[p] = world;
                    self.particles.renderable_positions[p] = world;
                }
            }
        }
    }

    /// Evaluates particle-driven meshes first, then the meshes skinned onto them.
    pub fn update_deformable_meshes(&mut self) -> SolverResult<()> {
        let _scope = self.context.profiler().scope("solver::deformable_meshes");
        let mut skinned = Vec::new();
        for (handle, mesh) in self.meshes.iter_mut() {
            match mesh.skin_source() {
                Some(source) => skinned.push((handle, source.master)),
                None => mesh.evaluate(&self.particles),
            }
        }
        for (slave, master) in skinned {
            let (slave, master) = self
                .meshes
                .get2_mut(slave, master)
                .ok_or(SolverError::InvalidHandle("mesh"))?;
            slave.evaluate_skinned(master)?;
        }
        Ok(())
    }

    /// Tears a mesh vertex and splits its particle to follow the new vertex.
    ///
    /// The new vertex takes the particle reserved for its slot. That particle
    /// receives a copy of the original's state after the original's inverse
    /// mass doubles and its radius halves, and it joins the active set.
    pub fn tear_deformable_mesh(
        &mut self,
        handle: MeshHandle,
        vertex: u32,
        plane_point: Vec3,
        plane_normal: Vec3,
    ) -> SolverResult<Option<TearResult>> {
        let mesh = self
            .meshes
            .get_mut(handle)
            .ok_or(SolverError::InvalidHandle("mesh"))?;
        let original = mesh.vertex_particle(vertex);
        let reserved = mesh.vertex_particle(mesh.vertex_count() as u32);
        for particle in [original, reserved].into_iter().flatten() {
            self.particles.check_index(particle as usize)?;
        }

        let Some(result) = mesh.tear_at_vertex(vertex, plane_point, plane_normal)? else {
            return Ok(None);
        };

        if let (Some(original), Some(split)) = (original, reserved) {
            let (o, s) = (original as usize, split as usize);
            self.particles.inv_masses[o] *= 2.0;
            self.particles.inv_rotational_masses[o] *= 2.0;
            self.particles.principal_radii[o] *= 0.5;
            self.particles.copy_particle(o, s)?;

            if !self.particles.active().contains(&split) {
                let mut active = self.particles.active().to_vec();
                active.push(split);
                self.particles.set_active(&active)?;
            }
            debug!("split particle {original} into {split}");
        }
        Ok(Some(result))
    }
}
