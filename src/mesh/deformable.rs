use glam::{Mat4, Vec2, Vec3, Vec4};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    skin_map::{SkinSurface, TriangleSkinMap},
    topology::MeshTopology,
};
use crate::{
    core::particles::ParticleStore,
    error::{SolverError, SolverResult},
    utils::allocator::Handle,
};

pub type MeshHandle = Handle<DeformableMesh>;

/// Number of texture coordinate channels carried per vertex.
pub const UV_CHANNELS: usize = 4;

/// How particle-driven vertex normals are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalUpdate {
    /// Area-weighted average of the incident triangle normals.
    #[default]
    Recalculate,
    /// Rest normal rotated by the particle's orientation relative to its rest orientation.
    Skin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshUpdateMode {
    pub normals: NormalUpdate,
    pub update_tangents: bool,
}

impl Default for MeshUpdateMode {
    fn default() -> Self {
        Self {
            normals: NormalUpdate::Recalculate,
            update_tangents: true,
        }
    }
}

/// Result of a successful tear.
#[derive(Debug, Clone, PartialEq)]
pub struct TearResult {
    pub original_vertex: u32,
    pub new_vertex: u32,
    /// Every edge incident to the new vertex, as sorted vertex pairs.
    pub updated_edges: Vec<[u32; 2]>,
}

/// Master mesh and the binding used to drive a skin-mapped mesh.
#[derive(Debug, Clone)]
pub struct SkinSource {
    pub master: MeshHandle,
    pub map: TriangleSkinMap,
}

/// Render mesh whose vertices follow particles, a master mesh, or bones.
///
/// Vertex storage is allocated up to `vertex_capacity` so tearing can
/// duplicate vertices without reallocating; only the first `vertex_count`
/// entries are live.
#[derive(Debug, Clone)]
pub struct DeformableMesh {
    topology: MeshTopology,
    vertex_count: usize,
    vertex_capacity: usize,

    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    tangents: Vec<Vec4>,
    colors: Vec<Vec4>,
    uvs: [Vec<Vec2>; UV_CHANNELS],
    rest_positions: Vec<Vec3>,
    rest_normals: Vec<Vec3>,

    vertex_particles: Vec<Option<u32>>,
    world_to_local: Mat4,
    update_mode: MeshUpdateMode,
    force_skeletal_skinning: bool,

    bind_poses: Vec<Mat4>,
    bone_transforms: Vec<Mat4>,
    bone_weights: Vec<Vec<(u32, f32)>>,

    skin_source: Option<SkinSource>,
}

impl DeformableMesh {
    pub fn new(
        triangles: Vec<[u32; 3]>,
        positions: &[Vec3],
        vertex_capacity: usize,
    ) -> SolverResult<Self> {
        if triangles.is_empty() {
            return Err(SolverError::EmptyMesh);
        }
        let vertex_count = positions.len();
        if vertex_count > vertex_capacity {
            return Err(SolverError::CapacityExceeded {
                capacity: vertex_capacity,
            });
        }
        let topology = MeshTopology::new(triangles, vertex_count)?;

        let mut stored = vec![Vec3::ZERO; vertex_capacity];
        stored[..vertex_count].copy_from_slice(positions);
        let mut mesh = Self {
            topology,
            vertex_count,
            vertex_capacity,
            positions: stored.clone(),
            normals: vec![Vec3::Y; vertex_capacity],
            tangents: vec![Vec4::new(1.0, 0.0, 0.0, 1.0); vertex_capacity],
            colors: vec![Vec4::ONE; vertex_capacity],
            uvs: std::array::from_fn(|_| vec![Vec2::ZERO; vertex_capacity]),
            rest_positions: stored,
            rest_normals: vec![Vec3::Y; vertex_capacity],
            vertex_particles: vec![None; vertex_capacity],
            world_to_local: Mat4::IDENTITY,
            update_mode: MeshUpdateMode::default(),
            force_skeletal_skinning: false,
            bind_poses: Vec::new(),
            bone_transforms: Vec::new(),
            bone_weights: vec![Vec::new(); vertex_capacity],
            skin_source: None,
        };
        mesh.recalculate_normals();
        mesh.rest_normals.copy_from_slice(&mesh.normals);
        Ok(mesh)
    }

    pub fn topology(&self) -> &MeshTopology {
        &self.topology
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        self.topology.triangles()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn vertex_capacity(&self) -> usize {
        self.vertex_capacity
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions[..self.vertex_count]
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals[..self.vertex_count]
    }

    pub fn tangents(&self) -> &[Vec4] {
        &self.tangents[..self.vertex_count]
    }

    pub fn colors(&self) -> &[Vec4] {
        &self.colors[..self.vertex_count]
    }

    pub fn uvs(&self, channel: usize) -> Option<&[Vec2]> {
        self.uvs.get(channel).map(|uv| &uv[..self.vertex_count])
    }

    fn check_vertex_len(&self, len: usize) -> SolverResult<()> {
        if len == self.vertex_count {
            Ok(())
        } else {
            Err(SolverError::LengthMismatch {
                expected: self.vertex_count,
                actual: len,
            })
        }
    }

    pub fn set_positions(&mut self, positions: &[Vec3]) -> SolverResult<()> {
        self.check_vertex_len(positions.len())?;
        self.positions[..self.vertex_count].copy_from_slice(positions);
        Ok(())
    }

    pub fn set_normals(&mut self, normals: &[Vec3]) -> SolverResult<()> {
        self.check_vertex_len(normals.len())?;
        self.normals[..self.vertex_count].copy_from_slice(normals);
        Ok(())
    }

    pub fn set_tangents(&mut self, tangents: &[Vec4]) -> SolverResult<()> {
        self.check_vertex_len(tangents.len())?;
        self.tangents[..self.vertex_count].copy_from_slice(tangents);
        Ok(())
    }

    pub fn set_colors(&mut self, colors: &[Vec4]) -> SolverResult<()> {
        self.check_vertex_len(colors.len())?;
        self.colors[..self.vertex_count].copy_from_slice(colors);
        Ok(())
    }

    pub fn set_uvs(&mut self, channel: usize, uvs: &[Vec2]) -> SolverResult<()> {
        self.check_vertex_len(uvs.len())?;
        let count = self.vertex_count;
        let target = self.uvs.get_mut(channel).ok_or(SolverError::LengthMismatch {
            expected: UV_CHANNELS,
            actual: channel + 1,
        })?;
        target[..count].copy_from_slice(uvs);
        Ok(())
    }

    /// Captures the current positions and normals as the rest pose.
    pub fn set_rest_pose(&mut self) {
        let count = self.vertex_count;
        self.rest_positions[..count].copy_from_slice(&self.positions[..count]);
        self.rest_normals[..count].copy_from_slice(&self.normals[..count]);
    }

    /// Assigns the particle of each vertex. Entries past the live vertex count
    /// are reserved for vertices created by tearing.
    pub fn set_vertex_particles(&mut self, particles: &[Option<u32>]) -> SolverResult<()> {
        if particles.len() > self.vertex_capacity {
            return Err(SolverError::CapacityExceeded {
                capacity: self.vertex_capacity,
            });
        }
        self.vertex_particles[..particles.len()].copy_from_slice(particles);
        Ok(())
    }

    /// Particle of every vertex slot, reserved slots included.
    pub fn vertex_particles(&self) -> &[Option<u32>] {
        &self.vertex_particles
    }

    pub fn vertex_particle(&self, vertex: u32) -> Option<u32> {
        self.vertex_particles.get(vertex as usize).copied().flatten()
    }

    pub fn world_to_local(&self) -> Mat4 {
        self.world_to_local
    }

    pub fn set_world_to_local(&mut self, world_to_local: Mat4) {
        self.world_to_local = world_to_local;
    }

    pub fn update_mode(&self) -> MeshUpdateMode {
        self.update_mode
    }

    pub fn set_update_mode(&mut self, mode: MeshUpdateMode) {
        self.update_mode = mode;
    }

    pub fn set_force_skeletal_skinning(&mut self, force: bool) {
        self.force_skeletal_skinning = force;
    }

    pub fn force_skeletal_skinning(&self) -> bool {
        self.force_skeletal_skinning
    }

    pub fn set_bind_poses(&mut self, bind_poses: Vec<Mat4>) {
        self.bone_transforms = vec![Mat4::IDENTITY; bind_poses.len()];
        self.bind_poses = bind_poses;
    }

    pub fn set_bone_transforms(&mut self, transforms: &[Mat4]) -> SolverResult<()> {
        if transforms.len() != self.bind_poses.len() {
            return Err(SolverError::LengthMismatch {
                expected: self.bind_poses.len(),
                actual: transforms.len(),
            });
        }
        self.bone_transforms.copy_from_slice(transforms);
        Ok(())
    }

    /// Bone influences `(bone, weight)` of every live vertex.
    pub fn set_bone_weights(&mut self, weights: Vec<Vec<(u32, f32)>>) -> SolverResult<()> {
        self.check_vertex_len(weights.len())?;
        for (slot, influences) in self.bone_weights.iter_mut().zip(weights) {
            *slot = influences;
        }
        Ok(())
    }

    pub fn skin_source(&self) -> Option<&SkinSource> {
        self.skin_source.as_ref()
    }

    pub fn set_skin_source(&mut self, source: Option<SkinSource>) {
        self.skin_source = source;
    }

    pub fn surface(&self) -> SkinSurface<'_> {
        SkinSurface {
            positions: self.positions(),
            normals: self.normals(),
            tangents: self.tangents(),
            triangles: self.topology.triangles(),
        }
    }

    fn skinning_matrix(&self, vertex: usize) -> Option<Mat4> {
        let influences = &self.bone_weights[vertex];
        let mut total = 0.0;
        let mut matrix = Mat4::ZERO;
        for &(bone, weight) in influences {
            let bone = bone as usize;
            let (Some(transform), Some(bind)) = (self.bone_transforms.get(bone), self.bind_poses.get(bone))
            else {
                continue;
            };
            matrix += (*transform * *bind) * weight;
            total += weight;
        }
        (total > 0.0).then_some(matrix)
    }

    /// Rest position of `vertex` blended by its bones, in mesh-local space.
    pub fn skinned_position(&self, vertex: u32) -> Option<Vec3> {
        let v = vertex as usize;
        if v >= self.vertex_count {
            return None;
        }
        self.skinning_matrix(v)
            .map(|m| m.transform_point3(self.rest_positions[v]))
    }

    /// Recomputes live vertices from particles and bones.
    pub fn evaluate(&mut self, particles: &ParticleStore) {
        let mode = self.update_mode;
        for v in 0..self.vertex_count {
            let particle = self.vertex_particles[v]
                .map(|p| p as usize)
                .filter(|&p| p < particles.capacity());
            let skeletal = self.force_skeletal_skinning
                || particle.is_some_and(|p| particles.is_kinematic(p));
            if skeletal {
                if let Some(matrix) = self.skinning_matrix(v) {
                    self.positions[v] = matrix.transform_point3(self.rest_positions[v]);
                    self.normals[v] = matrix
                        .transform_vector3(self.rest_normals[v])
                        .normalize_or_zero();
                    continue;
                }
            }
            let Some(p) = particle else { continue };
            self.positions[v] = self
                .world_to_local
                .transform_point3(particles.renderable_positions[p]);
            if mode.normals == NormalUpdate::Skin {
                let rotation =
                    particles.renderable_orientations[p] * particles.rest_orientations[p].conjugate();
                self.normals[v] = self
                    .world_to_local
                    .transform_vector3(rotation * self.rest_normals[v])
                    .normalize_or_zero();
            }
        }

        if mode.normals == NormalUpdate::Recalculate {
            self.recalculate_normals();
        }
        if mode.update_tangents {
            self.orthogonalize_tangents();
        }
    }

    /// Rebuilds the mesh from its master through the skin map.
    pub fn evaluate_skinned(&mut self, master: &DeformableMesh) -> SolverResult<()> {
        let Some(source) = &self.skin_source else {
            return Ok(());
        };
        let count = self.vertex_count;
        source.map.evaluate(
            &master.surface(),
            &mut self.positions[..count],
            &mut self.normals[..count],
            &mut self.tangents[..count],
        )
    }

    /// Area-weighted vertex normals.
    pub fn recalculate_normals(&mut self) {
        let count = self.vertex_count;
        let normals = &mut self.normals[..count];
        normals.fill(Vec3::ZERO);
        for &[a, b, c] in self.topology.triangles() {
            let (a, b, c) = (a as usize, b as usize, c as usize);
            let weighted = (self.positions[b] - self.positions[a])
                .cross(self.positions[c] - self.positions[a]);
            normals[a] += weighted;
            normals[b] += weighted;
            normals[c] += weighted;
        }
        for n in normals.iter_mut() {
            *n = n.normalize_or_zero();
        }
    }

    fn orthogonalize_tangents(&mut self) {
        for v in 0..self.vertex_count {
            let n = self.normals[v];
            let t = self.tangents[v];
            let projected = t.truncate() - n * n.dot(t.truncate());
            if let Some(tangent) = projected.try_normalize() {
                self.tangents[v] = tangent.extend(t.w);
            }
        }
    }

    fn copy_vertex(&mut self, source: usize, target: usize) {
        self.positions[target] = self.positions[source];
        self.normals[target] = self.normals[source];
        self.tangents[target] = self.tangents[source];
        self.colors[target] = self.colors[source];
        for uv in &mut self.uvs {
            uv[target] = uv[source];
        }
        self.rest_positions[target] = self.rest_positions[source];
        self.rest_normals[target] = self.rest_normals[source];
        self.bone_weights[target] = self.bone_weights[source].clone();
    }

    /// Splits `vertex` along a plane: incident triangles whose centroid lies
    /// on the positive side move to a duplicate of the vertex.
    ///
    /// Returns `Ok(None)` when every incident triangle lies on one side. At
    /// capacity the mesh is left untouched and `CapacityExceeded` is returned.
    pub fn tear_at_vertex(
        &mut self,
        vertex: u32,
        plane_point: Vec3,
        plane_normal: Vec3,
    ) -> SolverResult<Option<TearResult>> {
        if vertex as usize >= self.vertex_count {
            return Err(SolverError::VertexOutOfRange {
                index: vertex as usize,
                count: self.vertex_count,
            });
        }

        let triangles = self.topology.triangles();
        let moved: Vec<u32> = self
            .topology
            .vertex_triangles(vertex)
            .iter()
            .copied()
            .filter(|&t| {
                let [a, b, c] = triangles[t as usize].map(|v| self.positions[v as usize]);
                ((a + b + c) / 3.0 - plane_point).dot(plane_normal) > 0.0
            })
            .collect();
        let incident = self.topology.vertex_triangles(vertex).len();
        if moved.is_empty() || moved.len() == incident {
            return Ok(None);
        }
        if self.vertex_count == self.vertex_capacity {
            return Err(SolverError::CapacityExceeded {
                capacity: self.vertex_capacity,
            });
        }

        let (new_vertex, edges) = self.topology.split_vertex(vertex, &moved)?;
        self.copy_vertex(vertex as usize, new_vertex as usize);
        self.vertex_count += 1;

        let updated_edges = edges
            .iter()
            .map(|&e| self.topology.edges()[e].vertices)
            .collect();
        debug!(
            "tore mesh vertex {vertex} into {new_vertex}, {} triangles moved",
            moved.len()
        );
        Ok(Some(TearResult {
            original_vertex: vertex,
            new_vertex,
            updated_edges,
        }))
    }
}
