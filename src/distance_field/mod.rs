//! Sparse octree approximation of a triangle mesh's signed distance.
//!
//! A field is built cooperatively: `start_building` seeds the root cell and
//! every `continue_building` call refines a bounded number of cells, so the
//! caller decides how much time each frame spends on it. Sampling is only
//! allowed once the field reports [`DistanceFieldState::Built`].

mod builder;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_DISTANCE_FIELD_NODES_PER_STEP,
    core::mesh::Aabb,
    error::{SolverError, SolverResult},
};

use builder::Builder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceFieldState {
    #[default]
    Uninitialized,
    Building,
    Built,
}

/// Cubic octree cell storing the signed distance at its eight corners.
///
/// Corner `i` sits at `center + half_size * (±1, ±1, ±1)` with bit 0 of `i`
/// selecting +x, bit 1 +y and bit 2 +z. Children use the same ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceFieldNode {
    pub center: Vec3,
    pub half_size: f32,
    pub distances: [f32; 8],
    /// Index of the first of eight consecutive children, `-1` for leaves.
    pub first_child: i32,
}

impl DistanceFieldNode {
    pub fn leaf(center: Vec3, half_size: f32, distances: [f32; 8]) -> Self {
        Self {
            center,
            half_size,
            distances,
            first_child: -1,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.first_child < 0
    }

    pub fn min_distance(&self) -> f32 {
        self.distances.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_distance(&self) -> f32 {
        self.distances.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_center_half_extents(self.center, Vec3::splat(self.half_size))
    }

    pub fn corner(&self, index: usize) -> Vec3 {
        self.center + corner_sign(index) * self.half_size
    }

    /// Octant of `point` relative to the cell center.
    pub fn octant(&self, point: Vec3) -> usize {
        usize::from(point.x >= self.center.x)
            | usize::from(point.y >= self.center.y) << 1
            | usize::from(point.z >= self.center.z) << 2
    }

    /// Trilinear interpolation of the corner distances, clamped to the cell.
    pub fn interpolate(&self, point: Vec3) -> f32 {
        let size = (self.half_size * 2.0).max(f32::MIN_POSITIVE);
        let t = ((point - (self.center - Vec3::splat(self.half_size))) / size)
            .clamp(Vec3::ZERO, Vec3::ONE);
        let d = &self.distances;
        let x00 = d[0] + (d[1] - d[0]) * t.x;
        let x10 = d[2] + (d[3] - d[2]) * t.x;
        let x01 = d[4] + (d[5] - d[4]) * t.x;
        let x11 = d[6] + (d[7] - d[6]) * t.x;
        let y0 = x00 + (x10 - x00) * t.y;
        let y1 = x01 + (x11 - x01) * t.y;
        y0 + (y1 - y0) * t.z
    }
}

pub(crate) fn corner_sign(index: usize) -> Vec3 {
    Vec3::new(
        if index & 1 != 0 { 1.0 } else { -1.0 },
        if index & 2 != 0 { 1.0 } else { -1.0 },
        if index & 4 != 0 { 1.0 } else { -1.0 },
    )
}

/// Signed distance field of a mesh, stored as a sparse octree.
#[derive(Debug, Clone)]
pub struct DistanceField {
    nodes: Vec<DistanceFieldNode>,
    state: DistanceFieldState,
    builder: Option<Builder>,
    nodes_per_step: usize,
    max_error: f32,
    max_depth: u32,
}

impl Default for DistanceField {
    fn default() -> Self {
        Self::new()
    }
}

impl DistanceField {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            state: DistanceFieldState::Uninitialized,
            builder: None,
            nodes_per_step: DEFAULT_DISTANCE_FIELD_NODES_PER_STEP,
            max_error: 0.0,
            max_depth: 0,
        }
    }

    pub fn state(&self) -> DistanceFieldState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == DistanceFieldState::Built
    }

    pub fn max_error(&self) -> f32 {
        self.max_error
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Cells refined per `continue_building` call.
    pub fn set_nodes_per_step(&mut self, nodes_per_step: usize) {
        self.nodes_per_step = nodes_per_step.max(1);
    }

    /// Discards any previous field and seeds the root cell for `vertices`/`triangles`.
    pub fn start_building(
        &mut self,
        max_error: f32,
        max_depth: u32,
        vertices: &[Vec3],
        triangles: &[[u32; 3]],
    ) -> SolverResult<()> {
        let (builder, root) = Builder::new(max_error, max_depth, vertices, triangles)?;
        self.nodes.clear();
        self.nodes.push(root);
        self.builder = Some(builder);
        self.state = DistanceFieldState::Building;
        self.max_error = max_error;
        self.max_depth = max_depth;
        log::debug!(
            "distance field build started: {} triangles, max error {max_error}, max depth {max_depth}",
            triangles.len()
        );
        Ok(())
    }

    /// Refines up to `nodes_per_step` cells. Returns `Ok(true)` while work remains.
    pub fn continue_building(&mut self) -> SolverResult<bool> {
        match self.state {
            DistanceFieldState::Built => return Ok(false),
            DistanceFieldState::Uninitialized => return Err(SolverError::DistanceFieldNotBuilding),
            DistanceFieldState::Building => {}
        }
        let Some(builder) = self.builder.as_mut() else {
            return Err(SolverError::DistanceFieldNotBuilding);
        };
        if builder.step(&mut self.nodes, self.nodes_per_step) {
            return Ok(true);
        }
        self.builder = None;
        self.state = DistanceFieldState::Built;
        log::debug!("distance field built with {} nodes", self.nodes.len());
        Ok(false)
    }

    /// Runs the builder to completion.
    pub fn build(
        &mut self,
        max_error: f32,
        max_depth: u32,
        vertices: &[Vec3],
        triangles: &[[u32; 3]],
    ) -> SolverResult<()> {
        self.start_building(max_error, max_depth, vertices, triangles)?;
        while self.continue_building()? {}
        Ok(())
    }

    pub fn nodes(&self) -> &[DistanceFieldNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Imports a prebuilt node array. Nodes are trusted as given; child links
    /// that fall outside the array are treated as leaves when sampling.
    pub fn set_nodes(&mut self, nodes: Vec<DistanceFieldNode>) {
        self.builder = None;
        self.state = if nodes.is_empty() {
            DistanceFieldState::Uninitialized
        } else {
            DistanceFieldState::Built
        };
        self.nodes = nodes;
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.nodes.first().map(DistanceFieldNode::bounds)
    }

    /// Signed distance at `point`, negative inside.
    pub fn sample(&self, point: Vec3) -> SolverResult<f32> {
        let root = self.built_root()?;
        let bounds = root.bounds();
        let clamped = bounds.clamp(point);
        let outside = point.distance(clamped);
        Ok(self.descend(clamped).interpolate(clamped) + outside)
    }

    /// Signed distance plus the outward normal from central differences.
    pub fn sample_with_normal(&self, point: Vec3) -> SolverResult<(f32, Vec3)> {
        let root = self.built_root()?;
        let h = (root.half_size * 1.0e-3).max(1.0e-5);
        let distance = self.sample(point)?;
        let gradient = Vec3::new(
            self.sample(point + Vec3::X * h)? - self.sample(point - Vec3::X * h)?,
            self.sample(point + Vec3::Y * h)? - self.sample(point - Vec3::Y * h)?,
            self.sample(point + Vec3::Z * h)? - self.sample(point - Vec3::Z * h)?,
        );
        Ok((distance, gradient.normalize_or_zero()))
    }

    fn built_root(&self) -> SolverResult<&DistanceFieldNode> {
        if self.state != DistanceFieldState::Built {
            return Err(SolverError::DistanceFieldNotBuilt);
        }
        self.nodes.first().ok_or(SolverError::DistanceFieldNotBuilt)
    }

    fn descend(&self, point: Vec3) -> &DistanceFieldNode {
        let mut node = &self.nodes[0];
        // Bounded by the node count so a cyclic import cannot loop forever.
        for _ in 0..self.nodes.len() {
            let Ok(first) = usize::try_from(node.first_child) else {
                break;
            };
            if first + 8 > self.nodes.len() {
                break;
            }
            node = &self.nodes[first + node.octant(point)];
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let v = |x: f32, y: f32, z: f32| Vec3::new(x, y, z) - Vec3::splat(0.5);
        (
            vec![
                v(0.0, 0.0, 0.0),
                v(1.0, 0.0, 0.0),
                v(1.0, 1.0, 0.0),
                v(0.0, 1.0, 0.0),
                v(0.0, 0.0, 1.0),
                v(1.0, 0.0, 1.0),
                v(1.0, 1.0, 1.0),
                v(0.0, 1.0, 1.0),
            ],
            vec![
                [0, 2, 1],
                [0, 3, 2],
                [4, 5, 6],
                [4, 6, 7],
                [0, 1, 5],
                [0, 5, 4],
                [3, 6, 2],
                [3, 7, 6],
                [0, 4, 7],
                [0, 7, 3],
                [1, 2, 6],
                [1, 6, 5],
            ],
        )
    }

    #[test]
    fn sampling_requires_built_state() {
        let mut field = DistanceField::new();
        assert_eq!(field.sample(Vec3::ZERO), Err(SolverError::DistanceFieldNotBuilt));
        assert_eq!(field.continue_building(), Err(SolverError::DistanceFieldNotBuilding));

        let (vertices, triangles) = cube();
        field
            .start_building(0.01, 3, &vertices, &triangles)
            .expect("valid mesh");
        assert_eq!(field.sample(Vec3::ZERO), Err(SolverError::DistanceFieldNotBuilt));
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let mut field = DistanceField::new();
        assert_eq!(
            field.start_building(0.01, 3, &[Vec3::ZERO], &[]),
            Err(SolverError::EmptyMesh)
        );
        assert_eq!(field.state(), DistanceFieldState::Uninitialized);
    }

    #[test]
    fn root_is_padded_mesh_bounds() {
        let mut field = DistanceField::new();
        let (vertices, triangles) = cube();
        field
            .start_building(0.01, 2, &vertices, &triangles)
            .expect("valid mesh");
        let root = field.nodes()[0];
        assert!((root.half_size - 0.6).abs() < 1e-5);
        assert!(root.min_distance() > 0.0);
    }

    #[test]
    fn interpolation_reproduces_linear_fields() {
        // d(p) = p.x, exactly representable by trilinear corners.
        let mut distances = [0.0; 8];
        for (i, d) in distances.iter_mut().enumerate() {
            *d = corner_sign(i).x;
        }
        let node = DistanceFieldNode::leaf(Vec3::ZERO, 1.0, distances);
        assert!((node.interpolate(Vec3::new(0.25, -0.7, 0.1)) - 0.25).abs() < 1e-6);
        assert_eq!(node.octant(Vec3::new(0.1, -0.1, 0.1)), 0b101);
    }

    #[test]
    fn imported_nodes_with_bad_children_act_as_leaves() {
        let mut node = DistanceFieldNode::leaf(Vec3::ZERO, 1.0, [1.0; 8]);
        node.first_child = 40;
        let mut field = DistanceField::new();
        field.set_nodes(vec![node]);
        assert!(field.is_built());
        assert!((field.sample(Vec3::ZERO).expect("built") - 1.0).abs() < 1e-6);
        // Outside the root the clamp distance is added.
        assert!((field.sample(Vec3::new(3.0, 0.0, 0.0)).expect("built") - 3.0).abs() < 1e-6);
    }
}
