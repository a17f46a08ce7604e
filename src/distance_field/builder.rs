use std::collections::VecDeque;

use glam::Vec3;

use super::{corner_sign, DistanceFieldNode};
use crate::{
    config::DISTANCE_FIELD_BOUNDS_PADDING,
    core::mesh::TriangleMesh,
    error::{SolverError, SolverResult},
};

/// Samples per axis of the grid a cell's interpolation is checked on.
const CHECK_SAMPLES: usize = 5;

/// Fraction of `max_error` a cell must stay under on its check grid to become
/// a leaf. The margin covers the error between check samples.
const ERROR_SAFETY: f32 = 0.5;

/// Pending refinement work for a field under construction.
#[derive(Debug, Clone)]
pub(super) struct Builder {
    mesh: TriangleMesh,
    max_error: f32,
    max_depth: u32,
    queue: VecDeque<(usize, u32)>,
}

impl Builder {
    pub(super) fn new(
        max_error: f32,
        max_depth: u32,
        vertices: &[Vec3],
        triangles: &[[u32; 3]],
    ) -> SolverResult<(Self, DistanceFieldNode)> {
        let mesh = TriangleMesh::builder(vertices.to_vec(), triangles.to_vec())
            .remove_degenerate()
            .build();
        if mesh.indices.is_empty() {
            return Err(SolverError::EmptyMesh);
        }

        let bounds = mesh.bounds;
        let half_size = bounds.extent().max_element().max(1e-4) * (1.0 + DISTANCE_FIELD_BOUNDS_PADDING);
        let center = bounds.center();
        let mut distances = [0.0; 8];
        for (i, d) in distances.iter_mut().enumerate() {
            *d = mesh.signed_distance(center + corner_sign(i) * half_size);
        }

        let builder = Self {
            mesh,
            max_error: max_error.max(0.0),
            max_depth,
            queue: VecDeque::from([(0, 0)]),
        };
        Ok((builder, DistanceFieldNode::leaf(center, half_size, distances)))
    }

    /// Processes up to `budget` queued cells. Returns whether work remains.
    pub(super) fn step(&mut self, nodes: &mut Vec<DistanceFieldNode>, budget: usize) -> bool {
        for _ in 0..budget {
            let Some((index, depth)) = self.queue.pop_front() else {
                break;
            };
            self.refine(nodes, index, depth);
        }
        !self.queue.is_empty()
    }

    fn refine(&mut self, nodes: &mut Vec<DistanceFieldNode>, index: usize, depth: u32) {
        if depth >= self.max_depth {
            return;
        }
        let node = nodes[index];
        let lattice = self.evaluate_lattice(&node);
        if self.interpolation_error(&node, &lattice) <= self.max_error * ERROR_SAFETY {
            return;
        }

        let first_child = nodes.len();
        let child_half = node.half_size * 0.5;
        for child in 0..8 {
            let offset = [child & 1, (child >> 1) & 1, (child >> 2) & 1];
            let mut distances = [0.0; 8];
            for (corner, d) in distances.iter_mut().enumerate() {
                let i = offset[0] + (corner & 1);
                let j = offset[1] + ((corner >> 1) & 1);
                let k = offset[2] + ((corner >> 2) & 1);
                *d = lattice[lattice_index(i, j, k)];
            }
            let center = node.center + corner_sign(child) * child_half;
            nodes.push(DistanceFieldNode::leaf(center, child_half, distances));
            self.queue.push_back((first_child + child, depth + 1));
        }
        nodes[index].first_child = first_child as i32;
    }

    /// Largest deviation of the cell's trilinear interpolation from the exact
    /// distance over a 5x5x5 grid spanning the cell. Even grid samples are
    /// the lattice points and reuse their distances.
    fn interpolation_error(&self, node: &DistanceFieldNode, lattice: &[f32; 27]) -> f32 {
        const N: usize = CHECK_SAMPLES;
        let min = node.center - Vec3::splat(node.half_size);
        let step = node.half_size * 2.0 / (N - 1) as f32;
        let mut error = 0.0_f32;
        for n in 0..N * N * N {
            let (i, j, k) = (n % N, (n / N) % N, n / (N * N));
            let point = min + Vec3::new(i as f32, j as f32, k as f32) * step;
            let exact = if i % 2 == 0 && j % 2 == 0 && k % 2 == 0 {
                lattice[lattice_index(i / 2, j / 2, k / 2)]
            } else {
                self.mesh.signed_distance(point)
            };
            error = error.max((node.interpolate(point) - exact).abs());
        }
        error
    }

    /// Exact distances on the 3x3x3 lattice of a cell, reusing its corners.
    fn evaluate_lattice(&self, node: &DistanceFieldNode) -> [f32; 27] {
        let mut lattice = [f32::NAN; 27];
        for corner in 0..8 {
            let i = (corner & 1) * 2;
            let j = ((corner >> 1) & 1) * 2;
            let k = ((corner >> 2) & 1) * 2;
            lattice[lattice_index(i, j, k)] = node.distances[corner];
        }
        for (slot, point) in lattice.iter_mut().zip(lattice_points(node)) {
            if slot.is_nan() {
                *slot = self.mesh.signed_distance(point);
            }
        }
        lattice
    }
}

fn lattice_index(i: usize, j: usize, k: usize) -> usize {
    i + j * 3 + k * 9
}

fn lattice_points(node: &DistanceFieldNode) -> impl Iterator<Item = Vec3> + '_ {
    let min = node.center - Vec3::splat(node.half_size);
    (0..27).map(move |n| {
        let (i, j, k) = (n % 3, (n / 3) % 3, n / 9);
        min + Vec3::new(i as f32, j as f32, k as f32) * node.half_size
    })
}
