//! Edge/triangle connectivity that supports local vertex splitting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

/// Undirected edge and the triangles sharing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Endpoints, smallest first.
    pub vertices: [u32; 2],
    pub triangles: Vec<u32>,
}

fn edge_key(a: u32, b: u32) -> [u32; 2] {
    if a < b {
        [a, b]
    } else {
        [b, a]
    }
}

/// Triangle list plus edge and vertex adjacency, indexed by dense ids.
///
/// Splitting a vertex only touches the edges and triangles around it; ids of
/// unrelated edges and triangles never change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshTopology {
    triangles: Vec<[u32; 3]>,
    edges: Vec<Edge>,
    edge_lookup: HashMap<[u32; 2], usize>,
    vertex_triangles: Vec<Vec<u32>>,
}

impl MeshTopology {
    pub fn new(triangles: Vec<[u32; 3]>, vertex_count: usize) -> SolverResult<Self> {
        if let Some(&index) = triangles.iter().flatten().find(|&&v| v as usize >= vertex_count) {
            return Err(SolverError::VertexOutOfRange {
                index: index as usize,
                count: vertex_count,
            });
        }

        let mut topology = Self {
            triangles: Vec::with_capacity(triangles.len()),
            edges: Vec::new(),
            edge_lookup: HashMap::new(),
            vertex_triangles: vec![Vec::new(); vertex_count],
        };
        for triangle in triangles {
            let id = topology.triangles.len() as u32;
            topology.triangles.push(triangle);
            for (a, b) in Self::triangle_edges(triangle) {
                topology.edge_mut(a, b).triangles.push(id);
            }
            for v in triangle {
                topology.vertex_triangles[v as usize].push(id);
            }
        }
        Ok(topology)
    }

    fn triangle_edges([a, b, c]: [u32; 3]) -> [(u32, u32); 3] {
        [(a, b), (b, c), (c, a)]
    }

    fn edge_mut(&mut self, a: u32, b: u32) -> &mut Edge {
        let key = edge_key(a, b);
        let index = match self.edge_lookup.get(&key) {
            Some(&index) => index,
            None => {
                self.edges.push(Edge {
                    vertices: key,
                    triangles: Vec::new(),
                });
                self.edge_lookup.insert(key, self.edges.len() - 1);
                self.edges.len() - 1
            }
        };
        &mut self.edges[index]
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, a: u32, b: u32) -> Option<&Edge> {
        self.edge_lookup.get(&edge_key(a, b)).map(|&i| &self.edges[i])
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_triangles.len()
    }

    /// Triangles incident to `vertex`.
    pub fn vertex_triangles(&self, vertex: u32) -> &[u32] {
        self.vertex_triangles
            .get(vertex as usize)
            .map_or(&[], Vec::as_slice)
    }

    /// Vertices sharing an edge with `vertex`.
    pub fn neighbors(&self, vertex: u32) -> Vec<u32> {
        let mut neighbors: Vec<u32> = self
            .vertex_triangles(vertex)
            .iter()
            .flat_map(|&t| self.triangles[t as usize])
            .filter(|&v| v != vertex)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
    }

    /// Every edge references live triangles that contain it, and no edge has more than two triangles.
    pub fn is_manifold(&self) -> bool {
        self.edges.iter().all(|edge| {
            edge.triangles.len() <= 2
                && edge.triangles.iter().all(|&t| {
                    let triangle = self.triangles[t as usize];
                    edge.vertices.iter().all(|v| triangle.contains(v))
                })
        })
    }

    /// Detaches `moved` triangles from `vertex` onto a new vertex.
    ///
    /// Edges whose triangles all moved are re-keyed to the new vertex; edges
    /// with triangles on both sides are split in two. Returns the new vertex
    /// and the ids of every edge incident to it.
    pub fn split_vertex(&mut self, vertex: u32, moved: &[u32]) -> SolverResult<(u32, Vec<usize>)> {
        if vertex as usize >= self.vertex_count() {
            return Err(SolverError::VertexOutOfRange {
                index: vertex as usize,
                count: self.vertex_count(),
            });
        }
        let new_vertex = self.vertex_triangles.len() as u32;
        self.vertex_triangles.push(Vec::new());

        // Edges around the vertex, collected before any triangle changes.
        let neighbors = self.neighbors(vertex);

        for &t in moved {
            let triangle = &mut self.triangles[t as usize];
            for v in triangle.iter_mut() {
                if *v == vertex {
                    *v = new_vertex;
                }
            }
        }
        self.vertex_triangles[vertex as usize].retain(|t| !moved.contains(t));
        self.vertex_triangles[new_vertex as usize] = moved.to_vec();

        let mut updated = Vec::new();
        for other in neighbors {
            let Some(&index) = self.edge_lookup.get(&edge_key(vertex, other)) else {
                continue;
            };
            let (moving, staying): (Vec<u32>, Vec<u32>) = self.edges[index]
                .triangles
                .iter()
                .partition(|&&t| moved.contains(&t));
            if moving.is_empty() {
                continue;
            }

            if staying.is_empty() {
                self.edge_lookup.remove(&edge_key(vertex, other));
                let key = edge_key(new_vertex, other);
                self.edges[index].vertices = key;
                self.edge_lookup.insert(key, index);
                updated.push(index);
            } else {
                self.edges[index].triangles = staying;
                let key = edge_key(new_vertex, other);
                self.edges.push(Edge {
                    vertices: key,
                    triangles: moving,
                });
                self.edge_lookup.insert(key, self.edges.len() - 1);
                updated.push(self.edges.len() - 1);
            }
        }
        Ok((new_vertex, updated))
    }
}
