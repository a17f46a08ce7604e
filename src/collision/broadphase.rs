use std::collections::HashMap;

use glam::Vec3;

use crate::core::{mesh::Aabb, particles::ParticleStore};

pub type CellCoord = (i32, i32, i32);

/// Uniform hash grid over active particle centers.
///
/// Cells are at least as wide as the largest particle diameter plus the
/// collision margin, so any pair that can touch lives in neighbouring cells.
#[derive(Debug, Clone)]
pub struct ParticleGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, Vec<u32>>,
}

impl Default for ParticleGrid {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ParticleGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(1e-4),
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn world_to_grid(&self, pos: Vec3) -> CellCoord {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        )
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn insert(&mut self, particle: u32, position: Vec3) {
        let cell = self.world_to_grid(position);
        self.cells.entry(cell).or_default().push(particle);
    }

    /// Re-bins every active particle, resizing cells from the current radii.
    pub fn rebuild(&mut self, particles: &ParticleStore, margin: f32) {
        self.cell_size = (2.0 * particles.max_active_radius() + margin).max(1e-4);
        self.cells.clear();
        for &index in particles.active() {
            self.insert(index, particles.positions[index as usize]);
        }
    }

    /// Appends every particle whose cell overlaps `bounds`.
    pub fn query_aabb(&self, bounds: &Aabb, out: &mut Vec<u32>) {
        // Particles are binned by center; half a cell covers their radius.
        let pad = Vec3::splat(self.cell_size * 0.5);
        let min = self.world_to_grid(bounds.min - pad);
        let max = self.world_to_grid(bounds.max + pad);

        // Coordinates saturate at the i32 range, so extents are taken in i64.
        let extent = |lo: i32, hi: i32| i64::from(hi) - i64::from(lo) + 1;
        let span = extent(min.0, max.0)
            .saturating_mul(extent(min.1, max.1))
            .saturating_mul(extent(min.2, max.2));
        if span > self.cells.len() as i64 {
            // Large query: walk the occupied cells instead of the covered range.
            for (cell, particles) in &self.cells {
                if (min.0..=max.0).contains(&cell.0)
                    && (min.1..=max.1).contains(&cell.1)
                    && (min.2..=max.2).contains(&cell.2)
                {
                    out.extend_from_slice(particles);
                }
            }
            return;
        }

        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    if let Some(particles) = self.cells.get(&(x, y, z)) {
                        out.extend_from_slice(particles);
                    }
                }
            }
        }
    }

    /// Calls `visit` for every particle in the 27 cells around `position`.
    pub fn for_each_neighbor(&self, position: Vec3, mut visit: impl FnMut(u32)) {
        let (cx, cy, cz) = self.world_to_grid(position);
        for x in cx.saturating_sub(1)..=cx.saturating_add(1) {
            for y in cy.saturating_sub(1)..=cy.saturating_add(1) {
                for z in cz.saturating_sub(1)..=cz.saturating_add(1) {
                    if let Some(particles) = self.cells.get(&(x, y, z)) {
                        particles.iter().copied().for_each(&mut visit);
                    }
                }
            }
        }
    }

    /// Snapshot of occupied cells, sorted by coordinate.
    pub fn cells(&self) -> Vec<(CellCoord, Vec<u32>)> {
        let mut cells: Vec<_> = self
            .cells
            .iter()
            .map(|(cell, particles)| (*cell, particles.clone()))
            .collect();
        cells.sort_unstable_by_key(|(cell, _)| *cell);
        cells
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(positions: &[Vec3], radius: f32) -> ParticleStore {
        let mut store = ParticleStore::new(positions.len());
        for (i, p) in positions.iter().enumerate() {
            store.positions[i] = *p;
            store.principal_radii[i] = Vec3::splat(radius);
        }
        let active: Vec<u32> = (0..positions.len() as u32).collect();
        store.set_active(&active).expect("in range");
        store
    }

    #[test]
    fn cell_size_tracks_largest_radius() {
        let store = store_with(&[Vec3::ZERO, Vec3::X], 0.25);
        let mut grid = ParticleGrid::default();
        grid.rebuild(&store, 0.1);
        assert!((grid.cell_size() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn neighbours_include_adjacent_cells_only() {
        let store = store_with(
            &[Vec3::ZERO, Vec3::new(0.15, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0)],
            0.05,
        );
        let mut grid = ParticleGrid::default();
        grid.rebuild(&store, 0.0);

        let mut found = Vec::new();
        grid.for_each_neighbor(Vec3::ZERO, |p| found.push(p));
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
    }

    #[test]
    fn aabb_query_finds_particles_within_bounds() {
        let store = store_with(&[Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)], 0.1);
        let mut grid = ParticleGrid::default();
        grid.rebuild(&store, 0.0);

        let mut hits = Vec::new();
        grid.query_aabb(&Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)), &mut hits);
        assert_eq!(hits, vec![0]);

        hits.clear();
        grid.query_aabb(&Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)), &mut hits);
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn huge_query_bounds_saturate_instead_of_overflowing() {
        let store = store_with(&[Vec3::ZERO], 0.01);
        let mut grid = ParticleGrid::default();
        grid.rebuild(&store, 0.0);

        let mut hits = Vec::new();
        grid.query_aabb(&Aabb::new(Vec3::splat(-1.0e9), Vec3::splat(1.0e9)), &mut hits);
        assert_eq!(hits, vec![0]);

        let mut found = Vec::new();
        grid.for_each_neighbor(Vec3::splat(1.0e12), |p| found.push(p));
        assert!(found.is_empty());
    }
}
