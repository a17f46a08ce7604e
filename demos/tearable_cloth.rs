//! A hanging sheet pulled at its bottom edge until it tears.
//!
//! Every mesh vertex owns the particle with the same index, and the vertex
//! slots beyond the initial count reserve the particles tearing hands out.

use particle_loom::dynamics::constraints::DistanceConstraints;
use particle_loom::mesh::TearResult;
use particle_loom::*;

const SIZE: u32 = 12;
const SPACING: f32 = 0.1;
const FRAME_DT: f32 = 1.0 / 60.0;
const SUBSTEPS: u32 = 4;
const TEAR_FORCE: f32 = 2500.0;
const PULL: f32 = 60.0;

fn sheet() -> (Vec<Vec3>, Vec<[u32; 3]>) {
    let index = |x: u32, y: u32| y * SIZE + x;
    let mut positions = Vec::new();
    for y in 0..SIZE {
        for x in 0..SIZE {
            positions.push(Vec3::new(x as f32 * SPACING, -(y as f32) * SPACING, 0.0));
        }
    }
    let mut triangles = Vec::new();
    for y in 0..SIZE - 1 {
        for x in 0..SIZE - 1 {
            let (a, b) = (index(x, y), index(x + 1, y));
            let (c, d) = (index(x, y + 1), index(x + 1, y + 1));
            triangles.push([a, c, b]);
            triangles.push([b, c, d]);
        }
    }
    (positions, triangles)
}

fn constraint_between(constraints: &DistanceConstraints, a: u32, b: u32) -> Option<usize> {
    constraints
        .particles
        .iter()
        .position(|&[p, q]| (p, q) == (a, b) || (p, q) == (b, a))
}

/// Moves the constraints of edges that followed the new vertex onto its particle.
///
/// Neighbours in `shared` still connect to the original vertex as well; their
/// constraint stays and a copy is added for the new side.
fn remap_constraints(constraints: &mut DistanceConstraints, tear: &TearResult, shared: &[u32]) {
    let (original, split) = (tear.original_vertex, tear.new_vertex);
    for &[a, b] in &tear.updated_edges {
        let other = if a == split { b } else { a };
        let Some(index) = constraint_between(constraints, other, original) else {
            continue;
        };
        if shared.contains(&other) {
            let rest = constraints.rest_lengths[index];
            let stiffness = constraints.stretch_stiffnesses[index];
            constraints.add(other, split, rest, stiffness);
        } else {
            constraints.particles[index] = [other, split];
        }
    }
}

fn main() -> Result<(), SolverError> {
    let (positions, triangles) = sheet();
    let vertex_count = positions.len();
    let capacity = vertex_count * 2;

    let context = SimulationContext::new(None)?;
    let mut solver = Solver::new(context, capacity, SolverParameters::default());
    {
        let particles = solver.particles_mut();
        for (i, p) in positions.iter().enumerate() {
            particles.positions[i] = *p;
            particles.inv_masses[i] = if i < SIZE as usize { 0.0 } else { 1.0 };
            particles.principal_radii[i] = Vec3::splat(SPACING * 0.4);
        }
    }
    let active: Vec<u32> = (0..vertex_count as u32).collect();
    solver.set_active_particles(&active)?;

    let mut mesh = DeformableMesh::new(triangles, &positions, capacity)?;
    let vertex_particles: Vec<Option<u32>> = (0..capacity as u32).map(Some).collect();
    mesh.set_vertex_particles(&vertex_particles)?;

    let mut constraints = DistanceConstraints::new();
    for edge in mesh.topology().edges() {
        let [a, b] = edge.vertices;
        constraints.add(a, b, positions[a as usize].distance(positions[b as usize]), 1.0);
    }
    let mesh = solver.add_deformable_mesh(mesh)?;
    let batch = solver.add_batch(ConstraintBatch::new(constraints));
    solver.cook_batch(batch)?;

    let world = CollisionWorld::new();
    let substep_dt = FRAME_DT / SUBSTEPS as f32;
    let bottom_row = (SIZE * (SIZE - 1))..(SIZE * SIZE);
    let mut tears = 0;

    for frame in 0..600 {
        for i in bottom_row.clone() {
            solver.particles_mut().external_forces[i as usize] = Vec3::new(0.0, -PULL, 0.0);
        }
        solver.add_simulation_time(FRAME_DT);
        solver.update(&world, SUBSTEPS, substep_dt)?;
        solver.apply_position_interpolation(substep_dt);
        solver.update_deformable_meshes()?;

        let Some(cooked) = solver.batch(batch) else {
            break;
        };
        let forces = cooked.constraint_forces(substep_dt);
        let Some((strained, force)) = forces
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        else {
            continue;
        };
        if force.abs() < TEAR_FORCE {
            continue;
        }
        let Some([a, b]) = cooked
            .get::<DistanceConstraints>()
            .map(|set| set.particles[strained])
        else {
            continue;
        };

        let particles = solver.particles();
        let (pa, pb) = (particles.positions[a as usize], particles.positions[b as usize]);
        let tear = match solver.tear_deformable_mesh(mesh, a, pa, (pb - pa).normalize_or_zero()) {
            Ok(Some(tear)) => tear,
            Ok(None) => continue,
            Err(SolverError::CapacityExceeded { .. }) => {
                println!("frame {frame}: no vertex slots left");
                break;
            }
            Err(err) => return Err(err),
        };
        tears += 1;

        let shared: Vec<u32> = match solver.deformable_mesh(mesh) {
            Some(torn) => tear
                .updated_edges
                .iter()
                .map(|&[a, b]| if a == tear.new_vertex { b } else { a })
                .filter(|&other| torn.topology().edge(other, tear.original_vertex).is_some())
                .collect(),
            None => break,
        };
        if let Some(set) = solver
            .batch_mut(batch)
            .and_then(|batch| batch.get_mut::<DistanceConstraints>())
        {
            remap_constraints(set, &tear, &shared);
        }
        solver.cook_batch(batch)?;
        println!(
            "frame {frame}: tore vertex {} into {} ({force:.0})",
            tear.original_vertex, tear.new_vertex
        );
    }

    println!("{tears} tears, {} active particles", solver.active_particles().len());
    Ok(())
}
