use std::collections::HashSet;

use approx::assert_abs_diff_eq;
use particle_loom::{
    DeformableMesh, SimulationContext, Solver, SolverError, SolverParameters, Vec3,
};

/// Four triangles fanned around vertex 0 in the XZ plane, facing +Y.
fn fan(capacity: usize) -> DeformableMesh {
    let positions = [
        Vec3::ZERO,
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, -1.0),
    ];
    DeformableMesh::new(vec![[0, 2, 1], [0, 3, 2], [0, 4, 3], [0, 1, 4]], &positions, capacity)
        .expect("valid mesh")
}

#[test]
fn tear_splits_a_vertex_between_two_triangle_pairs() {
    let mut mesh = fan(6);
    let triangles_before = mesh.topology().triangle_count();
    let edges_before = mesh.topology().edges().len();

    let result = mesh
        .tear_at_vertex(0, Vec3::ZERO, Vec3::Z)
        .expect("vertex in range")
        .expect("triangles on both sides");

    assert_eq!(result.original_vertex, 0);
    assert_eq!(result.new_vertex, 5);
    assert_eq!(mesh.vertex_count(), 6);
    assert_eq!(mesh.topology().triangle_count(), triangles_before);
    // Edges to vertices 1 and 3 were shared across the cut and are now doubled.
    assert_eq!(mesh.topology().edges().len(), edges_before + 2);
    assert!(mesh.topology().is_manifold());

    let updated: HashSet<[u32; 2]> = result.updated_edges.iter().copied().collect();
    let expected: HashSet<[u32; 2]> = [[1, 5], [2, 5], [3, 5]].into_iter().collect();
    assert_eq!(updated, expected);

    // The +Z triangles now reference the new vertex, the others the original.
    for &t in mesh.topology().vertex_triangles(5) {
        let [a, b, c] = mesh.triangles()[t as usize].map(|v| mesh.positions()[v as usize]);
        assert!((a + b + c).z > 0.0);
    }
    assert_eq!(mesh.topology().vertex_triangles(0).len(), 2);
}

#[test]
fn tear_at_capacity_leaves_the_mesh_untouched() {
    let mut mesh = fan(5);
    let triangles = mesh.triangles().to_vec();
    assert_eq!(
        mesh.tear_at_vertex(0, Vec3::ZERO, Vec3::Z),
        Err(SolverError::CapacityExceeded { capacity: 5 })
    );
    assert_eq!(mesh.vertex_count(), 5);
    assert_eq!(mesh.triangles(), triangles.as_slice());
}

#[test]
fn tear_rejects_unknown_vertices() {
    let mut mesh = fan(6);
    assert_eq!(
        mesh.tear_at_vertex(7, Vec3::ZERO, Vec3::Z),
        Err(SolverError::VertexOutOfRange { index: 7, count: 5 })
    );
}

#[test]
fn empty_meshes_are_rejected() {
    assert!(matches!(
        DeformableMesh::new(Vec::new(), &[Vec3::ZERO], 1),
        Err(SolverError::EmptyMesh)
    ));
}

#[test]
fn skinned_mesh_follows_its_master() {
    let context = SimulationContext::new(Some(1)).expect("thread pool");
    let mut solver = Solver::new(context, 1, SolverParameters::default());

    let master = solver.add_deformable_mesh(fan(5)).expect("no particles");
    let slave_positions = [
        Vec3::new(0.2, 0.25, 0.1),
        Vec3::new(0.3, 0.25, 0.1),
        Vec3::new(0.2, 0.25, 0.3),
    ];
    let slave = DeformableMesh::new(vec![[0, 2, 1]], &slave_positions, 3).expect("valid mesh");
    let slave = solver.add_deformable_mesh(slave).expect("no particles");
    solver.bind_skin_map(slave, master, &[], &[]).expect("live meshes");

    solver.update_deformable_meshes().expect("live meshes");
    let reproduced = solver.deformable_mesh(slave).expect("live mesh").positions().to_vec();
    for (got, want) in reproduced.iter().zip(slave_positions) {
        assert_abs_diff_eq!(got.distance(want), 0.0, epsilon = 1e-5);
    }

    let lifted: Vec<Vec3> = solver
        .deformable_mesh(master)
        .expect("live mesh")
        .positions()
        .iter()
        .map(|p| *p + Vec3::Y)
        .collect();
    solver
        .deformable_mesh_mut(master)
        .expect("live mesh")
        .set_positions(&lifted)
        .expect("vertex count");
    solver.update_deformable_meshes().expect("live meshes");

    let moved = solver.deformable_mesh(slave).expect("live mesh").positions();
    for (got, want) in moved.iter().zip(slave_positions) {
        assert_abs_diff_eq!(got.distance(want + Vec3::Y), 0.0, epsilon = 1e-5);
    }
}

#[test]
fn solver_tear_splits_the_vertex_particle() {
    let context = SimulationContext::new(Some(1)).expect("thread pool");
    let mut solver = Solver::new(context, 6, SolverParameters::default());
    {
        let particles = solver.particles_mut();
        for i in 0..6 {
            particles.inv_masses[i] = 1.0;
            particles.principal_radii[i] = Vec3::splat(0.1);
        }
        particles.velocities[0] = Vec3::X;
    }
    solver.set_active_particles(&[0, 1, 2, 3, 4]).expect("in range");

    let mut mesh = fan(6);
    mesh.set_vertex_particles(&[Some(0), Some(1), Some(2), Some(3), Some(4), Some(5)])
        .expect("within capacity");
    let handle = solver.add_deformable_mesh(mesh).expect("particles in range");

    let result = solver
        .tear_deformable_mesh(handle, 0, Vec3::ZERO, Vec3::Z)
        .expect("in range")
        .expect("triangles on both sides");
    assert_eq!(result.new_vertex, 5);

    let particles = solver.particles();
    for p in [0, 5] {
        assert_eq!(particles.inv_masses[p], 2.0);
        assert_eq!(particles.principal_radii[p], Vec3::splat(0.05));
        assert_eq!(particles.velocities[p], Vec3::X);
    }
    assert!(solver.active_particles().contains(&5));
    assert_eq!(
        solver.deformable_mesh(handle).expect("live mesh").vertex_count(),
        6
    );
}

#[test]
fn meshes_must_reference_existing_particles() {
    let context = SimulationContext::new(Some(1)).expect("thread pool");
    let mut solver = Solver::new(context, 2, SolverParameters::default());
    let mut mesh = fan(5);
    mesh.set_vertex_particles(&[Some(0), Some(1), Some(9), None, None])
        .expect("within capacity");
    assert_eq!(
        solver.add_deformable_mesh(mesh).err(),
        Some(SolverError::ParticleOutOfRange { index: 9, max: 2 })
    );
}
