use approx::assert_abs_diff_eq;
use particle_loom::core::mesh::TriangleMesh;
use particle_loom::{DistanceField, DistanceFieldState, SolverError, Vec3};

fn unit_cube() -> (Vec<Vec3>, Vec<[u32; 3]>) {
    let v = |x: f32, y: f32, z: f32| Vec3::new(x, y, z) - Vec3::splat(0.5);
    let vertices = vec![
        v(0.0, 0.0, 0.0),
        v(1.0, 0.0, 0.0),
        v(1.0, 1.0, 0.0),
        v(0.0, 1.0, 0.0),
        v(0.0, 0.0, 1.0),
        v(1.0, 0.0, 1.0),
        v(1.0, 1.0, 1.0),
        v(0.0, 1.0, 1.0),
    ];
    let triangles = vec![
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
    ];
    (vertices, triangles)
}

#[test]
fn unit_cube_center_is_half_a_side_inside() {
    let (vertices, triangles) = unit_cube();
    let mut field = DistanceField::new();
    field.build(0.01, 6, &vertices, &triangles).expect("valid mesh");
    assert_eq!(field.state(), DistanceFieldState::Built);

    let center = field.sample(Vec3::ZERO).expect("built");
    assert_abs_diff_eq!(center, -0.5, epsilon = 0.01);

    let outside = field.sample(Vec3::new(2.0, 0.0, 0.0)).expect("built");
    assert_abs_diff_eq!(outside, 1.5, epsilon = 0.02);
}

#[test]
fn building_terminates_in_finite_steps() {
    let (vertices, triangles) = unit_cube();
    let mut field = DistanceField::new();
    field.set_nodes_per_step(8);
    field
        .start_building(0.02, 5, &vertices, &triangles)
        .expect("valid mesh");

    let mut calls = 0;
    while field.continue_building().expect("building") {
        calls += 1;
        assert!(calls < 100_000, "builder did not terminate");
    }
    assert!(field.is_built());
    // Once built, further calls report no remaining work.
    assert_eq!(field.continue_building(), Ok(false));
}

#[test]
fn leaves_meet_the_error_bound_on_their_lattice() {
    let (vertices, triangles) = unit_cube();
    let max_error = 0.05;
    let max_depth = 5;
    let mut field = DistanceField::new();
    field
        .build(max_error, max_depth, &vertices, &triangles)
        .expect("valid mesh");
    let exact = TriangleMesh::builder(vertices, triangles).build();

    let root_half = field.nodes()[0].half_size;
    for node in field.nodes().iter().filter(|n| n.is_leaf()) {
        let depth = (root_half / node.half_size).log2().round() as u32;
        if depth >= max_depth {
            continue;
        }
        for n in 0..27 {
            let offset = Vec3::new((n % 3) as f32, ((n / 3) % 3) as f32, (n / 9) as f32) - Vec3::ONE;
            let point = node.center + offset * node.half_size;
            let error = (node.interpolate(point) - exact.signed_distance(point)).abs();
            assert!(error <= max_error + 1e-4, "error {error} at {point:?}");
        }
    }
}

/// xorshift32, mapped to [0, 1).
fn next_unit(state: &mut u32) -> f32 {
    *state ^= *state << 13;
    *state ^= *state >> 17;
    *state ^= *state << 5;
    (*state >> 8) as f32 / (1u32 << 24) as f32
}

#[test]
fn samples_inside_the_built_bound_stay_within_tolerance() {
    let (vertices, triangles) = unit_cube();
    let max_error = 0.02;
    let mut field = DistanceField::new();
    field
        .build(max_error, 7, &vertices, &triangles)
        .expect("valid mesh");
    let exact = TriangleMesh::builder(vertices, triangles).build();
    let bounds = field.bounds().expect("built");

    let mut state = 0x9e37_79b9;
    let mut worst = 0.0_f32;
    for _ in 0..5000 {
        let t = Vec3::new(next_unit(&mut state), next_unit(&mut state), next_unit(&mut state));
        let point = bounds.min + (bounds.max - bounds.min) * t;
        let error = (field.sample(point).expect("built") - exact.signed_distance(point)).abs();
        worst = worst.max(error);
    }
    assert!(worst <= max_error, "worst error {worst}");
}

#[test]
fn exported_nodes_round_trip() {
    let (vertices, triangles) = unit_cube();
    let mut field = DistanceField::new();
    field.build(0.05, 4, &vertices, &triangles).expect("valid mesh");

    let mut imported = DistanceField::new();
    imported.set_nodes(field.nodes().to_vec());
    assert!(imported.is_built());
    let p = Vec3::new(0.1, -0.2, 0.3);
    assert_eq!(imported.sample(p), field.sample(p));
}

#[test]
fn unbuilt_field_refuses_samples() {
    let field = DistanceField::new();
    assert_eq!(field.sample(Vec3::ZERO), Err(SolverError::DistanceFieldNotBuilt));
    assert_eq!(
        field.sample_with_normal(Vec3::ZERO),
        Err(SolverError::DistanceFieldNotBuilt)
    );
}
