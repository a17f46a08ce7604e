use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use particle_loom::dynamics::constraints::DistanceConstraints;
use particle_loom::*;
use std::hint::black_box;

const DT: f32 = 1.0 / 60.0;

/// Particles on a `size`×`size` grid with structural and shear links, top row pinned.
fn cloth(size: u32) -> (Vec<Vec3>, DistanceConstraints) {
    let index = |x: u32, y: u32| y * size + x;
    let mut positions = Vec::new();
    for y in 0..size {
        for x in 0..size {
            positions.push(Vec3::new(x as f32 * 0.1, 0.0, y as f32 * 0.1));
        }
    }
    let mut constraints = DistanceConstraints::new();
    for y in 0..size {
        for x in 0..size {
            if x + 1 < size {
                constraints.add(index(x, y), index(x + 1, y), 0.1, 1.0);
            }
            if y + 1 < size {
                constraints.add(index(x, y), index(x, y + 1), 0.1, 1.0);
            }
            if x + 1 < size && y + 1 < size {
                constraints.add(index(x, y), index(x + 1, y + 1), 0.1 * 2f32.sqrt(), 0.8);
            }
        }
    }
    (positions, constraints)
}

fn prepare_solver(context: &SimulationContext, size: u32) -> Solver {
    let (positions, constraints) = cloth(size);
    let mut solver = Solver::new(context.clone(), positions.len(), SolverParameters::default());
    let particles = solver.particles_mut();
    for (i, p) in positions.iter().enumerate() {
        particles.positions[i] = *p;
        particles.inv_masses[i] = if i < size as usize { 0.0 } else { 1.0 };
        particles.principal_radii[i] = Vec3::splat(0.04);
    }
    let active: Vec<u32> = (0..positions.len() as u32).collect();
    solver.set_active_particles(&active).expect("in range");
    let batch = solver.add_batch(ConstraintBatch::new(constraints));
    solver.cook_batch(batch).expect("cook");
    solver
}

fn bench_cloth_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("cloth_update");
    let world = CollisionWorld::new();
    for (label, threads) in [("single", Some(1)), ("pool", None)] {
        let context = SimulationContext::new(threads).expect("thread pool");
        for &size in &[16u32, 32, 64] {
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                let mut solver = prepare_solver(&context, size);
                b.iter(|| {
                    solver.update(&world, 4, black_box(DT / 4.0)).expect("update");
                })
            });
        }
    }
    group.finish();
}

fn bench_batch_cook(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_cook");
    for &size in &[32u32, 64, 128] {
        group.bench_with_input(BenchmarkId::new("distance", size), &size, |b, &size| {
            let (positions, constraints) = cloth(size);
            b.iter(|| {
                let mut batch = ConstraintBatch::new(constraints.clone());
                black_box(batch.cook(positions.len()).expect("cook"))
            })
        });
    }
    group.finish();
}

fn bench_distance_field(c: &mut Criterion) {
    let mut group = c.benchmark_group("distance_field_build");
    let vertices: Vec<Vec3> = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 != 0 { 0.5 } else { -0.5 },
                if i & 2 != 0 { 0.5 } else { -0.5 },
                if i & 4 != 0 { 0.5 } else { -0.5 },
            )
        })
        .collect();
    let triangles = vec![
        [0, 2, 3], [0, 3, 1],
        [4, 5, 7], [4, 7, 6],
        [0, 1, 5], [0, 5, 4],
        [2, 6, 7], [2, 7, 3],
        [0, 4, 6], [0, 6, 2],
        [1, 3, 7], [1, 7, 5],
    ];
    for &depth in &[3u32, 5] {
        group.bench_with_input(BenchmarkId::new("cube", depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut field = DistanceField::new();
                field
                    .build(0.01, depth, &vertices, &triangles)
                    .expect("valid mesh");
                black_box(field.node_count())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cloth_update, bench_batch_cook, bench_distance_field);
criterion_main!(benches);
