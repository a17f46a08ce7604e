use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, ConstraintSet, ConstraintType, Corrections, Multipliers,
    ProjectionContext,
};
use crate::{core::particles::ParticleStore, error::SolverResult, utils::math::extract_rotation};

const POLAR_ITERATIONS: u32 = 8;
const MIN_PARTICLE_WEIGHT: f32 = 1e-6;
const AQQ_REGULARIZATION: f32 = 1e-6;

/// Elastic stiffness and plastic flow parameters of a shape-matching cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElastoplasticMaterial {
    pub stiffness: f32,
    /// Deformation (Frobenius norm of the stretch minus identity) below which no plastic flow occurs.
    pub plastic_yield: f32,
    /// Fraction of the excess stretch absorbed into the rest shape per substep.
    pub plastic_creep: f32,
    /// Rate per second at which the rest shape returns to its original form.
    pub plastic_recovery: f32,
    /// Upper bound on accumulated plastic deformation. Zero means unbounded.
    pub max_deformation: f32,
}

impl Default for ElastoplasticMaterial {
    fn default() -> Self {
        Self {
            stiffness: 1.0,
            plastic_yield: 0.0,
            plastic_creep: 0.0,
            plastic_recovery: 0.0,
            max_deformation: 0.0,
        }
    }
}

impl ElastoplasticMaterial {
    pub fn elastic(stiffness: f32) -> Self {
        Self {
            stiffness,
            ..Default::default()
        }
    }

    fn is_plastic(&self) -> bool {
        self.plastic_creep > 0.0 || self.plastic_recovery > 0.0
    }
}

/// Pulls particle clusters toward a rigidly transformed copy of their rest shape.
///
/// Rest data is computed by [`ShapeMatchingConstraints::calculate_rest_shape_matching`];
/// clusters without it are skipped. After each substep the best-fit centers of
/// mass and orientations are stored as outputs, and plastic flow updates each
/// cluster's rest deformation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeMatchingConstraints {
    pub clusters: Vec<Vec<u32>>,
    pub materials: Vec<ElastoplasticMaterial>,
    /// Undeformed rest offsets from the rest center of mass.
    pub rest_offsets: Vec<Vec<Vec3>>,
    pub rest_coms: Vec<Vec3>,
    pub aqq_inverses: Vec<Mat3>,
    /// Accumulated plastic deformation applied to the rest offsets.
    pub deformations: Vec<Mat3>,
    pub coms: Vec<Vec3>,
    pub orientations: Vec<Quat>,
}

fn particle_mass(inv_mass: f32) -> f32 {
    1.0 / inv_mass.max(MIN_PARTICLE_WEIGHT)
}

fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

fn frobenius(m: Mat3) -> f32 {
    (m.x_axis.length_squared() + m.y_axis.length_squared() + m.z_axis.length_squared()).sqrt()
}

impl ShapeMatchingConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cluster: Vec<u32>, material: ElastoplasticMaterial) -> usize {
        self.clusters.push(cluster);
        self.materials.push(material);
        self.rest_offsets.push(Vec::new());
        self.rest_coms.push(Vec3::ZERO);
        self.aqq_inverses.push(Mat3::ZERO);
        self.deformations.push(Mat3::IDENTITY);
        self.coms.push(Vec3::ZERO);
        self.orientations.push(Quat::IDENTITY);
        self.clusters.len() - 1
    }

    /// Captures every cluster's rest shape and resets its plastic deformation.
    ///
    /// Authored rest positions (`w != 0`) are used when present, current positions otherwise.
    pub fn calculate_rest_shape_matching(&mut self, particles: &ParticleStore) {
        for index in 0..self.clusters.len() {
            let cluster = &self.clusters[index];
            let rest: Vec<Vec3> = cluster
                .iter()
                .map(|&p| {
                    let rest = particles.rest_positions[p as usize];
                    if rest.w != 0.0 {
                        rest.truncate()
                    } else {
                        particles.positions[p as usize]
                    }
                })
                .collect();

            let mut total = 0.0;
            let mut com = Vec3::ZERO;
            for (&p, &x) in cluster.iter().zip(&rest) {
                let m = particle_mass(particles.inv_masses[p as usize]);
                com += x * m;
                total += m;
            }
            if total > 0.0 {
                com /= total;
            }

            self.rest_offsets[index] = rest.iter().map(|&x| x - com).collect();
            self.rest_coms[index] = com;
            self.coms[index] = com;
            self.orientations[index] = Quat::IDENTITY;
            self.deformations[index] = Mat3::IDENTITY;
            self.update_aqq(index, particles);
        }
    }

    fn update_aqq(&mut self, index: usize, particles: &ParticleStore) {
        let deformation = self.deformations[index];
        let mut aqq = Mat3::from_diagonal(Vec3::splat(AQQ_REGULARIZATION));
        for (&p, &q) in self.clusters[index].iter().zip(&self.rest_offsets[index]) {
            let q = deformation * q;
            aqq += outer(q, q) * particle_mass(particles.inv_masses[p as usize]);
        }
        self.aqq_inverses[index] = if aqq.determinant().abs() > f32::EPSILON {
            aqq.inverse()
        } else {
            Mat3::ZERO
        };
    }

    fn has_rest_shape(&self, index: usize) -> bool {
        let n = self.clusters[index].len();
        n > 1 && self.rest_offsets[index].len() == n
    }

    /// Current center of mass and best linear fit `A = Apq·Aqq⁻¹`.
    fn fit(&self, index: usize, particles: &ParticleStore) -> (Vec3, Mat3) {
        let cluster = &self.clusters[index];
        let mut total = 0.0;
        let mut com = Vec3::ZERO;
        for &p in cluster {
            let m = particle_mass(particles.inv_masses[p as usize]);
            com += particles.positions[p as usize] * m;
            total += m;
        }
        com /= total;

        let deformation = self.deformations[index];
        let mut apq = Mat3::ZERO;
        for (&p, &q) in cluster.iter().zip(&self.rest_offsets[index]) {
            let m = particle_mass(particles.inv_masses[p as usize]);
            apq += outer(particles.positions[p as usize] - com, deformation * q) * m;
        }
        (com, apq * self.aqq_inverses[index])
    }

    fn apply_plasticity(&mut self, index: usize, stretch: Mat3, dt: f32) -> bool {
        let material = self.materials[index];
        if !material.is_plastic() {
            return false;
        }
        let mut deformation = self.deformations[index];
        let excess = stretch - Mat3::IDENTITY;
        if material.plastic_creep > 0.0 && frobenius(excess) > material.plastic_yield {
            let creep = material.plastic_creep.min(1.0);
            deformation = (Mat3::IDENTITY + excess * creep) * deformation;
        }
        if material.plastic_recovery > 0.0 {
            let t = (material.plastic_recovery * dt).min(1.0);
            deformation = deformation * (1.0 - t) + Mat3::IDENTITY * t;
        }

        // Plastic flow preserves volume.
        let det = deformation.determinant();
        if det <= f32::EPSILON {
            return false;
        }
        deformation = deformation * det.powf(-1.0 / 3.0);

        if material.max_deformation > 0.0 {
            let offset = deformation - Mat3::IDENTITY;
            let norm = frobenius(offset);
            if norm > material.max_deformation {
                deformation = Mat3::IDENTITY + offset * (material.max_deformation / norm);
            }
        }
        self.deformations[index] = deformation;
        true
    }
}

impl ConstraintSet for ShapeMatchingConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::ShapeMatching
    }

    fn len(&self) -> usize {
        self.clusters.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.extend_from_slice(&self.clusters[index]);
    }

    fn project(
        &self,
        index: usize,
        _lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        if !self.has_rest_shape(index) {
            return;
        }
        let Some(compliance) = ctx.compliance(self.materials[index].stiffness) else {
            return;
        };
        let (com, fit) = self.fit(index, ctx.particles);
        let rotation = Mat3::from_quat(extract_rotation(fit, self.orientations[index], POLAR_ITERATIONS));
        let transform = rotation * self.deformations[index];

        for (&p, &q) in self.clusters[index].iter().zip(&self.rest_offsets[index]) {
            let w = ctx.inv_mass(p);
            if w <= 0.0 {
                continue;
            }
            let goal = com + transform * q;
            out.position(p, (goal - ctx.position(p)) * (w / (w + compliance)));
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.clusters.len(),
            &[
                self.materials.len(),
                self.rest_offsets.len(),
                self.rest_coms.len(),
                self.aqq_inverses.len(),
                self.deformations.len(),
                self.coms.len(),
                self.orientations.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.clusters, order)?;
        permute_vec(&mut self.materials, order)?;
        permute_vec(&mut self.rest_offsets, order)?;
        permute_vec(&mut self.rest_coms, order)?;
        permute_vec(&mut self.aqq_inverses, order)?;
        permute_vec(&mut self.deformations, order)?;
        permute_vec(&mut self.coms, order)?;
        permute_vec(&mut self.orientations, order)?;
        Ok(())
    }

    fn end_substep(&mut self, ctx: &ProjectionContext<'_>) {
        for index in 0..self.clusters.len() {
            if !self.has_rest_shape(index) {
                continue;
            }
            let (com, fit) = self.fit(index, ctx.particles);
            let orientation = extract_rotation(fit, self.orientations[index], POLAR_ITERATIONS);
            self.coms[index] = com;
            self.orientations[index] = orientation;

            let stretch = Mat3::from_quat(orientation).transpose() * fit;
            if self.apply_plasticity(index, stretch, ctx.dt) {
                self.update_aqq(index, ctx.particles);
            }
        }
    }
}
