use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, ConstraintSet, ConstraintType, Corrections, Multipliers,
    ProjectionContext,
};
use crate::error::SolverResult;

/// Per-triangle drag and lift against the particles' wind.
///
/// Not a true constraint: each projection converts the aerodynamic force on
/// the triangle into a position offset `F·w·dt²`, split evenly over its corners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AerodynamicConstraints {
    pub triangles: Vec<[u32; 3]>,
    pub drag_coefficients: Vec<f32>,
    pub lift_coefficients: Vec<f32>,
}

impl AerodynamicConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, triangle: [u32; 3], drag: f32, lift: f32) -> usize {
        self.triangles.push(triangle);
        self.drag_coefficients.push(drag);
        self.lift_coefficients.push(lift);
        self.triangles.len() - 1
    }

    /// Aerodynamic force on a triangle moving at `relative_velocity` through air.
    pub fn force(
        area_normal: Vec3,
        relative_velocity: Vec3,
        air_density: f32,
        drag: f32,
        lift: f32,
    ) -> Vec3 {
        let area = area_normal.length();
        let speed = relative_velocity.length();
        if area < 1e-12 || speed < 1e-6 {
            return Vec3::ZERO;
        }
        let direction = relative_velocity / speed;
        let mut normal = area_normal / area;
        if normal.dot(direction) < 0.0 {
            normal = -normal;
        }
        let cos_theta = normal.dot(direction);
        let pressure = 0.5 * air_density * speed * speed * area * cos_theta;

        let drag_force = -direction * (drag * pressure);
        let lift_direction = direction.cross(normal).cross(direction).normalize_or_zero();
        let lift_force = -lift_direction * (lift * pressure);
        drag_force + lift_force
    }
}

impl ConstraintSet for AerodynamicConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Aerodynamic
    }

    fn len(&self) -> usize {
        self.triangles.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.extend_from_slice(&self.triangles[index]);
    }

    fn project(
        &self,
        index: usize,
        _lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        if ctx.air_density <= 0.0 {
            return;
        }
        let triangle = self.triangles[index];
        let [a, b, c] = triangle.map(|i| ctx.position(i));
        let area_normal = (b - a).cross(c - a) * 0.5;

        let store = ctx.particles;
        let mut velocity = Vec3::ZERO;
        let mut wind = Vec3::ZERO;
        for &i in &triangle {
            velocity += store.velocities[i as usize];
            wind += store.wind[i as usize];
        }
        let relative = (velocity - wind) / 3.0;

        let force = Self::force(
            area_normal,
            relative,
            ctx.air_density,
            self.drag_coefficients[index],
            self.lift_coefficients[index],
        );
        if force == Vec3::ZERO {
            return;
        }
        let scale = ctx.dt * ctx.dt / 3.0;
        for &i in &triangle {
            let w = ctx.inv_mass(i);
            if w > 0.0 {
                out.position(i, force * (w * scale));
            }
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.triangles.len(),
            &[
                self.drag_coefficients.len(),
                self.lift_coefficients.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.triangles, order)?;
        permute_vec(&mut self.drag_coefficients, order)?;
        permute_vec(&mut self.lift_coefficients, order)?;
        Ok(())
    }
}
