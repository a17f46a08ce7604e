use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, ConstraintSet, ConstraintType, Corrections, Multipliers,
    ProjectionContext,
};
use crate::error::SolverResult;

/// Cosserat rod bending and twisting between two consecutive orientations.
///
/// Drives the Darboux vector `conj(q0)·q1` toward its rest value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BendTwistConstraints {
    pub orientation_indices: Vec<[u32; 2]>,
    pub rest_darboux: Vec<Quat>,
    /// Bend (x, y) and twist (z) stiffness.
    pub stiffnesses: Vec<Vec3>,
}

impl BendTwistConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, orientation_indices: [u32; 2], rest_darboux: Quat, stiffness: Vec3) -> usize {
        self.orientation_indices.push(orientation_indices);
        self.rest_darboux.push(rest_darboux);
        self.stiffnesses.push(stiffness.clamp(Vec3::ZERO, Vec3::ONE));
        self.orientation_indices.len() - 1
    }

    /// Darboux vector of two orientations, for capturing rest values.
    pub fn darboux(q0: Quat, q1: Quat) -> Quat {
        q0.conjugate() * q1
    }
}

impl ConstraintSet for BendTwistConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::BendTwist
    }

    fn len(&self) -> usize {
        self.orientation_indices.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.extend_from_slice(&self.orientation_indices[index]);
    }

    fn project(
        &self,
        index: usize,
        _lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let [i0, i1] = self.orientation_indices[index];
        let (w0, w1) = (ctx.inv_rotational_mass(i0), ctx.inv_rotational_mass(i1));
        let total = w0 + w1;
        if total <= 0.0 {
            return;
        }
        let (q0, q1) = (ctx.orientation(i0), ctx.orientation(i1));
        let omega = Self::darboux(q0, q1);
        let rest = self.rest_darboux[index];

        // Pick the closer of the two quaternions describing the rest pose.
        let plus = omega + rest;
        let minus = omega - rest;
        let omega = if minus.length_squared() > plus.length_squared() {
            plus
        } else {
            minus
        };
        let residual = Vec3::new(omega.x, omega.y, omega.z) * self.stiffnesses[index];
        let omega = Quat::from_xyzw(residual.x, residual.y, residual.z, 0.0);

        if w0 > 0.0 {
            out.orientation(i0, q1 * omega * (w0 / total));
        }
        if w1 > 0.0 {
            out.orientation(i1, q0 * omega * (-w1 / total));
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(
            self.orientation_indices.len(),
            &[
                self.rest_darboux.len(),
                self.stiffnesses.len(),
            ],
        )
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.orientation_indices, order)?;
        permute_vec(&mut self.rest_darboux, order)?;
        permute_vec(&mut self.stiffnesses, order)?;
        Ok(())
    }
}
