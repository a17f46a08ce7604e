use serde::{Deserialize, Serialize};

use super::{
    check_parallel, permute_vec, ConstraintSet, ConstraintType, Corrections, Multipliers,
    ProjectionContext,
};
use crate::error::SolverResult;

/// Inextensible particle chains solved exactly with a tridiagonal direct solve.
///
/// Each segment may shrink down to `rest_length · tightness` without resistance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainConstraints {
    pub chains: Vec<Vec<u32>>,
    /// Rest length of every segment in the chain.
    pub rest_lengths: Vec<f32>,
    pub tightness: Vec<f32>,
}

impl ChainConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chain: Vec<u32>, rest_length: f32, tightness: f32) -> usize {
        self.chains.push(chain);
        self.rest_lengths.push(rest_length);
        self.tightness.push(tightness.clamp(0.0, 1.0));
        self.chains.len() - 1
    }
}

/// Thomas algorithm for `a[i]x[i-1] + b[i]x[i] + c[i]x[i+1] = d[i]`. Solves in place into `d`.
fn solve_tridiagonal(a: &[f32], b: &mut [f32], c: &[f32], d: &mut [f32]) {
    let n = d.len();
    for i in 1..n {
        if b[i - 1].abs() < f32::EPSILON {
            continue;
        }
        let m = a[i] / b[i - 1];
        b[i] -= m * c[i - 1];
        d[i] -= m * d[i - 1];
    }
    for i in (0..n).rev() {
        let next = if i + 1 < n { c[i] * d[i + 1] } else { 0.0 };
        d[i] = if b[i].abs() < f32::EPSILON {
            0.0
        } else {
            (d[i] - next) / b[i]
        };
    }
}

impl ConstraintSet for ChainConstraints {
    fn constraint_type(&self) -> ConstraintType {
        ConstraintType::Chain
    }

    fn len(&self) -> usize {
        self.chains.len()
    }

    fn particles(&self, index: usize, out: &mut Vec<u32>) {
        out.extend_from_slice(&self.chains[index]);
    }

    fn project(
        &self,
        index: usize,
        _lambda: &mut Multipliers,
        ctx: &ProjectionContext<'_>,
        out: &mut Corrections,
    ) {
        let chain = &self.chains[index];
        if chain.len() < 2 {
            return;
        }
        let segments = chain.len() - 1;
        let rest = self.rest_lengths[index];
        let min_length = rest * self.tightness[index];

        let mut normals = Vec::with_capacity(segments);
        let mut rhs = Vec::with_capacity(segments);
        for k in 0..segments {
            let offset = ctx.position(chain[k + 1]) - ctx.position(chain[k]);
            let length = offset.length();
            normals.push(offset.normalize_or_zero());
            rhs.push(-(length - length.clamp(min_length, rest)));
        }

        let weights: Vec<f32> = chain.iter().map(|&p| ctx.inv_mass(p)).collect();
        let mut diagonal: Vec<f32> = (0..segments).map(|k| weights[k] + weights[k + 1]).collect();
        let upper: Vec<f32> = (0..segments)
            .map(|k| {
                if k + 1 < segments {
                    -weights[k + 1] * normals[k].dot(normals[k + 1])
                } else {
                    0.0
                }
            })
            .collect();
        let lower: Vec<f32> = (0..segments)
            .map(|k| if k > 0 { upper[k - 1] } else { 0.0 })
            .collect();

        solve_tridiagonal(&lower, &mut diagonal, &upper, &mut rhs);

        for (k, &lambda) in rhs.iter().enumerate() {
            let (a, b) = (chain[k], chain[k + 1]);
            if weights[k] > 0.0 {
                out.position(a, normals[k] * (-weights[k] * lambda));
            }
            if weights[k + 1] > 0.0 {
                out.position(b, normals[k] * (weights[k + 1] * lambda));
            }
        }
    }

    fn validate(&self) -> SolverResult<()> {
        check_parallel(self.chains.len(), &[self.rest_lengths.len(), self.tightness.len()])
    }

    fn permute(&mut self, order: &[usize]) -> SolverResult<()> {
        permute_vec(&mut self.chains, order)?;
        permute_vec(&mut self.rest_lengths, order)?;
        permute_vec(&mut self.tightness, order)?;
        Ok(())
    }
}
