//! Default constants and tunable parameter sets for the particle solver.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Default gravity vector applied to every dynamic particle (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Default integration timestep (in seconds) for a full solver step.
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Number of substeps a solver step is split into by default.
pub const DEFAULT_SUBSTEPS: u32 = 1;

/// Default particle capacity of a solver.
pub const DEFAULT_MAX_PARTICLES: usize = 5000;

/// Fraction of linear velocity removed per second.
pub const DEFAULT_DAMPING: f32 = 0.0;

/// Squared-speed threshold below which particles are put to rest.
pub const DEFAULT_SLEEP_THRESHOLD: f32 = 0.0;

/// Extra distance at which contacts are generated ahead of actual touching.
pub const DEFAULT_COLLISION_MARGIN: f32 = 0.02;

/// Density of air used by aerodynamic constraints (kg/m^3).
pub const DEFAULT_AIR_DENSITY: f32 = 1.2;

/// Maps a unit stiffness range onto XPBD compliance: `(1/s - 1) * scale`.
pub const STIFFNESS_COMPLIANCE_SCALE: f32 = 1.0e-3;

/// Number of octree nodes processed per `continue_building` call.
pub const DEFAULT_DISTANCE_FIELD_NODES_PER_STEP: usize = 64;

/// Padding applied around a mesh when computing a distance field root cell.
pub const DISTANCE_FIELD_BOUNDS_PADDING: f32 = 0.2;

/// Frame budget used by the profiler to flag slow frames (milliseconds).
pub const DEFAULT_FRAME_BUDGET_MS: f32 = 16.6;

/// Whether the simulation runs in full 3D or is locked to the XY plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SimulationMode {
    #[default]
    Mode3D,
    Mode2D,
}

/// How renderable particle poses are derived from physics poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Interpolation {
    #[default]
    None,
    Interpolate,
}

/// How corrections produced by one constraint type are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EvaluationOrder {
    /// Gauss-Seidel: deltas are committed after every phase.
    #[default]
    Sequential,
    /// Jacobi: deltas from every phase are averaged and committed once per iteration.
    Parallel,
}

/// Global solver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParameters {
    pub mode: SimulationMode,
    pub interpolation: Interpolation,
    pub gravity: Vec3,
    /// Fraction of velocity removed per second.
    pub damping: f32,
    pub sleep_threshold: f32,
    pub collision_margin: f32,
    pub air_density: f32,
    /// Fraction of the previous substep's committed delta reapplied to the prediction.
    pub warm_start: f32,
    pub max_anisotropy: f32,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            mode: SimulationMode::default(),
            interpolation: Interpolation::default(),
            gravity: Vec3::from_array(DEFAULT_GRAVITY),
            damping: DEFAULT_DAMPING,
            sleep_threshold: DEFAULT_SLEEP_THRESHOLD,
            collision_margin: DEFAULT_COLLISION_MARGIN,
            air_density: DEFAULT_AIR_DENSITY,
            warm_start: 0.0,
            max_anisotropy: 3.0,
        }
    }
}

/// Per constraint-type parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintParameters {
    pub enabled: bool,
    pub evaluation_order: EvaluationOrder,
    pub iterations: u32,
    /// Successive over-relaxation factor applied when committing averaged deltas.
    pub sor_factor: f32,
}

impl Default for ConstraintParameters {
    fn default() -> Self {
        Self::new(true, EvaluationOrder::Sequential, 3)
    }
}

impl ConstraintParameters {
    pub fn new(enabled: bool, evaluation_order: EvaluationOrder, iterations: u32) -> Self {
        Self {
            enabled,
            evaluation_order,
            iterations,
            sor_factor: 1.0,
        }
    }
}

/// Converts a unit stiffness into XPBD compliance. Zero stiffness yields `None`.
pub fn stiffness_to_compliance(stiffness: f32) -> Option<f32> {
    if stiffness <= 0.0 {
        None
    } else if stiffness >= 1.0 {
        Some(0.0)
    } else {
        Some((1.0 / stiffness - 1.0) * STIFFNESS_COMPLIANCE_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_stiffness_is_rigid() {
        assert_eq!(stiffness_to_compliance(1.0), Some(0.0));
        assert_eq!(stiffness_to_compliance(0.0), None);
        let soft = stiffness_to_compliance(0.5).unwrap_or_default();
        assert!((soft - STIFFNESS_COMPLIANCE_SCALE).abs() < 1e-9);
    }

    #[test]
    fn partial_parameters_fill_defaults() {
        let params: SolverParameters =
            serde_json::from_str(r#"{ "damping": 0.5, "interpolation": "Interpolate" }"#)
                .expect("partial document");
        assert_eq!(params.damping, 0.5);
        assert_eq!(params.interpolation, Interpolation::Interpolate);
        assert_eq!(params.gravity, Vec3::new(0.0, -9.81, 0.0));
        assert_eq!(params.collision_margin, DEFAULT_COLLISION_MARGIN);
        assert_eq!(params.mode, SimulationMode::Mode3D);

        let empty: SolverParameters = serde_json::from_str("{}").expect("empty document");
        assert_eq!(empty, SolverParameters::default());
    }

    #[test]
    fn partial_constraint_parameters_fill_defaults() {
        let params: ConstraintParameters =
            serde_json::from_str(r#"{ "evaluation_order": "Parallel", "iterations": 8 }"#)
                .expect("partial document");
        assert_eq!(params.evaluation_order, EvaluationOrder::Parallel);
        assert_eq!(params.iterations, 8);
        assert!(params.enabled);
        assert_eq!(params.sor_factor, 1.0);
    }
}
