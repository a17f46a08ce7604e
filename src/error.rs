use thiserror::Error;

/// Errors surfaced by the solver, its batches and the collision world.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("particle index {index} out of range (max particles: {max})")]
    ParticleOutOfRange { index: usize, max: usize },

    #[error("constraint index {index} out of range (batch size: {count})")]
    ConstraintOutOfRange { index: usize, count: usize },

    #[error("vertex index {index} out of range (vertex count: {count})")]
    VertexOutOfRange { index: usize, count: usize },

    #[error("capacity of {capacity} exhausted")]
    CapacityExceeded { capacity: usize },

    #[error("expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid or released {0} handle")]
    InvalidHandle(&'static str),

    #[error("constraint batch must be cooked before it is solved")]
    BatchNotCooked,

    #[error("invalid phase partition: {0}")]
    InvalidPhasePartition(String),

    #[error("distance field has not finished building")]
    DistanceFieldNotBuilt,

    #[error("distance field is not building")]
    DistanceFieldNotBuilding,

    #[error("mesh has no triangles")]
    EmptyMesh,

    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

pub type SolverResult<T> = Result<T, SolverError>;
