//! Utility helpers: handle arenas, math, profiling and the task scheduler.

pub mod allocator;
pub mod math;
pub mod profiling;
pub mod tasks;

pub use allocator::{Arena, GenerationalId, Handle, Release};
pub use profiling::{ProfileKind, ProfileRecord, ProfileScope, Profiler};
pub use tasks::TaskScheduler;
