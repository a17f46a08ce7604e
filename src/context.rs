use std::sync::Arc;

use crate::{
    error::SolverResult,
    utils::{profiling::Profiler, tasks::TaskScheduler},
};

/// Scheduler and profiler shared by every solver built from it.
///
/// Replaces process-wide singletons: hosts create one context and hand a
/// clone to each solver, or give solvers separate contexts to isolate them.
#[derive(Clone)]
pub struct SimulationContext {
    scheduler: Arc<TaskScheduler>,
    profiler: Arc<Profiler>,
}

impl SimulationContext {
    /// `threads` of `None` sizes the worker pool to the machine.
    pub fn new(threads: Option<usize>) -> SolverResult<Self> {
        Ok(Self {
            scheduler: Arc::new(TaskScheduler::new(threads)?),
            profiler: Arc::new(Profiler::new()),
        })
    }

    pub fn from_parts(scheduler: Arc<TaskScheduler>, profiler: Arc<Profiler>) -> Self {
        Self {
            scheduler,
            profiler,
        }
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    pub fn max_concurrency(&self) -> usize {
        self.scheduler.max_concurrency()
    }

    pub fn wait_for_all_tasks(&self) {
        self.scheduler.wait_for_all_tasks();
    }

    pub fn clear_tasks(&self) -> usize {
        self.scheduler.clear_tasks()
    }
}
