//! Worker pool used by the solver for parallel-for passes and queued tasks.
//!
//! Parallel passes (`fold_mut`, `fold_range`) are synchronous:
//! they return once every worker finished, which is the barrier between solver
//! stages. Queued tasks run in the background until `wait_for_all_tasks`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{SolverError, SolverResult};

/// Minimum number of items a worker takes per split in parallel passes.
#[cfg(feature = "parallel")]
const PARALLEL_GRAIN: usize = 32;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct TaskQueue {
    pending: Mutex<VecDeque<Task>>,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl TaskQueue {
    fn push(&self, task: Task) {
        *self.outstanding.lock() += 1;
        self.pending.lock().push_back(task);
    }

    fn pop(&self) -> Option<Task> {
        self.pending.lock().pop_front()
    }

    fn finish(&self, count: usize) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(count);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Runs at most one queued task. Cleared tasks leave nothing to pop.
    fn run_one(&self) {
        if let Some(task) = self.pop() {
            let _done = FinishGuard(self);
            task();
        }
    }
}

/// Decrements the outstanding count even if a task panics.
struct FinishGuard<'a>(&'a TaskQueue);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish(1);
    }
}

/// Shared worker pool sized to the system's concurrency.
pub struct TaskScheduler {
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
    queue: Arc<TaskQueue>,
    concurrency: usize,
}

impl TaskScheduler {
    /// Creates a scheduler with `threads` workers, or one per logical core.
    pub fn new(threads: Option<usize>) -> SolverResult<Self> {
        let concurrency = threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);

        #[cfg(feature = "parallel")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("particle-loom-worker-{i}"))
            .build()
            .map_err(|err| SolverError::ThreadPool(err.to_string()))?;

        log::debug!("task scheduler started with {concurrency} workers");

        Ok(Self {
            #[cfg(feature = "parallel")]
            pool,
            queue: Arc::new(TaskQueue::default()),
            concurrency,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queues a task for background execution.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(task));
        #[cfg(feature = "parallel")]
        {
            let queue = Arc::clone(&self.queue);
            self.pool.spawn(move || queue.run_one());
        }
    }

    /// Blocks until every queued task has run or been cleared.
    pub fn wait_for_all_tasks(&self) {
        #[cfg(not(feature = "parallel"))]
        while self.queue.pending.lock().front().is_some() {
            self.queue.run_one();
        }

        let mut outstanding = self.queue.outstanding.lock();
        while *outstanding > 0 {
            self.queue.idle.wait(&mut outstanding);
        }
    }

    /// Drops queued tasks that have not started yet, returning how many.
    pub fn clear_tasks(&self) -> usize {
        let dropped = {
            let mut pending = self.queue.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            self.queue.finish(dropped);
            log::debug!("cleared {dropped} pending tasks");
        }
        dropped
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.pending.lock().len()
    }

    /// Visits every item mutably, folding results into per-worker accumulators.
    pub fn fold_mut<T, A, I, F>(&self, items: &mut [T], init: I, op: F) -> Vec<A>
    where
        T: Send,
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(&mut A, usize, &mut T) + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            self.pool.install(|| {
                items
                    .par_iter_mut()
                    .enumerate()
                    .with_min_len(PARALLEL_GRAIN)
                    .fold(&init, |mut acc, (index, item)| {
                        op(&mut acc, index, item);
                        acc
                    })
                    .collect()
            })
        }
        #[cfg(not(feature = "parallel"))]
        {
            let mut acc = init();
            for (index, item) in items.iter_mut().enumerate() {
                op(&mut acc, index, item);
            }
            vec![acc]
        }
    }

    /// Folds over `0..len` into per-worker accumulators.
    pub fn fold_range<A, I, F>(&self, len: usize, init: I, op: F) -> Vec<A>
    where
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(&mut A, usize) + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            self.pool.install(|| {
                (0..len)
                    .into_par_iter()
                    .with_min_len(PARALLEL_GRAIN)
                    .fold(&init, |mut acc, index| {
                        op(&mut acc, index);
                        acc
                    })
                    .collect()
            })
        }
        #[cfg(not(feature = "parallel"))]
        {
            let mut acc = init();
            for index in 0..len {
                op(&mut acc, index);
            }
            vec![acc]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn queued_tasks_complete_before_barrier_returns() {
        let scheduler = TaskScheduler::new(Some(2)).expect("pool");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            scheduler.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.wait_for_all_tasks();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(scheduler.pending_tasks(), 0);
    }

    #[test]
    fn fold_range_visits_every_index_once() {
        let scheduler = TaskScheduler::new(Some(3)).expect("pool");
        let partials = scheduler.fold_range(1000, || 0usize, |acc, i| *acc += i);
        assert_eq!(partials.iter().sum::<usize>(), 999 * 1000 / 2);
    }

    #[test]
    fn fold_mut_sees_global_indices() {
        let scheduler = TaskScheduler::new(Some(2)).expect("pool");
        let mut items = vec![0usize; 200];
        let partials = scheduler.fold_mut(&mut items, Vec::new, |acc, index, item| {
            *item = index * 2;
            acc.push(index);
        });
        let mut visited: Vec<usize> = partials.into_iter().flatten().collect();
        visited.sort_unstable();
        assert_eq!(visited, (0..200).collect::<Vec<_>>());
        assert!(items.iter().enumerate().all(|(i, v)| *v == i * 2));
    }

    #[test]
    fn concurrency_is_at_least_one() {
        let scheduler = TaskScheduler::new(Some(0)).expect("pool");
        assert_eq!(scheduler.max_concurrency(), 1);
    }
}
