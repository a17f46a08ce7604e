use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::{log_enabled, warn, Level};
use parking_lot::Mutex;

use crate::config::DEFAULT_FRAME_BUDGET_MS;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THREAD_ID: u32 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    static STACK_LEVEL: Cell<u32> = const { Cell::new(0) };
}

/// Category of a profiled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ProfileKind {
    #[default]
    Default = 0,
    Parallel = 1,
    Idle = 2,
}

/// One timed block, relative to the start of the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    pub name: &'static str,
    pub thread_id: u32,
    pub level: u32,
    pub kind: ProfileKind,
    pub start_us: f64,
    pub end_us: f64,
}

impl ProfileRecord {
    /// Packs thread id, nesting level and kind as `thread << 16 | level << 8 | kind`.
    pub fn info(&self) -> u32 {
        ((self.thread_id & 0xffff) << 16) | ((self.level & 0xff) << 8) | (self.kind as u32 & 0xff)
    }

    pub fn duration_us(&self) -> f64 {
        self.end_us - self.start_us
    }
}

/// Frame-scoped timing recorder shared by a solver and its scheduler.
pub struct Profiler {
    enabled: AtomicBool,
    frame_start: Mutex<Instant>,
    records: Mutex<Vec<ProfileRecord>>,
    frame_budget_ms: f32,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::with_frame_budget(DEFAULT_FRAME_BUDGET_MS)
    }

    pub fn with_frame_budget(frame_budget_ms: f32) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            frame_start: Mutex::new(Instant::now()),
            records: Mutex::new(Vec::new()),
            frame_budget_ms,
        }
    }

    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Starts a new frame, discarding the records of the previous one.
    pub fn signal_frame_start(&self) {
        *self.frame_start.lock() = Instant::now();
        self.records.lock().clear();
    }

    /// Ends the frame and returns its duration in milliseconds.
    pub fn signal_frame_end(&self) -> f64 {
        let elapsed = self.frame_start.lock().elapsed();
        warn_if_frame_budget_exceeded(elapsed, self.frame_budget_ms);
        elapsed.as_secs_f64() * 1000.0
    }

    pub fn scope(&self, name: &'static str) -> ProfileScope<'_> {
        self.scope_with_kind(name, ProfileKind::Default)
    }

    pub fn scope_with_kind(&self, name: &'static str, kind: ProfileKind) -> ProfileScope<'_> {
        if log_enabled!(Level::Trace) {
            log::trace!("{}", scope_message(name, None));
        }
        let level = STACK_LEVEL.with(|level| {
            let current = level.get();
            level.set(current + 1);
            current
        });
        ProfileScope {
            profiler: self,
            name,
            kind,
            level,
            start: Instant::now(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn records(&self) -> Vec<ProfileRecord> {
        self.records.lock().clone()
    }

    fn push(&self, record: ProfileRecord) {
        self.records.lock().push(record);
    }

    fn micros_since_frame_start(&self, instant: Instant) -> f64 {
        let frame_start = *self.frame_start.lock();
        instant
            .checked_duration_since(frame_start)
            .map(|d| d.as_secs_f64() * 1.0e6)
            .unwrap_or(0.0)
    }
}

/// Guard that records a block when dropped.
pub struct ProfileScope<'a> {
    profiler: &'a Profiler,
    name: &'static str,
    kind: ProfileKind,
    level: u32,
    start: Instant,
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        STACK_LEVEL.with(|level| level.set(level.get().saturating_sub(1)));
        let end = Instant::now();
        if log_enabled!(Level::Trace) {
            let elapsed = end.duration_since(self.start).as_micros();
            log::trace!("{}", scope_message(self.name, Some(elapsed)));
        }
        if !self.profiler.is_enabled() {
            return;
        }
        let record = ProfileRecord {
            name: self.name,
            thread_id: THREAD_ID.with(|id| *id),
            level: self.level,
            kind: self.kind,
            start_us: self.profiler.micros_since_frame_start(self.start),
            end_us: self.profiler.micros_since_frame_start(end),
        };
        self.profiler.push(record);
    }
}

/// Registers a warning when frame budget is exceeded.
pub fn warn_if_frame_budget_exceeded(duration: Duration, budget_ms: f32) {
    if duration.as_secs_f32() * 1000.0 > budget_ms {
        warn!(
            "Frame exceeded budget: {:.2} ms > {:.2} ms",
            duration.as_secs_f32() * 1000.0,
            budget_ms
        );
    }
}

/// Trace line for a scope opening, or closing after `elapsed_us`.
fn scope_message(name: &str, elapsed_us: Option<u128>) -> String {
    match elapsed_us {
        Some(us) => format!("end {name} ({us} us)"),
        None => format!("start {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_messages_are_plain_text() {
        assert_eq!(scope_message("substep", None), "start substep");
        let end = scope_message("substep", Some(42));
        assert_eq!(end, "end substep (42 us)");
        assert!(end.is_ascii());
    }

    #[test]
    fn disabled_profiler_records_nothing() {
        let profiler = Profiler::new();
        profiler.signal_frame_start();
        {
            let _scope = profiler.scope("idle");
        }
        assert_eq!(profiler.record_count(), 0);
    }

    #[test]
    fn nested_scopes_increase_stack_level() {
        let profiler = Profiler::new();
        profiler.enable(true);
        profiler.signal_frame_start();
        {
            let _outer = profiler.scope("outer");
            let _inner = profiler.scope_with_kind("inner", ProfileKind::Parallel);
        }
        let frame_ms = profiler.signal_frame_end();
        assert!(frame_ms >= 0.0);

        let records = profiler.records();
        assert_eq!(records.len(), 2);
        let inner = records.iter().find(|r| r.name == "inner").expect("inner recorded");
        let outer = records.iter().find(|r| r.name == "outer").expect("outer recorded");
        assert_eq!(inner.level, outer.level + 1);
        assert!(outer.start_us <= inner.start_us);
        assert!(inner.end_us <= outer.end_us);
        assert_eq!(inner.info() & 0xff, ProfileKind::Parallel as u32);
        assert_eq!((inner.info() >> 8) & 0xff, inner.level);
    }

    #[test]
    fn frame_start_clears_records() {
        let profiler = Profiler::new();
        profiler.enable(true);
        {
            let _scope = profiler.scope("stale");
        }
        profiler.signal_frame_start();
        assert_eq!(profiler.record_count(), 0);
    }
}
