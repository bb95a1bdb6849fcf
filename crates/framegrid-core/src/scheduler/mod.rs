//! Priority task scheduler ("frame balancer").
//!
//! Every expensive operation in the subsystem is submitted here as a task and
//! run in bounded slices. One [`FrameScheduler::tick`] per simulation frame
//! drains the five priority queues in order, Critical first:
//!
//! - the per-tick task quota is `base_tasks_per_tick` scaled by the adaptive
//!   and performance multipliers (task `weight` counts against it),
//! - each tier may use only its fraction of the frame budget,
//! - draining stops as soon as the frame budget is spent.
//!
//! Tasks that are not reached, or are waiting on dependencies, keep their
//! place in the queue. A failing job is retried on later ticks up to its
//! attempt limit; nothing a job does can abort the tick.

mod adaptive;
mod task;

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

pub use adaptive::{AdaptiveController, PerformanceTrend};
pub use task::{BatchJob, FnJob, Job, Priority, TaskId, TaskRecord, TaskSpec, TaskStatus};

use crate::clock::SharedClock;
use crate::config::{SchedulerConfig, TierTable};
use crate::error::TaskError;

/// Per-category execution statistics. The "worker pool" is accounting only:
/// all work runs on the caller's thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub executed: u64,
    pub failed: u64,
    pub total_ms: f64,
    pub peak_ms: f64,
}

impl WorkerStats {
    pub fn average_ms(&self) -> f64 {
        if self.executed == 0 {
            0.0
        } else {
            self.total_ms / self.executed as f64
        }
    }

    /// Fraction of executions that succeeded.
    pub fn efficiency(&self) -> f64 {
        if self.executed == 0 {
            1.0
        } else {
            (self.executed - self.failed) as f64 / self.executed as f64
        }
    }

    fn record(&mut self, duration_ms: f64, ok: bool) {
        self.executed += 1;
        if !ok {
            self.failed += 1;
        }
        self.total_ms += duration_ms;
        self.peak_ms = self.peak_ms.max(duration_ms);
    }
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerCounters {
    pub added: u64,
    pub executed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub timed_out: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub dependency_waits: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Job executions (successful or not).
    pub executed: usize,
    /// Tasks passed over because dependencies were still queued.
    pub waiting: usize,
    /// Tasks still queued after the tick.
    pub remaining: usize,
    /// Quota computed for this tick.
    pub max_tasks: usize,
    pub elapsed_ms: f64,
    /// The frame budget ran out before the queues did.
    pub budget_exhausted: bool,
}

/// Snapshot for diagnostics consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub queued: TierTable<usize>,
    pub total_queued: usize,
    pub tracked_records: usize,
    pub counters: SchedulerCounters,
    pub average_frame_ms: f64,
    pub peak_frame_ms: f64,
    pub adaptive_multiplier: f64,
    pub performance_multiplier: f64,
    pub trend: PerformanceTrend,
    pub emergency_mode: bool,
    pub memory_mb: f64,
    pub last_tick: TickReport,
    pub workers: HashMap<String, WorkerStats>,
    pub memory_estimate_bytes: usize,
}

enum Outcome {
    /// Not run this tick; stays queued in place.
    Waiting,
    /// Ran and failed with attempts left; stays queued in place.
    Retry,
    /// Ran to a final state (or was force-resolved); leaves the queue.
    Resolved { executed: bool },
}

/// Priority scheduler running [`Job`]s against a context `C`.
pub struct FrameScheduler<C> {
    config: SchedulerConfig,
    clock: SharedClock,
    queues: [VecDeque<TaskId>; 5],
    tasks: HashMap<TaskId, TaskRecord<C>>,
    next_id: u64,
    adaptive: AdaptiveController,
    workers: HashMap<String, WorkerStats>,
    counters: SchedulerCounters,
    last_tick: TickReport,
    last_cleanup: f64,
    shut_down: bool,
}

impl<C> FrameScheduler<C> {
    pub fn new(config: SchedulerConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            adaptive: AdaptiveController::new(&config, now),
            config,
            clock,
            queues: Default::default(),
            tasks: HashMap::new(),
            next_id: 1,
            workers: HashMap::new(),
            counters: SchedulerCounters::default(),
            last_tick: TickReport::default(),
            last_cleanup: now,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue a task. Returns `None` if the scheduler is shut down or the
    /// queue is full and shedding could not make room.
    pub fn add_task(&mut self, spec: TaskSpec<C>) -> Option<TaskId> {
        if self.shut_down {
            log::debug!("add_task after shutdown ignored");
            return None;
        }
        if self.queued_len() >= self.config.max_queue_size {
            self.shed_for(spec.priority);
            if self.queued_len() >= self.config.max_queue_size {
                self.counters.dropped += 1;
                log::warn!(
                    "task queue full ({}), rejecting {:?} task '{}'",
                    self.config.max_queue_size,
                    spec.priority,
                    spec.category
                );
                return None;
            }
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        let now = self.clock.now();
        let timeout = spec.timeout.or(if self.config.default_timeout > 0.0 {
            Some(self.config.default_timeout)
        } else {
            None
        });
        let record = TaskRecord {
            id,
            priority: spec.priority,
            category: spec.category,
            weight: sanitize_weight(spec.weight),
            job: Some(spec.job),
            created_at: now,
            attempts: 0,
            max_attempts: spec
                .max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            timeout,
            dependencies: spec.dependencies,
            status: TaskStatus::Queued,
            last_error: None,
            resolved_at: None,
        };
        self.queues[spec.priority.index()].push_back(id);
        self.tasks.insert(id, record);
        self.counters.added += 1;
        Some(id)
    }

    /// Split `jobs` into tasks of at most `batch_size` items each.
    pub fn add_batch_task(
        &mut self,
        jobs: Vec<Box<dyn Job<C>>>,
        priority: Priority,
        category: &str,
        batch_size: usize,
    ) -> Vec<TaskId>
    where
        C: 'static,
    {
        let batch_size = batch_size.max(1);
        let mut ids = Vec::new();
        let mut jobs = jobs.into_iter().peekable();
        while jobs.peek().is_some() {
            let chunk: Vec<Box<dyn Job<C>>> = jobs.by_ref().take(batch_size).collect();
            let spec = TaskSpec::new(BatchJob::new(chunk), priority).category(category);
            match self.add_task(spec) {
                Some(id) => ids.push(id),
                None => break,
            }
        }
        ids
    }

    /// Remove a queued task from every queue. Returns `false` if the task is
    /// unknown or already resolved.
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        let now = self.clock.now();
        let Some(record) = self.tasks.get_mut(&id) else {
            return false;
        };
        if record.status != TaskStatus::Queued {
            return false;
        }
        record.resolve(TaskStatus::Cancelled, now);
        for queue in &mut self.queues {
            queue.retain(|t| *t != id);
        }
        self.counters.cancelled += 1;
        true
    }

    /// Make `task` wait for `depends_on`. Rejects unknown ids, resolved
    /// tasks, self-dependencies and cycles.
    pub fn set_task_dependency(&mut self, task: TaskId, depends_on: TaskId) -> bool {
        if task == depends_on || !self.tasks.contains_key(&depends_on) {
            return false;
        }
        match self.tasks.get(&task) {
            Some(r) if r.status == TaskStatus::Queued => {}
            _ => return false,
        }
        if self.depends_transitively(depends_on, task) {
            return false;
        }
        if let Some(record) = self.tasks.get_mut(&task) {
            if !record.dependencies.contains(&depends_on) {
                record.dependencies.push(depends_on);
            }
        }
        true
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|r| r.status)
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord<C>> {
        self.tasks.get(&id)
    }

    pub fn queued_len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn queued_in(&self, priority: Priority) -> usize {
        self.queues[priority.index()].len()
    }

    pub fn counters(&self) -> SchedulerCounters {
        self.counters
    }

    /// Feed the memory reading used by emergency-mode detection.
    pub fn report_memory_usage(&mut self, memory_mb: f64) {
        self.adaptive.report_memory(memory_mb);
    }

    pub fn adaptive(&self) -> &AdaptiveController {
        &self.adaptive
    }

    /// Task quota for the next tick.
    pub fn max_tasks_this_tick(&self) -> usize {
        let scaled =
            self.config.base_tasks_per_tick as f64 * self.adaptive.quota_multiplier(&self.config);
        (scaled.round() as usize).max(1)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Run one frame's worth of tasks. `dt` is the host's frame time in
    /// seconds and feeds the adaptive controller.
    pub fn tick(&mut self, ctx: &mut C, dt: f32) -> TickReport {
        if self.shut_down {
            return TickReport::default();
        }
        let start = self.clock.now();
        self.adaptive.record_frame(dt as f64 * 1000.0);
        self.adaptive.maybe_adjust(start, &self.config);

        let max_tasks = self.max_tasks_this_tick();
        let frame_budget = self.config.frame_budget_ms / 1000.0;
        let mut report = TickReport {
            max_tasks,
            ..Default::default()
        };
        let mut units_used = 0.0f64;

        for priority in Priority::ALL {
            if units_used >= max_tasks as f64 || self.clock.now() - start > frame_budget {
                report.budget_exhausted = true;
                break;
            }
            let tier_budget = frame_budget * self.config.tier_budget_fractions.get(priority);
            let tier_start = self.clock.now();
            let pending = std::mem::take(&mut self.queues[priority.index()]);
            let mut kept = VecDeque::with_capacity(pending.len());
            let mut pending = pending.into_iter();

            while let Some(id) = pending.next() {
                let now = self.clock.now();
                if units_used >= max_tasks as f64 || now - start > frame_budget {
                    report.budget_exhausted = true;
                    kept.push_back(id);
                    kept.extend(pending.by_ref());
                    break;
                }
                if now - tier_start > tier_budget {
                    kept.push_back(id);
                    kept.extend(pending.by_ref());
                    break;
                }
                let weight = self.tasks.get(&id).map(|r| r.weight).unwrap_or(0.0);
                match self.run_task(id, ctx) {
                    Outcome::Waiting => {
                        report.waiting += 1;
                        kept.push_back(id);
                    }
                    Outcome::Retry => {
                        report.executed += 1;
                        units_used += weight as f64;
                        kept.push_back(id);
                    }
                    Outcome::Resolved { executed } => {
                        if executed {
                            report.executed += 1;
                            units_used += weight as f64;
                        }
                    }
                }
            }
            self.queues[priority.index()] = kept;
        }

        let end = self.clock.now();
        if end - self.last_cleanup >= self.config.cleanup_interval {
            self.cleanup(end);
            self.last_cleanup = end;
        }

        report.remaining = self.queued_len();
        report.elapsed_ms = (end - start) * 1000.0;
        self.last_tick = report;
        report
    }

    /// Drop resolved task records older than the retention window.
    pub fn cleanup(&mut self, now: f64) -> usize {
        let retention = self.config.task_retention;
        let before = self.tasks.len();
        self.tasks.retain(|_, r| match r.resolved_at {
            Some(at) => now - at < retention,
            None => true,
        });
        before - self.tasks.len()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let queued = TierTable {
            critical: self.queued_in(Priority::Critical),
            high: self.queued_in(Priority::High),
            normal: self.queued_in(Priority::Normal),
            low: self.queued_in(Priority::Low),
            background: self.queued_in(Priority::Background),
        };
        SchedulerMetrics {
            queued,
            total_queued: self.queued_len(),
            tracked_records: self.tasks.len(),
            counters: self.counters,
            average_frame_ms: self.adaptive.average_frame_ms(),
            peak_frame_ms: self.adaptive.peak_frame_ms(),
            adaptive_multiplier: self.adaptive.multiplier(),
            performance_multiplier: self.adaptive.performance_multiplier(&self.config),
            trend: self.adaptive.trend(),
            emergency_mode: self.adaptive.is_emergency(),
            memory_mb: self.adaptive.memory_mb(),
            last_tick: self.last_tick,
            workers: self.workers.clone(),
            memory_estimate_bytes: self.tasks.len() * std::mem::size_of::<TaskRecord<C>>()
                + self.queued_len() * std::mem::size_of::<TaskId>(),
        }
    }

    /// Drop every queued task and record; later ticks do nothing.
    pub fn shutdown(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.tasks.clear();
        self.shut_down = true;
        log::info!("scheduler shut down");
    }

    fn run_task(&mut self, id: TaskId, ctx: &mut C) -> Outcome {
        let now = self.clock.now();
        let Some(record) = self.tasks.get(&id) else {
            return Outcome::Resolved { executed: false };
        };
        if record.status != TaskStatus::Queued {
            return Outcome::Resolved { executed: false };
        }

        if let Some(limit) = record.timeout {
            let age = now - record.created_at;
            if age > limit {
                self.counters.timed_out += 1;
                self.counters.failed += 1;
                log::debug!("{} timed out after {:.3}s", id, age);
                self.fail(id, TaskError::TimedOut { age, limit }, now);
                return Outcome::Resolved { executed: false };
            }
        }

        for dep in record.dependencies.clone() {
            match self.tasks.get(&dep).map(|r| r.status) {
                // Purged records resolved long ago.
                None | Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Queued) => {
                    self.counters.dependency_waits += 1;
                    return Outcome::Waiting;
                }
                Some(_) => {
                    self.counters.failed += 1;
                    self.fail(id, TaskError::DependencyFailed(dep.0), now);
                    return Outcome::Resolved { executed: false };
                }
            }
        }

        let Some(record) = self.tasks.get_mut(&id) else {
            return Outcome::Resolved { executed: false };
        };
        let Some(mut job) = record.job.take() else {
            return Outcome::Resolved { executed: false };
        };
        record.attempts += 1;
        let started = self.clock.now();
        let result = job.execute(ctx);
        let finished = self.clock.now();
        self.counters.executed += 1;

        let duration_ms = (finished - started) * 1000.0;
        self.workers
            .entry(record.category.clone())
            .or_default()
            .record(duration_ms, result.is_ok());

        match result {
            Ok(()) => {
                record.last_error = None;
                record.resolve(TaskStatus::Completed, finished);
                self.counters.completed += 1;
                Outcome::Resolved { executed: true }
            }
            Err(err) => {
                if record.attempts >= record.max_attempts {
                    log::warn!(
                        "{} ('{}') failed after {} attempts: {}",
                        id,
                        record.category,
                        record.attempts,
                        err
                    );
                    record.last_error = Some(err);
                    record.resolve(TaskStatus::Failed, finished);
                    self.counters.failed += 1;
                    Outcome::Resolved { executed: true }
                } else {
                    log::debug!("{} attempt {} failed: {}", id, record.attempts, err);
                    record.last_error = Some(err);
                    record.job = Some(job);
                    self.counters.retried += 1;
                    Outcome::Retry
                }
            }
        }
    }

    fn fail(&mut self, id: TaskId, err: TaskError, now: f64) {
        if let Some(record) = self.tasks.get_mut(&id) {
            record.last_error = Some(err);
            record.resolve(TaskStatus::Failed, now);
        }
    }

    /// Drop Background then Low tasks (oldest first), up to `shed_batch`
    /// of them, to make room for an `incoming` task.
    fn shed_for(&mut self, incoming: Priority) -> usize {
        let now = self.clock.now();
        let mut shed = 0;
        let sheddable = Priority::ALL.into_iter().rev().filter(|p| p.is_sheddable());
        for priority in sheddable {
            while shed < self.config.shed_batch.max(1) {
                let Some(id) = self.queues[priority.index()].pop_front() else {
                    break;
                };
                if let Some(record) = self.tasks.get_mut(&id) {
                    record.resolve(TaskStatus::Dropped, now);
                }
                self.counters.dropped += 1;
                shed += 1;
            }
        }
        if shed > 0 {
            log::debug!("shed {} low-priority tasks to admit {:?} work", shed, incoming);
        }
        shed
    }

    fn depends_transitively(&self, from: TaskId, target: TaskId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(record) = self.tasks.get(&id) {
                stack.extend(record.dependencies.iter().copied());
            }
        }
        false
    }
}

/// Smallest quota share a task can claim; keeps every run counted.
const MIN_TASK_WEIGHT: f32 = 0.01;

fn sanitize_weight(weight: f32) -> f32 {
    if weight.is_finite() {
        weight.max(MIN_TASK_WEIGHT)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    type Log = Vec<&'static str>;

    fn scheduler(config: SchedulerConfig) -> (FrameScheduler<Log>, ManualClock) {
        let clock = ManualClock::new();
        (FrameScheduler::new(config, clock.shared()), clock)
    }

    fn push(label: &'static str) -> impl FnMut(&mut Log) -> Result<(), TaskError> {
        move |log: &mut Log| {
            log.push(label);
            Ok(())
        }
    }

    const FRAME: f32 = 1.0 / 60.0;

    #[test]
    fn critical_runs_before_background() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        sched.add_task(TaskSpec::from_fn(push("bg"), Priority::Background));
        sched.add_task(TaskSpec::from_fn(push("crit"), Priority::Critical));
        sched.add_task(TaskSpec::from_fn(push("normal"), Priority::Normal));
        let mut log = Log::new();
        let report = sched.tick(&mut log, FRAME);
        assert_eq!(log, vec!["crit", "normal", "bg"]);
        assert_eq!(report.executed, 3);
        assert_eq!(report.remaining, 0);
    }

    #[test]
    fn quota_limits_tasks_per_tick_and_preserves_order() {
        let (mut sched, _clock) = scheduler(SchedulerConfig {
            base_tasks_per_tick: 2,
            ..Default::default()
        });
        for label in ["a", "b", "c", "d"] {
            sched.add_task(TaskSpec::from_fn(push(label), Priority::Normal));
        }
        let mut log = Log::new();
        let report = sched.tick(&mut log, FRAME);
        assert_eq!(report.max_tasks, 2);
        assert!(report.budget_exhausted);
        assert_eq!(log, vec!["a", "b"]);
        sched.tick(&mut log, FRAME);
        assert_eq!(log, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn weight_consumes_quota() {
        let (mut sched, _clock) = scheduler(SchedulerConfig {
            base_tasks_per_tick: 3,
            ..Default::default()
        });
        sched.add_task(TaskSpec::from_fn(push("heavy"), Priority::High).weight(3.0));
        sched.add_task(TaskSpec::from_fn(push("light"), Priority::High));
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert_eq!(log, vec!["heavy"]);
    }

    #[test]
    fn degenerate_weights_still_count_against_quota() {
        let (mut sched, _clock) = scheduler(SchedulerConfig {
            base_tasks_per_tick: 1,
            ..Default::default()
        });
        for _ in 0..150 {
            sched.add_task(TaskSpec::from_fn(push("w"), Priority::Normal).weight(0.0));
        }
        let negative = sched
            .add_task(TaskSpec::from_fn(push("neg"), Priority::Low).weight(-4.0))
            .unwrap();
        let nan = sched
            .add_task(TaskSpec::from_fn(push("nan"), Priority::Low).weight(f32::NAN))
            .unwrap();
        assert!(sched.task(negative).map_or(false, |r| r.weight() > 0.0));
        assert_eq!(sched.task(nan).map(|r| r.weight()), Some(1.0));

        let mut log = Log::new();
        let report = sched.tick(&mut log, FRAME);
        assert!(report.budget_exhausted);
        assert!(report.executed < 150);
        assert!(report.remaining > 0);
    }

    #[test]
    fn failing_task_retries_until_success() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let mut calls = 0;
        let id = sched
            .add_task(
                TaskSpec::from_fn(
                    move |log: &mut Log| {
                        calls += 1;
                        if calls < 3 {
                            return Err(TaskError::failed("not yet"));
                        }
                        log.push("done");
                        Ok(())
                    },
                    Priority::Normal,
                )
                .max_attempts(3),
            )
            .unwrap();
        let mut log = Log::new();
        for _ in 0..3 {
            sched.tick(&mut log, FRAME);
        }
        let record = sched.task(id).unwrap();
        assert!(record.is_completed());
        assert_eq!(record.attempts(), 3);
        assert_eq!(sched.counters().retried, 2);
        assert_eq!(log, vec!["done"]);
    }

    #[test]
    fn exhausted_attempts_record_error() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let id = sched
            .add_task(
                TaskSpec::from_fn(|_: &mut Log| Err(TaskError::failed("boom")), Priority::Low)
                    .max_attempts(2),
            )
            .unwrap();
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert_eq!(sched.task_status(id), Some(TaskStatus::Queued));
        sched.tick(&mut log, FRAME);
        let record = sched.task(id).unwrap();
        assert!(record.is_failed());
        assert_eq!(record.error(), Some(&TaskError::failed("boom")));
        assert_eq!(sched.queued_len(), 0);
        let stats = &sched.metrics().workers["general"];
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.efficiency(), 0.0);
    }

    #[test]
    fn timeout_force_fails_without_running() {
        let (mut sched, clock) = scheduler(SchedulerConfig::default());
        let id = sched
            .add_task(TaskSpec::from_fn(push("late"), Priority::Normal).timeout(0.5))
            .unwrap();
        clock.advance(1.0);
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert!(log.is_empty());
        let record = sched.task(id).unwrap();
        assert!(record.is_failed());
        assert!(matches!(record.error(), Some(TaskError::TimedOut { .. })));
        assert_eq!(sched.counters().timed_out, 1);
    }

    #[test]
    fn dependency_waits_in_place() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let first = sched
            .add_task(TaskSpec::from_fn(push("first"), Priority::Low))
            .unwrap();
        let second = sched
            .add_task(TaskSpec::from_fn(push("second"), Priority::High).depends_on(first))
            .unwrap();
        let mut log = Log::new();
        let report = sched.tick(&mut log, FRAME);
        // High tier is drained before Low, so `second` waits one tick.
        assert_eq!(report.waiting, 1);
        assert_eq!(log, vec!["first"]);
        assert_eq!(sched.task_status(second), Some(TaskStatus::Queued));
        sched.tick(&mut log, FRAME);
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn cancelled_dependency_fails_dependent() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let first = sched
            .add_task(TaskSpec::from_fn(push("first"), Priority::Low))
            .unwrap();
        let second = sched
            .add_task(TaskSpec::from_fn(push("second"), Priority::Low))
            .unwrap();
        assert!(sched.set_task_dependency(second, first));
        assert!(sched.cancel_task(first));
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert!(log.is_empty());
        assert_eq!(
            sched.task(second).unwrap().error(),
            Some(&TaskError::DependencyFailed(first.0))
        );
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let a = sched.add_task(TaskSpec::from_fn(push("a"), Priority::Low)).unwrap();
        let b = sched.add_task(TaskSpec::from_fn(push("b"), Priority::Low)).unwrap();
        assert!(sched.set_task_dependency(b, a));
        assert!(!sched.set_task_dependency(a, b));
        assert!(!sched.set_task_dependency(a, a));
        assert!(!sched.set_task_dependency(a, TaskId(999)));
    }

    #[test]
    fn cancel_purges_from_queue() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let id = sched
            .add_task(TaskSpec::from_fn(push("x"), Priority::Normal))
            .unwrap();
        assert!(sched.cancel_task(id));
        assert!(!sched.cancel_task(id));
        assert_eq!(sched.queued_len(), 0);
        assert_eq!(sched.task_status(id), Some(TaskStatus::Cancelled));
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert!(log.is_empty());
    }

    #[test]
    fn overflow_sheds_background_first() {
        let (mut sched, _clock) = scheduler(SchedulerConfig {
            max_queue_size: 3,
            shed_batch: 1,
            ..Default::default()
        });
        let bg = sched
            .add_task(TaskSpec::from_fn(push("bg"), Priority::Background))
            .unwrap();
        let low = sched
            .add_task(TaskSpec::from_fn(push("low"), Priority::Low))
            .unwrap();
        sched.add_task(TaskSpec::from_fn(push("n"), Priority::Normal));
        let crit = sched.add_task(TaskSpec::from_fn(push("crit"), Priority::Critical));
        assert!(crit.is_some());
        assert_eq!(sched.task_status(bg), Some(TaskStatus::Dropped));
        assert_eq!(sched.task_status(low), Some(TaskStatus::Queued));
        assert_eq!(sched.counters().dropped, 1);
    }

    #[test]
    fn overflow_without_sheddable_tasks_rejects() {
        let (mut sched, _clock) = scheduler(SchedulerConfig {
            max_queue_size: 2,
            ..Default::default()
        });
        sched.add_task(TaskSpec::from_fn(push("a"), Priority::High));
        sched.add_task(TaskSpec::from_fn(push("b"), Priority::Normal));
        assert!(sched
            .add_task(TaskSpec::from_fn(push("c"), Priority::Critical))
            .is_none());
        assert_eq!(sched.counters().dropped, 1);
        assert_eq!(sched.queued_len(), 2);
    }

    #[test]
    fn overflow_sheds_oldest_regardless_of_incoming_priority() {
        let (mut sched, _clock) = scheduler(SchedulerConfig {
            max_queue_size: 1,
            shed_batch: 1,
            ..Default::default()
        });
        let first = sched
            .add_task(TaskSpec::from_fn(push("a"), Priority::Background))
            .unwrap();
        let second = sched
            .add_task(TaskSpec::from_fn(push("b"), Priority::Background))
            .unwrap();
        assert_eq!(sched.task_status(first), Some(TaskStatus::Dropped));
        assert_eq!(sched.task_status(second), Some(TaskStatus::Queued));

        let third = sched
            .add_task(TaskSpec::from_fn(push("c"), Priority::Low))
            .unwrap();
        assert_eq!(sched.task_status(second), Some(TaskStatus::Dropped));
        assert_eq!(sched.task_status(third), Some(TaskStatus::Queued));
        assert_eq!(sched.counters().dropped, 2);
        assert_eq!(sched.queued_len(), 1);
    }

    #[test]
    fn batch_task_chunks_jobs() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        let jobs: Vec<Box<dyn Job<Log>>> = (0..5)
            .map(|_| Box::new(FnJob(push("item"))) as Box<dyn Job<Log>>)
            .collect();
        let ids = sched.add_batch_task(jobs, Priority::Normal, "batch", 2);
        assert_eq!(ids.len(), 3);
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert_eq!(log.len(), 5);
        assert!(ids
            .iter()
            .all(|id| sched.task_status(*id) == Some(TaskStatus::Completed)));
    }

    #[test]
    fn resolved_records_are_purged_after_retention() {
        let (mut sched, clock) = scheduler(SchedulerConfig {
            task_retention: 2.0,
            cleanup_interval: 1.0,
            ..Default::default()
        });
        let id = sched
            .add_task(TaskSpec::from_fn(push("x"), Priority::Normal))
            .unwrap();
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert_eq!(sched.task_status(id), Some(TaskStatus::Completed));
        clock.advance(3.0);
        sched.tick(&mut log, FRAME);
        assert_eq!(sched.task_status(id), None);
    }

    #[test]
    fn shutdown_stops_everything() {
        let (mut sched, _clock) = scheduler(SchedulerConfig::default());
        sched.add_task(TaskSpec::from_fn(push("x"), Priority::Normal));
        sched.shutdown();
        assert!(sched.is_shut_down());
        assert_eq!(sched.queued_len(), 0);
        assert!(sched
            .add_task(TaskSpec::from_fn(push("y"), Priority::Normal))
            .is_none());
        let mut log = Log::new();
        assert_eq!(sched.tick(&mut log, FRAME), TickReport::default());
        assert!(log.is_empty());
    }

    #[test]
    fn memory_emergency_shrinks_quota() {
        let (mut sched, clock) = scheduler(SchedulerConfig::default());
        let normal_quota = sched.max_tasks_this_tick();
        sched.report_memory_usage(sched.config().memory_critical_mb * 2.0);
        clock.advance(sched.config().adaptive_interval);
        let mut log = Log::new();
        sched.tick(&mut log, FRAME);
        assert!(sched.metrics().emergency_mode);
        assert!(sched.max_tasks_this_tick() < normal_quota);
        let expected = (sched.config().base_tasks_per_tick as f64
            * sched.config().emergency_multiplier)
            .round() as usize;
        assert_eq!(sched.max_tasks_this_tick(), expected.max(1));
    }
}
