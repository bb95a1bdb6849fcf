//! Task records and the [`Job`] trait that scheduled work implements.

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Scheduling tier. Lower tiers are only reached after higher ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Priority {
    /// Drain order, highest first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Tiers that overflow shedding may drop.
    pub fn is_sheddable(self) -> bool {
        matches!(self, Priority::Low | Priority::Background)
    }
}

/// Scheduler-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A unit of work run against a context `C` (the simulation's systems).
pub trait Job<C> {
    fn execute(&mut self, ctx: &mut C) -> Result<(), TaskError>;
}

/// Adapter turning a closure into a [`Job`].
pub struct FnJob<F>(pub F);

impl<C, F> Job<C> for FnJob<F>
where
    F: FnMut(&mut C) -> Result<(), TaskError>,
{
    fn execute(&mut self, ctx: &mut C) -> Result<(), TaskError> {
        (self.0)(ctx)
    }
}

/// Runs a list of jobs in order. After a failure the next attempt resumes at
/// the failed item, so finished items never run twice.
pub struct BatchJob<C> {
    items: Vec<Box<dyn Job<C>>>,
    next: usize,
}

impl<C> BatchJob<C> {
    pub fn new(items: Vec<Box<dyn Job<C>>>) -> Self {
        Self { items, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<C> Job<C> for BatchJob<C> {
    fn execute(&mut self, ctx: &mut C) -> Result<(), TaskError> {
        while self.next < self.items.len() {
            self.items[self.next].execute(ctx)?;
            self.next += 1;
        }
        Ok(())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Completed,
    Failed,
    Cancelled,
    /// Shed from a full queue; never retried.
    Dropped,
}

impl TaskStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, TaskStatus::Queued)
    }
}

/// Everything needed to enqueue a task.
pub struct TaskSpec<C> {
    pub job: Box<dyn Job<C>>,
    pub priority: Priority,
    pub category: String,
    /// Share of the per-tick task quota this task consumes.
    pub weight: f32,
    /// Falls back to the scheduler default when `None`.
    pub max_attempts: Option<u32>,
    /// Seconds since creation after which the task is force-failed.
    /// Falls back to the scheduler default when `None`.
    pub timeout: Option<f64>,
    pub dependencies: Vec<TaskId>,
}

impl<C> TaskSpec<C> {
    pub fn new(job: impl Job<C> + 'static, priority: Priority) -> Self {
        Self {
            job: Box::new(job),
            priority,
            category: "general".to_string(),
            weight: 1.0,
            max_attempts: None,
            timeout: None,
            dependencies: Vec::new(),
        }
    }

    pub fn from_fn<F>(f: F, priority: Priority) -> Self
    where
        F: FnMut(&mut C) -> Result<(), TaskError> + 'static,
    {
        Self::new(FnJob(f), priority)
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn depends_on(mut self, task: TaskId) -> Self {
        self.dependencies.push(task);
        self
    }
}

/// Scheduler-side bookkeeping for one task.
pub struct TaskRecord<C> {
    pub(crate) id: TaskId,
    pub(crate) priority: Priority,
    pub(crate) category: String,
    pub(crate) weight: f32,
    pub(crate) job: Option<Box<dyn Job<C>>>,
    pub(crate) created_at: f64,
    pub(crate) attempts: u32,
    pub(crate) max_attempts: u32,
    pub(crate) timeout: Option<f64>,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) status: TaskStatus,
    pub(crate) last_error: Option<TaskError>,
    pub(crate) resolved_at: Option<f64>,
}

impl<C> TaskRecord<C> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    /// Error from the most recent failed attempt, or the reason the task was
    /// force-failed.
    pub fn error(&self) -> Option<&TaskError> {
        self.last_error.as_ref()
    }

    pub(crate) fn resolve(&mut self, status: TaskStatus, now: f64) {
        self.status = status;
        self.resolved_at = Some(now);
        self.job = None;
    }
}
