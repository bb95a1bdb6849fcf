//! Error types.
//!
//! None of these ever escape a tick: task and callback errors are captured on
//! the owning record, path errors on the path request, config errors are
//! returned from validation.

use thiserror::Error;

/// Failure reported by (or imposed on) a scheduled task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// The job itself returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task was older than its timeout when it was next considered.
    #[error("task timed out after {age:.3}s (limit {limit:.3}s)")]
    TimedOut { age: f64, limit: f64 },

    /// A task this one depends on failed or was cancelled.
    #[error("dependency {0} did not complete")]
    DependencyFailed(u64),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }
}

/// Failure reported by a collision callback.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("collision callback failed: {0}")]
pub struct CallbackError(pub String);

/// Why a path request produced no waypoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("start position is outside the navigation grid")]
    StartOutsideGrid,

    #[error("end position is outside the navigation grid")]
    EndOutsideGrid,

    #[error("start cell is not walkable")]
    StartBlocked,

    #[error("end cell is not walkable")]
    EndBlocked,

    #[error("open list exhausted without reaching the goal")]
    NoPath,

    #[error("search exceeded {0} iterations")]
    IterationLimit(usize),

    #[error("request was waiting longer than its timeout")]
    Timeout,

    #[error("planner is shut down")]
    ShutDown,
}

/// Configuration problem found by [`crate::config::SubsystemConfig::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("{field} must be positive (got {value})")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be within {min}..={max} (got {value})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("tier budget fractions sum to {0:.3}, expected at most 1.0")]
    TierFractionsExceedBudget(f64),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}
