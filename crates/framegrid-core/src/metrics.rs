//! Aggregated diagnostics for external telemetry consumers.

use serde::{Deserialize, Serialize};

use crate::collision::CollisionMetrics;
use crate::pathfinding::PathMetrics;
use crate::scheduler::SchedulerMetrics;
use crate::spatial::SpatialMetrics;

/// One snapshot of every component's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemMetrics {
    /// Ticks run so far.
    pub frame: u64,
    /// Clock time of the snapshot, in seconds.
    pub time: f64,
    pub spatial: SpatialMetrics,
    pub collision: CollisionMetrics,
    pub pathfinding: PathMetrics,
    pub scheduler: SchedulerMetrics,
}

impl SubsystemMetrics {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One-line summary for periodic log output.
    pub fn summary(&self) -> String {
        format!(
            concat!(
                "frame {} | objects {} | awake {} sleeping {} | collisions {} | ",
                "paths ok {} failed {} pending {} | queued {} dropped {} | avg frame {:.2}ms"
            ),
            self.frame,
            self.spatial.objects,
            self.collision.awake,
            self.collision.sleeping,
            self.collision.collisions_detected,
            self.pathfinding.succeeded,
            self.pathfinding.failed,
            self.pathfinding.pending,
            self.scheduler.total_queued,
            self.scheduler.counters.dropped,
            self.scheduler.average_frame_ms,
        )
    }
}
