//! framegrid - frame-budgeted spatial simulation subsystem
//!
//! Four components share one per-tick time budget:
//! - **SpatialIndex**: uniform grid plus octree over caller-identified entities
//! - **CollisionDetector**: broad phase through the index, tiered re-check
//!   rates, sleep/wake bookkeeping and pluggable narrow phase
//! - **PathPlanner**: 26-connected grid A* with an optional two-level cluster
//!   hierarchy and line-of-sight smoothing
//! - **FrameScheduler**: prioritized task queues drained within a frame budget
//!
//! [`simulation::Simulation`] owns one of each and is the host-facing handle.
//!
//! # Example
//!
//! ```rust,no_run
//! use framegrid_core::prelude::*;
//!
//! let mut sim = Simulation::new(SubsystemConfig::default(), SystemClock::shared());
//!
//! let crate_box = Body::new(1, Vec3::new(0.0, 0.0, 0.0), Vec3::splat(2.0));
//! sim.register_object(&crate_box, false, CollisionOptions::default());
//!
//! let request = sim.find_path(Vec3::ZERO, Vec3::new(40.0, 0.0, 0.0), 0.5, PathOptions::default());
//!
//! loop {
//!     sim.tick(1.0 / 60.0); // 60 FPS
//!     if sim.path_status(request) != Some(PathStatus::Pending) {
//!         break;
//!     }
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod collision;
pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod metrics;
pub mod pathfinding;
pub mod scheduler;
pub mod simulation;
pub mod spatial;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::collision::{CollisionEvent, CollisionOptions, NarrowPhase};
    pub use crate::config::SubsystemConfig;
    pub use crate::entity::{Body, EntityId, SpatialObject};
    pub use crate::error::{CallbackError, PathError, TaskError};
    pub use crate::geometry::{Aabb, Vec3};
    pub use crate::metrics::SubsystemMetrics;
    pub use crate::pathfinding::{PathOptions, PathRequestId, PathStatus};
    pub use crate::scheduler::{Priority, TaskId, TaskSpec, TaskStatus};
    pub use crate::simulation::{SimTask, Simulation, Systems};
}
