//! Simulation context - owns the scheduler and one of each component.
//!
//! Components never run their own loops. Each tick the simulation makes sure
//! its recurring tasks are queued and hands the frame to the scheduler:
//!
//! - spatial refresh (Critical): applies a batch of enqueued updates,
//! - collision scan (High): forwards moved entities, then scans,
//! - path requests (Normal): solves queued path requests,
//! - maintenance (Background): drops long-empty grid cells.

use crate::clock::SharedClock;
use crate::collision::{
    CollisionCallback, CollisionDetector, CollisionEvent, CollisionGroup, CollisionOptions,
};
use crate::config::SubsystemConfig;
use crate::entity::{EntityId, SpatialObject};
use crate::error::{PathError, TaskError};
use crate::geometry::Vec3;
use crate::metrics::SubsystemMetrics;
use crate::pathfinding::{PathOptions, PathPlanner, PathRequest, PathRequestId, PathStatus};
use crate::scheduler::{FrameScheduler, Job, Priority, TaskId, TaskSpec, TaskStatus, TickReport};
use crate::spatial::{NearbyHit, RayHit, SpatialIndex};

/// The components scheduled jobs run against.
pub struct Systems {
    pub spatial: SpatialIndex,
    pub collision: CollisionDetector,
    pub paths: PathPlanner,
}

impl Systems {
    /// Hand entities re-indexed since the last call to the collision
    /// detector.
    pub fn sync_moved(&mut self) {
        let moved = self.spatial.drain_moved();
        self.collision.on_objects_moved(&moved);
    }
}

/// Task type accepted by [`Simulation::add_task`].
pub type SimTask = TaskSpec<Systems>;

#[derive(Default)]
struct RecurringTasks {
    refresh: Option<TaskId>,
    collision: Option<TaskId>,
    paths: Option<TaskId>,
    maintenance: Option<TaskId>,
}

/// Main simulation handle. Independent instances share nothing.
pub struct Simulation {
    systems: Systems,
    scheduler: FrameScheduler<Systems>,
    config: SubsystemConfig,
    clock: SharedClock,
    recurring: RecurringTasks,
    frame: u64,
    last_maintenance: f64,
    shut_down: bool,
}

impl Simulation {
    /// Build every component from `config`. Configuration problems are
    /// logged; construction still succeeds with the values given.
    pub fn new(config: SubsystemConfig, clock: SharedClock) -> Self {
        for problem in config.validate() {
            log::warn!("config: {}", problem);
        }
        let now = clock.now();
        let systems = Systems {
            spatial: SpatialIndex::new(config.spatial.clone(), clock.clone()),
            collision: CollisionDetector::new(config.collision.clone(), clock.clone()),
            paths: PathPlanner::new(config.pathfinding.clone(), clock.clone()),
        };
        let scheduler = FrameScheduler::new(config.scheduler.clone(), clock.clone());
        log::info!("simulation created");
        Self {
            systems,
            scheduler,
            config,
            clock,
            recurring: RecurringTasks::default(),
            frame: 0,
            last_maintenance: now,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.systems.spatial
    }

    pub fn collision(&self) -> &CollisionDetector {
        &self.systems.collision
    }

    pub fn paths(&self) -> &PathPlanner {
        &self.systems.paths
    }

    pub fn scheduler(&self) -> &FrameScheduler<Systems> {
        &self.scheduler
    }

    /// Direct component access for hosts that drive them between ticks.
    pub fn systems_mut(&mut self) -> &mut Systems {
        &mut self.systems
    }

    /// Ticks run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // Entity lifecycle

    /// Index an object and register it for collision checks.
    pub fn register_object<O: SpatialObject + ?Sized>(
        &mut self,
        obj: &O,
        is_static: bool,
        options: CollisionOptions,
    ) -> bool {
        if !self.systems.spatial.add_object(obj, is_static) {
            return false;
        }
        if !self.systems.collision.register_object(obj.id(), is_static, options) {
            self.systems.spatial.remove_object(obj.id());
            return false;
        }
        true
    }

    /// Re-index immediately.
    pub fn update_object<O: SpatialObject + ?Sized>(&mut self, obj: &O) -> bool {
        let updated = self.systems.spatial.update_object(obj);
        self.systems.sync_moved();
        updated
    }

    /// Re-index on a later tick, as part of the spatial refresh batch.
    pub fn enqueue_update<O: SpatialObject + ?Sized>(&mut self, obj: &O) -> bool {
        self.systems.spatial.enqueue_update(obj)
    }

    pub fn remove_object(&mut self, id: EntityId) -> bool {
        self.systems.collision.unregister_object(id);
        self.systems.spatial.remove_object(id)
    }

    /// Remove every object the host reports as gone. Returns the removed ids.
    pub fn prune_dead(&mut self, alive: impl FnMut(EntityId) -> bool) -> Vec<EntityId> {
        let removed = self.systems.spatial.retain_alive(alive);
        for id in &removed {
            self.systems.collision.unregister_object(*id);
        }
        removed
    }

    // Queries

    pub fn nearby_objects(
        &mut self,
        point: Vec3,
        radius: f32,
        include_static: bool,
    ) -> Vec<NearbyHit> {
        self.systems.spatial.nearby_objects(point, radius, include_static)
    }

    pub fn objects_in_region(&mut self, min: Vec3, max: Vec3) -> Vec<EntityId> {
        self.systems.spatial.objects_in_region(min, max)
    }

    pub fn raycast(&mut self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<RayHit> {
        self.systems.spatial.raycast(origin, direction, max_distance)
    }

    pub fn check_collision(&mut self, a: EntityId, b: EntityId) -> bool {
        let Systems {
            spatial, collision, ..
        } = &mut self.systems;
        collision.check_collision(spatial, a, b)
    }

    pub fn on_collision(&mut self, id: EntityId, callback: CollisionCallback) -> bool {
        self.systems.collision.on_collision(id, callback)
    }

    pub fn ignore_group_pair(&mut self, a: CollisionGroup, b: CollisionGroup) {
        self.systems.collision.ignore_group_pair(a, b);
    }

    pub fn drain_collision_events(&mut self) -> Vec<CollisionEvent> {
        self.systems.collision.drain_events()
    }

    // Pathfinding

    pub fn find_path(
        &mut self,
        start: Vec3,
        end: Vec3,
        agent_radius: f32,
        options: PathOptions,
    ) -> PathRequestId {
        self.systems.paths.find_path(start, end, agent_radius, options)
    }

    pub fn path_request(&self, id: PathRequestId) -> Option<&PathRequest> {
        self.systems.paths.request(id)
    }

    pub fn path_status(&self, id: PathRequestId) -> Option<PathStatus> {
        self.systems.paths.status(id)
    }

    pub fn cancel_path(&mut self, id: PathRequestId) -> bool {
        self.systems.paths.cancel(id)
    }

    /// Solve a path now instead of waiting for the scheduler.
    pub fn compute_path(
        &mut self,
        start: Vec3,
        end: Vec3,
        agent_radius: f32,
        options: &PathOptions,
    ) -> Result<Vec<Vec3>, PathError> {
        self.systems.paths.compute_path(start, end, agent_radius, options)
    }

    /// Block nav cells under every static object and rebuild the cluster
    /// hierarchy. Returns the number of blocked cells.
    pub fn rebuild_navigation(&mut self) -> usize {
        let Systems { spatial, paths, .. } = &mut self.systems;
        paths.rebuild_nav_from_spatial(spatial)
    }

    // Scheduling

    pub fn add_task(&mut self, spec: SimTask) -> Option<TaskId> {
        self.scheduler.add_task(spec)
    }

    pub fn add_batch_task(
        &mut self,
        jobs: Vec<Box<dyn Job<Systems>>>,
        priority: Priority,
        category: &str,
        batch_size: usize,
    ) -> Vec<TaskId> {
        self.scheduler.add_batch_task(jobs, priority, category, batch_size)
    }

    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.scheduler.cancel_task(id)
    }

    pub fn set_task_dependency(&mut self, task: TaskId, depends_on: TaskId) -> bool {
        self.scheduler.set_task_dependency(task, depends_on)
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.scheduler.task_status(id)
    }

    /// Feed the host's memory reading into the adaptive controller.
    pub fn report_memory_usage(&mut self, memory_mb: f64) {
        self.scheduler.report_memory_usage(memory_mb);
    }

    /// Advance one frame. `dt` is the host's frame time in seconds.
    pub fn tick(&mut self, dt: f32) -> TickReport {
        if self.shut_down {
            return TickReport::default();
        }
        self.frame += 1;
        self.queue_recurring();
        self.scheduler.tick(&mut self.systems, dt)
    }

    pub fn metrics(&self) -> SubsystemMetrics {
        SubsystemMetrics {
            frame: self.frame,
            time: self.clock.now(),
            spatial: self.systems.spatial.metrics(),
            collision: self.systems.collision.metrics(),
            pathfinding: self.systems.paths.metrics(),
            scheduler: self.scheduler.metrics(),
        }
    }

    /// Shut down every component. Later calls are no-ops or fail.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.scheduler.shutdown();
        self.systems.collision.shutdown();
        self.systems.paths.shutdown();
        self.systems.spatial.shutdown();
        self.recurring = RecurringTasks::default();
        self.shut_down = true;
        log::info!("simulation shut down after {} frames", self.frame);
    }

    fn queue_recurring(&mut self) {
        let batch = self.config.spatial.update_batch_size;
        requeue(&mut self.scheduler, &mut self.recurring.refresh, || {
            TaskSpec::from_fn(
                move |s: &mut Systems| -> Result<(), TaskError> {
                    s.spatial.process_pending_updates(batch);
                    Ok(())
                },
                Priority::Critical,
            )
            .category("spatial_refresh")
        });
        requeue(&mut self.scheduler, &mut self.recurring.collision, || {
            TaskSpec::from_fn(
                |s: &mut Systems| -> Result<(), TaskError> {
                    s.sync_moved();
                    s.collision.scan(&s.spatial);
                    Ok(())
                },
                Priority::High,
            )
            .category("collision_scan")
        });
        requeue(&mut self.scheduler, &mut self.recurring.paths, || {
            TaskSpec::from_fn(
                |s: &mut Systems| -> Result<(), TaskError> {
                    s.paths.process_pending();
                    Ok(())
                },
                Priority::Normal,
            )
            .category("path_requests")
        });

        let now = self.clock.now();
        if now - self.last_maintenance >= self.config.scheduler.cleanup_interval {
            self.last_maintenance = now;
            requeue(&mut self.scheduler, &mut self.recurring.maintenance, || {
                TaskSpec::from_fn(
                    |s: &mut Systems| -> Result<(), TaskError> {
                        let cleaned = s.spatial.cleanup_empty_cells();
                        if cleaned > 0 {
                            log::debug!("maintenance: {} empty cells dropped", cleaned);
                        }
                        Ok(())
                    },
                    Priority::Background,
                )
                .category("maintenance")
            });
        }
    }
}

/// Queue a fresh copy of a recurring task unless the previous one is still
/// waiting.
fn requeue(
    scheduler: &mut FrameScheduler<Systems>,
    slot: &mut Option<TaskId>,
    make: impl FnOnce() -> SimTask,
) {
    let waiting = slot
        .and_then(|id| scheduler.task_status(id))
        .is_some_and(|status| status == TaskStatus::Queued);
    if !waiting {
        *slot = scheduler.add_task(make().max_attempts(1));
    }
}
