//! Grid pathfinding with an optional cluster hierarchy for long paths.
//!
//! Requests are queued by [`PathPlanner::find_path`] and solved a few per
//! tick by [`PathPlanner::process_pending`], bounded by a request count and a
//! time budget. Each admitted request is solved to completion; there is no
//! incremental search across ticks.
//!
//! Grid search is 26-connected with a Manhattan heuristic, which overestimates
//! once diagonals are allowed. Paths come out near-optimal, not optimal.

mod astar;
mod hierarchy;
mod navgrid;
mod smoothing;

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use astar::{search, Search};
pub use hierarchy::{Cluster, ClusterHierarchy, ClusterId, Entrance, HierarchyStats};
pub use navgrid::{CellBox, GridPos, NavGrid, STEP_COSTS};
pub use smoothing::smooth_path;

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use crate::config::PathConfig;
use crate::error::PathError;
use crate::geometry::Vec3;
use crate::spatial::SpatialIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathRequestId(pub u64);

impl fmt::Display for PathRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    Pending,
    /// Answered from the path cache at submission.
    Cached,
    Success,
    Failed,
    Timeout,
}

impl PathStatus {
    pub fn is_resolved(self) -> bool {
        self != PathStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    pub smooth: bool,
    /// Let long paths go through the cluster hierarchy.
    pub allow_hierarchical: bool,
    /// Overrides `PathConfig::max_search_iterations`.
    pub max_iterations: Option<usize>,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            smooth: true,
            allow_hierarchical: true,
            max_iterations: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathRequest {
    pub id: PathRequestId,
    pub start: Vec3,
    pub end: Vec3,
    pub agent_radius: f32,
    pub options: PathOptions,
    pub status: PathStatus,
    pub waypoints: Vec<Vec3>,
    pub error: Option<PathError>,
    pub created_at: f64,
    pub resolved_at: Option<f64>,
    pub used_hierarchy: bool,
}

impl PathRequest {
    fn resolve(&mut self, status: PathStatus, now: f64) {
        self.status = status;
        self.resolved_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMetrics {
    pub requests: u64,
    pub cache_hits: u64,
    pub computed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub hierarchical: u64,
    pub hierarchy_fallbacks: u64,
    pub pending: usize,
    pub tracked_requests: usize,
    pub cache_entries: usize,
    pub cache_hit_rate: f64,
    pub total_search_ms: f64,
    pub average_search_ms: f64,
    pub budget_exhausted_ticks: u64,
    pub walkable_cells: usize,
    pub hierarchy: HierarchyStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PathKey {
    start: [i32; 3],
    end: [i32; 3],
    radius: i32,
    smooth: bool,
}

/// Grid A* between two cells, optionally confined to `within`.
pub(crate) fn grid_search(
    grid: &NavGrid,
    from: GridPos,
    to: GridPos,
    clearance: i32,
    within: Option<&CellBox>,
    max_iterations: usize,
) -> Result<Search<GridPos>, PathError> {
    astar::search(
        from,
        to,
        |p, out| grid.neighbors(p, clearance, within, out),
        |p| p.manhattan(to) as f32 * STEP_COSTS[1],
        max_iterations,
    )
}

pub struct PathPlanner {
    config: PathConfig,
    clock: SharedClock,
    grid: NavGrid,
    hierarchy: Option<ClusterHierarchy>,
    requests: HashMap<PathRequestId, PathRequest>,
    queue: VecDeque<PathRequestId>,
    cache: TtlCache<PathKey, Vec<Vec3>>,
    next_id: u64,
    metrics: PathMetrics,
    shut_down: bool,
}

impl PathPlanner {
    /// Planner over a fully walkable grid spanning `nav_min..nav_max`.
    pub fn new(config: PathConfig, clock: SharedClock) -> Self {
        let grid = NavGrid::new(config.nav_min, config.nav_max, config.nav_cell_size);
        let hierarchy = build_hierarchy(&config, &grid);
        log::debug!(
            "path planner: {:?} cells, hierarchy {}",
            grid.dims(),
            if hierarchy.is_some() { "on" } else { "off" }
        );
        Self {
            cache: TtlCache::new(config.cache_ttl, config.cache_capacity),
            requests: HashMap::new(),
            queue: VecDeque::new(),
            next_id: 1,
            metrics: PathMetrics::default(),
            shut_down: false,
            grid,
            hierarchy,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    pub fn nav_grid(&self) -> &NavGrid {
        &self.grid
    }

    /// Mutable grid access. Drops every cached path and sub-path; the
    /// hierarchy's entrances stay as built until [`Self::rebuild_hierarchy`].
    pub fn nav_grid_mut(&mut self) -> &mut NavGrid {
        self.clear_caches();
        &mut self.grid
    }

    pub fn hierarchy(&self) -> Option<&ClusterHierarchy> {
        self.hierarchy.as_ref()
    }

    pub fn rebuild_hierarchy(&mut self) {
        self.hierarchy = build_hierarchy(&self.config, &self.grid);
        self.cache.clear();
    }

    /// Re-derive walkability from the static objects in `spatial`, then
    /// rebuild the hierarchy. Returns the number of blocked cells.
    pub fn rebuild_nav_from_spatial(&mut self, spatial: &SpatialIndex) -> usize {
        let blocked = self.grid.rebuild_from_spatial(spatial);
        self.rebuild_hierarchy();
        log::debug!("nav grid rebuilt: {} cells blocked", blocked);
        blocked
    }

    /// Submit a request. Answered immediately from the cache when possible,
    /// otherwise queued for [`Self::process_pending`].
    pub fn find_path(
        &mut self,
        start: Vec3,
        end: Vec3,
        agent_radius: f32,
        options: PathOptions,
    ) -> PathRequestId {
        let id = PathRequestId(self.next_id);
        self.next_id += 1;
        self.metrics.requests += 1;
        let now = self.clock.now();
        let mut request = PathRequest {
            id,
            start,
            end,
            agent_radius,
            options,
            status: PathStatus::Pending,
            waypoints: Vec::new(),
            error: None,
            created_at: now,
            resolved_at: None,
            used_hierarchy: false,
        };

        if self.shut_down {
            request.error = Some(PathError::ShutDown);
            request.resolve(PathStatus::Failed, now);
            self.metrics.failed += 1;
        } else {
            let key = self.key(start, end, agent_radius, &request.options);
            if let Some(waypoints) = self.cache.get(&key, now) {
                request.waypoints = waypoints.clone();
                request.resolve(PathStatus::Cached, now);
                self.metrics.cache_hits += 1;
            } else {
                self.queue.push_back(id);
            }
        }
        self.requests.insert(id, request);
        id
    }

    /// Solve queued requests within this tick's budget. Requests that waited
    /// past `request_timeout` are failed first. Returns the number solved.
    pub fn process_pending(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        let start = self.clock.now();
        self.expire_waiting(start);
        self.purge_resolved(start);

        let budget = self.config.path_budget_ms / 1000.0;
        let mut solved = 0;
        while solved < self.config.max_paths_per_tick {
            if solved > 0 && self.clock.now() - start > budget {
                self.metrics.budget_exhausted_ticks += 1;
                break;
            }
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some((from, to, radius, options)) = self
                .requests
                .get(&id)
                .filter(|r| r.status == PathStatus::Pending)
                .map(|r| (r.start, r.end, r.agent_radius, r.options.clone()))
            else {
                continue;
            };

            let (result, used_hierarchy) = self.solve(from, to, radius, &options);
            let now = self.clock.now();
            if let Ok(ref waypoints) = result {
                let key = self.key(from, to, radius, &options);
                self.cache.insert(key, waypoints.clone(), now);
            }
            if let Some(request) = self.requests.get_mut(&id) {
                request.used_hierarchy = used_hierarchy;
                match result {
                    Ok(waypoints) => {
                        request.waypoints = waypoints;
                        request.resolve(PathStatus::Success, now);
                    }
                    Err(e) => {
                        log::debug!("{} failed: {}", id, e);
                        request.error = Some(e);
                        request.resolve(PathStatus::Failed, now);
                    }
                }
            }
            solved += 1;
        }
        solved
    }

    /// Solve immediately, bypassing the queue and the cache.
    pub fn compute_path(
        &mut self,
        start: Vec3,
        end: Vec3,
        agent_radius: f32,
        options: &PathOptions,
    ) -> Result<Vec<Vec3>, PathError> {
        self.solve(start, end, agent_radius, options).0
    }

    /// Cancel a pending request. The record is dropped.
    pub fn cancel(&mut self, id: PathRequestId) -> bool {
        match self.requests.get(&id) {
            Some(r) if r.status == PathStatus::Pending => {
                self.requests.remove(&id);
                self.queue.retain(|q| *q != id);
                self.metrics.cancelled += 1;
                true
            }
            _ => false,
        }
    }

    pub fn request(&self, id: PathRequestId) -> Option<&PathRequest> {
        self.requests.get(&id)
    }

    pub fn status(&self, id: PathRequestId) -> Option<PathStatus> {
        self.requests.get(&id).map(|r| r.status)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> PathMetrics {
        let computed = self.metrics.computed;
        PathMetrics {
            pending: self.queue.len(),
            tracked_requests: self.requests.len(),
            cache_entries: self.cache.len(),
            cache_hit_rate: self.cache.hit_rate(),
            average_search_ms: if computed > 0 {
                self.metrics.total_search_ms / computed as f64
            } else {
                0.0
            },
            walkable_cells: self.grid.walkable_count(),
            hierarchy: self
                .hierarchy
                .as_ref()
                .map(ClusterHierarchy::stats)
                .unwrap_or_default(),
            ..self.metrics
        }
    }

    /// Fail every pending request and refuse new work.
    pub fn shutdown(&mut self) {
        let now = self.clock.now();
        for id in self.queue.drain(..) {
            if let Some(request) = self.requests.get_mut(&id) {
                request.error = Some(PathError::ShutDown);
                request.resolve(PathStatus::Failed, now);
            }
        }
        self.cache.clear();
        if let Some(h) = self.hierarchy.as_mut() {
            h.clear_sub_paths();
        }
        self.shut_down = true;
        log::info!("path planner shut down");
    }

    fn solve(
        &mut self,
        start: Vec3,
        end: Vec3,
        agent_radius: f32,
        options: &PathOptions,
    ) -> (Result<Vec<Vec3>, PathError>, bool) {
        if self.shut_down {
            return (Err(PathError::ShutDown), false);
        }
        let started = self.clock.now();
        let mut used_hierarchy = false;
        let result = self.solve_cells(start, end, agent_radius, options, &mut used_hierarchy);
        self.metrics.computed += 1;
        self.metrics.total_search_ms += (self.clock.now() - started) * 1000.0;
        match &result {
            Ok(_) => self.metrics.succeeded += 1,
            Err(_) => self.metrics.failed += 1,
        }
        if used_hierarchy {
            self.metrics.hierarchical += 1;
        }
        (result, used_hierarchy)
    }

    fn solve_cells(
        &mut self,
        start: Vec3,
        end: Vec3,
        agent_radius: f32,
        options: &PathOptions,
        used_hierarchy: &mut bool,
    ) -> Result<Vec<Vec3>, PathError> {
        let from = self
            .grid
            .world_to_cell(start)
            .ok_or(PathError::StartOutsideGrid)?;
        let to = self
            .grid
            .world_to_cell(end)
            .ok_or(PathError::EndOutsideGrid)?;
        let clearance = self.grid.clearance_for(agent_radius);
        if !self.grid.is_passable(from, clearance) {
            return Err(PathError::StartBlocked);
        }
        if !self.grid.is_passable(to, clearance) {
            return Err(PathError::EndBlocked);
        }
        let max_iterations = options
            .max_iterations
            .unwrap_or(self.config.max_search_iterations);

        let mut cells = None;
        if options.allow_hierarchical
            && start.distance(&end) >= self.config.hierarchical_min_distance
        {
            if let Some(h) = self.hierarchy.as_mut() {
                if h.cluster_of(from) != h.cluster_of(to) {
                    match h.find_path(&self.grid, from, to, clearance, max_iterations) {
                        Ok(found) => {
                            *used_hierarchy = true;
                            cells = Some(found);
                        }
                        Err(e) => {
                            log::debug!("hierarchical search failed ({}), using grid", e);
                            self.metrics.hierarchy_fallbacks += 1;
                        }
                    }
                }
            }
        }
        let cells = match cells {
            Some(cells) => cells,
            None => grid_search(&self.grid, from, to, clearance, None, max_iterations)?.nodes,
        };

        let mut waypoints: Vec<Vec3> = cells.iter().map(|c| self.grid.cell_center(*c)).collect();
        match waypoints.len() {
            0 | 1 => waypoints = vec![start, end],
            n => {
                waypoints[0] = start;
                waypoints[n - 1] = end;
            }
        }
        if options.smooth {
            waypoints = smooth_path(&self.grid, &waypoints, clearance);
        }
        Ok(waypoints)
    }

    fn expire_waiting(&mut self, now: f64) {
        let timeout = self.config.request_timeout;
        if timeout <= 0.0 {
            return;
        }
        let requests = &mut self.requests;
        let metrics = &mut self.metrics;
        self.queue.retain(|id| {
            let Some(request) = requests.get_mut(id) else {
                return false;
            };
            if now - request.created_at <= timeout {
                return true;
            }
            request.error = Some(PathError::Timeout);
            request.resolve(PathStatus::Timeout, now);
            metrics.timed_out += 1;
            false
        });
    }

    fn purge_resolved(&mut self, now: f64) {
        let retention = self.config.request_retention;
        self.requests
            .retain(|_, r| r.resolved_at.map_or(true, |at| now - at <= retention));
        self.cache.purge_expired(now);
    }

    fn clear_caches(&mut self) {
        self.cache.clear();
        if let Some(h) = self.hierarchy.as_mut() {
            h.clear_sub_paths();
        }
    }

    fn key(&self, start: Vec3, end: Vec3, radius: f32, options: &PathOptions) -> PathKey {
        let q = self.config.cache_quantum.max(f32::EPSILON);
        let quantize = |v: Vec3| {
            [
                (v.x / q).round() as i32,
                (v.y / q).round() as i32,
                (v.z / q).round() as i32,
            ]
        };
        PathKey {
            start: quantize(start),
            end: quantize(end),
            radius: (radius / q).round() as i32,
            smooth: options.smooth,
        }
    }
}

fn build_hierarchy(config: &PathConfig, grid: &NavGrid) -> Option<ClusterHierarchy> {
    (config.hierarchy_levels > 0)
        .then(|| ClusterHierarchy::build(grid, config.cluster_size, config.hierarchy_levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geometry::Aabb;

    fn planner(config: PathConfig) -> (PathPlanner, ManualClock) {
        let clock = ManualClock::new();
        (PathPlanner::new(config, clock.shared()), clock)
    }

    fn small_config() -> PathConfig {
        PathConfig {
            nav_min: Vec3::ZERO,
            nav_max: Vec3::new(128.0, 4.0, 128.0),
            nav_cell_size: 4.0,
            cluster_size: 8,
            hierarchy_levels: 2,
            hierarchical_min_distance: 32.0,
            ..PathConfig::default()
        }
    }

    #[test]
    fn test_straight_path_on_empty_grid() {
        let (mut p, _clock) = planner(PathConfig::default());
        let start = Vec3::new(0.0, 0.0, 0.0);
        let end = Vec3::new(40.0, 0.0, 0.0);
        let id = p.find_path(start, end, 0.5, PathOptions::default());
        assert_eq!(p.status(id), Some(PathStatus::Pending));
        assert_eq!(p.process_pending(), 1);

        let request = p.request(id).unwrap();
        assert_eq!(request.status, PathStatus::Success);
        assert_eq!(request.waypoints, vec![start, end]);
        assert!(!request.used_hierarchy);
    }

    #[test]
    fn test_unsmoothed_path_follows_cells() {
        let (mut p, _clock) = planner(PathConfig::default());
        let options = PathOptions {
            smooth: false,
            ..PathOptions::default()
        };
        let start = Vec3::new(0.0, 0.0, 0.0);
        let end = Vec3::new(40.0, 0.0, 0.0);
        let waypoints = p.compute_path(start, end, 0.5, &options).unwrap();
        assert_eq!(waypoints.len(), 11);
        assert_eq!(waypoints[0], start);
        assert_eq!(waypoints[10], end);
        assert!(waypoints.windows(2).all(|w| w[1].x > w[0].x));
    }

    #[test]
    fn test_cached_path_matches_fresh() {
        let (mut p, _clock) = planner(small_config());
        let start = Vec3::new(6.0, 2.0, 6.0);
        let end = Vec3::new(22.0, 2.0, 50.0);
        let first = p.find_path(start, end, 0.5, PathOptions::default());
        p.process_pending();
        let second = p.find_path(start, end, 0.5, PathOptions::default());

        assert_eq!(p.status(second), Some(PathStatus::Cached));
        assert_eq!(
            p.request(first).unwrap().waypoints,
            p.request(second).unwrap().waypoints
        );
        assert_eq!(p.metrics().cache_hits, 1);
    }

    #[test]
    fn test_blocked_endpoints_fail() {
        let (mut p, _clock) = planner(small_config());
        p.nav_grid_mut()
            .block_aabb(&Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(7.0, 4.0, 7.0)));

        let options = PathOptions::default();
        let inside = Vec3::new(2.0, 2.0, 2.0);
        let far = Vec3::new(60.0, 2.0, 60.0);

        let err = p.compute_path(inside, far, 0.5, &options).unwrap_err();
        assert_eq!(err, PathError::StartBlocked);
        let err = p.compute_path(far, inside, 0.5, &options).unwrap_err();
        assert_eq!(err, PathError::EndBlocked);
        let err = p
            .compute_path(Vec3::new(-5.0, 2.0, 2.0), far, 0.5, &options)
            .unwrap_err();
        assert_eq!(err, PathError::StartOutsideGrid);
    }

    #[test]
    fn test_failed_request_has_no_waypoints() {
        let (mut p, _clock) = planner(small_config());
        // Seal the goal in.
        p.nav_grid_mut()
            .block_aabb(&Aabb::new(Vec3::new(96.0, 0.0, 0.0), Vec3::new(99.0, 4.0, 128.0)));
        let id = p.find_path(
            Vec3::new(10.0, 2.0, 10.0),
            Vec3::new(110.0, 2.0, 10.0),
            0.5,
            PathOptions::default(),
        );
        p.process_pending();
        let request = p.request(id).unwrap();
        assert_eq!(request.status, PathStatus::Failed);
        assert_eq!(request.error, Some(PathError::NoPath));
        assert!(request.waypoints.is_empty());
        assert_eq!(p.metrics().hierarchy_fallbacks, 1);
    }

    #[test]
    fn test_hierarchical_path_around_wall() {
        let (mut p, _clock) = planner(small_config());
        // Wall across x cells 15..=16, open above z = 84.
        p.nav_grid_mut()
            .block_aabb(&Aabb::new(Vec3::new(60.5, 0.0, 0.0), Vec3::new(67.5, 4.0, 83.5)));
        p.rebuild_hierarchy();

        let start = Vec3::new(10.0, 2.0, 10.0);
        let end = Vec3::new(110.0, 2.0, 10.0);
        let id = p.find_path(start, end, 1.0, PathOptions::default());
        p.process_pending();

        let request = p.request(id).unwrap();
        assert_eq!(request.status, PathStatus::Success);
        assert!(request.used_hierarchy);
        assert_eq!(request.waypoints.first(), Some(&start));
        assert_eq!(request.waypoints.last(), Some(&end));
        assert!(request.waypoints.iter().any(|w| w.z >= 84.0));
        let grid = p.nav_grid();
        for w in &request.waypoints {
            let cell = grid.world_to_cell(*w).unwrap();
            assert!(grid.is_walkable(cell));
        }
    }

    #[test]
    fn test_per_tick_limit() {
        let (mut p, _clock) = planner(PathConfig {
            max_paths_per_tick: 2,
            ..small_config()
        });
        for i in 0..5 {
            let x = 6.0 + i as f32 * 4.0;
            let (from, to) = (Vec3::new(x, 2.0, 6.0), Vec3::new(x, 2.0, 40.0));
            p.find_path(from, to, 0.5, PathOptions::default());
        }
        assert_eq!(p.process_pending(), 2);
        assert_eq!(p.pending(), 3);
        assert_eq!(p.process_pending(), 2);
        assert_eq!(p.process_pending(), 1);
        assert_eq!(p.process_pending(), 0);
    }

    #[test]
    fn test_timeout() {
        let (mut p, clock) = planner(PathConfig {
            request_timeout: 1.0,
            ..small_config()
        });
        let id = p.find_path(
            Vec3::new(6.0, 2.0, 6.0),
            Vec3::new(30.0, 2.0, 6.0),
            0.5,
            PathOptions::default(),
        );
        clock.advance(2.0);
        assert_eq!(p.process_pending(), 0);
        let request = p.request(id).unwrap();
        assert_eq!(request.status, PathStatus::Timeout);
        assert_eq!(request.error, Some(PathError::Timeout));
        assert_eq!(p.metrics().timed_out, 1);
    }

    #[test]
    fn test_cancel_and_retention() {
        let (mut p, clock) = planner(PathConfig {
            request_retention: 5.0,
            ..small_config()
        });
        let (from, to) = (Vec3::new(6.0, 2.0, 6.0), Vec3::new(30.0, 2.0, 6.0));
        let a = p.find_path(from, to, 0.5, PathOptions::default());
        let offset = Vec3::new(0.0, 0.0, 4.0);
        let b = p.find_path(from + offset, to + offset, 0.5, PathOptions::default());
        assert!(p.cancel(a));
        assert!(!p.cancel(a));
        assert_eq!(p.status(a), None);

        assert_eq!(p.process_pending(), 1);
        assert!(!p.cancel(b));
        assert_eq!(p.status(b), Some(PathStatus::Success));

        clock.advance(6.0);
        p.process_pending();
        assert_eq!(p.status(b), None);
    }

    #[test]
    fn test_shutdown_fails_pending_and_new() {
        let (mut p, _clock) = planner(small_config());
        let (from, to) = (Vec3::new(6.0, 2.0, 6.0), Vec3::new(30.0, 2.0, 6.0));
        let queued = p.find_path(from, to, 0.5, PathOptions::default());
        p.shutdown();
        assert_eq!(p.status(queued), Some(PathStatus::Failed));
        let late = p.find_path(from, to, 0.5, PathOptions::default());
        assert_eq!(p.request(late).unwrap().error, Some(PathError::ShutDown));
        assert_eq!(p.process_pending(), 0);
    }

    #[test]
    fn test_hierarchy_disabled() {
        let (p, _clock) = planner(PathConfig {
            hierarchy_levels: 0,
            ..small_config()
        });
        assert!(p.hierarchy().is_none());
        assert_eq!(p.metrics().hierarchy, HierarchyStats::default());
    }
}
