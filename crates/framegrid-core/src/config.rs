//! Tunables for every component.
//!
//! All values are fixed at construction. Configs deserialize from JSON with
//! every field optional (missing fields take the defaults below), and
//! [`SubsystemConfig::validate`] reports every problem at once rather than
//! stopping at the first.

use serde::{Deserialize, Serialize};

use crate::collision::NarrowPhase;
use crate::error::ConfigError;
use crate::geometry::Vec3;
use crate::scheduler::Priority;

/// One value per priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierTable<T> {
    pub critical: T,
    pub high: T,
    pub normal: T,
    pub low: T,
    pub background: T,
}

impl<T: Copy> TierTable<T> {
    pub fn get(&self, priority: Priority) -> T {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
            Priority::Background => self.background,
        }
    }
}

impl TierTable<f64> {
    pub fn sum(&self) -> f64 {
        self.critical + self.high + self.normal + self.low + self.background
    }
}

/// Default share of a frame budget granted to each tier.
pub const DEFAULT_TIER_FRACTIONS: TierTable<f64> = TierTable {
    critical: 0.40,
    high: 0.25,
    normal: 0.20,
    low: 0.10,
    background: 0.05,
};

/// Configuration for the whole subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    pub spatial: SpatialConfig,
    pub collision: CollisionConfig,
    pub pathfinding: PathConfig,
    pub scheduler: SchedulerConfig,
}

/// Uniform grid, octree and query-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Edge length of a uniform grid cell.
    pub cell_size: f32,
    /// Center of the octree root.
    pub world_center: Vec3,
    /// Half edge length of the octree root. Objects outside stay at the root.
    pub world_half_extent: f32,
    pub octree_max_depth: u32,
    pub octree_max_objects: usize,
    /// Displacement below which `update_object` skips re-indexing.
    pub update_tolerance: f32,
    /// Seconds a `nearby_objects` result stays cached.
    pub query_cache_ttl: f64,
    /// Quantization step for the query cache key.
    pub query_cache_quantum: f32,
    pub query_cache_capacity: usize,
    /// Region queries spanning more cells than this walk the octree instead.
    pub max_query_cells: usize,
    /// Objects covering more grid cells than this are held by the octree
    /// only.
    pub max_cells_per_object: usize,
    /// Seconds an empty cell survives before the maintenance sweep drops it.
    pub cell_grace_period: f64,
    /// Pending updates processed per refresh task run.
    pub update_batch_size: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: 8.0,
            world_center: Vec3::ZERO,
            world_half_extent: 1024.0,
            octree_max_depth: 6,
            octree_max_objects: 8,
            update_tolerance: 0.05,
            query_cache_ttl: 0.1,
            query_cache_quantum: 1.0,
            query_cache_capacity: 512,
            max_query_cells: 4096,
            max_cells_per_object: 4096,
            cell_grace_period: 5.0,
            update_batch_size: 64,
        }
    }
}

/// Collision detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub narrow_phase: NarrowPhase,
    /// Re-check interval in scans per tier. `0` disables the tier.
    pub tier_intervals: TierTable<u32>,
    /// Share of `frame_budget_ms` each tier may consume.
    pub tier_budget_fractions: TierTable<f64>,
    /// Wall-clock budget for one collision scan.
    pub frame_budget_ms: f64,
    /// Hard cap on subjects checked per scan.
    pub max_checks_per_tick: usize,
    /// Seconds a pair result stays cached.
    pub pair_cache_ttl: f64,
    /// Speed below which an awake dynamic entity counts as resting.
    pub sleep_velocity: f32,
    /// Consecutive resting scans before an entity is put to sleep.
    pub sleep_after_checks: u32,
    /// Distance at which a non-sleeping entity wakes a sleeping one.
    pub wake_distance: f32,
    /// Sleeping entities examined by the wake pass per scan.
    pub wake_checks_per_tick: usize,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            narrow_phase: NarrowPhase::Aabb,
            tier_intervals: TierTable {
                critical: 1,
                high: 2,
                normal: 4,
                low: 8,
                background: 16,
            },
            tier_budget_fractions: DEFAULT_TIER_FRACTIONS,
            frame_budget_ms: 4.0,
            max_checks_per_tick: 500,
            pair_cache_ttl: 0.05,
            sleep_velocity: 0.1,
            sleep_after_checks: 3,
            wake_distance: 5.0,
            wake_checks_per_tick: 64,
        }
    }
}

/// Navigation grid, hierarchy and request-budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub nav_min: Vec3,
    pub nav_max: Vec3,
    pub nav_cell_size: f32,
    /// Level-0 cluster edge length in cells.
    pub cluster_size: u32,
    /// Number of cluster levels to build (0 disables the hierarchy).
    pub hierarchy_levels: u32,
    /// Paths shorter than this never use the hierarchy.
    pub hierarchical_min_distance: f32,
    pub max_paths_per_tick: usize,
    pub path_budget_ms: f64,
    pub max_search_iterations: usize,
    pub cache_ttl: f64,
    pub cache_quantum: f32,
    pub cache_capacity: usize,
    /// Seconds a request may wait in the queue before it times out.
    pub request_timeout: f64,
    /// Seconds a resolved request stays queryable.
    pub request_retention: f64,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            nav_min: Vec3::new(-256.0, -16.0, -256.0),
            nav_max: Vec3::new(256.0, 16.0, 256.0),
            nav_cell_size: 4.0,
            cluster_size: 8,
            hierarchy_levels: 2,
            hierarchical_min_distance: 64.0,
            max_paths_per_tick: 4,
            path_budget_ms: 3.0,
            max_search_iterations: 20_000,
            cache_ttl: 30.0,
            cache_quantum: 1.0,
            cache_capacity: 256,
            request_timeout: 10.0,
            request_retention: 30.0,
        }
    }
}

/// Frame scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub target_frame_ms: f64,
    /// Wall-clock budget for draining tasks in one tick.
    pub frame_budget_ms: f64,
    pub tier_budget_fractions: TierTable<f64>,
    pub base_tasks_per_tick: usize,
    pub max_queue_size: usize,
    /// Upper bound on tasks shed to admit one new task.
    pub shed_batch: usize,
    pub default_max_attempts: u32,
    /// Seconds; `0` means no timeout.
    pub default_timeout: f64,
    /// Seconds a resolved task record is kept for status queries.
    pub task_retention: f64,
    pub frame_history: usize,
    /// Seconds between adaptive adjustments.
    pub adaptive_interval: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub emergency_multiplier: f64,
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
    pub frame_warning_ms: f64,
    pub frame_critical_ms: f64,
    /// Seconds between retention sweeps.
    pub cleanup_interval: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_frame_ms: 1000.0 / 60.0,
            frame_budget_ms: 5.0,
            tier_budget_fractions: DEFAULT_TIER_FRACTIONS,
            base_tasks_per_tick: 50,
            max_queue_size: 1000,
            shed_batch: 10,
            default_max_attempts: 3,
            default_timeout: 30.0,
            task_retention: 10.0,
            frame_history: 60,
            adaptive_interval: 1.0,
            min_multiplier: 0.25,
            max_multiplier: 2.0,
            emergency_multiplier: 0.25,
            memory_warning_mb: 512.0,
            memory_critical_mb: 1024.0,
            frame_warning_ms: 33.3,
            frame_critical_ms: 50.0,
            cleanup_interval: 5.0,
        }
    }
}

impl SubsystemConfig {
    /// Parse a JSON document; missing sections and fields use defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate every section, returning all errors found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let s = &self.spatial;
        positive(&mut errors, "spatial.cell_size", s.cell_size as f64);
        positive(&mut errors, "spatial.world_half_extent", s.world_half_extent as f64);
        positive(&mut errors, "spatial.query_cache_quantum", s.query_cache_quantum as f64);
        positive(&mut errors, "spatial.octree_max_objects", s.octree_max_objects as f64);
        positive(&mut errors, "spatial.update_batch_size", s.update_batch_size as f64);
        positive(&mut errors, "spatial.max_cells_per_object", s.max_cells_per_object as f64);
        if s.octree_max_depth > 16 {
            errors.push(ConfigError::OutOfRange {
                field: "spatial.octree_max_depth",
                value: s.octree_max_depth as f64,
                min: 0.0,
                max: 16.0,
            });
        }

        let c = &self.collision;
        positive(&mut errors, "collision.frame_budget_ms", c.frame_budget_ms);
        positive(&mut errors, "collision.max_checks_per_tick", c.max_checks_per_tick as f64);
        if c.tier_budget_fractions.sum() > 1.0 + 1e-9 {
            errors.push(ConfigError::TierFractionsExceedBudget(
                c.tier_budget_fractions.sum(),
            ));
        }

        let p = &self.pathfinding;
        positive(&mut errors, "pathfinding.nav_cell_size", p.nav_cell_size as f64);
        positive(&mut errors, "pathfinding.cluster_size", p.cluster_size as f64);
        positive(&mut errors, "pathfinding.cache_quantum", p.cache_quantum as f64);
        positive(&mut errors, "pathfinding.max_search_iterations", p.max_search_iterations as f64);
        for (field, lo, hi) in [
            ("pathfinding.nav_max.x", p.nav_min.x, p.nav_max.x),
            ("pathfinding.nav_max.y", p.nav_min.y, p.nav_max.y),
            ("pathfinding.nav_max.z", p.nav_min.z, p.nav_max.z),
        ] {
            if hi <= lo {
                errors.push(ConfigError::OutOfRange {
                    field,
                    value: hi as f64,
                    min: lo as f64,
                    max: f64::INFINITY,
                });
            }
        }

        let sc = &self.scheduler;
        positive(&mut errors, "scheduler.target_frame_ms", sc.target_frame_ms);
        positive(&mut errors, "scheduler.frame_budget_ms", sc.frame_budget_ms);
        positive(&mut errors, "scheduler.base_tasks_per_tick", sc.base_tasks_per_tick as f64);
        positive(&mut errors, "scheduler.max_queue_size", sc.max_queue_size as f64);
        positive(&mut errors, "scheduler.default_max_attempts", sc.default_max_attempts as f64);
        positive(&mut errors, "scheduler.frame_history", sc.frame_history as f64);
        if sc.tier_budget_fractions.sum() > 1.0 + 1e-9 {
            errors.push(ConfigError::TierFractionsExceedBudget(
                sc.tier_budget_fractions.sum(),
            ));
        }
        if !(sc.min_multiplier > 0.0 && sc.min_multiplier <= sc.max_multiplier) {
            errors.push(ConfigError::OutOfRange {
                field: "scheduler.min_multiplier",
                value: sc.min_multiplier,
                min: 0.0,
                max: sc.max_multiplier,
            });
        }
        if sc.memory_warning_mb > sc.memory_critical_mb {
            errors.push(ConfigError::OutOfRange {
                field: "scheduler.memory_warning_mb",
                value: sc.memory_warning_mb,
                min: 0.0,
                max: sc.memory_critical_mb,
            });
        }
        if sc.frame_warning_ms > sc.frame_critical_ms {
            errors.push(ConfigError::OutOfRange {
                field: "scheduler.frame_warning_ms",
                value: sc.frame_warning_ms,
                min: 0.0,
                max: sc.frame_critical_ms,
            });
        }

        errors
    }
}

fn positive(errors: &mut Vec<ConfigError>, field: &'static str, value: f64) {
    if !(value > 0.0) {
        errors.push(ConfigError::NotPositive { field, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SubsystemConfig::default().validate().is_empty());
    }

    #[test]
    fn default_fractions_fill_budget() {
        assert!((DEFAULT_TIER_FRACTIONS.sum() - 1.0).abs() < 1e-9);
        assert_eq!(DEFAULT_TIER_FRACTIONS.get(Priority::Critical), 0.40);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "spatial": { "cell_size": 16.0 }, "scheduler": { "max_queue_size": 10 } }"#;
        let config = SubsystemConfig::from_json(json).unwrap();
        assert_eq!(config.spatial.cell_size, 16.0);
        assert_eq!(config.spatial.octree_max_depth, 6);
        assert_eq!(config.scheduler.max_queue_size, 10);
        assert_eq!(config.collision.tier_intervals.critical, 1);
    }

    #[test]
    fn narrow_phase_parses_from_json() {
        let json = r#"{ "collision": { "narrow_phase": "sphere" } }"#;
        let config = SubsystemConfig::from_json(json).unwrap();
        assert_eq!(config.collision.narrow_phase, NarrowPhase::Sphere);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = SubsystemConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validate_collects_all_errors() {
        let mut config = SubsystemConfig::default();
        config.spatial.cell_size = 0.0;
        config.scheduler.max_queue_size = 0;
        config.scheduler.tier_budget_fractions.critical = 0.9;
        config.pathfinding.nav_max.y = config.pathfinding.nav_min.y;
        let errors = config.validate();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ConfigError::NotPositive {
            field: "spatial.cell_size",
            value: 0.0
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::TierFractionsExceedBudget(_))));
    }
}
