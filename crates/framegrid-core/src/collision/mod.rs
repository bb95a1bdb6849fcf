//! Two-phase collision detection on top of the spatial index.
//!
//! Entities are placed in one of five priority tiers, each re-checked on its
//! own scan interval (the same "run every N ticks" scheme the LOD tiers use).
//! A scan walks the tiers highest first and stops at the tier's share of the
//! collision budget, the overall budget, or the per-scan check cap; entities
//! not reached stay due for the next scan.
//!
//! | Rule | Effect |
//! |------|--------|
//! | same id, both static, both sleeping | pair never reaches the narrow phase |
//! | ignored group pair | pair never reaches the narrow phase |
//! | slow for `sleep_after_checks` scans | entity sleeps, no longer a scan subject |
//! | any non-sleeping entity within `wake_distance` | sleeping entity wakes |
//! | re-indexed by the spatial index | entity wakes, cached pairs dropped |

mod narrow;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

pub use narrow::{NarrowPhase, NarrowResult};

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use crate::config::CollisionConfig;
use crate::entity::EntityId;
use crate::error::CallbackError;
use crate::geometry::{Aabb, Vec3};
use crate::scheduler::Priority;
use crate::spatial::{IndexedObject, MovedObject, SpatialIndex};

/// Collision group tag. Pairs of groups can be excluded with
/// [`CollisionDetector::ignore_group_pair`].
pub type CollisionGroup = u32;

/// Per-entity registration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionOptions {
    pub group: CollisionGroup,
    pub priority: Priority,
}

impl Default for CollisionOptions {
    fn default() -> Self {
        Self {
            group: 0,
            priority: Priority::Normal,
        }
    }
}

/// One detected contact, reported from the subject's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionEvent {
    pub subject: EntityId,
    pub other: EntityId,
    pub scan: u64,
}

pub type CollisionCallback = Box<dyn FnMut(&CollisionEvent) -> Result<(), CallbackError>>;

#[derive(Debug, Clone)]
struct CollisionEntity {
    group: CollisionGroup,
    priority: Priority,
    is_static: bool,
    sleeping: bool,
    slow_streak: u32,
    last_checked: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan: u64,
    pub subjects_checked: usize,
    pub collisions: usize,
    pub slept: usize,
    pub woken: usize,
    pub budget_exhausted: bool,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CollisionMetrics {
    pub registered: usize,
    pub awake: usize,
    pub sleeping: usize,
    pub scans: u64,
    pub subjects_checked: u64,
    pub candidate_pairs: u64,
    pub narrow_phase_checks: u64,
    pub fallback_checks: u64,
    pub pair_cache_entries: usize,
    pub pair_cache_hit_rate: f64,
    pub pairs_skipped_static: u64,
    pub pairs_skipped_sleeping: u64,
    pub pairs_skipped_group: u64,
    pub collisions_detected: u64,
    pub callback_errors: u64,
    pub slept: u64,
    pub woken: u64,
    pub budget_exhausted_scans: u64,
    pub pending_events: usize,
    pub last_scan: ScanReport,
}

enum PairRule {
    Allowed,
    SameEntity,
    BothStatic,
    BothSleeping,
    IgnoredGroups,
}

pub struct CollisionDetector {
    config: CollisionConfig,
    clock: SharedClock,
    entities: HashMap<EntityId, CollisionEntity>,
    tiers: [Vec<EntityId>; 5],
    cursors: [usize; 5],
    awake: BTreeSet<EntityId>,
    sleeping: BTreeSet<EntityId>,
    wake_cursor: Option<EntityId>,
    ignored_groups: HashSet<(CollisionGroup, CollisionGroup)>,
    pair_cache: TtlCache<(EntityId, EntityId), bool>,
    callbacks: HashMap<EntityId, Vec<CollisionCallback>>,
    events: VecDeque<CollisionEvent>,
    scan_count: u64,
    metrics: CollisionMetrics,
    shut_down: bool,
}

/// Events buffered for [`CollisionDetector::drain_events`] beyond this are
/// discarded oldest first.
const MAX_BUFFERED_EVENTS: usize = 4096;

impl CollisionDetector {
    pub fn new(config: CollisionConfig, clock: SharedClock) -> Self {
        Self {
            pair_cache: TtlCache::new(config.pair_cache_ttl, 4096),
            config,
            clock,
            entities: HashMap::new(),
            tiers: Default::default(),
            cursors: [0; 5],
            awake: BTreeSet::new(),
            sleeping: BTreeSet::new(),
            wake_cursor: None,
            ignored_groups: HashSet::new(),
            callbacks: HashMap::new(),
            events: VecDeque::new(),
            scan_count: 0,
            metrics: CollisionMetrics::default(),
            shut_down: false,
        }
    }

    pub fn config(&self) -> &CollisionConfig {
        &self.config
    }

    pub fn register_object(
        &mut self,
        id: EntityId,
        is_static: bool,
        options: CollisionOptions,
    ) -> bool {
        if self.shut_down || self.entities.contains_key(&id) {
            return false;
        }
        self.entities.insert(
            id,
            CollisionEntity {
                group: options.group,
                priority: options.priority,
                is_static,
                sleeping: false,
                slow_streak: 0,
                last_checked: None,
            },
        );
        self.tiers[options.priority.index()].push(id);
        if !is_static {
            self.awake.insert(id);
        }
        true
    }

    pub fn unregister_object(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.remove(&id) else {
            return false;
        };
        let tier = entity.priority.index();
        if let Some(pos) = self.tiers[tier].iter().position(|e| *e == id) {
            self.tiers[tier].remove(pos);
            if pos < self.cursors[tier] {
                self.cursors[tier] -= 1;
            }
        }
        self.awake.remove(&id);
        self.sleeping.remove(&id);
        self.callbacks.remove(&id);
        self.invalidate(&[id]);
        true
    }

    pub fn is_registered(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn is_sleeping(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|e| e.sleeping)
    }

    /// Exclude every pair between groups `a` and `b` (in either order).
    pub fn ignore_group_pair(&mut self, a: CollisionGroup, b: CollisionGroup) {
        self.ignored_groups.insert((a.min(b), a.max(b)));
        self.pair_cache.clear();
    }

    /// Register a callback fired for every contact where `id` is the subject.
    pub fn on_collision(&mut self, id: EntityId, callback: CollisionCallback) -> bool {
        if !self.entities.contains_key(&id) {
            return false;
        }
        self.callbacks.entry(id).or_default().push(callback);
        true
    }

    pub fn drain_events(&mut self) -> Vec<CollisionEvent> {
        self.events.drain(..).collect()
    }

    pub fn sleep(&mut self, id: EntityId) -> bool {
        match self.entities.get_mut(&id) {
            Some(e) if !e.is_static && !e.sleeping => {
                e.sleeping = true;
                e.slow_streak = 0;
                self.awake.remove(&id);
                self.sleeping.insert(id);
                self.metrics.slept += 1;
                true
            }
            _ => false,
        }
    }

    pub fn wake(&mut self, id: EntityId) -> bool {
        match self.entities.get_mut(&id) {
            Some(e) if e.sleeping => {
                e.sleeping = false;
                e.slow_streak = 0;
                self.sleeping.remove(&id);
                self.awake.insert(id);
                self.metrics.woken += 1;
                true
            }
            _ => false,
        }
    }

    /// Feed re-indexed entities from the spatial index: their cached pairs
    /// are dropped and sleepers among them wake.
    pub fn on_objects_moved(&mut self, moved: &[MovedObject]) {
        if moved.is_empty() {
            return;
        }
        let ids: Vec<EntityId> = moved.iter().map(|m| m.id).collect();
        self.invalidate(&ids);
        for id in ids {
            if self.wake(id) {
                log::debug!("collision: {} woken by displacement", id);
            } else if let Some(e) = self.entities.get_mut(&id) {
                e.slow_streak = 0;
            }
        }
    }

    /// Direct pair query under the same rules as a scan.
    pub fn check_collision(&mut self, spatial: &SpatialIndex, a: EntityId, b: EntityId) -> bool {
        if self.shut_down {
            return false;
        }
        let (Some(ra), Some(rb)) = (spatial.record(a), spatial.record(b)) else {
            return false;
        };
        let now = self.clock.now();
        self.test_pair(ra, rb, now)
    }

    /// One collision pass: sleep bookkeeping, wake pass, then due subjects
    /// tier by tier within budget.
    pub fn scan(&mut self, spatial: &SpatialIndex) -> ScanReport {
        if self.shut_down {
            return ScanReport::default();
        }
        self.scan_count += 1;
        let start = self.clock.now();
        let mut report = ScanReport {
            scan: self.scan_count,
            ..Default::default()
        };

        report.slept = self.update_sleep_states(spatial);
        report.woken = self.wake_pass(spatial);

        let budget = self.config.frame_budget_ms / 1000.0;
        'tiers: for priority in Priority::ALL {
            let interval = self.config.tier_intervals.get(priority);
            let tier = priority.index();
            let len = self.tiers[tier].len();
            if interval == 0 || len == 0 {
                continue;
            }
            let tier_budget = budget * self.config.tier_budget_fractions.get(priority);
            let tier_start = self.clock.now();
            let begin = self.cursors[tier].min(len);
            let mut visited = 0;
            while visited < len {
                let pos = (begin + visited) % len;
                let now = self.clock.now();
                if report.subjects_checked >= self.config.max_checks_per_tick
                    || now - start > budget
                {
                    report.budget_exhausted = true;
                    self.cursors[tier] = pos;
                    break 'tiers;
                }
                if now - tier_start > tier_budget {
                    self.cursors[tier] = pos;
                    continue 'tiers;
                }
                visited += 1;

                let id = self.tiers[tier][pos];
                if !self.is_due(id, interval) {
                    continue;
                }
                report.subjects_checked += 1;
                report.collisions += self.check_subject(spatial, id, now);
            }
            self.cursors[tier] = begin;
        }

        let end = self.clock.now();
        report.elapsed_ms = (end - start) * 1000.0;
        self.metrics.scans += 1;
        self.metrics.subjects_checked += report.subjects_checked as u64;
        if report.budget_exhausted {
            self.metrics.budget_exhausted_scans += 1;
        }
        self.metrics.last_scan = report;
        report
    }

    pub fn metrics(&self) -> CollisionMetrics {
        CollisionMetrics {
            registered: self.entities.len(),
            awake: self.awake.len(),
            sleeping: self.sleeping.len(),
            pair_cache_entries: self.pair_cache.len(),
            pair_cache_hit_rate: self.pair_cache.hit_rate(),
            pending_events: self.events.len(),
            ..self.metrics
        }
    }

    pub fn shutdown(&mut self) {
        self.entities.clear();
        for tier in &mut self.tiers {
            tier.clear();
        }
        self.cursors = [0; 5];
        self.awake.clear();
        self.sleeping.clear();
        self.callbacks.clear();
        self.events.clear();
        self.pair_cache.clear();
        self.shut_down = true;
        log::info!("collision detector shut down");
    }

    fn is_due(&self, id: EntityId, interval: u32) -> bool {
        match self.entities.get(&id) {
            Some(e) if !e.is_static && !e.sleeping => match e.last_checked {
                Some(last) => self.scan_count - last >= u64::from(interval),
                None => true,
            },
            _ => false,
        }
    }

    /// Check one subject against its broad-phase candidates. Returns the
    /// number of contacts found.
    fn check_subject(&mut self, spatial: &SpatialIndex, id: EntityId, now: f64) -> usize {
        if let Some(e) = self.entities.get_mut(&id) {
            e.last_checked = Some(self.scan_count);
        }
        let Some(subject) = spatial.record(id) else {
            return 0;
        };
        let region = subject.aabb.expanded(subject.aabb.max_extent());
        let mut candidates = spatial.region_query(&region);
        candidates.sort();

        let mut contacts = 0;
        for other_id in candidates {
            if other_id == id {
                continue;
            }
            let Some(other) = spatial.record(other_id) else {
                continue;
            };
            self.metrics.candidate_pairs += 1;
            if self.test_pair(subject, other, now) {
                contacts += 1;
                self.emit(CollisionEvent {
                    subject: id,
                    other: other_id,
                    scan: self.scan_count,
                });
            }
        }
        contacts
    }

    fn test_pair(&mut self, a: &IndexedObject, b: &IndexedObject, now: f64) -> bool {
        match self.pair_rule(a, b) {
            PairRule::Allowed => {}
            PairRule::SameEntity => return false,
            PairRule::BothStatic => {
                self.metrics.pairs_skipped_static += 1;
                return false;
            }
            PairRule::BothSleeping => {
                self.metrics.pairs_skipped_sleeping += 1;
                return false;
            }
            PairRule::IgnoredGroups => {
                self.metrics.pairs_skipped_group += 1;
                return false;
            }
        }

        let reach = 2.0 * a.aabb.max_extent().max(b.aabb.max_extent());
        if a.position.distance_squared(&b.position) > reach * reach {
            return false;
        }

        let key = (a.id.min(b.id), a.id.max(b.id));
        if let Some(&cached) = self.pair_cache.get(&key, now) {
            return cached;
        }
        let result = self.config.narrow_phase.test(&a.aabb, &b.aabb);
        self.metrics.narrow_phase_checks += 1;
        if result.fell_back {
            self.metrics.fallback_checks += 1;
        }
        self.pair_cache.insert(key, result.colliding, now);
        result.colliding
    }

    fn pair_rule(&self, a: &IndexedObject, b: &IndexedObject) -> PairRule {
        if a.id == b.id {
            return PairRule::SameEntity;
        }
        if a.is_static && b.is_static {
            return PairRule::BothStatic;
        }
        let ea = self.entities.get(&a.id);
        let eb = self.entities.get(&b.id);
        let sleeping = |e: Option<&CollisionEntity>| e.is_some_and(|e| e.sleeping);
        if sleeping(ea) && sleeping(eb) {
            return PairRule::BothSleeping;
        }
        if let (Some(ea), Some(eb)) = (ea, eb) {
            let key = (ea.group.min(eb.group), ea.group.max(eb.group));
            if self.ignored_groups.contains(&key) {
                return PairRule::IgnoredGroups;
            }
        }
        PairRule::Allowed
    }

    fn emit(&mut self, event: CollisionEvent) {
        self.metrics.collisions_detected += 1;
        if let Some(callbacks) = self.callbacks.get_mut(&event.subject) {
            for callback in callbacks.iter_mut() {
                if let Err(err) = callback(&event) {
                    self.metrics.callback_errors += 1;
                    log::warn!("{} -> {}: {}", event.subject, event.other, err);
                }
            }
        }
        if self.events.len() >= MAX_BUFFERED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Advance slow-streaks of awake dynamic entities and put the ones that
    /// stayed slow long enough to sleep.
    fn update_sleep_states(&mut self, spatial: &SpatialIndex) -> usize {
        let threshold = self.config.sleep_velocity;
        let mut to_sleep = Vec::new();
        for id in &self.awake {
            let (Some(entity), Some(record)) = (self.entities.get_mut(id), spatial.record(*id))
            else {
                continue;
            };
            if record.velocity.length() < threshold {
                entity.slow_streak += 1;
                if entity.slow_streak >= self.config.sleep_after_checks {
                    to_sleep.push(*id);
                }
            } else {
                entity.slow_streak = 0;
            }
        }
        to_sleep.into_iter().filter(|id| self.sleep(*id)).count()
    }

    /// Wake sleepers with any non-sleeping neighbour in range, statics
    /// included. Examines
    /// at most `wake_checks_per_tick` sleepers, continuing round-robin.
    fn wake_pass(&mut self, spatial: &SpatialIndex) -> usize {
        let limit = self.config.wake_checks_per_tick;
        if self.sleeping.is_empty() || limit == 0 {
            return 0;
        }
        let batch: Vec<EntityId> = match self.wake_cursor {
            Some(after) => self
                .sleeping
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .chain(self.sleeping.iter())
                .take(limit.min(self.sleeping.len()))
                .copied()
                .collect(),
            None => self.sleeping.iter().take(limit).copied().collect(),
        };
        self.wake_cursor = batch.last().copied();

        let distance = self.config.wake_distance;
        let mut to_wake = Vec::new();
        for id in batch {
            let Some(record) = spatial.record(id) else {
                continue;
            };
            let region = Aabb::from_center_size(record.position, Vec3::splat(distance * 2.0));
            let disturbed = spatial.region_query(&region).into_iter().any(|other| {
                other != id
                    && !self.sleeping.contains(&other)
                    && spatial
                        .record(other)
                        .is_some_and(|o| o.position.distance(&record.position) <= distance)
            });
            if disturbed {
                to_wake.push(id);
            }
        }
        to_wake.into_iter().filter(|id| self.wake(*id)).count()
    }

    fn invalidate(&mut self, ids: &[EntityId]) {
        if ids.is_empty() || self.pair_cache.is_empty() {
            return;
        }
        let ids: HashSet<EntityId> = ids.iter().copied().collect();
        self.pair_cache
            .retain_keys(|(a, b)| !ids.contains(a) && !ids.contains(b));
    }
}
