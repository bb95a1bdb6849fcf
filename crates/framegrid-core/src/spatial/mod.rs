//! Spatial index: a uniform grid and an octree over the same entity set.
//!
//! The grid answers radius, region and ray queries by cell enumeration; the
//! octree takes over for region queries spanning too many cells to walk.
//! Every registered entity is held by exactly one octree node and by every
//! grid cell its box overlaps, unless the box spans more than
//! `max_cells_per_object` cells. Such oversized entities skip the grid and
//! are matched separately by every query.
//!
//! Radius queries cache their candidate set for a short TTL, keyed by the
//! quantized query. Distances are always recomputed from live positions, so
//! removed or departed entities never show up; an entity that moves into
//! range of a cached query is missed until the entry expires.

mod grid;
mod octree;

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

pub use grid::{CellKey, CellRange, GridCell, UniformGrid};
pub use octree::{NodeId, Octree, OctreeNode, OctreeStats};

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use crate::config::SpatialConfig;
use crate::entity::{EntityId, ObjectSnapshot, SpatialObject};
use crate::geometry::{Aabb, Vec3};

/// Registry entry for one indexed entity.
#[derive(Debug, Clone)]
pub struct IndexedObject {
    pub id: EntityId,
    pub position: Vec3,
    pub size: Vec3,
    pub aabb: Aabb,
    pub is_static: bool,
    pub velocity: Vec3,
    /// Grid cells currently listing this entity.
    pub cells: Vec<CellKey>,
    /// Too large for the grid; held by the octree only.
    pub oversized: bool,
    pub last_update: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearbyHit {
    pub id: EntityId,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayHit {
    pub id: EntityId,
    pub distance: f32,
    pub point: Vec3,
}

/// An entity that was re-indexed since the last [`SpatialIndex::drain_moved`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovedObject {
    pub id: EntityId,
    /// Largest single displacement seen since the last drain.
    pub displacement: f32,
}

/// Result of applying one position update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// Within tolerance; only velocity was recorded.
    Skipped,
    Reindexed { displacement: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NearbyKey {
    x: i32,
    y: i32,
    z: i32,
    radius: i32,
    include_static: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpatialMetrics {
    pub objects: usize,
    pub static_objects: usize,
    pub oversized_objects: usize,
    pub grid_cells: usize,
    pub occupied_cells: usize,
    pub octree: OctreeStats,
    pub pending_updates: usize,
    pub nearby_queries: u64,
    pub region_queries: u64,
    pub octree_region_queries: u64,
    pub raycasts: u64,
    pub updates_applied: u64,
    pub updates_skipped: u64,
    pub rejected: u64,
    pub query_cache_entries: usize,
    pub query_cache_hit_rate: f64,
    pub cells_cleaned: u64,
}

pub struct SpatialIndex {
    config: SpatialConfig,
    clock: SharedClock,
    grid: UniformGrid,
    octree: Octree,
    registry: HashMap<EntityId, IndexedObject>,
    oversized: HashSet<EntityId>,
    pending: HashMap<EntityId, ObjectSnapshot>,
    pending_order: VecDeque<EntityId>,
    moved: HashMap<EntityId, f32>,
    query_cache: TtlCache<NearbyKey, Vec<EntityId>>,
    metrics: SpatialMetrics,
    shut_down: bool,
}

impl SpatialIndex {
    pub fn new(config: SpatialConfig, clock: SharedClock) -> Self {
        Self {
            grid: UniformGrid::new(config.cell_size.max(f32::EPSILON)),
            octree: Octree::new(
                config.world_center,
                config.world_half_extent,
                config.octree_max_depth,
                config.octree_max_objects,
            ),
            registry: HashMap::new(),
            oversized: HashSet::new(),
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
            moved: HashMap::new(),
            query_cache: TtlCache::new(config.query_cache_ttl, config.query_cache_capacity),
            metrics: SpatialMetrics::default(),
            shut_down: false,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    /// Register an object. Fails without side effects if its position cannot
    /// be resolved or its id is already registered.
    pub fn add_object<O: SpatialObject + ?Sized>(&mut self, obj: &O, is_static: bool) -> bool {
        if self.shut_down {
            return false;
        }
        let Some(snap) = ObjectSnapshot::capture(obj) else {
            log::debug!("add_object {}: position unavailable", obj.id());
            self.metrics.rejected += 1;
            return false;
        };
        if self.registry.contains_key(&snap.id) {
            log::debug!("add_object {}: already registered", snap.id);
            self.metrics.rejected += 1;
            return false;
        }
        let now = self.clock.now();
        let aabb = snap.aabb();
        let (cells, oversized) = self.grid_insert(snap.id, &aabb, is_static);
        self.octree.insert(snap.id, aabb);
        self.registry.insert(
            snap.id,
            IndexedObject {
                id: snap.id,
                position: snap.position,
                size: snap.size,
                aabb,
                is_static,
                velocity: snap.velocity,
                cells,
                oversized,
                last_update: now,
            },
        );
        // New entities would otherwise be invisible to cached queries.
        self.query_cache.clear();
        true
    }

    /// Unregister an object, purging it from every cell and its octree node.
    pub fn remove_object(&mut self, id: EntityId) -> bool {
        let Some(record) = self.registry.remove(&id) else {
            return false;
        };
        let now = self.clock.now();
        self.grid.remove(id, &record.cells, now);
        self.oversized.remove(&id);
        self.octree.remove(id);
        if self.pending.remove(&id).is_some() {
            self.pending_order.retain(|e| *e != id);
        }
        self.moved.remove(&id);
        true
    }

    /// Apply a position update immediately.
    pub fn update_object<O: SpatialObject + ?Sized>(&mut self, obj: &O) -> bool {
        match ObjectSnapshot::capture(obj) {
            Some(snap) => self.apply_update(snap).is_some(),
            None => {
                log::debug!("update_object {}: position unavailable", obj.id());
                self.metrics.rejected += 1;
                false
            }
        }
    }

    /// Apply a validated snapshot. `None` if the entity is not registered.
    pub fn apply_update(&mut self, snap: ObjectSnapshot) -> Option<UpdateOutcome> {
        let now = self.clock.now();
        let tolerance = self.config.update_tolerance;
        let record = self.registry.get_mut(&snap.id)?;
        record.velocity = snap.velocity;
        record.last_update = now;

        let displacement = record.position.distance(&snap.position);
        if displacement < tolerance && record.size == snap.size {
            self.metrics.updates_skipped += 1;
            return Some(UpdateOutcome::Skipped);
        }

        let aabb = snap.aabb();
        let old_cells = std::mem::take(&mut record.cells);
        record.position = snap.position;
        record.size = snap.size;
        record.aabb = aabb;
        let is_static = record.is_static;

        self.grid.remove(snap.id, &old_cells, now);
        let (cells, oversized) = self.grid_insert(snap.id, &aabb, is_static);
        self.octree.insert(snap.id, aabb);
        if let Some(record) = self.registry.get_mut(&snap.id) {
            record.cells = cells;
            record.oversized = oversized;
        }

        let entry = self.moved.entry(snap.id).or_insert(0.0);
        *entry = entry.max(displacement);
        self.metrics.updates_applied += 1;
        Some(UpdateOutcome::Reindexed { displacement })
    }

    /// Queue an update for a later [`process_pending_updates`] call. A newer
    /// update for the same entity replaces the queued one.
    ///
    /// [`process_pending_updates`]: SpatialIndex::process_pending_updates
    pub fn enqueue_update<O: SpatialObject + ?Sized>(&mut self, obj: &O) -> bool {
        let Some(snap) = ObjectSnapshot::capture(obj) else {
            self.metrics.rejected += 1;
            return false;
        };
        if !self.registry.contains_key(&snap.id) {
            return false;
        }
        if self.pending.insert(snap.id, snap).is_none() {
            self.pending_order.push_back(snap.id);
        }
        true
    }

    /// Apply up to `max` queued updates in arrival order.
    pub fn process_pending_updates(&mut self, max: usize) -> usize {
        let mut applied = 0;
        while applied < max {
            let Some(id) = self.pending_order.pop_front() else {
                break;
            };
            if let Some(snap) = self.pending.remove(&id) {
                if self.apply_update(snap).is_some() {
                    applied += 1;
                }
            }
        }
        applied
    }

    pub fn pending_updates(&self) -> usize {
        self.pending_order.len()
    }

    /// Entities re-indexed since the previous call.
    pub fn drain_moved(&mut self) -> Vec<MovedObject> {
        let mut moved: Vec<MovedObject> = self
            .moved
            .drain()
            .map(|(id, displacement)| MovedObject { id, displacement })
            .collect();
        moved.sort_by_key(|m| m.id);
        moved
    }

    /// Entities whose center is within `radius` of `point`, nearest first.
    pub fn nearby_objects(
        &mut self,
        point: Vec3,
        radius: f32,
        include_static: bool,
    ) -> Vec<NearbyHit> {
        self.metrics.nearby_queries += 1;
        if !point.is_finite() || !(radius >= 0.0) {
            return Vec::new();
        }
        let now = self.clock.now();
        let key = self.nearby_key(point, radius, include_static);
        let candidates = match self.query_cache.get(&key, now) {
            Some(ids) => ids.clone(),
            None => {
                // Wide enough to cover every query that rounds to this key.
                let q = self.config.query_cache_quantum.max(f32::EPSILON);
                let center = Vec3::new(key.x as f32, key.y as f32, key.z as f32) * q;
                let reach = key.radius as f32 * q + q * 1.4;
                let bounds = Aabb::from_center_size(center, Vec3::splat(reach * 2.0));
                let reach_sq = reach * reach;
                let ids: Vec<EntityId> = self
                    .candidates(&bounds, include_static)
                    .into_iter()
                    .filter(|id| {
                        self.registry
                            .get(id)
                            .is_some_and(|r| r.position.distance_squared(&center) <= reach_sq)
                    })
                    .collect();
                self.query_cache.insert(key, ids.clone(), now);
                ids
            }
        };

        let radius_sq = radius * radius;
        let mut hits: Vec<NearbyHit> = candidates
            .into_iter()
            .filter_map(|id| {
                let record = self.registry.get(&id)?;
                let d_sq = record.position.distance_squared(&point);
                (d_sq <= radius_sq).then(|| NearbyHit {
                    id,
                    distance: d_sq.sqrt(),
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits
    }

    /// Every entity whose box overlaps the region. Unordered.
    pub fn objects_in_region(&mut self, min: Vec3, max: Vec3) -> Vec<EntityId> {
        self.metrics.region_queries += 1;
        if !min.is_finite() || !max.is_finite() {
            return Vec::new();
        }
        let region = Aabb::new(min, max);
        if self.grid.range(&region).count() > self.config.max_query_cells as u64 {
            self.metrics.octree_region_queries += 1;
        }
        self.region_query(&region)
    }

    /// Region query without touching counters, for callers holding `&self`.
    pub fn region_query(&self, region: &Aabb) -> Vec<EntityId> {
        self.candidates(region, true)
            .into_iter()
            .filter(|id| {
                self.registry
                    .get(id)
                    .is_some_and(|r| r.aabb.intersects(region))
            })
            .collect()
    }

    /// Entities whose box the ray passes through, nearest first.
    pub fn raycast(&mut self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<RayHit> {
        self.metrics.raycasts += 1;
        let dir = direction.normalize();
        if !origin.is_finite() || dir == Vec3::ZERO || !(max_distance > 0.0) {
            return Vec::new();
        }

        let cs = self.grid.cell_size();
        let start = CellKey::from_point(origin, cs);
        let mut cell = [start.0, start.1, start.2];
        let mut step = [0i32; 3];
        let mut t_next = [f32::INFINITY; 3];
        let mut t_delta = [f32::INFINITY; 3];
        for i in 0..3 {
            let d = dir.axis(i);
            let o = origin.axis(i);
            if d > 0.0 {
                step[i] = 1;
                t_next[i] = ((cell[i] + 1) as f32 * cs - o) / d;
                t_delta[i] = cs / d;
            } else if d < 0.0 {
                step[i] = -1;
                t_next[i] = (cell[i] as f32 * cs - o) / d;
                t_delta[i] = -cs / d;
            }
        }

        let max_steps = (max_distance / cs).ceil() as usize * 3 + 3;
        let mut tested = HashSet::new();
        let mut hits = Vec::new();
        for id in &self.oversized {
            tested.insert(*id);
            let Some(record) = self.registry.get(id) else {
                continue;
            };
            if let Some(t) = record.aabb.ray_intersection(origin, dir, max_distance) {
                hits.push(RayHit {
                    id: *id,
                    distance: t,
                    point: origin + dir * t,
                });
            }
        }
        for _ in 0..max_steps {
            if let Some(grid_cell) = self.grid.get(&CellKey(cell[0], cell[1], cell[2])) {
                for id in grid_cell.iter(true) {
                    if !tested.insert(id) {
                        continue;
                    }
                    let Some(record) = self.registry.get(&id) else {
                        continue;
                    };
                    if let Some(t) = record.aabb.ray_intersection(origin, dir, max_distance) {
                        hits.push(RayHit {
                            id,
                            distance: t,
                            point: origin + dir * t,
                        });
                    }
                }
            }
            let axis = if t_next[0] <= t_next[1] && t_next[0] <= t_next[2] {
                0
            } else if t_next[1] <= t_next[2] {
                1
            } else {
                2
            };
            if t_next[axis] > max_distance {
                break;
            }
            cell[axis] += step[axis];
            t_next[axis] += t_delta[axis];
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits
    }

    /// Remove every entity `alive` rejects. Returns the removed ids.
    pub fn retain_alive(&mut self, mut alive: impl FnMut(EntityId) -> bool) -> Vec<EntityId> {
        let mut dead: Vec<EntityId> = self
            .registry
            .keys()
            .copied()
            .filter(|id| !alive(*id))
            .collect();
        dead.sort();
        for id in &dead {
            self.remove_object(*id);
        }
        if !dead.is_empty() {
            log::debug!("pruned {} dead entities from spatial index", dead.len());
        }
        dead
    }

    /// Drop grid cells that stayed empty past the grace period.
    pub fn cleanup_empty_cells(&mut self) -> usize {
        let now = self.clock.now();
        let removed = self.grid.cleanup_empty(now, self.config.cell_grace_period);
        self.query_cache.purge_expired(now);
        self.metrics.cells_cleaned += removed as u64;
        removed
    }

    pub fn record(&self, id: EntityId) -> Option<&IndexedObject> {
        self.registry.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.registry.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.registry.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn metrics(&self) -> SpatialMetrics {
        SpatialMetrics {
            objects: self.registry.len(),
            static_objects: self.registry.values().filter(|r| r.is_static).count(),
            oversized_objects: self.oversized.len(),
            grid_cells: self.grid.cell_count(),
            occupied_cells: self.grid.occupied_cells(),
            octree: self.octree.stats(),
            pending_updates: self.pending_order.len(),
            query_cache_entries: self.query_cache.len(),
            query_cache_hit_rate: self.query_cache.hit_rate(),
            ..self.metrics
        }
    }

    pub fn shutdown(&mut self) {
        self.registry.clear();
        self.oversized.clear();
        self.grid.clear();
        self.octree.clear();
        self.pending.clear();
        self.pending_order.clear();
        self.moved.clear();
        self.query_cache.clear();
        self.shut_down = true;
        log::info!("spatial index shut down");
    }

    /// List `id` in the grid cells its box covers, or mark it oversized when
    /// that would exceed `max_cells_per_object`.
    fn grid_insert(&mut self, id: EntityId, aabb: &Aabb, is_static: bool) -> (Vec<CellKey>, bool) {
        if self.grid.range(aabb).count() > self.config.max_cells_per_object as u64 {
            log::debug!("{} spans too many cells, indexing in octree only", id);
            self.oversized.insert(id);
            return (Vec::new(), true);
        }
        self.oversized.remove(&id);
        (self.grid.insert(id, aabb, is_static), false)
    }

    fn nearby_key(&self, point: Vec3, radius: f32, include_static: bool) -> NearbyKey {
        let q = self.config.query_cache_quantum.max(f32::EPSILON);
        NearbyKey {
            x: (point.x / q).round() as i32,
            y: (point.y / q).round() as i32,
            z: (point.z / q).round() as i32,
            radius: (radius / q).round() as i32,
            include_static,
        }
    }

    /// Ids listed in the cells covering `bounds`, or found by the octree when
    /// that would mean walking too many cells. Deduplicated; not yet
    /// filtered by exact geometry.
    fn candidates(&self, bounds: &Aabb, include_static: bool) -> Vec<EntityId> {
        let range = self.grid.range(bounds);
        if range.count() > self.config.max_query_cells as u64 {
            let mut found = Vec::new();
            self.octree.query_region(bounds, &mut found);
            if !include_static {
                found.retain(|id| self.registry.get(id).is_some_and(|r| !r.is_static));
            }
            return found;
        }
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for key in range.keys() {
            if let Some(cell) = self.grid.get(&key) {
                for id in cell.iter(include_static) {
                    if seen.insert(id) {
                        found.push(id);
                    }
                }
            }
        }
        for id in &self.oversized {
            let Some(record) = self.registry.get(id) else {
                continue;
            };
            if (include_static || !record.is_static) && record.aabb.intersects(bounds) {
                found.push(*id);
            }
        }
        found
    }
}
