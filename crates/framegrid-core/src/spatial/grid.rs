//! Uniform hash grid over world space.

use std::collections::{HashMap, HashSet};

use crate::entity::EntityId;
use crate::geometry::{Aabb, Vec3};

/// Quantized cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey(pub i32, pub i32, pub i32);

impl CellKey {
    pub fn from_point(p: Vec3, cell_size: f32) -> Self {
        CellKey(
            quantize(p.x, cell_size),
            quantize(p.y, cell_size),
            quantize(p.z, cell_size),
        )
    }

    pub fn bounds(&self, cell_size: f32) -> Aabb {
        let min = Vec3::new(
            self.0 as f32 * cell_size,
            self.1 as f32 * cell_size,
            self.2 as f32 * cell_size,
        );
        Aabb::new(min, min + Vec3::splat(cell_size))
    }
}

fn quantize(v: f32, cell_size: f32) -> i32 {
    // `as` saturates, so far-away or infinite values clamp instead of wrapping.
    (v / cell_size).floor() as i32
}

/// Inclusive box of cell keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub min: CellKey,
    pub max: CellKey,
}

impl CellRange {
    pub fn covering(aabb: &Aabb, cell_size: f32) -> Self {
        Self {
            min: CellKey::from_point(aabb.min, cell_size),
            max: CellKey::from_point(aabb.max, cell_size),
        }
    }

    /// Number of cells in the range, saturating.
    pub fn count(&self) -> u64 {
        let span = |lo: i32, hi: i32| (hi as i64 - lo as i64 + 1).max(0) as u64;
        span(self.min.0, self.max.0)
            .saturating_mul(span(self.min.1, self.max.1))
            .saturating_mul(span(self.min.2, self.max.2))
    }

    pub fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        let (lo, hi) = (self.min, self.max);
        (lo.0..=hi.0).flat_map(move |x| {
            (lo.1..=hi.1).flat_map(move |y| (lo.2..=hi.2).map(move |z| CellKey(x, y, z)))
        })
    }
}

/// Entity ids overlapping one cell, split by mobility.
#[derive(Debug, Clone, Default)]
pub struct GridCell {
    pub statics: HashSet<EntityId>,
    pub dynamics: HashSet<EntityId>,
    /// When the cell last became empty; `None` while occupied.
    pub empty_since: Option<f64>,
}

impl GridCell {
    pub fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.dynamics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statics.len() + self.dynamics.len()
    }

    pub fn iter(&self, include_static: bool) -> impl Iterator<Item = EntityId> + '_ {
        let statics = if include_static {
            Some(self.statics.iter().copied())
        } else {
            None
        };
        self.dynamics
            .iter()
            .copied()
            .chain(statics.into_iter().flatten())
    }
}

#[derive(Debug, Clone)]
pub struct UniformGrid {
    cell_size: f32,
    cells: HashMap<CellKey, GridCell>,
}

impl UniformGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn range(&self, aabb: &Aabb) -> CellRange {
        CellRange::covering(aabb, self.cell_size)
    }

    /// Insert `id` into every cell its box overlaps, returning those cells.
    pub fn insert(&mut self, id: EntityId, aabb: &Aabb, is_static: bool) -> Vec<CellKey> {
        let keys: Vec<CellKey> = self.range(aabb).keys().collect();
        for key in &keys {
            let cell = self.cells.entry(*key).or_default();
            if is_static {
                cell.statics.insert(id);
            } else {
                cell.dynamics.insert(id);
            }
            cell.empty_since = None;
        }
        keys
    }

    pub fn remove(&mut self, id: EntityId, keys: &[CellKey], now: f64) {
        for key in keys {
            if let Some(cell) = self.cells.get_mut(key) {
                cell.statics.remove(&id);
                cell.dynamics.remove(&id);
                if cell.is_empty() && cell.empty_since.is_none() {
                    cell.empty_since = Some(now);
                }
            }
        }
    }

    pub fn get(&self, key: &CellKey) -> Option<&GridCell> {
        self.cells.get(key)
    }

    /// True if any cell still lists `id`.
    pub fn contains(&self, id: EntityId) -> bool {
        self.cells
            .values()
            .any(|c| c.statics.contains(&id) || c.dynamics.contains(&id))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.values().filter(|c| !c.is_empty()).count()
    }

    /// Drop cells that have been empty for at least `grace` seconds.
    pub fn cleanup_empty(&mut self, now: f64, grace: f64) -> usize {
        let before = self.cells.len();
        self.cells.retain(|_, cell| match cell.empty_since {
            Some(since) if cell.is_empty() => now - since < grace,
            _ => true,
        });
        before - self.cells.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_coordinates_floor() {
        assert_eq!(CellKey::from_point(Vec3::new(-0.5, 0.5, 7.9), 8.0), CellKey(-1, 0, 0));
        assert_eq!(CellKey::from_point(Vec3::new(8.0, -8.0, 0.0), 8.0), CellKey(1, -1, 0));
    }

    #[test]
    fn test_range_count_and_keys() {
        let aabb = Aabb::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(9.0, 1.0, 1.0));
        let range = CellRange::covering(&aabb, 8.0);
        assert_eq!(range.count(), 3);
        let keys: Vec<_> = range.keys().collect();
        assert_eq!(keys, vec![CellKey(-1, 0, 0), CellKey(0, 0, 0), CellKey(1, 0, 0)]);
    }

    #[test]
    fn test_insert_spanning_cells() {
        let mut grid = UniformGrid::new(4.0);
        let aabb = Aabb::from_center_size(Vec3::new(4.0, 1.0, 1.0), Vec3::splat(2.0));
        let keys = grid.insert(EntityId(1), &aabb, false);
        assert_eq!(keys.len(), 2);
        assert!(grid.contains(EntityId(1)));
        grid.remove(EntityId(1), &keys, 0.0);
        assert!(!grid.contains(EntityId(1)));
    }

    #[test]
    fn test_empty_cells_survive_grace_period() {
        let mut grid = UniformGrid::new(4.0);
        let aabb = Aabb::from_center_size(Vec3::splat(1.0), Vec3::splat(1.0));
        let keys = grid.insert(EntityId(1), &aabb, true);
        grid.remove(EntityId(1), &keys, 10.0);
        assert_eq!(grid.cleanup_empty(12.0, 5.0), 0);
        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.cleanup_empty(15.0, 5.0), 1);
        assert_eq!(grid.cell_count(), 0);
    }

    #[test]
    fn test_reoccupied_cell_is_kept() {
        let mut grid = UniformGrid::new(4.0);
        let aabb = Aabb::from_center_size(Vec3::splat(1.0), Vec3::splat(1.0));
        let keys = grid.insert(EntityId(1), &aabb, false);
        grid.remove(EntityId(1), &keys, 0.0);
        grid.insert(EntityId(2), &aabb, false);
        assert_eq!(grid.cleanup_empty(100.0, 5.0), 0);
    }
}
