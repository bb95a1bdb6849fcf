//! Walkability grid the planner searches over.

use serde::{Deserialize, Serialize};

use crate::geometry::{Aabb, Vec3};
use crate::spatial::SpatialIndex;

/// Integer cell coordinate inside a [`NavGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn manhattan(self, other: GridPos) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }
}

/// Straight, face-diagonal and corner-diagonal step costs.
pub const STEP_COSTS: [f32; 4] = [0.0, 1.0, std::f32::consts::SQRT_2, 1.732_050_8];

/// Axis-aligned box of cells, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBox {
    pub min: GridPos,
    pub max: GridPos,
}

impl CellBox {
    pub fn contains(&self, p: GridPos) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

#[derive(Debug, Clone)]
pub struct NavGrid {
    origin: Vec3,
    cell_size: f32,
    dims: [i32; 3],
    walkable: Vec<bool>,
}

impl NavGrid {
    /// Grid covering `min..max` with every cell walkable.
    pub fn new(min: Vec3, max: Vec3, cell_size: f32) -> Self {
        let cell_size = cell_size.max(f32::EPSILON);
        let lo = min.min(&max);
        let extent = max.max(&min) - lo;
        let cells = |len: f32| ((len / cell_size).ceil() as i32).max(1);
        let dims = [cells(extent.x), cells(extent.y), cells(extent.z)];
        let total = dims.iter().map(|d| *d as usize).product();
        Self {
            origin: lo,
            cell_size,
            dims,
            walkable: vec![true; total],
        }
    }

    pub fn dims(&self) -> [i32; 3] {
        self.dims
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn bounds(&self) -> CellBox {
        CellBox {
            min: GridPos::new(0, 0, 0),
            max: GridPos::new(self.dims[0] - 1, self.dims[1] - 1, self.dims[2] - 1),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.walkable.len()
    }

    pub fn walkable_count(&self) -> usize {
        self.walkable.iter().filter(|w| **w).count()
    }

    pub fn contains(&self, p: GridPos) -> bool {
        self.bounds().contains(p)
    }

    fn index(&self, p: GridPos) -> Option<usize> {
        if !self.contains(p) {
            return None;
        }
        let [dx, dy, _] = self.dims;
        Some(((p.z * dy + p.y) * dx + p.x) as usize)
    }

    /// Cell containing a world point, or `None` outside the grid.
    pub fn world_to_cell(&self, p: Vec3) -> Option<GridPos> {
        if !p.is_finite() {
            return None;
        }
        let rel = p - self.origin;
        let cell = GridPos::new(
            (rel.x / self.cell_size).floor() as i32,
            (rel.y / self.cell_size).floor() as i32,
            (rel.z / self.cell_size).floor() as i32,
        );
        self.contains(cell).then_some(cell)
    }

    pub fn cell_center(&self, p: GridPos) -> Vec3 {
        let half = self.cell_size * 0.5;
        self.origin
            + Vec3::new(
                p.x as f32 * self.cell_size + half,
                p.y as f32 * self.cell_size + half,
                p.z as f32 * self.cell_size + half,
            )
    }

    pub fn is_walkable(&self, p: GridPos) -> bool {
        self.index(p).is_some_and(|i| self.walkable[i])
    }

    pub fn set_walkable(&mut self, p: GridPos, walkable: bool) -> bool {
        match self.index(p) {
            Some(i) => {
                self.walkable[i] = walkable;
                true
            }
            None => false,
        }
    }

    /// Cells whose volume overlaps `aabb`, clipped to the grid.
    pub fn cells_overlapping(&self, aabb: &Aabb) -> Option<CellBox> {
        let to_cell = |v: Vec3| {
            let rel = v - self.origin;
            GridPos::new(
                (rel.x / self.cell_size).floor() as i32,
                (rel.y / self.cell_size).floor() as i32,
                (rel.z / self.cell_size).floor() as i32,
            )
        };
        let lo = to_cell(aabb.min);
        let hi = to_cell(aabb.max);
        let b = self.bounds();
        let clipped = CellBox {
            min: GridPos::new(lo.x.max(0), lo.y.max(0), lo.z.max(0)),
            max: GridPos::new(hi.x.min(b.max.x), hi.y.min(b.max.y), hi.z.min(b.max.z)),
        };
        (clipped.min.x <= clipped.max.x
            && clipped.min.y <= clipped.max.y
            && clipped.min.z <= clipped.max.z)
            .then_some(clipped)
    }

    /// Set walkability for every cell overlapping `aabb`. Returns the number
    /// of cells touched.
    pub fn set_region(&mut self, aabb: &Aabb, walkable: bool) -> usize {
        let Some(cells) = self.cells_overlapping(aabb) else {
            return 0;
        };
        let mut touched = 0;
        for z in cells.min.z..=cells.max.z {
            for y in cells.min.y..=cells.max.y {
                for x in cells.min.x..=cells.max.x {
                    if self.set_walkable(GridPos::new(x, y, z), walkable) {
                        touched += 1;
                    }
                }
            }
        }
        touched
    }

    pub fn block_aabb(&mut self, aabb: &Aabb) -> usize {
        self.set_region(aabb, false)
    }

    /// Reset the grid to walkable and block every static object in the
    /// spatial index.
    pub fn rebuild_from_spatial(&mut self, spatial: &SpatialIndex) -> usize {
        self.walkable.iter_mut().for_each(|w| *w = true);
        let statics: Vec<Aabb> = spatial
            .ids()
            .filter_map(|id| spatial.record(id))
            .filter(|r| r.is_static)
            .map(|r| r.aabb)
            .collect();
        statics.iter().map(|bb| self.block_aabb(bb)).sum()
    }

    /// Cells an agent of `radius` needs free around its own cell.
    pub fn clearance_for(&self, radius: f32) -> i32 {
        if radius.is_finite() && radius > 0.0 {
            (radius / self.cell_size).floor() as i32
        } else {
            0
        }
    }

    /// Walkable, with every in-grid cell within `clearance` (Chebyshev) also
    /// walkable.
    pub fn is_passable(&self, p: GridPos, clearance: i32) -> bool {
        if !self.is_walkable(p) {
            return false;
        }
        if clearance <= 0 {
            return true;
        }
        for dz in -clearance..=clearance {
            for dy in -clearance..=clearance {
                for dx in -clearance..=clearance {
                    let q = p.offset(dx, dy, dz);
                    if self.contains(q) && !self.is_walkable(q) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Passable 26-connected neighbours of `p` with their step cost. Diagonal
    /// steps are refused when any axis-aligned sub-step is blocked, so paths
    /// never cut corners.
    pub fn neighbors(
        &self,
        p: GridPos,
        clearance: i32,
        within: Option<&CellBox>,
        out: &mut Vec<(GridPos, f32)>,
    ) {
        let allowed = |q: GridPos| {
            within.map_or(true, |b| b.contains(q)) && self.is_passable(q, clearance)
        };
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let axes = (dx != 0) as usize + (dy != 0) as usize + (dz != 0) as usize;
                    if axes == 0 {
                        continue;
                    }
                    let q = p.offset(dx, dy, dz);
                    if !allowed(q) {
                        continue;
                    }
                    if axes > 1 {
                        let mut clear = true;
                        for (sx, sy, sz) in sub_steps(dx, dy, dz) {
                            if !allowed(p.offset(sx, sy, sz)) {
                                clear = false;
                                break;
                            }
                        }
                        if !clear {
                            continue;
                        }
                    }
                    out.push((q, STEP_COSTS[axes]));
                }
            }
        }
    }

    /// Sampled visibility between two world points at half-cell steps.
    pub fn line_of_sight(&self, a: Vec3, b: Vec3, clearance: i32) -> bool {
        let dist = a.distance(&b);
        let step = self.cell_size * 0.5;
        let samples = (dist / step).ceil().max(1.0) as usize;
        (0..=samples).all(|i| {
            let t = i as f32 / samples as f32;
            let p = a + (b - a) * t;
            self.world_to_cell(p)
                .is_some_and(|c| self.is_passable(c, clearance))
        })
    }
}

/// Proper, non-empty sub-moves of a diagonal step.
fn sub_steps(dx: i32, dy: i32, dz: i32) -> impl Iterator<Item = (i32, i32, i32)> {
    (1..7u8).filter_map(move |mask| {
        let s = (
            if mask & 1 != 0 { dx } else { 0 },
            if mask & 2 != 0 { dy } else { 0 },
            if mask & 4 != 0 { dz } else { 0 },
        );
        let nonzero = (s.0 != 0) as u8 + (s.1 != 0) as u8 + (s.2 != 0) as u8;
        let full = (dx != 0) as u8 + (dy != 0) as u8 + (dz != 0) as u8;
        (nonzero > 0 && nonzero < full).then_some(s)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> NavGrid {
        NavGrid::new(Vec3::ZERO, Vec3::new(40.0, 4.0, 40.0), 4.0)
    }

    #[test]
    fn test_dims_and_lookup() {
        let g = grid();
        assert_eq!(g.dims(), [10, 1, 10]);
        assert_eq!(g.world_to_cell(Vec3::new(5.0, 1.0, 9.0)), Some(GridPos::new(1, 0, 2)));
        assert_eq!(g.world_to_cell(Vec3::new(-1.0, 1.0, 1.0)), None);
        assert_eq!(g.cell_center(GridPos::new(1, 0, 2)), Vec3::new(6.0, 2.0, 10.0));
    }

    #[test]
    fn test_block_aabb() {
        let mut g = grid();
        let wall = Aabb::new(Vec3::new(8.5, 0.0, 0.0), Vec3::new(12.5, 4.0, 40.0));
        assert_eq!(g.block_aabb(&wall), 10 * 2);
        assert!(!g.is_walkable(GridPos::new(2, 0, 5)));
        assert!(g.is_walkable(GridPos::new(1, 0, 5)));
        assert_eq!(g.walkable_count(), 100 - 20);
    }

    #[test]
    fn test_no_corner_cutting() {
        let mut g = grid();
        g.set_walkable(GridPos::new(1, 0, 0), false);
        let mut out = Vec::new();
        g.neighbors(GridPos::new(0, 0, 0), 0, None, &mut out);
        let cells: Vec<GridPos> = out.iter().map(|(c, _)| *c).collect();
        assert!(cells.contains(&GridPos::new(0, 0, 1)));
        assert!(!cells.contains(&GridPos::new(1, 0, 1)));
        assert!(!cells.contains(&GridPos::new(1, 0, 0)));
    }

    #[test]
    fn test_diagonal_costs() {
        let g = NavGrid::new(Vec3::ZERO, Vec3::splat(12.0), 4.0);
        let mut out = Vec::new();
        g.neighbors(GridPos::new(1, 1, 1), 0, None, &mut out);
        assert_eq!(out.len(), 26);
        let corner = out
            .iter()
            .find(|(c, _)| *c == GridPos::new(2, 2, 2))
            .map(|(_, cost)| *cost)
            .unwrap();
        assert!((corner - 3f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_clearance() {
        let mut g = grid();
        g.set_walkable(GridPos::new(5, 0, 5), false);
        assert!(g.is_passable(GridPos::new(4, 0, 4), 0));
        assert!(!g.is_passable(GridPos::new(4, 0, 4), 1));
        assert_eq!(g.clearance_for(1.0), 0);
        assert_eq!(g.clearance_for(4.5), 1);
    }

    #[test]
    fn test_line_of_sight() {
        let mut g = grid();
        let a = Vec3::new(2.0, 2.0, 20.0);
        let b = Vec3::new(38.0, 2.0, 20.0);
        assert!(g.line_of_sight(a, b, 0));
        g.set_walkable(GridPos::new(5, 0, 5), false);
        assert!(!g.line_of_sight(a, b, 0));
    }
}
