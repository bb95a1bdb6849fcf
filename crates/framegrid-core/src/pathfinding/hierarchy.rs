//! Two-level cluster hierarchy for long paths.
//!
//! Level 0 tiles the navigation grid into `cluster_size`³ blocks. Adjacent
//! level-0 clusters are linked by a single entrance: the pair of cells
//! straddling the midpoint of their shared face, when both are walkable.
//! Level 1 groups 2×2×2 level-0 clusters and only records which level-1
//! clusters border each other; it narrows the level-0 search to a corridor.
//!
//! Entrances are placed once at build time. Anything the midpoint rule
//! misses (a face open only away from its midpoint) is left to the plain
//! grid search the planner falls back to.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::astar;
use super::navgrid::{CellBox, GridPos, NavGrid};
use crate::error::PathError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl ClusterId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Crossing from one level-0 cluster into a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entrance {
    /// Boundary cell inside the owning cluster.
    pub inside: GridPos,
    /// Matching boundary cell inside `to`.
    pub outside: GridPos,
    pub to: ClusterId,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub level: u32,
    pub cells: CellBox,
    pub parent: Option<ClusterId>,
    pub children: Vec<ClusterId>,
    /// Level 0 only.
    pub entrances: Vec<Entrance>,
    /// Clusters on the same level reachable in one hop.
    pub neighbors: BTreeSet<ClusterId>,
    sub_paths: HashMap<(GridPos, GridPos, i32), Vec<GridPos>>,
}

impl Cluster {
    fn new(id: ClusterId, level: u32, cells: CellBox) -> Self {
        Self {
            id,
            level,
            cells,
            parent: None,
            children: Vec::new(),
            entrances: Vec::new(),
            neighbors: BTreeSet::new(),
            sub_paths: HashMap::new(),
        }
    }

    fn center(&self) -> [f32; 3] {
        let c = |lo: i32, hi: i32| (lo + hi) as f32 * 0.5;
        [
            c(self.cells.min.x, self.cells.max.x),
            c(self.cells.min.y, self.cells.max.y),
            c(self.cells.min.z, self.cells.max.z),
        ]
    }

    pub fn cached_sub_paths(&self) -> usize {
        self.sub_paths.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyStats {
    pub levels: u32,
    pub level0_clusters: usize,
    pub level1_clusters: usize,
    pub entrances: usize,
    pub cached_sub_paths: usize,
}

/// Arena of clusters addressed by [`ClusterId`].
#[derive(Debug, Clone)]
pub struct ClusterHierarchy {
    clusters: Vec<Cluster>,
    cluster_size: i32,
    /// Level-0 clusters per axis.
    tiles: [i32; 3],
    levels: u32,
    level1_start: usize,
}

impl ClusterHierarchy {
    /// Build `levels` (1 or 2) cluster levels over `grid`.
    pub fn build(grid: &NavGrid, cluster_size: u32, levels: u32) -> Self {
        let size = cluster_size.max(1) as i32;
        let dims = grid.dims();
        let tiles = dims.map(|d| (d + size - 1) / size);
        let mut h = Self {
            clusters: Vec::new(),
            cluster_size: size,
            tiles,
            levels: levels.clamp(1, 2),
            level1_start: 0,
        };

        for tz in 0..tiles[2] {
            for ty in 0..tiles[1] {
                for tx in 0..tiles[0] {
                    let min = GridPos::new(tx * size, ty * size, tz * size);
                    let max = GridPos::new(
                        (min.x + size - 1).min(dims[0] - 1),
                        (min.y + size - 1).min(dims[1] - 1),
                        (min.z + size - 1).min(dims[2] - 1),
                    );
                    let id = ClusterId(h.clusters.len() as u32);
                    h.clusters.push(Cluster::new(id, 0, CellBox { min, max }));
                }
            }
        }

        for index in 0..h.clusters.len() {
            let tile = h.tile_of(ClusterId(index as u32));
            for axis in 0..3 {
                let mut next = tile;
                next[axis] += 1;
                if let Some(other) = h.level0_at(next) {
                    h.link(grid, ClusterId(index as u32), other, axis);
                }
            }
        }

        if h.levels >= 2 {
            h.build_level1();
        }
        log::debug!(
            "cluster hierarchy built: {} level-0 clusters, {} entrances",
            h.level1_start_or_len(),
            h.clusters.iter().map(|c| c.entrances.len()).sum::<usize>() / 2
        );
        h
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id.index())
    }

    /// Level-0 cluster containing `cell`.
    pub fn cluster_of(&self, cell: GridPos) -> Option<ClusterId> {
        if cell.x < 0 || cell.y < 0 || cell.z < 0 {
            return None;
        }
        self.level0_at([
            cell.x / self.cluster_size,
            cell.y / self.cluster_size,
            cell.z / self.cluster_size,
        ])
    }

    pub fn stats(&self) -> HierarchyStats {
        let level0 = self.level1_start_or_len();
        HierarchyStats {
            levels: self.levels,
            level0_clusters: level0,
            level1_clusters: self.clusters.len() - level0,
            entrances: self.clusters.iter().map(|c| c.entrances.len()).sum::<usize>() / 2,
            cached_sub_paths: self.clusters.iter().map(|c| c.sub_paths.len()).sum(),
        }
    }

    pub fn clear_sub_paths(&mut self) {
        for cluster in &mut self.clusters {
            cluster.sub_paths.clear();
        }
    }

    /// Cell path from `start` to `goal` through the cluster graph. Errors
    /// when the points share a cluster or any stage fails; the caller is
    /// expected to fall back to a plain grid search.
    pub fn find_path(
        &mut self,
        grid: &NavGrid,
        start: GridPos,
        goal: GridPos,
        clearance: i32,
        max_iterations: usize,
    ) -> Result<Vec<GridPos>, PathError> {
        let from = self.cluster_of(start).ok_or(PathError::StartOutsideGrid)?;
        let to = self.cluster_of(goal).ok_or(PathError::EndOutsideGrid)?;
        if from == to {
            return Err(PathError::NoPath);
        }

        let corridor = if self.levels >= 2 {
            self.corridor(from, to, max_iterations)
        } else {
            None
        };
        let route = match corridor {
            Some(ref allowed) => self
                .coarse_route(from, to, Some(allowed), max_iterations)
                .or_else(|_| self.coarse_route(from, to, None, max_iterations))?,
            None => self.coarse_route(from, to, None, max_iterations)?,
        };

        let mut cells = vec![start];
        let mut current = start;
        for hop in route.windows(2) {
            let (here, next) = (hop[0], hop[1]);
            let entrance = self.clusters[here.index()]
                .entrances
                .iter()
                .find(|e| e.to == next)
                .copied()
                .ok_or(PathError::NoPath)?;
            let segment =
                self.refine(grid, here, current, entrance.inside, clearance, max_iterations)?;
            cells.extend(segment.into_iter().skip(1));
            if !grid.is_passable(entrance.outside, clearance) {
                return Err(PathError::NoPath);
            }
            cells.push(entrance.outside);
            current = entrance.outside;
        }
        let last = self.refine(grid, to, current, goal, clearance, max_iterations)?;
        cells.extend(last.into_iter().skip(1));
        Ok(cells)
    }

    /// Level-0 clusters whose level-1 parents lie on a level-1 route.
    fn corridor(
        &self,
        from: ClusterId,
        to: ClusterId,
        max_iterations: usize,
    ) -> Option<BTreeSet<ClusterId>> {
        let parent_from = self.clusters[from.index()].parent?;
        let parent_to = self.clusters[to.index()].parent?;
        let route = self
            .graph_search(parent_from, parent_to, None, max_iterations)
            .ok()?;
        Some(
            route
                .iter()
                .flat_map(|p| self.clusters[p.index()].children.iter().copied())
                .collect(),
        )
    }

    fn coarse_route(
        &self,
        from: ClusterId,
        to: ClusterId,
        allowed: Option<&BTreeSet<ClusterId>>,
        max_iterations: usize,
    ) -> Result<Vec<ClusterId>, PathError> {
        self.graph_search(from, to, allowed, max_iterations)
    }

    fn graph_search(
        &self,
        from: ClusterId,
        to: ClusterId,
        allowed: Option<&BTreeSet<ClusterId>>,
        max_iterations: usize,
    ) -> Result<Vec<ClusterId>, PathError> {
        let goal_center = self.clusters[to.index()].center();
        let distance = |a: [f32; 3], b: [f32; 3]| {
            ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
        };
        let neighbors = |id: ClusterId, out: &mut Vec<(ClusterId, f32)>| {
            let cluster = &self.clusters[id.index()];
            let here = cluster.center();
            for next in &cluster.neighbors {
                if allowed.is_some_and(|a| !a.contains(next)) {
                    continue;
                }
                out.push((*next, distance(here, self.clusters[next.index()].center())));
            }
        };
        let heuristic = |id: ClusterId| distance(self.clusters[id.index()].center(), goal_center);
        astar::search(from, to, neighbors, heuristic, max_iterations).map(|s| s.nodes)
    }

    /// Grid path confined to one cluster, memoized per cluster.
    fn refine(
        &mut self,
        grid: &NavGrid,
        cluster: ClusterId,
        from: GridPos,
        to: GridPos,
        clearance: i32,
        max_iterations: usize,
    ) -> Result<Vec<GridPos>, PathError> {
        let key = (from, to, clearance);
        if let Some(path) = self.clusters[cluster.index()].sub_paths.get(&key) {
            return Ok(path.clone());
        }
        let bounds = self.clusters[cluster.index()].cells;
        let path = super::grid_search(grid, from, to, clearance, Some(&bounds), max_iterations)?;
        self.clusters[cluster.index()]
            .sub_paths
            .insert(key, path.nodes.clone());
        Ok(path.nodes)
    }

    fn tile_of(&self, id: ClusterId) -> [i32; 3] {
        let i = id.0 as i32;
        let [tx, ty, _] = self.tiles;
        [i % tx, (i / tx) % ty, i / (tx * ty)]
    }

    fn level0_at(&self, tile: [i32; 3]) -> Option<ClusterId> {
        let [tx, ty, tz] = self.tiles;
        if tile.iter().any(|t| *t < 0) || tile[0] >= tx || tile[1] >= ty || tile[2] >= tz {
            return None;
        }
        Some(ClusterId((tile[2] * ty * tx + tile[1] * tx + tile[0]) as u32))
    }

    fn level1_start_or_len(&self) -> usize {
        if self.level1_start == 0 {
            self.clusters.len()
        } else {
            self.level1_start
        }
    }

    /// Link `a` to its `+axis` neighbour `b` through the face midpoint.
    fn link(&mut self, grid: &NavGrid, a: ClusterId, b: ClusterId, axis: usize) {
        let ca = self.clusters[a.index()].cells;
        let mid = |lo: i32, hi: i32| lo + (hi - lo) / 2;
        let mut inside = GridPos::new(
            mid(ca.min.x, ca.max.x),
            mid(ca.min.y, ca.max.y),
            mid(ca.min.z, ca.max.z),
        );
        match axis {
            0 => inside.x = ca.max.x,
            1 => inside.y = ca.max.y,
            _ => inside.z = ca.max.z,
        }
        let outside = match axis {
            0 => inside.offset(1, 0, 0),
            1 => inside.offset(0, 1, 0),
            _ => inside.offset(0, 0, 1),
        };
        if !grid.is_walkable(inside) || !grid.is_walkable(outside) {
            return;
        }
        self.clusters[a.index()].entrances.push(Entrance {
            inside,
            outside,
            to: b,
        });
        self.clusters[a.index()].neighbors.insert(b);
        self.clusters[b.index()].entrances.push(Entrance {
            inside: outside,
            outside: inside,
            to: a,
        });
        self.clusters[b.index()].neighbors.insert(a);
    }

    fn build_level1(&mut self) {
        let level0_count = self.clusters.len();
        let tiles1 = self.tiles.map(|t| (t + 1) / 2);
        self.level1_start = level0_count;

        for tz in 0..tiles1[2] {
            for ty in 0..tiles1[1] {
                for tx in 0..tiles1[0] {
                    let id = ClusterId(self.clusters.len() as u32);
                    let mut children = Vec::new();
                    for dz in 0..2 {
                        for dy in 0..2 {
                            for dx in 0..2 {
                                if let Some(child) =
                                    self.level0_at([tx * 2 + dx, ty * 2 + dy, tz * 2 + dz])
                                {
                                    children.push(child);
                                }
                            }
                        }
                    }
                    let cells = children
                        .iter()
                        .map(|c| self.clusters[c.index()].cells)
                        .reduce(|a, b| CellBox {
                            min: GridPos::new(
                                a.min.x.min(b.min.x),
                                a.min.y.min(b.min.y),
                                a.min.z.min(b.min.z),
                            ),
                            max: GridPos::new(
                                a.max.x.max(b.max.x),
                                a.max.y.max(b.max.y),
                                a.max.z.max(b.max.z),
                            ),
                        });
                    let Some(cells) = cells else {
                        continue;
                    };
                    let mut cluster = Cluster::new(id, 1, cells);
                    cluster.children = children;
                    for child in &cluster.children {
                        self.clusters[child.index()].parent = Some(id);
                    }
                    self.clusters.push(cluster);
                }
            }
        }

        // Level-1 adjacency follows level-0 entrances that cross parents.
        for index in 0..level0_count {
            let Some(parent) = self.clusters[index].parent else {
                continue;
            };
            let crossings: Vec<ClusterId> = self.clusters[index]
                .entrances
                .iter()
                .filter_map(|e| self.clusters[e.to.index()].parent)
                .filter(|p| *p != parent)
                .collect();
            for other in crossings {
                self.clusters[parent.index()].neighbors.insert(other);
            }
        }
    }
}
