//! Generic A* over any graph whose nodes are small `Copy` keys.
//!
//! Used both for cell-level search on the navigation grid and for the coarse
//! search over the cluster graph.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

use crate::error::PathError;

/// A successful search.
#[derive(Debug, Clone, PartialEq)]
pub struct Search<N> {
    /// Nodes from start to goal inclusive.
    pub nodes: Vec<N>,
    pub cost: f32,
    pub iterations: usize,
}

/// Open-list entry ordered for a min-heap on `f`, ties broken by push order.
struct OpenNode<N> {
    f: f32,
    g: f32,
    seq: u64,
    node: N,
}

impl<N> PartialEq for OpenNode<N> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<N> Eq for OpenNode<N> {}

impl<N> PartialOrd for OpenNode<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<N> Ord for OpenNode<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Run A* from `start` to `goal`.
///
/// `neighbors(node, out)` pushes `(next, step_cost)` pairs into `out`.
/// Exceeding `max_iterations` node expansions is an error rather than a
/// partial result.
pub fn search<N, FN, FH>(
    start: N,
    goal: N,
    mut neighbors: FN,
    heuristic: FH,
    max_iterations: usize,
) -> Result<Search<N>, PathError>
where
    N: Copy + Eq + Hash,
    FN: FnMut(N, &mut Vec<(N, f32)>),
    FH: Fn(N) -> f32,
{
    if start == goal {
        return Ok(Search {
            nodes: vec![start],
            cost: 0.0,
            iterations: 0,
        });
    }

    let mut open = BinaryHeap::new();
    let mut came_from: HashMap<N, N> = HashMap::new();
    let mut g_score: HashMap<N, f32> = HashMap::new();
    let mut closed: HashSet<N> = HashSet::new();
    let mut seq = 0u64;
    let mut scratch = Vec::with_capacity(26);

    g_score.insert(start, 0.0);
    open.push(OpenNode {
        f: heuristic(start),
        g: 0.0,
        seq,
        node: start,
    });

    let mut iterations = 0;
    while let Some(OpenNode { g, node, .. }) = open.pop() {
        if node == goal {
            let mut nodes = vec![goal];
            let mut current = goal;
            while let Some(&prev) = came_from.get(&current) {
                nodes.push(prev);
                current = prev;
            }
            nodes.reverse();
            return Ok(Search {
                nodes,
                cost: g,
                iterations,
            });
        }
        if !closed.insert(node) {
            continue;
        }
        iterations += 1;
        if iterations > max_iterations {
            return Err(PathError::IterationLimit(max_iterations));
        }

        scratch.clear();
        neighbors(node, &mut scratch);
        for &(next, step) in &scratch {
            if closed.contains(&next) {
                continue;
            }
            let tentative = g + step;
            let better = g_score.get(&next).map_or(true, |&known| tentative < known);
            if better {
                g_score.insert(next, tentative);
                came_from.insert(next, node);
                seq += 1;
                open.push(OpenNode {
                    f: tentative + heuristic(next),
                    g: tentative,
                    seq,
                    node: next,
                });
            }
        }
    }

    Err(PathError::NoPath)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1D line graph 0..=n where `blocked` nodes cannot be entered.
    fn line(n: i32, blocked: &'static [i32]) -> impl FnMut(i32, &mut Vec<(i32, f32)>) {
        move |node, out| {
            for next in [node - 1, node + 1] {
                if (0..=n).contains(&next) && !blocked.contains(&next) {
                    out.push((next, 1.0));
                }
            }
        }
    }

    #[test]
    fn test_start_is_goal() {
        let result = search(3, 3, line(5, &[]), |_| 0.0, 10).unwrap();
        assert_eq!(result.nodes, vec![3]);
        assert_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_line_path() {
        let result = search(0, 4, line(5, &[]), |n| (4 - n).abs() as f32, 100).unwrap();
        assert_eq!(result.nodes, vec![0, 1, 2, 3, 4]);
        assert_eq!(result.cost, 4.0);
    }

    #[test]
    fn test_blocked_is_no_path() {
        let err = search(0, 4, line(5, &[2]), |_| 0.0, 100).unwrap_err();
        assert_eq!(err, PathError::NoPath);
    }

    #[test]
    fn test_iteration_limit() {
        let err = search(0, 50, line(100, &[]), |_| 0.0, 5).unwrap_err();
        assert_eq!(err, PathError::IterationLimit(5));
    }

    #[test]
    fn test_prefers_cheaper_edges() {
        // 0 -> 1 -> 3 costs 2, 0 -> 3 directly costs 5.
        let graph = |node: i32, out: &mut Vec<(i32, f32)>| match node {
            0 => out.extend([(1, 1.0), (3, 5.0)]),
            1 => out.push((3, 1.0)),
            _ => {}
        };
        let result = search(0, 3, graph, |_| 0.0, 100).unwrap();
        assert_eq!(result.nodes, vec![0, 1, 3]);
        assert_eq!(result.cost, 2.0);
    }
}
