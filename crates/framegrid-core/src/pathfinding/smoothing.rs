use super::navgrid::NavGrid;
use crate::geometry::Vec3;

/// Greedy line-of-sight shortcutting: from each kept waypoint jump to the
/// farthest later waypoint that is still visible.
pub fn smooth_path(grid: &NavGrid, waypoints: &[Vec3], clearance: i32) -> Vec<Vec3> {
    if waypoints.len() <= 2 {
        return waypoints.to_vec();
    }
    let last = waypoints.len() - 1;
    let mut out = vec![waypoints[0]];
    let mut i = 0;
    while i < last {
        let next = (i + 2..=last)
            .rev()
            .find(|&j| grid.line_of_sight(waypoints[i], waypoints[j], clearance))
            .unwrap_or(i + 1);
        out.push(waypoints[next]);
        i = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Aabb;

    fn grid() -> NavGrid {
        NavGrid::new(Vec3::ZERO, Vec3::new(40.0, 4.0, 40.0), 4.0)
    }

    #[test]
    fn test_open_grid_collapses_to_endpoints() {
        let g = grid();
        let points: Vec<Vec3> = (0..8)
            .map(|i| Vec3::new(2.0 + i as f32 * 4.0, 2.0, 2.0 + i as f32 * 2.0))
            .collect();
        let smoothed = smooth_path(&g, &points, 0);
        assert_eq!(smoothed, vec![points[0], points[7]]);
    }

    #[test]
    fn test_keeps_corner_around_obstacle() {
        let mut g = grid();
        g.block_aabb(&Aabb::new(Vec3::new(8.0, 0.0, 0.0), Vec3::new(12.0, 4.0, 28.0)));
        let points = vec![
            Vec3::new(2.0, 2.0, 2.0),
            Vec3::new(2.0, 2.0, 34.0),
            Vec3::new(18.0, 2.0, 34.0),
            Vec3::new(18.0, 2.0, 2.0),
        ];
        let smoothed = smooth_path(&g, &points, 0);
        assert_eq!(smoothed.first(), points.first());
        assert_eq!(smoothed.last(), points.last());
        assert!(smoothed.len() >= 3);
    }

    #[test]
    fn test_short_paths_untouched() {
        let g = grid();
        let points = vec![Vec3::new(2.0, 2.0, 2.0), Vec3::new(30.0, 2.0, 30.0)];
        assert_eq!(smooth_path(&g, &points, 0), points);
    }
}
