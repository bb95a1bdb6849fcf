//! Narrow-phase overlap tests.

use serde::{Deserialize, Serialize};

use crate::geometry::Aabb;

/// Narrow-phase method. `Sat` and `Gjk` are accepted for configuration
/// compatibility but currently evaluate as [`NarrowPhase::Aabb`]; every such
/// check is reported as a fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrowPhase {
    #[default]
    Aabb,
    Sphere,
    Sat,
    Gjk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrowResult {
    pub colliding: bool,
    /// The requested method is not implemented and AABB was used instead.
    pub fell_back: bool,
}

impl NarrowPhase {
    pub fn test(self, a: &Aabb, b: &Aabb) -> NarrowResult {
        match self {
            NarrowPhase::Aabb => NarrowResult {
                colliding: a.intersects(b),
                fell_back: false,
            },
            NarrowPhase::Sphere => NarrowResult {
                colliding: spheres_overlap(a, b),
                fell_back: false,
            },
            NarrowPhase::Sat | NarrowPhase::Gjk => NarrowResult {
                colliding: a.intersects(b),
                fell_back: true,
            },
        }
    }
}

/// Bounding spheres (center, half-diagonal) overlap or touch.
fn spheres_overlap(a: &Aabb, b: &Aabb) -> bool {
    let reach = a.bounding_radius() + b.bounding_radius();
    a.center().distance_squared(&b.center()) <= reach * reach
}
