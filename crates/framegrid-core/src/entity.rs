//! Host-facing entity handles.
//!
//! The subsystem never derives identity from the host: every object carries a
//! caller-assigned [`EntityId`] and exposes its position and size through
//! [`SpatialObject`].

use serde::{Deserialize, Serialize};

use crate::geometry::{Aabb, Vec3};

/// Stable, caller-assigned entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything the spatial index can track.
pub trait SpatialObject {
    fn id(&self) -> EntityId;

    /// Current world position, or `None` if it cannot be determined
    /// (e.g. the host object is mid-teardown).
    fn position(&self) -> Option<Vec3>;

    /// Full edge lengths of the object's bounding box.
    fn size(&self) -> Vec3;

    fn velocity(&self) -> Vec3 {
        Vec3::ZERO
    }
}

/// Point-in-time copy of a [`SpatialObject`], validated for indexing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectSnapshot {
    pub id: EntityId,
    pub position: Vec3,
    pub size: Vec3,
    pub velocity: Vec3,
}

impl ObjectSnapshot {
    /// Capture an object, rejecting missing or non-finite positions.
    pub fn capture<O: SpatialObject + ?Sized>(obj: &O) -> Option<Self> {
        let position = obj.position()?;
        let size = obj.size().abs();
        if !position.is_finite() || !size.is_finite() {
            return None;
        }
        let velocity = obj.velocity();
        Some(Self {
            id: obj.id(),
            position,
            size,
            velocity: if velocity.is_finite() {
                velocity
            } else {
                Vec3::ZERO
            },
        })
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_center_size(self.position, self.size)
    }
}

/// Plain-data [`SpatialObject`] for hosts without their own entity type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub id: EntityId,
    pub position: Vec3,
    pub size: Vec3,
    pub velocity: Vec3,
}

impl Body {
    pub fn new(id: u64, position: Vec3, size: Vec3) -> Self {
        Self {
            id: EntityId(id),
            position,
            size,
            velocity: Vec3::ZERO,
        }
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn moved_to(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }
}

impl SpatialObject for Body {
    fn id(&self) -> EntityId {
        self.id
    }

    fn position(&self) -> Option<Vec3> {
        Some(self.position)
    }

    fn size(&self) -> Vec3 {
        self.size
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }
}
