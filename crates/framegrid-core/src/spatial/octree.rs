//! Arena-backed loose-at-the-root octree.
//!
//! Nodes split eagerly into eight children once they hold more than
//! `max_objects` entries and are above `max_depth`. An object lives in the
//! deepest node whose bounds fully enclose its box; objects straddling a split
//! plane stay in the parent, and objects outside the root bounds stay at the
//! root.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::geometry::{Aabb, Vec3};

/// Index of a node in the octree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub center: Vec3,
    pub half_extent: f32,
    pub depth: u32,
    pub parent: Option<NodeId>,
    pub children: Option<[NodeId; 8]>,
    pub objects: Vec<(EntityId, Aabb)>,
}

impl OctreeNode {
    pub fn bounds(&self) -> Aabb {
        Aabb::from_center_size(self.center, Vec3::splat(self.half_extent * 2.0))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OctreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub deepest: u32,
    pub objects: usize,
}

#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    locations: HashMap<EntityId, NodeId>,
    max_depth: u32,
    max_objects: usize,
}

impl Octree {
    pub fn new(center: Vec3, half_extent: f32, max_depth: u32, max_objects: usize) -> Self {
        Self {
            nodes: vec![OctreeNode {
                center,
                half_extent,
                depth: 0,
                parent: None,
                children: None,
                objects: Vec::new(),
            }],
            locations: HashMap::new(),
            max_depth,
            max_objects: max_objects.max(1),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id.index())
    }

    /// Node currently holding `id`.
    pub fn node_of(&self, id: EntityId) -> Option<NodeId> {
        self.locations.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Insert or re-insert `id`. Returns the node it landed in.
    pub fn insert(&mut self, id: EntityId, aabb: Aabb) -> NodeId {
        self.remove(id);
        let mut current = NodeId::ROOT;
        loop {
            let node = &self.nodes[current.index()];
            match node.children {
                Some(children) => match self.child_enclosing(&children, &aabb) {
                    Some(child) => current = child,
                    None => break,
                },
                None => break,
            }
        }
        self.nodes[current.index()].objects.push((id, aabb));
        self.locations.insert(id, current);
        self.maybe_subdivide(current);
        self.locations.get(&id).copied().unwrap_or(current)
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(node_id) = self.locations.remove(&id) else {
            return false;
        };
        if let Some(node) = self.nodes.get_mut(node_id.index()) {
            if let Some(pos) = node.objects.iter().position(|(e, _)| *e == id) {
                node.objects.swap_remove(pos);
            }
        }
        true
    }

    /// Every id whose box overlaps `region`.
    pub fn query_region(&self, region: &Aabb, out: &mut Vec<EntityId>) {
        let mut stack = vec![NodeId::ROOT];
        while let Some(node_id) = stack.pop() {
            let node = &self.nodes[node_id.index()];
            // Root may hold objects outside its own bounds.
            if node_id != NodeId::ROOT && !node.bounds().intersects(region) {
                continue;
            }
            out.extend(
                node.objects
                    .iter()
                    .filter(|(_, bb)| bb.intersects(region))
                    .map(|(id, _)| *id),
            );
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
    }

    pub fn stats(&self) -> OctreeStats {
        OctreeStats {
            nodes: self.nodes.len(),
            leaves: self.nodes.iter().filter(|n| n.is_leaf()).count(),
            deepest: self.nodes.iter().map(|n| n.depth).max().unwrap_or(0),
            objects: self.locations.len(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        let root = &mut self.nodes[0];
        root.children = None;
        root.objects.clear();
        self.locations.clear();
    }

    fn child_enclosing(&self, children: &[NodeId; 8], aabb: &Aabb) -> Option<NodeId> {
        children
            .iter()
            .copied()
            .find(|c| self.nodes[c.index()].bounds().encloses(aabb))
    }

    fn maybe_subdivide(&mut self, node_id: NodeId) {
        let node = &self.nodes[node_id.index()];
        if !node.is_leaf() || node.objects.len() <= self.max_objects || node.depth >= self.max_depth
        {
            return;
        }
        let (center, half, depth) = (node.center, node.half_extent, node.depth);
        let quarter = half * 0.5;
        let first = self.nodes.len() as u32;
        let mut children = [NodeId::ROOT; 8];
        for (i, slot) in children.iter_mut().enumerate() {
            let sign = |bit: usize| if i & bit != 0 { quarter } else { -quarter };
            self.nodes.push(OctreeNode {
                center: center + Vec3::new(sign(1), sign(2), sign(4)),
                half_extent: quarter,
                depth: depth + 1,
                parent: Some(node_id),
                children: None,
                objects: Vec::new(),
            });
            *slot = NodeId(first + i as u32);
        }
        self.nodes[node_id.index()].children = Some(children);

        let objects = std::mem::take(&mut self.nodes[node_id.index()].objects);
        let mut stay = Vec::new();
        for (id, aabb) in objects {
            match self.child_enclosing(&children, &aabb) {
                Some(child) => {
                    self.nodes[child.index()].objects.push((id, aabb));
                    self.locations.insert(id, child);
                }
                None => stay.push((id, aabb)),
            }
        }
        self.nodes[node_id.index()].objects = stay;

        for child in children {
            self.maybe_subdivide(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_box(x: f32, y: f32, z: f32) -> Aabb {
        Aabb::from_center_size(Vec3::new(x, y, z), Vec3::splat(1.0))
    }

    #[test]
    fn test_subdivides_past_capacity() {
        let mut tree = Octree::new(Vec3::ZERO, 64.0, 4, 2);
        tree.insert(EntityId(1), small_box(-30.0, -30.0, -30.0));
        tree.insert(EntityId(2), small_box(30.0, 30.0, 30.0));
        assert_eq!(tree.stats().nodes, 1);
        tree.insert(EntityId(3), small_box(30.0, -30.0, 30.0));
        let stats = tree.stats();
        assert_eq!(stats.nodes, 9);
        assert_eq!(stats.objects, 3);
        assert_ne!(tree.node_of(EntityId(1)), Some(NodeId::ROOT));
    }

    #[test]
    fn test_straddling_object_stays_in_parent() {
        let mut tree = Octree::new(Vec3::ZERO, 64.0, 4, 1);
        tree.insert(EntityId(1), small_box(20.0, 20.0, 20.0));
        tree.insert(EntityId(2), small_box(0.0, 0.0, 0.0));
        assert_eq!(tree.node_of(EntityId(2)), Some(NodeId::ROOT));
        assert_ne!(tree.node_of(EntityId(1)), Some(NodeId::ROOT));
    }

    #[test]
    fn test_outside_root_stays_at_root_and_is_found() {
        let mut tree = Octree::new(Vec3::ZERO, 8.0, 4, 1);
        tree.insert(EntityId(9), small_box(100.0, 0.0, 0.0));
        assert_eq!(tree.node_of(EntityId(9)), Some(NodeId::ROOT));
        let mut out = Vec::new();
        tree.query_region(&small_box(100.0, 0.0, 0.0), &mut out);
        assert_eq!(out, vec![EntityId(9)]);
    }

    #[test]
    fn test_max_depth_caps_subdivision() {
        let mut tree = Octree::new(Vec3::ZERO, 64.0, 0, 1);
        for i in 0..10 {
            tree.insert(EntityId(i), small_box(i as f32, 0.0, 0.0));
        }
        assert_eq!(tree.stats().nodes, 1);
    }

    #[test]
    fn test_remove_and_query() {
        let mut tree = Octree::new(Vec3::ZERO, 64.0, 4, 1);
        for i in 0..8 {
            tree.insert(EntityId(i), small_box(i as f32 * 6.0 - 20.0, 5.0, 5.0));
        }
        assert!(tree.remove(EntityId(3)));
        assert!(!tree.remove(EntityId(3)));
        let mut out = Vec::new();
        tree.query_region(&Aabb::new(Vec3::splat(-64.0), Vec3::splat(64.0)), &mut out);
        out.sort();
        assert_eq!(out.len(), 7);
        assert!(!out.contains(&EntityId(3)));
    }
}
