//! Dynamic AABB Tree
//!
//! Broadphase acceleration structure rebuilt in bulk every frame from the
//! current leaf bounds. Leaves are slot-allocated (objects keep a stable
//! leaf id for the bidirectional object↔leaf index) and carry a payload
//! naming the owning object. The hierarchy is produced by recursive median
//! split on the longest centroid axis, O(N log N), and queried only through
//! [`AabbTree::for_each_overlapping_leaf_pair`].

use crate::aabb::Aabb;
use crate::error::PhysicsError;
use crate::math::Vec3;
use crate::storage::{ParticleHandle, RigidBodyHandle, StaticBodyHandle};

/// Owner of a broadphase leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AabbTreePayload {
    /// Leaf owned by a particle
    Particle(ParticleHandle),
    /// Leaf owned by a dynamic rigid body
    RigidBody(RigidBodyHandle),
    /// Leaf owned by a static body
    StaticBody(StaticBodyHandle),
}

/// Stable identifier of a leaf node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafId(u32);

struct LeafNode {
    bounds: Aabb,
    payload: AabbTreePayload,
}

struct InternalNode {
    bounds: Aabb,
    children: [u32; 2],
}

// Node ids pack "leaf or internal" into the sign bit.
const LEAF_BIT: u32 = 1 << 31;

#[inline]
fn is_leaf(node: u32) -> bool {
    node & LEAF_BIT != 0
}

/// Bulk-rebuilt bounding volume hierarchy with tagged leaf payloads.
pub struct AabbTree {
    leaves: Vec<Option<LeafNode>>,
    free: Vec<u32>,
    internal: Vec<InternalNode>,
    max_internal: usize,
    order: Vec<u32>,
    root: Option<u32>,
}

impl AabbTree {
    /// Create a tree with fixed node capacities.
    pub fn new(max_leaves: usize, max_internal: usize) -> Self {
        let mut leaves = Vec::with_capacity(max_leaves);
        leaves.resize_with(max_leaves, || None);
        Self {
            leaves,
            free: (0..max_leaves as u32).rev().collect(),
            internal: Vec::with_capacity(max_internal),
            max_internal,
            order: Vec::with_capacity(max_leaves),
            root: None,
        }
    }

    /// Allocate a leaf. The bounds may be overwritten freely before the
    /// next [`build`](Self::build).
    pub fn create_leaf(
        &mut self,
        bounds: Aabb,
        payload: AabbTreePayload,
    ) -> Result<LeafId, PhysicsError> {
        let index = self.free.pop().ok_or(PhysicsError::CapacityExceeded {
            resource: "AABB tree leaf nodes",
            limit: self.leaves.len(),
        })?;
        self.leaves[index as usize] = Some(LeafNode { bounds, payload });
        Ok(LeafId(index))
    }

    /// Release a leaf. The hierarchy is stale until the next rebuild.
    pub fn destroy_leaf(&mut self, leaf: LeafId) {
        debug_assert!(self.leaves[leaf.0 as usize].is_some());
        self.leaves[leaf.0 as usize] = None;
        self.free.push(leaf.0);
        self.root = None;
    }

    /// Overwrite a leaf's bounds.
    #[inline]
    pub fn set_leaf_bounds(&mut self, leaf: LeafId, bounds: Aabb) {
        self.leaf_mut(leaf).bounds = bounds;
    }

    /// A leaf's current bounds.
    #[inline]
    pub fn leaf_bounds(&self, leaf: LeafId) -> Aabb {
        self.leaf(leaf).bounds
    }

    /// Overwrite a leaf's payload.
    #[inline]
    pub fn set_leaf_payload(&mut self, leaf: LeafId, payload: AabbTreePayload) {
        self.leaf_mut(leaf).payload = payload;
    }

    /// Number of live leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len() - self.free.len()
    }

    /// Rebuild the hierarchy from the current set of leaves.
    pub fn build(&mut self) -> Result<(), PhysicsError> {
        self.order.clear();
        for (index, slot) in self.leaves.iter().enumerate() {
            if slot.is_some() {
                self.order.push(index as u32);
            }
        }
        self.internal.clear();
        self.root = match self.order.len() {
            0 => None,
            len => Some(self.build_range(0, len)?),
        };
        Ok(())
    }

    fn build_range(&mut self, lo: usize, hi: usize) -> Result<u32, PhysicsError> {
        if hi - lo == 1 {
            return Ok(self.order[lo] | LEAF_BIT);
        }
        let mut centroid_min = Vec3::splat(f32::INFINITY);
        let mut centroid_max = Vec3::splat(f32::NEG_INFINITY);
        for &leaf in &self.order[lo..hi] {
            let center = self.leaves[leaf as usize]
                .as_ref()
                .map(|node| node.bounds.center())
                .unwrap_or_default();
            centroid_min = centroid_min.min(center);
            centroid_max = centroid_max.max(center);
        }
        let size = centroid_max - centroid_min;
        let axis = if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        };
        let mid = (hi - lo) / 2;
        {
            let leaves = &self.leaves;
            let key = |leaf: &u32| -> f32 {
                leaves[*leaf as usize]
                    .as_ref()
                    .map(|node| node.bounds.center()[axis])
                    .unwrap_or_default()
            };
            self.order[lo..hi].select_nth_unstable_by(mid, |a, b| key(a).total_cmp(&key(b)));
        }
        let left = self.build_range(lo, lo + mid)?;
        let right = self.build_range(lo + mid, hi)?;
        if self.internal.len() == self.max_internal {
            return Err(PhysicsError::CapacityExceeded {
                resource: "AABB tree internal nodes",
                limit: self.max_internal,
            });
        }
        let bounds = self.node_bounds(left).merge(&self.node_bounds(right));
        self.internal.push(InternalNode {
            bounds,
            children: [left, right],
        });
        Ok((self.internal.len() - 1) as u32)
    }

    /// Visit every unordered pair of leaves whose bounds overlap, exactly
    /// once per pair, never pairing a leaf with itself.
    pub fn for_each_overlapping_leaf_pair<F>(&self, mut visitor: F)
    where
        F: FnMut(AabbTreePayload, AabbTreePayload),
    {
        if let Some(root) = self.root {
            if !is_leaf(root) {
                self.visit_subtree(root, &mut visitor);
            }
        }
    }

    fn visit_subtree<F>(&self, node: u32, visitor: &mut F)
    where
        F: FnMut(AabbTreePayload, AabbTreePayload),
    {
        let [left, right] = self.internal[node as usize].children;
        if !is_leaf(left) {
            self.visit_subtree(left, visitor);
        }
        if !is_leaf(right) {
            self.visit_subtree(right, visitor);
        }
        self.visit_cross(left, right, visitor);
    }

    fn visit_cross<F>(&self, a: u32, b: u32, visitor: &mut F)
    where
        F: FnMut(AabbTreePayload, AabbTreePayload),
    {
        if !self.node_bounds(a).overlaps(&self.node_bounds(b)) {
            return;
        }
        match (is_leaf(a), is_leaf(b)) {
            (true, true) => visitor(
                self.leaf(LeafId(a & !LEAF_BIT)).payload,
                self.leaf(LeafId(b & !LEAF_BIT)).payload,
            ),
            (true, false) => {
                let [left, right] = self.internal[b as usize].children;
                self.visit_cross(a, left, visitor);
                self.visit_cross(a, right, visitor);
            }
            (false, _) => {
                let [left, right] = self.internal[a as usize].children;
                self.visit_cross(left, b, visitor);
                self.visit_cross(right, b, visitor);
            }
        }
    }

    fn node_bounds(&self, node: u32) -> Aabb {
        if is_leaf(node) {
            self.leaf(LeafId(node & !LEAF_BIT)).bounds
        } else {
            self.internal[node as usize].bounds
        }
    }

    #[inline]
    fn leaf(&self, leaf: LeafId) -> &LeafNode {
        match &self.leaves[leaf.0 as usize] {
            Some(node) => node,
            None => panic!("AABB tree leaf {} is not live", leaf.0),
        }
    }

    #[inline]
    fn leaf_mut(&mut self, leaf: LeafId) -> &mut LeafNode {
        match &mut self.leaves[leaf.0 as usize] {
            Some(node) => node,
            None => panic!("AABB tree leaf {} is not live", leaf.0),
        }
    }

    /// Check that every node's bounds contain its descendants' bounds.
    /// Diagnostic used by tests.
    #[cfg(test)]
    fn validate_containment(&self) -> bool {
        fn check(tree: &AabbTree, node: u32) -> bool {
            if is_leaf(node) {
                return true;
            }
            let bounds = tree.internal[node as usize].bounds;
            tree.internal[node as usize].children.iter().all(|&child| {
                bounds.contains(&tree.node_bounds(child)) && check(tree, child)
            })
        }
        self.root.map_or(true, |root| check(self, root))
    }
}
