//! Per-step bounding volume hierarchy for CCD sweep candidates.
//!
//! The CCD pass needs "which bodies might a swept volume touch" for a
//! handful of fast movers. A small median-split BVH over the candidates'
//! swept AABBs is rebuilt from scratch every sub-step; no state survives
//! across steps, so there is nothing to incrementally maintain.

use crate::shapes::Aabb;

const LEAF_SIZE: usize = 4;

/// A CCD candidate: the body's swept bounds for this sub-step.
#[derive(Debug, Clone, Copy)]
pub struct SweptEntry {
    /// Union of the body's AABB at its current and predicted pose, expanded
    /// by the swept-sphere radius.
    pub aabb: Aabb,
    /// Index of the body in the world's body set.
    pub body_index: usize,
}

#[derive(Debug, Clone)]
enum BvhNode {
    Internal {
        aabb: Aabb,
        left: usize,
        right: usize,
    },
    Leaf {
        aabb: Aabb,
        start: usize,
        count: usize,
    },
}

fn bounds_of(entries: &[SweptEntry]) -> Aabb {
    let mut iter = entries.iter();
    let Some(first) = iter.next() else {
        return Aabb::new(nalgebra::Point3::origin(), nalgebra::Point3::origin());
    };
    iter.fold(first.aabb, |acc, e| acc.merged(&e.aabb))
}

fn widest_axis(aabb: &Aabb) -> usize {
    let extent = aabb.max - aabb.min;
    if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    }
}

/// Median-split BVH over swept AABBs, rebuilt per sub-step.
#[derive(Debug, Clone, Default)]
pub struct SweptBvh {
    nodes: Vec<BvhNode>,
    entries: Vec<SweptEntry>,
}

impl SweptBvh {
    /// Build a tree over the given candidates.
    #[must_use]
    pub fn build(mut entries: Vec<SweptEntry>) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            entries: Vec::new(),
        };
        if entries.is_empty() {
            return tree;
        }
        let len = entries.len();
        tree.build_node(&mut entries, 0, len);
        tree.entries = entries;
        tree
    }

    /// Whether the tree has no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Recursively partition `entries[start..end]` in place, splitting at the
    // median along the widest axis. Returns the node index.
    fn build_node(&mut self, entries: &mut [SweptEntry], start: usize, end: usize) -> usize {
        let slice = &mut entries[start..end];
        let aabb = bounds_of(slice);

        if slice.len() <= LEAF_SIZE {
            self.nodes.push(BvhNode::Leaf {
                aabb,
                start,
                count: slice.len(),
            });
            return self.nodes.len() - 1;
        }

        let axis = widest_axis(&aabb);
        let mid = slice.len() / 2;
        slice.select_nth_unstable_by(mid, |a, b| {
            let ca = (a.aabb.min[axis] + a.aabb.max[axis]) * 0.5;
            let cb = (b.aabb.min[axis] + b.aabb.max[axis]) * 0.5;
            ca.total_cmp(&cb)
        });

        let node_index = self.nodes.len();
        // Placeholder; children are pushed after this node.
        self.nodes.push(BvhNode::Leaf {
            aabb,
            start,
            count: 0,
        });
        let left = self.build_node(entries, start, start + mid);
        let right = self.build_node(entries, start + mid, end);
        self.nodes[node_index] = BvhNode::Internal { aabb, left, right };
        node_index
    }

    /// Collect the body indices of all candidates whose swept bounds overlap
    /// `aabb`.
    pub fn query(&self, aabb: &Aabb, out: &mut Vec<usize>) {
        if self.nodes.is_empty() {
            return;
        }
        self.query_node(0, aabb, out);
    }

    fn query_node(&self, node: usize, aabb: &Aabb, out: &mut Vec<usize>) {
        match &self.nodes[node] {
            BvhNode::Internal {
                aabb: bounds,
                left,
                right,
            } => {
                if bounds.overlaps(aabb) {
                    self.query_node(*left, aabb, out);
                    self.query_node(*right, aabb, out);
                }
            }
            BvhNode::Leaf {
                aabb: bounds,
                start,
                count,
            } => {
                if !bounds.overlaps(aabb) {
                    return;
                }
                for entry in &self.entries[*start..*start + *count] {
                    if entry.aabb.overlaps(aabb) {
                        out.push(entry.body_index);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::{Point3, Vector3};

    fn entry(index: usize, x: f64) -> SweptEntry {
        SweptEntry {
            aabb: Aabb::from_center(Point3::new(x, 0.0, 0.0), Vector3::repeat(1.0)),
            body_index: index,
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = SweptBvh::build(Vec::new());
        assert!(tree.is_empty());
        let mut out = Vec::new();
        tree.query(
            &Aabb::from_center(Point3::origin(), Vector3::repeat(100.0)),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_query_finds_overlapping_candidates() {
        let entries: Vec<_> = (0..20).map(|i| entry(i, i as f64 * 10.0)).collect();
        let tree = SweptBvh::build(entries);

        let mut out = Vec::new();
        tree.query(
            &Aabb::from_center(Point3::new(50.0, 0.0, 0.0), Vector3::repeat(0.5)),
            &mut out,
        );
        assert_eq!(out, vec![5]);

        out.clear();
        tree.query(
            &Aabb::from_center(Point3::new(45.0, 0.0, 0.0), Vector3::repeat(6.0)),
            &mut out,
        );
        out.sort_unstable();
        assert_eq!(out, vec![4, 5]);
    }

    #[test]
    fn test_query_misses_disjoint_region() {
        let entries: Vec<_> = (0..8).map(|i| entry(i, i as f64 * 10.0)).collect();
        let tree = SweptBvh::build(entries);

        let mut out = Vec::new();
        tree.query(
            &Aabb::from_center(Point3::new(0.0, 100.0, 0.0), Vector3::repeat(1.0)),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_all_candidates_reachable() {
        // Clustered boxes stress the median split.
        let entries: Vec<_> = (0..33)
            .map(|i| SweptEntry {
                aabb: Aabb::from_center(
                    Point3::new((i % 4) as f64, (i % 3) as f64, (i % 5) as f64),
                    Vector3::repeat(0.6),
                ),
                body_index: i,
            })
            .collect();
        let tree = SweptBvh::build(entries);

        let mut out = Vec::new();
        tree.query(
            &Aabb::from_center(Point3::new(2.0, 1.0, 2.0), Vector3::repeat(50.0)),
            &mut out,
        );
        out.sort_unstable();
        assert_eq!(out, (0..33).collect::<Vec<_>>());
    }
}
