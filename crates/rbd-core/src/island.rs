//! Simulation island management.
//!
//! Bodies connected through contacts or constraints form islands that sleep
//! and solve together. Islands are recomputed from scratch every sub-step
//! with a union-find over body indices; per-body island tags cache the
//! result for manifold and constraint grouping.

use rbd_types::{ActivationState, BodyId};

use crate::pipeline::{CollisionPipeline, ContactManifold};
use crate::solver::ConstraintSet;
use crate::world::BodySet;

/// Union-find over body indices with path compression and union by rank.
#[derive(Debug, Clone, Default)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl UnionFind {
    /// Reset to `n` singleton sets.
    fn reset(&mut self, n: usize) {
        self.parent.clear();
        self.parent.extend(0..n);
        self.rank.clear();
        self.rank.resize(n, 0);
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// The island id a manifold belongs to: the tag of its first dynamic body.
fn manifold_island_id(manifold: &ContactManifold, bodies: &BodySet) -> i32 {
    let tag_a = bodies.get(manifold.body_a).map_or(-1, |b| b.island_tag());
    if tag_a >= 0 {
        return tag_a;
    }
    bodies.get(manifold.body_b).map_or(-1, |b| b.island_tag())
}

/// Groups bodies into simulation islands each sub-step.
#[derive(Debug, Clone, Default)]
pub struct IslandManager {
    union: UnionFind,
    // Scratch buffers reused across steps.
    elements: Vec<(i32, usize)>,
    island_manifolds: Vec<(i32, usize)>,
}

impl IslandManager {
    /// Create an empty island manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new sub-step: singleton sets, fresh tags, full hit fractions.
    pub(crate) fn begin_step(&mut self, bodies: &mut BodySet) {
        self.union.reset(bodies.len());
        for (i, body) in bodies.iter_mut().enumerate() {
            body.set_island_tag(i as i32);
            body.set_hit_fraction(1.0);
        }
    }

    /// Merge islands across broad-phase overlap pairs.
    ///
    /// Static and kinematic bodies never merge islands; they would glue the
    /// whole scene into one island through the ground.
    pub(crate) fn merge_contact_pairs(&mut self, bodies: &BodySet, pairs: &[(BodyId, BodyId)]) {
        for &(a, b) in pairs {
            let (Some(ia), Some(ib)) = (bodies.index_of(a), bodies.index_of(b)) else {
                continue;
            };
            if bodies.by_index(ia).merges_islands() && bodies.by_index(ib).merges_islands() {
                self.union.union(ia, ib);
            }
        }
    }

    /// Merge islands across constraints.
    ///
    /// A constraint between two sleeping bodies does not keep them awake,
    /// so it only merges when at least one endpoint is active.
    pub(crate) fn merge_constraint_pairs(&mut self, bodies: &BodySet, constraints: &ConstraintSet) {
        for constraint in constraints.iter() {
            let (Some(ia), Some(ib)) = (
                bodies.index_of(constraint.body_a()),
                bodies.index_of(constraint.body_b()),
            ) else {
                continue;
            };
            let a = bodies.by_index(ia);
            let b = bodies.by_index(ib);
            if !a.is_static_or_kinematic()
                && !b.is_static_or_kinematic()
                && (a.is_active() || b.is_active())
            {
                self.union.union(ia, ib);
            }
        }
    }

    /// Write the final island ids into the body tags (-1 for static/kinematic).
    pub(crate) fn store_island_ids(&mut self, bodies: &mut BodySet) {
        for i in 0..bodies.len() {
            let tag = if bodies.by_index(i).is_static_or_kinematic() {
                -1
            } else {
                self.union.find(i) as i32
            };
            bodies.by_index_mut(i).set_island_tag(tag);
        }
    }

    /// Apply island-granular sleep state, group manifolds, and invoke the
    /// callback once per awake island.
    ///
    /// The callback receives the island's bodies and the indices of its
    /// manifolds within `pipeline.manifolds()`. Fully sleeping islands are
    /// skipped.
    pub(crate) fn build_and_process_islands<F>(
        &mut self,
        bodies: &mut BodySet,
        pipeline: &dyn CollisionPipeline,
        mut callback: F,
    ) where
        F: FnMut(&mut BodySet, &[BodyId], &[usize], i32),
    {
        // Sort bodies by island id; stable sort keeps insertion order within
        // an island, which keeps solver input deterministic.
        self.elements.clear();
        for i in 0..bodies.len() {
            let id = self.union.find(i) as i32;
            self.elements.push((id, i));
        }
        self.elements.sort_by_key(|&(id, _)| id);

        // Island-granular sleep vote: an island sleeps only when no member
        // is awake; otherwise sleeping members are pulled back to
        // wants-deactivation so the island moves together.
        let mut start = 0;
        while start < self.elements.len() {
            let island_id = self.elements[start].0;
            let mut end = start;
            while end < self.elements.len() && self.elements[end].0 == island_id {
                end += 1;
            }

            let mut all_sleepy = true;
            for &(_, idx) in &self.elements[start..end] {
                let state = bodies.by_index(idx).activation_state();
                if matches!(
                    state,
                    ActivationState::Active | ActivationState::AlwaysActive
                ) {
                    all_sleepy = false;
                    break;
                }
            }

            if all_sleepy {
                for &(_, idx) in &self.elements[start..end] {
                    bodies
                        .by_index_mut(idx)
                        .set_activation_state(ActivationState::Sleeping);
                }
            } else {
                for &(_, idx) in &self.elements[start..end] {
                    let body = bodies.by_index_mut(idx);
                    if body.activation_state() == ActivationState::Sleeping {
                        body.set_activation_state(ActivationState::WantsDeactivation);
                        body.set_deactivation_timer_zero();
                    }
                }
            }

            start = end;
        }

        // Collect solver-relevant manifolds: skip pairs where both bodies
        // sleep, propagate kinematic wake-ups, drop response-less pairs.
        self.island_manifolds.clear();
        let manifolds = pipeline.manifolds();
        for (mi, manifold) in manifolds.iter().enumerate() {
            let (Some(ia), Some(ib)) = (
                bodies.index_of(manifold.body_a),
                bodies.index_of(manifold.body_b),
            ) else {
                continue;
            };

            let a_sleeping = bodies.by_index(ia).activation_state() == ActivationState::Sleeping;
            let b_sleeping = bodies.by_index(ib).activation_state() == ActivationState::Sleeping;
            if a_sleeping && b_sleeping {
                continue;
            }

            // Kinematic bodies never merge islands but wake what they touch.
            if bodies.by_index(ia).is_kinematic() && !a_sleeping {
                bodies.by_index_mut(ib).activate();
            }
            if bodies.by_index(ib).is_kinematic() && !b_sleeping {
                bodies.by_index_mut(ia).activate();
            }

            if pipeline.needs_response(manifold.body_a, manifold.body_b) {
                self.island_manifolds
                    .push((manifold_island_id(manifold, bodies), mi));
            }
        }
        self.island_manifolds.sort_by_key(|&(id, _)| id);

        // Dispatch one callback per awake island, with the matching run of
        // sorted manifolds.
        let mut island_bodies: Vec<BodyId> = Vec::new();
        let mut manifold_indices: Vec<usize> = Vec::new();
        let mut manifold_cursor = 0;
        let mut start = 0;
        while start < self.elements.len() {
            let island_id = self.elements[start].0;
            let mut end = start;
            island_bodies.clear();
            let mut island_sleeping = false;
            while end < self.elements.len() && self.elements[end].0 == island_id {
                let idx = self.elements[end].1;
                let body = bodies.by_index(idx);
                island_bodies.push(body.id());
                if !body.is_active() {
                    island_sleeping = true;
                }
                end += 1;
            }

            while manifold_cursor < self.island_manifolds.len()
                && self.island_manifolds[manifold_cursor].0 < island_id
            {
                manifold_cursor += 1;
            }
            manifold_indices.clear();
            let mut cursor = manifold_cursor;
            while cursor < self.island_manifolds.len()
                && self.island_manifolds[cursor].0 == island_id
            {
                manifold_indices.push(self.island_manifolds[cursor].1);
                cursor += 1;
            }
            manifold_cursor = cursor;

            if !island_sleeping {
                callback(bodies, &island_bodies, &manifold_indices, island_id);
            }

            start = end;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::RigidBody;
    use crate::pipeline::DefaultCollisionPipeline;
    use crate::shapes::CollisionShape;
    use nalgebra::{Point3, Vector3};
    use rbd_types::{MassProperties, Pose};

    fn sphere(id: u64, x: f64) -> RigidBody {
        RigidBody::new(
            BodyId::new(id),
            CollisionShape::Sphere { radius: 1.0 },
            MassProperties::from_shape(1.0),
            Pose::from_position(Point3::new(x, 0.0, 0.0)),
        )
    }

    fn populate(bodies: Vec<RigidBody>) -> BodySet {
        let mut set = BodySet::default();
        for body in bodies {
            set.insert(body).unwrap();
        }
        set
    }

    #[test]
    fn test_union_find_basics() {
        let mut uf = UnionFind::default();
        uf.reset(5);
        uf.union(0, 1);
        uf.union(3, 4);
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(1), uf.find(2));
        uf.union(1, 3);
        assert_eq!(uf.find(0), uf.find(4));
    }

    #[test]
    fn test_touching_bodies_share_island() {
        // Bodies 0 and 1 overlap; body 2 is far away.
        let mut bodies = populate(vec![sphere(0, 0.0), sphere(1, 1.5), sphere(2, 100.0)]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_contact_pairs(&bodies, pipeline.overlapping_pairs());
        islands.store_island_ids(&mut bodies);

        let tag = |id: u64| bodies.get(BodyId::new(id)).unwrap().island_tag();
        assert_eq!(tag(0), tag(1));
        assert_ne!(tag(0), tag(2));
    }

    #[test]
    fn test_static_body_never_merges() {
        let ground = RigidBody::new_static(
            BodyId::new(2),
            CollisionShape::Plane {
                normal: Vector3::y(),
                offset: 0.0,
            },
            Pose::identity(),
        );
        // Both spheres rest on the ground but are far apart.
        let mut bodies = populate(vec![sphere(0, 0.0), sphere(1, 50.0), ground]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_contact_pairs(&bodies, pipeline.overlapping_pairs());
        islands.store_island_ids(&mut bodies);

        let tag = |id: u64| bodies.get(BodyId::new(id)).unwrap().island_tag();
        assert_ne!(tag(0), tag(1));
        assert_eq!(tag(2), -1);
    }

    #[test]
    fn test_constraint_merges_only_with_active_endpoint() {
        use crate::solver::Constraint;
        use rbd_types::ConstraintId;

        let mut bodies = populate(vec![sphere(0, 0.0), sphere(1, 50.0)]);
        let mut constraints = ConstraintSet::default();
        constraints
            .insert(Constraint::new(
                ConstraintId::new(0),
                BodyId::new(0),
                BodyId::new(1),
            ))
            .unwrap();

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_constraint_pairs(&bodies, &constraints);
        islands.store_island_ids(&mut bodies);
        let tag = |bodies: &BodySet, id: u64| bodies.get(BodyId::new(id)).unwrap().island_tag();
        assert_eq!(tag(&bodies, 0), tag(&bodies, 1));

        // Both endpoints asleep: no merge.
        for id in 0..2 {
            bodies
                .get_mut(BodyId::new(id))
                .unwrap()
                .force_activation_state(ActivationState::Sleeping);
        }
        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_constraint_pairs(&bodies, &constraints);
        islands.store_island_ids(&mut bodies);
        assert_ne!(tag(&bodies, 0), tag(&bodies, 1));
    }

    #[test]
    fn test_unanimous_island_goes_to_sleep() {
        let mut bodies = populate(vec![sphere(0, 0.0), sphere(1, 1.5)]);
        for id in 0..2 {
            bodies
                .get_mut(BodyId::new(id))
                .unwrap()
                .force_activation_state(ActivationState::WantsDeactivation);
        }
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_contact_pairs(&bodies, pipeline.overlapping_pairs());
        islands.store_island_ids(&mut bodies);

        let mut called = 0;
        islands.build_and_process_islands(&mut bodies, &pipeline, |_, _, _, _| called += 1);

        for id in 0..2 {
            assert_eq!(
                bodies.get(BodyId::new(id)).unwrap().activation_state(),
                ActivationState::Sleeping
            );
        }
        // Sleeping islands produce no solver calls.
        assert_eq!(called, 0);
    }

    #[test]
    fn test_mixed_island_demotes_sleeper() {
        let mut bodies = populate(vec![sphere(0, 0.0), sphere(1, 1.5)]);
        bodies
            .get_mut(BodyId::new(1))
            .unwrap()
            .force_activation_state(ActivationState::Sleeping);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_contact_pairs(&bodies, pipeline.overlapping_pairs());
        islands.store_island_ids(&mut bodies);
        islands.build_and_process_islands(&mut bodies, &pipeline, |_, _, _, _| {});

        assert_eq!(
            bodies.get(BodyId::new(1)).unwrap().activation_state(),
            ActivationState::WantsDeactivation
        );
    }

    #[test]
    fn test_kinematic_contact_wakes_sleeper() {
        let kinematic = RigidBody::new_kinematic(
            BodyId::new(0),
            CollisionShape::Sphere { radius: 1.0 },
            Pose::from_position(Point3::new(0.0, 0.0, 0.0)),
        );
        let mut bodies = populate(vec![kinematic, sphere(1, 1.5)]);
        bodies
            .get_mut(BodyId::new(1))
            .unwrap()
            .force_activation_state(ActivationState::WantsDeactivation);

        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_contact_pairs(&bodies, pipeline.overlapping_pairs());
        islands.store_island_ids(&mut bodies);
        islands.build_and_process_islands(&mut bodies, &pipeline, |_, _, _, _| {});

        assert_eq!(
            bodies.get(BodyId::new(1)).unwrap().activation_state(),
            ActivationState::Active
        );
    }

    #[test]
    fn test_islands_dispatch_disjoint_manifolds() {
        // Two separate contact pairs → two solver calls with one manifold each.
        let mut bodies = populate(vec![
            sphere(0, 0.0),
            sphere(1, 1.5),
            sphere(2, 100.0),
            sphere(3, 101.5),
        ]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        let mut islands = IslandManager::new();
        islands.begin_step(&mut bodies);
        islands.merge_contact_pairs(&bodies, pipeline.overlapping_pairs());
        islands.store_island_ids(&mut bodies);

        let mut calls: Vec<(usize, usize)> = Vec::new();
        islands.build_and_process_islands(&mut bodies, &pipeline, |_, ids, manifolds, _| {
            calls.push((ids.len(), manifolds.len()));
        });

        let with_manifolds: Vec<_> = calls.iter().filter(|&&(_, m)| m > 0).collect();
        assert_eq!(with_manifolds.len(), 2);
        for &&(nbodies, nmanifolds) in &with_manifolds {
            assert_eq!(nbodies, 2);
            assert_eq!(nmanifolds, 1);
        }
    }
}
