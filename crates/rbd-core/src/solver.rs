//! Constraint storage and the solver seam.
//!
//! Constraints are opaque to the core: it only knows which two bodies a
//! constraint links and whether it has broken. The actual constraint math
//! is supplied through [`ConstraintSolver`], called once per simulation
//! island with disjoint body, manifold, and constraint sets.

use hashbrown::HashMap;
use rbd_types::{BodyId, ConstraintId, SimError, SolverConfig};

use crate::pipeline::ContactManifold;
use crate::world::BodySet;

/// A two-body constraint handle.
///
/// Solvers may mark a constraint broken; the world removes broken
/// constraints after each solve and notifies the registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    id: ConstraintId,
    body_a: BodyId,
    body_b: BodyId,
    broken: bool,
}

impl Constraint {
    /// Create a constraint between two bodies.
    #[must_use]
    pub const fn new(id: ConstraintId, body_a: BodyId, body_b: BodyId) -> Self {
        Self {
            id,
            body_a,
            body_b,
            broken: false,
        }
    }

    /// Constraint identifier.
    #[must_use]
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    /// First linked body.
    #[must_use]
    pub fn body_a(&self) -> BodyId {
        self.body_a
    }

    /// Second linked body.
    #[must_use]
    pub fn body_b(&self) -> BodyId {
        self.body_b
    }

    /// Whether the constraint links the given body.
    #[must_use]
    pub fn links(&self, body: BodyId) -> bool {
        self.body_a == body || self.body_b == body
    }

    /// Whether the constraint has broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the constraint broken; it is removed after the current solve.
    pub fn set_broken(&mut self) {
        self.broken = true;
    }
}

/// Insertion-ordered constraint table.
///
/// Iteration order is insertion order, which keeps island grouping and
/// solver input deterministic across runs.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    items: Vec<Constraint>,
    index: HashMap<ConstraintId, usize>,
}

impl ConstraintSet {
    /// Insert a constraint.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DuplicateConstraintId`] if the ID is taken.
    pub fn insert(&mut self, constraint: Constraint) -> rbd_types::Result<()> {
        let id = constraint.id();
        if self.index.contains_key(&id) {
            return Err(SimError::DuplicateConstraintId(id.raw()));
        }
        self.index.insert(id, self.items.len());
        self.items.push(constraint);
        Ok(())
    }

    /// Remove a constraint, returning it if present.
    pub fn remove(&mut self, id: ConstraintId) -> Option<Constraint> {
        let idx = self.index.remove(&id)?;
        let removed = self.items.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Look up a constraint.
    #[must_use]
    pub fn get(&self, id: ConstraintId) -> Option<&Constraint> {
        self.index.get(&id).map(|&idx| &self.items[idx])
    }

    /// Look up a constraint mutably.
    pub fn get_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.index.get(&id).map(|&idx| &mut self.items[idx])
    }

    /// Iterate constraints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.items.iter()
    }

    /// Number of constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-island constraint solver.
///
/// Implementations receive disjoint islands: no body, manifold, or
/// constraint appears in more than one call per step. The solver may write
/// body velocities and mark constraints broken, but must not touch bodies
/// outside `island_bodies`.
pub trait ConstraintSolver {
    /// Solve one island.
    ///
    /// `manifold_indices` and `constraint_ids` select this island's slice of
    /// `manifolds` and `constraints`.
    #[allow(clippy::too_many_arguments)]
    fn solve_group(
        &mut self,
        bodies: &mut BodySet,
        island_bodies: &[BodyId],
        manifolds: &[ContactManifold],
        manifold_indices: &[usize],
        constraints: &mut ConstraintSet,
        constraint_ids: &[ConstraintId],
        config: &SolverConfig,
        dt: f64,
    );
}

/// A solver that does nothing.
///
/// Useful for worlds that only need unconstrained integration, sleeping,
/// and CCD, and as the default before a real solver is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSolver;

impl ConstraintSolver for NullSolver {
    fn solve_group(
        &mut self,
        _bodies: &mut BodySet,
        _island_bodies: &[BodyId],
        _manifolds: &[ContactManifold],
        _manifold_indices: &[usize],
        _constraints: &mut ConstraintSet,
        _constraint_ids: &[ConstraintId],
        _config: &SolverConfig,
        _dt: f64,
    ) {
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn constraint(id: u64, a: u64, b: u64) -> Constraint {
        Constraint::new(ConstraintId::new(id), BodyId::new(a), BodyId::new(b))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut set = ConstraintSet::default();
        set.insert(constraint(0, 1, 2)).unwrap();
        set.insert(constraint(1, 2, 3)).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(ConstraintId::new(0)).unwrap().body_b(), BodyId::new(2));
        assert!(set.get(ConstraintId::new(9)).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut set = ConstraintSet::default();
        set.insert(constraint(0, 1, 2)).unwrap();
        let err = set.insert(constraint(0, 3, 4)).unwrap_err();
        assert_eq!(err, SimError::DuplicateConstraintId(0));
    }

    #[test]
    fn test_remove_keeps_order_and_indices() {
        let mut set = ConstraintSet::default();
        for i in 0..4 {
            set.insert(constraint(i, i, i + 1)).unwrap();
        }
        let removed = set.remove(ConstraintId::new(1)).unwrap();
        assert_eq!(removed.id(), ConstraintId::new(1));

        let order: Vec<u64> = set.iter().map(|c| c.id().raw()).collect();
        assert_eq!(order, vec![0, 2, 3]);
        assert_eq!(set.get(ConstraintId::new(3)).unwrap().body_a(), BodyId::new(3));
    }

    #[test]
    fn test_broken_flag() {
        let mut set = ConstraintSet::default();
        set.insert(constraint(0, 1, 2)).unwrap();
        set.get_mut(ConstraintId::new(0)).unwrap().set_broken();
        assert!(set.get(ConstraintId::new(0)).unwrap().is_broken());
    }
}
