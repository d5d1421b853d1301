//! Body storage and the discrete stepping loop.
//!
//! [`DynamicsWorld`] owns the bodies and constraints and advances them with
//! fixed-timestep sub-stepping. Each sub-step runs, in order: unconstrained
//! motion prediction, collision detection, island building, per-island
//! constraint solving, broken-constraint cleanup, transform integration with
//! continuous collision clamping, action hooks, activation-state update, and
//! the internal tick callback.

use hashbrown::{HashMap, HashSet};
use nalgebra::Vector3;
use rbd_types::{ActivationState, BodyId, ConstraintId, Pose, SimError, WorldConfig};
use tracing::{debug, trace};

use crate::body::RigidBody;
use crate::island::IslandManager;
use crate::pipeline::{CollisionPipeline, DefaultCollisionPipeline};
use crate::shapes::cast_sphere;
use crate::solver::{Constraint, ConstraintSet, ConstraintSolver, NullSolver};
use crate::sweep_tree::{SweptBvh, SweptEntry};
use crate::transform_util;

/// Hit fractions at or below this leave the prediction untouched; the body
/// is already at the obstacle.
const CCD_HIT_FRACTION_EPSILON: f64 = 1.0e-4;

/// Receives interpolated poses after each sub-step.
///
/// The interpolated pose extrapolates the last committed transform by the
/// leftover wall-clock time, scaled by the body's hit fraction so CCD-clamped
/// bodies do not visually overshoot.
pub trait MotionObserver {
    /// Report one body's interpolated pose.
    fn sync(&mut self, body: BodyId, pose: &Pose);
}

/// Per-sub-step hook running after solving and integration, before the
/// activation-state update. Vehicles and character controllers live here.
pub trait WorldAction {
    /// Advance the action by `dt`.
    fn update(&mut self, bodies: &mut BodySet, dt: f64);
}

/// Insertion-ordered body storage with id lookup.
///
/// Iteration order is insertion order, which keeps island partitioning and
/// solver input identical across runs with identical inputs.
#[derive(Debug, Clone, Default)]
pub struct BodySet {
    bodies: Vec<RigidBody>,
    index: HashMap<BodyId, usize>,
}

impl BodySet {
    /// Insert a body.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DuplicateBodyId`] if the ID is taken.
    pub fn insert(&mut self, body: RigidBody) -> rbd_types::Result<()> {
        let id = body.id();
        if self.index.contains_key(&id) {
            return Err(SimError::DuplicateBodyId(id.raw()));
        }
        self.index.insert(id, self.bodies.len());
        self.bodies.push(body);
        Ok(())
    }

    /// Remove a body, returning it if present.
    pub fn remove(&mut self, id: BodyId) -> Option<RigidBody> {
        let idx = self.index.remove(&id)?;
        let removed = self.bodies.remove(idx);
        for slot in self.index.values_mut() {
            if *slot > idx {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Look up a body.
    #[must_use]
    pub fn get(&self, id: BodyId) -> Option<&RigidBody> {
        self.index.get(&id).map(|&idx| &self.bodies[idx])
    }

    /// Look up a body mutably.
    pub fn get_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.index.get(&id).map(|&idx| &mut self.bodies[idx])
    }

    /// Index of a body in insertion order.
    #[must_use]
    pub fn index_of(&self, id: BodyId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Body at an insertion-order index.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[must_use]
    pub fn by_index(&self, idx: usize) -> &RigidBody {
        &self.bodies[idx]
    }

    /// Mutable body at an insertion-order index.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn by_index_mut(&mut self, idx: usize) -> &mut RigidBody {
        &mut self.bodies[idx]
    }

    /// Number of bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Iterate bodies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.iter()
    }

    /// Iterate bodies mutably in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RigidBody> {
        self.bodies.iter_mut()
    }
}

/// Discrete rigid-body dynamics world.
///
/// # Example
///
/// ```
/// use rbd_core::{CollisionShape, DynamicsWorld, RigidBody};
/// use rbd_types::{BodyId, MassProperties, Pose, WorldConfig};
/// use nalgebra::Point3;
///
/// let mut world = DynamicsWorld::new(WorldConfig::default());
/// world
///     .add_body(RigidBody::new(
///         BodyId::new(0),
///         CollisionShape::Sphere { radius: 0.5 },
///         MassProperties::from_shape(1.0),
///         Pose::from_position(Point3::new(0.0, 10.0, 0.0)),
///     ))
///     .unwrap();
///
/// // Simulate one 60 Hz frame.
/// let sub_steps = world.step(1.0 / 60.0);
/// assert_eq!(sub_steps, 1);
/// assert!(world.body(BodyId::new(0)).unwrap().pose().position.y < 10.0);
/// ```
pub struct DynamicsWorld {
    config: WorldConfig,
    bodies: BodySet,
    constraints: ConstraintSet,
    islands: IslandManager,
    pipeline: Box<dyn CollisionPipeline>,
    solver: Box<dyn ConstraintSolver>,
    actions: Vec<Box<dyn WorldAction>>,
    motion_observer: Option<Box<dyn MotionObserver>>,
    tick_callback: Option<Box<dyn FnMut(&mut BodySet, f64)>>,
    broken_callback: Option<Box<dyn FnMut(&Constraint)>>,
    // Wall-clock time not yet consumed by fixed sub-steps.
    local_time: f64,
}

impl DynamicsWorld {
    /// Create a world with the default pipeline and a no-op solver.
    #[must_use]
    pub fn new(config: WorldConfig) -> Self {
        Self {
            config,
            bodies: BodySet::default(),
            constraints: ConstraintSet::default(),
            islands: IslandManager::new(),
            pipeline: Box::new(DefaultCollisionPipeline::default()),
            solver: Box::new(NullSolver),
            actions: Vec::new(),
            motion_observer: None,
            tick_callback: None,
            broken_callback: None,
            local_time: 0.0,
        }
    }

    /// Replace the collision pipeline.
    pub fn set_collision_pipeline(&mut self, pipeline: Box<dyn CollisionPipeline>) {
        self.pipeline = pipeline;
    }

    /// Replace the constraint solver.
    pub fn set_constraint_solver(&mut self, solver: Box<dyn ConstraintSolver>) {
        self.solver = solver;
    }

    /// Register the motion observer.
    pub fn set_motion_observer(&mut self, observer: Box<dyn MotionObserver>) {
        self.motion_observer = Some(observer);
    }

    /// Register a callback invoked at the end of every sub-step.
    pub fn set_internal_tick_callback(
        &mut self,
        callback: Box<dyn FnMut(&mut BodySet, f64)>,
    ) {
        self.tick_callback = Some(callback);
    }

    /// Register a callback invoked once for each constraint that breaks.
    pub fn set_broken_constraint_callback(&mut self, callback: Box<dyn FnMut(&Constraint)>) {
        self.broken_callback = Some(callback);
    }

    /// Add a per-sub-step action.
    pub fn add_action(&mut self, action: Box<dyn WorldAction>) {
        self.actions.push(action);
    }

    /// World configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current gravity.
    #[must_use]
    pub fn gravity(&self) -> Vector3<f64> {
        self.config.gravity
    }

    /// Set gravity and broadcast it to every dynamic body.
    pub fn set_gravity(&mut self, gravity: Vector3<f64>) {
        self.config.gravity = gravity;
        for body in self.bodies.iter_mut() {
            if body.is_dynamic() {
                body.set_gravity(gravity);
            }
        }
    }

    /// The body set.
    #[must_use]
    pub fn bodies(&self) -> &BodySet {
        &self.bodies
    }

    /// The body set, mutably.
    pub fn bodies_mut(&mut self) -> &mut BodySet {
        &mut self.bodies
    }

    /// Look up a body.
    #[must_use]
    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id)
    }

    /// Look up a body mutably.
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(id)
    }

    /// The constraint set.
    #[must_use]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Add a body; dynamic bodies pick up the world gravity.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::DuplicateBodyId`] if the body's ID is taken.
    pub fn add_body(&mut self, mut body: RigidBody) -> rbd_types::Result<BodyId> {
        if body.is_dynamic() {
            body.set_gravity(self.config.gravity);
        }
        let id = body.id();
        self.bodies.insert(body)?;
        Ok(id)
    }

    /// Remove a body.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::BodyHasConstraints`] while constraints still
    /// reference the body; remove those first.
    pub fn remove_body(&mut self, id: BodyId) -> rbd_types::Result<RigidBody> {
        if self.bodies.get(id).is_none() {
            return Err(SimError::InvalidBodyId(id.raw()));
        }
        // The per-body reference list only tracks collision suppression; the
        // constraint table is the authority on what still links the body.
        let linked = self.constraints.iter().filter(|c| c.links(id)).count();
        if linked > 0 {
            return Err(SimError::BodyHasConstraints {
                body_id: id.raw(),
                count: linked,
            });
        }
        self.bodies
            .remove(id)
            .ok_or(SimError::InvalidBodyId(id.raw()))
    }

    /// Add a constraint between two existing bodies.
    ///
    /// With `disable_collisions_between_linked_bodies`, the endpoints stop
    /// colliding with each other for the constraint's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidBodyId`] if an endpoint is unknown, or
    /// [`SimError::DuplicateConstraintId`] if the ID is taken.
    pub fn add_constraint(
        &mut self,
        constraint: Constraint,
        disable_collisions_between_linked_bodies: bool,
    ) -> rbd_types::Result<ConstraintId> {
        let (a, b) = (constraint.body_a(), constraint.body_b());
        for endpoint in [a, b] {
            if self.bodies.get(endpoint).is_none() {
                return Err(SimError::InvalidBodyId(endpoint.raw()));
            }
        }
        let id = constraint.id();
        self.constraints.insert(constraint)?;
        if disable_collisions_between_linked_bodies {
            if let Some(body) = self.bodies.get_mut(a) {
                body.add_constraint_ref(id);
            }
            if let Some(body) = self.bodies.get_mut(b) {
                body.add_constraint_ref(id);
            }
        }
        Ok(id)
    }

    /// Remove a constraint, detaching it from both endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidConstraintId`] if the constraint is
    /// unknown.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> rbd_types::Result<Constraint> {
        let constraint = self
            .constraints
            .remove(id)
            .ok_or(SimError::InvalidConstraintId(id.raw()))?;
        if let Some(body) = self.bodies.get_mut(constraint.body_a()) {
            body.remove_constraint_ref(id);
        }
        if let Some(body) = self.bodies.get_mut(constraint.body_b()) {
            body.remove_constraint_ref(id);
        }
        Ok(constraint)
    }

    /// Advance the simulation using the configured timestep settings.
    pub fn step(&mut self, wall_dt: f64) -> usize {
        let max = self.config.max_sub_steps;
        let fixed = self.config.fixed_timestep;
        self.step_simulation(wall_dt, max, fixed)
    }

    /// Advance the simulation by `wall_dt` seconds of wall-clock time.
    ///
    /// With `max_sub_steps > 0`, wall time accumulates and whole sub-steps
    /// of `fixed_dt` are consumed from it, at most `max_sub_steps` per call
    /// (time beyond the cap is dropped). With `max_sub_steps == 0`, a single
    /// variable-length sub-step of exactly `wall_dt` runs.
    ///
    /// Returns the number of sub-steps executed.
    pub fn step_simulation(&mut self, wall_dt: f64, max_sub_steps: usize, fixed_dt: f64) -> usize {
        let mut fixed = fixed_dt;
        let mut max = max_sub_steps;
        let mut pending = 0_usize;

        if max != 0 {
            self.local_time += wall_dt;
            if self.local_time >= fixed {
                pending = (self.local_time / fixed) as usize;
                self.local_time -= pending as f64 * fixed;
            }
        } else {
            fixed = wall_dt;
            self.local_time = wall_dt;
            if wall_dt.abs() >= f64::EPSILON {
                pending = 1;
                max = 1;
            }
        }

        let executed = pending.min(max);
        if executed > 0 {
            if pending > executed {
                trace!(
                    dropped = pending - executed,
                    "sub-steps beyond the cap dropped"
                );
            }
            self.save_kinematic_state(fixed);
            self.apply_gravity();
            debug!(sub_steps = executed, dt = fixed, "stepping simulation");
            for _ in 0..executed {
                self.single_step(fixed);
                self.synchronize_motion_states();
            }
        }

        self.synchronize_motion_states();
        self.clear_forces();
        executed
    }

    fn single_step(&mut self, dt: f64) {
        self.predict_unconstrained_motion(dt);
        self.pipeline.update(&self.bodies, &self.constraints, dt);
        self.calculate_islands();
        self.solve_constraints(dt);
        self.remove_broken_constraints();
        self.integrate_transforms(dt);
        self.update_actions(dt);
        self.update_activation_states(dt);
        if let Some(callback) = &mut self.tick_callback {
            callback(&mut self.bodies, dt);
        }
    }

    fn save_kinematic_state(&mut self, dt: f64) {
        for body in self.bodies.iter_mut() {
            if body.is_kinematic() && body.is_active() {
                body.save_kinematic_state(dt);
            }
        }
    }

    fn apply_gravity(&mut self) {
        for body in self.bodies.iter_mut() {
            if body.is_dynamic() && body.is_active() {
                body.apply_gravity();
            }
        }
    }

    fn clear_forces(&mut self) {
        for body in self.bodies.iter_mut() {
            body.clear_forces();
        }
    }

    fn predict_unconstrained_motion(&mut self, dt: f64) {
        for body in self.bodies.iter_mut() {
            if body.is_static_or_kinematic() || !body.is_active() {
                continue;
            }
            body.integrate_velocities(dt);
            body.apply_damping(dt);
            let predicted = body.predict_integrated_transform(dt);
            body.set_interpolation_pose(predicted);
        }
    }

    fn calculate_islands(&mut self) {
        let Self {
            islands,
            bodies,
            pipeline,
            constraints,
            ..
        } = self;
        islands.begin_step(bodies);
        islands.merge_contact_pairs(bodies, pipeline.overlapping_pairs());
        islands.merge_constraint_pairs(bodies, constraints);
        islands.store_island_ids(bodies);
    }

    /// The island id a constraint belongs to: the tag of its first dynamic
    /// endpoint.
    fn constraint_island_id(&self, constraint: &Constraint) -> i32 {
        let tag_a = self
            .bodies
            .get(constraint.body_a())
            .map_or(-1, |b| b.island_tag());
        if tag_a >= 0 {
            return tag_a;
        }
        self.bodies
            .get(constraint.body_b())
            .map_or(-1, |b| b.island_tag())
    }

    fn solve_constraints(&mut self, dt: f64) {
        // Stable-sort constraints by island so every island sees a
        // contiguous run.
        let mut sorted: Vec<(i32, ConstraintId)> = self
            .constraints
            .iter()
            .map(|c| (self.constraint_island_id(c), c.id()))
            .collect();
        sorted.sort_by_key(|&(island, _)| island);
        let sorted_ids: Vec<ConstraintId> = sorted.iter().map(|&(_, id)| id).collect();

        let solver_config = self.config.solver;
        let Self {
            islands,
            bodies,
            pipeline,
            solver,
            constraints,
            ..
        } = self;

        islands.build_and_process_islands(
            bodies,
            pipeline.as_ref(),
            |bodies, island_bodies, manifold_indices, island_id| {
                let lo = sorted.partition_point(|&(island, _)| island < island_id);
                let hi = sorted.partition_point(|&(island, _)| island <= island_id);
                let constraint_ids = &sorted_ids[lo..hi];
                if manifold_indices.is_empty() && constraint_ids.is_empty() {
                    return;
                }
                trace!(
                    island = island_id,
                    bodies = island_bodies.len(),
                    manifolds = manifold_indices.len(),
                    constraints = constraint_ids.len(),
                    "solving island"
                );
                solver.solve_group(
                    bodies,
                    island_bodies,
                    pipeline.manifolds(),
                    manifold_indices,
                    constraints,
                    constraint_ids,
                    &solver_config,
                    dt,
                );
            },
        );
    }

    fn remove_broken_constraints(&mut self) {
        let broken: Vec<ConstraintId> = self
            .constraints
            .iter()
            .filter(|c| c.is_broken())
            .map(Constraint::id)
            .collect();
        for id in broken {
            if let Some(constraint) = self.constraints.remove(id) {
                debug!(constraint = %id, "constraint broke");
                if let Some(callback) = &mut self.broken_callback {
                    callback(&constraint);
                }
                if let Some(body) = self.bodies.get_mut(constraint.body_a()) {
                    body.remove_constraint_ref(id);
                }
                if let Some(body) = self.bodies.get_mut(constraint.body_b()) {
                    body.remove_constraint_ref(id);
                }
            }
        }
    }

    /// Sweep one CCD pair; returns the clamped hit fraction for the sweeper.
    fn sweep_pair(&self, sweeper: usize, target: usize) -> Option<f64> {
        let s = self.bodies.by_index(sweeper);
        let t = self.bodies.by_index(target);

        if !s.collides_with(t, &self.constraints) || !t.collides_with(s, &self.constraints) {
            return None;
        }
        // A pair with a live manifold is already handled by the solver;
        // pairs without collision response are swept conservatively.
        if self.pipeline.needs_response(s.id(), t.id())
            && self.pipeline.has_contact(s.id(), t.id())
        {
            return None;
        }

        let from = s.pose().position;
        let to = s.predicted_pose().position;
        let hit = cast_sphere(s.ccd_swept_sphere_radius(), &from, &to, t.shape(), t.pose())?;

        // Reject hits where the relative motion does not oppose the surface
        // (allowed penetration is zero).
        let mut relative = to - from;
        if t.is_dynamic() {
            relative -= t.predicted_pose().position - t.pose().position;
        }
        if hit.normal.dot(&relative) >= 0.0 {
            return None;
        }
        Some(hit.fraction)
    }

    /// Integrate transforms, clamping fast movers at their first time of
    /// impact.
    fn integrate_transforms(&mut self, dt: f64) {
        // Predict every active dynamic body, collecting CCD candidates.
        let mut entries: Vec<SweptEntry> = Vec::new();
        let mut is_candidate = vec![false; self.bodies.len()];
        for i in 0..self.bodies.len() {
            let body = self.bodies.by_index_mut(i);
            if body.is_static_or_kinematic() || !body.is_active() {
                continue;
            }
            let predicted = body.predict_integrated_transform(dt);
            let motion_sq = (predicted.position - body.pose().position).norm_squared();
            body.set_predicted_pose(predicted);

            let threshold = body.ccd_square_motion_threshold();
            if threshold != 0.0 && threshold < motion_sq && body.shape().is_convex() {
                let body = self.bodies.by_index(i);
                let swept = body
                    .shape()
                    .aabb(body.pose())
                    .merged(&body.shape().aabb(&predicted))
                    .expanded(body.ccd_swept_sphere_radius());
                entries.push(SweptEntry {
                    aabb: swept,
                    body_index: i,
                });
                is_candidate[i] = true;
            }
        }

        let mut clamped = 0_usize;
        if !entries.is_empty() {
            let tree = SweptBvh::build(entries);

            // Enumerate pairs by querying the tree with every body's bounds.
            // The same pair surfaces from both sides; a sorted key collapses
            // the duplicates. When both bodies are candidates the lower
            // index sweeps.
            let mut best: HashMap<usize, f64> = HashMap::new();
            let mut processed: HashSet<(usize, usize)> = HashSet::new();
            let mut hits: Vec<usize> = Vec::new();
            for j in 0..self.bodies.len() {
                hits.clear();
                let aabb = self.bodies.by_index(j).aabb();
                tree.query(&aabb, &mut hits);
                for &i in &hits {
                    if i == j {
                        continue;
                    }
                    let key = if i < j { (i, j) } else { (j, i) };
                    if !processed.insert(key) {
                        continue;
                    }
                    let (sweeper, target) = if is_candidate[j] && j < i { (j, i) } else { (i, j) };
                    if let Some(fraction) = self.sweep_pair(sweeper, target) {
                        let entry = best.entry(sweeper).or_insert(1.0);
                        if fraction < *entry {
                            *entry = fraction;
                        }
                    }
                }
            }

            for (&i, &fraction) in &best {
                if fraction < 1.0 && fraction > CCD_HIT_FRACTION_EPSILON {
                    let body = self.bodies.by_index_mut(i);
                    let clamped_pose = body.predict_integrated_transform(dt * fraction);
                    body.set_predicted_pose(clamped_pose);
                    // Motion beyond the impact never happened.
                    body.set_hit_fraction(0.0);
                    clamped += 1;
                }
            }
        }
        if clamped > 0 {
            debug!(clamped, "ccd clamped fast motions");
        }

        // Commit.
        for body in self.bodies.iter_mut() {
            if body.is_static_or_kinematic() || !body.is_active() {
                continue;
            }
            let predicted = *body.predicted_pose();
            body.proceed_to_transform(predicted);
        }
    }

    fn update_actions(&mut self, dt: f64) {
        let mut actions = std::mem::take(&mut self.actions);
        for action in &mut actions {
            action.update(&mut self.bodies, dt);
        }
        self.actions = actions;
    }

    fn update_activation_states(&mut self, dt: f64) {
        for body in self.bodies.iter_mut() {
            body.update_deactivation(dt, &self.config);
            if body.wants_sleeping(&self.config) {
                if body.is_static_or_kinematic() {
                    body.set_activation_state(ActivationState::Sleeping);
                } else {
                    match body.activation_state() {
                        ActivationState::Active => {
                            body.set_activation_state(ActivationState::WantsDeactivation);
                        }
                        ActivationState::Sleeping => {
                            body.set_linear_velocity(Vector3::zeros());
                            body.set_angular_velocity(Vector3::zeros());
                        }
                        _ => {}
                    }
                }
            } else if body.activation_state().can_deactivate() {
                body.set_activation_state(ActivationState::Active);
            }
        }
    }

    fn synchronize_motion_states(&mut self) {
        let Some(observer) = &mut self.motion_observer else {
            return;
        };
        for body in self.bodies.iter() {
            if body.is_static_or_kinematic() {
                continue;
            }
            let twist = body.interpolation_twist();
            let interpolated = transform_util::integrate_transform(
                body.interpolation_pose(),
                &twist.linear,
                &twist.angular,
                self.local_time * body.hit_fraction(),
            );
            observer.sync(body.id(), &interpolated);
        }
    }
}
