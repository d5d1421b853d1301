//! Rigid body state and per-body integration.
//!
//! A [`RigidBody`] owns everything the stepping loop needs to advance one
//! body: kinematic state, mass properties, accumulated forces, damping,
//! sleep bookkeeping, CCD parameters, and the island tag. Bodies are plain
//! data; all cross-body logic (islands, contacts, constraints) lives in the
//! world.

use nalgebra::{Matrix3, Vector3};
use rbd_types::{ActivationState, BodyId, ConstraintId, MassProperties, Pose, Twist, WorldConfig};

use crate::shapes::CollisionShape;
use crate::solver::ConstraintSet;
use crate::transform_util;

/// Largest angular velocity a body may carry out of velocity integration,
/// expressed as radians of rotation per step.
const MAX_ANGULAR_VELOCITY: f64 = std::f64::consts::FRAC_PI_2;

/// Magnitude of the constant-speed brake applied by the extra damping mode.
const EXTRA_DAMPING_BRAKE: f64 = 0.005;

/// Tunables for the legacy extra damping mode.
///
/// On top of the exponential damping law, bodies with this mode enabled are
/// braked hard once both velocities drop under the squared thresholds, which
/// suppresses low-speed jitter. The constants are empirical and kept exactly
/// so existing content behaves identically.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdditionalDamping {
    /// Velocity multiplier applied when both thresholds are crossed.
    pub factor: f64,
    /// Squared linear speed below which the extra factor kicks in.
    pub linear_threshold_sqr: f64,
    /// Squared angular speed below which the extra factor kicks in.
    pub angular_threshold_sqr: f64,
}

impl Default for AdditionalDamping {
    fn default() -> Self {
        Self {
            factor: 0.005,
            linear_threshold_sqr: 0.01,
            angular_threshold_sqr: 0.01,
        }
    }
}

/// A simulated rigid body.
#[derive(Debug, Clone)]
pub struct RigidBody {
    id: BodyId,
    shape: CollisionShape,
    kinematic: bool,

    pose: Pose,
    linear_velocity: Vector3<f64>,
    angular_velocity: Vector3<f64>,

    inverse_mass: f64,
    inv_inertia_local: Vector3<f64>,
    inv_inertia_world: Matrix3<f64>,

    total_force: Vector3<f64>,
    total_torque: Vector3<f64>,
    gravity: Vector3<f64>,

    linear_damping: f64,
    angular_damping: f64,
    additional_damping: Option<AdditionalDamping>,

    linear_sleep_threshold: f64,
    angular_sleep_threshold: f64,
    deactivation_time: f64,
    activation: ActivationState,

    // Snapshot used for motion-state interpolation and kinematic velocity
    // recovery.
    interpolation_pose: Pose,
    interpolation_twist: Twist,

    // CCD working state, valid only within a sub-step.
    predicted_pose: Pose,
    hit_fraction: f64,
    ccd_square_motion_threshold: f64,
    ccd_swept_sphere_radius: f64,

    angular_factor: Vector3<f64>,
    island_tag: i32,
    constraint_refs: Vec<ConstraintId>,
}

impl RigidBody {
    /// Create a dynamic (or static, if `mass.mass == 0`) body.
    ///
    /// A zero local-inertia vector derives the inertia from the shape.
    #[must_use]
    pub fn new(id: BodyId, shape: CollisionShape, mass: MassProperties, pose: Pose) -> Self {
        let inverse_mass = mass.inverse_mass();
        let local_inertia = if mass.local_inertia == Vector3::zeros() && inverse_mass != 0.0 {
            shape.local_inertia(mass.mass)
        } else {
            mass.local_inertia
        };
        let inv_inertia_local =
            local_inertia.map(|i| if i == 0.0 { 0.0 } else { 1.0 / i });

        let mut body = Self {
            id,
            shape,
            kinematic: false,
            pose,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            inverse_mass,
            inv_inertia_local,
            inv_inertia_world: Matrix3::zeros(),
            total_force: Vector3::zeros(),
            total_torque: Vector3::zeros(),
            gravity: Vector3::zeros(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            additional_damping: None,
            linear_sleep_threshold: 0.8,
            angular_sleep_threshold: 1.0,
            deactivation_time: 0.0,
            activation: ActivationState::Active,
            interpolation_pose: pose,
            interpolation_twist: Twist::zero(),
            predicted_pose: pose,
            hit_fraction: 1.0,
            ccd_square_motion_threshold: 0.0,
            ccd_swept_sphere_radius: 0.0,
            angular_factor: Vector3::repeat(1.0),
            island_tag: -1,
            constraint_refs: Vec::new(),
        };
        body.update_inertia_tensor();
        body
    }

    /// Create a static (immovable) body.
    #[must_use]
    pub fn new_static(id: BodyId, shape: CollisionShape, pose: Pose) -> Self {
        Self::new(id, shape, MassProperties::immovable(), pose)
    }

    /// Create a kinematic body: driven by pose, never by forces.
    ///
    /// Kinematic bodies never sleep; they report their motion to the rest of
    /// the world through [`Self::save_kinematic_state`].
    #[must_use]
    pub fn new_kinematic(id: BodyId, shape: CollisionShape, pose: Pose) -> Self {
        let mut body = Self::new(id, shape, MassProperties::immovable(), pose);
        body.kinematic = true;
        body.activation = ActivationState::AlwaysActive;
        body
    }

    /// Set damping coefficients (clamped to `[0, 1]`).
    #[must_use]
    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_damping = linear.clamp(0.0, 1.0);
        self.angular_damping = angular.clamp(0.0, 1.0);
        self
    }

    /// Enable the legacy extra damping mode.
    #[must_use]
    pub fn with_additional_damping(mut self, damping: AdditionalDamping) -> Self {
        self.additional_damping = Some(damping);
        self
    }

    /// Set the sleep speed thresholds.
    #[must_use]
    pub fn with_sleep_thresholds(mut self, linear: f64, angular: f64) -> Self {
        self.linear_sleep_threshold = linear;
        self.angular_sleep_threshold = angular;
        self
    }

    /// Enable continuous collision detection.
    ///
    /// `motion_threshold` is the distance per sub-step above which the body
    /// is swept; `swept_radius` is the radius of the sphere used for the
    /// sweep (usually the shape's inscribed radius).
    #[must_use]
    pub fn with_ccd(mut self, motion_threshold: f64, swept_radius: f64) -> Self {
        self.ccd_square_motion_threshold = motion_threshold * motion_threshold;
        self.ccd_swept_sphere_radius = swept_radius;
        self
    }

    /// Scale induced torque per local axis (zero locks an axis).
    #[must_use]
    pub fn with_angular_factor(mut self, factor: Vector3<f64>) -> Self {
        self.angular_factor = factor;
        self
    }

    /// Exempt the body from automatic deactivation.
    #[must_use]
    pub fn always_active(mut self) -> Self {
        self.activation = ActivationState::AlwaysActive;
        self
    }

    /// Set the initial velocities.
    #[must_use]
    pub fn with_velocity(mut self, twist: Twist) -> Self {
        debug_assert!(!self.is_static(), "static bodies cannot have velocity");
        self.linear_velocity = twist.linear;
        self.angular_velocity = twist.angular;
        self
    }

    // --- identity and classification -----------------------------------

    /// Body identifier.
    #[must_use]
    pub fn id(&self) -> BodyId {
        self.id
    }

    /// Collision shape.
    #[must_use]
    pub fn shape(&self) -> &CollisionShape {
        &self.shape
    }

    /// Whether the body is static (immovable and not kinematic).
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.inverse_mass == 0.0 && !self.kinematic
    }

    /// Whether the body is kinematic (pose-driven).
    #[must_use]
    pub fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    /// Whether the body has infinite mass, either static or kinematic.
    #[must_use]
    pub fn is_static_or_kinematic(&self) -> bool {
        self.inverse_mass == 0.0
    }

    /// Whether forces move this body.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.inverse_mass != 0.0
    }

    /// Whether contacts with this body merge simulation islands.
    #[must_use]
    pub fn merges_islands(&self) -> bool {
        !self.is_static_or_kinematic()
    }

    // --- state access ---------------------------------------------------

    /// Current world pose.
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Linear velocity (m/s).
    #[must_use]
    pub fn linear_velocity(&self) -> &Vector3<f64> {
        &self.linear_velocity
    }

    /// Angular velocity (rad/s).
    #[must_use]
    pub fn angular_velocity(&self) -> &Vector3<f64> {
        &self.angular_velocity
    }

    /// Inverse mass (0 for static/kinematic).
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        self.inverse_mass
    }

    /// World-space inverse inertia tensor.
    #[must_use]
    pub fn inverse_inertia_world(&self) -> &Matrix3<f64> {
        &self.inv_inertia_world
    }

    /// World-space bounding box at the current pose.
    #[must_use]
    pub fn aabb(&self) -> crate::shapes::Aabb {
        self.shape.aabb(&self.pose)
    }

    /// Set the linear velocity.
    ///
    /// Setting a velocity on a static body is a precondition violation.
    pub fn set_linear_velocity(&mut self, v: Vector3<f64>) {
        debug_assert!(!self.is_static(), "cannot set velocity on a static body");
        self.linear_velocity = v;
    }

    /// Set the angular velocity.
    ///
    /// Setting a velocity on a static body is a precondition violation.
    pub fn set_angular_velocity(&mut self, omega: Vector3<f64>) {
        debug_assert!(!self.is_static(), "cannot set velocity on a static body");
        self.angular_velocity = omega;
    }

    /// Island tag assigned by the island manager (-1 for static/kinematic).
    #[must_use]
    pub fn island_tag(&self) -> i32 {
        self.island_tag
    }

    pub(crate) fn set_island_tag(&mut self, tag: i32) {
        self.island_tag = tag;
    }

    /// Pose predicted by the last unconstrained-motion pass.
    #[must_use]
    pub fn predicted_pose(&self) -> &Pose {
        &self.predicted_pose
    }

    pub(crate) fn set_predicted_pose(&mut self, pose: Pose) {
        self.predicted_pose = pose;
    }

    /// Fraction of the last sub-step's motion that was actually performed.
    #[must_use]
    pub fn hit_fraction(&self) -> f64 {
        self.hit_fraction
    }

    pub(crate) fn set_hit_fraction(&mut self, fraction: f64) {
        self.hit_fraction = fraction;
    }

    /// Squared per-step motion above which this body is swept.
    #[must_use]
    pub fn ccd_square_motion_threshold(&self) -> f64 {
        self.ccd_square_motion_threshold
    }

    /// Radius of the sphere used for CCD sweeps.
    #[must_use]
    pub fn ccd_swept_sphere_radius(&self) -> f64 {
        self.ccd_swept_sphere_radius
    }

    /// Pose snapshot used for motion-state interpolation.
    #[must_use]
    pub fn interpolation_pose(&self) -> &Pose {
        &self.interpolation_pose
    }

    pub(crate) fn set_interpolation_pose(&mut self, pose: Pose) {
        self.interpolation_pose = pose;
    }

    /// Velocity snapshot used for motion-state interpolation.
    #[must_use]
    pub fn interpolation_twist(&self) -> &Twist {
        &self.interpolation_twist
    }

    /// Constraints registered for collision suppression on this body.
    #[must_use]
    pub fn constraint_refs(&self) -> &[ConstraintId] {
        &self.constraint_refs
    }

    pub(crate) fn add_constraint_ref(&mut self, id: ConstraintId) {
        if !self.constraint_refs.contains(&id) {
            self.constraint_refs.push(id);
        }
    }

    pub(crate) fn remove_constraint_ref(&mut self, id: ConstraintId) {
        self.constraint_refs.retain(|&r| r != id);
    }

    /// Whether collision between this body and `other` is enabled.
    ///
    /// Collision is suppressed when a constraint registered on this body
    /// links the two.
    #[must_use]
    pub fn collides_with(&self, other: &RigidBody, constraints: &ConstraintSet) -> bool {
        for &id in &self.constraint_refs {
            if let Some(c) = constraints.get(id) {
                if c.links(other.id) {
                    return false;
                }
            }
        }
        true
    }

    // --- forces and impulses --------------------------------------------

    /// Set the per-body gravity acceleration.
    pub fn set_gravity(&mut self, acceleration: Vector3<f64>) {
        self.gravity = acceleration;
    }

    /// Accumulate the gravity force for this step.
    pub fn apply_gravity(&mut self) {
        if self.is_static_or_kinematic() {
            return;
        }
        self.total_force += self.gravity / self.inverse_mass;
    }

    /// Apply a force through the center of mass.
    pub fn apply_central_force(&mut self, force: Vector3<f64>) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.total_force += force;
    }

    /// Apply a torque. The torque is taken as given; the angular factor only
    /// gates torque induced by the offset variants.
    pub fn apply_torque(&mut self, torque: Vector3<f64>) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.total_torque += torque;
    }

    /// Apply a force at an offset from the center of mass. The induced torque
    /// is scaled per axis by the angular factor.
    pub fn apply_force(&mut self, force: Vector3<f64>, rel_pos: Vector3<f64>) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.apply_central_force(force);
        self.apply_torque(rel_pos.cross(&force).component_mul(&self.angular_factor));
    }

    /// Apply an impulse through the center of mass.
    pub fn apply_central_impulse(&mut self, impulse: Vector3<f64>) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.linear_velocity += impulse * self.inverse_mass;
    }

    /// Apply an angular impulse. Like [`apply_torque`](Self::apply_torque),
    /// the value is taken as given; offset impulses route their induced
    /// torque through the angular factor.
    pub fn apply_torque_impulse(&mut self, torque: Vector3<f64>) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.angular_velocity += self.inv_inertia_world * torque;
    }

    /// Apply an impulse at an offset from the center of mass.
    pub fn apply_impulse(&mut self, impulse: Vector3<f64>, rel_pos: Vector3<f64>) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.apply_central_impulse(impulse);
        self.apply_torque_impulse(rel_pos.cross(&impulse).component_mul(&self.angular_factor));
    }

    /// Clear the accumulated force and torque.
    pub fn clear_forces(&mut self) {
        self.total_force = Vector3::zeros();
        self.total_torque = Vector3::zeros();
    }

    // --- integration ----------------------------------------------------

    /// Integrate accumulated forces into velocities over `dt`.
    ///
    /// The angular velocity is clamped uniformly so the body rotates at most
    /// a quarter turn per step; beyond that the exponential map loses too
    /// much accuracy.
    pub fn integrate_velocities(&mut self, dt: f64) {
        if self.is_static_or_kinematic() {
            return;
        }

        self.linear_velocity += self.total_force * (self.inverse_mass * dt);
        self.angular_velocity += self.inv_inertia_world * self.total_torque * dt;

        let angular_speed = self.angular_velocity.norm();
        if angular_speed * dt > MAX_ANGULAR_VELOCITY {
            self.angular_velocity *= (MAX_ANGULAR_VELOCITY / dt) / angular_speed;
        }
    }

    /// Apply velocity damping over `dt`.
    ///
    /// Both velocities decay as `(1 - d)^dt`. Bodies with the extra damping
    /// mode additionally get the two-threshold slowdown and a constant brake
    /// at very low speeds.
    pub fn apply_damping(&mut self, dt: f64) {
        self.linear_velocity *= (1.0 - self.linear_damping).powf(dt);
        self.angular_velocity *= (1.0 - self.angular_damping).powf(dt);

        let Some(extra) = self.additional_damping else {
            return;
        };

        if self.angular_velocity.norm_squared() < extra.angular_threshold_sqr
            && self.linear_velocity.norm_squared() < extra.linear_threshold_sqr
        {
            self.linear_velocity *= extra.factor;
            self.angular_velocity *= extra.factor;
        }

        let speed = self.linear_velocity.norm();
        if speed < self.linear_damping {
            if speed > EXTRA_DAMPING_BRAKE {
                self.linear_velocity -= self.linear_velocity * (EXTRA_DAMPING_BRAKE / speed);
            } else {
                self.linear_velocity = Vector3::zeros();
            }
        }

        let angular_speed = self.angular_velocity.norm();
        if angular_speed < self.angular_damping {
            if angular_speed > EXTRA_DAMPING_BRAKE {
                self.angular_velocity -=
                    self.angular_velocity * (EXTRA_DAMPING_BRAKE / angular_speed);
            } else {
                self.angular_velocity = Vector3::zeros();
            }
        }
    }

    /// Predict the pose after moving ballistically for `dt`.
    #[must_use]
    pub fn predict_integrated_transform(&self, dt: f64) -> Pose {
        transform_util::integrate_transform(
            &self.pose,
            &self.linear_velocity,
            &self.angular_velocity,
            dt,
        )
    }

    /// Rotate the local inverse inertia into world space.
    pub fn update_inertia_tensor(&mut self) {
        let rot = self.pose.rotation.to_rotation_matrix();
        self.inv_inertia_world =
            rot * Matrix3::from_diagonal(&self.inv_inertia_local) * rot.transpose();
    }

    /// Commit a new world pose, maintaining the interpolation snapshot.
    ///
    /// For static and kinematic bodies the interpolation pose stays at the
    /// pre-move pose so observers see the externally driven motion.
    pub fn set_center_of_mass_transform(&mut self, pose: Pose) {
        self.interpolation_pose = if self.is_static_or_kinematic() {
            self.pose
        } else {
            pose
        };
        self.interpolation_twist = Twist::new(self.linear_velocity, self.angular_velocity);
        self.pose = pose;
        self.update_inertia_tensor();
    }

    /// Move the body to its post-integration pose.
    pub fn proceed_to_transform(&mut self, pose: Pose) {
        self.set_center_of_mass_transform(pose);
    }

    /// Recover velocities of a pose-driven body by finite differences.
    pub fn save_kinematic_state(&mut self, dt: f64) {
        if dt == 0.0 {
            return;
        }
        let twist = transform_util::calculate_velocity(&self.interpolation_pose, &self.pose, dt);
        self.linear_velocity = twist.linear;
        self.angular_velocity = twist.angular;
        self.interpolation_twist = twist;
        self.interpolation_pose = self.pose;
    }

    // --- activation -----------------------------------------------------

    /// Current activation state.
    #[must_use]
    pub fn activation_state(&self) -> ActivationState {
        self.activation
    }

    /// Whether the body participates in integration this step.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.activation.is_active()
    }

    /// Seconds the body has been below its sleep thresholds.
    #[must_use]
    pub fn deactivation_timer(&self) -> f64 {
        self.deactivation_time
    }

    pub(crate) fn set_deactivation_timer_zero(&mut self) {
        self.deactivation_time = 0.0;
    }

    /// Request an activation state change, respecting `AlwaysActive`.
    pub fn set_activation_state(&mut self, state: ActivationState) {
        if self.activation.can_deactivate() {
            self.activation = state;
        }
    }

    /// Set the activation state unconditionally.
    pub fn force_activation_state(&mut self, state: ActivationState) {
        self.activation = state;
    }

    /// Wake the body and reset its sleep timer.
    pub fn activate(&mut self) {
        self.set_activation_state(ActivationState::Active);
        self.deactivation_time = 0.0;
    }

    /// Advance the sleep timer, or reset it on a velocity spike.
    pub fn update_deactivation(&mut self, dt: f64, config: &WorldConfig) {
        if config.deactivation_disabled
            || !self.activation.can_deactivate()
            || self.activation.is_sleeping()
        {
            return;
        }

        let below_thresholds = self.linear_velocity.norm_squared()
            < self.linear_sleep_threshold * self.linear_sleep_threshold
            && self.angular_velocity.norm_squared()
                < self.angular_sleep_threshold * self.angular_sleep_threshold;

        if below_thresholds {
            self.deactivation_time += dt;
        } else {
            self.deactivation_time = 0.0;
            self.set_activation_state(ActivationState::Active);
        }
    }

    /// Whether the body is ready to sleep.
    ///
    /// A zero [`WorldConfig::deactivation_time`] disables sleeping entirely,
    /// same as the explicit disable flag; it is not an instant-sleep setting.
    #[must_use]
    pub fn wants_sleeping(&self, config: &WorldConfig) -> bool {
        if !self.activation.can_deactivate() {
            return false;
        }
        if config.deactivation_disabled || config.deactivation_time == 0.0 {
            return false;
        }
        if matches!(
            self.activation,
            ActivationState::Sleeping | ActivationState::WantsDeactivation
        ) {
            return true;
        }
        self.deactivation_time > config.deactivation_time
    }
}
