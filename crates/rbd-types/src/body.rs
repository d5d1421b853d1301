//! Body and constraint identity plus kinematic state types.
//!
//! This module provides the types shared across the dynamics pipeline: opaque
//! body/constraint identifiers, poses in 6 degrees of freedom, velocity
//! twists, and mass properties with a diagonal local inertia.

use nalgebra::{Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a rigid body in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub u64);

impl BodyId {
    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for BodyId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({})", self.0)
    }
}

/// Unique identifier for a constraint in the simulation.
///
/// Constraint identifiers are non-owning handles: bodies keep lists of them
/// to record attachments, while the world's constraint table owns the
/// constraints themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintId(pub u64);

impl ConstraintId {
    /// Create a new constraint ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConstraintId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Constraint({})", self.0)
    }
}

/// Position and orientation of a rigid body.
///
/// Represents the pose (configuration) of a body in 3D space using
/// a position vector and a unit quaternion for orientation.
///
/// # Example
///
/// ```
/// use rbd_types::Pose;
/// use nalgebra::Point3;
///
/// let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
///
/// let local = Point3::new(1.0, 0.0, 0.0);
/// let world = pose.transform_point(&local);
/// assert_eq!(world, Point3::new(2.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn from_position_rotation(
        position: Point3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self { position, rotation }
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Transform a vector from local to world coordinates (rotation only).
    #[must_use]
    pub fn transform_vector(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local
    }

    /// Transform a point from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.inverse() * (world - self.position))
    }

    /// Transform a vector from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_vector(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * world
    }

    /// Compute the inverse pose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self {
            position: Point3::from(-(inv_rotation * self.position.coords)),
            rotation: inv_rotation,
        }
    }

    /// Compose two poses: self * other.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            position: self.transform_point(&other.position),
            rotation: self.rotation * other.rotation,
        }
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.rotation.coords.iter().all(|x| x.is_finite())
    }
}

/// Linear and angular velocity of a rigid body.
///
/// # Example
///
/// ```
/// use rbd_types::Twist;
/// use nalgebra::Vector3;
///
/// let twist = Twist::linear(Vector3::new(1.0, 0.0, 0.0));
/// assert_eq!(twist.linear.x, 1.0);
/// assert_eq!(twist.angular.norm(), 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Twist {
    /// Linear velocity in world coordinates (m/s).
    pub linear: Vector3<f64>,
    /// Angular velocity in world coordinates (rad/s).
    pub angular: Vector3<f64>,
}

impl Default for Twist {
    fn default() -> Self {
        Self::zero()
    }
}

impl Twist {
    /// Create a twist with specified linear and angular velocity.
    #[must_use]
    pub const fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }

    /// Create a zero twist (at rest).
    #[must_use]
    pub fn zero() -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }

    /// Create a twist with linear velocity only.
    #[must_use]
    pub fn linear(v: Vector3<f64>) -> Self {
        Self {
            linear: v,
            angular: Vector3::zeros(),
        }
    }

    /// Create a twist with angular velocity only.
    #[must_use]
    pub fn angular(omega: Vector3<f64>) -> Self {
        Self {
            linear: Vector3::zeros(),
            angular: omega,
        }
    }

    /// Compute the velocity at a point offset from the body origin.
    ///
    /// `v_point` = `v_linear` + omega × r
    #[must_use]
    pub fn velocity_at_point(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        self.linear + self.angular.cross(offset)
    }

    /// Check if the twist contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.linear.iter().all(|x| x.is_finite()) && self.angular.iter().all(|x| x.is_finite())
    }

    /// Get the linear speed (magnitude of linear velocity).
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.linear.norm()
    }

    /// Get the angular speed (magnitude of angular velocity).
    #[must_use]
    pub fn angular_speed(&self) -> f64 {
        self.angular.norm()
    }
}

/// Mass properties of a rigid body.
///
/// The local inertia is stored as the diagonal of the inertia tensor in the
/// body frame; bodies rotate it into world space each step. A mass of zero
/// means the body is static (infinite mass). A zero inertia vector asks the
/// body constructor to derive inertia from the collision shape.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg (0 = static).
    pub mass: f64,
    /// Diagonal of the local inertia tensor (kg·m²).
    pub local_inertia: Vector3<f64>,
}

impl MassProperties {
    /// Create mass properties with given values.
    #[must_use]
    pub const fn new(mass: f64, local_inertia: Vector3<f64>) -> Self {
        Self { mass, local_inertia }
    }

    /// Create the mass properties of a static (immovable) body.
    #[must_use]
    pub fn immovable() -> Self {
        Self {
            mass: 0.0,
            local_inertia: Vector3::zeros(),
        }
    }

    /// Create mass properties that derive inertia from the body's shape.
    #[must_use]
    pub fn from_shape(mass: f64) -> Self {
        Self {
            mass,
            local_inertia: Vector3::zeros(),
        }
    }

    /// Get the inverse mass (0 if static).
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        if self.mass <= 0.0 || self.mass.is_infinite() {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    /// Component-wise inverse of the local inertia diagonal.
    ///
    /// Zero components invert to zero (locked axis).
    #[must_use]
    pub fn inverse_local_inertia(&self) -> Vector3<f64> {
        self.local_inertia.map(|i| if i == 0.0 { 0.0 } else { 1.0 / i })
    }

    /// Check if this represents a static (immovable) body.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.mass <= 0.0 || self.mass.is_infinite()
    }

    /// Validate that the mass properties are physically valid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mass < 0.0 {
            return Err(crate::SimError::invalid_mass("mass cannot be negative"));
        }

        if !self.mass.is_finite() && self.mass != f64::INFINITY {
            return Err(crate::SimError::invalid_mass(
                "mass must be finite or infinity (static)",
            ));
        }

        if self.local_inertia.iter().any(|i| !i.is_finite() || *i < 0.0) {
            return Err(crate::SimError::invalid_mass(
                "local inertia must be finite and non-negative",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_body_id() {
        let id = BodyId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.to_string(), "Body(42)");

        let id2: BodyId = 42.into();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_constraint_id() {
        let id = ConstraintId::new(7);
        assert_eq!(id.raw(), 7);
        assert_eq!(id.to_string(), "Constraint(7)");
    }

    #[test]
    fn test_pose_identity() {
        let pose = Pose::identity();
        let p = Point3::new(1.0, 2.0, 3.0);
        let transformed = pose.transform_point(&p);
        assert_relative_eq!(transformed.coords, p.coords, epsilon = 1e-10);
    }

    #[test]
    fn test_pose_rotation() {
        // 90 degree rotation around Z
        let pose = Pose::from_position_rotation(
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        );

        let local = Vector3::new(1.0, 0.0, 0.0);
        let world = pose.transform_vector(&local);

        assert_relative_eq!(world.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(world.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_pose_inverse() {
        let pose = Pose::from_position_rotation(
            Point3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );

        let inv = pose.inverse();
        let composed = pose.compose(&inv);

        assert_relative_eq!(composed.position.coords, Vector3::zeros(), epsilon = 1e-10);
    }

    #[test]
    fn test_pose_roundtrip() {
        let pose = Pose::from_position_rotation(
            Point3::new(-2.0, 0.5, 4.0),
            UnitQuaternion::from_euler_angles(0.3, -0.1, 0.7),
        );

        let world = Point3::new(1.0, -1.0, 2.0);
        let local = pose.inverse_transform_point(&world);
        let back = pose.transform_point(&local);
        assert_relative_eq!(back.coords, world.coords, epsilon = 1e-10);
    }

    #[test]
    fn test_twist_velocity_at_point() {
        // Spinning around Z axis
        let twist = Twist::angular(Vector3::new(0.0, 0.0, 1.0));
        let offset = Vector3::new(1.0, 0.0, 0.0);

        let v = twist.velocity_at_point(&offset);
        // omega × r = (0,0,1) × (1,0,0) = (0,1,0)
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_mass_properties_inverse() {
        let props = MassProperties::new(2.0, Vector3::new(0.5, 0.0, 4.0));
        assert_relative_eq!(props.inverse_mass(), 0.5, epsilon = 1e-10);

        let inv = props.inverse_local_inertia();
        assert_relative_eq!(inv.x, 2.0, epsilon = 1e-10);
        assert_eq!(inv.y, 0.0);
        assert_relative_eq!(inv.z, 0.25, epsilon = 1e-10);
    }

    #[test]
    fn test_mass_properties_static() {
        let props = MassProperties::immovable();
        assert!(props.is_static());
        assert_eq!(props.inverse_mass(), 0.0);
        assert!(props.validate().is_ok());
    }

    #[test]
    fn test_mass_properties_validation() {
        let negative = MassProperties::new(-1.0, Vector3::zeros());
        assert!(negative.validate().is_err());

        let bad_inertia = MassProperties::new(1.0, Vector3::new(-0.1, 0.0, 0.0));
        assert!(bad_inertia.validate().is_err());
    }
}
