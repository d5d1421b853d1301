//! Transform integration and velocity estimation.
//!
//! Free functions shared by the body integrator, the CCD pass, and
//! kinematic state capture. Rotation is advanced with the quaternion
//! exponential map; near-zero rotation rates switch to a third-order
//! Taylor expansion to keep the result finite and smooth.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use rbd_types::{Pose, Twist};

/// Largest rotation allowed in a single integration step (rad).
///
/// Limits the exponential-map error for fast spinners; half a quarter turn
/// per step keeps the linearization honest.
pub const ANGULAR_MOTION_THRESHOLD: f64 = 0.5 * std::f64::consts::FRAC_PI_2;

/// Rotation rate below which the Taylor branch of the exponential map is used.
const SMALL_ANGLE_CUTOFF: f64 = 0.001;

/// Advance a pose by constant linear and angular velocity over `dt`.
///
/// The angular step is clamped so the body rotates at most
/// [`ANGULAR_MOTION_THRESHOLD`] radians in one call.
#[must_use]
pub fn integrate_transform(
    pose: &Pose,
    linear: &Vector3<f64>,
    angular: &Vector3<f64>,
    dt: f64,
) -> Pose {
    let position = pose.position + linear * dt;

    let mut angular = *angular;
    let mut angle = angular.norm();
    if angle * dt > ANGULAR_MOTION_THRESHOLD {
        let clamped = ANGULAR_MOTION_THRESHOLD / dt;
        angular *= clamped / angle;
        angle = clamped;
    }

    // sin(θ·dt/2)/θ, with the limit dt/2 − dt³·θ²/48 as θ → 0.
    let axis = if angle < SMALL_ANGLE_CUTOFF {
        angular * (0.5 * dt - dt * dt * dt * 0.020_833_333_333 * angle * angle)
    } else {
        angular * ((0.5 * angle * dt).sin() / angle)
    };

    let delta = Quaternion::new((angle * dt * 0.5).cos(), axis.x, axis.y, axis.z);
    let rotation = UnitQuaternion::new_normalize(delta * pose.rotation.into_inner());

    Pose { position, rotation }
}

/// Estimate the constant velocity that carries `from` to `to` over `dt`.
///
/// Used to recover velocities for kinematic bodies whose poses are driven
/// externally. The angular part takes the shortest arc.
#[must_use]
pub fn calculate_velocity(from: &Pose, to: &Pose, dt: f64) -> Twist {
    let inv_dt = 1.0 / dt;
    let linear = (to.position - from.position) * inv_dt;

    let delta = to.rotation * from.rotation.inverse();
    let angular = match delta.axis_angle() {
        Some((axis, angle)) => axis.into_inner() * (angle * inv_dt),
        None => Vector3::zeros(),
    };

    Twist::new(linear, angular)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_pure_translation() {
        let pose = Pose::from_position(Point3::new(1.0, 0.0, 0.0));
        let out = integrate_transform(&pose, &Vector3::new(2.0, 0.0, 0.0), &Vector3::zeros(), 0.5);

        assert_relative_eq!(out.position.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            out.rotation.angle_to(&UnitQuaternion::identity()),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rotation_rate_matches_angle() {
        // ω = 1 rad/s around Z over 0.25 s should rotate by 0.25 rad.
        let pose = Pose::identity();
        let out = integrate_transform(&pose, &Vector3::zeros(), &Vector3::new(0.0, 0.0, 1.0), 0.25);

        assert_relative_eq!(out.rotation.angle(), 0.25, epsilon = 1e-10);
    }

    #[test]
    fn test_taylor_branch_is_continuous() {
        // Integrate with rotation rates just on either side of the cutoff;
        // the resulting rotations must agree to first order.
        let pose = Pose::identity();
        let dt = 1.0;
        let below = integrate_transform(
            &pose,
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 0.000_999),
            dt,
        );
        let above = integrate_transform(
            &pose,
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 0.001_001),
            dt,
        );

        assert_relative_eq!(below.rotation.angle(), 0.000_999, epsilon = 1e-9);
        assert_relative_eq!(above.rotation.angle(), 0.001_001, epsilon = 1e-9);
    }

    #[test]
    fn test_angular_motion_clamp() {
        // A huge rotation rate must be limited to the per-step threshold.
        let pose = Pose::identity();
        let out = integrate_transform(
            &pose,
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 1000.0),
            1.0,
        );

        assert_relative_eq!(out.rotation.angle(), ANGULAR_MOTION_THRESHOLD, epsilon = 1e-9);
        // Clamping scales the rotation rate uniformly; direction is preserved.
        let axis = out.rotation.axis().unwrap();
        assert_relative_eq!(axis.into_inner(), Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_small_rate_long_step_stays_accurate() {
        // θ below the Taylor cutoff but θ·dt well above it; the branch choice
        // keys on the rotation rate alone, and the result must still match
        // the closed-form rotation angle.
        let pose = Pose::identity();
        let out = integrate_transform(
            &pose,
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 0.000_9),
            2.0,
        );

        assert_relative_eq!(out.rotation.angle(), 0.001_8, epsilon = 1e-9);
    }

    #[test]
    fn test_velocity_round_trip() {
        let from = Pose::from_position_rotation(
            Point3::new(0.0, 1.0, 0.0),
            UnitQuaternion::from_euler_angles(0.1, 0.0, 0.2),
        );
        let linear = Vector3::new(1.0, -0.5, 0.25);
        let angular = Vector3::new(0.0, 0.4, 0.0);
        let dt = 0.01;

        let to = integrate_transform(&from, &linear, &angular, dt);
        let twist = calculate_velocity(&from, &to, dt);

        assert_relative_eq!(twist.linear, linear, epsilon = 1e-8);
        assert_relative_eq!(twist.angular, angular, epsilon = 1e-6);
    }

    #[test]
    fn test_velocity_of_identical_poses_is_zero() {
        let pose = Pose::from_position(Point3::new(3.0, 2.0, 1.0));
        let twist = calculate_velocity(&pose, &pose, 0.1);
        assert_relative_eq!(twist.speed(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(twist.angular_speed(), 0.0, epsilon = 1e-12);
    }
}
