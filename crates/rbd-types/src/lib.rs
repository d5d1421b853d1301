//! Pure data types for rigid-body dynamics simulation.
//!
//! This crate provides the shared vocabulary of the dynamics workspace:
//! identifiers, poses, twists, mass properties, activation states,
//! configuration, and the error type. It contains no simulation behavior;
//! the stepping loop lives in `rbd-core`.
//!
//! # Quick Start
//!
//! ```
//! use rbd_types::{BodyId, MassProperties, Pose, Twist, WorldConfig};
//! use nalgebra::{Point3, Vector3};
//!
//! let id = BodyId::new(0);
//! let pose = Pose::from_position(Point3::new(0.0, 5.0, 0.0));
//! let mass = MassProperties::new(2.0, Vector3::new(0.1, 0.1, 0.1));
//! let config = WorldConfig::default().with_gravity(Vector3::new(0.0, -9.81, 0.0));
//!
//! assert_eq!(mass.inverse_mass(), 0.5);
//! assert!(config.validate().is_ok());
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
)]

mod activation;
mod body;
mod config;
mod error;

pub use activation::ActivationState;
pub use body::{BodyId, ConstraintId, MassProperties, Pose, Twist};
pub use config::{SolverConfig, WorldConfig};
pub use error::SimError;

// Re-export the math crate so downstream crates agree on versions.
pub use nalgebra;

/// Convenience result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
