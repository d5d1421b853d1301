//! Discrete rigid-body dynamics core.
//!
//! This crate owns the stepping loop: fixed-timestep sub-stepping with
//! interpolation, force and damping integration, simulation islands with
//! island-granular sleeping, swept-sphere continuous collision detection,
//! and two-body constraint lifecycle management. Collision detection and
//! constraint solving are seams ([`CollisionPipeline`], [`ConstraintSolver`])
//! with simple default implementations; shared data types come from
//! [`rbd_types`].
//!
//! # Quick Start
//!
//! ```
//! use rbd_core::{CollisionShape, DynamicsWorld, RigidBody};
//! use rbd_types::{BodyId, MassProperties, Pose, WorldConfig};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut world = DynamicsWorld::new(
//!     WorldConfig::default().with_gravity(Vector3::new(0.0, -9.81, 0.0)),
//! );
//! world
//!     .add_body(RigidBody::new(
//!         BodyId::new(0),
//!         CollisionShape::Sphere { radius: 0.5 },
//!         MassProperties::from_shape(1.0),
//!         Pose::from_position(Point3::new(0.0, 10.0, 0.0)),
//!     ))
//!     .unwrap();
//!
//! for _ in 0..60 {
//!     world.step(1.0 / 60.0);
//! }
//! let body = world.body(BodyId::new(0)).unwrap();
//! assert!(body.pose().position.y < 10.0);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
)]

pub mod body;
mod island;
pub mod pipeline;
pub mod shapes;
pub mod solver;
mod sweep_tree;
pub mod transform_util;
pub mod world;

pub use body::{AdditionalDamping, RigidBody};
pub use pipeline::{
    CollisionPipeline, ContactManifold, ContactPoint, DefaultCollisionPipeline,
};
pub use shapes::{Aabb, CollisionShape, SweepHit};
pub use solver::{Constraint, ConstraintSet, ConstraintSolver, NullSolver};
pub use world::{BodySet, DynamicsWorld, MotionObserver, WorldAction};

// Re-export the shared types crate for downstream convenience.
pub use rbd_types;
