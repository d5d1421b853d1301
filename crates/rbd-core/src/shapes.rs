//! Collision shapes, bounding boxes, and swept-sphere casts.
//!
//! The dynamics core only needs enough geometry to drive broad-phase
//! overlap, approximate inertia derivation, and the continuous-collision
//! sweep. Richer narrow-phase geometry belongs to an external pipeline
//! behind the [`crate::CollisionPipeline`] trait.

use nalgebra::{Point3, Vector3};
use rbd_types::Pose;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Half-extent used for the bounding box of an infinite plane.
const PLANE_AABB_EXTENT: f64 = 1.0e9;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3<f64>,
    /// Maximum corner.
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create an AABB from explicit corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB from a center point and half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Check whether two boxes overlap (touching counts).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// The smallest box containing both boxes.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// This box grown by `margin` on every side.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }
}

/// Result of a swept-sphere cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// Fraction of the motion at which contact occurs, in `[0, 1]`.
    pub fraction: f64,
    /// World-space surface normal on the hit shape, pointing at the sphere.
    pub normal: Vector3<f64>,
}

/// Convex (plus plane) collision shapes supported by the core.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionShape {
    /// Sphere centered at the body origin.
    Sphere {
        /// Radius (m).
        radius: f64,
    },
    /// Box centered at the body origin.
    Cuboid {
        /// Half-extents along the local axes (m).
        half_extents: Vector3<f64>,
    },
    /// Infinite half-space boundary: points `p` with `normal·p = offset`.
    ///
    /// The normal is in the body's local frame and assumed unit length.
    Plane {
        /// Local plane normal.
        normal: Vector3<f64>,
        /// Distance of the plane from the local origin along the normal.
        offset: f64,
    },
}

impl CollisionShape {
    /// Whether the shape is convex and bounded (eligible for CCD sweeps).
    #[must_use]
    pub fn is_convex(&self) -> bool {
        !matches!(self, Self::Plane { .. })
    }

    /// World-space bounding box of the shape at `pose`.
    #[must_use]
    pub fn aabb(&self, pose: &Pose) -> Aabb {
        match *self {
            Self::Sphere { radius } => {
                Aabb::from_center(pose.position, Vector3::repeat(radius))
            }
            Self::Cuboid { half_extents } => {
                // Extents of a rotated box: |R|·h component-wise.
                let rot = pose.rotation.to_rotation_matrix();
                let extents = rot.matrix().abs() * half_extents;
                Aabb::from_center(pose.position, extents)
            }
            Self::Plane { .. } => {
                Aabb::from_center(pose.position, Vector3::repeat(PLANE_AABB_EXTENT))
            }
        }
    }

    /// Diagonal local inertia for the shape at the given mass.
    ///
    /// Returns zeros for a plane (planes are only meaningful on static
    /// bodies).
    #[must_use]
    pub fn local_inertia(&self, mass: f64) -> Vector3<f64> {
        match *self {
            Self::Sphere { radius } => {
                let i = 0.4 * mass * radius * radius;
                Vector3::repeat(i)
            }
            Self::Cuboid { half_extents } => {
                let x2 = 4.0 * half_extents.x * half_extents.x;
                let y2 = 4.0 * half_extents.y * half_extents.y;
                let z2 = 4.0 * half_extents.z * half_extents.z;
                Vector3::new(
                    mass * (y2 + z2) / 12.0,
                    mass * (x2 + z2) / 12.0,
                    mass * (x2 + y2) / 12.0,
                )
            }
            Self::Plane { .. } => Vector3::zeros(),
        }
    }
}

/// Sweep a sphere of `radius` from `from` to `to` against a shape at `pose`.
///
/// Returns the earliest contact within the motion, or `None` for a miss.
/// A sphere already touching at the start reports fraction 0.
#[must_use]
pub fn cast_sphere(
    radius: f64,
    from: &Point3<f64>,
    to: &Point3<f64>,
    shape: &CollisionShape,
    pose: &Pose,
) -> Option<SweepHit> {
    match *shape {
        CollisionShape::Sphere { radius: other } => {
            cast_vs_sphere(radius + other, from, to, &pose.position)
        }
        CollisionShape::Cuboid { half_extents } => {
            cast_vs_cuboid(radius, from, to, &half_extents, pose)
        }
        CollisionShape::Plane { normal, offset } => {
            cast_vs_plane(radius, from, to, &normal, offset, pose)
        }
    }
}

/// Sweep a point from `from` to `to` against a sphere of combined radius.
fn cast_vs_sphere(
    combined_radius: f64,
    from: &Point3<f64>,
    to: &Point3<f64>,
    center: &Point3<f64>,
) -> Option<SweepHit> {
    let m = from - center;
    let c = m.norm_squared() - combined_radius * combined_radius;
    if c <= 0.0 {
        // Already overlapping at the start of the motion.
        let normal = m.try_normalize(1.0e-12).unwrap_or_else(Vector3::y);
        return Some(SweepHit {
            fraction: 0.0,
            normal,
        });
    }

    let d = to - from;
    let a = d.norm_squared();
    if a < 1.0e-24 {
        return None;
    }
    let b = m.dot(&d);
    if b >= 0.0 {
        // Moving away from the sphere.
        return None;
    }

    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }

    let t = (-b - disc.sqrt()) / a;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }

    let hit = from + d * t;
    let normal = (hit - center).try_normalize(1.0e-12).unwrap_or_else(Vector3::y);
    Some(SweepHit {
        fraction: t,
        normal,
    })
}

fn cast_vs_plane(
    radius: f64,
    from: &Point3<f64>,
    to: &Point3<f64>,
    local_normal: &Vector3<f64>,
    offset: f64,
    pose: &Pose,
) -> Option<SweepHit> {
    let normal = pose.transform_vector(local_normal);
    let origin = pose.position + normal * offset;

    let d0 = normal.dot(&(from - origin));
    let d1 = normal.dot(&(to - origin));

    if d0.abs() <= radius {
        let side = if d0 >= 0.0 { normal } else { -normal };
        return Some(SweepHit {
            fraction: 0.0,
            normal: side,
        });
    }

    if d0 > radius && d1 < radius {
        let fraction = (d0 - radius) / (d0 - d1);
        return Some(SweepHit { fraction, normal });
    }
    if d0 < -radius && d1 > -radius {
        let fraction = (-radius - d0) / (d1 - d0);
        return Some(SweepHit {
            fraction,
            normal: -normal,
        });
    }

    None
}

/// Sweep a sphere against a box by ray-casting against the box expanded by
/// the sphere radius. The rounding of the expanded corners is ignored, which
/// reports contact slightly early near corners; acceptable for motion
/// clamping.
fn cast_vs_cuboid(
    radius: f64,
    from: &Point3<f64>,
    to: &Point3<f64>,
    half_extents: &Vector3<f64>,
    pose: &Pose,
) -> Option<SweepHit> {
    let origin = pose.inverse_transform_point(from).coords;
    let dir = pose.inverse_transform_vector(&(to - from));
    let extents = half_extents + Vector3::repeat(radius);

    let mut t_min = 0.0_f64;
    let mut t_max = 1.0_f64;
    let mut entry_axis: Option<(usize, f64)> = None;

    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        let e = extents[axis];

        if d.abs() < 1.0e-12 {
            if o < -e || o > e {
                return None;
            }
            continue;
        }

        let inv = 1.0 / d;
        let mut t1 = (-e - o) * inv;
        let mut t2 = (e - o) * inv;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        if t1 > t_min {
            t_min = t1;
            entry_axis = Some((axis, -d.signum()));
        }
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }

    match entry_axis {
        Some((axis, sign)) => {
            let mut local_normal = Vector3::zeros();
            local_normal[axis] = sign;
            Some(SweepHit {
                fraction: t_min,
                normal: pose.transform_vector(&local_normal),
            })
        }
        None => {
            // Started inside the expanded box.
            let normal = (from - pose.position)
                .try_normalize(1.0e-12)
                .unwrap_or_else(Vector3::y);
            Some(SweepHit {
                fraction: 0.0,
                normal,
            })
        }
    }
}
