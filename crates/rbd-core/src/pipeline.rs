//! Collision pipeline seam and a default analytic implementation.
//!
//! The stepping loop is collision-system agnostic: it only needs overlap
//! pairs for island merging, persistent manifolds for the solver, and the
//! two pair queries the CCD pass asks. [`DefaultCollisionPipeline`] covers
//! the shapes the core ships with; richer narrow phases replace it behind
//! the [`CollisionPipeline`] trait.

use hashbrown::HashSet;
use nalgebra::{Point3, Vector3};
use rbd_types::BodyId;

use crate::shapes::CollisionShape;
use crate::solver::ConstraintSet;
use crate::world::BodySet;

/// A single contact point between two bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Contact position in world coordinates.
    pub position: Point3<f64>,
    /// Contact normal, pointing from `body_b` toward `body_a`.
    pub normal: Vector3<f64>,
    /// Penetration depth (positive when overlapping).
    pub depth: f64,
}

/// Persistent contact manifold between a pair of bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactManifold {
    /// First body of the pair.
    pub body_a: BodyId,
    /// Second body of the pair.
    pub body_b: BodyId,
    /// Contact points, at most a handful per pair.
    pub points: Vec<ContactPoint>,
}

impl ContactManifold {
    /// Whether the manifold carries any contact points.
    #[must_use]
    pub fn has_contacts(&self) -> bool {
        !self.points.is_empty()
    }

    /// Whether the manifold links the given pair (in either order).
    #[must_use]
    pub fn matches(&self, a: BodyId, b: BodyId) -> bool {
        (self.body_a == a && self.body_b == b) || (self.body_a == b && self.body_b == a)
    }
}

/// Collision detection seam used by the dynamics world.
pub trait CollisionPipeline {
    /// Refresh overlap pairs and contact manifolds for the current poses.
    ///
    /// `constraints` is provided so the pipeline can honor constraint-pair
    /// collision suppression.
    fn update(&mut self, bodies: &BodySet, constraints: &ConstraintSet, dt: f64);

    /// Contact manifolds from the last update.
    fn manifolds(&self) -> &[ContactManifold];

    /// Broad-phase overlap pairs from the last update; feeds island merging.
    fn overlapping_pairs(&self) -> &[(BodyId, BodyId)];

    /// Whether the pair currently has a manifold with contact points.
    fn has_contact(&self, a: BodyId, b: BodyId) -> bool;

    /// Whether contacts between the pair generate a collision response.
    ///
    /// Pairs without response are swept conservatively by the CCD pass.
    fn needs_response(&self, a: BodyId, b: BodyId) -> bool;
}

fn pair_key(a: BodyId, b: BodyId) -> (u64, u64) {
    let (a, b) = (a.raw(), b.raw());
    if a <= b { (a, b) } else { (b, a) }
}

/// Brute-force broad phase plus analytic narrow phase.
///
/// Good for scenes up to a few hundred bodies; box-box pairs report overlap
/// but produce no contact points.
#[derive(Debug, Clone)]
pub struct DefaultCollisionPipeline {
    margin: f64,
    manifolds: Vec<ContactManifold>,
    pairs: Vec<(BodyId, BodyId)>,
    contact_pairs: HashSet<(u64, u64)>,
    response_disabled: HashSet<(u64, u64)>,
}

impl Default for DefaultCollisionPipeline {
    fn default() -> Self {
        Self::new(0.04)
    }
}

impl DefaultCollisionPipeline {
    /// Create a pipeline with the given collision margin.
    #[must_use]
    pub fn new(margin: f64) -> Self {
        Self {
            margin,
            manifolds: Vec::new(),
            pairs: Vec::new(),
            contact_pairs: HashSet::new(),
            response_disabled: HashSet::new(),
        }
    }

    /// Enable or disable collision response for a pair.
    pub fn set_response_enabled(&mut self, a: BodyId, b: BodyId, enabled: bool) {
        let key = pair_key(a, b);
        if enabled {
            self.response_disabled.remove(&key);
        } else {
            self.response_disabled.insert(key);
        }
    }

    fn generate_contacts(
        &self,
        a: &crate::body::RigidBody,
        b: &crate::body::RigidBody,
    ) -> Vec<ContactPoint> {
        use CollisionShape::{Cuboid, Plane, Sphere};

        let (pa, pb) = (a.pose(), b.pose());
        match (*a.shape(), *b.shape()) {
            (Sphere { radius: ra }, Sphere { radius: rb }) => {
                sphere_sphere(pa.position, ra, pb.position, rb, self.margin)
                    .into_iter()
                    .collect()
            }
            (Sphere { radius }, Plane { normal, offset }) => {
                let n = pb.transform_vector(&normal);
                let origin = pb.position + n * offset;
                sphere_plane(pa.position, radius, &n, &origin, self.margin)
                    .into_iter()
                    .collect()
            }
            (Plane { normal, offset }, Sphere { radius }) => {
                let n = pa.transform_vector(&normal);
                let origin = pa.position + n * offset;
                sphere_plane(pb.position, radius, &n, &origin, self.margin)
                    .into_iter()
                    .map(flip)
                    .collect()
            }
            (Sphere { radius }, Cuboid { half_extents }) => {
                sphere_cuboid(pa.position, radius, pb, &half_extents, self.margin)
                    .into_iter()
                    .collect()
            }
            (Cuboid { half_extents }, Sphere { radius }) => {
                sphere_cuboid(pb.position, radius, pa, &half_extents, self.margin)
                    .into_iter()
                    .map(flip)
                    .collect()
            }
            (Cuboid { half_extents }, Plane { normal, offset }) => {
                let n = pb.transform_vector(&normal);
                let origin = pb.position + n * offset;
                cuboid_plane(pa, &half_extents, &n, &origin, self.margin)
            }
            (Plane { normal, offset }, Cuboid { half_extents }) => {
                let n = pa.transform_vector(&normal);
                let origin = pa.position + n * offset;
                cuboid_plane(pb, &half_extents, &n, &origin, self.margin)
                    .into_iter()
                    .map(flip)
                    .collect()
            }
            // Box-box and plane-plane produce no analytic contacts here.
            (Cuboid { .. }, Cuboid { .. }) | (Plane { .. }, Plane { .. }) => Vec::new(),
        }
    }
}

fn flip(mut point: ContactPoint) -> ContactPoint {
    point.normal = -point.normal;
    point
}

/// Contact between two spheres, normal from `b` toward `a`.
fn sphere_sphere(
    pa: Point3<f64>,
    ra: f64,
    pb: Point3<f64>,
    rb: f64,
    margin: f64,
) -> Option<ContactPoint> {
    let delta = pa - pb;
    let dist = delta.norm();
    let depth = ra + rb - dist;
    if depth < -margin {
        return None;
    }
    let normal = delta.try_normalize(1.0e-12).unwrap_or_else(Vector3::y);
    Some(ContactPoint {
        position: pb + normal * rb,
        normal,
        depth,
    })
}

/// Contact between a sphere and a plane, normal from the plane toward the
/// sphere.
fn sphere_plane(
    center: Point3<f64>,
    radius: f64,
    normal: &Vector3<f64>,
    origin: &Point3<f64>,
    margin: f64,
) -> Option<ContactPoint> {
    let dist = normal.dot(&(center - origin));
    let signed_normal = if dist >= 0.0 { *normal } else { -normal };
    let depth = radius - dist.abs();
    if depth < -margin {
        return None;
    }
    Some(ContactPoint {
        position: center - signed_normal * dist.abs(),
        normal: signed_normal,
        depth,
    })
}

/// Contact between a sphere and a box, normal from the box toward the sphere.
fn sphere_cuboid(
    center: Point3<f64>,
    radius: f64,
    box_pose: &rbd_types::Pose,
    half_extents: &Vector3<f64>,
    margin: f64,
) -> Option<ContactPoint> {
    let local = box_pose.inverse_transform_point(&center).coords;
    let clamped = Vector3::new(
        local.x.clamp(-half_extents.x, half_extents.x),
        local.y.clamp(-half_extents.y, half_extents.y),
        local.z.clamp(-half_extents.z, half_extents.z),
    );
    let delta = local - clamped;
    let dist_sq = delta.norm_squared();

    if dist_sq > 1.0e-24 {
        // Center outside the box.
        let dist = dist_sq.sqrt();
        let depth = radius - dist;
        if depth < -margin {
            return None;
        }
        let world_point = box_pose.transform_point(&Point3::from(clamped));
        let normal = box_pose.transform_vector(&(delta / dist));
        return Some(ContactPoint {
            position: world_point,
            normal,
            depth,
        });
    }

    // Center inside the box: push out along the shallowest face.
    let mut min_gap = f64::MAX;
    let mut local_normal = Vector3::x();
    for axis in 0..3 {
        let gap = half_extents[axis] - local[axis].abs();
        if gap < min_gap {
            min_gap = gap;
            let mut n = Vector3::zeros();
            n[axis] = local[axis].signum();
            local_normal = n;
        }
    }
    Some(ContactPoint {
        position: center,
        normal: box_pose.transform_vector(&local_normal),
        depth: radius + min_gap,
    })
}

/// Corner contacts between a box and a plane, normal from the plane toward
/// the box.
fn cuboid_plane(
    box_pose: &rbd_types::Pose,
    half_extents: &Vector3<f64>,
    normal: &Vector3<f64>,
    origin: &Point3<f64>,
    margin: f64,
) -> Vec<ContactPoint> {
    let mut points = Vec::new();
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                let corner = Point3::new(
                    sx * half_extents.x,
                    sy * half_extents.y,
                    sz * half_extents.z,
                );
                let world = box_pose.transform_point(&corner);
                let dist = normal.dot(&(world - origin));
                if dist < margin {
                    points.push(ContactPoint {
                        position: world,
                        normal: *normal,
                        depth: -dist,
                    });
                }
            }
        }
    }
    points
}

impl CollisionPipeline for DefaultCollisionPipeline {
    fn update(&mut self, bodies: &BodySet, constraints: &ConstraintSet, _dt: f64) {
        self.manifolds.clear();
        self.pairs.clear();
        self.contact_pairs.clear();

        let aabbs: Vec<_> = bodies
            .iter()
            .map(|b| b.aabb().expanded(self.margin))
            .collect();

        for i in 0..bodies.len() {
            for j in (i + 1)..bodies.len() {
                let a = bodies.by_index(i);
                let b = bodies.by_index(j);

                if a.is_static_or_kinematic() && b.is_static_or_kinematic() {
                    continue;
                }
                // A pair of sleepers generates no new information.
                if !a.is_active() && !b.is_active() {
                    continue;
                }
                if !a.collides_with(b, constraints) || !b.collides_with(a, constraints) {
                    continue;
                }
                if !aabbs[i].overlaps(&aabbs[j]) {
                    continue;
                }

                self.pairs.push((a.id(), b.id()));

                let points = self.generate_contacts(a, b);
                if !points.is_empty() {
                    self.contact_pairs.insert(pair_key(a.id(), b.id()));
                    self.manifolds.push(ContactManifold {
                        body_a: a.id(),
                        body_b: b.id(),
                        points,
                    });
                }
            }
        }
    }

    fn manifolds(&self) -> &[ContactManifold] {
        &self.manifolds
    }

    fn overlapping_pairs(&self) -> &[(BodyId, BodyId)] {
        &self.pairs
    }

    fn has_contact(&self, a: BodyId, b: BodyId) -> bool {
        self.contact_pairs.contains(&pair_key(a, b))
    }

    fn needs_response(&self, a: BodyId, b: BodyId) -> bool {
        !self.response_disabled.contains(&pair_key(a, b))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::RigidBody;
    use approx::assert_relative_eq;
    use rbd_types::{MassProperties, Pose};

    fn world_with(bodies: Vec<RigidBody>) -> BodySet {
        let mut set = BodySet::default();
        for body in bodies {
            set.insert(body).unwrap();
        }
        set
    }

    fn sphere(id: u64, x: f64, y: f64) -> RigidBody {
        RigidBody::new(
            BodyId::new(id),
            CollisionShape::Sphere { radius: 1.0 },
            MassProperties::from_shape(1.0),
            Pose::from_position(Point3::new(x, y, 0.0)),
        )
    }

    fn ground(id: u64) -> RigidBody {
        RigidBody::new_static(
            BodyId::new(id),
            CollisionShape::Plane {
                normal: Vector3::y(),
                offset: 0.0,
            },
            Pose::identity(),
        )
    }

    #[test]
    fn test_sphere_sphere_contact() {
        let bodies = world_with(vec![sphere(0, 0.0, 0.0), sphere(1, 1.5, 0.0)]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        assert_eq!(pipeline.manifolds().len(), 1);
        let m = &pipeline.manifolds()[0];
        assert_relative_eq!(m.points[0].depth, 0.5, epsilon = 1e-10);
        // Normal points from body 1 toward body 0.
        assert_relative_eq!(m.points[0].normal.x, -1.0, epsilon = 1e-10);
        assert!(pipeline.has_contact(BodyId::new(0), BodyId::new(1)));
    }

    #[test]
    fn test_sphere_plane_contact() {
        let bodies = world_with(vec![sphere(0, 0.0, 0.5), ground(1)]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        assert_eq!(pipeline.manifolds().len(), 1);
        let m = &pipeline.manifolds()[0];
        assert_relative_eq!(m.points[0].depth, 0.5, epsilon = 1e-10);
        assert_relative_eq!(m.points[0].normal.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_separated_pair_has_no_contact() {
        let bodies = world_with(vec![sphere(0, 0.0, 0.0), sphere(1, 10.0, 0.0)]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        assert!(pipeline.manifolds().is_empty());
        assert!(pipeline.overlapping_pairs().is_empty());
        assert!(!pipeline.has_contact(BodyId::new(0), BodyId::new(1)));
    }

    #[test]
    fn test_static_pair_skipped() {
        let bodies = world_with(vec![ground(0), ground(1)]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);
        assert!(pipeline.overlapping_pairs().is_empty());
    }

    #[test]
    fn test_constraint_suppression_skips_pair() {
        use crate::solver::Constraint;
        use rbd_types::ConstraintId;

        let mut bodies = world_with(vec![sphere(0, 0.0, 0.0), sphere(1, 1.5, 0.0)]);
        let mut constraints = ConstraintSet::default();
        let cid = ConstraintId::new(0);
        constraints
            .insert(Constraint::new(cid, BodyId::new(0), BodyId::new(1)))
            .unwrap();
        bodies
            .get_mut(BodyId::new(0))
            .unwrap()
            .add_constraint_ref(cid);

        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);
        assert!(pipeline.manifolds().is_empty());
    }

    #[test]
    fn test_cuboid_plane_corner_contacts() {
        let box_body = RigidBody::new(
            BodyId::new(0),
            CollisionShape::Cuboid {
                half_extents: Vector3::repeat(0.5),
            },
            MassProperties::from_shape(1.0),
            Pose::from_position(Point3::new(0.0, 0.4, 0.0)),
        );
        let bodies = world_with(vec![box_body, ground(1)]);
        let constraints = ConstraintSet::default();
        let mut pipeline = DefaultCollisionPipeline::default();
        pipeline.update(&bodies, &constraints, 1.0 / 60.0);

        // The four bottom corners penetrate by 0.1.
        let m = &pipeline.manifolds()[0];
        assert_eq!(m.points.len(), 4);
        for p in &m.points {
            assert_relative_eq!(p.depth, 0.1, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_response_toggle() {
        let mut pipeline = DefaultCollisionPipeline::default();
        let (a, b) = (BodyId::new(0), BodyId::new(1));
        assert!(pipeline.needs_response(a, b));
        pipeline.set_response_enabled(a, b, false);
        assert!(!pipeline.needs_response(b, a));
        pipeline.set_response_enabled(a, b, true);
        assert!(pipeline.needs_response(a, b));
    }
}
