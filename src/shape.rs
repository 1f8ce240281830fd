//! Collision Shapes and Contact Geometry
//!
//! The engine's shapes are balls and cuboids. This module computes their
//! world-space bounds and the contact geometry between shape pairs and
//! between particles (spheres) and shapes.
//!
//! Sign conventions: the returned `normal` points from the second object
//! toward the first, and `separation` is negative while penetrating.

use crate::aabb::Aabb;
use crate::math::{Affine3A, Mat3, Quat, Vec3};

/// Sphere centred on its owner's position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ball {
    /// Sphere radius
    pub radius: f32,
}

impl Ball {
    /// World-space bounds around `position`.
    #[inline]
    pub fn bounds(&self, position: Vec3) -> Aabb {
        Aabb::from_center_half_extents(position, Vec3::splat(self.radius))
    }

    /// Solid-sphere inertia tensor for the given mass.
    pub fn inertia_tensor(&self, mass: f32) -> Mat3 {
        Mat3::from_diagonal(Vec3::splat(0.4 * mass * self.radius * self.radius))
    }
}

/// Box described by its half-extents, centred on its owner's position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cuboid {
    /// Half of the box's edge length along each local axis
    pub half_extents: Vec3,
}

impl Cuboid {
    /// World-space bounds under a rigid transform.
    pub fn bounds(&self, transform: &Affine3A) -> Aabb {
        let rotation = Mat3::from(transform.matrix3);
        let h = self.half_extents;
        let world_half = Vec3::new(
            rotation.x_axis.x.abs() * h.x
                + rotation.y_axis.x.abs() * h.y
                + rotation.z_axis.x.abs() * h.z,
            rotation.x_axis.y.abs() * h.x
                + rotation.y_axis.y.abs() * h.y
                + rotation.z_axis.y.abs() * h.z,
            rotation.x_axis.z.abs() * h.x
                + rotation.y_axis.z.abs() * h.y
                + rotation.z_axis.z.abs() * h.z,
        );
        Aabb::from_center_half_extents(Vec3::from(transform.translation), world_half)
    }

    /// Solid-box inertia tensor for the given mass.
    pub fn inertia_tensor(&self, mass: f32) -> Mat3 {
        let h = self.half_extents;
        let third = mass / 3.0;
        Mat3::from_diagonal(Vec3::new(
            third * (h.y * h.y + h.z * h.z),
            third * (h.x * h.x + h.z * h.z),
            third * (h.x * h.x + h.y * h.y),
        ))
    }

}

/// Shape of a rigid or static body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    /// Sphere
    Ball(Ball),
    /// Box
    Cuboid(Cuboid),
}

impl Shape {
    /// World-space bounds under a rigid transform.
    pub fn bounds(&self, transform: &Affine3A) -> Aabb {
        match self {
            Shape::Ball(ball) => ball.bounds(Vec3::from(transform.translation)),
            Shape::Cuboid(cuboid) => cuboid.bounds(transform),
        }
    }

    /// Solid-shape inertia tensor for the given mass.
    pub fn inertia_tensor(&self, mass: f32) -> Mat3 {
        match self {
            Shape::Ball(ball) => ball.inertia_tensor(mass),
            Shape::Cuboid(cuboid) => cuboid.inertia_tensor(mass),
        }
    }
}

/// Contact geometry between two surfaces. Queries against particles and
/// static bodies ignore `position` (their relative contact positions are
/// zero); it matters whenever a rotating body takes part in the contact.
#[derive(Clone, Copy, Debug)]
pub struct ShapeContact {
    /// Unit direction from the second object toward the first
    pub normal: Vec3,
    /// Signed surface distance, negative while penetrating
    pub separation: f32,
    /// World-space contact point
    pub position: Vec3,
}

/// Sphere-versus-sphere contact. When the centres coincide the normal
/// degenerates to `+X` and the separation to the full contact distance.
pub fn particle_ball_contact(
    particle_position: Vec3,
    particle_radius: f32,
    ball: &Ball,
    ball_position: Vec3,
    margin: f32,
) -> Option<ShapeContact> {
    let displacement = particle_position - ball_position;
    let distance_squared = displacement.length_squared();
    let contact_distance = particle_radius + ball.radius + margin;
    if distance_squared >= contact_distance * contact_distance {
        return None;
    }
    if distance_squared == 0.0 {
        return Some(ShapeContact {
            normal: Vec3::X,
            separation: -(particle_radius + ball.radius),
            position: ball_position + Vec3::X * ball.radius,
        });
    }
    let distance = distance_squared.sqrt();
    let normal = displacement / distance;
    Some(ShapeContact {
        normal,
        separation: distance - (particle_radius + ball.radius),
        position: ball_position + normal * ball.radius,
    })
}

/// Sphere-versus-cuboid contact. A centre inside the box selects the nearest
/// face; outside, the clamped point on the box gives the contact direction.
pub fn particle_cuboid_contact(
    particle_position: Vec3,
    particle_radius: f32,
    cuboid: &Cuboid,
    transform: &Affine3A,
    inverse_transform: &Affine3A,
    margin: f32,
) -> Option<ShapeContact> {
    let h = cuboid.half_extents;
    let local_position = inverse_transform.transform_point3(particle_position);
    let clamped = local_position.clamp(-h, h);
    let displacement = local_position - clamped;
    let distance_squared = displacement.length_squared();
    if distance_squared == 0.0 {
        let face_distances = [
            clamped.x + h.x,
            h.x - clamped.x,
            clamped.y + h.y,
            h.y - clamped.y,
            clamped.z + h.z,
            h.z - clamped.z,
        ];
        let rotation = Mat3::from(transform.matrix3);
        let face_normals = [
            -rotation.x_axis,
            rotation.x_axis,
            -rotation.y_axis,
            rotation.y_axis,
            -rotation.z_axis,
            rotation.z_axis,
        ];
        let mut face = 0;
        for i in 1..6 {
            if face_distances[i] < face_distances[face] {
                face = i;
            }
        }
        return Some(ShapeContact {
            normal: face_normals[face],
            separation: -face_distances[face] - particle_radius,
            position: transform.transform_point3(clamped),
        });
    }
    let reach = particle_radius + margin;
    if distance_squared > reach * reach {
        return None;
    }
    let normal = transform.transform_vector3(displacement).normalize();
    Some(ShapeContact {
        normal,
        separation: distance_squared.sqrt() - particle_radius,
        position: transform.transform_point3(clamped),
    })
}

/// Sphere-versus-shape contact with a world contact point.
pub fn particle_shape_contact(
    particle_position: Vec3,
    particle_radius: f32,
    shape: &Shape,
    transform: &Affine3A,
    inverse_transform: &Affine3A,
    margin: f32,
) -> Option<ShapeContact> {
    match shape {
        Shape::Ball(ball) => particle_ball_contact(
            particle_position,
            particle_radius,
            ball,
            Vec3::from(transform.translation),
            margin,
        ),
        Shape::Cuboid(cuboid) => particle_cuboid_contact(
            particle_position,
            particle_radius,
            cuboid,
            transform,
            inverse_transform,
            margin,
        ),
    }
}

/// Shape-versus-shape contact with a world contact point. The normal points
/// from the second shape toward the first.
pub fn shape_shape_contact(
    first: &Shape,
    first_transform: &Affine3A,
    first_inverse: &Affine3A,
    second: &Shape,
    second_transform: &Affine3A,
    second_inverse: &Affine3A,
    margin: f32,
) -> Option<ShapeContact> {
    match (first, second) {
        (Shape::Ball(a), Shape::Ball(b)) => particle_ball_contact(
            Vec3::from(first_transform.translation),
            a.radius,
            b,
            Vec3::from(second_transform.translation),
            margin,
        ),
        (Shape::Ball(a), Shape::Cuboid(b)) => particle_cuboid_contact(
            Vec3::from(first_transform.translation),
            a.radius,
            b,
            second_transform,
            second_inverse,
            margin,
        ),
        (Shape::Cuboid(a), Shape::Ball(b)) => {
            let contact = particle_cuboid_contact(
                Vec3::from(second_transform.translation),
                b.radius,
                a,
                first_transform,
                first_inverse,
                margin,
            )?;
            Some(ShapeContact {
                normal: -contact.normal,
                separation: contact.separation,
                position: contact.position,
            })
        }
        (Shape::Cuboid(a), Shape::Cuboid(b)) => {
            cuboid_cuboid_contact(a, first_transform, b, second_transform, margin)
        }
    }
}

/// Cuboid-versus-cuboid contact via a 15-axis separating-axis test. The
/// contact point is the midpoint of each centre clamped into the other box,
/// which lands on the face centre for aligned resting contacts instead of a
/// torque-inducing corner.
fn cuboid_cuboid_contact(
    first: &Cuboid,
    first_transform: &Affine3A,
    second: &Cuboid,
    second_transform: &Affine3A,
    margin: f32,
) -> Option<ShapeContact> {
    let rotation_a = Mat3::from(first_transform.matrix3);
    let rotation_b = Mat3::from(second_transform.matrix3);
    let center_a = Vec3::from(first_transform.translation);
    let center_b = Vec3::from(second_transform.translation);
    let displacement = center_a - center_b;

    let axes_a = [rotation_a.x_axis, rotation_a.y_axis, rotation_a.z_axis];
    let axes_b = [rotation_b.x_axis, rotation_b.y_axis, rotation_b.z_axis];

    let projected_radius = |rotation: &Mat3, half_extents: Vec3, axis: Vec3| -> f32 {
        half_extents.x * rotation.x_axis.dot(axis).abs()
            + half_extents.y * rotation.y_axis.dot(axis).abs()
            + half_extents.z * rotation.z_axis.dot(axis).abs()
    };

    let mut best_separation = f32::NEG_INFINITY;
    let mut best_axis = Vec3::ZERO;
    let mut test_axis = |axis: Vec3| -> bool {
        let length_squared = axis.length_squared();
        // Parallel edge axes give a degenerate cross product; skip them.
        if length_squared < 1e-10 {
            return true;
        }
        let axis = axis / length_squared.sqrt();
        let distance = displacement.dot(axis);
        let separation = distance.abs()
            - projected_radius(&rotation_a, first.half_extents, axis)
            - projected_radius(&rotation_b, second.half_extents, axis);
        if separation >= margin {
            return false;
        }
        if separation > best_separation {
            best_separation = separation;
            best_axis = if distance >= 0.0 { axis } else { -axis };
        }
        true
    };

    for axis in axes_a {
        if !test_axis(axis) {
            return None;
        }
    }
    for axis in axes_b {
        if !test_axis(axis) {
            return None;
        }
    }
    for a in axes_a {
        for b in axes_b {
            if !test_axis(a.cross(b)) {
                return None;
            }
        }
    }

    let clamp_into = |point: Vec3, rotation: &Mat3, center: Vec3, half_extents: Vec3| -> Vec3 {
        let local = rotation.transpose() * (point - center);
        center + *rotation * local.clamp(-half_extents, half_extents)
    };
    let onto_b = clamp_into(center_a, &rotation_b, center_b, second.half_extents);
    let onto_a = clamp_into(center_b, &rotation_a, center_a, first.half_extents);
    Some(ShapeContact {
        normal: best_axis,
        separation: best_separation,
        position: 0.5 * (onto_a + onto_b),
    })
}

/// Convenience for tests and callers: transform of a position and
/// orientation, paired with its inverse.
pub fn transform_pair(position: Vec3, orientation: Quat) -> (Affine3A, Affine3A) {
    let transform = Affine3A::from_rotation_translation(orientation, position);
    (transform, transform.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::FRAC_PI_4;

    #[test]
    fn test_ball_ball_penetration() {
        let contact = particle_ball_contact(
            Vec3::new(0.8, 0.0, 0.0),
            0.5,
            &Ball { radius: 0.5 },
            Vec3::ZERO,
            0.0,
        )
        .expect("overlapping balls must touch");
        assert!((contact.normal - Vec3::X).length() < 1e-6);
        assert!((contact.separation - (-0.2)).abs() < 1e-6);
    }

    #[test]
    fn test_ball_ball_separated() {
        let contact = particle_ball_contact(
            Vec3::new(2.0, 0.0, 0.0),
            0.5,
            &Ball { radius: 0.5 },
            Vec3::ZERO,
            0.0,
        );
        assert!(contact.is_none());
    }

    #[test]
    fn test_ball_ball_coincident_centers() {
        let contact =
            particle_ball_contact(Vec3::ZERO, 0.4, &Ball { radius: 0.6 }, Vec3::ZERO, 0.0)
                .expect("coincident balls must touch");
        assert_eq!(contact.normal, Vec3::X);
        assert!((contact.separation - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_particle_outside_cuboid_face() {
        let cuboid = Cuboid {
            half_extents: Vec3::splat(1.0),
        };
        let (transform, inverse) = transform_pair(Vec3::ZERO, Quat::IDENTITY);
        let contact = particle_cuboid_contact(
            Vec3::new(0.0, 1.3, 0.0),
            0.5,
            &cuboid,
            &transform,
            &inverse,
            0.0,
        )
        .expect("sphere overlapping top face");
        assert!((contact.normal - Vec3::Y).length() < 1e-6);
        assert!((contact.separation - (-0.2)).abs() < 1e-5);
        assert!((contact.position - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_particle_inside_cuboid_selects_nearest_face() {
        let cuboid = Cuboid {
            half_extents: Vec3::new(1.0, 2.0, 3.0),
        };
        let (transform, inverse) = transform_pair(Vec3::ZERO, Quat::IDENTITY);
        let contact = particle_cuboid_contact(
            Vec3::new(0.7, 0.0, 0.0),
            0.1,
            &cuboid,
            &transform,
            &inverse,
            0.0,
        )
        .expect("centre inside box always contacts");
        // Nearest face is +X at distance 0.3.
        assert!((contact.normal - Vec3::X).length() < 1e-6);
        assert!((contact.separation - (-0.4)).abs() < 1e-5);
    }

    #[test]
    fn test_rotated_cuboid_bounds() {
        let cuboid = Cuboid {
            half_extents: Vec3::splat(1.0),
        };
        let transform = Affine3A::from_rotation_translation(
            Quat::from_rotation_z(FRAC_PI_4),
            Vec3::new(5.0, 0.0, 0.0),
        );
        let bounds = cuboid.bounds(&transform);
        let expected = 2f32.sqrt();
        assert!((bounds.max.x - (5.0 + expected)).abs() < 1e-4);
        assert!((bounds.min.y - (-expected)).abs() < 1e-4);
        assert!((bounds.max.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cuboid_cuboid_face_contact() {
        let a = Cuboid {
            half_extents: Vec3::splat(0.5),
        };
        let b = Cuboid {
            half_extents: Vec3::splat(0.5),
        };
        let (ta, ta_inv) = transform_pair(Vec3::new(0.0, 0.9, 0.0), Quat::IDENTITY);
        let (tb, tb_inv) = transform_pair(Vec3::ZERO, Quat::IDENTITY);
        let contact = shape_shape_contact(
            &Shape::Cuboid(a),
            &ta,
            &ta_inv,
            &Shape::Cuboid(b),
            &tb,
            &tb_inv,
            0.0,
        )
        .expect("stacked boxes penetrate by 0.1");
        assert!((contact.normal - Vec3::Y).length() < 1e-5);
        assert!((contact.separation - (-0.1)).abs() < 1e-5);
        // Contact point sits on the shared face centre, between the two
        // overlapping faces.
        assert!((contact.position.y - 0.45).abs() < 1e-4);
        assert!(contact.position.x.abs() < 1e-5 && contact.position.z.abs() < 1e-5);
    }

    #[test]
    fn test_cuboid_cuboid_separated() {
        let a = Cuboid {
            half_extents: Vec3::splat(0.5),
        };
        let (ta, ta_inv) = transform_pair(Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        let (tb, tb_inv) = transform_pair(Vec3::ZERO, Quat::IDENTITY);
        assert!(shape_shape_contact(
            &Shape::Cuboid(a),
            &ta,
            &ta_inv,
            &Shape::Cuboid(a),
            &tb,
            &tb_inv,
            0.0,
        )
        .is_none());
    }

    #[test]
    fn test_cuboid_ball_normal_flips() {
        let cuboid = Shape::Cuboid(Cuboid {
            half_extents: Vec3::splat(1.0),
        });
        let ball = Shape::Ball(Ball { radius: 0.5 });
        let (ta, ta_inv) = transform_pair(Vec3::ZERO, Quat::IDENTITY);
        let (tb, tb_inv) = transform_pair(Vec3::new(0.0, 1.3, 0.0), Quat::IDENTITY);
        let contact =
            shape_shape_contact(&cuboid, &ta, &ta_inv, &ball, &tb, &tb_inv, 0.0)
                .expect("ball resting on box");
        // Normal points from the ball (second) toward the box (first).
        assert!((contact.normal - (-Vec3::Y)).length() < 1e-6);
    }

    #[test]
    fn test_inertia_tensors() {
        let ball = Ball { radius: 2.0 };
        let i = ball.inertia_tensor(5.0);
        assert!((i.x_axis.x - 8.0).abs() < 1e-5);

        let cuboid = Cuboid {
            half_extents: Vec3::new(0.5, 0.5, 0.5),
        };
        // Unit cube of mass 12: I = 12/12 * (1 + 1) = 2 per axis with full
        // extents, i.e. m/3 * (hy² + hz²) = 4 * 0.5 = 2.
        let i = cuboid.inertia_tensor(12.0);
        assert!((i.y_axis.y - 2.0).abs() < 1e-5);
    }
}
