//! Math Seam
//!
//! The engine treats vector/quaternion/matrix primitives as an external
//! collaborator and uses `glam` for them. This module re-exports the types
//! the public API speaks and keeps the handful of derived operations the
//! solver needs in one place.

pub use glam::{Affine3A, Mat3, Quat, Vec3};

/// Component of `v` perpendicular to the unit vector `n`.
#[inline]
pub fn perp_unit(v: Vec3, n: Vec3) -> Vec3 {
    v - n * v.dot(n)
}

/// Rigid (rotation + translation) 3x4 transform.
#[inline]
pub fn rigid_transform(position: Vec3, orientation: Quat) -> Affine3A {
    Affine3A::from_rotation_translation(orientation, position)
}

/// Body-frame inverse inertia tensor expressed in world space: `R I⁻¹ Rᵀ`.
#[inline]
pub fn world_inverse_inertia(inverse_inertia: Mat3, orientation: Quat) -> Mat3 {
    let rotation = Mat3::from_quat(orientation);
    rotation * inverse_inertia * rotation.transpose()
}

/// First-order quaternion integration: `normalize(q + ½·h·(0, ω)·q)`.
#[inline]
pub fn integrate_orientation(orientation: Quat, angular_velocity: Vec3, delta_time: f32) -> Quat {
    let w = angular_velocity * (0.5 * delta_time);
    (orientation + Quat::from_xyzw(w.x, w.y, w.z, 0.0) * orientation).normalize()
}

/// Apply a small rotation vector to a quaternion: `normalize(q + ½·(0, Δω)·q)`.
#[inline]
pub fn apply_orientation_delta(orientation: Quat, delta: Vec3) -> Quat {
    (orientation + Quat::from_xyzw(delta.x, delta.y, delta.z, 0.0) * orientation * 0.5).normalize()
}

/// Angular velocity recovered from an orientation change over `1/h_inv`
/// seconds, taking the shortest arc: `ω = ±2·(q·q̄_prev).xyz·h_inv`.
#[inline]
pub fn derive_angular_velocity(orientation: Quat, previous: Quat, inverse_delta_time: f32) -> Vec3 {
    let delta = orientation * previous.conjugate();
    let w = delta.xyz() * (2.0 * inverse_delta_time);
    if delta.w >= 0.0 {
        w
    } else {
        -w
    }
}
