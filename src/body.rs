//! Object State and Creation Parameters
//!
//! Per-object state records for the three storages, the public creation
//! parameter structs, and the motion-callback receiver traits invoked after
//! every `simulate`.

use std::sync::Arc;

use crate::aabb_tree::LeafId;
use crate::filter::CollisionFilter;
use crate::material::Material;
use crate::math::{Affine3A, Mat3, Quat, Vec3};
use crate::shape::Shape;
use crate::storage::{ParticleHandle, RigidBodyHandle};
use crate::world::World;

/// Receiver notified once per frame with a particle's new state.
///
/// Callbacks may query the world but must not create or destroy objects
/// during the dispatch; the shared borrow enforces this.
pub trait ParticleMotionCallback: Send + Sync {
    /// Called after all substeps of a `simulate` call.
    fn on_particle_motion(&self, world: &World, particle: ParticleHandle);
}

/// Receiver notified once per frame with a rigid body's new state.
pub trait RigidBodyMotionCallback: Send + Sync {
    /// Called after all substeps of a `simulate` call.
    fn on_rigid_body_motion(&self, world: &World, rigid_body: RigidBodyHandle);
}

/// Parameters of [`World::create_particle`].
#[derive(Clone)]
pub struct ParticleCreateInfo {
    /// Initial position
    pub position: Vec3,
    /// Initial velocity
    pub velocity: Vec3,
    /// Sphere radius
    pub radius: f32,
    /// Mass; the stored quantity is its inverse
    pub mass: f32,
    /// Surface response coefficients
    pub material: Material,
    /// Collision bitmasks
    pub filter: CollisionFilter,
    /// Optional per-frame motion receiver
    pub motion_callback: Option<Arc<dyn ParticleMotionCallback>>,
}

impl Default for ParticleCreateInfo {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            radius: 0.5,
            mass: 1.0,
            material: Material::default(),
            filter: CollisionFilter::default(),
            motion_callback: None,
        }
    }
}

/// Parameters of [`World::create_rigid_body`].
#[derive(Clone)]
pub struct RigidBodyCreateInfo {
    /// Initial position
    pub position: Vec3,
    /// Initial velocity
    pub velocity: Vec3,
    /// Initial orientation (unit quaternion)
    pub orientation: Quat,
    /// Initial angular velocity
    pub angular_velocity: Vec3,
    /// Mass; the stored quantity is its inverse
    pub mass: f32,
    /// Body-frame inertia tensor; the stored quantity is its inverse.
    /// [`Shape::inertia_tensor`] produces solid-shape tensors.
    pub inertia_tensor: Mat3,
    /// Collision shape
    pub shape: Shape,
    /// Surface response coefficients
    pub material: Material,
    /// Collision bitmasks
    pub filter: CollisionFilter,
    /// Optional per-frame motion receiver
    pub motion_callback: Option<Arc<dyn RigidBodyMotionCallback>>,
}

/// Parameters of [`World::create_static_body`].
#[derive(Clone)]
pub struct StaticBodyCreateInfo {
    /// World position
    pub position: Vec3,
    /// World orientation (unit quaternion)
    pub orientation: Quat,
    /// Collision shape
    pub shape: Shape,
    /// Surface response coefficients
    pub material: Material,
    /// Collision bitmasks
    pub filter: CollisionFilter,
}

pub(crate) struct ParticleData {
    pub leaf: LeafId,
    pub neighbor_pairs_begin: u32,
    pub neighbor_count: u16,
    pub marked: bool,
    pub awake: bool,
    pub radius: f32,
    pub inverse_mass: f32,
    pub material: Material,
    pub filter: CollisionFilter,
    pub previous_position: Vec3,
    pub position: Vec3,
    pub velocity: Vec3,
    pub waking_motion: f32,
    pub motion_callback: Option<Arc<dyn ParticleMotionCallback>>,
}

pub(crate) struct RigidBodyData {
    pub leaf: LeafId,
    pub neighbor_pairs_begin: u32,
    pub neighbor_count: u16,
    pub marked: bool,
    pub awake: bool,
    pub shape: Shape,
    pub inverse_mass: f32,
    pub inverse_inertia_tensor: Mat3,
    pub material: Material,
    pub filter: CollisionFilter,
    pub previous_position: Vec3,
    pub position: Vec3,
    pub velocity: Vec3,
    pub previous_orientation: Quat,
    pub orientation: Quat,
    pub angular_velocity: Vec3,
    pub waking_motion: f32,
    pub motion_callback: Option<Arc<dyn RigidBodyMotionCallback>>,
}

pub(crate) struct StaticBodyData {
    pub leaf: LeafId,
    pub shape: Shape,
    pub material: Material,
    pub filter: CollisionFilter,
    pub transform: Affine3A,
    pub inverse_transform: Affine3A,
}
