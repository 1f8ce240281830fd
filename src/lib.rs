//! granite-physics: XPBD Rigid-Body Dynamics
//!
//! A 3D physics engine for particles (spheres), dynamic rigid bodies and
//! immovable static bodies under gravity, built around an eXtended
//! Position-Based Dynamics substepping solver.
//!
//! # Features
//!
//! - **XPBD Solver**: substepped positional + velocity passes with
//!   rotational inertia, static/dynamic friction and restitution
//! - **Graph-Coloured Parallelism**: contacts are partitioned into colour
//!   classes that share no object, so chunks of one colour solve
//!   concurrently without locks
//! - **Dynamic AABB Tree**: bulk-rebuilt broadphase with motion-inflated
//!   bounds and unordered overlapping-pair enumeration
//! - **Islands & Sleeping**: connected components of the contact graph
//!   sleep as a unit once their smoothed motion settles
//! - **External Thread Pool**: the solver fans out through a caller-supplied
//!   pool and joins on a countdown latch
//!
//! # Example
//!
//! ```rust
//! use granite_physics::{
//!     InlineExecutor, ParticleCreateInfo, World, WorldCreateInfo, WorldSimulateInfo,
//! };
//! use granite_physics::math::Vec3;
//!
//! let mut world = World::new(&WorldCreateInfo::default());
//! let particle = world
//!     .create_particle(&ParticleCreateInfo {
//!         position: Vec3::new(0.0, 10.0, 0.0),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//! let pool = InlineExecutor;
//! let info = WorldSimulateInfo::new(1.0 / 60.0, &pool);
//! for _ in 0..60 {
//!     world.simulate(&info).unwrap();
//! }
//! assert!(world.particle_position(particle).y < 10.0);
//! ```
//!
//! # Modules
//!
//! - [`math`]: re-exported `glam` primitives plus solver helpers
//! - [`aabb`]: axis-aligned bounding boxes
//! - [`arena`]: fixed-capacity frame-scratch containers
//! - [`shape`]: ball/cuboid shapes, bounds and contact geometry
//! - [`aabb_tree`]: bulk-rebuilt broadphase BVH
//! - [`neighbor`]: contact candidates, islands and colour groups
//! - [`sleep`]: waking-motion filter configuration
//! - [`filter`]: layer/mask collision filtering
//! - [`material`]: friction/restitution coefficients
//! - [`parallel`]: thread-pool capability, tasks and the countdown latch
//! - [`error`]: the unified [`PhysicsError`] type
//! - [`profiling`]: per-frame statistics counters
//! - [`world`]: object lifecycle and the `simulate` pipeline
//!
//! # Scope
//!
//! Rendering, windowing, scene management and asset loading are external
//! collaborators, as is the worker pool. Continuous collision detection,
//! joints, soft bodies and fluids are out of scope.

#![warn(missing_docs)]

pub mod aabb;
pub mod aabb_tree;
pub mod arena;
mod body;
pub mod error;
pub mod filter;
pub mod material;
pub mod math;
pub mod neighbor;
pub mod parallel;
pub mod profiling;
pub mod shape;
pub mod sleep;
mod solver;
mod storage;
pub mod world;

pub use aabb::Aabb;
pub use aabb_tree::{AabbTree, AabbTreePayload, LeafId};
pub use body::{
    ParticleCreateInfo, ParticleMotionCallback, RigidBodyCreateInfo, RigidBodyMotionCallback,
    StaticBodyCreateInfo,
};
pub use error::PhysicsError;
pub use filter::CollisionFilter;
pub use material::Material;
pub use neighbor::{DynamicObject, NeighborPair, PairKind, MAX_COLORS};
pub use parallel::{InlineExecutor, Latch, Task, TaskRef, ThreadPool};
pub use profiling::StepStats;
pub use shape::{Ball, Cuboid, Shape, ShapeContact};
pub use sleep::SleepConfig;
pub use storage::{ObjectHandle, ParticleHandle, RigidBodyHandle, StaticBodyHandle};
pub use world::{World, WorldCreateInfo, WorldSimulateInfo};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aabb::Aabb;
    pub use crate::body::{
        ParticleCreateInfo, ParticleMotionCallback, RigidBodyCreateInfo, RigidBodyMotionCallback,
        StaticBodyCreateInfo,
    };
    pub use crate::error::PhysicsError;
    pub use crate::filter::CollisionFilter;
    pub use crate::material::Material;
    pub use crate::math::{Mat3, Quat, Vec3};
    pub use crate::parallel::{InlineExecutor, ThreadPool};
    pub use crate::shape::{Ball, Cuboid, Shape};
    pub use crate::sleep::SleepConfig;
    pub use crate::storage::{ParticleHandle, RigidBodyHandle, StaticBodyHandle};
    pub use crate::world::{World, WorldCreateInfo, WorldSimulateInfo};
}

#[cfg(test)]
mod compile_smoke_tests {
    //! Verify that core types from the prelude are accessible. These tests
    //! catch accidental breakage of public re-exports.

    use super::prelude::*;

    #[test]
    fn test_prelude_types_accessible() {
        let _ = WorldCreateInfo::default();
        let _ = SleepConfig::default();
        let _ = CollisionFilter::default();
        let _ = Material::default();
        let _ = Shape::Ball(Ball { radius: 1.0 });
    }

    #[test]
    fn test_error_type_accessible() {
        let e = PhysicsError::CapacityExceeded {
            resource: "particles",
            limit: 0,
        };
        let _ = format!("{}", e);
    }
}
