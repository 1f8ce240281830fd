//! Integration tests for granite-physics
//!
//! End-to-end scenarios driven through the public API only. Everything runs
//! on the inline executor so results do not depend on worker scheduling.

use granite_physics::math::{Mat3, Quat, Vec3};
use granite_physics::{
    Cuboid, InlineExecutor, Material, ParticleCreateInfo, RigidBodyCreateInfo, Shape,
    StaticBodyCreateInfo, World, WorldCreateInfo, WorldSimulateInfo,
};

// ============================================================================
// Helpers
// ============================================================================

const DT: f32 = 1.0 / 60.0;

fn world_with_gravity(gravity: Vec3) -> World {
    World::new(&WorldCreateInfo {
        gravitational_acceleration: gravity,
        ..WorldCreateInfo::default()
    })
}

fn run(world: &mut World, seconds: f32) {
    let pool = InlineExecutor;
    let info = WorldSimulateInfo::new(DT, &pool);
    let frames = (seconds / DT).round() as usize;
    for _ in 0..frames {
        world.simulate(&info).expect("simulate failed");
    }
}

fn ground(world: &mut World) {
    world
        .create_static_body(&StaticBodyCreateInfo {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            shape: Shape::Cuboid(Cuboid {
                half_extents: Vec3::new(50.0, 1.0, 50.0),
            }),
            material: Material::default(),
            filter: Default::default(),
        })
        .expect("create ground");
}

fn unit_box_at(world: &mut World, y: f32) -> granite_physics::RigidBodyHandle {
    let shape = Cuboid {
        half_extents: Vec3::splat(0.5),
    };
    world
        .create_rigid_body(&RigidBodyCreateInfo {
            position: Vec3::new(0.0, y, 0.0),
            velocity: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
            inertia_tensor: shape.inertia_tensor(1.0),
            shape: Shape::Cuboid(shape),
            material: Material::default(),
            filter: Default::default(),
            motion_callback: None,
        })
        .expect("create box")
}

// ============================================================================
// Test 1 — Sphere drop onto static ground
// ============================================================================

/// A unit-mass sphere dropped from y=10 must come to rest on the ground
/// slab (top face at y=1) with its centre one radius above it, then fall
/// asleep.
#[test]
fn test_sphere_drop_rests_on_ground() {
    let mut world = world_with_gravity(Vec3::new(0.0, -10.0, 0.0));
    ground(&mut world);
    let particle = world
        .create_particle(&ParticleCreateInfo {
            position: Vec3::new(0.0, 10.0, 0.0),
            radius: 0.5,
            mass: 1.0,
            ..Default::default()
        })
        .expect("create particle");

    run(&mut world, 2.0);
    let position = world.particle_position(particle);
    let velocity = world.particle_velocity(particle);
    assert!(
        (1.4..=1.6).contains(&position.y),
        "resting height {} outside [1.4, 1.6]",
        position.y
    );
    assert!(velocity.length() < 0.2, "still moving at {:?}", velocity);

    run(&mut world, 1.0);
    assert!(
        !world.particle_is_awake(particle),
        "settled particle should sleep, waking motion {}",
        world.particle_waking_motion(particle)
    );

    // Sleep idempotence: further frames must not move a sleeping island.
    let before = world.particle_position(particle);
    run(&mut world, 0.5);
    assert_eq!(before, world.particle_position(particle));
}

// ============================================================================
// Test 2 — Stack of three boxes
// ============================================================================

/// Three unit boxes dropped from y=1,3,5 settle into a stack resting on the
/// ground and fall asleep.
#[test]
fn test_box_stack_settles_and_sleeps() {
    let mut world = world_with_gravity(Vec3::new(0.0, -10.0, 0.0));
    ground(&mut world);
    let boxes = [
        unit_box_at(&mut world, 1.0),
        unit_box_at(&mut world, 3.0),
        unit_box_at(&mut world, 5.0),
    ];

    run(&mut world, 2.0);
    let expected = [1.5, 2.5, 3.5];
    for (handle, expected_y) in boxes.iter().zip(expected) {
        let position = world.rigid_body_position(*handle);
        assert!(
            (position.y - expected_y).abs() <= 0.1,
            "box expected near y={}, found {}",
            expected_y,
            position.y
        );
        assert!(
            position.x.abs() < 0.1 && position.z.abs() < 0.1,
            "box drifted laterally to {:?}",
            position
        );
    }

    run(&mut world, 1.5);
    for handle in boxes {
        assert!(
            !world.rigid_body_is_awake(handle),
            "settled box should sleep"
        );
    }
}

// ============================================================================
// Test 3 — Elastic head-on collision
// ============================================================================

/// Two equal particles colliding head-on with restitution 1 exchange their
/// velocities up to the global damping loss.
#[test]
fn test_head_on_collision_is_elastic() {
    let mut world = world_with_gravity(Vec3::ZERO);
    let bouncy = Material::new(0.0, 0.0, 1.0);
    let a = world
        .create_particle(&ParticleCreateInfo {
            position: Vec3::new(-1.0, 0.0, 0.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            radius: 0.4,
            material: bouncy,
            ..Default::default()
        })
        .unwrap();
    let b = world
        .create_particle(&ParticleCreateInfo {
            position: Vec3::new(1.0, 0.0, 0.0),
            velocity: Vec3::new(-1.0, 0.0, 0.0),
            radius: 0.4,
            material: bouncy,
            ..Default::default()
        })
        .unwrap();

    run(&mut world, 2.0);
    let velocity_a = world.particle_velocity(a);
    let velocity_b = world.particle_velocity(b);
    assert!(
        (velocity_a - Vec3::new(-1.0, 0.0, 0.0)).length() < 0.05,
        "particle A should have reversed, velocity {:?}",
        velocity_a
    );
    assert!(
        (velocity_b - Vec3::new(1.0, 0.0, 0.0)).length() < 0.05,
        "particle B should have reversed, velocity {:?}",
        velocity_b
    );
    // They moved through the collision point and apart again.
    assert!(world.particle_position(a).x < world.particle_position(b).x);
}

// ============================================================================
// Test 4 — Colour count on a particle chain
// ============================================================================

/// Ten particles in a line, each touching only its neighbours, produce nine
/// pairs in one island coloured with exactly two colours.
#[test]
fn test_chain_uses_two_colors() {
    let mut world = world_with_gravity(Vec3::ZERO);
    for i in 0..10 {
        world
            .create_particle(&ParticleCreateInfo {
                position: Vec3::new(i as f32 * 0.9, 0.0, 0.0),
                radius: 0.5,
                material: Material::FRICTIONLESS,
                ..Default::default()
            })
            .unwrap();
    }
    let pool = InlineExecutor;
    world
        .simulate(&WorldSimulateInfo::new(DT, &pool))
        .unwrap();

    let stats = world.last_step_stats();
    assert_eq!(stats.neighbor_pairs, 9, "chain of 10 touches 9 times");
    assert_eq!(stats.islands, 1);
    assert_eq!(stats.awake_islands, 1);
    assert_eq!(stats.colors, 2, "a path graph edge-colours with 2 colours");
}

// ============================================================================
// Test 5 — Waking a sleeping island
// ============================================================================

/// Striking a sleeping stack with a fast particle wakes every body in the
/// island within one frame.
#[test]
fn test_impact_wakes_sleeping_island() {
    let mut world = world_with_gravity(Vec3::new(0.0, -10.0, 0.0));
    ground(&mut world);
    let boxes = [
        unit_box_at(&mut world, 1.5),
        unit_box_at(&mut world, 2.5),
    ];
    run(&mut world, 3.0);
    for handle in boxes {
        assert!(
            !world.rigid_body_is_awake(handle),
            "stack must be asleep before the impact"
        );
    }

    // Overlaps the top box's broadphase bounds, moving downward fast.
    world
        .create_particle(&ParticleCreateInfo {
            position: Vec3::new(0.0, 3.4, 0.0),
            velocity: Vec3::new(0.0, -5.0, 0.0),
            radius: 0.5,
            ..Default::default()
        })
        .unwrap();
    let pool = InlineExecutor;
    world
        .simulate(&WorldSimulateInfo::new(DT, &pool))
        .unwrap();
    for handle in boxes {
        assert!(
            world.rigid_body_is_awake(handle),
            "impact must wake the whole island"
        );
    }
}

// ============================================================================
// Test 6 — Handle reuse
// ============================================================================

/// Destroying half of a thousand particles and creating five hundred more
/// never hands out a handle that collides with a live one.
#[test]
fn test_handle_reuse_keeps_live_handles_distinct() {
    let mut world = World::new(&WorldCreateInfo {
        max_particles: 1500,
        max_aabb_tree_leaf_nodes: 2048,
        max_aabb_tree_internal_nodes: 2048,
        ..WorldCreateInfo::default()
    });
    let spread = |i: usize| Vec3::new((i % 40) as f32 * 3.0, (i / 40) as f32 * 3.0, 0.0);
    let mut handles = Vec::new();
    for i in 0..1000 {
        handles.push(
            world
                .create_particle(&ParticleCreateInfo {
                    position: spread(i),
                    ..Default::default()
                })
                .unwrap(),
        );
    }
    let mut live: Vec<_> = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        if i % 2 == 0 {
            world.destroy_particle(handle);
        } else {
            live.push(handle);
        }
    }
    for i in 0..500 {
        let fresh = world
            .create_particle(&ParticleCreateInfo {
                position: spread(1000 + i),
                ..Default::default()
            })
            .unwrap();
        assert!(
            !live.contains(&fresh),
            "fresh handle collides with a live one"
        );
        live.push(fresh);
    }
}

// ============================================================================
// Test 7 — Quaternion normality under tumbling
// ============================================================================

/// A freely tumbling body's orientation stays a unit quaternion through
/// hundreds of substeps.
#[test]
fn test_tumbling_orientation_stays_normalized() {
    let mut world = world_with_gravity(Vec3::ZERO);
    let shape = Cuboid {
        half_extents: Vec3::new(0.5, 0.2, 0.8),
    };
    let body = world
        .create_rigid_body(&RigidBodyCreateInfo {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Quat::from_rotation_y(0.7),
            angular_velocity: Vec3::new(3.0, 5.0, -2.0),
            mass: 2.0,
            inertia_tensor: shape.inertia_tensor(2.0),
            shape: Shape::Cuboid(shape),
            material: Material::default(),
            filter: Default::default(),
            motion_callback: None,
        })
        .unwrap();

    let pool = InlineExecutor;
    let info = WorldSimulateInfo::new(DT, &pool);
    for _ in 0..60 {
        world.simulate(&info).unwrap();
        let q = world.rigid_body_orientation(body);
        assert!(
            (q.length() - 1.0).abs() < 1e-4,
            "orientation drifted off the unit sphere: |q| = {}",
            q.length()
        );
    }
    assert!(world.rigid_body_is_awake(body), "tumbling body stays awake");
}

// ============================================================================
// Test 8 — Dynamic friction slows sliding
// ============================================================================

/// A sphere sliding over the ground decelerates under dynamic friction and
/// keeps its speed (up to damping) when frictionless.
#[test]
fn test_dynamic_friction_decelerates_sliding() {
    let slide_speed = |material: Material| -> f32 {
        let mut world = world_with_gravity(Vec3::new(0.0, -10.0, 0.0));
        world
            .create_static_body(&StaticBodyCreateInfo {
                position: Vec3::ZERO,
                orientation: Quat::IDENTITY,
                shape: Shape::Cuboid(Cuboid {
                    half_extents: Vec3::new(200.0, 1.0, 200.0),
                }),
                material,
                filter: Default::default(),
            })
            .unwrap();
        let particle = world
            .create_particle(&ParticleCreateInfo {
                position: Vec3::new(0.0, 1.5, 0.0),
                velocity: Vec3::new(5.0, 0.0, 0.0),
                radius: 0.5,
                material,
                ..Default::default()
            })
            .unwrap();
        run(&mut world, 1.0);
        world.particle_velocity(particle).x
    };

    let rough = slide_speed(Material::new(0.8, 0.6, 0.0));
    let smooth = slide_speed(Material::FRICTIONLESS);
    assert!(
        rough < smooth - 1.0,
        "friction should brake the slide: rough {} vs smooth {}",
        rough,
        smooth
    );
    assert!(smooth > 4.0, "frictionless slide keeps most of its speed");
}

// ============================================================================
// Test 9 — Motion callbacks fire once per frame
// ============================================================================

mod callbacks {
    use super::*;
    use granite_physics::{ParticleHandle, ParticleMotionCallback};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingCallback {
        calls: AtomicU32,
    }

    impl ParticleMotionCallback for CountingCallback {
        fn on_particle_motion(&self, world: &World, particle: ParticleHandle) {
            // Queries are allowed during dispatch.
            let _ = world.particle_position(particle);
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_motion_callback_dispatch() {
        let mut world = world_with_gravity(Vec3::new(0.0, -10.0, 0.0));
        let callback = Arc::new(CountingCallback {
            calls: AtomicU32::new(0),
        });
        world
            .create_particle(&ParticleCreateInfo {
                position: Vec3::new(0.0, 5.0, 0.0),
                motion_callback: Some(callback.clone()),
                ..Default::default()
            })
            .unwrap();
        // A second particle without a callback must not be reported.
        world
            .create_particle(&ParticleCreateInfo {
                position: Vec3::new(10.0, 5.0, 0.0),
                ..Default::default()
            })
            .unwrap();

        let pool = InlineExecutor;
        let info = WorldSimulateInfo::new(DT, &pool);
        for _ in 0..5 {
            world.simulate(&info).unwrap();
        }
        assert_eq!(callback.calls.load(Ordering::Relaxed), 5);
    }
}

// ============================================================================
// Test 10 — Mixed pair kinds in one island
// ============================================================================

/// A particle resting on a rigid box resting on the ground exercises the
/// particle-rigid, rigid-static and (indirectly) colouring paths together.
#[test]
fn test_particle_on_box_on_ground() {
    let mut world = world_with_gravity(Vec3::new(0.0, -10.0, 0.0));
    ground(&mut world);
    let box_handle = unit_box_at(&mut world, 1.6);
    let particle = world
        .create_particle(&ParticleCreateInfo {
            position: Vec3::new(0.0, 2.8, 0.0),
            radius: 0.3,
            mass: 0.5,
            ..Default::default()
        })
        .unwrap();

    run(&mut world, 2.5);
    let box_position = world.rigid_body_position(box_handle);
    let particle_position = world.particle_position(particle);
    assert!(
        (box_position.y - 1.5).abs() < 0.1,
        "box should rest on the ground, y = {}",
        box_position.y
    );
    assert!(
        (particle_position.y - 2.3).abs() < 0.15,
        "particle should rest on the box, y = {}",
        particle_position.y
    );
    // Orientation must stay sane while supporting the particle.
    let q = world.rigid_body_orientation(box_handle);
    assert!((q.length() - 1.0).abs() < 1e-4);
    let _ = Mat3::from_quat(q);
}
