//! Minimal usage demo: a few spheres and a box dropped onto a ground slab.
//!
//! Run with: `cargo run --example falling_bodies`

use granite_physics::math::{Quat, Vec3};
use granite_physics::prelude::*;

fn main() {
    let mut world = World::new(&WorldCreateInfo {
        gravitational_acceleration: Vec3::new(0.0, -9.81, 0.0),
        ..WorldCreateInfo::default()
    });

    world
        .create_static_body(&StaticBodyCreateInfo {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            shape: Shape::Cuboid(Cuboid {
                half_extents: Vec3::new(25.0, 1.0, 25.0),
            }),
            material: Material::default(),
            filter: Default::default(),
        })
        .expect("create ground");

    let mut particles = Vec::new();
    for i in 0..5 {
        let particle = world
            .create_particle(&ParticleCreateInfo {
                position: Vec3::new(i as f32 * 1.2 - 2.4, 6.0 + i as f32, 0.0),
                radius: 0.5,
                ..Default::default()
            })
            .expect("create particle");
        particles.push(particle);
    }

    let cuboid = Cuboid {
        half_extents: Vec3::splat(0.5),
    };
    let body = world
        .create_rigid_body(&RigidBodyCreateInfo {
            position: Vec3::new(0.0, 12.0, 1.5),
            velocity: Vec3::ZERO,
            orientation: Quat::from_rotation_z(0.4),
            angular_velocity: Vec3::new(0.0, 2.0, 0.0),
            mass: 1.0,
            inertia_tensor: cuboid.inertia_tensor(1.0),
            shape: Shape::Cuboid(cuboid),
            material: Material::default(),
            filter: Default::default(),
            motion_callback: None,
        })
        .expect("create box");

    let pool = InlineExecutor;
    let info = WorldSimulateInfo::new(1.0 / 60.0, &pool);
    for frame in 0..240 {
        world.simulate(&info).expect("simulate");
        if frame % 60 == 59 {
            let seconds = (frame + 1) / 60;
            println!("t = {}s", seconds);
            for (index, particle) in particles.iter().enumerate() {
                let position = world.particle_position(*particle);
                println!(
                    "  sphere {}: y = {:6.3}  awake = {}",
                    index,
                    position.y,
                    world.particle_is_awake(*particle)
                );
            }
            let position = world.rigid_body_position(body);
            println!(
                "  box:      y = {:6.3}  awake = {}",
                position.y,
                world.rigid_body_is_awake(body)
            );
        }
    }
}
