//! Physics World
//!
//! Owns the three object storages, the broadphase tree and every per-frame
//! scratch structure, and drives the frame pipeline:
//!
//! 1. rebuild the AABB tree with motion-inflated leaf bounds,
//! 2. enumerate overlapping leaves into the neighbor-pair table,
//! 3. flood-fill pairs into islands and decide each island's sleep state,
//! 4. greedily colour the awake islands' pairs,
//! 5. run the substepped XPBD position/velocity passes colour by colour,
//! 6. report motion through the registered callbacks.
//!
//! All scratch capacity is reserved in [`World::new`]; `simulate` performs
//! no allocation.

use std::sync::Arc;

use crate::aabb::Aabb;
use crate::aabb_tree::{AabbTree, AabbTreePayload};
use crate::arena::{BitSet, FixedQueue, FixedVec};
use crate::body::{
    ParticleCreateInfo, ParticleData, ParticleMotionCallback, RigidBodyCreateInfo, RigidBodyData,
    RigidBodyMotionCallback, StaticBodyCreateInfo, StaticBodyData,
};
use crate::error::PhysicsError;
use crate::filter::CollisionFilter;
use crate::math::{
    derive_angular_velocity, integrate_orientation, rigid_transform, Quat, Vec3,
};
use crate::neighbor::{
    ColorGroupStorage, DynamicObject, NeighborGroupStorage, NeighborPair, PairKind, COLOR_MARKED,
    COLOR_UNMARKED, MAX_COLORS,
};
use crate::parallel::{TaskRef, Task, ThreadPool};
use crate::profiling::StepStats;
use crate::sleep::SleepConfig;
use crate::solver::{
    Contact, PositionSolveTask, SolveChunk, SolveState, VelocitySolveTask, MAX_SOLVE_CHUNK_SIZE,
};
use crate::storage::{
    ObjectHandle, ObjectStorage, ParticleHandle, RigidBodyHandle, StaticBodyHandle,
};

/// Capacities and global parameters of a [`World`].
#[derive(Clone, Copy, Debug)]
pub struct WorldCreateInfo {
    /// Maximum broadphase leaves; must cover every live object
    pub max_aabb_tree_leaf_nodes: usize,
    /// Maximum broadphase internal nodes; one fewer than the leaves suffices
    pub max_aabb_tree_internal_nodes: usize,
    /// Maximum live particles
    pub max_particles: usize,
    /// Maximum live rigid bodies
    pub max_rigid_bodies: usize,
    /// Maximum live static bodies
    pub max_static_bodies: usize,
    /// Maximum broadphase pairs per frame
    pub max_neighbor_pairs: usize,
    /// Maximum islands per frame
    pub max_neighbor_groups: usize,
    /// Gravitational acceleration applied to every dynamic object
    pub gravitational_acceleration: Vec3,
    /// Sleep thresholds and smoothing
    pub sleep: SleepConfig,
}

impl Default for WorldCreateInfo {
    fn default() -> Self {
        Self {
            max_aabb_tree_leaf_nodes: 12288,
            max_aabb_tree_internal_nodes: 12288,
            max_particles: 8192,
            max_rigid_bodies: 2048,
            max_static_bodies: 2048,
            max_neighbor_pairs: 65536,
            max_neighbor_groups: 10240,
            gravitational_acceleration: Vec3::new(0.0, -9.81, 0.0),
            sleep: SleepConfig::default(),
        }
    }
}

/// Per-call parameters of [`World::simulate`].
pub struct WorldSimulateInfo<'a> {
    /// Frame duration in seconds
    pub delta_time: f32,
    /// Number of substeps the frame is sliced into
    pub substep_count: u32,
    /// Positional solve passes per substep
    pub position_iterations: u32,
    /// Velocity solve passes per substep
    pub velocity_iterations: u32,
    /// Extra separation below which contact geometry is still generated
    pub contact_margin: f32,
    /// Worker pool the solver fans out on
    pub thread_pool: &'a dyn ThreadPool,
}

impl<'a> WorldSimulateInfo<'a> {
    /// Defaults: 16 substeps, one position and one velocity pass each,
    /// no contact margin.
    pub fn new(delta_time: f32, thread_pool: &'a dyn ThreadPool) -> Self {
        Self {
            delta_time,
            substep_count: 16,
            position_iterations: 1,
            velocity_iterations: 1,
            contact_margin: 0.0,
            thread_pool,
        }
    }
}

/// A world of particles, rigid bodies and static bodies under gravity.
pub struct World {
    particles: ObjectStorage<ParticleHandle, ParticleData>,
    rigid_bodies: ObjectStorage<RigidBodyHandle, RigidBodyData>,
    static_bodies: ObjectStorage<StaticBodyHandle, StaticBodyData>,
    aabb_tree: AabbTree,
    neighbor_pairs: FixedVec<NeighborPair>,
    neighbor_pair_slots: FixedVec<u32>,
    neighbor_groups: NeighborGroupStorage,
    awake_group_indices: FixedVec<u32>,
    coloring_bits: BitSet,
    coloring_fringe: FixedQueue<u32>,
    color_groups: ColorGroupStorage,
    solve_contacts: FixedVec<Contact>,
    solve_chunks: FixedVec<SolveChunk>,
    position_tasks: FixedVec<PositionSolveTask>,
    velocity_tasks: FixedVec<VelocitySolveTask>,
    particle_callback_scratch: Vec<(ParticleHandle, Arc<dyn ParticleMotionCallback>)>,
    rigid_body_callback_scratch: Vec<(RigidBodyHandle, Arc<dyn RigidBodyMotionCallback>)>,
    gravity: Vec3,
    sleep: SleepConfig,
    stats: StepStats,
}

impl World {
    /// Create a world, reserving every capacity named in `create_info`.
    pub fn new(create_info: &WorldCreateInfo) -> Self {
        let max_pairs = create_info.max_neighbor_pairs;
        Self {
            particles: ObjectStorage::new(create_info.max_particles, "particles"),
            rigid_bodies: ObjectStorage::new(create_info.max_rigid_bodies, "rigid bodies"),
            static_bodies: ObjectStorage::new(create_info.max_static_bodies, "static bodies"),
            aabb_tree: AabbTree::new(
                create_info.max_aabb_tree_leaf_nodes,
                create_info.max_aabb_tree_internal_nodes,
            ),
            neighbor_pairs: FixedVec::new(max_pairs, "neighbor pairs"),
            neighbor_pair_slots: FixedVec::new(2 * max_pairs, "neighbor pair slots"),
            neighbor_groups: NeighborGroupStorage::new(
                create_info.max_particles + create_info.max_rigid_bodies,
                max_pairs,
                create_info.max_neighbor_groups,
            ),
            awake_group_indices: FixedVec::new(
                create_info.max_neighbor_groups,
                "awake neighbor groups",
            ),
            coloring_bits: BitSet::new(MAX_COLORS),
            coloring_fringe: FixedQueue::new(max_pairs, "coloring fringe"),
            color_groups: ColorGroupStorage::new(max_pairs),
            solve_contacts: FixedVec::new(max_pairs, "solve contacts"),
            solve_chunks: FixedVec::new(max_pairs, "solve chunks"),
            position_tasks: FixedVec::new(max_pairs, "position solve tasks"),
            velocity_tasks: FixedVec::new(max_pairs, "velocity solve tasks"),
            particle_callback_scratch: Vec::with_capacity(create_info.max_particles),
            rigid_body_callback_scratch: Vec::with_capacity(create_info.max_rigid_bodies),
            gravity: create_info.gravitational_acceleration,
            sleep: create_info.sleep,
            stats: StepStats::default(),
        }
    }

    /// Create a particle. Fails with `CapacityExceeded` before any state
    /// changes when a pool is full.
    pub fn create_particle(
        &mut self,
        create_info: &ParticleCreateInfo,
    ) -> Result<ParticleHandle, PhysicsError> {
        let bounds = Aabb::from_center_half_extents(
            create_info.position,
            Vec3::splat(create_info.radius),
        );
        let placeholder = AabbTreePayload::Particle(ParticleHandle::from_index(u32::MAX));
        let leaf = self.aabb_tree.create_leaf(bounds, placeholder)?;
        let created = self.particles.create(ParticleData {
            leaf,
            neighbor_pairs_begin: 0,
            neighbor_count: 0,
            marked: false,
            awake: true,
            radius: create_info.radius,
            inverse_mass: 1.0 / create_info.mass,
            material: create_info.material,
            filter: create_info.filter,
            previous_position: create_info.position,
            position: create_info.position,
            velocity: create_info.velocity,
            waking_motion: self.sleep.waking_motion_initializer,
            motion_callback: create_info.motion_callback.clone(),
        });
        match created {
            Ok(handle) => {
                self.aabb_tree
                    .set_leaf_payload(leaf, AabbTreePayload::Particle(handle));
                Ok(handle)
            }
            Err(error) => {
                self.aabb_tree.destroy_leaf(leaf);
                Err(error)
            }
        }
    }

    /// Destroy a particle, releasing its broadphase leaf first.
    pub fn destroy_particle(&mut self, particle: ParticleHandle) {
        self.aabb_tree.destroy_leaf(self.particles.data(particle).leaf);
        self.particles.destroy(particle);
    }

    /// Destroy a particle, reporting `InvalidHandle` for a stale handle
    /// instead of panicking.
    pub fn try_destroy_particle(&mut self, particle: ParticleHandle) -> Result<(), PhysicsError> {
        self.particles.ensure_live(particle)?;
        self.destroy_particle(particle);
        Ok(())
    }

    /// Create a dynamic rigid body.
    pub fn create_rigid_body(
        &mut self,
        create_info: &RigidBodyCreateInfo,
    ) -> Result<RigidBodyHandle, PhysicsError> {
        let transform = rigid_transform(create_info.position, create_info.orientation);
        let bounds = create_info.shape.bounds(&transform);
        let placeholder = AabbTreePayload::RigidBody(RigidBodyHandle::from_index(u32::MAX));
        let leaf = self.aabb_tree.create_leaf(bounds, placeholder)?;
        let created = self.rigid_bodies.create(RigidBodyData {
            leaf,
            neighbor_pairs_begin: 0,
            neighbor_count: 0,
            marked: false,
            awake: true,
            shape: create_info.shape,
            inverse_mass: 1.0 / create_info.mass,
            inverse_inertia_tensor: create_info.inertia_tensor.inverse(),
            material: create_info.material,
            filter: create_info.filter,
            previous_position: create_info.position,
            position: create_info.position,
            velocity: create_info.velocity,
            previous_orientation: create_info.orientation,
            orientation: create_info.orientation,
            angular_velocity: create_info.angular_velocity,
            waking_motion: self.sleep.waking_motion_initializer,
            motion_callback: create_info.motion_callback.clone(),
        });
        match created {
            Ok(handle) => {
                self.aabb_tree
                    .set_leaf_payload(leaf, AabbTreePayload::RigidBody(handle));
                Ok(handle)
            }
            Err(error) => {
                self.aabb_tree.destroy_leaf(leaf);
                Err(error)
            }
        }
    }

    /// Destroy a rigid body, releasing its broadphase leaf first.
    pub fn destroy_rigid_body(&mut self, rigid_body: RigidBodyHandle) {
        self.aabb_tree
            .destroy_leaf(self.rigid_bodies.data(rigid_body).leaf);
        self.rigid_bodies.destroy(rigid_body);
    }

    /// Destroy a rigid body, reporting `InvalidHandle` for a stale handle
    /// instead of panicking.
    pub fn try_destroy_rigid_body(
        &mut self,
        rigid_body: RigidBodyHandle,
    ) -> Result<(), PhysicsError> {
        self.rigid_bodies.ensure_live(rigid_body)?;
        self.destroy_rigid_body(rigid_body);
        Ok(())
    }

    /// Create an immovable static body.
    pub fn create_static_body(
        &mut self,
        create_info: &StaticBodyCreateInfo,
    ) -> Result<StaticBodyHandle, PhysicsError> {
        let transform = rigid_transform(create_info.position, create_info.orientation);
        let bounds = create_info.shape.bounds(&transform);
        let placeholder = AabbTreePayload::StaticBody(StaticBodyHandle::from_index(u32::MAX));
        let leaf = self.aabb_tree.create_leaf(bounds, placeholder)?;
        let created = self.static_bodies.create(StaticBodyData {
            leaf,
            shape: create_info.shape,
            material: create_info.material,
            filter: create_info.filter,
            transform,
            inverse_transform: transform.inverse(),
        });
        match created {
            Ok(handle) => {
                self.aabb_tree
                    .set_leaf_payload(leaf, AabbTreePayload::StaticBody(handle));
                Ok(handle)
            }
            Err(error) => {
                self.aabb_tree.destroy_leaf(leaf);
                Err(error)
            }
        }
    }

    /// Destroy a static body, releasing its broadphase leaf first.
    pub fn destroy_static_body(&mut self, static_body: StaticBodyHandle) {
        self.aabb_tree
            .destroy_leaf(self.static_bodies.data(static_body).leaf);
        self.static_bodies.destroy(static_body);
    }

    /// Destroy a static body, reporting `InvalidHandle` for a stale handle
    /// instead of panicking.
    pub fn try_destroy_static_body(
        &mut self,
        static_body: StaticBodyHandle,
    ) -> Result<(), PhysicsError> {
        self.static_bodies.ensure_live(static_body)?;
        self.destroy_static_body(static_body);
        Ok(())
    }

    /// Whether a particle currently takes part in solving.
    pub fn particle_is_awake(&self, particle: ParticleHandle) -> bool {
        self.particles.data(particle).awake
    }

    /// A particle's position.
    pub fn particle_position(&self, particle: ParticleHandle) -> Vec3 {
        self.particles.data(particle).position
    }

    /// A particle's velocity.
    pub fn particle_velocity(&self, particle: ParticleHandle) -> Vec3 {
        self.particles.data(particle).velocity
    }

    /// A particle's smoothed kinetic activity.
    pub fn particle_waking_motion(&self, particle: ParticleHandle) -> f32 {
        self.particles.data(particle).waking_motion
    }

    /// Whether a rigid body currently takes part in solving.
    pub fn rigid_body_is_awake(&self, rigid_body: RigidBodyHandle) -> bool {
        self.rigid_bodies.data(rigid_body).awake
    }

    /// A rigid body's position.
    pub fn rigid_body_position(&self, rigid_body: RigidBodyHandle) -> Vec3 {
        self.rigid_bodies.data(rigid_body).position
    }

    /// A rigid body's orientation.
    pub fn rigid_body_orientation(&self, rigid_body: RigidBodyHandle) -> Quat {
        self.rigid_bodies.data(rigid_body).orientation
    }

    /// A rigid body's linear velocity.
    pub fn rigid_body_velocity(&self, rigid_body: RigidBodyHandle) -> Vec3 {
        self.rigid_bodies.data(rigid_body).velocity
    }

    /// A rigid body's angular velocity.
    pub fn rigid_body_angular_velocity(&self, rigid_body: RigidBodyHandle) -> Vec3 {
        self.rigid_bodies.data(rigid_body).angular_velocity
    }

    /// A rigid body's smoothed kinetic activity.
    pub fn rigid_body_waking_motion(&self, rigid_body: RigidBodyHandle) -> f32 {
        self.rigid_bodies.data(rigid_body).waking_motion
    }

    /// Counters describing the most recent `simulate` call.
    pub fn last_step_stats(&self) -> StepStats {
        self.stats
    }

    /// Advance the world by `delta_time` seconds.
    pub fn simulate(&mut self, simulate_info: &WorldSimulateInfo<'_>) -> Result<(), PhysicsError> {
        let delta_time = simulate_info.delta_time;
        self.build_aabb_tree(delta_time)?;
        self.clear_neighbor_pairs();
        self.find_neighbor_pairs()?;
        self.assign_neighbor_pairs()?;
        self.find_neighbor_groups()?;

        self.awake_group_indices.clear();
        self.color_groups.clear();
        for group_index in 0..self.neighbor_groups.group_count() {
            if self.update_neighbor_group_awake_state(group_index) {
                self.awake_group_indices.push(group_index as u32)?;
                self.color_neighbor_group(group_index)?;
            }
        }
        self.color_groups.reserve()?;
        self.assign_color_groups();

        let substep_count = simulate_info.substep_count.max(1);
        let h = delta_time / substep_count as f32;
        let h_inv = 1.0 / h;

        self.solve_contacts.clear();
        self.solve_chunks.clear();
        self.position_tasks.clear();
        self.velocity_tasks.clear();
        let mut colors = 0u32;
        let mut total_contacts = 0u32;
        for color in 0..MAX_COLORS {
            let group_len = self.color_groups.group(color as u16).len();
            if group_len == 0 {
                break;
            }
            colors += 1;
            let group_begin = self.color_groups.group_begin(color as u16);
            let mut offset = 0;
            while offset < group_len {
                let len = (group_len - offset).min(MAX_SOLVE_CHUNK_SIZE);
                self.solve_chunks.push(SolveChunk {
                    pairs_offset: (group_begin + offset) as u32,
                    contacts_offset: total_contacts,
                    len: len as u32,
                })?;
                total_contacts += len as u32;
                offset += len;
            }
        }
        self.solve_contacts
            .resize(total_contacts as usize, Contact::default())?;

        // The solve state borrows nothing in the type system; the raw
        // pointers stay valid because `self` outlives this call and every
        // task joins on the latch before `state` drops.
        let state = SolveState {
            particles: &self.particles,
            rigid_bodies: &self.rigid_bodies,
            static_bodies: &self.static_bodies,
            pairs: self.neighbor_pairs.as_ptr(),
            color_pairs: self.color_groups.pairs_ptr(),
            contacts: self.solve_contacts.as_mut_ptr(),
            inverse_delta_time: h_inv,
            restitution_velocity_threshold: 2.0 * self.gravity.length() * h,
            contact_margin: simulate_info.contact_margin,
            latch: Default::default(),
        };
        for chunk_index in 0..self.solve_chunks.len() {
            let chunk = self.solve_chunks[chunk_index];
            self.position_tasks.push(PositionSolveTask {
                state: &state,
                chunk,
            })?;
            self.velocity_tasks.push(VelocitySolveTask {
                state: &state,
                chunk,
            })?;
        }

        let damping = self.sleep.substep_damping(h);
        let smoothing = self.sleep.substep_smoothing(h);
        for _ in 0..substep_count {
            self.integrate(h, damping, smoothing);
            for _ in 0..simulate_info.position_iterations.max(1) {
                self.dispatch_colors(simulate_info.thread_pool, &state, &self.position_tasks);
            }
            self.derive_velocities(h_inv);
            for _ in 0..simulate_info.velocity_iterations.max(1) {
                self.dispatch_colors(simulate_info.thread_pool, &state, &self.velocity_tasks);
            }
        }
        drop(state);
        // The tasks now hold dangling state pointers; they are cleared at
        // the top of the next simulate call and never run in between.

        self.stats = StepStats {
            neighbor_pairs: self.neighbor_pairs.len() as u32,
            islands: self.neighbor_groups.group_count() as u32,
            awake_islands: self.awake_group_indices.len() as u32,
            colors,
            solve_chunks: self.solve_chunks.len() as u32,
        };
        log::debug!(
            "simulate: {} pairs, {} islands ({} awake), {} colors, {} chunks",
            self.stats.neighbor_pairs,
            self.stats.islands,
            self.stats.awake_islands,
            self.stats.colors,
            self.stats.solve_chunks
        );

        self.dispatch_motion_callbacks();
        Ok(())
    }

    fn build_aabb_tree(&mut self, delta_time: f32) -> Result<(), PhysicsError> {
        let constant_safety_term = 0.0;
        let velocity_safety_factor = 2.0;
        let gravity_safety_term =
            2.0 * self.gravity.length() * delta_time * delta_time;
        let Self {
            aabb_tree,
            particles,
            rigid_bodies,
            ..
        } = self;
        particles.for_each(|_, data| {
            let half_extents = Vec3::splat(
                data.radius
                    + constant_safety_term
                    + velocity_safety_factor * data.velocity.length() * delta_time
                    + gravity_safety_term,
            );
            aabb_tree.set_leaf_bounds(
                data.leaf,
                Aabb::from_center_half_extents(data.position, half_extents),
            );
        });
        rigid_bodies.for_each(|_, data| {
            let transform = rigid_transform(data.position, data.orientation);
            let bounds = data.shape.bounds(&transform).expand(
                constant_safety_term
                    + velocity_safety_factor * data.velocity.length() * delta_time
                    + gravity_safety_term,
            );
            aabb_tree.set_leaf_bounds(data.leaf, bounds);
        });
        aabb_tree.build()
    }

    fn clear_neighbor_pairs(&mut self) {
        self.particles.for_each_mut(|_, data| data.neighbor_count = 0);
        self.rigid_bodies
            .for_each_mut(|_, data| data.neighbor_count = 0);
        self.neighbor_pair_slots.clear();
        self.neighbor_pairs.clear();
        self.neighbor_groups.clear();
        // Non-empty only if a previous frame aborted mid-colouring.
        self.coloring_fringe.clear();
    }

    fn find_neighbor_pairs(&mut self) -> Result<(), PhysicsError> {
        let Self {
            aabb_tree,
            neighbor_pairs,
            particles,
            rigid_bodies,
            static_bodies,
            ..
        } = self;
        let mut result = Ok(());
        aabb_tree.for_each_overlapping_leaf_pair(|first, second| {
            if result.is_err() {
                return;
            }
            use AabbTreePayload as Payload;
            // Canonical pair order: particle < rigid body < static body.
            let pair = match (first, second) {
                (Payload::Particle(a), Payload::Particle(b)) => {
                    if !CollisionFilter::can_collide(
                        &particles.data(a).filter,
                        &particles.data(b).filter,
                    ) {
                        return;
                    }
                    particles.data_mut(a).neighbor_count += 1;
                    particles.data_mut(b).neighbor_count += 1;
                    NeighborPair::new([a.index(), b.index()], PairKind::ParticleParticle)
                }
                (Payload::Particle(a), Payload::RigidBody(b))
                | (Payload::RigidBody(b), Payload::Particle(a)) => {
                    if !CollisionFilter::can_collide(
                        &particles.data(a).filter,
                        &rigid_bodies.data(b).filter,
                    ) {
                        return;
                    }
                    particles.data_mut(a).neighbor_count += 1;
                    rigid_bodies.data_mut(b).neighbor_count += 1;
                    NeighborPair::new([a.index(), b.index()], PairKind::ParticleRigidBody)
                }
                (Payload::Particle(a), Payload::StaticBody(b))
                | (Payload::StaticBody(b), Payload::Particle(a)) => {
                    if !CollisionFilter::can_collide(
                        &particles.data(a).filter,
                        &static_bodies.data(b).filter,
                    ) {
                        return;
                    }
                    particles.data_mut(a).neighbor_count += 1;
                    NeighborPair::new([a.index(), b.index()], PairKind::ParticleStaticBody)
                }
                (Payload::RigidBody(a), Payload::RigidBody(b)) => {
                    if !CollisionFilter::can_collide(
                        &rigid_bodies.data(a).filter,
                        &rigid_bodies.data(b).filter,
                    ) {
                        return;
                    }
                    rigid_bodies.data_mut(a).neighbor_count += 1;
                    rigid_bodies.data_mut(b).neighbor_count += 1;
                    NeighborPair::new([a.index(), b.index()], PairKind::RigidBodyRigidBody)
                }
                (Payload::RigidBody(a), Payload::StaticBody(b))
                | (Payload::StaticBody(b), Payload::RigidBody(a)) => {
                    if !CollisionFilter::can_collide(
                        &rigid_bodies.data(a).filter,
                        &static_bodies.data(b).filter,
                    ) {
                        return;
                    }
                    rigid_bodies.data_mut(a).neighbor_count += 1;
                    NeighborPair::new([a.index(), b.index()], PairKind::RigidBodyStaticBody)
                }
                (Payload::StaticBody(_), Payload::StaticBody(_)) => return,
            };
            result = neighbor_pairs.push(pair);
        });
        result
    }

    fn assign_neighbor_pairs(&mut self) -> Result<(), PhysicsError> {
        let mut total = 0u32;
        self.particles.for_each_mut(|_, data| {
            data.neighbor_pairs_begin = total;
            total += data.neighbor_count as u32;
            data.neighbor_count = 0;
        });
        self.rigid_bodies.for_each_mut(|_, data| {
            data.neighbor_pairs_begin = total;
            total += data.neighbor_count as u32;
            data.neighbor_count = 0;
        });
        self.neighbor_pair_slots.resize(total as usize, 0)?;
        for index in 0..self.neighbor_pairs.len() {
            let pair = self.neighbor_pairs[index];
            let pair_index = index as u32;
            match pair.kind {
                PairKind::ParticleParticle => {
                    self.assign_particle_slot(pair.objects[0], pair_index);
                    self.assign_particle_slot(pair.objects[1], pair_index);
                }
                PairKind::ParticleRigidBody => {
                    self.assign_particle_slot(pair.objects[0], pair_index);
                    self.assign_rigid_body_slot(pair.objects[1], pair_index);
                }
                PairKind::ParticleStaticBody => {
                    self.assign_particle_slot(pair.objects[0], pair_index);
                }
                PairKind::RigidBodyRigidBody => {
                    self.assign_rigid_body_slot(pair.objects[0], pair_index);
                    self.assign_rigid_body_slot(pair.objects[1], pair_index);
                }
                PairKind::RigidBodyStaticBody => {
                    self.assign_rigid_body_slot(pair.objects[0], pair_index);
                }
            }
        }
        Ok(())
    }

    fn assign_particle_slot(&mut self, object: u32, pair_index: u32) {
        let data = self.particles.data_mut(ParticleHandle::from_index(object));
        let slot = data.neighbor_pairs_begin + data.neighbor_count as u32;
        data.neighbor_count += 1;
        self.neighbor_pair_slots[slot as usize] = pair_index;
    }

    fn assign_rigid_body_slot(&mut self, object: u32, pair_index: u32) {
        let data = self
            .rigid_bodies
            .data_mut(RigidBodyHandle::from_index(object));
        let slot = data.neighbor_pairs_begin + data.neighbor_count as u32;
        data.neighbor_count += 1;
        self.neighbor_pair_slots[slot as usize] = pair_index;
    }

    fn find_neighbor_groups(&mut self) -> Result<(), PhysicsError> {
        self.particles.for_each_mut(|_, data| data.marked = false);
        self.rigid_bodies.for_each_mut(|_, data| data.marked = false);
        let mut fringe_index = 0usize;
        for index in 0..self.particles.capacity() as u32 {
            if !self.particles.is_live(index) {
                continue;
            }
            let handle = ParticleHandle::from_index(index);
            if self.particles.data(handle).marked {
                continue;
            }
            self.particles.data_mut(handle).marked = true;
            self.neighbor_groups.begin_group()?;
            self.neighbor_groups
                .add_object(DynamicObject::Particle(handle))?;
            self.flood_fill(&mut fringe_index)?;
        }
        for index in 0..self.rigid_bodies.capacity() as u32 {
            if !self.rigid_bodies.is_live(index) {
                continue;
            }
            let handle = RigidBodyHandle::from_index(index);
            if self.rigid_bodies.data(handle).marked {
                continue;
            }
            self.rigid_bodies.data_mut(handle).marked = true;
            self.neighbor_groups.begin_group()?;
            self.neighbor_groups
                .add_object(DynamicObject::RigidBody(handle))?;
            self.flood_fill(&mut fringe_index)?;
        }
        Ok(())
    }

    fn flood_fill(&mut self, fringe_index: &mut usize) -> Result<(), PhysicsError> {
        while *fringe_index < self.neighbor_groups.object_count() {
            let object = self.neighbor_groups.object(*fringe_index);
            *fringe_index += 1;
            match object {
                DynamicObject::Particle(handle) => self.visit_particle_neighbors(handle)?,
                DynamicObject::RigidBody(handle) => self.visit_rigid_body_neighbors(handle)?,
            }
        }
        Ok(())
    }

    fn visit_particle_neighbors(&mut self, handle: ParticleHandle) -> Result<(), PhysicsError> {
        let (begin, count) = {
            let data = self.particles.data(handle);
            (data.neighbor_pairs_begin, data.neighbor_count as u32)
        };
        for offset in 0..count {
            let pair_index = self.neighbor_pair_slots[(begin + offset) as usize];
            let pair = self.neighbor_pairs[pair_index as usize];
            match pair.kind {
                PairKind::ParticleParticle => {
                    let other = ParticleHandle::from_index(pair.other_object(handle.index()));
                    if !self.particles.data(other).marked {
                        self.particles.data_mut(other).marked = true;
                        self.neighbor_groups
                            .add_object(DynamicObject::Particle(other))?;
                    }
                    self.claim_pair(pair_index)?;
                }
                PairKind::ParticleRigidBody => {
                    let other = RigidBodyHandle::from_index(pair.objects[1]);
                    if !self.rigid_bodies.data(other).marked {
                        self.rigid_bodies.data_mut(other).marked = true;
                        self.neighbor_groups
                            .add_object(DynamicObject::RigidBody(other))?;
                    }
                    self.claim_pair(pair_index)?;
                }
                PairKind::ParticleStaticBody => {
                    // Static bodies are not traversed; the pair still needs
                    // solving within this island.
                    self.neighbor_groups.add_pair(pair_index)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn visit_rigid_body_neighbors(&mut self, handle: RigidBodyHandle) -> Result<(), PhysicsError> {
        let (begin, count) = {
            let data = self.rigid_bodies.data(handle);
            (data.neighbor_pairs_begin, data.neighbor_count as u32)
        };
        for offset in 0..count {
            let pair_index = self.neighbor_pair_slots[(begin + offset) as usize];
            let pair = self.neighbor_pairs[pair_index as usize];
            match pair.kind {
                PairKind::ParticleRigidBody => {
                    let other = ParticleHandle::from_index(pair.objects[0]);
                    if !self.particles.data(other).marked {
                        self.particles.data_mut(other).marked = true;
                        self.neighbor_groups
                            .add_object(DynamicObject::Particle(other))?;
                    }
                    self.claim_pair(pair_index)?;
                }
                PairKind::RigidBodyRigidBody => {
                    let other = RigidBodyHandle::from_index(pair.other_object(handle.index()));
                    if !self.rigid_bodies.data(other).marked {
                        self.rigid_bodies.data_mut(other).marked = true;
                        self.neighbor_groups
                            .add_object(DynamicObject::RigidBody(other))?;
                    }
                    self.claim_pair(pair_index)?;
                }
                PairKind::RigidBodyStaticBody => {
                    self.neighbor_groups.add_pair(pair_index)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn claim_pair(&mut self, pair_index: u32) -> Result<(), PhysicsError> {
        let pair = &mut self.neighbor_pairs[pair_index as usize];
        if pair.color == COLOR_UNMARKED {
            pair.color = COLOR_MARKED;
            self.neighbor_groups.add_pair(pair_index)?;
        }
        Ok(())
    }

    /// Evaluate one island's sleep policy. Returns whether the island takes
    /// part in solving this frame.
    fn update_neighbor_group_awake_state(&mut self, group_index: usize) -> bool {
        let group = self.neighbor_groups.group(group_index);
        let epsilon = self.sleep.waking_motion_epsilon;
        let mut contains_awake = false;
        let mut contains_sleeping = false;
        let mut sleepable = true;
        for index in group.objects_begin..group.objects_end {
            let (awake, waking_motion) = match self.neighbor_groups.object(index as usize) {
                DynamicObject::Particle(handle) => {
                    let data = self.particles.data(handle);
                    (data.awake, data.waking_motion)
                }
                DynamicObject::RigidBody(handle) => {
                    let data = self.rigid_bodies.data(handle);
                    (data.awake, data.waking_motion)
                }
            };
            if awake {
                contains_awake = true;
                if waking_motion > epsilon {
                    sleepable = false;
                }
            } else {
                contains_sleeping = true;
            }
        }
        if !contains_awake {
            return false;
        }
        if sleepable {
            for index in group.objects_begin..group.objects_end {
                match self.neighbor_groups.object(index as usize) {
                    DynamicObject::Particle(handle) => {
                        let data = self.particles.data_mut(handle);
                        if data.awake {
                            data.velocity = Vec3::ZERO;
                            data.awake = false;
                        }
                    }
                    DynamicObject::RigidBody(handle) => {
                        let data = self.rigid_bodies.data_mut(handle);
                        if data.awake {
                            data.velocity = Vec3::ZERO;
                            data.angular_velocity = Vec3::ZERO;
                            data.awake = false;
                        }
                    }
                }
            }
            return false;
        }
        if contains_sleeping {
            let initializer = self.sleep.waking_motion_initializer;
            for index in group.objects_begin..group.objects_end {
                match self.neighbor_groups.object(index as usize) {
                    DynamicObject::Particle(handle) => {
                        let data = self.particles.data_mut(handle);
                        if !data.awake {
                            data.waking_motion = initializer;
                            data.awake = true;
                        }
                    }
                    DynamicObject::RigidBody(handle) => {
                        let data = self.rigid_bodies.data_mut(handle);
                        if !data.awake {
                            data.waking_motion = initializer;
                            data.awake = true;
                        }
                    }
                }
            }
        }
        true
    }

    fn color_neighbor_group(&mut self, group_index: usize) -> Result<(), PhysicsError> {
        let group = self.neighbor_groups.group(group_index);
        if group.pairs_begin == group.pairs_end {
            return Ok(());
        }
        for index in group.pairs_begin..group.pairs_end {
            let pair_index = self.neighbor_groups.pair(index as usize);
            self.neighbor_pairs[pair_index as usize].color = COLOR_UNMARKED;
        }
        let seed = self.neighbor_groups.pair(group.pairs_begin as usize);
        self.neighbor_pairs[seed as usize].color = COLOR_MARKED;
        self.coloring_fringe.push_back(seed)?;
        while let Some(pair_index) = self.coloring_fringe.pop_front() {
            let pair = self.neighbor_pairs[pair_index as usize];
            self.coloring_bits.clear_all();
            let lists = self.pair_neighbor_lists(&pair);
            for list in lists.iter().flatten() {
                let (begin, count) = *list;
                for offset in 0..count {
                    let neighbor_index = self.neighbor_pair_slots[(begin + offset) as usize];
                    let color = self.neighbor_pairs[neighbor_index as usize].color;
                    if color == COLOR_UNMARKED {
                        self.neighbor_pairs[neighbor_index as usize].color = COLOR_MARKED;
                        self.coloring_fringe.push_back(neighbor_index)?;
                    } else if color != COLOR_MARKED {
                        self.coloring_bits.set(color as usize);
                    }
                }
            }
            match self.coloring_bits.first_zero() {
                Some(color) => {
                    self.neighbor_pairs[pair_index as usize].color = color as u16;
                    self.color_groups.count(color as u16);
                }
                None => {
                    return Err(PhysicsError::ColoringExhausted { max: MAX_COLORS });
                }
            }
        }
        Ok(())
    }

    /// Neighbor-list ranges of the up to two dynamic participants of a pair.
    fn pair_neighbor_lists(&self, pair: &NeighborPair) -> [Option<(u32, u32)>; 2] {
        let particle_list = |handle: u32| {
            let data = self.particles.data(ParticleHandle::from_index(handle));
            (data.neighbor_pairs_begin, data.neighbor_count as u32)
        };
        let rigid_body_list = |handle: u32| {
            let data = self.rigid_bodies.data(RigidBodyHandle::from_index(handle));
            (data.neighbor_pairs_begin, data.neighbor_count as u32)
        };
        match pair.kind {
            PairKind::ParticleParticle => [
                Some(particle_list(pair.objects[0])),
                Some(particle_list(pair.objects[1])),
            ],
            PairKind::ParticleRigidBody => [
                Some(particle_list(pair.objects[0])),
                Some(rigid_body_list(pair.objects[1])),
            ],
            PairKind::ParticleStaticBody => [Some(particle_list(pair.objects[0])), None],
            PairKind::RigidBodyRigidBody => [
                Some(rigid_body_list(pair.objects[0])),
                Some(rigid_body_list(pair.objects[1])),
            ],
            PairKind::RigidBodyStaticBody => [Some(rigid_body_list(pair.objects[0])), None],
        }
    }

    fn assign_color_groups(&mut self) {
        for index in 0..self.awake_group_indices.len() {
            let group = self
                .neighbor_groups
                .group(self.awake_group_indices[index] as usize);
            for pair_slot in group.pairs_begin..group.pairs_end {
                let pair_index = self.neighbor_groups.pair(pair_slot as usize);
                let color = self.neighbor_pairs[pair_index as usize].color;
                self.color_groups.push(pair_index, color);
            }
        }
    }

    fn integrate(&mut self, h: f32, damping: f32, smoothing: f32) {
        let gravity = self.gravity;
        let sleep = self.sleep;
        for index in 0..self.awake_group_indices.len() {
            let group = self
                .neighbor_groups
                .group(self.awake_group_indices[index] as usize);
            for object_index in group.objects_begin..group.objects_end {
                match self.neighbor_groups.object(object_index as usize) {
                    DynamicObject::Particle(handle) => {
                        let data = self.particles.data_mut(handle);
                        data.previous_position = data.position;
                        data.velocity += h * gravity;
                        data.velocity *= damping;
                        data.position += h * data.velocity;
                        data.waking_motion = sleep.smooth(
                            data.waking_motion,
                            data.velocity.length_squared(),
                            smoothing,
                        );
                    }
                    DynamicObject::RigidBody(handle) => {
                        let data = self.rigid_bodies.data_mut(handle);
                        data.previous_position = data.position;
                        data.previous_orientation = data.orientation;
                        data.velocity += h * gravity;
                        data.velocity *= damping;
                        data.position += h * data.velocity;
                        data.angular_velocity *= damping;
                        data.orientation =
                            integrate_orientation(data.orientation, data.angular_velocity, h);
                        data.waking_motion = sleep.smooth(
                            data.waking_motion,
                            data.velocity.length_squared()
                                + data.angular_velocity.length_squared(),
                            smoothing,
                        );
                    }
                }
            }
        }
    }

    fn derive_velocities(&mut self, h_inv: f32) {
        for index in 0..self.awake_group_indices.len() {
            let group = self
                .neighbor_groups
                .group(self.awake_group_indices[index] as usize);
            for object_index in group.objects_begin..group.objects_end {
                match self.neighbor_groups.object(object_index as usize) {
                    DynamicObject::Particle(handle) => {
                        let data = self.particles.data_mut(handle);
                        data.velocity = (data.position - data.previous_position) * h_inv;
                    }
                    DynamicObject::RigidBody(handle) => {
                        let data = self.rigid_bodies.data_mut(handle);
                        data.velocity = (data.position - data.previous_position) * h_inv;
                        data.angular_velocity = derive_angular_velocity(
                            data.orientation,
                            data.previous_orientation,
                            h_inv,
                        );
                    }
                }
            }
        }
    }

    /// Run one solve pass: colours in ascending order, chunks of one colour
    /// in parallel, a latch barrier between colours.
    fn dispatch_colors<T: Task>(
        &self,
        thread_pool: &dyn ThreadPool,
        state: &SolveState,
        tasks: &[T],
    ) {
        let mut chunk_cursor = 0usize;
        for color in 0..MAX_COLORS {
            let group_len = self.color_groups.group(color as u16).len();
            if group_len == 0 {
                break;
            }
            let chunk_count = group_len.div_ceil(MAX_SOLVE_CHUNK_SIZE);
            state.latch.arm(chunk_count);
            for offset in 0..chunk_count {
                // SAFETY: the task lives in `self` for the rest of this
                // simulate call and this thread blocks on the latch below
                // before anything it references can change.
                thread_pool.push(unsafe { TaskRef::new(&tasks[chunk_cursor + offset]) });
            }
            state.latch.wait();
            chunk_cursor += chunk_count;
        }
    }

    fn dispatch_motion_callbacks(&mut self) {
        let mut particle_callbacks = std::mem::take(&mut self.particle_callback_scratch);
        particle_callbacks.clear();
        self.particles.for_each(|handle, data| {
            if let Some(callback) = &data.motion_callback {
                particle_callbacks.push((handle, Arc::clone(callback)));
            }
        });
        for (handle, callback) in &particle_callbacks {
            callback.on_particle_motion(self, *handle);
        }
        self.particle_callback_scratch = particle_callbacks;

        let mut rigid_body_callbacks = std::mem::take(&mut self.rigid_body_callback_scratch);
        rigid_body_callbacks.clear();
        self.rigid_bodies.for_each(|handle, data| {
            if let Some(callback) = &data.motion_callback {
                rigid_body_callbacks.push((handle, Arc::clone(callback)));
            }
        });
        for (handle, callback) in &rigid_body_callbacks {
            callback.on_rigid_body_motion(self, *handle);
        }
        self.rigid_body_callback_scratch = rigid_body_callbacks;
    }
}
