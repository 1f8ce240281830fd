//! XPBD Contact Solver
//!
//! Substepped positional and velocity passes over the colour-grouped
//! neighbor pairs. Each colour's pairs are cut into chunks of at most
//! [`MAX_SOLVE_CHUNK_SIZE`] pairs; chunks of one colour run concurrently on
//! the supplied thread pool and colours are serialised by a latch barrier.
//!
//! # Why the raw pointers are sound
//!
//! Tasks mutate object state through raw pointers obtained from the
//! storages. Two guarantees make this race-free without locks:
//!
//! 1. Pairs sharing an object never share a colour, so concurrently
//!    running chunks touch disjoint objects.
//! 2. The dispatching thread blocks on [`SolveState::latch`] before
//!    reusing or dropping anything a task references, and re-arms it only
//!    between colours.

use crate::body::{ParticleData, RigidBodyData, StaticBodyData};
use crate::material::Material;
use crate::math::{
    apply_orientation_delta, perp_unit, rigid_transform, world_inverse_inertia, Mat3, Vec3,
};
use crate::neighbor::{NeighborPair, PairKind};
use crate::parallel::{Latch, Task};
use crate::shape::{particle_ball_contact, particle_shape_contact, shape_shape_contact, Ball};
use crate::storage::{
    ObjectHandle, ObjectStorage, ParticleHandle, RigidBodyHandle, StaticBodyHandle,
};

/// Upper bound on pairs per solver chunk.
pub(crate) const MAX_SOLVE_CHUNK_SIZE: usize = 16;

/// Inputs of one positional constraint projection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PositionalConstraintProblem {
    /// Unit direction to correct along
    pub direction: Vec3,
    /// Signed distance to correct; positive pushes the first object along
    /// `direction`
    pub distance: f32,
    pub relative_position: [Vec3; 2],
    pub inverse_mass: [f32; 2],
    pub inverse_inertia: [Mat3; 2],
}

/// Outputs of one positional constraint projection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PositionalConstraintSolution {
    pub delta_position: [Vec3; 2],
    pub delta_orientation: [Vec3; 2],
    pub delta_lambda: f32,
}

/// XPBD positional kernel: Lagrange multiplier `λ = c / (w₁ + w₂)` with
/// generalised inverse masses `wᵢ = mᵢ⁻¹ + (rᵢ×n)·Iᵢ⁻¹(rᵢ×n)`.
pub(crate) fn solve_positional_constraint(
    problem: &PositionalConstraintProblem,
) -> PositionalConstraintSolution {
    let n = problem.direction;
    let [r_1, r_2] = problem.relative_position;
    let [m_inv_1, m_inv_2] = problem.inverse_mass;
    let [i_inv_1, i_inv_2] = problem.inverse_inertia;
    let r_1_cross_n = r_1.cross(n);
    let r_2_cross_n = r_2.cross(n);
    let w_1 = m_inv_1 + r_1_cross_n.dot(i_inv_1 * r_1_cross_n);
    let w_2 = m_inv_2 + r_2_cross_n.dot(i_inv_2 * r_2_cross_n);
    let delta_lambda = problem.distance / (w_1 + w_2);
    let p = delta_lambda * n;
    PositionalConstraintSolution {
        delta_position: [p * m_inv_1, -p * m_inv_2],
        delta_orientation: [i_inv_1 * r_1.cross(p), i_inv_2 * r_2.cross(-p)],
        delta_lambda,
    }
}

/// Per-pair contact state carried from the positional to the velocity pass
/// of one substep. A zero normal means no contact was found.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Contact {
    pub normal: Vec3,
    pub relative_positions: [Vec3; 2],
    pub separating_velocity: f32,
    pub lambda_n: f32,
    pub lambda_t: f32,
}

/// Shared state of all solver tasks for one `simulate` call.
pub(crate) struct SolveState {
    pub particles: *const ObjectStorage<ParticleHandle, ParticleData>,
    pub rigid_bodies: *const ObjectStorage<RigidBodyHandle, RigidBodyData>,
    pub static_bodies: *const ObjectStorage<StaticBodyHandle, StaticBodyData>,
    /// Base of the frame's neighbor-pair list (read-only during solve)
    pub pairs: *const NeighborPair,
    /// Base of the colour-major pair-index array (read-only during solve)
    pub color_pairs: *const u32,
    /// Base of the per-chunk contact slots
    pub contacts: *mut Contact,
    pub inverse_delta_time: f32,
    pub restitution_velocity_threshold: f32,
    pub contact_margin: f32,
    pub latch: Latch,
}

// SAFETY: see the module docs — colour disjointness plus the latch barrier
// make all cross-thread access race-free.
unsafe impl Sync for SolveState {}

/// A contiguous run of same-colour pairs and their contact slots.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SolveChunk {
    /// Offset into the colour-major pair-index array
    pub pairs_offset: u32,
    /// Offset into the contact slots
    pub contacts_offset: u32,
    /// Number of pairs in this chunk
    pub len: u32,
}

/// One object's role in a contact, as a raw pointer into its storage.
#[derive(Clone, Copy)]
enum Side {
    Particle(*mut ParticleData),
    RigidBody(*mut RigidBodyData),
    StaticBody(*const StaticBodyData),
}

impl Side {
    unsafe fn inverse_mass(self) -> f32 {
        match self {
            Side::Particle(data) => (*data).inverse_mass,
            Side::RigidBody(data) => (*data).inverse_mass,
            Side::StaticBody(_) => 0.0,
        }
    }

    unsafe fn world_inverse_inertia(self) -> Mat3 {
        match self {
            Side::RigidBody(data) => {
                world_inverse_inertia((*data).inverse_inertia_tensor, (*data).orientation)
            }
            _ => Mat3::ZERO,
        }
    }

    unsafe fn material(self) -> Material {
        match self {
            Side::Particle(data) => (*data).material,
            Side::RigidBody(data) => (*data).material,
            Side::StaticBody(data) => (*data).material,
        }
    }

    unsafe fn velocity_at(self, relative_position: Vec3) -> Vec3 {
        match self {
            Side::Particle(data) => (*data).velocity,
            Side::RigidBody(data) => {
                (*data).velocity + (*data).angular_velocity.cross(relative_position)
            }
            Side::StaticBody(_) => Vec3::ZERO,
        }
    }

    /// How far the material point currently at `relative_position` moved
    /// during this substep. Rigid bodies advect the point through the
    /// orientation change so friction sticks in the contact frame.
    unsafe fn contact_movement(self, relative_position: Vec3) -> Vec3 {
        match self {
            Side::Particle(data) => (*data).position - (*data).previous_position,
            Side::RigidBody(data) => {
                let data = &*data;
                let inverse_rotation = Mat3::from_quat(data.orientation).transpose();
                let previous_rotation = Mat3::from_quat(data.previous_orientation);
                (data.position + relative_position)
                    - (data.previous_position
                        + previous_rotation * (inverse_rotation * relative_position))
            }
            Side::StaticBody(_) => Vec3::ZERO,
        }
    }

    unsafe fn apply_position_delta(self, delta_position: Vec3, delta_orientation: Vec3) {
        match self {
            Side::Particle(data) => (*data).position += delta_position,
            Side::RigidBody(data) => {
                let data = &mut *data;
                data.position += delta_position;
                data.orientation = apply_orientation_delta(data.orientation, delta_orientation);
            }
            Side::StaticBody(_) => {}
        }
    }

    unsafe fn generalized_inverse_mass(
        self,
        inverse_inertia: Mat3,
        relative_position: Vec3,
        direction: Vec3,
    ) -> f32 {
        match self {
            Side::Particle(data) => (*data).inverse_mass,
            Side::RigidBody(data) => {
                let r_cross_n = relative_position.cross(direction);
                (*data).inverse_mass + r_cross_n.dot(inverse_inertia * r_cross_n)
            }
            Side::StaticBody(_) => 0.0,
        }
    }

    unsafe fn apply_impulse(self, inverse_inertia: Mat3, relative_position: Vec3, impulse: Vec3) {
        match self {
            Side::Particle(data) => {
                let data = &mut *data;
                data.velocity += impulse * data.inverse_mass;
            }
            Side::RigidBody(data) => {
                let data = &mut *data;
                data.velocity += impulse * data.inverse_mass;
                data.angular_velocity += inverse_inertia * relative_position.cross(impulse);
            }
            Side::StaticBody(_) => {}
        }
    }
}

unsafe fn resolve_sides(state: &SolveState, pair: &NeighborPair) -> [Side; 2] {
    let particles = &*state.particles;
    let rigid_bodies = &*state.rigid_bodies;
    let static_bodies = &*state.static_bodies;
    let particle = |index: u32| Side::Particle(particles.data_ptr(ParticleHandle::from_index(index)));
    let rigid = |index: u32| Side::RigidBody(rigid_bodies.data_ptr(RigidBodyHandle::from_index(index)));
    let fixed = |index: u32| {
        Side::StaticBody(static_bodies.data(StaticBodyHandle::from_index(index)) as *const _)
    };
    let [a, b] = pair.objects;
    match pair.kind {
        PairKind::ParticleParticle => [particle(a), particle(b)],
        PairKind::ParticleRigidBody => [particle(a), rigid(b)],
        PairKind::ParticleStaticBody => [particle(a), fixed(b)],
        PairKind::RigidBodyRigidBody => [rigid(a), rigid(b)],
        PairKind::RigidBodyStaticBody => [rigid(a), fixed(b)],
    }
}

/// Contact geometry for one pair: normal, separation and the two relative
/// contact positions (zero for particles and static bodies).
unsafe fn contact_geometry(
    state: &SolveState,
    pair: &NeighborPair,
    sides: &[Side; 2],
) -> Option<(Vec3, f32, [Vec3; 2])> {
    let margin = state.contact_margin;
    match (pair.kind, sides[0], sides[1]) {
        (PairKind::ParticleParticle, Side::Particle(a), Side::Particle(b)) => {
            let (a, b) = (&*a, &*b);
            let contact = particle_ball_contact(
                a.position,
                a.radius,
                &Ball { radius: b.radius },
                b.position,
                margin,
            )?;
            Some((contact.normal, contact.separation, [Vec3::ZERO; 2]))
        }
        (PairKind::ParticleRigidBody, Side::Particle(a), Side::RigidBody(b)) => {
            let (a, b) = (&*a, &*b);
            let transform = rigid_transform(b.position, b.orientation);
            let inverse = transform.inverse();
            let contact =
                particle_shape_contact(a.position, a.radius, &b.shape, &transform, &inverse, margin)?;
            Some((
                contact.normal,
                contact.separation,
                [Vec3::ZERO, contact.position - b.position],
            ))
        }
        (PairKind::ParticleStaticBody, Side::Particle(a), Side::StaticBody(b)) => {
            let (a, b) = (&*a, &*b);
            let contact = particle_shape_contact(
                a.position,
                a.radius,
                &b.shape,
                &b.transform,
                &b.inverse_transform,
                margin,
            )?;
            Some((contact.normal, contact.separation, [Vec3::ZERO; 2]))
        }
        (PairKind::RigidBodyRigidBody, Side::RigidBody(a), Side::RigidBody(b)) => {
            let (a, b) = (&*a, &*b);
            let transform_a = rigid_transform(a.position, a.orientation);
            let transform_b = rigid_transform(b.position, b.orientation);
            let contact = shape_shape_contact(
                &a.shape,
                &transform_a,
                &transform_a.inverse(),
                &b.shape,
                &transform_b,
                &transform_b.inverse(),
                margin,
            )?;
            Some((
                contact.normal,
                contact.separation,
                [contact.position - a.position, contact.position - b.position],
            ))
        }
        (PairKind::RigidBodyStaticBody, Side::RigidBody(a), Side::StaticBody(b)) => {
            let (a, b) = (&*a, &*b);
            let transform_a = rigid_transform(a.position, a.orientation);
            let contact = shape_shape_contact(
                &a.shape,
                &transform_a,
                &transform_a.inverse(),
                &b.shape,
                &b.transform,
                &b.inverse_transform,
                margin,
            )?;
            Some((
                contact.normal,
                contact.separation,
                [contact.position - a.position, Vec3::ZERO],
            ))
        }
        _ => None,
    }
}

unsafe fn solve_pair_position(state: &SolveState, pair: &NeighborPair, out: &mut Contact) {
    let sides = resolve_sides(state, pair);
    let Some((normal, separation, relative_positions)) = contact_geometry(state, pair, &sides)
    else {
        *out = Contact::default();
        return;
    };
    let relative_velocity = sides[0].velocity_at(relative_positions[0])
        - sides[1].velocity_at(relative_positions[1]);
    let mut contact = Contact {
        normal,
        relative_positions,
        separating_velocity: normal.dot(relative_velocity),
        lambda_n: 0.0,
        lambda_t: 0.0,
    };

    let inverse_mass = [sides[0].inverse_mass(), sides[1].inverse_mass()];
    let inverse_inertia = [
        sides[0].world_inverse_inertia(),
        sides[1].world_inverse_inertia(),
    ];
    let separation_solution = solve_positional_constraint(&PositionalConstraintProblem {
        direction: normal,
        distance: -separation,
        relative_position: relative_positions,
        inverse_mass,
        inverse_inertia,
    });
    contact.lambda_n = separation_solution.delta_lambda;

    let mut delta_position = separation_solution.delta_position;
    let mut delta_orientation = separation_solution.delta_orientation;

    let movement = sides[0].contact_movement(relative_positions[0])
        - sides[1].contact_movement(relative_positions[1]);
    let tangential_movement = perp_unit(movement, normal);
    if tangential_movement != Vec3::ZERO {
        let correction_distance = tangential_movement.length();
        let correction_direction = tangential_movement / -correction_distance;
        let friction_solution = solve_positional_constraint(&PositionalConstraintProblem {
            direction: correction_direction,
            distance: correction_distance,
            relative_position: relative_positions,
            inverse_mass,
            inverse_inertia,
        });
        let static_friction =
            0.5 * (sides[0].material().static_friction + sides[1].material().static_friction);
        // Coulomb cone: accept only while the tangential correction stays
        // below the normal one.
        if friction_solution.delta_lambda < static_friction * contact.lambda_n {
            contact.lambda_t = friction_solution.delta_lambda;
            for i in 0..2 {
                delta_position[i] += friction_solution.delta_position[i];
                delta_orientation[i] += friction_solution.delta_orientation[i];
            }
        }
    }

    sides[0].apply_position_delta(delta_position[0], delta_orientation[0]);
    sides[1].apply_position_delta(delta_position[1], delta_orientation[1]);
    *out = contact;
}

unsafe fn solve_pair_velocity(state: &SolveState, pair: &NeighborPair, contact: &Contact) {
    let sides = resolve_sides(state, pair);
    let r = contact.relative_positions;
    let relative_velocity = sides[0].velocity_at(r[0]) - sides[1].velocity_at(r[1]);
    let separating_velocity = contact.normal.dot(relative_velocity);
    let tangential_velocity = relative_velocity - contact.normal * separating_velocity;

    let friction_update = if tangential_velocity != Vec3::ZERO {
        let dynamic_friction =
            0.5 * (sides[0].material().dynamic_friction + sides[1].material().dynamic_friction);
        let tangential_speed = tangential_velocity.length();
        (-tangential_velocity / tangential_speed)
            * f32::min(
                dynamic_friction * contact.lambda_n * state.inverse_delta_time,
                tangential_speed,
            )
    } else {
        Vec3::ZERO
    };

    let restitution = if contact.separating_velocity.abs() > state.restitution_velocity_threshold {
        0.5 * (sides[0].material().restitution + sides[1].material().restitution)
    } else {
        0.0
    };
    let restitution_update = contact.normal
        * (-separating_velocity + f32::max(-restitution * contact.separating_velocity, 0.0));

    let delta_velocity = friction_update + restitution_update;
    if delta_velocity != Vec3::ZERO {
        let inverse_inertia = [
            sides[0].world_inverse_inertia(),
            sides[1].world_inverse_inertia(),
        ];
        let direction = delta_velocity.normalize();
        let w_1 = sides[0].generalized_inverse_mass(inverse_inertia[0], r[0], direction);
        let w_2 = sides[1].generalized_inverse_mass(inverse_inertia[1], r[1], direction);
        let impulse = delta_velocity / (w_1 + w_2);
        sides[0].apply_impulse(inverse_inertia[0], r[0], impulse);
        sides[1].apply_impulse(inverse_inertia[1], r[1], -impulse);
    }
}

/// Positional pass over one chunk of same-colour pairs.
pub(crate) struct PositionSolveTask {
    pub state: *const SolveState,
    pub chunk: SolveChunk,
}

// SAFETY: tasks are only executed while the SolveState they point at is
// alive (the dispatcher blocks on the latch), and chunk disjointness makes
// their writes race-free.
unsafe impl Send for PositionSolveTask {}
unsafe impl Sync for PositionSolveTask {}

impl Task for PositionSolveTask {
    fn run(&self, _worker_index: usize) {
        let state = unsafe { &*self.state };
        for i in 0..self.chunk.len as usize {
            unsafe {
                let pair_index =
                    *state.color_pairs.add(self.chunk.pairs_offset as usize + i);
                let pair = &*state.pairs.add(pair_index as usize);
                let contact =
                    &mut *state.contacts.add(self.chunk.contacts_offset as usize + i);
                solve_pair_position(state, pair, contact);
            }
        }
        state.latch.count_down();
    }
}

/// Velocity pass over one chunk of same-colour pairs.
pub(crate) struct VelocitySolveTask {
    pub state: *const SolveState,
    pub chunk: SolveChunk,
}

// SAFETY: as for PositionSolveTask.
unsafe impl Send for VelocitySolveTask {}
unsafe impl Sync for VelocitySolveTask {}

impl Task for VelocitySolveTask {
    fn run(&self, _worker_index: usize) {
        let state = unsafe { &*self.state };
        for i in 0..self.chunk.len as usize {
            unsafe {
                let pair_index =
                    *state.color_pairs.add(self.chunk.pairs_offset as usize + i);
                let pair = &*state.pairs.add(pair_index as usize);
                let contact = &*state.contacts.add(self.chunk.contacts_offset as usize + i);
                if contact.normal != Vec3::ZERO {
                    solve_pair_velocity(state, pair, contact);
                }
            }
        }
        state.latch.count_down();
    }
}
