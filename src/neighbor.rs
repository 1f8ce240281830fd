//! Neighbor Pairs, Islands and Colour Groups
//!
//! A neighbor pair is a broadphase contact candidate between two objects,
//! canonically ordered particle < rigid body < static body. Pairs are
//! flood-filled into islands (connected components of the contact graph
//! over dynamic objects) and, for awake islands, partitioned into colour
//! classes such that pairs sharing an object never share a colour.

use crate::arena::FixedVec;
use crate::error::PhysicsError;
use crate::storage::{ParticleHandle, RigidBodyHandle};

/// Sentinel colour: pair not yet seen by island building or colouring.
pub const COLOR_UNMARKED: u16 = u16::MAX;
/// Sentinel colour: pair claimed but not yet assigned a concrete colour.
pub const COLOR_MARKED: u16 = u16::MAX - 1;
/// Number of concrete colours (two sentinel values are reserved).
pub const MAX_COLORS: usize = (1 << 16) - 2;

/// The five admissible combinations of object kinds in a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairKind {
    /// Particle vs particle
    ParticleParticle,
    /// Particle vs rigid body (particle stored first)
    ParticleRigidBody,
    /// Particle vs static body (particle stored first)
    ParticleStaticBody,
    /// Rigid body vs rigid body
    RigidBodyRigidBody,
    /// Rigid body vs static body (rigid body stored first)
    RigidBodyStaticBody,
}

/// A contact candidate produced by the broadphase.
#[derive(Clone, Copy, Debug)]
pub struct NeighborPair {
    /// The two object handles, encoded as slot indices and ordered
    /// canonically for the pair kind
    pub objects: [u32; 2],
    /// Which kinds of object the two indices refer to
    pub kind: PairKind,
    /// Colour class, or one of the sentinels
    pub color: u16,
}

impl NeighborPair {
    /// New unmarked pair.
    #[inline]
    pub fn new(objects: [u32; 2], kind: PairKind) -> Self {
        Self {
            objects,
            kind,
            color: COLOR_UNMARKED,
        }
    }

    /// Of the two stored indices, the one that is not `object`. Both
    /// stored objects must be of the same kind for this to be meaningful.
    #[inline]
    pub fn other_object(&self, object: u32) -> u32 {
        self.objects[(self.objects[0] == object) as usize]
    }
}

/// A movable object: exactly a particle or a dynamic rigid body. Static
/// bodies are unrepresentable here by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DynamicObject {
    /// A particle
    Particle(ParticleHandle),
    /// A dynamic rigid body
    RigidBody(RigidBodyHandle),
}

/// One island: contiguous ranges into the flat object and pair-index lists.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeighborGroup {
    /// First object of this group in the flat object list
    pub objects_begin: u32,
    /// One past the last object of this group
    pub objects_end: u32,
    /// First pair index of this group in the flat pair-index list
    pub pairs_begin: u32,
    /// One past the last pair index of this group
    pub pairs_end: u32,
}

/// Flood-fill output: disjoint islands over the per-frame contact graph.
pub struct NeighborGroupStorage {
    objects: FixedVec<DynamicObject>,
    pairs: FixedVec<u32>,
    groups: FixedVec<NeighborGroup>,
}

impl NeighborGroupStorage {
    /// Reserve storage for the configured maxima.
    pub fn new(max_objects: usize, max_pairs: usize, max_groups: usize) -> Self {
        Self {
            objects: FixedVec::new(max_objects, "neighbor group objects"),
            pairs: FixedVec::new(max_pairs, "neighbor group pairs"),
            groups: FixedVec::new(max_groups, "neighbor groups"),
        }
    }

    /// Forget all groups; capacity is retained.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.pairs.clear();
        self.groups.clear();
    }

    /// Open a new group ending at the current list tails.
    pub fn begin_group(&mut self) -> Result<(), PhysicsError> {
        let objects = self.objects.len() as u32;
        let pairs = self.pairs.len() as u32;
        self.groups.push(NeighborGroup {
            objects_begin: objects,
            objects_end: objects,
            pairs_begin: pairs,
            pairs_end: pairs,
        })
    }

    /// Append an object to the currently open group.
    pub fn add_object(&mut self, object: DynamicObject) -> Result<(), PhysicsError> {
        self.objects.push(object)?;
        self.groups.last_mut().expect("no open group").objects_end += 1;
        Ok(())
    }

    /// Append a pair index to the currently open group.
    pub fn add_pair(&mut self, pair_index: u32) -> Result<(), PhysicsError> {
        self.pairs.push(pair_index)?;
        self.groups.last_mut().expect("no open group").pairs_end += 1;
        Ok(())
    }

    /// Total number of objects across all groups.
    #[inline]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Object at a flat index.
    #[inline]
    pub fn object(&self, index: usize) -> DynamicObject {
        self.objects[index]
    }

    /// Pair index at a flat index.
    #[inline]
    pub fn pair(&self, index: usize) -> u32 {
        self.pairs[index]
    }

    /// Number of groups found this frame.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Group descriptor.
    #[inline]
    pub fn group(&self, index: usize) -> NeighborGroup {
        self.groups[index]
    }
}

#[derive(Clone, Copy, Default)]
struct ColorSpan {
    begin: u32,
    end: u32,
}

/// Colour-major re-indexing of all awake islands' pairs. Colours are used
/// densely from zero; the first empty colour terminates iteration.
pub struct ColorGroupStorage {
    pairs: FixedVec<u32>,
    groups: Box<[ColorSpan]>,
}

impl ColorGroupStorage {
    /// Reserve storage for at most `max_pairs` pair indices.
    pub fn new(max_pairs: usize) -> Self {
        Self {
            pairs: FixedVec::new(max_pairs, "color group pairs"),
            groups: vec![ColorSpan::default(); MAX_COLORS].into_boxed_slice(),
        }
    }

    /// Forget all colour groups; capacity is retained.
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.groups.fill(ColorSpan::default());
    }

    /// Account one pair for `color` ahead of [`reserve`](Self::reserve).
    #[inline]
    pub fn count(&mut self, color: u16) {
        self.groups[color as usize].end += 1;
    }

    /// Lay out contiguous ranges for every counted colour.
    pub fn reserve(&mut self) -> Result<(), PhysicsError> {
        let mut total = 0u32;
        for group in self.groups.iter_mut() {
            if group.end == 0 {
                break;
            }
            let count = group.end;
            group.begin = total;
            group.end = total;
            total += count;
        }
        self.pairs.resize(total as usize, 0)
    }

    /// Append a pair index to its colour's range.
    #[inline]
    pub fn push(&mut self, pair_index: u32, color: u16) {
        let group = &mut self.groups[color as usize];
        self.pairs[group.end as usize] = pair_index;
        group.end += 1;
    }

    /// Pair indices of one colour.
    #[inline]
    pub fn group(&self, color: u16) -> &[u32] {
        let span = self.groups[color as usize];
        &self.pairs[span.begin as usize..span.end as usize]
    }

    /// Offset of one colour's range in the flat pair-index array.
    #[inline]
    pub fn group_begin(&self, color: u16) -> usize {
        self.groups[color as usize].begin as usize
    }

    /// Base pointer of the flat pair-index array, for the solver tasks.
    #[inline]
    pub(crate) fn pairs_ptr(&self) -> *const u32 {
        self.pairs.as_ptr()
    }
}
