//! Collision Filtering
//!
//! Bitmask-based filtering for controlling which objects may produce
//! neighbor pairs. Two objects can collide iff
//! `(a.layer & b.mask) != 0 && (b.layer & a.mask) != 0`.

/// Layer/mask collision filter carried by every object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CollisionFilter {
    /// Which layer(s) this object belongs to (bitmask)
    pub layer: u32,
    /// Which layers this object can collide with (bitmask)
    pub mask: u32,
}

impl CollisionFilter {
    /// Layer 1, collides with everything.
    pub const DEFAULT: Self = Self {
        layer: 1,
        mask: u32::MAX,
    };

    /// Collides with nothing.
    pub const NONE: Self = Self { layer: 0, mask: 0 };

    /// Create a filter from a layer and mask.
    #[inline]
    pub const fn new(layer: u32, mask: u32) -> Self {
        Self { layer, mask }
    }

    /// Bidirectional layer/mask check.
    #[inline]
    pub fn can_collide(a: &Self, b: &Self) -> bool {
        (a.layer & b.mask) != 0 && (b.layer & a.mask) != 0
    }
}

impl Default for CollisionFilter {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_collides_with_default() {
        let a = CollisionFilter::default();
        let b = CollisionFilter::default();
        assert!(CollisionFilter::can_collide(&a, &b));
    }

    #[test]
    fn test_filter_is_bidirectional() {
        // a can see b, but b cannot see a: no collision either way.
        let a = CollisionFilter::new(1 << 0, 1 << 1);
        let b = CollisionFilter::new(1 << 1, 0);
        assert!(!CollisionFilter::can_collide(&a, &b));
        assert!(!CollisionFilter::can_collide(&b, &a));
    }

    #[test]
    fn test_none_never_collides() {
        let ghost = CollisionFilter::NONE;
        assert!(!CollisionFilter::can_collide(
            &ghost,
            &CollisionFilter::DEFAULT
        ));
    }
}
