//! Physics Error Types
//!
//! Unified error type for the engine. Creation calls fail before any partial
//! mutation; errors raised inside [`World::simulate`](crate::World::simulate)
//! abort the current frame and leave object state where the last successful
//! substep placed it. The engine never retries on its own.

use thiserror::Error;

/// Unified error type for physics operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PhysicsError {
    /// A pool or per-frame arena push exceeded its declared maximum.
    #[error("{resource} capacity exceeded (limit={limit})")]
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The configured maximum that was exceeded
        limit: usize,
    },
    /// Graph colouring needed more than the representable number of colours.
    #[error("contact graph colouring needs more than {max} colors")]
    ColoringExhausted {
        /// The number of concrete colours available
        max: usize,
    },
    /// A handle referred to a destroyed or never-created object.
    ///
    /// Hot-path lookups are debug-checked (they panic with a description)
    /// rather than returning this; the checked destruction entry points
    /// ([`World::try_destroy_particle`](crate::World::try_destroy_particle)
    /// and its rigid/static counterparts) return it for stale handles.
    #[error("{kind} handle {index} does not refer to a live object")]
    InvalidHandle {
        /// The storage the handle belongs to
        kind: &'static str,
        /// The 32-bit slot index carried by the handle
        index: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PhysicsError::CapacityExceeded {
            resource: "particles",
            limit: 64,
        };
        let s = format!("{}", e);
        assert!(s.contains("particles"));
        assert!(s.contains("64"));
    }

    #[test]
    fn test_error_variants_distinct() {
        let e1 = PhysicsError::ColoringExhausted { max: 65534 };
        let e2 = PhysicsError::InvalidHandle {
            kind: "rigid body",
            index: 3,
        };
        assert_ne!(e1, e2);
        assert!(format!("{}", e2).contains("rigid body"));
    }
}
