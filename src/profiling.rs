//! Per-Frame Statistics
//!
//! Plain counters describing the work done by the most recent `simulate`
//! call. Cheap enough to fill unconditionally; emitted at debug level and
//! queryable through [`World::last_step_stats`](crate::World::last_step_stats).

/// Counters for one `simulate` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Neighbor pairs produced by the broadphase
    pub neighbor_pairs: u32,
    /// Islands found by the contact-graph flood fill
    pub islands: u32,
    /// Islands that took part in solving
    pub awake_islands: u32,
    /// Distinct colours used across all awake islands
    pub colors: u32,
    /// Solver chunks dispatched per pass
    pub solve_chunks: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_zeroed() {
        let stats = StepStats::default();
        assert_eq!(stats.neighbor_pairs, 0);
        assert_eq!(stats.colors, 0);
    }
}
