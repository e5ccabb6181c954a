//! Pipeline statistics.
//!
//! Counters are updated lock-free by the pipeline threads and read by the
//! CLI and HTTP surfaces.

pub mod counters;

// Re-export commonly used types
pub use counters::{
    create_shared_stats, create_shared_stats_with_persistence, PipelineStats, SharedStats,
    StatsSnapshot,
};
