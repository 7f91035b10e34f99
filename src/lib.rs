//! # Tallycake
//! Cluster aware fan-out/fan-in statistics over a set of cached workers.
//!
//! This is a convenience package which includes all of the sub-projects within
//! Tallycake:
//!
//! ### Features
//! - `tallycake_node` - Cluster membership tracking and the versioned routing table.
//! - `tallycake_stats` - The statistics service, its worker pool and aggregation jobs.

#[cfg(feature = "tallycake-node")]
pub use tallycake_node as node;
#[cfg(feature = "tallycake-stats")]
pub use tallycake_stats as stats;
