//! Iteration engine
//!
//! Enumerates the entity ids matching a result tree without materializing
//! any bitmap:
//!
//! - `HierarchyWalker`: the lock-step state machine over top, leaf and word
//! - `EntityIds`: pull iterator holding a read token for its lifetime
//! - `ParallelIds`: the same ids, evaluated per mid segment on a worker pool
//! - `Resolved`: maps ids to entities and skips absent ones

mod iter;
mod parallel;
mod range;
mod registry;
mod walker;

pub use iter::{EntityIds, Resolved};
pub use parallel::ParallelIds;
pub use range::IdRange;
pub use registry::{ClaimRegistry, SlotState, GROUP_SLOTS};
pub use walker::{HierarchyWalker, SegmentWord};
