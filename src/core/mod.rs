//! Segmented lock-free queue and the pieces it is built from.
//!
//! Leaves first: `alloc` supplies aligned blocks, `pool` recycles them,
//! `segment` implements the per-slot protocol, and `queue` chains segments
//! into an unbounded FIFO.

pub mod alloc;
pub mod config;
pub mod error;
pub mod pad;
pub mod pool;
pub mod queue;
pub mod segment;
pub mod wait;

#[cfg(unix)]
pub use alloc::LibcAllocator;
pub use alloc::{Allocator, SystemAllocator};
pub use config::{BackoffConfig, OomPolicy, PoolConfig, QueueConfig};
pub use error::{EnqueueError, Error, Result};
pub use pad::{CachePadded, CACHE_LINE_SIZE};
pub use pool::{PoolStats, SegmentPool};
pub use queue::{Drain, Queue};
pub use segment::{Segment, FREEZE_OFFSET, SEGMENT_CAPACITY};
pub use wait::SpinWait;
