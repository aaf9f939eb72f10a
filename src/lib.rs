//! Off-heap segmented lock-free MPMC queue.
//!
//! Items live in fixed-capacity segments carved from an injected
//! allocator. Producers and consumers move through each segment with a
//! CAS on a ticket counter plus a per-slot sequence number; segments are
//! chained when the tail fills and recycled through a bounded pool when
//! the head drains.
//!
//! ```
//! use segq::Queue;
//!
//! let queue = Queue::new()?;
//! queue.enqueue(1).map_err(|e| e.source)?;
//! queue.enqueue(2).map_err(|e| e.source)?;
//! assert_eq!(queue.count(), 2);
//! assert_eq!(queue.try_dequeue(), Some(1));
//! assert_eq!(queue.try_dequeue(), Some(2));
//! assert!(queue.is_empty());
//! # Ok::<(), segq::Error>(())
//! ```

pub mod core;

pub use crate::core::{
    Allocator, BackoffConfig, Drain, EnqueueError, Error, OomPolicy, PoolConfig, PoolStats, Queue,
    QueueConfig, Result, SegmentPool, SystemAllocator, SEGMENT_CAPACITY,
};

#[cfg(unix)]
pub use crate::core::LibcAllocator;
