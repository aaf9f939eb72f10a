//! Queue configuration.
//!
//! Defines the tuning knobs for the segment pool, the allocation failure
//! policy and the spin-wait backoff used on contended paths.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Default number of retired segments kept for reuse.
pub const DEFAULT_MAX_FREE_SEGMENTS: usize = 8;

/// What to do when the allocator cannot supply a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OomPolicy {
    /// Surface `Error::OutOfMemory` to the caller that needed the segment.
    #[default]
    Error,
    /// Abort the process through `std::alloc::handle_alloc_error`.
    Abort,
}

/// Configuration for the segment pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Upper bound on retired segments held on the free-list.
    /// Segments returned beyond this bound are freed immediately.
    /// Default: 8
    pub max_free_segments: usize,

    /// Request zeroed memory for freshly allocated segment blocks.
    /// Default: false
    pub zero_fresh_blocks: bool,

    /// Default: `OomPolicy::Error`
    pub oom_policy: OomPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_free_segments: DEFAULT_MAX_FREE_SEGMENTS,
            zero_fresh_blocks: false,
            oom_policy: OomPolicy::default(),
        }
    }
}

/// Configuration for `SpinWait`.
///
/// Step `n` busy-spins `2^min(n, spin_limit)` times while `n < yield_limit`,
/// then yields the thread, and every tenth step past `yield_limit` sleeps
/// for `sleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackoffConfig {
    /// Default: 6 (at most 64 spin hints per step)
    pub spin_limit: u32,
    /// Default: 10
    pub yield_limit: u32,
    /// Default: 50µs
    pub sleep: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_limit: 6,
            yield_limit: 10,
            sleep: Duration::from_micros(50),
        }
    }
}

impl BackoffConfig {
    /// Never leaves the spin phase. Only useful when every thread owns a core.
    pub fn busy_spin() -> Self {
        Self {
            spin_limit: 6,
            yield_limit: u32::MAX,
            sleep: Duration::ZERO,
        }
    }
}

/// Top-level queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueueConfig {
    /// Number of items the queue should hold without touching the allocator.
    /// Segments beyond the first are pre-allocated onto the pool free-list,
    /// capped by `pool.max_free_segments`.
    /// Default: 0
    #[cfg_attr(feature = "serde", serde(default))]
    pub initial_capacity_hint: usize,

    #[cfg_attr(feature = "serde", serde(default))]
    pub pool: PoolConfig,

    #[cfg_attr(feature = "serde", serde(default))]
    pub backoff: BackoffConfig,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backoff.spin_limit > 16 {
            return Err(Error::InvalidConfig("backoff spin_limit above 16"));
        }
        if self.backoff.yield_limit == 0 {
            return Err(Error::InvalidConfig("backoff yield_limit must be non-zero"));
        }
        Ok(())
    }
}
