//! Bounded recycler for segment memory.
//!
//! A block is owned by exactly one of: the caller that rented it, the
//! free-list, or nobody (freed). `rent` pops the free-list before touching
//! the allocator; `return_block` pushes while the list is below
//! `max_free_segments` and frees otherwise, which bounds the memory a
//! once-large queue keeps after shrinking.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::alloc::{aligned_layout, Allocator};
use crate::core::config::{OomPolicy, PoolConfig};
use crate::core::segment::Segment;
use crate::core::{Error, Result};

/// Counters describing pool traffic since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Blocks obtained from the allocator.
    pub allocated: u64,
    /// Rents served from the free-list.
    pub recycled: u64,
    /// Blocks pushed back onto the free-list.
    pub returned: u64,
    /// Blocks handed back to the allocator.
    pub freed: u64,
    /// Blocks on the free-list right now.
    pub free_now: usize,
}

pub struct SegmentPool {
    layout: Layout,
    max_free: usize,
    zero_fresh: bool,
    oom_policy: OomPolicy,
    allocator: Arc<dyn Allocator>,
    free: Mutex<Vec<NonNull<u8>>>,
    allocated: AtomicU64,
    recycled: AtomicU64,
    returned: AtomicU64,
    freed: AtomicU64,
}

// The free-list only holds blocks nobody else references.
unsafe impl Send for SegmentPool {}
unsafe impl Sync for SegmentPool {}

impl SegmentPool {
    /// Pool of blocks shaped for `Segment<T>`.
    pub fn for_segments<T>(config: &PoolConfig, allocator: Arc<dyn Allocator>) -> Result<Self> {
        Self::new(Segment::<T>::layout(), config, allocator)
    }

    pub fn new(layout: Layout, config: &PoolConfig, allocator: Arc<dyn Allocator>) -> Result<Self> {
        aligned_layout(layout)?;
        Ok(Self {
            layout,
            max_free: config.max_free_segments,
            zero_fresh: config.zero_fresh_blocks,
            oom_policy: config.oom_policy,
            allocator,
            free: Mutex::new(Vec::with_capacity(config.max_free_segments)),
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        })
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<NonNull<u8>>> {
        // No critical section can leave the list half-updated.
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Size and alignment of every block.
    pub fn stride(&self) -> Layout {
        self.layout
    }

    pub fn max_free(&self) -> usize {
        self.max_free
    }

    pub fn free_count(&self) -> usize {
        self.free_list().len()
    }

    pub fn allocator_name(&self) -> &'static str {
        self.allocator.name()
    }

    /// Take a block, reusing a retired one when available.
    ///
    /// The block's contents are unspecified; callers initialize it.
    pub fn rent(&self) -> Result<NonNull<u8>> {
        if let Some(block) = self.free_list().pop() {
            self.recycled.fetch_add(1, Ordering::Relaxed);
            log::trace!("segment pool: recycled block {:p}", block);
            return Ok(block);
        }
        self.allocate()
    }

    fn allocate(&self) -> Result<NonNull<u8>> {
        let result = if self.zero_fresh {
            self.allocator.alloc_zeroed(self.layout)
        } else {
            self.allocator.alloc(self.layout)
        };
        match result {
            Ok(block) => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                log::trace!("segment pool: allocated block {:p}", block);
                Ok(block)
            }
            Err(err @ Error::OutOfMemory { .. }) => {
                log::warn!(
                    "segment pool: {} allocator failed for {} bytes",
                    self.allocator.name(),
                    self.layout.size()
                );
                if self.oom_policy == OomPolicy::Abort {
                    std::alloc::handle_alloc_error(self.layout);
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Give a block back. Kept for reuse while the free-list has room.
    ///
    /// # Safety
    ///
    /// `block` must come from `rent` on this pool, and the caller must not
    /// touch it afterwards. Any values still stored in it are not dropped.
    pub unsafe fn return_block(&self, block: NonNull<u8>) {
        {
            let mut free = self.free_list();
            if free.len() < self.max_free {
                free.push(block);
                self.returned.fetch_add(1, Ordering::Relaxed);
                log::trace!("segment pool: kept block {:p}", block);
                return;
            }
        }
        self.allocator.free(block, self.layout);
        self.freed.fetch_add(1, Ordering::Relaxed);
        log::trace!("segment pool: freed block {:p}", block);
    }

    /// Fill the free-list with up to `count` fresh blocks. Returns how many
    /// were added; stops at `max_free` or at the first allocation failure.
    pub fn prewarm(&self, count: usize) -> Result<usize> {
        let mut added = 0;
        while added < count && self.free_count() < self.max_free {
            let block = self.allocate()?;
            unsafe { self.return_block(block) };
            added += 1;
        }
        Ok(added)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            free_now: self.free_count(),
        }
    }
}

impl Drop for SegmentPool {
    fn drop(&mut self) {
        let free = std::mem::take(self.free.get_mut().unwrap_or_else(PoisonError::into_inner));
        for block in free {
            unsafe { self.allocator.free(block, self.layout) };
        }
    }
}
