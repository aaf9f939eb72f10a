#![allow(dead_code)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use segq::{Allocator, Error, Result, SystemAllocator};

/// Counts live blocks and refuses to allocate once `budget` runs out.
pub struct BudgetAllocator {
    live: AtomicUsize,
    total: AtomicUsize,
    budget: AtomicUsize,
}

impl BudgetAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            live: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            budget: AtomicUsize::new(budget),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn refill(&self, budget: usize) {
        self.budget.store(budget, Ordering::Release);
    }
}

unsafe impl Allocator for BudgetAllocator {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        let granted = self
            .budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(Error::OutOfMemory {
                size: layout.size(),
                align: layout.align(),
            });
        }
        let block = SystemAllocator.alloc(layout)?;
        self.live.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
        Ok(block)
    }

    fn alloc_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        let block = self.alloc(layout)?;
        unsafe { std::ptr::write_bytes(block.as_ptr(), 0, layout.size()) };
        Ok(block)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        SystemAllocator.free(ptr, layout);
    }

    fn name(&self) -> &'static str {
        "budget"
    }
}

/// Counts drops so tests can check every item is released exactly once.
pub struct Tracked {
    pub value: u64,
    drops: Arc<AtomicUsize>,
}

impl Tracked {
    pub fn new(value: u64, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            value,
            drops: Arc::clone(drops),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::AcqRel);
    }
}

/// Push retired segments through reclamation until `done` holds.
pub fn settle_epochs(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        crossbeam_epoch::pin().flush();
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
