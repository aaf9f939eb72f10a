//! Unbounded MPMC queue over a chain of segments.
//!
//! Producers append to the tail segment and consumers take from the head
//! segment without locking. The cross-segment lock is only taken when the
//! tail segment fills up (freeze it, link a fresh one) or the head segment
//! is drained while a successor exists (advance past it), i.e. about once
//! per `SEGMENT_CAPACITY` operations.
//!
//! Segment pointers are read without the lock, so every operation runs
//! inside an epoch pin and retired segments reach the pool only after all
//! threads pinned at retirement time have unpinned. A segment therefore
//! cannot be recycled, and its address cannot reappear as a new head or
//! tail, while anyone may still be looking at it.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_epoch::{self as epoch, Guard};

use crate::core::alloc::{Allocator, SystemAllocator};
use crate::core::config::{BackoffConfig, QueueConfig};
use crate::core::pad::CachePadded;
use crate::core::pool::{PoolStats, SegmentPool};
use crate::core::segment::{Segment, FREEZE_OFFSET, SEGMENT_CAPACITY};
use crate::core::wait::SpinWait;
use crate::core::{EnqueueError, Result};

pub struct Queue<T: Send + 'static> {
    head: CachePadded<AtomicPtr<Segment<T>>>,
    tail: CachePadded<AtomicPtr<Segment<T>>>,
    cross_segment_lock: Mutex<()>,
    pool: Arc<SegmentPool>,
    backoff: BackoffConfig,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + 'static> Send for Queue<T> {}
unsafe impl<T: Send + 'static> Sync for Queue<T> {}

/// A segment unlinked from the chain, waiting for its epoch to expire.
struct Retired<T> {
    segment: NonNull<Segment<T>>,
    pool: Arc<SegmentPool>,
}

unsafe impl<T: Send> Send for Retired<T> {}

impl<T> Retired<T> {
    /// # Safety
    ///
    /// No thread may still reference the segment.
    unsafe fn reclaim(self) {
        let dropped = self.segment.as_ref().drop_remaining();
        if dropped > 0 {
            log::trace!("queue: dropped {} items with retired segment", dropped);
        }
        self.pool.return_block(self.segment.cast());
    }
}

impl<T: Send + 'static> Queue<T> {
    pub fn new() -> Result<Self> {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        Self::with_allocator(config, Arc::new(SystemAllocator))
    }

    pub fn with_allocator(config: QueueConfig, allocator: Arc<dyn Allocator>) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(SegmentPool::for_segments::<T>(&config.pool, allocator)?);

        let first = unsafe { Segment::<T>::init(pool.rent()?) };

        let wanted = config
            .initial_capacity_hint
            .div_ceil(SEGMENT_CAPACITY)
            .saturating_sub(1);
        if wanted > 0 {
            match pool.prewarm(wanted) {
                Ok(added) => log::debug!(
                    "queue: prewarmed {} of {} segments ({} allocator)",
                    added,
                    wanted,
                    pool.allocator_name()
                ),
                Err(err) => {
                    unsafe { pool.return_block(first.cast()) };
                    return Err(err);
                }
            }
        }

        Ok(Self {
            head: CachePadded::new(AtomicPtr::new(first.as_ptr())),
            tail: CachePadded::new(AtomicPtr::new(first.as_ptr())),
            cross_segment_lock: Mutex::new(()),
            pool,
            backoff: config.backoff,
            _marker: PhantomData,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // Guards no data of its own; a panicking holder leaves pointers intact.
        self.cross_segment_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn new_segment(&self) -> Result<NonNull<Segment<T>>> {
        let block = self.pool.rent()?;
        Ok(unsafe { Segment::init(block) })
    }

    /// Hand `segment` to the pool once no pinned thread can observe it.
    fn retire(&self, segment: *mut Segment<T>, guard: &Guard) {
        let Some(segment) = NonNull::new(segment) else {
            return;
        };
        let retired = Retired {
            segment,
            pool: Arc::clone(&self.pool),
        };
        guard.defer(move || unsafe { retired.reclaim() });
        guard.flush();
    }

    /// Append `item` at the tail.
    ///
    /// Only fails when a new segment is needed and cannot be allocated; the
    /// item is then returned inside the error and the queue is unchanged.
    pub fn enqueue(&self, item: T) -> std::result::Result<(), EnqueueError<T>> {
        let guard = epoch::pin();
        let tail = unsafe { &*self.tail.load(Ordering::Acquire) };
        match tail.try_enqueue(item) {
            Ok(()) => Ok(()),
            Err(item) => self.enqueue_slow(item, &guard),
        }
    }

    fn enqueue_slow(&self, mut item: T, _guard: &Guard) -> std::result::Result<(), EnqueueError<T>> {
        loop {
            let tail_ptr = self.tail.load(Ordering::Acquire);
            let tail = unsafe { &*tail_ptr };
            item = match tail.try_enqueue(item) {
                Ok(()) => return Ok(()),
                Err(item) => item,
            };

            let _lock = self.lock();
            if self.tail.load(Ordering::Acquire) != tail_ptr {
                // Someone else already grew the chain.
                continue;
            }
            let next = match self.new_segment() {
                Ok(next) => next,
                Err(source) => return Err(EnqueueError { item, source }),
            };
            tail.ensure_frozen_for_enqueues();
            tail.set_next(next);
            self.tail.store(next.as_ptr(), Ordering::Release);
            log::debug!("queue: linked segment {:p} after {:p}", next, tail_ptr);
        }
    }

    /// Append every item in order. Stops at the first allocation failure.
    pub fn enqueue_many<I>(&self, items: I) -> std::result::Result<usize, EnqueueError<T>>
    where
        I: IntoIterator<Item = T>,
    {
        let mut count = 0;
        for item in items {
            self.enqueue(item)?;
            count += 1;
        }
        Ok(count)
    }

    /// Take the oldest item, or `None` if the queue was observed empty.
    pub fn try_dequeue(&self) -> Option<T> {
        let guard = epoch::pin();
        let head = unsafe { &*self.head.load(Ordering::Acquire) };
        if let Some(item) = head.try_dequeue(&self.backoff) {
            return Some(item);
        }
        if head.next().is_null() {
            return None;
        }
        self.try_dequeue_slow(&guard)
    }

    fn try_dequeue_slow(&self, guard: &Guard) -> Option<T> {
        loop {
            let head_ptr = self.head.load(Ordering::Acquire);
            let head = unsafe { &*head_ptr };
            if let Some(item) = head.try_dequeue(&self.backoff) {
                return Some(item);
            }

            let next = head.next();
            if next.is_null() {
                return None;
            }

            // A successor means head is frozen, so once it reads empty here
            // it stays empty.
            if let Some(item) = head.try_dequeue(&self.backoff) {
                return Some(item);
            }

            let _lock = self.lock();
            if self.head.load(Ordering::Acquire) == head_ptr {
                self.head.store(next, Ordering::Release);
                self.retire(head_ptr, guard);
                log::debug!("queue: retired head segment {:p}", head_ptr);
            }
        }
    }

    /// Iterator that dequeues until the queue is observed empty.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain { queue: self }
    }

    /// Advisory emptiness check; may be stale by the time it returns.
    pub fn is_empty(&self) -> bool {
        let _guard = epoch::pin();
        let mut segment = self.head.load(Ordering::Acquire);
        while let Some(seg) = unsafe { segment.as_ref() } {
            if seg.try_peek(&self.backoff) {
                return false;
            }
            segment = seg.next();
        }
        true
    }

    /// Number of items in the queue.
    ///
    /// Exact when no other thread is mutating the queue; otherwise a value
    /// the queue held at some point during the call, approximately.
    pub fn count(&self) -> usize {
        let _guard = epoch::pin();
        let mut spinner = SpinWait::new(&self.backoff);
        loop {
            let head_ptr = self.head.load(Ordering::Acquire);
            let tail_ptr = self.tail.load(Ordering::Acquire);
            let head = unsafe { &*head_ptr };
            let head_head = head.head();
            let head_tail = head.tail();

            let pointers_stable = || {
                self.head.load(Ordering::Acquire) == head_ptr
                    && self.tail.load(Ordering::Acquire) == tail_ptr
            };
            let head_stable = || head.head() == head_head && head.tail() == head_tail;

            if head_ptr == tail_ptr {
                if pointers_stable() && head_stable() {
                    return Segment::<T>::count_between(head_head, head_tail);
                }
            } else if head.next() == tail_ptr {
                let tail = unsafe { &*tail_ptr };
                let tail_head = tail.head();
                let tail_tail = tail.tail();
                if pointers_stable()
                    && head_stable()
                    && tail.head() == tail_head
                    && tail.tail() == tail_tail
                {
                    return Segment::<T>::count_between(head_head, head_tail)
                        + Segment::<T>::count_between(tail_head, tail_tail);
                }
            } else {
                // Interior segments only change under the lock.
                let _lock = self.lock();
                if pointers_stable() {
                    let tail = unsafe { &*tail_ptr };
                    let tail_head = tail.head();
                    let tail_tail = tail.tail();
                    if head_stable() {
                        let mut count = Segment::<T>::count_between(head_head, head_tail)
                            + Segment::<T>::count_between(tail_head, tail_tail);
                        let mut segment = head.next();
                        while segment != tail_ptr {
                            let seg = unsafe { &*segment };
                            count += seg
                                .tail()
                                .wrapping_sub(FREEZE_OFFSET)
                                .wrapping_sub(seg.head());
                            segment = seg.next();
                        }
                        return count;
                    }
                }
            }
            spinner.spin_no_sleep();
        }
    }

    /// Drop every item and shrink back to a single fresh segment.
    ///
    /// The replacement segment is rented before anything is touched, so an
    /// allocation failure leaves the queue as it was.
    pub fn clear(&self) -> Result<()> {
        let guard = epoch::pin();
        let _lock = self.lock();
        let fresh = self.new_segment()?;

        let old_tail = self.tail.load(Ordering::Acquire);
        let tail = unsafe { &*old_tail };
        tail.ensure_frozen_for_enqueues();
        let old_head = self.head.swap(fresh.as_ptr(), Ordering::AcqRel);
        self.tail.store(fresh.as_ptr(), Ordering::Release);

        let mut segment = old_head;
        let mut retired = 0;
        loop {
            let next = unsafe { &*segment }.next();
            self.retire(segment, &guard);
            retired += 1;
            if segment == old_tail {
                break;
            }
            segment = next;
        }
        log::debug!("queue: cleared, retired {} segments", retired);
        Ok(())
    }

    /// Live segments in the chain.
    pub fn segment_count(&self) -> usize {
        let _guard = epoch::pin();
        let _lock = self.lock();
        let tail = self.tail.load(Ordering::Acquire);
        let mut segment = self.head.load(Ordering::Acquire);
        let mut count = 1;
        while segment != tail {
            segment = unsafe { &*segment }.next();
            count += 1;
        }
        count
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }
}

impl<T: Send + 'static> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("count", &self.count())
            .field("segments", &self.segment_count())
            .field("pool", &self.pool.stats())
            .finish()
    }
}

impl<T: Send + 'static> Drop for Queue<T> {
    fn drop(&mut self) {
        let mut segment = *self.head.get_mut();
        while let Some(seg) = NonNull::new(segment) {
            unsafe {
                let next = seg.as_ref().next();
                seg.as_ref().drop_remaining();
                self.pool.return_block(seg.cast());
                segment = next;
            }
        }
    }
}

pub struct Drain<'a, T: Send + 'static> {
    queue: &'a Queue<T>,
}

impl<T: Send + 'static> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.try_dequeue()
    }
}
