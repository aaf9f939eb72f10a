//! Fixed-capacity ring segment with per-slot sequence numbers.
//!
//! # Slot protocol
//!
//! Every slot carries a sequence number that says whose turn it is:
//!
//! - `seq == pos`: empty, a producer holding ticket `pos` may fill it.
//! - `seq == pos + 1`: published, a consumer holding ticket `pos` may take it.
//! - `seq == pos + SEGMENT_CAPACITY`: consumed, re-armed for the next lap.
//!
//! Producers and consumers claim tickets by CAS on `tail`/`head` and only
//! then touch the slot, so two threads never access the same slot at once
//! unless one of them is waiting on the sequence number.
//!
//! # Freezing
//!
//! A segment that the queue has decided to leave behind is frozen by adding
//! `FREEZE_OFFSET` to `tail`. Every later enqueue sees `seq - tail < 0`
//! and reports the segment full, while `tail - FREEZE_OFFSET` still gives
//! the true production count for emptiness checks and `Queue::count`.
//!
//! Segments live in raw blocks owned by the pool; `Segment::init` builds
//! one in place and nothing here runs destructors on its own.

use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::{self, addr_of_mut, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::core::config::BackoffConfig;
use crate::core::pad::CachePadded;
use crate::core::wait::SpinWait;

/// Slots per segment. Must be a power of two.
pub const SEGMENT_CAPACITY: usize = 1024;

/// Added to `tail` when a segment is frozen for enqueues.
pub const FREEZE_OFFSET: usize = SEGMENT_CAPACITY * 2;

const SLOT_MASK: usize = SEGMENT_CAPACITY - 1;

const _: () = assert!(SEGMENT_CAPACITY.is_power_of_two());

#[inline]
fn signed_diff(a: usize, b: usize) -> isize {
    a.wrapping_sub(b) as isize
}

pub struct Slot<T> {
    item: UnsafeCell<MaybeUninit<T>>,
    sequence: AtomicUsize,
}

#[repr(C)]
pub struct Segment<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    frozen_for_enqueues: AtomicBool,
    next: AtomicPtr<Segment<T>>,
    slots: [Slot<T>; SEGMENT_CAPACITY],
}

// Slot contents are handed between threads only through the sequence
// protocol, so a segment is as thread-safe as `T` is sendable.
unsafe impl<T: Send> Send for Segment<T> {}
unsafe impl<T: Send> Sync for Segment<T> {}

impl<T> Segment<T> {
    /// Layout of one segment block.
    pub fn layout() -> Layout {
        Layout::new::<Segment<T>>()
    }

    /// Build a fresh segment inside `block`.
    ///
    /// Every slot's sequence number is set to its own index, both counters
    /// to zero, the frozen flag cleared and the forward link nulled. Item
    /// storage is left uninitialized.
    ///
    /// # Safety
    ///
    /// `block` must be valid for writes of `Segment::<T>::layout()` and
    /// exclusively owned by the caller. Whatever lived there before is
    /// overwritten without being dropped.
    pub unsafe fn init(block: NonNull<u8>) -> NonNull<Segment<T>> {
        let seg = block.as_ptr() as *mut Segment<T>;
        addr_of_mut!((*seg).head).write(CachePadded::new(AtomicUsize::new(0)));
        addr_of_mut!((*seg).tail).write(CachePadded::new(AtomicUsize::new(0)));
        addr_of_mut!((*seg).frozen_for_enqueues).write(AtomicBool::new(false));
        addr_of_mut!((*seg).next).write(AtomicPtr::new(ptr::null_mut()));
        let slots = addr_of_mut!((*seg).slots) as *mut Slot<T>;
        for index in 0..SEGMENT_CAPACITY {
            addr_of_mut!((*slots.add(index)).sequence).write(AtomicUsize::new(index));
        }
        NonNull::new_unchecked(seg)
    }

    /// Try to append `item`. Hands it back if the segment is full or frozen.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let slot = &self.slots[tail & SLOT_MASK];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = signed_diff(sequence, tail);

            if diff == 0 {
                if self
                    .tail
                    .compare_exchange_weak(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    unsafe { (*slot.item.get()).write(item) };
                    slot.sequence
                        .store(tail.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
            } else if diff < 0 {
                // Slot still holds last lap's item, or tail carries the freeze offset.
                return Err(item);
            }
            // Another producer claimed this ticket; reload.
        }
    }

    /// Try to take the oldest item.
    ///
    /// Returns `None` only when the segment is observed empty. If a producer
    /// has claimed a slot but not yet published it, waits for it.
    pub fn try_dequeue(&self, backoff: &BackoffConfig) -> Option<T> {
        let mut spinner = SpinWait::new(backoff);
        loop {
            let head = self.head.load(Ordering::Acquire);
            let slot = &self.slots[head & SLOT_MASK];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = signed_diff(sequence, head.wrapping_add(1));

            if diff == 0 {
                if self
                    .head
                    .compare_exchange_weak(
                        head,
                        head.wrapping_add(1),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    let item = unsafe { (*slot.item.get()).assume_init_read() };
                    slot.sequence
                        .store(head.wrapping_add(SEGMENT_CAPACITY), Ordering::Release);
                    return Some(item);
                }
            } else if diff < 0 {
                if self.observed_empty(head) {
                    return None;
                }
                spinner.spin_once();
            }
        }
    }

    /// Whether an item is available at the head, without taking it.
    pub fn try_peek(&self, backoff: &BackoffConfig) -> bool {
        let mut spinner = SpinWait::new(backoff);
        loop {
            let head = self.head.load(Ordering::Acquire);
            let slot = &self.slots[head & SLOT_MASK];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = signed_diff(sequence, head.wrapping_add(1));

            if diff == 0 {
                return true;
            } else if diff < 0 {
                if self.observed_empty(head) {
                    return false;
                }
                spinner.spin_once();
            }
        }
    }

    fn observed_empty(&self, head: usize) -> bool {
        // Tail before flag: the flag is raised before the offset lands, so a
        // tail carrying the offset always comes with a visible flag, while a
        // raised flag next to a tail without it is treated as not frozen.
        let mut tail = self.tail.load(Ordering::Acquire);
        let frozen = self.frozen_for_enqueues.load(Ordering::Acquire);
        if frozen && signed_diff(tail, head) >= FREEZE_OFFSET as isize {
            tail = tail.wrapping_sub(FREEZE_OFFSET);
        }
        signed_diff(tail, head) <= 0
    }

    /// Permanently stop enqueues into this segment. Idempotent.
    pub fn ensure_frozen_for_enqueues(&self) {
        if !self.frozen_for_enqueues.swap(true, Ordering::AcqRel) {
            self.tail.fetch_add(FREEZE_OFFSET, Ordering::AcqRel);
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_for_enqueues.load(Ordering::Acquire)
    }

    pub fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    pub fn next(&self) -> *mut Segment<T> {
        self.next.load(Ordering::Acquire)
    }

    /// Link the successor. Release so a reader following the link sees an
    /// initialized segment.
    pub fn set_next(&self, next: NonNull<Segment<T>>) {
        self.next.store(next.as_ptr(), Ordering::Release);
    }

    /// Items between a snapshot of `head` and `tail`, accounting for the
    /// freeze offset.
    pub fn count_between(head: usize, tail: usize) -> usize {
        if head == tail || head == tail.wrapping_sub(FREEZE_OFFSET) {
            return 0;
        }
        let head = head & SLOT_MASK;
        let tail = tail & SLOT_MASK;
        if head < tail {
            tail - head
        } else {
            SEGMENT_CAPACITY - head + tail
        }
    }

    /// Drop every item still published in the segment. Returns how many.
    ///
    /// # Safety
    ///
    /// No other thread may access the segment, and every claimed slot must
    /// have been published.
    pub unsafe fn drop_remaining(&self) -> usize {
        let backoff = BackoffConfig::busy_spin();
        let mut dropped = 0;
        while let Some(item) = self.try_dequeue(&backoff) {
            drop(item);
            dropped += 1;
        }
        dropped
    }
}
