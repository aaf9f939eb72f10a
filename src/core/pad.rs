use std::ops::{Deref, DerefMut};

/// Width of the false-sharing unit assumed on this target.
///
/// x86_64 and aarch64 prefetch cache lines in adjacent pairs, so two hot
/// atomics need 128 bytes between them to stay independent.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"))]
pub const CACHE_LINE_SIZE: usize = 128;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Pads and aligns a value to `CACHE_LINE_SIZE`.
///
/// Placing two counters in separate `CachePadded` fields guarantees a
/// full line between them, and the trailing padding keeps the next field
/// of the enclosing struct off the same line.
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"),
    repr(C, align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")),
    repr(C, align(64))
)]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};
    use std::sync::atomic::AtomicUsize;

    #[repr(C)]
    struct Counters {
        head: CachePadded<AtomicUsize>,
        tail: CachePadded<AtomicUsize>,
    }

    #[test]
    fn padded_counters_do_not_share_a_line() {
        assert_eq!(align_of::<CachePadded<AtomicUsize>>(), CACHE_LINE_SIZE);
        assert_eq!(size_of::<CachePadded<AtomicUsize>>(), CACHE_LINE_SIZE);

        let counters = Counters {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        };
        let head = &*counters.head as *const AtomicUsize as usize;
        let tail = &*counters.tail as *const AtomicUsize as usize;
        assert!(tail - head >= CACHE_LINE_SIZE);
    }
}
