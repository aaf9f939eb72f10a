//! Raw aligned memory for segment blocks.
//!
//! The queue never touches the global heap directly: every segment block
//! comes from an `Allocator` injected at construction. Backends pad the
//! requested alignment up to a full cache line.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::core::pad::CACHE_LINE_SIZE;
use crate::core::{Error, Result};

/// Source of aligned memory blocks.
///
/// # Safety
///
/// `alloc` and `alloc_zeroed` must return a block valid for reads and writes
/// of `layout.size()` bytes, aligned to at least `layout.align()`, and not
/// aliased by any other live block. `free` must accept every pointer handed
/// out by the same allocator together with the layout it was requested with.
pub unsafe trait Allocator: Send + Sync {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>>;

    fn alloc_zeroed(&self, layout: Layout) -> Result<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from `alloc`/`alloc_zeroed` on this allocator with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);

    fn name(&self) -> &'static str;
}

/// Round the alignment of `layout` up to `CACHE_LINE_SIZE`.
pub fn aligned_layout(layout: Layout) -> Result<Layout> {
    if layout.size() == 0 {
        return Err(Error::InvalidLayout("zero-sized block"));
    }
    let align = layout.align().max(CACHE_LINE_SIZE);
    Layout::from_size_align(layout.size(), align)
        .map(|l| l.pad_to_align())
        .map_err(|_| Error::InvalidLayout("block size overflows with alignment padding"))
}

fn out_of_memory(layout: Layout) -> Error {
    Error::OutOfMemory {
        size: layout.size(),
        align: layout.align(),
    }
}

/// Backend over `std::alloc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

unsafe impl Allocator for SystemAllocator {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        let layout = aligned_layout(layout)?;
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| out_of_memory(layout))
    }

    fn alloc_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        let layout = aligned_layout(layout)?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| out_of_memory(layout))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // `alloc` already validated this layout.
        if let Ok(layout) = aligned_layout(layout) {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Backend over `posix_memalign`/`free`.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcAllocator;

#[cfg(unix)]
unsafe impl Allocator for LibcAllocator {
    fn alloc(&self, layout: Layout) -> Result<NonNull<u8>> {
        let layout = aligned_layout(layout)?;
        let mut ptr: *mut libc::c_void = std::ptr::null_mut();
        let rc = unsafe { libc::posix_memalign(&mut ptr, layout.align(), layout.size()) };
        if rc != 0 {
            return Err(out_of_memory(layout));
        }
        NonNull::new(ptr as *mut u8).ok_or_else(|| out_of_memory(layout))
    }

    fn alloc_zeroed(&self, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = self.alloc(layout)?;
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size()) };
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _layout: Layout) {
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }

    fn name(&self) -> &'static str {
        "libc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(allocator: &dyn Allocator) {
        let layout = Layout::from_size_align(1000, 8).unwrap();

        let ptr = allocator.alloc(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % CACHE_LINE_SIZE, 0);
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0xAB, layout.size());
            allocator.free(ptr, layout);
        }

        let zeroed = allocator.alloc_zeroed(layout).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), layout.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { allocator.free(zeroed, layout) };
    }

    #[test]
    fn system_allocator_aligns_to_cache_line() {
        exercise(&SystemAllocator);
    }

    #[cfg(unix)]
    #[test]
    fn libc_allocator_aligns_to_cache_line() {
        exercise(&LibcAllocator);
    }

    #[test]
    fn zero_sized_layout_rejected() {
        let layout = Layout::from_size_align(0, 8).unwrap();
        assert!(matches!(
            SystemAllocator.alloc(layout),
            Err(Error::InvalidLayout(_))
        ));
    }

    #[test]
    fn aligned_layout_keeps_larger_alignment() {
        let layout = Layout::from_size_align(64, 4096).unwrap();
        let padded = aligned_layout(layout).unwrap();
        assert_eq!(padded.align(), 4096);
        assert_eq!(padded.size(), 4096);
    }
}
