use std::ptr::{self, NonNull};

use libc::c_void;

/// Fallback allocator used when a request cannot be served from the buffer.
///
/// Implementations hand out raw memory and take it back with the same size
/// and alignment. The fixed buffer itself is also obtained through this
/// trait.
pub trait UpstreamAllocator {
  /// Returns `bytes` bytes aligned to `align`, or `None` when exhausted.
  ///
  /// `align` is a power of two and `bytes` is non-zero.
  fn allocate(
    &self,
    bytes: usize,
    align: usize,
  ) -> Option<NonNull<u8>>;

  /// Releases a block previously returned by [`UpstreamAllocator::allocate`].
  ///
  /// # Safety
  ///
  /// `ptr` must come from `allocate` on this upstream with the same `bytes`
  /// and `align`, and must not be used afterwards.
  unsafe fn deallocate(
    &self,
    ptr: NonNull<u8>,
    bytes: usize,
    align: usize,
  );
}

impl<U: UpstreamAllocator + ?Sized> UpstreamAllocator for &U {
  fn allocate(
    &self,
    bytes: usize,
    align: usize,
  ) -> Option<NonNull<u8>> {
    (**self).allocate(bytes, align)
  }

  unsafe fn deallocate(
    &self,
    ptr: NonNull<u8>,
    bytes: usize,
    align: usize,
  ) {
    unsafe { (**self).deallocate(ptr, bytes, align) }
  }
}

/// The C runtime allocator, reached through `posix_memalign` and `free`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemUpstream;

impl UpstreamAllocator for SystemUpstream {
  fn allocate(
    &self,
    bytes: usize,
    align: usize,
  ) -> Option<NonNull<u8>> {
    // posix_memalign rejects alignments below the pointer size.
    let align = align.max(std::mem::size_of::<*mut c_void>());
    let mut out: *mut c_void = ptr::null_mut();

    let status = unsafe { libc::posix_memalign(&mut out, align, bytes) };

    if status != 0 {
      return None;
    }

    NonNull::new(out as *mut u8)
  }

  unsafe fn deallocate(
    &self,
    ptr: NonNull<u8>,
    _bytes: usize,
    _align: usize,
  ) {
    unsafe { libc::free(ptr.as_ptr() as *mut c_void) }
  }
}
