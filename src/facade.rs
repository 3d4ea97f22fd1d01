use std::ptr::{self, NonNull};

use tracing::debug;

use crate::{
  config::AllocatorConfig,
  error::{AllocError, ConfigError},
  fixed::{FixedBufferAllocator, Stats},
  upstream::{SystemUpstream, UpstreamAllocator},
};

/// `malloc`-family front end over a [`FixedBufferAllocator`].
///
/// Every request uses the configured alignment, so pointers can be passed
/// straight to code written against the C allocation functions. Errors are
/// returned, never acted on; see [`crate::hooks`] for the process-wide
/// entry points that turn them into an abort.
#[derive(Debug)]
pub struct AllocatorFacade<U: UpstreamAllocator = SystemUpstream> {
  inner: FixedBufferAllocator<U>,
  alignment: usize,
}

impl AllocatorFacade<SystemUpstream> {
  /// Facade over the C runtime allocator.
  pub fn system(config: AllocatorConfig) -> Result<Self, ConfigError> {
    Self::new(config, SystemUpstream)
  }
}

impl<U: UpstreamAllocator> AllocatorFacade<U> {
  pub fn new(
    config: AllocatorConfig,
    upstream: U,
  ) -> Result<Self, ConfigError> {
    config.validate()?;

    let inner = FixedBufferAllocator::new(config.capacity, upstream)?;
    debug!(capacity = config.capacity, alignment = config.alignment, "allocator facade ready");

    Ok(Self {
      inner,
      alignment: config.alignment,
    })
  }

  #[inline]
  pub fn alignment(&self) -> usize {
    self.alignment
  }

  pub fn allocator(&self) -> &FixedBufferAllocator<U> {
    &self.inner
  }

  pub fn stats(&self) -> Stats {
    self.inner.stats()
  }

  /// Returns null for a zero-byte request.
  pub fn malloc(
    &mut self,
    bytes: usize,
  ) -> Result<*mut u8, AllocError> {
    self
      .inner
      .alloc(bytes, self.alignment)
      .map(into_raw)
  }

  /// Zeroed array of `count` elements of `bytes` bytes each.
  pub fn calloc(
    &mut self,
    count: usize,
    bytes: usize,
  ) -> Result<*mut u8, AllocError> {
    let total = count
      .checked_mul(bytes)
      .ok_or(AllocError::SizeOverflow { count, size: bytes })?;

    let ptr = self.malloc(total)?;
    if !ptr.is_null() {
      unsafe { ptr::write_bytes(ptr, 0, total) };
    }
    Ok(ptr)
  }

  /// `realloc(null, n)` allocates, `realloc(p, 0)` frees and returns null.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer from this facade.
  pub unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    bytes: usize,
  ) -> Result<*mut u8, AllocError> {
    unsafe {
      self
        .inner
        .allocate(NonNull::new(ptr), bytes, self.alignment)
        .map(into_raw)
    }
  }

  /// Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer from this facade.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if let Some(ptr) = NonNull::new(ptr) {
      unsafe { self.inner.free(ptr, self.alignment) };
    }
  }

  /// Bytes usable at `ptr`, zero for null.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer from this facade.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    match NonNull::new(ptr) {
      Some(ptr) => unsafe { self.inner.usable_size(ptr) },
      None => 0,
    }
  }
}

fn into_raw(ptr: Option<NonNull<u8>>) -> *mut u8 {
  ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
}
