use std::{
  cmp, fmt, mem,
  ptr::{self, NonNull},
};

use tracing::{debug, trace};

use crate::{
  align::MAX_ALIGN,
  align_up,
  block::{Header, Link},
  error::{AllocError, ConfigError},
  upstream::UpstreamAllocator,
};

/// Placement found by the gap search: where the header goes and the live
/// headers it will sit between.
struct Gap {
  at: usize,
  prev: Link,
  next: Link,
}

/// Snapshot of the buffer's occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
  pub live_blocks: usize,
  pub live_bytes: usize,
  pub header_bytes: usize,
  pub free_bytes: usize,
  pub largest_gap: usize,
}

/// General purpose allocator carved out of one fixed-capacity buffer.
///
/// Every payload is preceded by a [`Header`]. Headers inside the buffer form
/// an address-ordered doubly linked list rooted at `first`; the free space is
/// whatever lies between neighbours, so no separate free list exists.
/// Requests that do not fit are sent to the upstream allocator, with the same
/// header in front so they can be freed through the same entry point.
///
/// ```text
///   base                                                      base + capacity
///   ┌──────┬─────────┬───────┬──────┬──────────┬──────────────────────────┐
///   │ Hdr  │ payload │  gap  │ Hdr  │ payload  │          gap             │
///   └──────┴─────────┴───────┴──────┴──────────┴──────────────────────────┘
///    first ──next──────────────▶ ◀──prev
/// ```
///
/// # Thread Safety
///
/// Not thread-safe. The type is neither `Send` nor `Sync`; callers sharing
/// one instance must serialize access themselves.
pub struct FixedBufferAllocator<U: UpstreamAllocator> {
  base: NonNull<u8>,
  capacity: usize,
  first: Link,
  upstream: U,
}

impl<U: UpstreamAllocator> FixedBufferAllocator<U> {
  /// Acquires a `capacity`-byte buffer from `upstream`, aligned to
  /// [`MAX_ALIGN`].
  pub fn new(
    capacity: usize,
    upstream: U,
  ) -> Result<Self, ConfigError> {
    if capacity == 0 || capacity > Link::MAX_OFFSET {
      return Err(ConfigError::InvalidCapacity(capacity));
    }

    let base = upstream
      .allocate(capacity, MAX_ALIGN)
      .ok_or(ConfigError::Buffer(capacity))?;

    debug!(capacity, base = ?base, "fixed buffer acquired");

    Ok(Self {
      base,
      capacity,
      first: Link::NONE,
      upstream,
    })
  }

  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub fn upstream(&self) -> &U {
    &self.upstream
  }

  /// Returns true if `ptr` lies inside the fixed buffer.
  pub fn contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.offset_of(ptr as usize).is_some()
  }

  /// Allocates, reallocates or frees depending on the arguments.
  ///
  /// | `src`    | `bytes` | effect                                        |
  /// |----------|---------|-----------------------------------------------|
  /// | `None`   | 0       | nothing, returns `None`                       |
  /// | `None`   | > 0     | new block                                     |
  /// | `Some`   | 0       | frees `src`, returns `None`                   |
  /// | `Some`   | > 0     | resizes `src` in place or moves it            |
  ///
  /// The only error is [`AllocError::Exhausted`], returned when neither the
  /// buffer nor upstream can take the request. A failed resize leaves `src`
  /// untouched.
  ///
  /// # Safety
  ///
  /// `src` must be a live pointer returned by this allocator, requested with
  /// the same `align`. `align` must be a power of two.
  pub unsafe fn allocate(
    &mut self,
    src: Option<NonNull<u8>>,
    bytes: usize,
    align: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    debug_assert!(align.is_power_of_two());

    match src {
      None if bytes == 0 => Ok(None),
      None => self.place(bytes, align).map(Some),
      Some(ptr) if bytes == 0 => {
        unsafe { self.release(ptr, align) };
        Ok(None)
      }
      Some(ptr) => unsafe { self.resize(ptr, bytes, align) }.map(Some),
    }
  }

  /// Allocates `bytes` bytes whose address is a multiple of `align`.
  ///
  /// Returns `Ok(None)` for a zero-byte request.
  pub fn alloc(
    &mut self,
    bytes: usize,
    align: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    unsafe { self.allocate(None, bytes, align) }
  }

  /// Resizes `ptr` to `bytes`, keeping the first `min(old, bytes)` bytes.
  ///
  /// # Safety
  ///
  /// See [`FixedBufferAllocator::allocate`].
  pub unsafe fn realloc(
    &mut self,
    ptr: NonNull<u8>,
    bytes: usize,
    align: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    unsafe { self.allocate(Some(ptr), bytes, align) }
  }

  /// Frees `ptr`.
  ///
  /// # Safety
  ///
  /// See [`FixedBufferAllocator::allocate`].
  pub unsafe fn free(
    &mut self,
    ptr: NonNull<u8>,
    align: usize,
  ) {
    unsafe { self.release(ptr, align) }
  }

  /// Size recorded for the live block at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { Header::read(ptr.as_ptr().sub(Header::SIZE)).length }
  }

  /// Live in-buffer blocks as `(header offset, length)`, in address order.
  pub fn blocks(&self) -> Blocks<'_, U> {
    Blocks {
      allocator: self,
      cursor: self.first,
    }
  }

  pub fn stats(&self) -> Stats {
    let mut stats = Stats::default();
    let mut cursor = 0;

    for (offset, length) in self.blocks() {
      stats.live_blocks += 1;
      stats.live_bytes += length;
      stats.largest_gap = cmp::max(stats.largest_gap, offset - cursor);
      cursor = offset + Header::SIZE + length;
    }

    stats.header_bytes = stats.live_blocks * Header::SIZE;
    stats.free_bytes = self.capacity - stats.live_bytes - stats.header_bytes;
    stats.largest_gap = cmp::max(stats.largest_gap, self.capacity - cursor);
    stats
  }

  fn place(
    &mut self,
    bytes: usize,
    align: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let final_size = bytes
      .checked_add(Header::SIZE)
      .ok_or(AllocError::Exhausted { bytes, align })?;

    if final_size > self.capacity {
      return self.upstream_alloc(bytes, align);
    }

    match self.find_gap(bytes, align) {
      Some(gap) => Ok(unsafe { self.link(gap, bytes) }),
      None => self.upstream_alloc(bytes, align),
    }
  }

  /// First-fit walk over the leading gap, the gap after each live header and
  /// the tail gap.
  fn find_gap(
    &self,
    bytes: usize,
    align: usize,
  ) -> Option<Gap> {
    let mut prev = Link::NONE;
    let mut current = self.first;
    let mut cursor = 0;

    loop {
      let end = current.get().unwrap_or(self.capacity);

      if let Some(at) = self.fit(cursor, end, bytes, align) {
        return Some(Gap {
          at,
          prev,
          next: current,
        });
      }

      let offset = current.get()?;
      let header = unsafe { self.load(offset) };

      cursor = offset + Header::SIZE + header.length;
      prev = current;
      current = header.next;
    }
  }

  /// Lowest header offset in `[start, end)` whose payload is aligned to
  /// `align` and whose `bytes` bytes end at or before `end`.
  fn fit(
    &self,
    start: usize,
    end: usize,
    bytes: usize,
    align: usize,
  ) -> Option<usize> {
    let base = self.base.as_ptr() as usize;
    let payload = align_up!(base + start + Header::SIZE, align) - base;

    if payload.checked_add(bytes)? <= end {
      Some(payload - Header::SIZE)
    } else {
      None
    }
  }

  unsafe fn link(
    &mut self,
    gap: Gap,
    bytes: usize,
  ) -> NonNull<u8> {
    let at = Link::to(gap.at);

    unsafe {
      Header::new(bytes, gap.prev, gap.next).write(self.addr(gap.at));

      match gap.prev.get() {
        Some(prev) => self.update(prev, |header| header.next = at),
        None => self.first = at,
      }

      if let Some(next) = gap.next.get() {
        self.update(next, |header| header.prev = at);
      }

      NonNull::new_unchecked(self.addr(gap.at + Header::SIZE))
    }
  }

  unsafe fn unlink(
    &mut self,
    offset: usize,
  ) -> Header {
    unsafe {
      let header = self.load(offset);

      match header.prev.get() {
        Some(prev) => self.update(prev, |h| h.next = header.next),
        None => self.first = header.next,
      }

      if let Some(next) = header.next.get() {
        self.update(next, |h| h.prev = header.prev);
      }

      header
    }
  }

  unsafe fn release(
    &mut self,
    ptr: NonNull<u8>,
    align: usize,
  ) {
    let header_addr = unsafe { ptr.as_ptr().sub(Header::SIZE) };

    match self.offset_of(header_addr as usize) {
      Some(offset) => unsafe {
        self.check_links(offset);
        self.unlink(offset);
      },
      None => unsafe {
        let header = Header::read(header_addr);
        self.upstream_release(ptr, header.length, align);
      },
    }
  }

  unsafe fn resize(
    &mut self,
    ptr: NonNull<u8>,
    bytes: usize,
    align: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let header_addr = unsafe { ptr.as_ptr().sub(Header::SIZE) };

    let Some(offset) = self.offset_of(header_addr as usize) else {
      // Upstream blocks always move; their recorded length sizes the release.
      let old = unsafe { Header::read(header_addr) };
      let moved = self.place(bytes, align)?;

      unsafe {
        ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), cmp::min(old.length, bytes));
        self.upstream_release(ptr, old.length, align);
      }

      debug!(from = ?ptr, to = ?moved, old = old.length, new = bytes, "moved upstream block");
      return Ok(moved);
    };

    let mut header = unsafe { self.load(offset) };
    unsafe { self.check_links(offset) };

    let boundary = header.next.get().unwrap_or(self.capacity);
    let fits_in_place = (offset + Header::SIZE)
      .checked_add(bytes)
      .is_some_and(|end| end <= boundary);

    if fits_in_place {
      header.length = bytes;
      unsafe { header.write(self.addr(offset)) };
      return Ok(ptr);
    }

    let old = unsafe { self.unlink(offset) };

    match self.place(bytes, align) {
      Ok(moved) => {
        // The new slot may overlap the abandoned one when it lands in the
        // same, now wider, gap.
        unsafe { ptr::copy(ptr.as_ptr(), moved.as_ptr(), cmp::min(old.length, bytes)) };

        debug!(from = ?ptr, to = ?moved, old = old.length, new = bytes, "moved block");
        Ok(moved)
      }
      Err(err) => {
        let gap = Gap {
          at: offset,
          prev: old.prev,
          next: old.next,
        };
        unsafe { self.link(gap, old.length) };
        Err(err)
      }
    }
  }

  fn upstream_alloc(
    &mut self,
    bytes: usize,
    align: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let exhausted = AllocError::Exhausted { bytes, align };
    let (lead, align) = Self::upstream_lead(align);
    let total = lead.checked_add(bytes).ok_or(exhausted)?;

    let block = self.upstream.allocate(total, align).ok_or(exhausted)?;

    trace!(bytes, align, block = ?block, "served from upstream");

    unsafe {
      let payload = block.as_ptr().add(lead);
      Header::new(bytes, Link::NONE, Link::NONE).write(payload.sub(Header::SIZE));
      Ok(NonNull::new_unchecked(payload))
    }
  }

  unsafe fn upstream_release(
    &mut self,
    ptr: NonNull<u8>,
    length: usize,
    align: usize,
  ) {
    let (lead, align) = Self::upstream_lead(align);

    trace!(bytes = length, align, ptr = ?ptr, "returned to upstream");

    unsafe {
      let block = NonNull::new_unchecked(ptr.as_ptr().sub(lead));
      self.upstream.deallocate(block, lead + length, align);
    }
  }

  /// Bytes in front of an upstream payload and the alignment to request.
  ///
  /// For alignments up to the header size the lead is exactly one header, so
  /// the upstream block is `Length + size_of::<Header>()` bytes.
  fn upstream_lead(align: usize) -> (usize, usize) {
    let align = cmp::max(align, mem::align_of::<Header>());
    (align_up!(Header::SIZE, align), align)
  }

  /// Debug-only check that the header at `offset` is a live list member.
  unsafe fn check_links(
    &self,
    offset: usize,
  ) {
    if cfg!(debug_assertions) {
      let here = Link::to(offset);
      let header = unsafe { self.load(offset) };

      match header.prev.get() {
        Some(prev) => debug_assert_eq!(unsafe { self.load(prev) }.next, here, "corrupt back link"),
        None => debug_assert_eq!(self.first, here, "header is not the list head"),
      }

      if let Some(next) = header.next.get() {
        debug_assert_eq!(unsafe { self.load(next) }.prev, here, "corrupt forward link");
      }

      let boundary = header.next.get().unwrap_or(self.capacity);
      debug_assert!(
        offset + Header::SIZE + header.length <= boundary,
        "block at {offset} overruns its neighbour"
      );
    }
  }

  fn offset_of(
    &self,
    addr: usize,
  ) -> Option<usize> {
    let base = self.base.as_ptr() as usize;
    addr
      .checked_sub(base)
      .filter(|offset| *offset < self.capacity)
  }

  #[inline]
  fn addr(
    &self,
    offset: usize,
  ) -> *mut u8 {
    unsafe { self.base.as_ptr().add(offset) }
  }

  #[inline]
  unsafe fn load(
    &self,
    offset: usize,
  ) -> Header {
    unsafe { Header::read(self.addr(offset)) }
  }

  unsafe fn update(
    &mut self,
    offset: usize,
    edit: impl FnOnce(&mut Header),
  ) {
    unsafe {
      let mut header = self.load(offset);
      edit(&mut header);
      header.write(self.addr(offset));
    }
  }
}

impl<U: UpstreamAllocator> Drop for FixedBufferAllocator<U> {
  fn drop(&mut self) {
    unsafe { self.upstream.deallocate(self.base, self.capacity, MAX_ALIGN) };
  }
}

impl<U: UpstreamAllocator> fmt::Debug for FixedBufferAllocator<U> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("FixedBufferAllocator")
      .field("base", &self.base)
      .field("capacity", &self.capacity)
      .field("first", &self.first.get())
      .field("stats", &self.stats())
      .finish()
  }
}

/// Iterator over live in-buffer blocks, see [`FixedBufferAllocator::blocks`].
pub struct Blocks<'a, U: UpstreamAllocator> {
  allocator: &'a FixedBufferAllocator<U>,
  cursor: Link,
}

impl<U: UpstreamAllocator> Iterator for Blocks<'_, U> {
  type Item = (usize, usize);

  fn next(&mut self) -> Option<Self::Item> {
    let offset = self.cursor.get()?;
    let header = unsafe { self.allocator.load(offset) };

    self.cursor = header.next;
    Some((offset, header.length))
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::upstream::{SystemUpstream, recording::RecordingUpstream};

  const H: usize = Header::SIZE;

  fn offset<U: UpstreamAllocator>(
    allocator: &FixedBufferAllocator<U>,
    ptr: NonNull<u8>,
  ) -> usize {
    ptr.as_ptr() as usize - allocator.base.as_ptr() as usize - H
  }

  fn fill(
    ptr: NonNull<u8>,
    len: usize,
    byte: u8,
  ) {
    unsafe { ptr::write_bytes(ptr.as_ptr(), byte, len) };
  }

  fn bytes_of<'a>(
    ptr: NonNull<u8>,
    len: usize,
  ) -> &'a [u8] {
    unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
  }

  #[test]
  fn test_zero_byte_request_is_none() {
    let mut allocator = FixedBufferAllocator::new(1024, SystemUpstream).unwrap();

    assert_eq!(allocator.alloc(0, 1).unwrap(), None);
    assert_eq!(allocator.blocks().count(), 0);
    assert_eq!(allocator.stats().free_bytes, 1024);
  }

  #[test]
  fn test_invalid_capacity() {
    assert!(matches!(
      FixedBufferAllocator::new(0, SystemUpstream),
      Err(ConfigError::InvalidCapacity(0))
    ));
    assert!(matches!(
      FixedBufferAllocator::new(usize::MAX, SystemUpstream),
      Err(ConfigError::InvalidCapacity(_))
    ));
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn test_gap_reuse_and_upstream_routing() {
    let upstream = RecordingUpstream::new();
    let mut allocator = FixedBufferAllocator::new(1024, &upstream).unwrap();
    let buffer_calls = upstream.allocations();

    let first = allocator.alloc(100, 1).unwrap().unwrap();
    let second = allocator.alloc(100, 1).unwrap().unwrap();
    assert_eq!(offset(&allocator, first), 0);
    assert_eq!(offset(&allocator, second), 116);

    unsafe { allocator.free(first, 1) };
    assert_eq!(allocator.blocks().collect::<Vec<_>>(), vec![(116, 100)]);

    let third = allocator.alloc(90, 1).unwrap().unwrap();
    assert_eq!(third, first);
    assert_eq!(allocator.blocks().collect::<Vec<_>>(), vec![(0, 90), (116, 100)]);

    let big = allocator.alloc(2000, 1).unwrap().unwrap();
    assert!(!allocator.contains(big.as_ptr()));
    assert_eq!(allocator.upstream().allocations(), buffer_calls + 1);
    assert_eq!(allocator.upstream().last_allocation(), Some((2000 + H, mem::align_of::<Header>())));
    assert_eq!(allocator.blocks().count(), 2);

    unsafe { allocator.free(big, 1) };
    assert_eq!(allocator.upstream().deallocations(), 1);
    assert_eq!(allocator.upstream().last_deallocation(), Some((2000 + H, mem::align_of::<Header>())));
    assert_eq!(allocator.blocks().count(), 2);
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn test_realloc_at_tail() {
    let upstream = RecordingUpstream::new();
    let mut allocator = FixedBufferAllocator::new(1024, &upstream).unwrap();

    let head = allocator.alloc(900, 1).unwrap().unwrap();
    let tail = allocator.alloc(50, 1).unwrap().unwrap();
    assert_eq!(offset(&allocator, tail), 916);

    let shrunk = unsafe { allocator.realloc(tail, 40, 1) }.unwrap().unwrap();
    assert_eq!(shrunk, tail);
    assert_eq!(unsafe { allocator.usable_size(tail) }, 40);

    fill(tail, 40, 0xC3);

    let grown = unsafe { allocator.realloc(tail, 60, 1) }.unwrap().unwrap();
    assert_eq!(grown, tail);
    assert_eq!(unsafe { allocator.usable_size(tail) }, 60);

    // 916 + 16 + 100 overruns the buffer and no other gap is wide enough.
    let moved = unsafe { allocator.realloc(tail, 100, 1) }.unwrap().unwrap();
    assert_ne!(moved, tail);
    assert!(!allocator.contains(moved.as_ptr()));
    assert_eq!(&bytes_of(moved, 40), &[0xC3; 40].as_slice());
    assert_eq!(allocator.blocks().collect::<Vec<_>>(), vec![(0, 900)]);

    unsafe {
      allocator.free(moved, 1);
      allocator.free(head, 1);
    }
    assert_eq!(allocator.stats().live_blocks, 0);
  }

  #[test]
  fn test_move_realloc_into_leading_gap() {
    let mut allocator = FixedBufferAllocator::new(800, SystemUpstream).unwrap();

    let head = allocator.alloc(500, 1).unwrap().unwrap();
    let tail = allocator.alloc(200, 1).unwrap().unwrap();
    for i in 0..200 {
      unsafe { *tail.as_ptr().add(i) = i as u8 };
    }

    unsafe { allocator.free(head, 1) };
    let moved = unsafe { allocator.realloc(tail, 400, 1) }.unwrap().unwrap();

    assert_eq!(moved, head);
    assert!(allocator.contains(moved.as_ptr()));
    for i in 0..200 {
      assert_eq!(unsafe { *moved.as_ptr().add(i) }, i as u8);
    }
    assert_eq!(allocator.blocks().collect::<Vec<_>>(), vec![(0, 400)]);
  }

  #[test]
  fn test_move_into_overlapping_slot_preserves_data() {
    let mut allocator = FixedBufferAllocator::new(512, SystemUpstream).unwrap();

    let a = allocator.alloc(20, 1).unwrap().unwrap();
    let b = allocator.alloc(100, 1).unwrap().unwrap();
    let _c = allocator.alloc(512 - (20 + H) - (100 + H) - H, 1).unwrap().unwrap();
    for i in 0..100 {
      unsafe { *b.as_ptr().add(i) = (i * 7) as u8 };
    }

    unsafe { allocator.free(a, 1) };

    // The only gap wide enough starts at offset 0 and overlaps the old payload.
    let moved = unsafe { allocator.realloc(b, 120, 1) }.unwrap().unwrap();
    assert_eq!(moved, a);
    for i in 0..100 {
      assert_eq!(unsafe { *moved.as_ptr().add(i) }, (i * 7) as u8);
    }
  }

  #[test]
  fn test_exhaustion_is_an_error() {
    let upstream = RecordingUpstream::new();
    let mut allocator = FixedBufferAllocator::new(256, &upstream).unwrap();
    upstream.deny(true);

    assert_eq!(
      allocator.alloc(1000, 8),
      Err(AllocError::Exhausted { bytes: 1000, align: 8 })
    );

    let kept = allocator.alloc(100, 8).unwrap().unwrap();
    fill(kept, 100, 0x11);
    let _neighbour = allocator.alloc(100, 8).unwrap().unwrap();

    let err = unsafe { allocator.realloc(kept, 200, 8) }.unwrap_err();
    assert_eq!(err, AllocError::Exhausted { bytes: 200, align: 8 });

    // A failed move leaves the original block linked and intact.
    assert_eq!(allocator.blocks().count(), 2);
    assert_eq!(unsafe { allocator.usable_size(kept) }, 100);
    assert_eq!(bytes_of(kept, 100), &[0x11; 100]);

    upstream.deny(false);
  }

  #[test]
  fn test_payload_alignment() {
    let mut allocator = FixedBufferAllocator::new(4096, SystemUpstream).unwrap();

    let odd = allocator.alloc(3, 1).unwrap().unwrap();
    for align in [8usize, 16, 64, 256] {
      let ptr = allocator.alloc(10, align).unwrap().unwrap();
      assert!(allocator.contains(ptr.as_ptr()));
      assert_eq!(ptr.as_ptr() as usize % align, 0);
    }

    let outside = allocator.alloc(8000, 64).unwrap().unwrap();
    assert!(!allocator.contains(outside.as_ptr()));
    assert_eq!(outside.as_ptr() as usize % 64, 0);

    unsafe {
      allocator.free(outside, 64);
      allocator.free(odd, 1);
    }
  }

  #[test]
  fn test_upstream_block_moves_back_into_buffer() {
    let upstream = RecordingUpstream::new();
    let mut allocator = FixedBufferAllocator::new(512, &upstream).unwrap();

    let big = allocator.alloc(1000, 16).unwrap().unwrap();
    fill(big, 1000, 0x7E);

    let small = unsafe { allocator.realloc(big, 64, 16) }.unwrap().unwrap();
    assert!(allocator.contains(small.as_ptr()));
    assert_eq!(bytes_of(small, 64), &[0x7E; 64]);
    assert_eq!(upstream.deallocations(), 1);
  }

  #[test]
  fn test_realloc_to_zero_frees() {
    let mut allocator = FixedBufferAllocator::new(256, SystemUpstream).unwrap();

    let ptr = allocator.alloc(32, 8).unwrap().unwrap();
    assert_eq!(unsafe { allocator.realloc(ptr, 0, 8) }.unwrap(), None);
    assert_eq!(allocator.blocks().count(), 0);
  }

  #[cfg(debug_assertions)]
  #[test]
  #[should_panic(expected = "header is not the list head")]
  fn test_double_free_of_head_is_caught() {
    let mut allocator = FixedBufferAllocator::new(256, SystemUpstream).unwrap();

    let head = allocator.alloc(10, 1).unwrap().unwrap();
    let _next = allocator.alloc(10, 1).unwrap().unwrap();

    unsafe {
      allocator.free(head, 1);
      allocator.free(head, 1);
    }
  }

  #[test]
  fn test_stats() {
    let mut allocator = FixedBufferAllocator::new(1024, SystemUpstream).unwrap();

    let a = allocator.alloc(100, 1).unwrap().unwrap();
    let _b = allocator.alloc(200, 1).unwrap().unwrap();
    unsafe { allocator.free(a, 1) };

    let stats = allocator.stats();
    assert_eq!(stats.live_blocks, 1);
    assert_eq!(stats.live_bytes, 200);
    assert_eq!(stats.header_bytes, H);
    assert_eq!(stats.free_bytes, 1024 - 200 - H);
    assert_eq!(stats.largest_gap, 1024 - (100 + H) - (200 + H));
  }

  #[derive(Clone, Debug)]
  enum Op {
    Alloc(usize),
    Free(usize),
    Realloc(usize, usize),
  }

  fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
      (1usize..400).prop_map(Op::Alloc),
      any::<usize>().prop_map(Op::Free),
      (any::<usize>(), 1usize..600).prop_map(|(i, n)| Op::Realloc(i, n)),
    ]
  }

  struct Live {
    ptr: NonNull<u8>,
    len: usize,
    byte: u8,
  }

  fn boundary_of(
    allocator: &FixedBufferAllocator<SystemUpstream>,
    ptr: NonNull<u8>,
  ) -> Option<usize> {
    let at = allocator.offset_of(ptr.as_ptr() as usize - H)?;
    let mut blocks = allocator.blocks().skip_while(|(offset, _)| *offset != at);
    blocks.next()?;
    Some(blocks.next().map_or(allocator.capacity(), |(offset, _)| offset))
  }

  proptest! {
    #[test]
    fn prop_blocks_never_overlap_and_keep_contents(
      ops in prop::collection::vec(op(), 1..80),
      align in prop::sample::select(vec![1usize, 8, 16]),
    ) {
      let mut allocator = FixedBufferAllocator::new(2048, SystemUpstream).unwrap();
      let mut live: Vec<Live> = Vec::new();

      for (step, op) in ops.into_iter().enumerate() {
        let byte = step as u8;

        match op {
          Op::Alloc(len) => {
            let ptr = allocator.alloc(len, align).unwrap().unwrap();
            prop_assert_eq!(ptr.as_ptr() as usize % align, 0);
            fill(ptr, len, byte);
            live.push(Live { ptr, len, byte });
          }
          Op::Free(i) if !live.is_empty() => {
            let block = live.swap_remove(i % live.len());
            unsafe { allocator.free(block.ptr, align) };
          }
          Op::Realloc(i, len) if !live.is_empty() => {
            let i = i % live.len();
            let before = live[i].ptr;
            let grows_in_place = boundary_of(&allocator, before)
              .is_some_and(|end| allocator.offset_of(before.as_ptr() as usize).unwrap() + len <= end);

            let after = unsafe { allocator.realloc(before, len, align) }.unwrap().unwrap();
            if grows_in_place {
              prop_assert_eq!(after, before);
            }

            let kept = cmp::min(live[i].len, len);
            prop_assert!(bytes_of(after, kept).iter().all(|b| *b == live[i].byte));

            fill(after, len, byte);
            live[i] = Live { ptr: after, len, byte };
          }
          _ => {}
        }

        for block in &live {
          prop_assert!(bytes_of(block.ptr, block.len).iter().all(|b| *b == block.byte));
        }

        let mut ranges: Vec<_> = live
          .iter()
          .map(|b| (b.ptr.as_ptr() as usize, b.ptr.as_ptr() as usize + b.len))
          .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
          prop_assert!(pair[0].1 <= pair[1].0);
        }

        let listed: Vec<_> = allocator.blocks().collect();
        prop_assert!(listed.windows(2).all(|w| w[0].0 + H + w[0].1 <= w[1].0));
      }

      for block in live {
        unsafe { allocator.free(block.ptr, align) };
      }
      prop_assert_eq!(allocator.stats().live_blocks, 0);
    }
  }
}
