use std::{mem, ptr};

/// Buffer-relative offset of a header in the live list.
///
/// Offsets are never owning: a `Link` only names where a header sits inside
/// the buffer, and is only followed after the allocator has checked it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Link(u32);

impl Link {
  pub const NONE: Link = Link(u32::MAX);

  /// Largest buffer capacity a `Link` can address.
  pub const MAX_OFFSET: usize = u32::MAX as usize - 1;

  pub fn to(offset: usize) -> Self {
    debug_assert!(offset <= Self::MAX_OFFSET);
    Link(offset as u32)
  }

  pub fn get(self) -> Option<usize> {
    if self == Self::NONE {
      None
    } else {
      Some(self.0 as usize)
    }
  }
}

/// Metadata stored immediately before every payload.
///
/// Headers inside the buffer are linked in address order through `prev` and
/// `next`. Headers in front of upstream blocks keep both links at
/// [`Link::NONE`]; only their address tells them apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
  pub length: usize,
  pub prev: Link,
  pub next: Link,
}

impl Header {
  pub const SIZE: usize = mem::size_of::<Header>();

  pub fn new(
    length: usize,
    prev: Link,
    next: Link,
  ) -> Self {
    Self { length, prev, next }
  }

  /// Reads the header stored at `at`.
  ///
  /// # Safety
  ///
  /// `at` must point to `Header::SIZE` readable bytes holding a header.
  pub unsafe fn read(at: *const u8) -> Self {
    unsafe { ptr::read_unaligned(at as *const Header) }
  }

  /// Writes `self` at `at`. No alignment is required.
  ///
  /// # Safety
  ///
  /// `at` must point to `Header::SIZE` writable bytes.
  pub unsafe fn write(
    self,
    at: *mut u8,
  ) {
    unsafe { ptr::write_unaligned(at as *mut Header, self) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_layout() {
    #[cfg(target_pointer_width = "64")]
    assert_eq!(Header::SIZE, 16);

    assert_eq!(Header::SIZE, mem::size_of::<usize>() + 2 * mem::size_of::<u32>());
  }

  #[test]
  fn test_link() {
    assert_eq!(Link::NONE.get(), None);
    assert_eq!(Link::to(0).get(), Some(0));
    assert_eq!(Link::to(116).get(), Some(116));
  }

  #[test]
  fn test_unaligned_roundtrip_at_odd_offset() {
    let mut bytes = [0u8; Header::SIZE + 3];
    let header = Header::new(90, Link::NONE, Link::to(116));

    unsafe {
      header.write(bytes.as_mut_ptr().add(3));
      assert_eq!(Header::read(bytes.as_ptr().add(3)), header);
    }
  }
}
