/// Largest alignment of any scalar type on supported targets.
///
/// The fixed buffer is requested with this alignment, so any payload placed
/// at an offset that is a multiple of it is aligned for every primitive.
pub const MAX_ALIGN: usize = 16;

/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
///
/// # Examples
///
/// ```rust
/// use fixalloc::align_up;
///
/// assert_eq!(align_up!(13, 8), 16);
/// assert_eq!(align_up!(116, 1), 116);
/// assert_eq!(align_up!(32, 16), 32);
/// ```
#[macro_export]
macro_rules! align_up {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}
