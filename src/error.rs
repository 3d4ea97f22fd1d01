use thiserror::Error;

/// Failure of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// Neither the fixed buffer nor the upstream allocator could serve the request.
  #[error("memory exhausted: {bytes} bytes (align {align}) fit neither the buffer nor upstream")]
  Exhausted { bytes: usize, align: usize },

  /// `count * size` does not fit in `usize`.
  #[error("allocation size overflow: {count} x {size} bytes")]
  SizeOverflow { count: usize, size: usize },
}

/// Failure while building or installing an allocator.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid capacity {0}: must be non-zero and below 2^32 - 1 bytes")]
  InvalidCapacity(usize),

  #[error("invalid alignment {0}: must be a power of two no greater than 4096")]
  InvalidAlignment(usize),

  /// The upstream refused the buffer in `FixedBufferAllocator::new`.
  #[error("could not acquire the {0}-byte buffer from upstream")]
  Buffer(usize),

  #[error("failed to parse configuration: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid value {value:?} for environment variable {name}")]
  Env { name: &'static str, value: String },

  #[error("an allocator facade is already installed")]
  AlreadyInstalled,
}
