//! # fixalloc - A Fixed-Buffer Memory Allocator
//!
//! This crate provides a general purpose allocator that carves blocks out of
//! one fixed-capacity buffer and transparently overflows to an upstream
//! allocator when a request does not fit.
//!
//! ## Overview
//!
//! ```text
//!   Fixed Buffer:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ ┌─────┬────┐       ┌─────┬──────────┐ ┌─────┬──────┐                 │
//!   │ │ Hdr │ A1 │  gap  │ Hdr │    A2    │ │ Hdr │  A3  │    tail gap     │
//!   │ └─────┴────┘       └─────┴──────────┘ └─────┴──────┘                 │
//!   │    ▲  ──next──────▶   ▲  ──next──────▶   ▲                           │
//!   │    └─ first           └──────prev───────┘                            │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Requests that fit no gap:           ┌─────┬────────────────┐
//!   served by the upstream allocator ─▶ │ Hdr │       A4       │
//!                                       └─────┴────────────────┘
//! ```
//!
//! - Live blocks are kept in an address-ordered, doubly linked list of headers
//!   stored inside the buffer itself. Links are buffer offsets, not pointers.
//! - New blocks go into the first gap that fits (leading gap, gaps between
//!   blocks, tail gap). A miss falls through to upstream.
//! - Freeing unlinks the header; the gap is whatever now lies between the
//!   neighbours.
//! - Reallocation grows or shrinks in place when the next block (or the end of
//!   the buffer) leaves room, and otherwise moves, copying the common prefix.
//!
//! ## Crate Structure
//!
//! ```text
//!   fixalloc
//!   ├── align      - align_up! macro, MAX_ALIGN
//!   ├── block      - Header and Link (internal)
//!   ├── config     - AllocatorConfig (TOML / environment)
//!   ├── error      - AllocError, ConfigError
//!   ├── facade     - AllocatorFacade: malloc / calloc / realloc / free
//!   ├── fixed      - FixedBufferAllocator
//!   ├── hooks      - install() and the C-ABI fixalloc_* functions
//!   └── upstream   - UpstreamAllocator, SystemUpstream
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fixalloc::{AllocatorConfig, AllocatorFacade};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AllocatorConfig::default().with_env_overrides()?;
//!     let mut facade = AllocatorFacade::system(config)?;
//!
//!     let ptr = facade.malloc(64)?;
//!     let ptr = unsafe { facade.realloc(ptr, 128)? };
//!     unsafe { facade.free(ptr) };
//!
//!     // Or make it the target of the C hooks for the rest of the process.
//!     fixalloc::hooks::install(Box::leak(Box::new(facade)))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure
//!
//! Running out of both buffer and upstream memory is reported as
//! [`AllocError::Exhausted`]. Only the C hooks turn it into a process abort,
//! after logging a diagnostic.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Linear placement**: First-fit walk over every live block
//! - **Unix-only**: The system upstream uses `posix_memalign` and `free`
//!
//! ## Safety
//!
//! Freeing or reallocating a pointer that did not come from the same
//! allocator, or with a different alignment, is undefined behavior.

pub mod align;
mod block;
mod config;
mod error;
mod facade;
mod fixed;
pub mod hooks;
mod upstream;

pub use align::MAX_ALIGN;
pub use config::{ALIGNMENT_VAR, AllocatorConfig, CAPACITY_VAR, MAX_ALIGNMENT};
pub use error::{AllocError, ConfigError};
pub use facade::AllocatorFacade;
pub use fixed::{Blocks, FixedBufferAllocator, Stats};
pub use upstream::{SystemUpstream, UpstreamAllocator};
