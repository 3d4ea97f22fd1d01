//! Process-wide C entry points.
//!
//! A facade is registered once at startup with [`install`]; afterwards the
//! `fixalloc_*` functions (or the [`HOOKS`] table) can be handed to any
//! library that accepts `malloc`-style callbacks. This is the only place an
//! [`AllocError`] ends the process.
//!
//! ```rust,ignore
//! let facade = AllocatorFacade::system(AllocatorConfig::default())?;
//! fixalloc::hooks::install(Box::leak(Box::new(facade)))?;
//!
//! unsafe { some_codec_set_allocator(HOOKS.malloc, HOOKS.realloc, HOOKS.free) };
//! ```

use std::{
  fmt, process, ptr,
  sync::atomic::{AtomicPtr, Ordering},
};

use libc::c_void;
use tracing::error;

use crate::{
  error::{AllocError, ConfigError},
  facade::AllocatorFacade,
};

pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);

/// The four hooks as function pointers, for callback-style registration.
#[derive(Clone, Copy)]
pub struct Hooks {
  pub malloc: MallocFn,
  pub calloc: CallocFn,
  pub realloc: ReallocFn,
  pub free: FreeFn,
}

pub const HOOKS: Hooks = Hooks {
  malloc: fixalloc_malloc,
  calloc: fixalloc_calloc,
  realloc: fixalloc_realloc,
  free: fixalloc_free,
};

static INSTALLED: AtomicPtr<AllocatorFacade> = AtomicPtr::new(ptr::null_mut());

/// Registers `facade` as the target of the C hooks.
///
/// Succeeds once per process. The hooks are not synchronized: after
/// installation they must be called from one thread at a time.
pub fn install(facade: &'static mut AllocatorFacade) -> Result<(), ConfigError> {
  INSTALLED
    .compare_exchange(ptr::null_mut(), facade, Ordering::AcqRel, Ordering::Acquire)
    .map(|_| ())
    .map_err(|_| ConfigError::AlreadyInstalled)
}

pub fn installed() -> bool {
  !INSTALLED.load(Ordering::Acquire).is_null()
}

fn facade() -> &'static mut AllocatorFacade {
  let facade = INSTALLED.load(Ordering::Acquire);

  if facade.is_null() {
    fatal(format_args!("allocation hook called before hooks::install"));
  }

  unsafe { &mut *facade }
}

fn fatal(message: fmt::Arguments<'_>) -> ! {
  error!(reason = %message, "fatal allocation failure");
  eprintln!("fixalloc: {message}");
  process::abort()
}

fn or_abort(result: Result<*mut u8, AllocError>) -> *mut c_void {
  match result {
    Ok(ptr) => ptr as *mut c_void,
    Err(err) => fatal(format_args!("{err}")),
  }
}

/// # Safety
///
/// A facade must be installed; see [`install`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fixalloc_malloc(size: usize) -> *mut c_void {
  or_abort(facade().malloc(size))
}

/// # Safety
///
/// A facade must be installed; see [`install`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fixalloc_calloc(
  count: usize,
  size: usize,
) -> *mut c_void {
  or_abort(facade().calloc(count, size))
}

/// # Safety
///
/// `ptr` must be null or a live pointer from these hooks.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fixalloc_realloc(
  ptr: *mut c_void,
  size: usize,
) -> *mut c_void {
  or_abort(unsafe { facade().realloc(ptr as *mut u8, size) })
}

/// # Safety
///
/// `ptr` must be null or a live pointer from these hooks.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fixalloc_free(ptr: *mut c_void) {
  if ptr.is_null() {
    return;
  }
  unsafe { facade().free(ptr as *mut u8) }
}
