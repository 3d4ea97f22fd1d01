use std::{error::Error, ptr};

use fixalloc::{AllocatorConfig, AllocatorFacade, hooks};
use tracing_subscriber::EnvFilter;

/// Prints what the buffer currently holds.
fn print_blocks(
  label: &str,
  facade: &AllocatorFacade,
) {
  let blocks: Vec<_> = facade.allocator().blocks().collect();
  println!("[{label}] live blocks (offset, length) = {blocks:?}");
  println!("[{label}] {:?}", facade.stats());
}

fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")))
    .init();

  // FIXALLOC_CAPACITY / FIXALLOC_ALIGNMENT override the defaults.
  let config = AllocatorConfig::from_toml_str("capacity = 1024")?.with_env_overrides()?;
  let mut facade = AllocatorFacade::system(config)?;

  // 1) Two blocks side by side.
  let first = facade.malloc(100)?;
  let second = facade.malloc(100)?;
  print_blocks("1", &facade);

  // 2) Free the first one and take its gap again.
  unsafe { facade.free(first) };
  let third = facade.malloc(90)?;
  println!(
    "\n[2] third == first? {}",
    if third == first { "yes, the gap was reused" } else { "no" }
  );
  print_blocks("2", &facade);

  // 3) Too big for the buffer: served upstream.
  let big = facade.malloc(2000)?;
  println!("\n[3] big block inside buffer? {}", facade.allocator().contains(big));
  unsafe { facade.free(big) };

  // 4) Grow the tail block in place, then past the end of the buffer.
  unsafe {
    ptr::write_bytes(second, 0x42, 100);
    let same = facade.realloc(second, 300)?;
    println!("\n[4] grew in place? {}", same == second);

    let moved = facade.realloc(same, 4000)?;
    println!("[4] moved out of the buffer? {}", !facade.allocator().contains(moved));
    println!("[4] first byte after move = {:#X}", *moved);
    facade.free(moved);
    facade.free(third);
  }
  print_blocks("4", &facade);

  // 5) Hand the facade to the C hooks for the rest of the process.
  hooks::install(Box::leak(Box::new(facade)))?;
  unsafe {
    let ptr = (hooks::HOOKS.calloc)(4, 8);
    println!("\n[5] calloc through the hook table = {ptr:?}");
    (hooks::HOOKS.free)(ptr);
  }

  Ok(())
}
