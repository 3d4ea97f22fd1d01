use std::{
  env,
  process::{Command, Output},
};

use fixalloc::{
  AllocatorConfig, AllocatorFacade,
  hooks::{self, fixalloc_malloc},
};

// The fatal paths abort, so each case re-runs this binary with only itself
// selected and inspects how the child died.
const CHILD_VAR: &str = "FIXALLOC_FATAL_CHILD";

fn in_child() -> bool {
  env::var_os(CHILD_VAR).is_some()
}

fn run_child(test: &str) -> Output {
  Command::new(env::current_exe().unwrap())
    .args(["--exact", test, "--nocapture", "--test-threads=1"])
    .env(CHILD_VAR, "1")
    .output()
    .unwrap()
}

fn assert_aborted(
  output: &Output,
  diagnostic: &str,
) {
  let stderr = String::from_utf8_lossy(&output.stderr);

  assert!(!output.status.success(), "child exited cleanly, stderr: {stderr}");
  assert!(stderr.contains(diagnostic), "missing {diagnostic:?} in stderr: {stderr}");
}

#[test]
fn test_hook_before_install_aborts() {
  if in_child() {
    unsafe { fixalloc_malloc(8) };
    return;
  }

  let output = run_child("test_hook_before_install_aborts");
  assert_aborted(&output, "fixalloc: allocation hook called before hooks::install");
}

#[test]
fn test_exhausted_hook_aborts() {
  if in_child() {
    let facade = AllocatorFacade::system(AllocatorConfig::with_capacity(256)).unwrap();
    hooks::install(Box::leak(Box::new(facade))).unwrap();

    // No upstream can serve this: the header no longer fits in usize.
    unsafe { fixalloc_malloc(usize::MAX) };
    return;
  }

  let output = run_child("test_exhausted_hook_aborts");
  assert_aborted(&output, "fixalloc: memory exhausted");
}
