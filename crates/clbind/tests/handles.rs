//! Integration tests for handle ownership against the simulated backend.

use clbind::prelude::*;
use clbind::sim::{SimConfig, SimSession};
use clbind::status;

const SOURCE: &str = "kernel void scale(global float* data, float factor) {}\n";

fn session(devices: &[&str]) -> SimSession {
    SimSession::with_config(SimConfig::instant(), ClConfig::for_testing(), devices)
        .expect("Failed to create simulated session")
}

/// Test that dispose issues exactly one native release, however often called.
#[test]
fn test_dispose_releases_exactly_once() {
    let s = session(&["gpu0"]);
    let mut program = s
        .context
        .create_program_with_source(&[SOURCE])
        .expect("Failed to create program");
    let raw = program.raw().expect("Program handle");

    program.dispose();
    program.dispose();
    assert!(!program.is_valid());
    drop(program);

    assert_eq!(s.api.release_calls(raw), 1);
    assert_eq!(s.api.refcount(raw), None);
}

/// Test that a disposed wrapper refuses use without touching the backend.
#[test]
fn test_disposed_program_is_invalid_resource() {
    let s = session(&["gpu0"]);
    let mut program = s
        .context
        .create_program_with_source(&[SOURCE])
        .expect("Failed to create program");
    let raw = program.raw().expect("Program handle");
    program.dispose();

    let err = program.build(&[], "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResource);
    assert_eq!(err.code(), Some(status::INVALID_PROGRAM));

    let err = program.create_kernel("scale").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResource);
    assert_eq!(s.api.release_calls(raw), 1);
}

/// Test that retained shares are given back before the owning reference.
#[test]
fn test_retain_release_shares() {
    let s = session(&["gpu0"]);
    let mut buffer = s
        .context
        .create_buffer(MemFlags::READ_WRITE, 64, None)
        .expect("Failed to create buffer");
    let raw = buffer.raw().expect("Buffer handle");

    buffer.retain().expect("Failed to retain");
    assert_eq!(s.api.refcount(raw), Some(2));
    assert_eq!(buffer.reference_count().expect("refcount"), 2);

    buffer.release().expect("Failed to release share");
    assert!(buffer.is_valid());
    assert_eq!(s.api.refcount(raw), Some(1));

    // Nothing retained any more: this is the final release.
    buffer.release().expect("Failed to release");
    assert!(!buffer.is_valid());
    assert_eq!(s.api.refcount(raw), None);
    assert_eq!(s.api.release_calls(raw), 2);

    drop(buffer);
    assert_eq!(s.api.release_calls(raw), 2);
}

/// Test that a clone keeps the object alive after the original is dropped.
#[test]
fn test_try_clone_owns_a_reference() {
    let s = session(&["gpu0"]);
    let buffer = s
        .context
        .create_buffer(MemFlags::READ_ONLY, 128, None)
        .expect("Failed to create buffer");
    let raw = buffer.raw().expect("Buffer handle");

    let clone = buffer.try_clone().expect("Failed to clone");
    assert_eq!(s.api.refcount(raw), Some(2));
    drop(buffer);

    assert_eq!(s.api.refcount(raw), Some(1));
    assert_eq!(clone.size(), 128);
    assert_eq!(clone.native_size().expect("size"), 128);

    drop(clone);
    assert_eq!(s.api.refcount(raw), None);
    assert_eq!(s.api.release_calls(raw), 2);
}

/// Test that a kernel keeps its program alive on the native side.
#[test]
fn test_kernel_outlives_program_wrapper() {
    let s = session(&["gpu0"]);
    let baseline = s.api.live_objects();

    let program = s
        .context
        .create_program_with_source(&[SOURCE])
        .expect("Failed to create program");
    program.build(&[], "").expect("Failed to build");
    let kernel = program.create_kernel("scale").expect("Failed to create kernel");
    let program_raw = program.raw().expect("Program handle");

    drop(program);
    assert_eq!(s.api.refcount(program_raw), Some(1));
    assert_eq!(kernel.num_args().expect("num_args"), 2);
    assert_eq!(kernel.function_name().expect("function name"), "scale");

    drop(kernel);
    assert_eq!(s.api.refcount(program_raw), None);
    assert_eq!(s.api.live_objects(), baseline);
}

/// Test that dropping every wrapper leaves only the devices behind.
#[test]
fn test_session_teardown_releases_everything() {
    let s = session(&["gpu0", "gpu1"]);
    let api = s.api.clone();
    let context = s.context.raw().expect("Context handle");
    let queue = s.queue.raw().expect("Queue handle");

    let buffer = s
        .context
        .create_buffer(MemFlags::READ_WRITE, 16, Some(&[7u8; 16][..]))
        .expect("Failed to create buffer");
    drop(buffer);
    drop(s);

    assert_eq!(api.release_calls(context), 1);
    assert_eq!(api.release_calls(queue), 1);
    assert_eq!(api.live_objects(), 2);
}
