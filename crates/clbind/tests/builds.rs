//! Integration tests for program builds, binaries and kernels.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clbind::prelude::*;
use clbind::sim::{SimConfig, SimSession, BINARY_MAGIC};
use clbind::status;

const SOURCE: &str = r#"
__kernel void scale(__global float* data, float factor) {
    data[get_global_id(0)] *= factor;
}

__kernel void fill(__global int* out, int value, uint n) {}
"#;

fn session(devices: &[&str]) -> SimSession {
    SimSession::with_config(SimConfig::instant(), ClConfig::for_testing(), devices)
        .expect("Failed to create simulated session")
}

fn program(s: &SimSession, source: &str) -> Program {
    s.context
        .create_program_with_source(&[source])
        .expect("Failed to create program")
}

/// Test a successful build on every device of the context.
#[test]
fn test_build_all_devices() {
    let s = session(&["gpu0", "gpu1"]);
    let program = program(&s, SOURCE);

    for device in &s.devices {
        assert_eq!(program.build_status(device).expect("status"), BuildStatus::None);
    }

    program.build(&[], "-D N=4").expect("Failed to build");

    for device in &s.devices {
        assert_eq!(program.build_status(device).expect("status"), BuildStatus::Success);
        assert_eq!(program.build_log(device).expect("log"), "");
        assert_eq!(
            program.build_options(device).expect("options"),
            "-cl-std=CL1.1 -D N=4"
        );
    }
    assert_eq!(program.num_devices().expect("num_devices"), 2);
    assert_eq!(
        program.device_ids().expect("device ids"),
        s.devices.iter().map(Device::id).collect::<Vec<_>>()
    );
    assert_eq!(program.source().expect("source"), SOURCE);
}

/// Test that empty options leave only the baseline flag.
#[test]
fn test_baseline_flag_only() {
    let s = session(&["gpu0"]);
    let program = program(&s, SOURCE);
    program.build(&[], "").expect("Failed to build");
    assert_eq!(program.build_options(s.device(0)).expect("options"), "-cl-std=CL1.1");
}

/// Test that a custom baseline flag is prepended to every build.
#[test]
fn test_configured_baseline_flag() {
    let config = ClConfigBuilder::new().with_baseline_flag("-cl-std=CL1.2").build();
    let s = SimSession::with_config(SimConfig::instant(), config, &["gpu0"])
        .expect("Failed to create simulated session");
    let program = program(&s, SOURCE);

    program.build(&[], "-Werror").expect("Failed to build");
    assert_eq!(
        program.build_options(s.device(0)).expect("options"),
        "-cl-std=CL1.2 -Werror"
    );
}

/// Test that one failing device is diagnosed with its own log while the other
/// device still reports success.
#[test]
fn test_failure_names_device_and_log() {
    let s = session(&["gpu0", "gpu1"]);
    s.api.fail_builds_on(s.device(1).id(), "syntax error at line 4");
    let program = program(&s, SOURCE);

    let err = program.build(&[], "").unwrap_err();
    assert!(err.is_build_failure());
    assert_eq!(err.kind(), ErrorKind::BuildFailure);

    let build = err.as_build_error().expect("Missing build diagnosis");
    assert_eq!(build.device.as_ref().map(Device::name), Some("gpu1"));
    assert_eq!(build.message, "syntax error at line 4");

    assert_eq!(program.build_status(s.device(0)).expect("status"), BuildStatus::Success);
    assert_eq!(program.build_status(s.device(1)).expect("status"), BuildStatus::Error);
}

/// Test that a stale failure on a device outside the build is not blamed.
#[test]
fn test_failure_ignores_untargeted_devices() {
    let s = session(&["gpu0", "gpu1"]);
    let program = program(&s, SOURCE);

    s.api.fail_builds_on(s.device(0).id(), "old failure on gpu0");
    program.build(&[], "").unwrap_err();
    assert_eq!(program.build_status(s.device(0)).expect("status"), BuildStatus::Error);

    s.api.clear_build_failures();
    s.api.fail_builds_on(s.device(1).id(), "new failure on gpu1");
    let err = program.build(&[s.device(1).clone()], "").unwrap_err();

    let build = err.as_build_error().expect("Missing build diagnosis");
    assert_eq!(build.device.as_ref().map(Device::name), Some("gpu1"));
    assert_eq!(build.message, "new failure on gpu1");

    // The earlier record on gpu0 is left as it was.
    assert_eq!(program.build_log(s.device(0)).expect("log"), "old failure on gpu0");
}

/// Test that compiler diagnostics from the source end up in the error.
#[test]
fn test_error_directive_log() {
    let s = session(&["gpu0"]);
    let program = program(&s, "kernel void k() {}\n\n#error unsupported type\n");

    let err = program.build(&[], "").unwrap_err();
    let build = err.as_build_error().expect("Missing build diagnosis");
    assert_eq!(build.message, "gpu0:3: error: unsupported type");
    assert_eq!(
        err.to_string(),
        "build error on \"gpu0\": gpu0:3: error: unsupported type"
    );
}

/// Test that a failure without any log text is still reported as a build
/// failure.
#[test]
fn test_failure_without_log() {
    let s = session(&["gpu0"]);
    s.api.fail_builds_on(s.device(0).id(), "");
    let program = program(&s, SOURCE);

    let err = program.build(&[], "").unwrap_err();
    let build = err.as_build_error().expect("Missing build diagnosis");
    assert_eq!(build.device, None);
    assert_eq!(build.message, BuildError::NO_LOG);
}

/// Test that rejected options surface as an invalid value, not a build
/// failure, and leave the build state untouched.
#[test]
fn test_invalid_options() {
    let s = session(&["gpu0"]);
    let program = program(&s, SOURCE);

    let err = program.build(&[], "-cl-std=CL9.9").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(err.code(), Some(status::INVALID_BUILD_OPTIONS));
    assert_eq!(program.build_status(s.device(0)).expect("status"), BuildStatus::None);

    let err = program.build(&[], "-D A\0B").unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_BUILD_OPTIONS));
}

/// Test building for a subset of the program's devices.
#[test]
fn test_build_device_subset() {
    let s = session(&["gpu0", "gpu1"]);
    let program = program(&s, SOURCE);

    program.build(&[s.device(1).clone()], "").expect("Failed to build");
    assert_eq!(program.build_status(s.device(0)).expect("status"), BuildStatus::None);
    assert_eq!(program.build_status(s.device(1)).expect("status"), BuildStatus::Success);
    assert!(program.create_kernel("fill").is_ok());
}

/// Test kernel extraction and kernel queries.
#[test]
fn test_kernels() {
    let s = session(&["gpu0"]);
    let program = program(&s, SOURCE);

    let err = program.create_kernel("scale").unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_PROGRAM_EXECUTABLE));

    program.build(&[], "").expect("Failed to build");

    let scale = program.create_kernel("scale").expect("Failed to create kernel");
    assert_eq!(scale.name(), "scale");
    assert_eq!(scale.num_args().expect("num_args"), 2);
    assert_eq!(scale.reference_count().expect("refcount"), 1);

    let fill = program.create_kernel("fill").expect("Failed to create kernel");
    assert_eq!(fill.num_args().expect("num_args"), 3);

    let err = program.create_kernel("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(err.code(), Some(status::INVALID_KERNEL_NAME));
}

/// Test that built binaries recreate an equivalent program.
#[test]
fn test_binary_round_trip() {
    let s = session(&["gpu0", "gpu1"]);
    let original = program(&s, SOURCE);
    original.build(&[], "").expect("Failed to build");

    let sizes = original.binary_sizes().expect("binary sizes");
    let binaries = original.binaries().expect("binaries");
    assert_eq!(binaries.len(), 2);
    for (binary, size) in binaries.iter().zip(&sizes) {
        assert_eq!(binary.len(), *size);
        assert!(binary.starts_with(BINARY_MAGIC));
    }

    let slices: Vec<&[u8]> = binaries.iter().map(Vec::as_slice).collect();
    let restored = s
        .context
        .create_program_with_binary(&s.devices, &slices)
        .expect("Failed to create program from binaries");
    assert_eq!(restored.source().expect("source"), "");

    restored.build(&[], "").expect("Failed to build");
    let kernel = restored.create_kernel("fill").expect("Failed to create kernel");
    assert_eq!(kernel.num_args().expect("num_args"), 3);
}

/// Test that rejected binaries surface the native reason.
#[test]
fn test_rejected_binaries() {
    let s = session(&["gpu0", "gpu1"]);
    let devices = &s.devices[..1];

    let err = s
        .context
        .create_program_with_binary(devices, &[b"\x7fELF".as_slice()])
        .unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_BINARY));

    let empty: &[u8] = &[];
    let err = s.context.create_program_with_binary(devices, &[empty]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);

    // One binary per device.
    let err = s
        .context
        .create_program_with_binary(&s.devices, &[BINARY_MAGIC])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

/// Test an asynchronous build that succeeds.
#[test]
fn test_build_async() {
    let s = session(&["gpu0", "gpu1"]);
    let program = program(&s, SOURCE);

    let pending = program.build_async(&[], "").expect("Failed to start build");
    pending.wait().expect("Build failed");
    assert_eq!(pending.state(), BuildStatus::Success);
    assert!(matches!(pending.try_result(), Some(Ok(()))));

    for device in &s.devices {
        assert_eq!(program.build_status(device).expect("status"), BuildStatus::Success);
    }
}

/// Test that an asynchronous failure carries the same diagnosis as a
/// blocking one.
#[test]
fn test_build_async_failure() {
    let s = session(&["gpu0", "gpu1"]);
    s.api.fail_builds_on(s.device(0).id(), "unresolved symbol foo");
    let program = program(&s, SOURCE);

    let pending = program.build_async(&[], "").expect("Failed to start build");
    let err = pending.wait().unwrap_err();
    let build = err.as_build_error().expect("Missing build diagnosis");
    assert_eq!(build.device.as_ref().map(Device::name), Some("gpu0"));
    assert_eq!(build.message, "unresolved symbol foo");
    assert_eq!(pending.state(), BuildStatus::Error);
}

/// Test that the completion callback runs exactly once, even after the
/// program wrapper is gone.
#[test]
fn test_build_callback_runs_once() {
    let s = session(&["gpu0"]);
    let program = program(&s, SOURCE);
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let counter = Arc::clone(&calls);
    program
        .build_with_callback(&[], "", move |outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(outcome);
        })
        .expect("Failed to start build");
    drop(program);

    let outcome = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("Callback never ran");
    assert!(outcome.is_ok());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that a build the native side refuses never runs its callback.
#[test]
fn test_refused_build_drops_callback() {
    let s = session(&["gpu0"]);
    let program = program(&s, SOURCE);
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let err = program
        .build_with_callback(&[], "-cl-std=CL0.1", move |_| flag.store(true, Ordering::SeqCst))
        .unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_BUILD_OPTIONS));

    // The callback's clone of the program was released with it.
    assert_eq!(program.reference_count().expect("refcount"), 1);
    assert!(!ran.load(Ordering::SeqCst));
}

/// Test that a second build while one is running is rejected.
#[test]
fn test_build_while_in_progress() {
    let sim = SimConfig::instant().with_build_latency(Duration::from_millis(500));
    let s = SimSession::with_config(sim, ClConfig::for_testing(), &["gpu0"])
        .expect("Failed to create simulated session");
    let program = program(&s, SOURCE);

    let pending = program.build_async(&[], "").expect("Failed to start build");
    assert_eq!(program.build_status(s.device(0)).expect("status"), BuildStatus::InProgress);

    let err = program.build(&[], "").unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_OPERATION));

    pending.wait().expect("Build failed");
    assert_eq!(program.build_status(s.device(0)).expect("status"), BuildStatus::Success);
}

/// Test that unloading the compiler does not prevent later builds.
#[test]
fn test_unload_compiler() {
    let s = session(&["gpu0"]);
    unload_compiler(&*s.native()).expect("Failed to unload compiler");

    let program = program(&s, SOURCE);
    program.build(&[], "").expect("Failed to build");
}
