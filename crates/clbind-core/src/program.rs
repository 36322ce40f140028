//! Programs, builds and kernels.
//!
//! A build moves each device's build record from `None` (or a previous
//! outcome) through `InProgress` to `Success` or `Error`. When a build fails,
//! the per-device logs are walked to produce a [`BuildError`] naming the
//! device that failed:
//!
//! 1. the first device in `Error` state with a non-empty log,
//! 2. otherwise the first device with any log,
//! 3. otherwise a synthesized "no log entries" failure.

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::callback::build_notifications;
use crate::config::{ClConfig, QueryConfig};
use crate::context::{Context, Device};
use crate::error::{BuildError, ClError, Result};
use crate::handle::{impl_resource, Handle};
use crate::native::{KernelInfo, NativeApi, ProgramBuildInfo, ProgramInfo, RawHandle, ResourceKind};
use crate::query::{query_list, query_scalar, query_string};
use crate::status::{self, Status};

/// Per-device build state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    /// No build has been attempted.
    None,
    /// A build is running.
    InProgress,
    /// The last build succeeded.
    Success,
    /// The last build failed.
    Error,
}

impl BuildStatus {
    /// Native build status code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::None => -1,
            Self::Error => -2,
            Self::InProgress => -3,
        }
    }

    /// Decode a native build status code.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            -1 => Some(Self::None),
            -2 => Some(Self::Error),
            -3 => Some(Self::InProgress),
            _ => None,
        }
    }
}

fn device_ids(devices: &[Device]) -> Vec<RawHandle> {
    devices.iter().map(Device::id).collect()
}

fn binary_rejection(code: Status) -> &'static str {
    match code {
        status::INVALID_VALUE => "empty binary",
        status::INVALID_BINARY => "invalid binary",
        _ => "unknown error",
    }
}

impl Context {
    /// Create a program from one or more source strings.
    ///
    /// The program is associated with every device of this context.
    pub fn create_program_with_source(&self, sources: &[&str]) -> Result<Program> {
        if sources.is_empty() {
            return Err(ClError::invalid_value());
        }

        let mut code = status::SUCCESS;
        let raw = self
            .api()
            .create_program_with_source(self.raw()?, sources, &mut code);
        status::translate(code)?;

        let handle = Handle::adopt(self.api().clone(), ResourceKind::Program, raw)?;
        debug!(program = %raw, sources = sources.len(), "Created program from source");
        Ok(Program {
            handle,
            devices: self.devices().to_vec(),
            config: Arc::clone(self.config()),
        })
    }

    /// Create a program from one precompiled binary per device.
    ///
    /// Each rejected binary is logged with its index and reason before the
    /// overall status is translated.
    pub fn create_program_with_binary(&self, devices: &[Device], binaries: &[&[u8]]) -> Result<Program> {
        if devices.is_empty() || devices.len() != binaries.len() {
            return Err(ClError::invalid_value());
        }

        let ids = device_ids(devices);
        let mut binary_status = vec![status::SUCCESS; devices.len()];
        let mut code = status::SUCCESS;
        let raw = self.api().create_program_with_binary(
            self.raw()?,
            &ids,
            binaries,
            &mut binary_status,
            &mut code,
        );

        for (index, (&binary_code, device)) in binary_status.iter().zip(devices).enumerate() {
            if binary_code != status::SUCCESS {
                warn!(
                    index,
                    device = device.name(),
                    code = binary_code,
                    reason = binary_rejection(binary_code),
                    "Rejected program binary"
                );
            }
        }
        status::translate(code)?;

        let handle = Handle::adopt(self.api().clone(), ResourceKind::Program, raw)?;
        debug!(program = %raw, devices = devices.len(), "Created program from binaries");
        Ok(Program {
            handle,
            devices: devices.to_vec(),
            config: Arc::clone(self.config()),
        })
    }
}

/// A program built from sources or binaries.
#[derive(Debug)]
pub struct Program {
    pub(crate) handle: Handle,
    devices: Vec<Device>,
    config: Arc<ClConfig>,
}

impl_resource!(Program);

impl Program {
    /// Native program handle.
    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    /// Devices this program is associated with.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Second owning wrapper for the same program.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            handle: self.handle.try_clone()?,
            devices: self.devices.clone(),
            config: Arc::clone(&self.config),
        })
    }

    fn api(&self) -> &Arc<dyn NativeApi> {
        self.handle.api()
    }

    /// Baseline flag, then one space and `options` when non-empty.
    fn compose_options(&self, options: &str) -> Result<CString> {
        let baseline = self.config.build.baseline_flag.as_str();
        let joined = match (baseline.is_empty(), options.is_empty()) {
            (_, true) => baseline.to_string(),
            (true, false) => options.to_string(),
            (false, false) => format!("{} {}", baseline, options),
        };
        CString::new(joined).map_err(|_| ClError::InvalidValue {
            code: status::INVALID_BUILD_OPTIONS,
        })
    }

    fn targets(&self, devices: &[Device]) -> Vec<Device> {
        if devices.is_empty() {
            self.devices.clone()
        } else {
            devices.to_vec()
        }
    }

    /// Compile and link for `devices` (all associated devices when empty).
    ///
    /// Blocks until the build finishes. A failed build returns
    /// [`ClError::Build`] with the failing device and its log.
    pub fn build(&self, devices: &[Device], options: &str) -> Result<()> {
        let raw = self.raw()?;
        let options = self.compose_options(options)?;
        let targets = self.targets(devices);

        info!(program = %raw, devices = targets.len(), options = ?options, "Building program");
        let code = self
            .api()
            .build_program(raw, &device_ids(&targets), &options, None);
        if code == status::SUCCESS {
            info!(program = %raw, "Program built");
            return Ok(());
        }

        let err = self.diagnose_failure(&targets, code);
        info!(program = %raw, error = %err, "Program build failed");
        Err(err)
    }

    /// Start a build and deliver its outcome to `on_complete`.
    ///
    /// The notification is registered before the native build is issued and
    /// keeps its own reference to the program. If this returns `Err`, the
    /// native side never accepted the build and `on_complete` is dropped
    /// without running; otherwise it runs exactly once, possibly on another
    /// thread.
    pub fn build_with_callback<F>(&self, devices: &[Device], options: &str, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let raw = self.raw()?;
        let options = self.compose_options(options)?;
        let targets = self.targets(devices);
        let keeper = self.try_clone()?;
        let requested = targets.clone();

        let registry = build_notifications();
        let token = registry.register(move |_program| {
            let outcome = keeper.outcome(&requested);
            on_complete(outcome);
        })?;

        info!(program = %raw, devices = targets.len(), token = %token, options = ?options, "Building program asynchronously");
        let code = self
            .api()
            .build_program(raw, &device_ids(&targets), &options, Some(token));
        if code != status::SUCCESS && registry.unregister(token) {
            return Err(self.diagnose_failure(&targets, code));
        }
        Ok(())
    }

    /// Start a build and return a handle to wait on its outcome.
    pub fn build_async(&self, devices: &[Device], options: &str) -> Result<PendingBuild> {
        let pending = PendingBuild::new();
        let slot = Arc::clone(&pending.slot);
        self.build_with_callback(devices, options, move |outcome| slot.complete(outcome))?;
        Ok(pending)
    }

    /// Outcome of a finished build for `targets`.
    fn outcome(&self, targets: &[Device]) -> Result<()> {
        for device in targets {
            if self.build_status(device)? != BuildStatus::Success {
                return Err(self.diagnose_failure(targets, status::BUILD_PROGRAM_FAILURE));
            }
        }
        Ok(())
    }

    /// Error for a failed build, blaming only devices that build targeted.
    fn diagnose_failure(&self, targets: &[Device], code: Status) -> ClError {
        match self.find_failure(targets) {
            Ok(Some(build)) => build.into(),
            Ok(None) if code == status::BUILD_PROGRAM_FAILURE => BuildError::without_log().into(),
            Ok(None) => status::to_error(code).unwrap_or_else(ClError::null_handle),
            Err(err) => err,
        }
    }

    fn find_failure(&self, targets: &[Device]) -> Result<Option<BuildError>> {
        let mut first_log = None;
        for device in targets {
            let state = self.build_status(device)?;
            let log = self.build_log(device)?;
            if log.is_empty() {
                continue;
            }
            if state == BuildStatus::Error {
                return Ok(Some(BuildError::on_device(device.clone(), log)));
            }
            if first_log.is_none() {
                first_log = Some(BuildError::on_device(device.clone(), log));
            }
        }
        Ok(first_log)
    }

    fn build_info_string(&self, device: &Device, param: ProgramBuildInfo, config: &QueryConfig) -> Result<String> {
        let raw = self.raw()?;
        let api = self.api();
        query_string(config, |value, size_ret| {
            api.program_build_info(raw, device.id(), param, value, size_ret)
        })
    }

    /// Build state on `device`. Never mutates anything.
    pub fn build_status(&self, device: &Device) -> Result<BuildStatus> {
        let raw = self.raw()?;
        let api = self.api();
        let code = query_scalar::<i32, _>(|value, size_ret| {
            api.program_build_info(raw, device.id(), ProgramBuildInfo::Status, value, size_ret)
        })?;
        BuildStatus::from_code(code).ok_or(ClError::Unknown { code })
    }

    /// Compiler log of the last build on `device`.
    pub fn build_log(&self, device: &Device) -> Result<String> {
        let config = QueryConfig {
            max_size: self.config.build.log_limit,
            ..self.config.query.clone()
        };
        self.build_info_string(device, ProgramBuildInfo::Log, &config)
    }

    /// Options of the last build on `device`.
    pub fn build_options(&self, device: &Device) -> Result<String> {
        self.build_info_string(device, ProgramBuildInfo::Options, &self.config.query)
    }

    fn info_scalar<T: bytemuck::Pod>(&self, param: ProgramInfo) -> Result<T> {
        let raw = self.raw()?;
        let api = self.api();
        query_scalar(|value, size_ret| api.program_info(raw, param, value, size_ret))
    }

    /// Native reference count. Diagnostic only.
    pub fn reference_count(&self) -> Result<u32> {
        self.info_scalar(ProgramInfo::ReferenceCount)
    }

    /// Number of devices the native side associates with the program.
    pub fn num_devices(&self) -> Result<u32> {
        self.info_scalar(ProgramInfo::NumDevices)
    }

    /// Device handles the native side associates with the program.
    pub fn device_ids(&self) -> Result<Vec<RawHandle>> {
        let raw = self.raw()?;
        let api = self.api();
        query_list(&self.config.query, |value, size_ret| {
            api.program_info(raw, ProgramInfo::Devices, value, size_ret)
        })
    }

    /// Concatenated program source (empty for binary programs).
    pub fn source(&self) -> Result<String> {
        let raw = self.raw()?;
        let api = self.api();
        query_string(&self.config.query, |value, size_ret| {
            api.program_info(raw, ProgramInfo::Source, value, size_ret)
        })
    }

    /// Binary size per associated device, in device order.
    pub fn binary_sizes(&self) -> Result<Vec<usize>> {
        let raw = self.raw()?;
        let api = self.api();
        query_list(&self.config.query, |value, size_ret| {
            api.program_info(raw, ProgramInfo::BinarySizes, value, size_ret)
        })
    }

    /// Binary per associated device, in device order.
    pub fn binaries(&self) -> Result<Vec<Vec<u8>>> {
        let raw = self.raw()?;
        let mut binaries: Vec<Vec<u8>> = self
            .binary_sizes()?
            .into_iter()
            .map(|size| vec![0u8; size])
            .collect();
        let mut outputs: Vec<&mut [u8]> = binaries.iter_mut().map(Vec::as_mut_slice).collect();
        status::translate(self.api().program_binaries(raw, &mut outputs))?;
        Ok(binaries)
    }

    /// Extract the kernel `name` from the built program.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let raw = self.raw()?;
        let c_name = CString::new(name).map_err(|_| ClError::InvalidValue {
            code: status::INVALID_KERNEL_NAME,
        })?;

        let mut code = status::SUCCESS;
        let kernel = self.api().create_kernel(raw, &c_name, &mut code);
        status::translate(code)?;

        let handle = Handle::adopt(self.api().clone(), ResourceKind::Kernel, kernel)?;
        debug!(program = %raw, kernel = %kernel, name, "Created kernel");
        Ok(Kernel {
            handle,
            name: name.to_string(),
            config: Arc::clone(&self.config),
        })
    }
}

/// Release compiler resources. A later build reloads the compiler.
pub fn unload_compiler(api: &dyn NativeApi) -> Result<()> {
    status::translate(api.unload_compiler())
}

#[derive(Debug, Default)]
struct BuildSlot {
    outcome: Mutex<Option<Result<()>>>,
    done: Condvar,
}

impl BuildSlot {
    fn complete(&self, outcome: Result<()>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }
}

/// Completion signal of an asynchronous build.
#[derive(Debug, Clone)]
pub struct PendingBuild {
    slot: Arc<BuildSlot>,
}

impl PendingBuild {
    fn new() -> Self {
        Self {
            slot: Arc::new(BuildSlot::default()),
        }
    }

    /// Block until the build finishes.
    pub fn wait(&self) -> Result<()> {
        let mut outcome = self.slot.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.slot.done.wait(&mut outcome);
        }
    }

    /// Block for at most `timeout`. `None` if the build is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let mut outcome = self.slot.outcome.lock();
        if outcome.is_none() {
            let _ = self.slot.done.wait_for(&mut outcome, timeout);
        }
        outcome.clone()
    }

    /// The outcome if the build has finished. Never blocks.
    pub fn try_result(&self) -> Option<Result<()>> {
        self.slot.outcome.lock().clone()
    }

    /// `InProgress`, then `Success` or `Error`.
    pub fn state(&self) -> BuildStatus {
        match &*self.slot.outcome.lock() {
            None => BuildStatus::InProgress,
            Some(Ok(())) => BuildStatus::Success,
            Some(Err(_)) => BuildStatus::Error,
        }
    }
}

/// A kernel extracted from a built program.
#[derive(Debug)]
pub struct Kernel {
    pub(crate) handle: Handle,
    name: String,
    config: Arc<ClConfig>,
}

impl_resource!(Kernel);

impl Kernel {
    /// Name the kernel was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native kernel handle.
    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    /// Function name as reported by the native side.
    pub fn function_name(&self) -> Result<String> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_string(&self.config.query, |value, size_ret| {
            api.kernel_info(raw, KernelInfo::FunctionName, value, size_ret)
        })
    }

    /// Number of declared arguments.
    pub fn num_args(&self) -> Result<u32> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_scalar(|value, size_ret| api.kernel_info(raw, KernelInfo::NumArgs, value, size_ret))
    }

    /// Native reference count. Diagnostic only.
    pub fn reference_count(&self) -> Result<u32> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_scalar(|value, size_ret| api.kernel_info(raw, KernelInfo::ReferenceCount, value, size_ret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_status_codes() {
        for state in [
            BuildStatus::None,
            BuildStatus::InProgress,
            BuildStatus::Success,
            BuildStatus::Error,
        ] {
            assert_eq!(BuildStatus::from_code(state.code()), Some(state));
        }
        assert_eq!(BuildStatus::from_code(7), None);
    }

    #[test]
    fn test_binary_rejection_reasons() {
        assert_eq!(binary_rejection(status::INVALID_VALUE), "empty binary");
        assert_eq!(binary_rejection(status::INVALID_BINARY), "invalid binary");
        assert_eq!(binary_rejection(-9999), "unknown error");
    }

    #[test]
    fn test_pending_build_signal() {
        let pending = PendingBuild::new();
        assert_eq!(pending.state(), BuildStatus::InProgress);
        assert!(pending.try_result().is_none());
        assert!(pending.wait_timeout(Duration::from_millis(5)).is_none());

        let slot = Arc::clone(&pending.slot);
        let worker = std::thread::spawn(move || slot.complete(Ok(())));
        assert!(pending.wait().is_ok());
        worker.join().unwrap();

        assert_eq!(pending.state(), BuildStatus::Success);
        assert!(matches!(pending.try_result(), Some(Ok(()))));
    }

    #[test]
    fn test_pending_build_failure_state() {
        let pending = PendingBuild::new();
        pending.slot.complete(Err(BuildError::without_log().into()));
        assert_eq!(pending.state(), BuildStatus::Error);
        assert!(pending.wait().unwrap_err().is_build_failure());
    }
}
