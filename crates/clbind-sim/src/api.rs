//! [`NativeApi`] implementation of the simulated backend.

use std::ffi::CStr;
use std::fmt;
use std::slice;
use std::sync::Arc;
use std::thread;

use bytemuck::Pod;
use clbind_core::callback::{dispatch_build_notification, CallbackToken};
use clbind_core::image::ImageFormat;
use clbind_core::memory::{MapFlags, MemFlags};
use clbind_core::native::{
    EventInfo, ImageInfo, KernelInfo, MemInfo, MemObjectType, NativeApi, ProgramBuildInfo, ProgramInfo, RawHandle,
    RawImageDesc, RawImageFormat, ResourceKind,
};
use clbind_core::query::answer_query;
use clbind_core::status::{self, Status};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::compiler::{self, CompileOutcome};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::exec::{HostDst, HostSrc, Work};
use crate::formats::default_formats;
use crate::state::{
    build_code, exec_code, Body, BufferBody, BuildRecord, ContextBody, DeviceBody, EventBody, ImageBody, KernelBody,
    MapRecord, ProgramBody, QueueBody, SimResult, State,
};

/// Largest accepted image extent along any axis.
const MAX_IMAGE_DIMENSION: usize = 16384;

macro_rules! check {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(code) => return code,
        }
    };
}

fn answer<T: Pod>(value: &T, out: &mut [u8], size_ret: &mut usize) -> Status {
    answer_query(bytemuck::bytes_of(value), out, size_ret)
}

fn answer_slice<T: Pod>(values: &[T], out: &mut [u8], size_ret: &mut usize) -> Status {
    answer_query(bytemuck::cast_slice(values), out, size_ret)
}

/// Strings are reported with their terminating NUL.
fn answer_str(value: &str, out: &mut [u8], size_ret: &mut usize) -> Status {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    answer_query(&bytes, out, size_ret)
}

fn report(result: SimResult<RawHandle>, status: &mut Status) -> RawHandle {
    match result {
        Ok(handle) => {
            *status = status::SUCCESS;
            handle
        }
        Err(code) => {
            *status = code;
            RawHandle::NULL
        }
    }
}

/// Bytes spanned by a region laid out at the given pitches.
fn span(region: &[usize; 3], element_size: usize, row_pitch: usize, slice_pitch: usize) -> usize {
    (region[2] - 1) * slice_pitch + (region[1] - 1) * row_pitch + region[0] * element_size
}

/// Resolve zero host pitches and reject pitches too small for the region.
fn host_pitches(region: &[usize; 3], element_size: usize, row_pitch: usize, slice_pitch: usize) -> SimResult<(usize, usize)> {
    let line = region[0] * element_size;
    let row_pitch = match row_pitch {
        0 => line,
        pitch if pitch < line => return Err(status::INVALID_VALUE),
        pitch => pitch,
    };
    let plane = row_pitch * region[1];
    let slice_pitch = match slice_pitch {
        0 => plane,
        pitch if region[2] > 1 && pitch < plane => return Err(status::INVALID_VALUE),
        pitch => pitch,
    };
    Ok((row_pitch, slice_pitch))
}

/// Pitches of a packed host copy of `region` of `image`.
fn mapped_pitches(image: &ImageBody, region: &[usize; 3]) -> (usize, usize) {
    let row_pitch = region[0] * image.element_size;
    let slice_pitch = match image.image_type {
        MemObjectType::Image3D => row_pitch * region[1],
        _ => 0,
    };
    (row_pitch, slice_pitch)
}

/// State shared between the API object and its worker threads.
pub(crate) struct Shared {
    pub config: SimConfig,
    pub state: Mutex<State>,
    /// Signalled whenever an event or build changes state.
    pub changed: Condvar,
}

/// Simulated native compute backend.
///
/// Objects live in an in-process table; commands run on worker threads and
/// builds are performed by a toy compiler. Besides [`NativeApi`] it offers
/// setup calls (devices, contexts, queues, user events), scripting hooks
/// (forced build failures, the supported format list) and inspection of
/// reference counts, release calls and completion order.
pub struct SimApi {
    shared: Arc<Shared>,
}

impl SimApi {
    /// Create a backend with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Create a backend with `config`.
    pub fn with_config(config: SimConfig) -> Self {
        info!(
            command_latency = ?config.command_latency,
            build_latency = ?config.build_latency,
            "Initializing simulated compute backend"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::new(default_formats())),
                changed: Condvar::new(),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock()
    }

    // --- setup --------------------------------------------------------------

    /// Add a device named `name`.
    pub fn add_device(&self, name: impl Into<String>) -> RawHandle {
        let name = name.into();
        let handle = self.lock().insert(Body::Device(DeviceBody { name: name.clone() }));
        debug!(%handle, name, "Added simulated device");
        handle
    }

    /// Create a context over `devices`. The caller owns one reference.
    pub fn create_context(&self, devices: &[RawHandle]) -> Result<RawHandle> {
        if devices.is_empty() {
            return Err(SimError::NoDevices);
        }
        let mut state = self.lock();
        for &device in devices {
            state.device(device).map_err(|_| SimError::UnknownHandle {
                kind: "device",
                handle: device,
            })?;
        }
        Ok(state.insert(Body::Context(ContextBody {
            devices: devices.to_vec(),
        })))
    }

    /// Create a command queue on `context`. The caller owns one reference.
    pub fn create_queue(&self, context: RawHandle) -> Result<RawHandle> {
        let mut state = self.lock();
        state.context(context).map_err(|_| SimError::UnknownHandle {
            kind: "context",
            handle: context,
        })?;
        Ok(state.insert(Body::Queue(QueueBody { context, in_flight: 0 })))
    }

    /// Create an event completed by [`set_user_event_status`](Self::set_user_event_status)
    /// instead of a command.
    pub fn create_user_event(&self, context: RawHandle) -> Result<RawHandle> {
        let mut state = self.lock();
        state.context(context).map_err(|_| SimError::UnknownHandle {
            kind: "context",
            handle: context,
        })?;
        Ok(state.insert(Body::Event(EventBody {
            queue: RawHandle::NULL,
            context,
            status: exec_code::SUBMITTED,
            user: true,
        })))
    }

    /// Complete a user event: `0` for success, a negative status for failure.
    pub fn set_user_event_status(&self, event: RawHandle, code: i32) -> Result<()> {
        if code > exec_code::COMPLETE {
            return Err(SimError::InvalidEventStatus(code));
        }
        let mut state = self.lock();
        let body = state.event_mut(event).map_err(|_| SimError::UnknownHandle {
            kind: "event",
            handle: event,
        })?;
        if !body.user {
            return Err(SimError::NotAUserEvent(event));
        }
        if body.is_terminal() {
            return Err(SimError::EventAlreadyComplete(event));
        }
        body.status = code;
        state.completions.push(event);
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    // --- scripting ----------------------------------------------------------

    /// Make every later build on `device` fail with exactly `log`.
    pub fn fail_builds_on(&self, device: RawHandle, log: impl Into<String>) {
        self.lock().build_failures.insert(device, log.into());
    }

    /// Undo [`fail_builds_on`](Self::fail_builds_on) for all devices.
    pub fn clear_build_failures(&self) {
        self.lock().build_failures.clear();
    }

    /// Replace the supported image format list.
    pub fn set_supported_formats(&self, formats: Vec<RawImageFormat>) {
        self.lock().formats = formats;
    }

    // --- inspection ---------------------------------------------------------

    /// Release calls the host made on `handle`, including rejected ones.
    pub fn release_calls(&self, handle: RawHandle) -> usize {
        self.lock().release_calls.get(&handle).copied().unwrap_or(0)
    }

    /// Current reference count, or `None` once the object is destroyed.
    pub fn refcount(&self, handle: RawHandle) -> Option<u32> {
        self.lock().refcount(handle)
    }

    /// Number of live objects of any kind.
    pub fn live_objects(&self) -> usize {
        self.lock().live_objects()
    }

    /// Events in the order they reached a terminal state.
    pub fn completion_order(&self) -> Vec<RawHandle> {
        self.lock().completions.clone()
    }

    /// Tightly packed pixel bytes of an image.
    pub fn image_bytes(&self, image: RawHandle) -> Option<Vec<u8>> {
        self.lock().image(image).ok().map(|body| body.data.clone())
    }

    /// Bytes of a buffer.
    pub fn buffer_bytes(&self, buffer: RawHandle) -> Option<Vec<u8>> {
        self.lock().buffer(buffer).ok().map(|body| body.data.clone())
    }

    // --- programs -----------------------------------------------------------

    fn program_from_source(&self, context: RawHandle, sources: &[&str]) -> SimResult<RawHandle> {
        if sources.is_empty() {
            return Err(status::INVALID_VALUE);
        }
        let mut state = self.lock();
        let devices = state.context(context)?.devices.clone();
        let code = sources.concat();
        let records = devices.iter().map(|_| BuildRecord::new()).collect();
        Ok(state.insert(Body::Program(ProgramBody {
            context,
            devices,
            source: code.clone(),
            code,
            records,
            kernels: Vec::new(),
        })))
    }

    fn program_from_binaries(
        &self,
        context: RawHandle,
        devices: &[RawHandle],
        binaries: &[&[u8]],
        binary_status: &mut [Status],
    ) -> SimResult<RawHandle> {
        if devices.is_empty() || devices.len() != binaries.len() {
            return Err(status::INVALID_VALUE);
        }
        let mut state = self.lock();
        let known = &state.context(context)?.devices;
        if devices.iter().any(|device| !known.contains(device)) {
            return Err(status::INVALID_DEVICE);
        }

        let mut code = None;
        let mut overall = status::SUCCESS;
        for (index, binary) in binaries.iter().enumerate() {
            let result = match compiler::decode_binary(binary) {
                Ok(text) => {
                    code.get_or_insert(text);
                    status::SUCCESS
                }
                Err(rejected) => {
                    // An empty binary outranks a malformed one.
                    if overall != status::INVALID_VALUE {
                        overall = rejected;
                    }
                    rejected
                }
            };
            if let Some(slot) = binary_status.get_mut(index) {
                *slot = result;
            }
        }
        if overall != status::SUCCESS {
            return Err(overall);
        }

        let records = binaries
            .iter()
            .map(|binary| BuildRecord {
                binary: binary.to_vec(),
                ..BuildRecord::new()
            })
            .collect();
        Ok(state.insert(Body::Program(ProgramBody {
            context,
            devices: devices.to_vec(),
            source: String::new(),
            code: code.unwrap_or_default(),
            records,
            kernels: Vec::new(),
        })))
    }

    /// Validate a build request, compile and mark the targets in progress.
    fn prepare_build(
        state: &mut State,
        program: RawHandle,
        devices: &[RawHandle],
        options: &str,
    ) -> SimResult<Vec<(RawHandle, CompileOutcome)>> {
        let body = state.program(program)?;
        let targets = if devices.is_empty() {
            body.devices.clone()
        } else {
            if devices.iter().any(|device| !body.devices.contains(device)) {
                return Err(status::INVALID_DEVICE);
            }
            devices.to_vec()
        };
        compiler::check_options(options)?;
        if body.records.iter().any(|r| r.status == build_code::IN_PROGRESS) {
            return Err(status::INVALID_OPERATION);
        }

        let outcomes: Vec<_> = targets
            .iter()
            .map(|&device| {
                let name = state.device(device).map_or("unknown device", |d| d.name.as_str());
                let scripted = state.build_failures.get(&device).map(String::as_str);
                (device, compiler::compile(&body.code, name, scripted))
            })
            .collect();

        let body = state.program_mut(program)?;
        for (device, _) in &outcomes {
            let record = body.record_mut(*device)?;
            record.status = build_code::IN_PROGRESS;
            record.options = options.to_string();
            record.log.clear();
        }
        Ok(outcomes)
    }

    /// Store build outcomes; the build status of the whole request.
    fn finish_build(state: &mut State, program: RawHandle, outcomes: Vec<(RawHandle, CompileOutcome)>) -> Status {
        let Ok(body) = state.program_mut(program) else {
            return status::INVALID_PROGRAM;
        };
        let binary = compiler::encode_binary(&body.code);
        let mut failed = false;
        for (device, outcome) in outcomes {
            let Ok(record) = body.record_mut(device) else {
                continue;
            };
            match outcome {
                Ok(log) => {
                    record.status = build_code::SUCCESS;
                    record.log = log;
                    record.binary = binary.clone();
                }
                Err(log) => {
                    record.status = build_code::ERROR;
                    record.log = log;
                    record.binary.clear();
                    failed = true;
                }
            }
        }
        body.kernels = if body.is_built() {
            compiler::parse_kernels(&body.code)
        } else {
            Vec::new()
        };

        if failed {
            status::BUILD_PROGRAM_FAILURE
        } else {
            status::SUCCESS
        }
    }

    fn build_in_background(
        &self,
        program: RawHandle,
        outcomes: Vec<(RawHandle, CompileOutcome)>,
        token: CallbackToken,
    ) -> Status {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("sim-build-{}", program))
            .spawn(move || {
                let latency = shared.config.build_latency;
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                {
                    let mut state = shared.state.lock();
                    let code = Self::finish_build(&mut state, program, outcomes);
                    state.release(program, ResourceKind::Program);
                    debug!(%program, code, %token, "Background build finished");
                }
                shared.changed.notify_all();
                dispatch_build_notification(token.into_user_data(), program);
            });

        match spawned {
            Ok(_) => status::SUCCESS,
            Err(err) => {
                warn!(%program, error = %err, "Failed to start build thread");
                let mut state = self.lock();
                if let Ok(body) = state.program_mut(program) {
                    for record in &mut body.records {
                        if record.status == build_code::IN_PROGRESS {
                            record.status = build_code::NONE;
                        }
                    }
                }
                state.release(program, ResourceKind::Program);
                status::OUT_OF_RESOURCES
            }
        }
    }

    fn program_info_impl(&self, program: RawHandle, param: ProgramInfo, out: &mut [u8], size_ret: &mut usize) -> Status {
        let state = self.lock();
        let refcount = check!(state.object(program, ResourceKind::Program)).refcount;
        let body = check!(state.program(program));
        match param {
            ProgramInfo::ReferenceCount => answer(&refcount, out, size_ret),
            ProgramInfo::Context => answer(&body.context, out, size_ret),
            ProgramInfo::NumDevices => answer(&(body.devices.len() as u32), out, size_ret),
            ProgramInfo::Devices => answer_slice(&body.devices, out, size_ret),
            ProgramInfo::Source => answer_str(&body.source, out, size_ret),
            ProgramInfo::BinarySizes => {
                let sizes: Vec<usize> = body.records.iter().map(|r| r.binary.len()).collect();
                answer_slice(&sizes, out, size_ret)
            }
        }
    }

    fn create_kernel_impl(&self, program: RawHandle, name: &CStr) -> SimResult<RawHandle> {
        let name = name.to_str().map_err(|_| status::INVALID_KERNEL_NAME)?;
        let mut state = self.lock();
        let body = state.program(program)?;
        if !body.is_built() {
            return Err(status::INVALID_PROGRAM_EXECUTABLE);
        }
        let sig = body
            .kernels
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or(status::INVALID_KERNEL_NAME)?;

        let kernel = state.insert(Body::Kernel(KernelBody { program, sig }));
        state.retain(program, ResourceKind::Program);
        Ok(kernel)
    }

    // --- memory objects -----------------------------------------------------

    fn check_host_flags(flags: MemFlags, host_data: Option<&[u8]>) -> SimResult<()> {
        let wants_host = flags.contains(MemFlags::COPY_HOST_PTR) || flags.contains(MemFlags::USE_HOST_PTR);
        if wants_host != host_data.is_some() {
            return Err(status::INVALID_HOST_PTR);
        }
        Ok(())
    }

    fn create_buffer_impl(&self, context: RawHandle, flags: MemFlags, size: usize, host_data: Option<&[u8]>) -> SimResult<RawHandle> {
        let mut state = self.lock();
        state.context(context)?;
        if size == 0 {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        Self::check_host_flags(flags, host_data)?;
        let data = match host_data {
            Some(bytes) if bytes.len() < size => return Err(status::INVALID_HOST_PTR),
            Some(bytes) => bytes[..size].to_vec(),
            None => vec![0; size],
        };
        Ok(state.insert(Body::Buffer(BufferBody { context, flags, data })))
    }

    fn create_image_impl(
        &self,
        context: RawHandle,
        flags: MemFlags,
        format: &RawImageFormat,
        desc: &RawImageDesc,
        host_data: Option<&[u8]>,
    ) -> SimResult<RawHandle> {
        let mut state = self.lock();
        state.context(context)?;
        Self::check_host_flags(flags, host_data)?;

        let image_type = MemObjectType::from_code(desc.image_type);
        let dims = match image_type {
            MemObjectType::Image2D => [desc.image_width, desc.image_height, 1],
            MemObjectType::Image3D => [desc.image_width, desc.image_height, desc.image_depth],
            _ => return Err(status::INVALID_IMAGE_DESCRIPTOR),
        };
        let element_size = ImageFormat::from(*format)
            .element_size()
            .ok_or(status::INVALID_IMAGE_FORMAT_DESCRIPTOR)?;
        if !state.formats.contains(format) {
            return Err(status::IMAGE_FORMAT_NOT_SUPPORTED);
        }
        if dims.iter().any(|&extent| extent == 0 || extent > MAX_IMAGE_DIMENSION) {
            return Err(status::INVALID_IMAGE_SIZE);
        }

        // Host pitches only make sense with host data.
        let line = dims[0] * element_size;
        let row_pitch = match desc.image_row_pitch {
            0 => line,
            _ if host_data.is_none() => return Err(status::INVALID_IMAGE_DESCRIPTOR),
            pitch if pitch < line || pitch % element_size != 0 => return Err(status::INVALID_IMAGE_DESCRIPTOR),
            pitch => pitch,
        };
        let slice_pitch = match (image_type, desc.image_slice_pitch) {
            (MemObjectType::Image2D, _) => 0,
            (_, 0) => row_pitch * dims[1],
            (_, _) if host_data.is_none() => return Err(status::INVALID_IMAGE_DESCRIPTOR),
            (_, pitch) if pitch < row_pitch * dims[1] || pitch % row_pitch != 0 => {
                return Err(status::INVALID_IMAGE_DESCRIPTOR)
            }
            (_, pitch) => pitch,
        };

        let parent = desc.buffer;
        if !parent.is_null() && state.context_of_mem(parent)? != context {
            return Err(status::INVALID_CONTEXT);
        }

        let mut body = ImageBody {
            context,
            flags,
            format: *format,
            image_type,
            dims,
            element_size,
            data: vec![0; line * dims[1] * dims[2]],
            parent,
            maps: Default::default(),
        };
        if let Some(src) = host_data {
            if src.len() < span(&dims, element_size, row_pitch, slice_pitch) {
                return Err(status::INVALID_HOST_PTR);
            }
            body.write_region(&[0; 3], &dims, row_pitch, slice_pitch, src);
        }

        if !parent.is_null() {
            state.retain(parent, ResourceKind::MemObject);
        }
        Ok(state.insert(Body::Image(body)))
    }

    fn mem_info_impl(&self, mem: RawHandle, param: MemInfo, out: &mut [u8], size_ret: &mut usize) -> Status {
        let state = self.lock();
        let object = check!(state.object(mem, ResourceKind::MemObject));
        let (mem_type, flags, size, context, parent) = match &object.body {
            Body::Buffer(buffer) => (MemObjectType::Buffer, buffer.flags, buffer.data.len(), buffer.context, RawHandle::NULL),
            Body::Image(image) => (image.image_type, image.flags, image.data.len(), image.context, image.parent),
            _ => return status::INVALID_MEM_OBJECT,
        };
        match param {
            MemInfo::Type => answer(&mem_type.code(), out, size_ret),
            MemInfo::Flags => answer(&flags.bits(), out, size_ret),
            MemInfo::Size => answer(&size, out, size_ret),
            MemInfo::ReferenceCount => answer(&object.refcount, out, size_ret),
            MemInfo::Context => answer(&context, out, size_ret),
            MemInfo::AssociatedMemObject => answer(&parent, out, size_ret),
            MemInfo::Offset => answer(&0usize, out, size_ret),
        }
    }

    fn image_info_impl(&self, image: RawHandle, param: ImageInfo, out: &mut [u8], size_ret: &mut usize) -> Status {
        let state = self.lock();
        let body = check!(state.image(image));
        let is_3d = body.image_type == MemObjectType::Image3D;
        match param {
            ImageInfo::Format => answer(&body.format, out, size_ret),
            ImageInfo::ElementSize => answer(&body.element_size, out, size_ret),
            ImageInfo::RowPitch => answer(&body.row_pitch(), out, size_ret),
            ImageInfo::SlicePitch => answer(&if is_3d { body.slice_pitch() } else { 0 }, out, size_ret),
            ImageInfo::Width => answer(&body.dims[0], out, size_ret),
            ImageInfo::Height => answer(&body.dims[1], out, size_ret),
            ImageInfo::Depth => answer(&if is_3d { body.dims[2] } else { 0 }, out, size_ret),
        }
    }

    // --- commands -----------------------------------------------------------

    /// Image of `queue`'s context, with `region` checked against it.
    fn image_on_queue<'s>(
        state: &'s State,
        queue: RawHandle,
        image: RawHandle,
        origin: &[usize; 3],
        region: &[usize; 3],
    ) -> SimResult<&'s ImageBody> {
        let context = state.queue(queue)?.context;
        let body = state.image(image)?;
        if body.context != context {
            return Err(status::INVALID_CONTEXT);
        }
        body.check_region(origin, region)?;
        Ok(body)
    }

    fn buffer_on_queue(state: &State, queue: RawHandle, buffer: RawHandle) -> SimResult<usize> {
        let context = state.queue(queue)?.context;
        let body = state.buffer(buffer)?;
        if body.context != context {
            return Err(status::INVALID_CONTEXT);
        }
        Ok(body.data.len())
    }

    /// Hand the event to the caller and, for blocking commands, wait for it.
    fn complete_enqueue(
        &self,
        mut state: MutexGuard<'_, State>,
        blocking: bool,
        submitted: SimResult<RawHandle>,
        event: &mut RawHandle,
    ) -> Status {
        let submitted = check!(submitted);
        *event = submitted;
        if blocking {
            self.shared.await_event(&mut state, submitted)
        } else {
            status::SUCCESS
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read_image_command(
        &self,
        state: &mut State,
        queue: RawHandle,
        image: RawHandle,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        dst: HostDst,
        waits: &[RawHandle],
    ) -> SimResult<RawHandle> {
        let body = Self::image_on_queue(state, queue, image, &origin, &region)?;
        let element_size = body.element_size;
        let (row_pitch, slice_pitch) = host_pitches(&region, element_size, row_pitch, slice_pitch)?;
        let len = span(&region, element_size, row_pitch, slice_pitch);

        let work: Work = Box::new(move |state: &mut State| {
            let Ok(body) = state.image(image) else {
                return status::INVALID_MEM_OBJECT;
            };
            // SAFETY: the enqueue contract keeps `dst` valid for the region
            // until this command's event completes.
            let dst = unsafe { slice::from_raw_parts_mut(dst.get(), len) };
            body.read_region(&origin, &region, row_pitch, slice_pitch, dst);
            status::SUCCESS
        });
        self.shared.submit(state, queue, waits, &[image], work)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_image_command(
        &self,
        state: &mut State,
        queue: RawHandle,
        image: RawHandle,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        src: HostSrc,
        waits: &[RawHandle],
    ) -> SimResult<RawHandle> {
        let body = Self::image_on_queue(state, queue, image, &origin, &region)?;
        let element_size = body.element_size;
        let (row_pitch, slice_pitch) = host_pitches(&region, element_size, row_pitch, slice_pitch)?;
        let len = span(&region, element_size, row_pitch, slice_pitch);

        let work: Work = Box::new(move |state: &mut State| {
            let Ok(body) = state.image_mut(image) else {
                return status::INVALID_MEM_OBJECT;
            };
            // SAFETY: as for reads, `src` stays valid until the event completes.
            let src = unsafe { slice::from_raw_parts(src.get(), len) };
            body.write_region(&origin, &region, row_pitch, slice_pitch, src);
            status::SUCCESS
        });
        self.shared.submit(state, queue, waits, &[image], work)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_image_command(
        &self,
        state: &mut State,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[RawHandle],
    ) -> SimResult<RawHandle> {
        let src_format = Self::image_on_queue(state, queue, src, &src_origin, &region)?.format;
        let dst_format = Self::image_on_queue(state, queue, dst, &dst_origin, &region)?.format;
        if src_format != dst_format {
            return Err(status::IMAGE_FORMAT_MISMATCH);
        }

        let work: Work = Box::new(move |state: &mut State| {
            let Ok(body) = state.image(src) else {
                return status::INVALID_MEM_OBJECT;
            };
            let line = region[0] * body.element_size;
            let mut staging = vec![0; body.packed_len(&region)];
            body.read_region(&src_origin, &region, line, line * region[1], &mut staging);
            let Ok(body) = state.image_mut(dst) else {
                return status::INVALID_MEM_OBJECT;
            };
            body.write_region(&dst_origin, &region, line, line * region[1], &staging);
            status::SUCCESS
        });
        self.shared.submit(state, queue, waits, &[src, dst], work)
    }

    #[allow(clippy::too_many_arguments)]
    fn image_to_buffer_command(
        &self,
        state: &mut State,
        queue: RawHandle,
        image: RawHandle,
        buffer: RawHandle,
        origin: [usize; 3],
        region: [usize; 3],
        offset: usize,
        waits: &[RawHandle],
    ) -> SimResult<RawHandle> {
        let len = Self::image_on_queue(state, queue, image, &origin, &region)?.packed_len(&region);
        let capacity = Self::buffer_on_queue(state, queue, buffer)?;
        if offset.checked_add(len).map_or(true, |end| end > capacity) {
            return Err(status::INVALID_VALUE);
        }

        let work: Work = Box::new(move |state: &mut State| {
            let Ok(body) = state.image(image) else {
                return status::INVALID_MEM_OBJECT;
            };
            let line = region[0] * body.element_size;
            let mut staging = vec![0; len];
            body.read_region(&origin, &region, line, line * region[1], &mut staging);
            let Ok(target) = state.buffer_mut(buffer) else {
                return status::INVALID_MEM_OBJECT;
            };
            target.data[offset..offset + len].copy_from_slice(&staging);
            status::SUCCESS
        });
        self.shared.submit(state, queue, waits, &[image, buffer], work)
    }

    #[allow(clippy::too_many_arguments)]
    fn buffer_to_image_command(
        &self,
        state: &mut State,
        queue: RawHandle,
        buffer: RawHandle,
        image: RawHandle,
        offset: usize,
        origin: [usize; 3],
        region: [usize; 3],
        waits: &[RawHandle],
    ) -> SimResult<RawHandle> {
        let len = Self::image_on_queue(state, queue, image, &origin, &region)?.packed_len(&region);
        let capacity = Self::buffer_on_queue(state, queue, buffer)?;
        if offset.checked_add(len).map_or(true, |end| end > capacity) {
            return Err(status::INVALID_VALUE);
        }

        let work: Work = Box::new(move |state: &mut State| {
            let staging = match state.buffer(buffer) {
                Ok(source) => source.data[offset..offset + len].to_vec(),
                Err(_) => return status::INVALID_MEM_OBJECT,
            };
            let Ok(body) = state.image_mut(image) else {
                return status::INVALID_MEM_OBJECT;
            };
            let line = region[0] * body.element_size;
            body.write_region(&origin, &region, line, line * region[1], &staging);
            status::SUCCESS
        });
        self.shared.submit(state, queue, waits, &[buffer, image], work)
    }

    #[allow(clippy::too_many_arguments)]
    fn map_image_command(
        &self,
        state: &mut State,
        queue: RawHandle,
        image: RawHandle,
        flags: MapFlags,
        origin: [usize; 3],
        region: [usize; 3],
        waits: &[RawHandle],
    ) -> SimResult<(RawHandle, *mut u8, usize, usize)> {
        let body = Self::image_on_queue(state, queue, image, &origin, &region)?;
        let (row_pitch, slice_pitch) = mapped_pitches(body, &region);
        let len = span(&region, body.element_size, row_pitch, slice_pitch);
        // Validate the wait-list before registering a mapping that would
        // otherwise leak.
        Shared::check_wait_list(state, body.context, waits)?;

        let mut staging = vec![0u8; len].into_boxed_slice();
        let ptr = staging.as_mut_ptr();
        let key = ptr as usize;
        state.image_mut(image)?.maps.insert(
            key,
            MapRecord {
                staging,
                origin,
                region,
                flags,
            },
        );

        let work: Work = Box::new(move |state: &mut State| {
            let Ok(body) = state.image_mut(image) else {
                return status::INVALID_MEM_OBJECT;
            };
            let Some(mut record) = body.maps.remove(&key) else {
                return status::MAP_FAILURE;
            };
            body.read_region(&record.origin, &record.region, row_pitch, slice_pitch, &mut record.staging);
            body.maps.insert(key, record);
            status::SUCCESS
        });
        match self.shared.submit(state, queue, waits, &[image], work) {
            Ok(event) => Ok((event, ptr, row_pitch, slice_pitch)),
            Err(code) => {
                if let Ok(body) = state.image_mut(image) {
                    body.maps.remove(&key);
                }
                Err(code)
            }
        }
    }

    fn unmap_command(&self, state: &mut State, queue: RawHandle, mem: RawHandle, mapped: *mut u8, waits: &[RawHandle]) -> SimResult<RawHandle> {
        let key = mapped as usize;
        let body = state.image(mem)?;
        if !body.maps.contains_key(&key) {
            return Err(status::INVALID_VALUE);
        }

        let work: Work = Box::new(move |state: &mut State| {
            let Ok(body) = state.image_mut(mem) else {
                return status::INVALID_MEM_OBJECT;
            };
            let Some(record) = body.maps.remove(&key) else {
                return status::INVALID_VALUE;
            };
            if record.flags.contains(MapFlags::WRITE) {
                let (row_pitch, slice_pitch) = mapped_pitches(body, &record.region);
                body.write_region(&record.origin, &record.region, row_pitch, slice_pitch, &record.staging);
            }
            status::SUCCESS
        });
        self.shared.submit(state, queue, waits, &[mem], work)
    }
}

impl Default for SimApi {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimApi")
            .field("config", &self.shared.config)
            .field("live_objects", &self.live_objects())
            .finish()
    }
}

impl NativeApi for SimApi {
    fn backend_name(&self) -> &str {
        "sim"
    }

    fn retain(&self, kind: ResourceKind, handle: RawHandle) -> Status {
        self.lock().retain(handle, kind)
    }

    fn release(&self, kind: ResourceKind, handle: RawHandle) -> Status {
        let mut state = self.lock();
        *state.release_calls.entry(handle).or_insert(0) += 1;
        let code = state.release(handle, kind);
        trace!(%handle, %kind, code, "Release");
        code
    }

    fn create_program_with_source(&self, context: RawHandle, sources: &[&str], status: &mut Status) -> RawHandle {
        report(self.program_from_source(context, sources), status)
    }

    fn create_program_with_binary(
        &self,
        context: RawHandle,
        devices: &[RawHandle],
        binaries: &[&[u8]],
        binary_status: &mut [Status],
        status: &mut Status,
    ) -> RawHandle {
        report(self.program_from_binaries(context, devices, binaries, binary_status), status)
    }

    fn build_program(&self, program: RawHandle, devices: &[RawHandle], options: &CStr, notify: Option<CallbackToken>) -> Status {
        let Ok(options) = options.to_str() else {
            return status::INVALID_BUILD_OPTIONS;
        };
        let mut state = self.lock();
        let outcomes = check!(Self::prepare_build(&mut state, program, devices, options));
        debug!(%program, devices = outcomes.len(), options, asynchronous = notify.is_some(), "Simulated build started");

        match notify {
            None => {
                let latency = self.shared.config.build_latency;
                if !latency.is_zero() {
                    MutexGuard::unlocked(&mut state, || thread::sleep(latency));
                }
                let code = Self::finish_build(&mut state, program, outcomes);
                drop(state);
                self.shared.changed.notify_all();
                code
            }
            Some(token) => {
                state.retain(program, ResourceKind::Program);
                drop(state);
                self.build_in_background(program, outcomes, token)
            }
        }
    }

    fn program_info(&self, program: RawHandle, param: ProgramInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        self.program_info_impl(program, param, value, size_ret)
    }

    fn program_binaries(&self, program: RawHandle, outputs: &mut [&mut [u8]]) -> Status {
        let state = self.lock();
        let body = check!(state.program(program));
        if outputs.len() != body.records.len() {
            return status::INVALID_VALUE;
        }
        for (record, output) in body.records.iter().zip(outputs.iter_mut()) {
            if output.is_empty() {
                continue;
            }
            let Some(target) = output.get_mut(..record.binary.len()) else {
                return status::INVALID_VALUE;
            };
            target.copy_from_slice(&record.binary);
        }
        status::SUCCESS
    }

    fn program_build_info(
        &self,
        program: RawHandle,
        device: RawHandle,
        param: ProgramBuildInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status {
        let state = self.lock();
        let record = check!(check!(state.program(program)).record(device));
        match param {
            ProgramBuildInfo::Status => answer(&record.status, value, size_ret),
            ProgramBuildInfo::Options => answer_str(&record.options, value, size_ret),
            ProgramBuildInfo::Log => answer_str(&record.log, value, size_ret),
        }
    }

    fn unload_compiler(&self) -> Status {
        debug!("Compiler unload requested");
        status::SUCCESS
    }

    fn create_kernel(&self, program: RawHandle, name: &CStr, status: &mut Status) -> RawHandle {
        report(self.create_kernel_impl(program, name), status)
    }

    fn kernel_info(&self, kernel: RawHandle, param: KernelInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let state = self.lock();
        let refcount = check!(state.object(kernel, ResourceKind::Kernel)).refcount;
        let body = check!(state.kernel(kernel));
        match param {
            KernelInfo::FunctionName => answer_str(&body.sig.name, value, size_ret),
            KernelInfo::NumArgs => answer(&body.sig.num_args, value, size_ret),
            KernelInfo::ReferenceCount => answer(&refcount, value, size_ret),
        }
    }

    fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
        status: &mut Status,
    ) -> RawHandle {
        report(self.create_buffer_impl(context, flags, size, host_data), status)
    }

    fn create_image(
        &self,
        context: RawHandle,
        flags: MemFlags,
        format: &RawImageFormat,
        desc: &RawImageDesc,
        host_data: Option<&[u8]>,
        status: &mut Status,
    ) -> RawHandle {
        report(self.create_image_impl(context, flags, format, desc, host_data), status)
    }

    fn supported_image_formats(
        &self,
        context: RawHandle,
        _flags: MemFlags,
        image_type: MemObjectType,
        formats: &mut [RawImageFormat],
        num_formats: &mut u32,
    ) -> Status {
        let state = self.lock();
        check!(state.context(context));
        if !matches!(image_type, MemObjectType::Image2D | MemObjectType::Image3D) {
            return status::INVALID_VALUE;
        }
        let count = formats.len().min(state.formats.len());
        formats[..count].copy_from_slice(&state.formats[..count]);
        *num_formats = state.formats.len() as u32;
        status::SUCCESS
    }

    fn mem_object_info(&self, mem: RawHandle, param: MemInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        self.mem_info_impl(mem, param, value, size_ret)
    }

    fn image_info(&self, image: RawHandle, param: ImageInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        self.image_info_impl(image, param, value, size_ret)
    }

    unsafe fn enqueue_read_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        blocking: bool,
        origin: &[usize; 3],
        region: &[usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        dst: *mut u8,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let mut state = self.lock();
        let submitted = self.read_image_command(
            &mut state,
            queue,
            image,
            *origin,
            *region,
            row_pitch,
            slice_pitch,
            HostDst::new(dst),
            wait_list,
        );
        self.complete_enqueue(state, blocking, submitted, event)
    }

    unsafe fn enqueue_write_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        blocking: bool,
        origin: &[usize; 3],
        region: &[usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        src: *const u8,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let mut state = self.lock();
        let submitted = self.write_image_command(
            &mut state,
            queue,
            image,
            *origin,
            *region,
            row_pitch,
            slice_pitch,
            HostSrc::new(src),
            wait_list,
        );
        self.complete_enqueue(state, blocking, submitted, event)
    }

    fn enqueue_copy_image(
        &self,
        queue: RawHandle,
        src: RawHandle,
        dst: RawHandle,
        src_origin: &[usize; 3],
        dst_origin: &[usize; 3],
        region: &[usize; 3],
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let mut state = self.lock();
        let submitted = self.copy_image_command(&mut state, queue, src, dst, *src_origin, *dst_origin, *region, wait_list);
        self.complete_enqueue(state, false, submitted, event)
    }

    fn enqueue_copy_image_to_buffer(
        &self,
        queue: RawHandle,
        src_image: RawHandle,
        dst_buffer: RawHandle,
        src_origin: &[usize; 3],
        region: &[usize; 3],
        dst_offset: usize,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let mut state = self.lock();
        let submitted = self.image_to_buffer_command(
            &mut state, queue, src_image, dst_buffer, *src_origin, *region, dst_offset, wait_list,
        );
        self.complete_enqueue(state, false, submitted, event)
    }

    fn enqueue_copy_buffer_to_image(
        &self,
        queue: RawHandle,
        src_buffer: RawHandle,
        dst_image: RawHandle,
        src_offset: usize,
        dst_origin: &[usize; 3],
        region: &[usize; 3],
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let mut state = self.lock();
        let submitted = self.buffer_to_image_command(
            &mut state, queue, src_buffer, dst_image, src_offset, *dst_origin, *region, wait_list,
        );
        self.complete_enqueue(state, false, submitted, event)
    }

    fn enqueue_map_image(
        &self,
        queue: RawHandle,
        image: RawHandle,
        blocking: bool,
        flags: MapFlags,
        origin: &[usize; 3],
        region: &[usize; 3],
        row_pitch: &mut usize,
        slice_pitch: &mut usize,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
        status: &mut Status,
    ) -> *mut u8 {
        let mut state = self.lock();
        let (submitted, ptr) = match self.map_image_command(&mut state, queue, image, flags, *origin, *region, wait_list) {
            Ok((handle, ptr, rows, slices)) => {
                *row_pitch = rows;
                *slice_pitch = slices;
                (Ok(handle), ptr)
            }
            Err(code) => (Err(code), std::ptr::null_mut()),
        };
        *status = self.complete_enqueue(state, blocking, submitted, event);
        ptr
    }

    unsafe fn enqueue_unmap_mem_object(
        &self,
        queue: RawHandle,
        mem: RawHandle,
        mapped: *mut u8,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let mut state = self.lock();
        let submitted = self.unmap_command(&mut state, queue, mem, mapped, wait_list);
        self.complete_enqueue(state, false, submitted, event)
    }

    fn flush(&self, queue: RawHandle) -> Status {
        match self.lock().queue(queue) {
            Ok(_) => status::SUCCESS,
            Err(code) => code,
        }
    }

    fn finish(&self, queue: RawHandle) -> Status {
        let mut state = self.lock();
        self.shared.drain_queue(&mut state, queue)
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> Status {
        if events.is_empty() {
            return status::INVALID_VALUE;
        }
        let mut state = self.lock();
        for &event in events {
            check!(state.event(event));
        }
        self.shared.await_events(&mut state, events)
    }

    fn event_info(&self, event: RawHandle, param: EventInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let state = self.lock();
        let refcount = check!(state.object(event, ResourceKind::Event)).refcount;
        let body = check!(state.event(event));
        match param {
            EventInfo::CommandQueue => answer(&body.queue, value, size_ret),
            EventInfo::ReferenceCount => answer(&refcount, value, size_ret),
            EventInfo::CommandExecutionStatus => answer(&body.status, value, size_ret),
        }
    }
}
