//! [`NativeApi`] over the linked OpenCL library.

use std::ffi::{c_char, c_void, CStr};
use std::panic;
use std::ptr;

use clbind_core::callback::{dispatch_build_notification, CallbackToken};
use clbind_core::memory::{MapFlags, MemFlags};
use clbind_core::native::{
    EventInfo, ImageInfo, KernelInfo, MemInfo, MemObjectType, NativeApi, ProgramBuildInfo, ProgramInfo, RawHandle,
    RawImageDesc, RawImageFormat, ResourceKind,
};
use clbind_core::status::{self, Status};
use tracing::error;

use crate::ffi::{self, BuildNotify, ClBool, ClUint, CL_FALSE, CL_TRUE};

/// `CL_PROGRAM_BINARIES`.
const PROGRAM_BINARIES: ClUint = 0x1166;

/// Receives `clBuildProgram` completions and forwards them to the build
/// notification registry. Unwinding must not cross back into the driver.
extern "C" fn build_notify(program: RawHandle, user_data: *mut c_void) {
    let user_data = user_data as usize;
    if panic::catch_unwind(|| dispatch_build_notification(user_data, program)).is_err() {
        error!(%program, "Build notification panicked");
        std::process::abort();
    }
}

fn flag(value: bool) -> ClBool {
    if value {
        CL_TRUE
    } else {
        CL_FALSE
    }
}

/// Null for empty lists, as the native API requires.
fn list_ptr<T>(list: &[T]) -> *const T {
    if list.is_empty() {
        ptr::null()
    } else {
        list.as_ptr()
    }
}

fn count(len: usize) -> Option<ClUint> {
    ClUint::try_from(len).ok()
}

/// Value buffer arguments of an info query; an empty buffer is a size probe.
fn value_args(value: &mut [u8]) -> (usize, *mut c_void) {
    if value.is_empty() {
        (0, ptr::null_mut())
    } else {
        (value.len(), value.as_mut_ptr().cast())
    }
}

macro_rules! count_or {
    ($len:expr, $fail:expr) => {
        match count($len) {
            Some(n) => n,
            None => return $fail,
        }
    };
}

/// The system OpenCL library.
#[derive(Debug, Default)]
pub struct OpenClApi {
    _private: (),
}

impl OpenClApi {
    /// Backend over the linked library.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl NativeApi for OpenClApi {
    fn backend_name(&self) -> &str {
        "opencl"
    }

    fn retain(&self, kind: ResourceKind, handle: RawHandle) -> Status {
        // SAFETY: the native side validates the handle.
        unsafe {
            match kind {
                ResourceKind::Context => ffi::clRetainContext(handle),
                ResourceKind::Device => ffi::clRetainDevice(handle),
                ResourceKind::CommandQueue => ffi::clRetainCommandQueue(handle),
                ResourceKind::Program => ffi::clRetainProgram(handle),
                ResourceKind::Kernel => ffi::clRetainKernel(handle),
                ResourceKind::MemObject => ffi::clRetainMemObject(handle),
                ResourceKind::Event => ffi::clRetainEvent(handle),
            }
        }
    }

    fn release(&self, kind: ResourceKind, handle: RawHandle) -> Status {
        // SAFETY: the native side validates the handle.
        unsafe {
            match kind {
                ResourceKind::Context => ffi::clReleaseContext(handle),
                ResourceKind::Device => ffi::clReleaseDevice(handle),
                ResourceKind::CommandQueue => ffi::clReleaseCommandQueue(handle),
                ResourceKind::Program => ffi::clReleaseProgram(handle),
                ResourceKind::Kernel => ffi::clReleaseKernel(handle),
                ResourceKind::MemObject => ffi::clReleaseMemObject(handle),
                ResourceKind::Event => ffi::clReleaseEvent(handle),
            }
        }
    }

    fn create_program_with_source(&self, context: RawHandle, sources: &[&str], status: &mut Status) -> RawHandle {
        let n = count_or!(sources.len(), {
            *status = status::INVALID_VALUE;
            RawHandle::NULL
        });
        let strings: Vec<*const c_char> = sources.iter().map(|s| s.as_ptr().cast()).collect();
        let lengths: Vec<usize> = sources.iter().map(|s| s.len()).collect();
        // SAFETY: both arrays hold `n` entries and outlive the call; lengths
        // make NUL terminators unnecessary.
        unsafe { ffi::clCreateProgramWithSource(context, n, list_ptr(&strings), list_ptr(&lengths), status) }
    }

    fn create_program_with_binary(
        &self,
        context: RawHandle,
        devices: &[RawHandle],
        binaries: &[&[u8]],
        binary_status: &mut [Status],
        status: &mut Status,
    ) -> RawHandle {
        if binaries.len() != devices.len() || binary_status.len() < devices.len() {
            *status = status::INVALID_VALUE;
            return RawHandle::NULL;
        }
        let n = count_or!(devices.len(), {
            *status = status::INVALID_VALUE;
            RawHandle::NULL
        });
        let lengths: Vec<usize> = binaries.iter().map(|b| b.len()).collect();
        let pointers: Vec<*const u8> = binaries.iter().map(|b| b.as_ptr()).collect();
        // SAFETY: every array holds one entry per device and outlives the call.
        unsafe {
            ffi::clCreateProgramWithBinary(
                context,
                n,
                list_ptr(devices),
                list_ptr(&lengths),
                list_ptr(&pointers),
                binary_status.as_mut_ptr(),
                status,
            )
        }
    }

    fn build_program(&self, program: RawHandle, devices: &[RawHandle], options: &CStr, notify: Option<CallbackToken>) -> Status {
        let n = count_or!(devices.len(), status::INVALID_VALUE);
        let (callback, user_data): (Option<BuildNotify>, *mut c_void) = match notify {
            Some(token) => (Some(build_notify as BuildNotify), token.into_user_data() as *mut c_void),
            None => (None, ptr::null_mut()),
        };
        // SAFETY: `options` is NUL-terminated; the callback only reads the
        // token smuggled through `user_data`.
        unsafe { ffi::clBuildProgram(program, n, list_ptr(devices), options.as_ptr(), callback, user_data) }
    }

    fn program_info(&self, program: RawHandle, param: ProgramInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let (size, ptr) = value_args(value);
        // SAFETY: `ptr` is valid for `size` bytes.
        unsafe { ffi::clGetProgramInfo(program, param.code(), size, ptr, size_ret) }
    }

    fn program_binaries(&self, program: RawHandle, outputs: &mut [&mut [u8]]) -> Status {
        let mut pointers: Vec<*mut u8> = outputs
            .iter_mut()
            .map(|out| if out.is_empty() { ptr::null_mut() } else { out.as_mut_ptr() })
            .collect();
        let size = pointers.len() * std::mem::size_of::<*mut u8>();
        // SAFETY: each output was sized from the reported binary sizes; null
        // entries are skipped by the native side.
        unsafe {
            ffi::clGetProgramInfo(
                program,
                PROGRAM_BINARIES,
                size,
                pointers.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        }
    }

    fn program_build_info(
        &self,
        program: RawHandle,
        device: RawHandle,
        param: ProgramBuildInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status {
        let (size, ptr) = value_args(value);
        // SAFETY: `ptr` is valid for `size` bytes.
        unsafe { ffi::clGetProgramBuildInfo(program, device, param.code(), size, ptr, size_ret) }
    }

    fn unload_compiler(&self) -> Status {
        // SAFETY: no arguments.
        unsafe { ffi::clUnloadCompiler() }
    }

    fn create_kernel(&self, program: RawHandle, name: &CStr, status: &mut Status) -> RawHandle {
        // SAFETY: `name` is NUL-terminated.
        unsafe { ffi::clCreateKernel(program, name.as_ptr(), status) }
    }

    fn kernel_info(&self, kernel: RawHandle, param: KernelInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let (size, ptr) = value_args(value);
        // SAFETY: `ptr` is valid for `size` bytes.
        unsafe { ffi::clGetKernelInfo(kernel, param.code(), size, ptr, size_ret) }
    }

    fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
        status: &mut Status,
    ) -> RawHandle {
        let host = host_data.map_or(ptr::null_mut(), |data| data.as_ptr() as *mut c_void);
        // SAFETY: with COPY_HOST_PTR the library only reads `size` bytes from
        // `host`, which the caller sized to match.
        unsafe { ffi::clCreateBuffer(context, flags.bits(), size, host, status) }
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
        let host = host_data.map_or(ptr::null_mut(), |data| data.as_ptr() as *mut c_void);
        // SAFETY: format and descriptor are `repr(C)` mirrors of the native
        // structures; host data was length-checked against the descriptor.
        unsafe { ffi::clCreateImage(context, flags.bits(), format, desc, host, status) }
    }

    fn supported_image_formats(
        &self,
        context: RawHandle,
        flags: MemFlags,
        image_type: MemObjectType,
        formats: &mut [RawImageFormat],
        num_formats: &mut u32,
    ) -> Status {
        let entries = count_or!(formats.len(), status::INVALID_VALUE);
        let list = if formats.is_empty() {
            ptr::null_mut()
        } else {
            formats.as_mut_ptr()
        };
        // SAFETY: `list` holds `entries` formats.
        unsafe { ffi::clGetSupportedImageFormats(context, flags.bits(), image_type.code(), entries, list, num_formats) }
    }

    fn mem_object_info(&self, mem: RawHandle, param: MemInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let (size, ptr) = value_args(value);
        // SAFETY: `ptr` is valid for `size` bytes.
        unsafe { ffi::clGetMemObjectInfo(mem, param.code(), size, ptr, size_ret) }
    }

    fn image_info(&self, image: RawHandle, param: ImageInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let (size, ptr) = value_args(value);
        // SAFETY: `ptr` is valid for `size` bytes.
        unsafe { ffi::clGetImageInfo(image, param.code(), size, ptr, size_ret) }
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
        let waits = count_or!(wait_list.len(), status::INVALID_EVENT_WAIT_LIST);
        // SAFETY: `dst` validity is the caller's contract.
        unsafe {
            ffi::clEnqueueReadImage(
                queue,
                image,
                flag(blocking),
                origin.as_ptr(),
                region.as_ptr(),
                row_pitch,
                slice_pitch,
                dst.cast(),
                waits,
                list_ptr(wait_list),
                event,
            )
        }
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
        let waits = count_or!(wait_list.len(), status::INVALID_EVENT_WAIT_LIST);
        // SAFETY: `src` validity is the caller's contract.
        unsafe {
            ffi::clEnqueueWriteImage(
                queue,
                image,
                flag(blocking),
                origin.as_ptr(),
                region.as_ptr(),
                row_pitch,
                slice_pitch,
                src.cast(),
                waits,
                list_ptr(wait_list),
                event,
            )
        }
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
        let waits = count_or!(wait_list.len(), status::INVALID_EVENT_WAIT_LIST);
        // SAFETY: all pointers come from live references.
        unsafe {
            ffi::clEnqueueCopyImage(
                queue,
                src,
                dst,
                src_origin.as_ptr(),
                dst_origin.as_ptr(),
                region.as_ptr(),
                waits,
                list_ptr(wait_list),
                event,
            )
        }
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
        let waits = count_or!(wait_list.len(), status::INVALID_EVENT_WAIT_LIST);
        // SAFETY: all pointers come from live references.
        unsafe {
            ffi::clEnqueueCopyImageToBuffer(
                queue,
                src_image,
                dst_buffer,
                src_origin.as_ptr(),
                region.as_ptr(),
                dst_offset,
                waits,
                list_ptr(wait_list),
                event,
            )
        }
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
        let waits = count_or!(wait_list.len(), status::INVALID_EVENT_WAIT_LIST);
        // SAFETY: all pointers come from live references.
        unsafe {
            ffi::clEnqueueCopyBufferToImage(
                queue,
                src_buffer,
                dst_image,
                src_offset,
                dst_origin.as_ptr(),
                region.as_ptr(),
                waits,
                list_ptr(wait_list),
                event,
            )
        }
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
        let waits = count_or!(wait_list.len(), {
            *status = status::INVALID_EVENT_WAIT_LIST;
            ptr::null_mut()
        });
        // SAFETY: all pointers come from live references.
        let mapped = unsafe {
            ffi::clEnqueueMapImage(
                queue,
                image,
                flag(blocking),
                flags.bits(),
                origin.as_ptr(),
                region.as_ptr(),
                row_pitch,
                slice_pitch,
                waits,
                list_ptr(wait_list),
                event,
                status,
            )
        };
        mapped.cast()
    }

    unsafe fn enqueue_unmap_mem_object(
        &self,
        queue: RawHandle,
        mem: RawHandle,
        mapped: *mut u8,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        let waits = count_or!(wait_list.len(), status::INVALID_EVENT_WAIT_LIST);
        // SAFETY: `mapped` came from a map of `mem`, per the caller's contract.
        unsafe { ffi::clEnqueueUnmapMemObject(queue, mem, mapped.cast(), waits, list_ptr(wait_list), event) }
    }

    fn flush(&self, queue: RawHandle) -> Status {
        // SAFETY: the native side validates the handle.
        unsafe { ffi::clFlush(queue) }
    }

    fn finish(&self, queue: RawHandle) -> Status {
        // SAFETY: the native side validates the handle.
        unsafe { ffi::clFinish(queue) }
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> Status {
        let n = count_or!(events.len(), status::INVALID_VALUE);
        // SAFETY: `events` holds `n` handles.
        unsafe { ffi::clWaitForEvents(n, list_ptr(events)) }
    }

    fn event_info(&self, event: RawHandle, param: EventInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        let (size, ptr) = value_args(value);
        // SAFETY: `ptr` is valid for `size` bytes.
        unsafe { ffi::clGetEventInfo(event, param.code(), size, ptr, size_ret) }
    }
}
