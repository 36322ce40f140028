//! Minimal recording [`NativeApi`] for unit tests.
//!
//! Only reference counting is modelled; every other entry point reports
//! `INVALID_OPERATION`. Full behavior lives in the simulated backend.

use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::callback::CallbackToken;
use crate::memory::{MapFlags, MemFlags};
use crate::native::*;
use crate::status::{self, Status};

#[derive(Debug, Default)]
pub(crate) struct RecordingApi {
    retains: AtomicUsize,
    releases: AtomicUsize,
    fail_release: bool,
}

impl RecordingApi {
    pub(crate) fn failing_release() -> Self {
        Self {
            fail_release: true,
            ..Self::default()
        }
    }

    pub(crate) fn retains(&self) -> usize {
        self.retains.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

const UNSUPPORTED: Status = status::INVALID_OPERATION;

#[allow(unused_variables)]
impl NativeApi for RecordingApi {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn retain(&self, kind: ResourceKind, handle: RawHandle) -> Status {
        self.retains.fetch_add(1, Ordering::SeqCst);
        status::SUCCESS
    }

    fn release(&self, kind: ResourceKind, handle: RawHandle) -> Status {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            kind.invalid_status()
        } else {
            status::SUCCESS
        }
    }

    fn create_program_with_source(&self, context: RawHandle, sources: &[&str], status: &mut Status) -> RawHandle {
        *status = UNSUPPORTED;
        RawHandle::NULL
    }

    fn create_program_with_binary(
        &self,
        context: RawHandle,
        devices: &[RawHandle],
        binaries: &[&[u8]],
        binary_status: &mut [Status],
        status: &mut Status,
    ) -> RawHandle {
        *status = UNSUPPORTED;
        RawHandle::NULL
    }

    fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: &CStr,
        notify: Option<CallbackToken>,
    ) -> Status {
        UNSUPPORTED
    }

    fn program_info(&self, program: RawHandle, param: ProgramInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        UNSUPPORTED
    }

    fn program_binaries(&self, program: RawHandle, outputs: &mut [&mut [u8]]) -> Status {
        UNSUPPORTED
    }

    fn program_build_info(
        &self,
        program: RawHandle,
        device: RawHandle,
        param: ProgramBuildInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status {
        UNSUPPORTED
    }

    fn unload_compiler(&self) -> Status {
        status::SUCCESS
    }

    fn create_kernel(&self, program: RawHandle, name: &CStr, status: &mut Status) -> RawHandle {
        *status = UNSUPPORTED;
        RawHandle::NULL
    }

    fn kernel_info(&self, kernel: RawHandle, param: KernelInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        UNSUPPORTED
    }

    fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
        status: &mut Status,
    ) -> RawHandle {
        *status = UNSUPPORTED;
        RawHandle::NULL
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
        *status = UNSUPPORTED;
        RawHandle::NULL
    }

    fn supported_image_formats(
        &self,
        context: RawHandle,
        flags: MemFlags,
        image_type: MemObjectType,
        formats: &mut [RawImageFormat],
        num_formats: &mut u32,
    ) -> Status {
        UNSUPPORTED
    }

    fn mem_object_info(&self, mem: RawHandle, param: MemInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        UNSUPPORTED
    }

    fn image_info(&self, image: RawHandle, param: ImageInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        UNSUPPORTED
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
        UNSUPPORTED
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
        UNSUPPORTED
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
        UNSUPPORTED
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
        UNSUPPORTED
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
        UNSUPPORTED
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
        *status = UNSUPPORTED;
        std::ptr::null_mut()
    }

    unsafe fn enqueue_unmap_mem_object(
        &self,
        queue: RawHandle,
        mem: RawHandle,
        mapped: *mut u8,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status {
        UNSUPPORTED
    }

    fn flush(&self, queue: RawHandle) -> Status {
        status::SUCCESS
    }

    fn finish(&self, queue: RawHandle) -> Status {
        status::SUCCESS
    }

    fn wait_for_events(&self, events: &[RawHandle]) -> Status {
        status::SUCCESS
    }

    fn event_info(&self, event: RawHandle, param: EventInfo, value: &mut [u8], size_ret: &mut usize) -> Status {
        UNSUPPORTED
    }
}
