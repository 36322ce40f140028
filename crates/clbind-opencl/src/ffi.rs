//! Raw OpenCL 1.2 entry points used by the backend.
//!
//! Object handles are declared as [`RawHandle`], a transparent wrapper
//! around a pointer-sized integer, so values pass through unchanged.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_void};

use clbind_core::native::{RawHandle, RawImageDesc, RawImageFormat};

pub type ClInt = i32;
pub type ClUint = u32;
pub type ClBitfield = u64;
pub type ClBool = u32;

pub const CL_TRUE: ClBool = 1;
pub const CL_FALSE: ClBool = 0;

/// `pfn_notify` of `clBuildProgram`.
pub type BuildNotify = extern "C" fn(program: RawHandle, user_data: *mut c_void);

#[cfg_attr(target_os = "macos", link(name = "OpenCL", kind = "framework"))]
#[cfg_attr(not(target_os = "macos"), link(name = "OpenCL"))]
extern "C" {
    pub fn clRetainDevice(device: RawHandle) -> ClInt;
    pub fn clReleaseDevice(device: RawHandle) -> ClInt;
    pub fn clRetainContext(context: RawHandle) -> ClInt;
    pub fn clReleaseContext(context: RawHandle) -> ClInt;
    pub fn clRetainCommandQueue(queue: RawHandle) -> ClInt;
    pub fn clReleaseCommandQueue(queue: RawHandle) -> ClInt;
    pub fn clRetainProgram(program: RawHandle) -> ClInt;
    pub fn clReleaseProgram(program: RawHandle) -> ClInt;
    pub fn clRetainKernel(kernel: RawHandle) -> ClInt;
    pub fn clReleaseKernel(kernel: RawHandle) -> ClInt;
    pub fn clRetainMemObject(mem: RawHandle) -> ClInt;
    pub fn clReleaseMemObject(mem: RawHandle) -> ClInt;
    pub fn clRetainEvent(event: RawHandle) -> ClInt;
    pub fn clReleaseEvent(event: RawHandle) -> ClInt;

    pub fn clCreateProgramWithSource(
        context: RawHandle,
        count: ClUint,
        strings: *const *const c_char,
        lengths: *const usize,
        errcode_ret: *mut ClInt,
    ) -> RawHandle;

    pub fn clCreateProgramWithBinary(
        context: RawHandle,
        num_devices: ClUint,
        device_list: *const RawHandle,
        lengths: *const usize,
        binaries: *const *const u8,
        binary_status: *mut ClInt,
        errcode_ret: *mut ClInt,
    ) -> RawHandle;

    pub fn clBuildProgram(
        program: RawHandle,
        num_devices: ClUint,
        device_list: *const RawHandle,
        options: *const c_char,
        pfn_notify: Option<BuildNotify>,
        user_data: *mut c_void,
    ) -> ClInt;

    pub fn clGetProgramInfo(
        program: RawHandle,
        param_name: ClUint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> ClInt;

    pub fn clGetProgramBuildInfo(
        program: RawHandle,
        device: RawHandle,
        param_name: ClUint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> ClInt;

    pub fn clUnloadCompiler() -> ClInt;

    pub fn clCreateKernel(program: RawHandle, kernel_name: *const c_char, errcode_ret: *mut ClInt) -> RawHandle;

    pub fn clGetKernelInfo(
        kernel: RawHandle,
        param_name: ClUint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> ClInt;

    pub fn clCreateBuffer(
        context: RawHandle,
        flags: ClBitfield,
        size: usize,
        host_ptr: *mut c_void,
        errcode_ret: *mut ClInt,
    ) -> RawHandle;

    pub fn clCreateImage(
        context: RawHandle,
        flags: ClBitfield,
        image_format: *const RawImageFormat,
        image_desc: *const RawImageDesc,
        host_ptr: *mut c_void,
        errcode_ret: *mut ClInt,
    ) -> RawHandle;

    pub fn clGetSupportedImageFormats(
        context: RawHandle,
        flags: ClBitfield,
        image_type: ClUint,
        num_entries: ClUint,
        image_formats: *mut RawImageFormat,
        num_image_formats: *mut ClUint,
    ) -> ClInt;

    pub fn clGetMemObjectInfo(
        mem: RawHandle,
        param_name: ClUint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> ClInt;

    pub fn clGetImageInfo(
        image: RawHandle,
        param_name: ClUint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> ClInt;

    pub fn clEnqueueReadImage(
        queue: RawHandle,
        image: RawHandle,
        blocking_read: ClBool,
        origin: *const usize,
        region: *const usize,
        row_pitch: usize,
        slice_pitch: usize,
        ptr: *mut c_void,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
    ) -> ClInt;

    pub fn clEnqueueWriteImage(
        queue: RawHandle,
        image: RawHandle,
        blocking_write: ClBool,
        origin: *const usize,
        region: *const usize,
        input_row_pitch: usize,
        input_slice_pitch: usize,
        ptr: *const c_void,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
    ) -> ClInt;

    pub fn clEnqueueCopyImage(
        queue: RawHandle,
        src_image: RawHandle,
        dst_image: RawHandle,
        src_origin: *const usize,
        dst_origin: *const usize,
        region: *const usize,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
    ) -> ClInt;

    pub fn clEnqueueCopyImageToBuffer(
        queue: RawHandle,
        src_image: RawHandle,
        dst_buffer: RawHandle,
        src_origin: *const usize,
        region: *const usize,
        dst_offset: usize,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
    ) -> ClInt;

    pub fn clEnqueueCopyBufferToImage(
        queue: RawHandle,
        src_buffer: RawHandle,
        dst_image: RawHandle,
        src_offset: usize,
        dst_origin: *const usize,
        region: *const usize,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
    ) -> ClInt;

    pub fn clEnqueueMapImage(
        queue: RawHandle,
        image: RawHandle,
        blocking_map: ClBool,
        map_flags: ClBitfield,
        origin: *const usize,
        region: *const usize,
        image_row_pitch: *mut usize,
        image_slice_pitch: *mut usize,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
        errcode_ret: *mut ClInt,
    ) -> *mut c_void;

    pub fn clEnqueueUnmapMemObject(
        queue: RawHandle,
        memobj: RawHandle,
        mapped_ptr: *mut c_void,
        num_events_in_wait_list: ClUint,
        event_wait_list: *const RawHandle,
        event: *mut RawHandle,
    ) -> ClInt;

    pub fn clFlush(queue: RawHandle) -> ClInt;
    pub fn clFinish(queue: RawHandle) -> ClInt;
    pub fn clWaitForEvents(num_events: ClUint, event_list: *const RawHandle) -> ClInt;

    pub fn clGetEventInfo(
        event: RawHandle,
        param_name: ClUint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> ClInt;
}
