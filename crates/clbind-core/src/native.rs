//! The native compute API boundary.
//!
//! [`NativeApi`] mirrors the closed-box C interface this crate wraps: every
//! entry point takes opaque handles and reports an integer [`Status`].
//! Variable-length results use the native "value buffer + size_ret" convention
//! so that the [`query`](crate::query) protocol can drive them. Nothing in here
//! interprets results; that is the job of the wrappers built on top.
//!
//! Two implementations exist: the simulated backend (`clbind-sim`) and the
//! system OpenCL library (`clbind-opencl`, behind the `opencl` feature).

use std::ffi::CStr;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::callback::CallbackToken;
use crate::memory::{MapFlags, MemFlags};
use crate::status::{self, Status};

/// Opaque native handle. Never dereferenced by host code.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Pod, Zeroable)]
pub struct RawHandle(usize);

impl RawHandle {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Wrap a raw native value.
    #[inline]
    pub const fn from_raw(value: usize) -> Self {
        Self(value)
    }

    /// The raw native value.
    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }

    /// Whether this is the null handle.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of object a native handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Compute context.
    Context,
    /// Compute device.
    Device,
    /// Command queue.
    CommandQueue,
    /// Program (sources or binaries).
    Program,
    /// Kernel extracted from a built program.
    Kernel,
    /// Buffer or image.
    MemObject,
    /// Completion token of an enqueued command.
    Event,
}

impl ResourceKind {
    /// Status the native API uses when rejecting a handle of this kind.
    pub fn invalid_status(self) -> Status {
        match self {
            Self::Context => status::INVALID_CONTEXT,
            Self::Device => status::INVALID_DEVICE,
            Self::CommandQueue => status::INVALID_COMMAND_QUEUE,
            Self::Program => status::INVALID_PROGRAM,
            Self::Kernel => status::INVALID_KERNEL,
            Self::MemObject => status::INVALID_MEM_OBJECT,
            Self::Event => status::INVALID_EVENT,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Context => "context",
            Self::Device => "device",
            Self::CommandQueue => "command queue",
            Self::Program => "program",
            Self::Kernel => "kernel",
            Self::MemObject => "memory object",
            Self::Event => "event",
        };
        f.write_str(name)
    }
}

macro_rules! info_params {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Native parameter code.
            pub const fn code(self) -> u32 {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }
    };
}

info_params!(
    /// Program-wide info parameters.
    ProgramInfo {
        /// Native reference count (`u32`).
        ReferenceCount = 0x1160,
        /// Owning context handle.
        Context = 0x1161,
        /// Number of associated devices (`u32`).
        NumDevices = 0x1162,
        /// Associated device handles.
        Devices = 0x1163,
        /// Concatenated program source (string).
        Source = 0x1164,
        /// Per-device binary sizes (`usize` list).
        BinarySizes = 0x1165,
    }
);

info_params!(
    /// Per-device build info parameters.
    ProgramBuildInfo {
        /// Build status (`i32`).
        Status = 0x1181,
        /// Options of the last build (string).
        Options = 0x1182,
        /// Compiler log of the last build (string).
        Log = 0x1183,
    }
);

info_params!(
    /// Kernel info parameters.
    KernelInfo {
        /// Kernel function name (string).
        FunctionName = 0x1190,
        /// Number of arguments (`u32`).
        NumArgs = 0x1191,
        /// Native reference count (`u32`).
        ReferenceCount = 0x1192,
    }
);

info_params!(
    /// Memory object info parameters.
    MemInfo {
        /// Object type (`u32`, see [`MemObjectType`]).
        Type = 0x1100,
        /// Creation flags (`u64`).
        Flags = 0x1101,
        /// Size in bytes (`usize`).
        Size = 0x1102,
        /// Native reference count (`u32`).
        ReferenceCount = 0x1105,
        /// Owning context handle.
        Context = 0x1106,
        /// Parent object for sub-buffers and images created from buffers.
        AssociatedMemObject = 0x1107,
        /// Offset within the associated object (`usize`).
        Offset = 0x1108,
    }
);

info_params!(
    /// Image info parameters.
    ImageInfo {
        /// Image format ([`RawImageFormat`]).
        Format = 0x1110,
        /// Bytes per element (`usize`).
        ElementSize = 0x1111,
        /// Row pitch in bytes (`usize`).
        RowPitch = 0x1112,
        /// Slice pitch in bytes (`usize`).
        SlicePitch = 0x1113,
        /// Width in pixels (`usize`).
        Width = 0x1114,
        /// Height in pixels (`usize`).
        Height = 0x1115,
        /// Depth in pixels (`usize`).
        Depth = 0x1116,
    }
);

info_params!(
    /// Event info parameters.
    EventInfo {
        /// Queue the command was enqueued on.
        CommandQueue = 0x11D0,
        /// Native reference count (`u32`).
        ReferenceCount = 0x11D2,
        /// Execution status (`i32`, see [`CommandStatus`](crate::event::CommandStatus)).
        CommandExecutionStatus = 0x11D3,
    }
);

/// Native memory object type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemObjectType {
    /// Linear buffer.
    Buffer,
    /// Two-dimensional image.
    Image2D,
    /// Three-dimensional image.
    Image3D,
    /// A type tag this layer does not model.
    Other(u32),
}

impl MemObjectType {
    /// Native type code.
    pub const fn code(self) -> u32 {
        match self {
            Self::Buffer => 0x10F0,
            Self::Image2D => 0x10F1,
            Self::Image3D => 0x10F2,
            Self::Other(code) => code,
        }
    }

    /// Decode a native type code.
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x10F0 => Self::Buffer,
            0x10F1 => Self::Image2D,
            0x10F2 => Self::Image3D,
            other => Self::Other(other),
        }
    }
}

/// Native image format structure: two integer enums.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct RawImageFormat {
    /// Channel order code.
    pub image_channel_order: u32,
    /// Channel data type code.
    pub image_channel_data_type: u32,
}

/// Native image descriptor structure.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawImageDesc {
    /// [`MemObjectType`] code.
    pub image_type: u32,
    /// Width in pixels.
    pub image_width: usize,
    /// Height in pixels.
    pub image_height: usize,
    /// Depth in pixels.
    pub image_depth: usize,
    /// Number of images in an array.
    pub image_array_size: usize,
    /// Row pitch in bytes.
    pub image_row_pitch: usize,
    /// Slice pitch in bytes.
    pub image_slice_pitch: usize,
    /// Mip levels.
    pub num_mip_levels: u32,
    /// Samples.
    pub num_samples: u32,
    /// Backing memory object, or null.
    pub buffer: RawHandle,
}

/// The closed-box native compute interface.
///
/// Implementations report every outcome through a [`Status`]; they never
/// panic on bad input. Handles are only meaningful to the implementation that
/// issued them.
pub trait NativeApi: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &str;

    // --- reference counting -------------------------------------------------

    /// Increment the native reference count of `handle`.
    fn retain(&self, kind: ResourceKind, handle: RawHandle) -> Status;

    /// Decrement the native reference count of `handle`.
    fn release(&self, kind: ResourceKind, handle: RawHandle) -> Status;

    // --- programs and kernels -----------------------------------------------

    /// Create a program from one or more source strings.
    fn create_program_with_source(
        &self,
        context: RawHandle,
        sources: &[&str],
        status: &mut Status,
    ) -> RawHandle;

    /// Create a program from per-device binaries. `binary_status` has one
    /// slot per device and receives each binary's load status.
    fn create_program_with_binary(
        &self,
        context: RawHandle,
        devices: &[RawHandle],
        binaries: &[&[u8]],
        binary_status: &mut [Status],
        status: &mut Status,
    ) -> RawHandle;

    /// Build a program. With `notify` set, the build may complete
    /// asynchronously; the implementation then reports completion by handing
    /// the token to [`dispatch_build_notification`](crate::callback::dispatch_build_notification).
    fn build_program(
        &self,
        program: RawHandle,
        devices: &[RawHandle],
        options: &CStr,
        notify: Option<CallbackToken>,
    ) -> Status;

    /// Program-wide info query.
    fn program_info(
        &self,
        program: RawHandle,
        param: ProgramInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status;

    /// Copy each device's binary into the matching output slice. Outputs must
    /// be sized from [`ProgramInfo::BinarySizes`].
    fn program_binaries(&self, program: RawHandle, outputs: &mut [&mut [u8]]) -> Status;

    /// Per-device build info query.
    fn program_build_info(
        &self,
        program: RawHandle,
        device: RawHandle,
        param: ProgramBuildInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status;

    /// Hint that the compiler may release its resources.
    fn unload_compiler(&self) -> Status;

    /// Extract a kernel from a built program.
    fn create_kernel(&self, program: RawHandle, name: &CStr, status: &mut Status) -> RawHandle;

    /// Kernel info query.
    fn kernel_info(
        &self,
        kernel: RawHandle,
        param: KernelInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status;

    // --- memory objects -----------------------------------------------------

    /// Allocate a buffer, optionally initialized from `host_data`.
    fn create_buffer(
        &self,
        context: RawHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
        status: &mut Status,
    ) -> RawHandle;

    /// Allocate an image, optionally initialized from `host_data`.
    fn create_image(
        &self,
        context: RawHandle,
        flags: MemFlags,
        format: &RawImageFormat,
        desc: &RawImageDesc,
        host_data: Option<&[u8]>,
        status: &mut Status,
    ) -> RawHandle;

    /// Fill `formats` with supported image formats; `num_formats` receives
    /// the total number available, which may exceed `formats.len()`.
    fn supported_image_formats(
        &self,
        context: RawHandle,
        flags: MemFlags,
        image_type: MemObjectType,
        formats: &mut [RawImageFormat],
        num_formats: &mut u32,
    ) -> Status;

    /// Memory object info query.
    fn mem_object_info(
        &self,
        mem: RawHandle,
        param: MemInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status;

    /// Image info query.
    fn image_info(
        &self,
        image: RawHandle,
        param: ImageInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status;

    // --- commands -----------------------------------------------------------

    /// Read an image region into host memory.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of the bytes described by `region` and
    /// the pitches until the produced event completes.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Status;

    /// Write host memory into an image region.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of the bytes described by `region` and
    /// the pitches until the produced event completes.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Status;

    /// Copy between two images.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Status;

    /// Copy an image region into a buffer.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Status;

    /// Copy buffer bytes into an image region.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Status;

    /// Map an image region into host memory.
    #[allow(clippy::too_many_arguments)]
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
    ) -> *mut u8;

    /// Unmap a region previously returned by [`enqueue_map_image`](Self::enqueue_map_image).
    ///
    /// # Safety
    ///
    /// `mapped` must come from a map of `mem` that has not been unmapped yet.
    unsafe fn enqueue_unmap_mem_object(
        &self,
        queue: RawHandle,
        mem: RawHandle,
        mapped: *mut u8,
        wait_list: &[RawHandle],
        event: &mut RawHandle,
    ) -> Status;

    /// Submit all queued commands to the device.
    fn flush(&self, queue: RawHandle) -> Status;

    /// Block until every command on the queue has completed.
    fn finish(&self, queue: RawHandle) -> Status;

    // --- events -------------------------------------------------------------

    /// Block until every listed event has completed.
    fn wait_for_events(&self, events: &[RawHandle]) -> Status;

    /// Event info query.
    fn event_info(
        &self,
        event: RawHandle,
        param: EventInfo,
        value: &mut [u8],
        size_ret: &mut usize,
    ) -> Status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_handle_null() {
        assert!(RawHandle::NULL.is_null());
        assert!(!RawHandle::from_raw(0x10).is_null());
        assert_eq!(RawHandle::from_raw(0x10).as_raw(), 0x10);
        assert_eq!(format!("{:?}", RawHandle::from_raw(255)), "RawHandle(0xff)");
    }

    #[test]
    fn test_mem_object_type_codes_round_trip() {
        for ty in [
            MemObjectType::Buffer,
            MemObjectType::Image2D,
            MemObjectType::Image3D,
            MemObjectType::Other(0x10F6),
        ] {
            assert_eq!(MemObjectType::from_code(ty.code()), ty);
        }
    }

    #[test]
    fn test_invalid_status_per_kind() {
        assert_eq!(ResourceKind::Program.invalid_status(), status::INVALID_PROGRAM);
        assert_eq!(ResourceKind::Event.invalid_status(), status::INVALID_EVENT);
    }
}
