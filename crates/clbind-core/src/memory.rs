//! Memory objects: buffers, images and mapped regions.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::ptr::NonNull;
use std::slice;

use tracing::debug;

use crate::context::Context;
use crate::error::{ClError, Result};
use crate::handle::{impl_resource, Handle};
use crate::image::image_size_error;
use crate::native::{MemInfo, MemObjectType, RawHandle, ResourceKind};
use crate::query::query_scalar;
use crate::status;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u64);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)+

            /// No flags set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Raw native bits.
            pub const fn bits(self) -> u64 {
                self.0
            }

            /// Wrap raw native bits, keeping unknown ones.
            pub const fn from_bits_retain(bits: u64) -> Self {
                Self(bits)
            }

            /// Whether every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut set = f.debug_set();
                $(if self.contains(Self::$flag) {
                    set.entry(&format_args!(stringify!($flag)));
                })+
                let known = 0 $(| $bit)+;
                if self.0 & !known != 0 {
                    set.entry(&format_args!("{:#x}", self.0 & !known));
                }
                set.finish()
            }
        }
    };
}

flag_set!(
    /// Memory object creation flags.
    MemFlags {
        /// Kernels may read and write.
        READ_WRITE = 1 << 0,
        /// Kernels may only write.
        WRITE_ONLY = 1 << 1,
        /// Kernels may only read.
        READ_ONLY = 1 << 2,
        /// Use host memory as the backing store. Not supported by this crate.
        USE_HOST_PTR = 1 << 3,
        /// Allocate from host-accessible memory.
        ALLOC_HOST_PTR = 1 << 4,
        /// Initialize from host memory at creation.
        COPY_HOST_PTR = 1 << 5,
    }
);

flag_set!(
    /// Mapping access flags.
    MapFlags {
        /// Host reads the mapped region.
        READ = 1 << 0,
        /// Host writes the mapped region.
        WRITE = 1 << 1,
    }
);

/// Reject flags this layer cannot honor and add `COPY_HOST_PTR` when
/// initial data is supplied.
pub(crate) fn creation_flags(flags: MemFlags, has_data: bool) -> Result<MemFlags> {
    if flags.contains(MemFlags::USE_HOST_PTR) {
        return Err(ClError::InvalidValue {
            code: status::INVALID_HOST_PTR,
        });
    }
    match (has_data, flags.contains(MemFlags::COPY_HOST_PTR)) {
        (true, _) => Ok(flags | MemFlags::COPY_HOST_PTR),
        (false, true) => Err(ClError::InvalidValue {
            code: status::INVALID_HOST_PTR,
        }),
        (false, false) => Ok(flags),
    }
}

/// An owned buffer or image.
#[derive(Debug)]
pub struct MemObject {
    pub(crate) handle: Handle,
    size: usize,
}

impl_resource!(MemObject);

impl MemObject {
    pub(crate) fn new(handle: Handle, size: usize) -> Self {
        Self { handle, size }
    }

    /// Byte size tracked at creation: the initial data length for images,
    /// the allocation size for buffers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Native memory object handle.
    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    /// Second owning wrapper for the same object.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            handle: self.handle.try_clone()?,
            size: self.size,
        })
    }

    pub(crate) fn info<T: bytemuck::Pod>(&self, param: MemInfo) -> Result<T> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_scalar(|value, size_ret| api.mem_object_info(raw, param, value, size_ret))
    }

    /// Native object type.
    pub fn mem_type(&self) -> Result<MemObjectType> {
        self.info::<u32>(MemInfo::Type).map(MemObjectType::from_code)
    }

    /// Creation flags as recorded by the native side.
    pub fn flags(&self) -> Result<MemFlags> {
        self.info::<u64>(MemInfo::Flags).map(MemFlags::from_bits_retain)
    }

    /// Allocation size as reported by the native side.
    pub fn native_size(&self) -> Result<usize> {
        self.info(MemInfo::Size)
    }

    /// Offset within the associated memory object.
    pub fn offset(&self) -> Result<usize> {
        self.info(MemInfo::Offset)
    }

    /// Native reference count. Diagnostic only.
    pub fn reference_count(&self) -> Result<u32> {
        self.info(MemInfo::ReferenceCount)
    }

    /// The object this one was created from, if any, as a new owning wrapper.
    pub fn associated_mem_object(&self) -> Result<Option<MemObject>> {
        let parent: RawHandle = self.info(MemInfo::AssociatedMemObject)?;
        if parent.is_null() {
            return Ok(None);
        }

        let api = self.handle.api();
        status::translate(api.retain(ResourceKind::MemObject, parent))?;
        let mut handle = Handle::adopt(api.clone(), ResourceKind::MemObject, parent)?;
        let size = match query_scalar(|value, size_ret| {
            api.mem_object_info(parent, MemInfo::Size, value, size_ret)
        }) {
            Ok(size) => size,
            Err(err) => {
                handle.dispose();
                return Err(err);
            }
        };
        Ok(Some(MemObject::new(handle, size)))
    }
}

impl Context {
    /// Allocate a buffer of `size` bytes, optionally initialized from `data`.
    pub fn create_buffer(&self, flags: MemFlags, size: usize, data: Option<&[u8]>) -> Result<MemObject> {
        let data = data.filter(|bytes| !bytes.is_empty());
        if let Some(bytes) = data {
            if bytes.len() != size {
                return Err(ClError::invalid_value());
            }
        }
        let flags = creation_flags(flags, data.is_some())?;

        let mut code = status::SUCCESS;
        let raw = self
            .api()
            .create_buffer(self.raw()?, flags, size, data, &mut code);
        status::translate(code)?;

        let handle = Handle::adopt(self.api().clone(), ResourceKind::MemObject, raw)?;
        debug!(handle = %raw, size, ?flags, "Created buffer");
        Ok(MemObject::new(handle, size))
    }
}

/// A host view of a mapped image region.
///
/// Valid until the matching [`unmap`](crate::queue::CommandQueue::unmap)
/// completes. `size` covers the bytes from the first to the last element of
/// the mapped region: `(depth - 1) * slice_pitch + (height - 1) * row_pitch +
/// width * element_size`.
#[derive(Debug)]
pub struct MappedImage {
    ptr: NonNull<u8>,
    row_pitch: usize,
    slice_pitch: usize,
    size: usize,
}

// The pointer is only a view into native-owned memory; access goes through
// the unsafe accessors.
unsafe impl Send for MappedImage {}
unsafe impl Sync for MappedImage {}

impl MappedImage {
    pub(crate) fn new(ptr: NonNull<u8>, row_pitch: usize, slice_pitch: usize, size: usize) -> Self {
        Self {
            ptr,
            row_pitch,
            slice_pitch,
            size,
        }
    }

    /// Mapped-size rule shared by the queue and its tests.
    ///
    /// Sizes that do not fit in `usize` are `INVALID_IMAGE_SIZE`.
    pub(crate) fn region_size(
        region: &[usize; 3],
        element_size: usize,
        row_pitch: usize,
        slice_pitch: usize,
    ) -> Result<usize> {
        let [width, height, depth] = *region;
        if width == 0 || height == 0 || depth == 0 {
            return Ok(0);
        }
        (depth - 1)
            .checked_mul(slice_pitch)
            .zip((height - 1).checked_mul(row_pitch))
            .and_then(|(slices, rows)| slices.checked_add(rows))
            .zip(width.checked_mul(element_size))
            .and_then(|(offset, line)| offset.checked_add(line))
            .ok_or_else(image_size_error)
    }

    /// Start of the mapped region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Bytes between rows.
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// Bytes between slices (zero for 2D maps).
    pub fn slice_pitch(&self) -> usize {
        self.slice_pitch
    }

    /// Bytes covered by the mapped region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// View the mapped bytes.
    ///
    /// # Safety
    ///
    /// The map event must have completed and the region must not be unmapped
    /// while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        // SAFETY: upheld by the caller.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Mutable view of the mapped bytes.
    ///
    /// # Safety
    ///
    /// As [`as_slice`](Self::as_slice), and the map must include
    /// [`MapFlags::WRITE`].
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: upheld by the caller.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}
