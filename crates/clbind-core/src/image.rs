//! Image formats, descriptors and image creation.

use std::fmt;

use bytemuck::Zeroable;
use tracing::debug;

use crate::context::Context;
use crate::error::{ClError, Result};
use crate::handle::Handle;
use crate::memory::{creation_flags, MemFlags, MemObject};
use crate::native::{ImageInfo, MemObjectType, RawHandle, RawImageDesc, RawImageFormat, ResourceKind};
use crate::query::query_scalar;
use crate::status;

/// Upper bound on formats returned by [`Context::supported_image_formats`].
pub const MAX_IMAGE_FORMATS: usize = 256;

macro_rules! native_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// A native code without a name here; preserved verbatim.
            Other(u32),
        }

        impl $name {
            /// Native code.
            pub const fn code(self) -> u32 {
                match self {
                    $(Self::$variant => $code,)+
                    Self::Other(code) => code,
                }
            }

            /// Decode a native code.
            pub const fn from_code(code: u32) -> Self {
                match code {
                    $($code => Self::$variant,)+
                    other => Self::Other(other),
                }
            }

            /// Display name of a known code.
            pub const fn name(self) -> Option<&'static str> {
                match Self::from_code(self.code()) {
                    $(Self::$variant => Some($label),)+
                    Self::Other(_) => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "Unknown({:#x})", self.code()),
                }
            }
        }
    };
}

native_enum!(
    /// Order and count of channels in an image element.
    ChannelOrder {
        /// Red.
        R = 0x10B0 => "R",
        /// Alpha.
        A = 0x10B1 => "A",
        /// Red, green.
        RG = 0x10B2 => "RG",
        /// Red, alpha.
        RA = 0x10B3 => "RA",
        /// Red, green, blue (packed data types only).
        RGB = 0x10B4 => "RGB",
        /// Red, green, blue, alpha.
        RGBA = 0x10B5 => "RGBA",
        /// Blue, green, red, alpha.
        BGRA = 0x10B6 => "BGRA",
        /// Alpha, red, green, blue.
        ARGB = 0x10B7 => "ARGB",
        /// Single intensity channel replicated to all.
        Intensity = 0x10B8 => "Intensity",
        /// Single luminance channel replicated to RGB.
        Luminance = 0x10B9 => "Luminance",
    }
);

native_enum!(
    /// Per-channel storage type.
    ChannelDataType {
        /// Signed normalized 8-bit.
        SNormInt8 = 0x10D0 => "SNormInt8",
        /// Signed normalized 16-bit.
        SNormInt16 = 0x10D1 => "SNormInt16",
        /// Unsigned normalized 8-bit.
        UNormInt8 = 0x10D2 => "UNormInt8",
        /// Unsigned normalized 16-bit.
        UNormInt16 = 0x10D3 => "UNormInt16",
        /// Packed 5-6-5 in 16 bits.
        UNormShort565 = 0x10D4 => "UNormShort565",
        /// Packed x-5-5-5 in 16 bits.
        UNormShort555 = 0x10D5 => "UNormShort555",
        /// Packed x-10-10-10 in 32 bits.
        UNormInt101010 = 0x10D6 => "UNormInt101010",
        /// Signed 8-bit integer.
        SignedInt8 = 0x10D7 => "SignedInt8",
        /// Signed 16-bit integer.
        SignedInt16 = 0x10D8 => "SignedInt16",
        /// Signed 32-bit integer.
        SignedInt32 = 0x10D9 => "SignedInt32",
        /// Unsigned 8-bit integer.
        UnsignedInt8 = 0x10DA => "UnsignedInt8",
        /// Unsigned 16-bit integer.
        UnsignedInt16 = 0x10DB => "UnsignedInt16",
        /// Unsigned 32-bit integer.
        UnsignedInt32 = 0x10DC => "UnsignedInt32",
        /// 16-bit float.
        HalfFloat = 0x10DD => "HalfFloat",
        /// 32-bit float.
        Float = 0x10DE => "Float",
    }
);

impl ChannelOrder {
    /// Channels per element, if known.
    pub const fn channel_count(self) -> Option<usize> {
        match self {
            Self::R | Self::A | Self::Intensity | Self::Luminance => Some(1),
            Self::RG | Self::RA => Some(2),
            Self::RGB => Some(3),
            Self::RGBA | Self::BGRA | Self::ARGB => Some(4),
            Self::Other(_) => None,
        }
    }
}

impl ChannelDataType {
    /// Bytes per channel, or per element for packed types.
    pub const fn size_bytes(self) -> Option<usize> {
        match self {
            Self::SNormInt8 | Self::UNormInt8 | Self::SignedInt8 | Self::UnsignedInt8 => Some(1),
            Self::SNormInt16
            | Self::UNormInt16
            | Self::SignedInt16
            | Self::UnsignedInt16
            | Self::HalfFloat
            | Self::UNormShort565
            | Self::UNormShort555 => Some(2),
            Self::SignedInt32 | Self::UnsignedInt32 | Self::Float | Self::UNormInt101010 => Some(4),
            Self::Other(_) => None,
        }
    }

    /// Whether all channels share one packed word.
    pub const fn is_packed(self) -> bool {
        matches!(self, Self::UNormShort565 | Self::UNormShort555 | Self::UNormInt101010)
    }
}

/// Image element layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    /// Channel order.
    pub order: ChannelOrder,
    /// Channel data type.
    pub data_type: ChannelDataType,
}

impl ImageFormat {
    /// Create a format.
    pub const fn new(order: ChannelOrder, data_type: ChannelDataType) -> Self {
        Self { order, data_type }
    }

    /// Bytes per image element, when both codes are known.
    pub const fn element_size(&self) -> Option<usize> {
        let Some(size) = self.data_type.size_bytes() else {
            return None;
        };
        if self.data_type.is_packed() {
            return Some(size);
        }
        match self.order.channel_count() {
            Some(channels) => Some(channels * size),
            None => None,
        }
    }

    /// Native representation.
    pub const fn to_raw(self) -> RawImageFormat {
        RawImageFormat {
            image_channel_order: self.order.code(),
            image_channel_data_type: self.data_type.code(),
        }
    }
}

impl From<RawImageFormat> for ImageFormat {
    fn from(raw: RawImageFormat) -> Self {
        Self {
            order: ChannelOrder::from_code(raw.image_channel_order),
            data_type: ChannelDataType::from_code(raw.image_channel_data_type),
        }
    }
}

impl From<ImageFormat> for RawImageFormat {
    fn from(format: ImageFormat) -> Self {
        format.to_raw()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.order, self.data_type)
    }
}

/// Image dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Width × height.
    Image2D,
    /// Width × height × depth.
    Image3D,
}

impl From<ImageKind> for MemObjectType {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Image2D => MemObjectType::Image2D,
            ImageKind::Image3D => MemObjectType::Image3D,
        }
    }
}

/// Shape of an image, optionally bound to a backing memory object.
///
/// The descriptor borrows the backing object, so it can never outlive it.
#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptor<'a> {
    /// Dimensionality.
    pub kind: ImageKind,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Depth in pixels (1 for 2D).
    pub depth: usize,
    /// Images in an array.
    pub array_size: usize,
    /// Bytes between rows; zero derives it from width and element size.
    pub row_pitch: usize,
    /// Bytes between slices; zero derives it from row pitch and height.
    pub slice_pitch: usize,
    /// Mip levels.
    pub num_mip_levels: u32,
    /// Samples.
    pub num_samples: u32,
    /// Backing memory object queried by the accessors.
    pub buffer: Option<&'a MemObject>,
}

impl<'a> ImageDescriptor<'a> {
    /// A 2D image descriptor.
    pub fn image_2d(width: usize, height: usize) -> Self {
        Self {
            kind: ImageKind::Image2D,
            width,
            height,
            depth: 1,
            array_size: 0,
            row_pitch: 0,
            slice_pitch: 0,
            num_mip_levels: 0,
            num_samples: 0,
            buffer: None,
        }
    }

    /// A 3D image descriptor.
    pub fn image_3d(width: usize, height: usize, depth: usize) -> Self {
        Self {
            kind: ImageKind::Image3D,
            depth,
            ..Self::image_2d(width, height)
        }
    }

    /// Sets the row pitch in bytes.
    #[must_use]
    pub fn with_row_pitch(mut self, bytes: usize) -> Self {
        self.row_pitch = bytes;
        self
    }

    /// Sets the slice pitch in bytes.
    #[must_use]
    pub fn with_slice_pitch(mut self, bytes: usize) -> Self {
        self.slice_pitch = bytes;
        self
    }

    /// Binds a backing memory object.
    #[must_use]
    pub fn with_buffer(mut self, buffer: &'a MemObject) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Row pitch after deriving a zero pitch from the format.
    pub fn effective_row_pitch(&self, format: &ImageFormat) -> Result<usize> {
        if self.row_pitch != 0 {
            return Ok(self.row_pitch);
        }
        let element = format.element_size().ok_or(ClError::InvalidValue {
            code: status::INVALID_IMAGE_FORMAT_DESCRIPTOR,
        })?;
        self.width.checked_mul(element).ok_or_else(image_size_error)
    }

    /// Slice pitch after deriving a zero pitch from the row pitch.
    pub fn effective_slice_pitch(&self, format: &ImageFormat) -> Result<usize> {
        if self.slice_pitch != 0 {
            return Ok(self.slice_pitch);
        }
        self.effective_row_pitch(format)?
            .checked_mul(self.height)
            .ok_or_else(image_size_error)
    }

    /// Exact initial data length this descriptor requires.
    pub fn expected_data_len(&self, format: &ImageFormat) -> Result<usize> {
        match self.kind {
            ImageKind::Image2D => self
                .effective_row_pitch(format)?
                .checked_mul(self.height)
                .ok_or_else(image_size_error),
            ImageKind::Image3D => self
                .effective_slice_pitch(format)?
                .checked_mul(self.depth)
                .ok_or_else(image_size_error),
        }
    }

    /// Native descriptor structure.
    pub fn to_raw(&self) -> Result<RawImageDesc> {
        let buffer = match self.buffer {
            Some(mem) => mem.raw()?,
            None => RawHandle::NULL,
        };
        Ok(RawImageDesc {
            image_type: MemObjectType::from(self.kind).code(),
            image_width: self.width,
            image_height: self.height,
            image_depth: self.depth,
            image_array_size: self.array_size,
            image_row_pitch: self.row_pitch,
            image_slice_pitch: self.slice_pitch,
            num_mip_levels: self.num_mip_levels,
            num_samples: self.num_samples,
            buffer,
        })
    }

    fn backing(&self) -> Result<&'a MemObject> {
        self.buffer
            .ok_or_else(|| ClError::invalid_resource(ResourceKind::MemObject))
    }

    /// Format of the backing image.
    pub fn format(&self) -> Result<ImageFormat> {
        self.backing()?.image_format()
    }

    /// Element size of the backing image.
    pub fn element_size(&self) -> Result<usize> {
        self.backing()?.element_size()
    }

    /// Row pitch of the backing image.
    pub fn row_pitch(&self) -> Result<usize> {
        self.backing()?.row_pitch()
    }

    /// Slice pitch of the backing image.
    pub fn slice_pitch(&self) -> Result<usize> {
        self.backing()?.slice_pitch()
    }

    /// Width of the backing image.
    pub fn width(&self) -> Result<usize> {
        self.backing()?.width()
    }

    /// Height of the backing image.
    pub fn height(&self) -> Result<usize> {
        self.backing()?.height()
    }

    /// Depth of the backing image.
    pub fn depth(&self) -> Result<usize> {
        self.backing()?.depth()
    }

    /// Offset of the backing object within its parent.
    pub fn mem_offset(&self) -> Result<usize> {
        self.backing()?.offset()
    }

    /// Parent of the backing object, if any.
    pub fn associated_mem_object(&self) -> Result<Option<MemObject>> {
        self.backing()?.associated_mem_object()
    }
}

/// Error for image sizes that overflow `usize`.
pub(crate) fn image_size_error() -> ClError {
    ClError::InvalidValue {
        code: status::INVALID_IMAGE_SIZE,
    }
}

impl MemObject {
    fn image_info<T: bytemuck::Pod>(&self, param: ImageInfo) -> Result<T> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_scalar(|value, size_ret| api.image_info(raw, param, value, size_ret))
    }

    /// Image format.
    pub fn image_format(&self) -> Result<ImageFormat> {
        self.image_info::<RawImageFormat>(ImageInfo::Format)
            .map(ImageFormat::from)
    }

    /// Bytes per image element.
    pub fn element_size(&self) -> Result<usize> {
        self.image_info(ImageInfo::ElementSize)
    }

    /// Bytes between image rows.
    pub fn row_pitch(&self) -> Result<usize> {
        self.image_info(ImageInfo::RowPitch)
    }

    /// Bytes between image slices.
    pub fn slice_pitch(&self) -> Result<usize> {
        self.image_info(ImageInfo::SlicePitch)
    }

    /// Image width in pixels.
    pub fn width(&self) -> Result<usize> {
        self.image_info(ImageInfo::Width)
    }

    /// Image height in pixels.
    pub fn height(&self) -> Result<usize> {
        self.image_info(ImageInfo::Height)
    }

    /// Image depth in pixels.
    pub fn depth(&self) -> Result<usize> {
        self.image_info(ImageInfo::Depth)
    }
}

impl Context {
    /// Allocate an image, optionally initialized from `data`.
    ///
    /// Non-empty `data` must match the descriptor exactly (row pitch × height
    /// for 2D, slice pitch × depth for 3D); a mismatch fails with
    /// `InvalidValue` before any native call. The returned object tracks the
    /// data length as its size.
    pub fn create_image(
        &self,
        flags: MemFlags,
        format: &ImageFormat,
        descriptor: &ImageDescriptor<'_>,
        data: Option<&[u8]>,
    ) -> Result<MemObject> {
        let data = data.filter(|bytes| !bytes.is_empty());
        if let Some(bytes) = data {
            let expected = descriptor.expected_data_len(format)?;
            if bytes.len() != expected {
                debug!(expected, actual = bytes.len(), "Rejected image data length");
                return Err(ClError::invalid_value());
            }
        }
        let flags = creation_flags(flags, data.is_some())?;
        let raw_format = format.to_raw();
        let raw_desc = descriptor.to_raw()?;

        let mut code = status::SUCCESS;
        let raw = self
            .api()
            .create_image(self.raw()?, flags, &raw_format, &raw_desc, data, &mut code);
        status::translate(code)?;

        let handle = Handle::adopt(self.api().clone(), ResourceKind::MemObject, raw)?;
        let size = data.map_or(0, <[u8]>::len);
        debug!(
            handle = %raw,
            format = %format,
            width = descriptor.width,
            height = descriptor.height,
            depth = descriptor.depth,
            size,
            "Created image"
        );
        Ok(MemObject::new(handle, size))
    }

    /// Formats supported for `kind` images with `flags`.
    ///
    /// At most [`MAX_IMAGE_FORMATS`] entries are returned; any further
    /// formats the native side reports are dropped.
    pub fn supported_image_formats(&self, flags: MemFlags, kind: ImageKind) -> Result<Vec<ImageFormat>> {
        let mut formats = vec![RawImageFormat::zeroed(); MAX_IMAGE_FORMATS];
        let mut available = 0u32;
        status::translate(self.api().supported_image_formats(
            self.raw()?,
            flags,
            kind.into(),
            &mut formats,
            &mut available,
        ))?;

        let available = available as usize;
        if available > MAX_IMAGE_FORMATS {
            debug!(available, returned = MAX_IMAGE_FORMATS, "Truncated supported image format list");
        }
        formats.truncate(available.min(MAX_IMAGE_FORMATS));
        Ok(formats.into_iter().map(ImageFormat::from).collect())
    }
}
