//! Image formats the simulated device supports.

use clbind_core::image::{ChannelDataType, ChannelOrder, ImageFormat};
use clbind_core::native::RawImageFormat;

const ORDERS: [ChannelOrder; 3] = [ChannelOrder::R, ChannelOrder::RG, ChannelOrder::RGBA];

const DATA_TYPES: [ChannelDataType; 12] = [
    ChannelDataType::SNormInt8,
    ChannelDataType::SNormInt16,
    ChannelDataType::UNormInt8,
    ChannelDataType::UNormInt16,
    ChannelDataType::SignedInt8,
    ChannelDataType::SignedInt16,
    ChannelDataType::SignedInt32,
    ChannelDataType::UnsignedInt8,
    ChannelDataType::UnsignedInt16,
    ChannelDataType::UnsignedInt32,
    ChannelDataType::HalfFloat,
    ChannelDataType::Float,
];

/// Every unpacked R/RG/RGBA combination plus BGRA/UNormInt8.
pub(crate) fn default_formats() -> Vec<RawImageFormat> {
    ORDERS
        .iter()
        .flat_map(|&order| DATA_TYPES.iter().map(move |&data_type| ImageFormat::new(order, data_type)))
        .chain(std::iter::once(ImageFormat::new(ChannelOrder::BGRA, ChannelDataType::UNormInt8)))
        .map(ImageFormat::to_raw)
        .collect()
}
