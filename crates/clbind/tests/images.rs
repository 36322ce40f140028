//! Integration tests for image creation, descriptors and format queries.

use clbind::prelude::*;
use clbind::sim::{SimConfig, SimSession};
use clbind::status;

const RGBA8: ImageFormat = ImageFormat::new(ChannelOrder::RGBA, ChannelDataType::UnsignedInt8);

fn session() -> SimSession {
    SimSession::with_config(SimConfig::instant(), ClConfig::for_testing(), &["gpu0"])
        .expect("Failed to create simulated session")
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Test a 4x4 RGBA image initialized from exactly row pitch x height bytes.
#[test]
fn test_create_image_with_matching_data() {
    let s = session();
    let data = pattern(64);
    let desc = ImageDescriptor::image_2d(4, 4).with_row_pitch(16);

    let image = s
        .context
        .create_image(MemFlags::READ_WRITE, &RGBA8, &desc, Some(data.as_slice()))
        .expect("Failed to create image");

    assert_eq!(image.size(), 64);
    assert_eq!(image.mem_type().expect("type"), MemObjectType::Image2D);
    assert!(image.flags().expect("flags").contains(MemFlags::COPY_HOST_PTR));
    assert_eq!(image.image_format().expect("format"), RGBA8);
    assert_eq!(image.element_size().expect("element size"), 4);
    assert_eq!(image.row_pitch().expect("row pitch"), 16);
    assert_eq!(image.width().expect("width"), 4);
    assert_eq!(image.height().expect("height"), 4);
    assert_eq!(image.depth().expect("depth"), 0);
    assert_eq!(image.slice_pitch().expect("slice pitch"), 0);

    let raw = image.raw().expect("Image handle");
    assert_eq!(s.api.image_bytes(raw), Some(data));
}

/// Test that a short data buffer is rejected before the backend sees it.
#[test]
fn test_create_image_with_short_data() {
    let s = session();
    let before = s.api.live_objects();
    let desc = ImageDescriptor::image_2d(4, 4).with_row_pitch(16);

    let err = s
        .context
        .create_image(MemFlags::READ_WRITE, &RGBA8, &desc, Some(pattern(32).as_slice()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(err.code(), Some(status::INVALID_VALUE));
    assert_eq!(s.api.live_objects(), before);

    // Too long is just as wrong.
    let err = s
        .context
        .create_image(MemFlags::READ_WRITE, &RGBA8, &desc, Some(pattern(65).as_slice()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
}

/// Test that an image without initial data tracks a size of zero.
#[test]
fn test_create_image_without_data() {
    let s = session();
    let desc = ImageDescriptor::image_2d(8, 2);

    let image = s
        .context
        .create_image(MemFlags::READ_ONLY, &RGBA8, &desc, None)
        .expect("Failed to create image");
    assert_eq!(image.size(), 0);
    assert_eq!(image.row_pitch().expect("row pitch"), 32);

    // Empty data is the same as no data.
    let image = s
        .context
        .create_image(MemFlags::READ_ONLY, &RGBA8, &desc, Some(&[][..]))
        .expect("Failed to create image");
    assert_eq!(image.size(), 0);
}

/// Test a 3D image with a padded slice pitch.
#[test]
fn test_create_3d_image() {
    let s = session();
    let format = ImageFormat::new(ChannelOrder::R, ChannelDataType::Float);
    // 2x2 floats per slice (16 bytes) padded to 32 bytes, 3 slices.
    let desc = ImageDescriptor::image_3d(2, 2, 3).with_slice_pitch(32);
    let data = pattern(96);

    let image = s
        .context
        .create_image(MemFlags::READ_WRITE, &format, &desc, Some(data.as_slice()))
        .expect("Failed to create image");
    assert_eq!(image.size(), 96);
    assert_eq!(image.mem_type().expect("type"), MemObjectType::Image3D);
    assert_eq!(image.depth().expect("depth"), 3);
    assert_eq!(image.slice_pitch().expect("slice pitch"), 16);

    let stored = s.api.image_bytes(image.raw().expect("Image handle")).expect("image bytes");
    assert_eq!(stored.len(), 48);
    assert_eq!(&stored[..16], &data[..16]);
    assert_eq!(&stored[16..32], &data[32..48]);
    assert_eq!(&stored[32..], &data[64..80]);
}

/// Test that host-pointer aliasing is refused.
#[test]
fn test_use_host_ptr_rejected() {
    let s = session();
    let before = s.api.live_objects();
    let desc = ImageDescriptor::image_2d(4, 4);

    let err = s
        .context
        .create_image(MemFlags::USE_HOST_PTR, &RGBA8, &desc, Some(pattern(64).as_slice()))
        .unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_HOST_PTR));

    let err = s
        .context
        .create_image(MemFlags::COPY_HOST_PTR, &RGBA8, &desc, None)
        .unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_HOST_PTR));
    assert_eq!(s.api.live_objects(), before);
}

/// Test backend rejections of formats and extents.
#[test]
fn test_backend_rejections() {
    let s = session();

    let alpha = ImageFormat::new(ChannelOrder::A, ChannelDataType::Float);
    let err = s
        .context
        .create_image(MemFlags::READ_WRITE, &alpha, &ImageDescriptor::image_2d(4, 4), None)
        .unwrap_err();
    assert_eq!(err.code(), Some(status::IMAGE_FORMAT_NOT_SUPPORTED));

    let err = s
        .context
        .create_image(MemFlags::READ_WRITE, &RGBA8, &ImageDescriptor::image_2d(0, 4), None)
        .unwrap_err();
    assert_eq!(err.code(), Some(status::INVALID_IMAGE_SIZE));
}

/// Test that descriptor accessors read through to the bound image.
#[test]
fn test_descriptor_accessors() {
    let s = session();
    let image = s
        .context
        .create_image(MemFlags::READ_WRITE, &RGBA8, &ImageDescriptor::image_2d(6, 3), None)
        .expect("Failed to create image");

    let desc = ImageDescriptor::image_2d(6, 3).with_buffer(&image);
    assert_eq!(desc.format().expect("format"), RGBA8);
    assert_eq!(desc.element_size().expect("element size"), 4);
    assert_eq!(desc.width().expect("width"), 6);
    assert_eq!(desc.height().expect("height"), 3);
    assert_eq!(desc.row_pitch().expect("row pitch"), 24);
    assert_eq!(desc.mem_offset().expect("offset"), 0);
    assert!(desc.associated_mem_object().expect("parent").is_none());
}

/// Test an image bound to a parent buffer.
#[test]
fn test_image_with_parent_buffer() {
    let s = session();
    let buffer = s
        .context
        .create_buffer(MemFlags::READ_WRITE, 64, None)
        .expect("Failed to create buffer");
    let buffer_raw = buffer.raw().expect("Buffer handle");

    let desc = ImageDescriptor::image_2d(4, 4).with_buffer(&buffer);
    let image = s
        .context
        .create_image(MemFlags::READ_WRITE, &RGBA8, &desc, None)
        .expect("Failed to create image");
    assert_eq!(s.api.refcount(buffer_raw), Some(2));

    let parent = image
        .associated_mem_object()
        .expect("Failed to query parent")
        .expect("Missing parent");
    assert_eq!(parent.raw().expect("Parent handle"), buffer_raw);
    assert_eq!(parent.size(), 64);
    assert_eq!(s.api.refcount(buffer_raw), Some(3));

    drop(parent);
    drop(buffer);
    assert_eq!(s.api.refcount(buffer_raw), Some(1));

    drop(image);
    assert_eq!(s.api.refcount(buffer_raw), None);
}

/// Test the supported format list.
#[test]
fn test_supported_formats() {
    let s = session();
    let formats = s
        .context
        .supported_image_formats(MemFlags::READ_WRITE, ImageKind::Image2D)
        .expect("Failed to query formats");

    assert!(formats.contains(&RGBA8));
    assert!(formats.contains(&ImageFormat::new(ChannelOrder::BGRA, ChannelDataType::UNormInt8)));
    assert!(!formats.contains(&ImageFormat::new(ChannelOrder::A, ChannelDataType::Float)));
}

/// Test that more than 256 reported formats are truncated to 256.
#[test]
fn test_supported_formats_truncated() {
    let s = session();
    s.api.set_supported_formats(vec![RGBA8.to_raw(); 300]);

    let formats = s
        .context
        .supported_image_formats(MemFlags::READ_ONLY, ImageKind::Image3D)
        .expect("Failed to query formats");
    assert_eq!(formats.len(), MAX_IMAGE_FORMATS);
    assert_eq!(MAX_IMAGE_FORMATS, 256);
    assert!(formats.iter().all(|format| *format == RGBA8));

    s.api.set_supported_formats(Vec::new());
    let formats = s
        .context
        .supported_image_formats(MemFlags::READ_ONLY, ImageKind::Image2D)
        .expect("Failed to query formats");
    assert!(formats.is_empty());
}
