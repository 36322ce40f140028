//! Command queue: image transfers, copies and maps.
//!
//! Every enqueue takes a wait-list of earlier [`Event`]s and yields a new one.
//! Ordering between commands exists only through those wait-lists. Origins
//! and regions are passed to the native side verbatim; out-of-range
//! coordinates come back as translated native errors.

use std::ptr::NonNull;

use tracing::debug;

use crate::context::Context;
use crate::error::{ClError, Result};
use crate::event::{raw_wait_list, Event};
use crate::handle::{impl_resource, Handle};
use crate::image::image_size_error;
use crate::memory::{MapFlags, MappedImage, MemObject};
use crate::native::{RawHandle, ResourceKind};
use crate::status::{self, Status};

/// Origin of a region, in pixels (`[x, y, z]`).
pub type Origin = [usize; 3];

/// Extent of a region, in pixels (`[width, height, depth]`, depth 1 for 2D).
pub type Region = [usize; 3];

/// A failed enqueue, with the event the native side produced anyway.
#[derive(Debug, thiserror::Error)]
#[error("enqueue failed: {source}")]
pub struct EnqueueError {
    /// Translated native failure.
    pub source: ClError,
    /// Event produced despite the failure, if any; still needs waiting on or
    /// dropping.
    pub event: Option<Event>,
}

impl From<ClError> for EnqueueError {
    fn from(source: ClError) -> Self {
        Self {
            source,
            event: None,
        }
    }
}

impl From<EnqueueError> for ClError {
    fn from(err: EnqueueError) -> Self {
        err.source
    }
}

/// Result of an enqueue.
pub type EnqueueResult<T> = std::result::Result<T, EnqueueError>;

/// Bytes a host buffer needs to hold `region` at the given pitches.
fn host_bytes(region: &Region, element_size: usize, row_pitch: usize, slice_pitch: usize) -> Result<usize> {
    let row_pitch = match row_pitch {
        0 => region[0].checked_mul(element_size).ok_or_else(image_size_error)?,
        pitch => pitch,
    };
    let slice_pitch = match slice_pitch {
        0 => row_pitch.checked_mul(region[1]).ok_or_else(image_size_error)?,
        pitch => pitch,
    };
    MappedImage::region_size(region, element_size, row_pitch, slice_pitch)
}

/// An owned native command queue.
#[derive(Debug)]
pub struct CommandQueue {
    pub(crate) handle: Handle,
}

impl_resource!(CommandQueue);

impl CommandQueue {
    /// Adopt a queue created on `context` by the embedding application.
    pub fn from_raw(context: &Context, raw: RawHandle) -> Result<Self> {
        Ok(Self {
            handle: Handle::adopt(context.api().clone(), ResourceKind::CommandQueue, raw)?,
        })
    }

    /// Native queue handle.
    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    fn complete(&self, command: &'static str, code: Status, event: RawHandle) -> EnqueueResult<Event> {
        let event = if event.is_null() {
            None
        } else {
            Event::adopt(self.handle.api(), event).ok()
        };

        match (status::to_error(code), event) {
            (None, Some(event)) => {
                debug!(command, event = ?event.handle.as_raw(), "Enqueued command");
                Ok(event)
            }
            (None, None) => Err(EnqueueError {
                source: ClError::null_handle(),
                event: None,
            }),
            (Some(source), event) => {
                debug!(command, code, has_event = event.is_some(), "Enqueue failed");
                Err(EnqueueError { source, event })
            }
        }
    }

    fn check_host_len(&self, image: &MemObject, region: &Region, row_pitch: usize, slice_pitch: usize, len: usize) -> Result<()> {
        let needed = host_bytes(region, image.element_size()?, row_pitch, slice_pitch)?;
        if len < needed {
            debug!(needed, len, "Host buffer too small for image region");
            return Err(ClError::invalid_value());
        }
        Ok(())
    }

    /// Read an image region into `dst`.
    ///
    /// # Safety
    ///
    /// With `blocking == false`, `dst` is written after this returns; it must
    /// stay alive and untouched until the returned event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn read_image(
        &self,
        image: &MemObject,
        blocking: bool,
        origin: Origin,
        region: Region,
        row_pitch: usize,
        slice_pitch: usize,
        dst: &mut [u8],
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        self.check_host_len(image, &region, row_pitch, slice_pitch, dst.len())?;
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        let (queue, image) = (self.raw()?, image.raw()?);
        // SAFETY: `dst` holds the whole region; the caller keeps it alive
        // until the event completes.
        let code = unsafe {
            self.handle.api().enqueue_read_image(
                queue,
                image,
                blocking,
                &origin,
                &region,
                row_pitch,
                slice_pitch,
                dst.as_mut_ptr(),
                &waits,
                &mut event,
            )
        };
        self.complete("read_image", code, event)
    }

    /// Blocking [`read_image`](Self::read_image).
    #[allow(clippy::too_many_arguments)]
    pub fn read_image_blocking(
        &self,
        image: &MemObject,
        origin: Origin,
        region: Region,
        row_pitch: usize,
        slice_pitch: usize,
        dst: &mut [u8],
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        // SAFETY: the call returns only after the read has completed.
        unsafe { self.read_image(image, true, origin, region, row_pitch, slice_pitch, dst, wait_list) }
    }

    /// Write `src` into an image region.
    ///
    /// # Safety
    ///
    /// With `blocking == false`, `src` is read after this returns; it must
    /// stay alive and unmodified until the returned event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn write_image(
        &self,
        image: &MemObject,
        blocking: bool,
        origin: Origin,
        region: Region,
        row_pitch: usize,
        slice_pitch: usize,
        src: &[u8],
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        self.check_host_len(image, &region, row_pitch, slice_pitch, src.len())?;
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        let (queue, image) = (self.raw()?, image.raw()?);
        // SAFETY: `src` holds the whole region; the caller keeps it alive
        // until the event completes.
        let code = unsafe {
            self.handle.api().enqueue_write_image(
                queue,
                image,
                blocking,
                &origin,
                &region,
                row_pitch,
                slice_pitch,
                src.as_ptr(),
                &waits,
                &mut event,
            )
        };
        self.complete("write_image", code, event)
    }

    /// Blocking [`write_image`](Self::write_image).
    #[allow(clippy::too_many_arguments)]
    pub fn write_image_blocking(
        &self,
        image: &MemObject,
        origin: Origin,
        region: Region,
        row_pitch: usize,
        slice_pitch: usize,
        src: &[u8],
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        // SAFETY: the call returns only after the write has completed.
        unsafe { self.write_image(image, true, origin, region, row_pitch, slice_pitch, src, wait_list) }
    }

    /// Copy a region between two images.
    pub fn copy_image(
        &self,
        src: &MemObject,
        dst: &MemObject,
        src_origin: Origin,
        dst_origin: Origin,
        region: Region,
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        let code = self.handle.api().enqueue_copy_image(
            self.raw()?,
            src.raw()?,
            dst.raw()?,
            &src_origin,
            &dst_origin,
            &region,
            &waits,
            &mut event,
        );
        self.complete("copy_image", code, event)
    }

    /// Copy an image region into a buffer at `dst_offset`.
    pub fn copy_image_to_buffer(
        &self,
        src_image: &MemObject,
        dst_buffer: &MemObject,
        src_origin: Origin,
        region: Region,
        dst_offset: usize,
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        let code = self.handle.api().enqueue_copy_image_to_buffer(
            self.raw()?,
            src_image.raw()?,
            dst_buffer.raw()?,
            &src_origin,
            &region,
            dst_offset,
            &waits,
            &mut event,
        );
        self.complete("copy_image_to_buffer", code, event)
    }

    /// Copy buffer bytes starting at `src_offset` into an image region.
    pub fn copy_buffer_to_image(
        &self,
        src_buffer: &MemObject,
        dst_image: &MemObject,
        src_offset: usize,
        dst_origin: Origin,
        region: Region,
        wait_list: &[&Event],
    ) -> EnqueueResult<Event> {
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        let code = self.handle.api().enqueue_copy_buffer_to_image(
            self.raw()?,
            src_buffer.raw()?,
            dst_image.raw()?,
            src_offset,
            &dst_origin,
            &region,
            &waits,
            &mut event,
        );
        self.complete("copy_buffer_to_image", code, event)
    }

    /// Map an image region into host memory.
    ///
    /// The mapped bytes are only valid once the returned event completes
    /// (immediately when `blocking`).
    pub fn map_image(
        &self,
        image: &MemObject,
        blocking: bool,
        flags: MapFlags,
        origin: Origin,
        region: Region,
        wait_list: &[&Event],
    ) -> EnqueueResult<(MappedImage, Event)> {
        let element_size = image.element_size()?;
        host_bytes(&region, element_size, 0, 0)?;
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        let mut code = status::SUCCESS;
        let (mut row_pitch, mut slice_pitch) = (0usize, 0usize);

        let ptr = self.handle.api().enqueue_map_image(
            self.raw()?,
            image.raw()?,
            blocking,
            flags,
            &origin,
            &region,
            &mut row_pitch,
            &mut slice_pitch,
            &waits,
            &mut event,
            &mut code,
        );
        let event = self.complete("map_image", code, event)?;

        let Some(ptr) = NonNull::new(ptr) else {
            return Err(EnqueueError {
                source: ClError::null_handle(),
                event: Some(event),
            });
        };
        let size = match MappedImage::region_size(&region, element_size, row_pitch, slice_pitch) {
            Ok(size) => size,
            Err(source) => {
                return Err(EnqueueError {
                    source,
                    event: Some(event),
                })
            }
        };
        Ok((MappedImage::new(ptr, row_pitch, slice_pitch, size), event))
    }

    /// Unmap a region returned by [`map_image`](Self::map_image) of `image`.
    pub fn unmap(&self, image: &MemObject, mapped: MappedImage, wait_list: &[&Event]) -> EnqueueResult<Event> {
        let waits = raw_wait_list(wait_list)?;
        let mut event = RawHandle::NULL;
        // SAFETY: `MappedImage` is only produced by `map_image` and is consumed
        // here, so the pointer is unmapped at most once; the native side
        // rejects a pointer that was not mapped from `image`.
        let code = unsafe {
            self.handle.api().enqueue_unmap_mem_object(
                self.raw()?,
                image.raw()?,
                mapped.as_ptr(),
                &waits,
                &mut event,
            )
        };
        self.complete("unmap", code, event)
    }

    /// Submit queued commands without waiting.
    pub fn flush(&self) -> Result<()> {
        status::translate(self.handle.api().flush(self.raw()?))
    }

    /// Block until every command on this queue has finished.
    pub fn finish(&self) -> Result<()> {
        status::translate(self.handle.api().finish(self.raw()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_host_bytes() {
        assert_eq!(host_bytes(&[4, 4, 1], 4, 0, 0).unwrap(), 64);
        assert_eq!(host_bytes(&[4, 4, 1], 4, 32, 0).unwrap(), 3 * 32 + 16);
        assert_eq!(host_bytes(&[4, 4, 2], 4, 0, 0).unwrap(), 64 + 64);
        assert_eq!(host_bytes(&[4, 4, 0], 4, 0, 0).unwrap(), 0);
    }

    #[test]
    fn test_host_bytes_overflow() {
        let err = host_bytes(&[usize::MAX / 2, 2, 1], 4, 0, 0).unwrap_err();
        assert_eq!(err.code(), Some(status::INVALID_IMAGE_SIZE));
        assert!(host_bytes(&[4, usize::MAX, 1], 4, 0, 0).is_err());
        assert!(host_bytes(&[4, 4, usize::MAX], 4, 0, 0).is_err());
    }

    #[test]
    fn test_enqueue_error_converts() {
        let err = EnqueueError::from(ClError::invalid_value());
        assert!(err.event.is_none());
        assert!(err.to_string().contains("CL_INVALID_VALUE"));
        assert_eq!(ClError::from(err).kind(), ErrorKind::InvalidValue);
    }
}
