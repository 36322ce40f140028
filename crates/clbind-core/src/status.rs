//! Native status codes and their translation into [`ClError`].
//!
//! Every native call that reports a status funnels it through [`translate`]
//! before any success path runs. The mapping is pure and total: `SUCCESS` is
//! `Ok(())`, every other code lands in exactly one [`ErrorKind`], and codes this
//! layer does not recognize become [`ClError::Unknown`] carrying the raw value.
//!
//! [`ErrorKind`]: crate::error::ErrorKind

#![allow(missing_docs)]

use crate::error::{ClError, Result};
use crate::native::ResourceKind;

/// Raw status code returned by the native API.
pub type Status = i32;

pub const SUCCESS: Status = 0;
pub const DEVICE_NOT_FOUND: Status = -1;
pub const DEVICE_NOT_AVAILABLE: Status = -2;
pub const COMPILER_NOT_AVAILABLE: Status = -3;
pub const MEM_OBJECT_ALLOCATION_FAILURE: Status = -4;
pub const OUT_OF_RESOURCES: Status = -5;
pub const OUT_OF_HOST_MEMORY: Status = -6;
pub const IMAGE_FORMAT_MISMATCH: Status = -9;
pub const IMAGE_FORMAT_NOT_SUPPORTED: Status = -10;
pub const BUILD_PROGRAM_FAILURE: Status = -11;
pub const MAP_FAILURE: Status = -12;
pub const MISALIGNED_SUB_BUFFER_OFFSET: Status = -13;
pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: Status = -14;
pub const COMPILE_PROGRAM_FAILURE: Status = -15;
pub const LINKER_NOT_AVAILABLE: Status = -16;
pub const LINK_PROGRAM_FAILURE: Status = -17;
pub const INVALID_VALUE: Status = -30;
pub const INVALID_DEVICE: Status = -33;
pub const INVALID_CONTEXT: Status = -34;
pub const INVALID_COMMAND_QUEUE: Status = -36;
pub const INVALID_HOST_PTR: Status = -37;
pub const INVALID_MEM_OBJECT: Status = -38;
pub const INVALID_IMAGE_FORMAT_DESCRIPTOR: Status = -39;
pub const INVALID_IMAGE_SIZE: Status = -40;
pub const INVALID_BINARY: Status = -42;
pub const INVALID_BUILD_OPTIONS: Status = -43;
pub const INVALID_PROGRAM: Status = -44;
pub const INVALID_PROGRAM_EXECUTABLE: Status = -45;
pub const INVALID_KERNEL_NAME: Status = -46;
pub const INVALID_KERNEL: Status = -48;
pub const INVALID_EVENT_WAIT_LIST: Status = -57;
pub const INVALID_EVENT: Status = -58;
pub const INVALID_OPERATION: Status = -59;
pub const INVALID_BUFFER_SIZE: Status = -61;
pub const INVALID_IMAGE_DESCRIPTOR: Status = -65;

/// Translate a native status into `Ok(())` or the matching error.
pub fn translate(code: Status) -> Result<()> {
    match to_error(code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Same mapping as [`translate`], returning the error value directly.
pub fn to_error(code: Status) -> Option<ClError> {
    let err = match code {
        SUCCESS => return None,

        INVALID_VALUE
        | INVALID_BUILD_OPTIONS
        | INVALID_HOST_PTR
        | INVALID_IMAGE_FORMAT_DESCRIPTOR
        | INVALID_IMAGE_SIZE
        | INVALID_IMAGE_DESCRIPTOR
        | INVALID_BUFFER_SIZE
        | INVALID_EVENT_WAIT_LIST
        | INVALID_OPERATION
        | INVALID_KERNEL_NAME
        | IMAGE_FORMAT_MISMATCH
        | IMAGE_FORMAT_NOT_SUPPORTED
        | MISALIGNED_SUB_BUFFER_OFFSET => ClError::InvalidValue { code },

        DEVICE_NOT_FOUND | DEVICE_NOT_AVAILABLE | INVALID_DEVICE => ClError::InvalidResource {
            resource: ResourceKind::Device,
            code,
        },
        INVALID_CONTEXT => ClError::InvalidResource {
            resource: ResourceKind::Context,
            code,
        },
        INVALID_COMMAND_QUEUE => ClError::InvalidResource {
            resource: ResourceKind::CommandQueue,
            code,
        },
        INVALID_MEM_OBJECT => ClError::InvalidResource {
            resource: ResourceKind::MemObject,
            code,
        },
        INVALID_BINARY | INVALID_PROGRAM | INVALID_PROGRAM_EXECUTABLE => {
            ClError::InvalidResource {
                resource: ResourceKind::Program,
                code,
            }
        }
        INVALID_KERNEL => ClError::InvalidResource {
            resource: ResourceKind::Kernel,
            code,
        },
        INVALID_EVENT | EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => ClError::InvalidResource {
            resource: ResourceKind::Event,
            code,
        },

        MEM_OBJECT_ALLOCATION_FAILURE | OUT_OF_RESOURCES | OUT_OF_HOST_MEMORY | MAP_FAILURE => {
            ClError::OutOfResources { code }
        }

        COMPILER_NOT_AVAILABLE
        | BUILD_PROGRAM_FAILURE
        | COMPILE_PROGRAM_FAILURE
        | LINKER_NOT_AVAILABLE
        | LINK_PROGRAM_FAILURE => ClError::Compiler { code },

        _ => ClError::Unknown { code },
    };
    Some(err)
}

/// Symbolic name of a status code, if this layer knows it.
pub fn status_name(code: Status) -> Option<&'static str> {
    let name = match code {
        SUCCESS => "CL_SUCCESS",
        DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
        MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        IMAGE_FORMAT_MISMATCH => "CL_IMAGE_FORMAT_MISMATCH",
        IMAGE_FORMAT_NOT_SUPPORTED => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
        BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        MAP_FAILURE => "CL_MAP_FAILURE",
        MISALIGNED_SUB_BUFFER_OFFSET => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
        COMPILE_PROGRAM_FAILURE => "CL_COMPILE_PROGRAM_FAILURE",
        LINKER_NOT_AVAILABLE => "CL_LINKER_NOT_AVAILABLE",
        LINK_PROGRAM_FAILURE => "CL_LINK_PROGRAM_FAILURE",
        INVALID_VALUE => "CL_INVALID_VALUE",
        INVALID_DEVICE => "CL_INVALID_DEVICE",
        INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        INVALID_HOST_PTR => "CL_INVALID_HOST_PTR",
        INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        INVALID_IMAGE_FORMAT_DESCRIPTOR => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
        INVALID_IMAGE_SIZE => "CL_INVALID_IMAGE_SIZE",
        INVALID_BINARY => "CL_INVALID_BINARY",
        INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
        INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        INVALID_KERNEL => "CL_INVALID_KERNEL",
        INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        INVALID_EVENT => "CL_INVALID_EVENT",
        INVALID_OPERATION => "CL_INVALID_OPERATION",
        INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        INVALID_IMAGE_DESCRIPTOR => "CL_INVALID_IMAGE_DESCRIPTOR",
        _ => return None,
    };
    Some(name)
}

/// Human-readable rendering used in error messages: `CL_INVALID_VALUE (-30)`.
pub(crate) fn describe(code: &Status) -> String {
    match status_name(*code) {
        Some(name) => format!("{} ({})", name, code),
        None => format!("status {}", code),
    }
}
