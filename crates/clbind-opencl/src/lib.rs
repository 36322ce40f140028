//! # clbind OpenCL
//!
//! [`NativeApi`] backed by the system OpenCL library.
//!
//! The library is only linked with the `opencl` feature. Without it,
//! [`system_api`] reports the backend as unavailable so that callers can fall
//! back to the simulator.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

use std::sync::Arc;

use clbind_core::{NativeApi, Result};

#[cfg(feature = "opencl")]
mod ffi;
#[cfg(feature = "opencl")]
mod system;

#[cfg(feature = "opencl")]
pub use system::OpenClApi;

/// The system OpenCL backend.
#[cfg(feature = "opencl")]
pub fn system_api() -> Result<Arc<dyn NativeApi>> {
    tracing::info!("Using system OpenCL backend");
    Ok(Arc::new(OpenClApi::new()))
}

/// The system OpenCL backend. This build does not link OpenCL.
#[cfg(not(feature = "opencl"))]
pub fn system_api() -> Result<Arc<dyn NativeApi>> {
    Err(clbind_core::ClError::BackendUnavailable(
        "built without the `opencl` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_unavailable_without_feature() {
        let err = super::system_api().err().unwrap();
        assert_eq!(err.kind(), clbind_core::ErrorKind::BackendUnavailable);
        assert!(err.to_string().contains("opencl"));
    }
}
