//! # clbind
//!
//! Safe lifecycle layer over OpenCL-style compute APIs.
//!
//! clbind wraps the raw handles of a native compute API (contexts, programs,
//! kernels, memory objects, command queues, events) in owning Rust values and
//! turns every native status code into a typed [`ClError`].
//!
//! ## Features
//!
//! - **Exactly-once release** of every native handle, on drop or dispose
//! - **Growing-buffer queries** for strings and lists of unknown length
//! - **Token-keyed build callbacks** instead of host pointers in `user_data`
//! - **Per-device build diagnostics** with the failing device's log
//! - **Image descriptors** validated against their host data before any
//!   native call
//! - **Event wait-lists** for ordering asynchronous commands
//!
//! ## Quick Start
//!
//! ```ignore
//! use clbind::prelude::*;
//! use clbind::sim::SimSession;
//!
//! fn main() -> Result<()> {
//!     let session = SimSession::new(&["gpu0"]).expect("simulated platform");
//!     let program = session
//!         .context
//!         .create_program_with_source(&["kernel void scale(global float* x, float k) {}"])?;
//!     program.build(&[], "-cl-std=CL1.2")?;
//!
//!     let kernel = program.create_kernel("scale")?;
//!     assert_eq!(kernel.num_args()?, 2);
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! - **Sim** - in-process simulated platform (always available)
//! - **OpenCL** - the system OpenCL library (requires the `opencl` feature)
//!
//! ```toml
//! [dependencies]
//! clbind = { version = "0.1", features = ["opencl"] }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Application                      │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ Context / Program / MemObject / Event
//! ┌──────────────────────────┴───────────────────────────┐
//! │                     clbind-core                      │
//! │  ┌────────┐ ┌────────┐ ┌──────────┐ ┌─────────────┐  │
//! │  │ Handle │ │ Query  │ │ Callback │ │ Status → Err│  │
//! │  └────────┘ └────────┘ └──────────┘ └─────────────┘  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ dyn NativeApi
//!              ┌─────────────┴─────────────┐
//!        ┌─────┴──────┐             ┌──────┴──────┐
//!        │ clbind-sim │             │clbind-opencl│
//!        └────────────┘             └─────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// Re-export core types
pub use clbind_core::*;

// Simulated backend (always available)
pub use clbind_sim as sim;
pub use clbind_sim::SimApi;

// System backend; reports `BackendUnavailable` without the `opencl` feature
pub use clbind_opencl as opencl;

#[cfg(feature = "opencl")]
pub use clbind_opencl::OpenClApi;

/// Environment variable naming the backend [`Backend::from_env`] selects.
pub const ENV_BACKEND: &str = "CLBIND_BACKEND";

/// Native backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// The system library when compiled in, otherwise the simulator.
    #[default]
    Auto,
    /// In-process simulated platform.
    Sim,
    /// System OpenCL library.
    OpenCl,
}

impl Backend {
    /// The backend named by `CLBIND_BACKEND`, or [`Backend::Auto`].
    pub fn from_env() -> Self {
        match std::env::var(ENV_BACKEND) {
            Ok(name) => name.parse().unwrap_or_else(|_| {
                tracing::warn!(variable = ENV_BACKEND, value = %name, "Unknown backend, using auto");
                Self::Auto
            }),
            Err(_) => Self::Auto,
        }
    }

    /// Open the native API for this backend.
    pub fn open(self) -> Result<Arc<dyn NativeApi>> {
        match self {
            Self::Auto => open_auto(),
            Self::Sim => Ok(Arc::new(SimApi::new())),
            Self::OpenCl => clbind_opencl::system_api(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Sim => write!(f, "sim"),
            Self::OpenCl => write!(f, "opencl"),
        }
    }
}

impl FromStr for Backend {
    type Err = ClError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sim" | "simulated" => Ok(Self::Sim),
            "opencl" | "cl" => Ok(Self::OpenCl),
            other => Err(ClError::BackendUnavailable(format!("unknown backend {:?}", other))),
        }
    }
}

/// Auto-select the best available backend.
fn open_auto() -> Result<Arc<dyn NativeApi>> {
    #[cfg(feature = "opencl")]
    if let Ok(api) = clbind_opencl::system_api() {
        tracing::info!("Auto-selected OpenCL backend");
        return Ok(api);
    }

    tracing::info!("Auto-selected simulated backend (no system OpenCL)");
    Ok(Arc::new(SimApi::new()))
}

/// Backend availability checks.
pub mod availability {
    /// Whether the system OpenCL backend is compiled in.
    pub fn opencl() -> bool {
        cfg!(feature = "opencl")
    }

    /// Backends that [`Backend::open`](super::Backend::open) can serve.
    pub fn available_backends() -> Vec<super::Backend> {
        let mut backends = vec![super::Backend::Sim];
        if opencl() {
            backends.push(super::Backend::OpenCl);
        }
        backends
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::availability;
    pub use crate::Backend;
    pub use clbind_core::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("sim".parse::<Backend>().unwrap(), Backend::Sim);
        assert_eq!(" OpenCL ".parse::<Backend>().unwrap(), Backend::OpenCl);
        assert_eq!("auto".parse::<Backend>().unwrap(), Backend::Auto);

        let err = "vulkan".parse::<Backend>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn test_backend_display_round_trip() {
        for backend in [Backend::Auto, Backend::Sim, Backend::OpenCl] {
            assert_eq!(backend.to_string().parse::<Backend>().unwrap(), backend);
        }
    }

    #[test]
    fn test_open_sim() {
        let api = Backend::Sim.open().unwrap();
        assert_eq!(api.backend_name(), "sim");
    }

    #[test]
    fn test_auto_backend() {
        let api = Backend::Auto.open().unwrap();
        let expected = if availability::opencl() { "opencl" } else { "sim" };
        assert_eq!(api.backend_name(), expected);
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_opencl_unavailable_without_feature() {
        let err = Backend::OpenCl.open().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert_eq!(availability::available_backends(), vec![Backend::Sim]);
    }
}
