//! # clbind sim
//!
//! In-process simulated implementation of the [`NativeApi`](clbind_core::NativeApi)
//! boundary, used to exercise the lifecycle layer without a compute driver.
//!
//! The simulator keeps real reference counts, rejects bad handles and
//! arguments with native status codes, runs each enqueued command on its own
//! thread in wait-list order, and compiles programs with a toy compiler that
//! fails on `#error` directives or on scripted per-device failures.
//!
//! ## Example
//!
//! ```ignore
//! use clbind_sim::SimSession;
//!
//! let session = SimSession::new(&["gpu0", "gpu1"])?;
//! session.api.fail_builds_on(session.device(0).id(), "syntax error at line 4");
//! let program = session.context.create_program_with_source(&[source])?;
//! assert!(program.build(&[], "").is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

mod api;
mod compiler;
pub mod config;
pub mod error;
mod exec;
mod formats;
pub mod session;
mod state;

pub use api::SimApi;
pub use compiler::BINARY_MAGIC;
pub use config::SimConfig;
pub use error::{Result, SimError};
pub use session::SimSession;
