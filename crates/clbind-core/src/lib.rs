//! # clbind core
//!
//! Resource, command and callback lifecycle layer over a native,
//! handle-based compute API shaped like OpenCL.
//!
//! The native side is reached only through the [`NativeApi`] trait, which
//! returns integer status codes and opaque handles. On top of it this crate
//! provides:
//!
//! - [`status`]: total translation of status codes into [`ClError`]
//! - [`Handle`]: owning wrapper releasing each native handle exactly once
//! - [`query`]: growing-buffer protocol for variable-length info queries
//! - [`CallbackRegistry`]: token-keyed routing of native callbacks
//! - [`Program`]: build state machine with per-device log diagnosis
//! - [`ImageDescriptor`] and [`Context::create_image`]: validated image creation
//! - [`CommandQueue`]: transfer, copy and map commands linked by [`Event`]s
//!
//! ## Example
//!
//! ```ignore
//! use clbind_core::prelude::*;
//!
//! let program = context.create_program_with_source(&[source])?;
//! match program.build(&[], "-Werror") {
//!     Err(ClError::Build(err)) => eprintln!("{}", err),
//!     other => other?,
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod handle;
pub mod image;
pub mod memory;
pub mod native;
pub mod program;
pub mod query;
pub mod queue;
pub mod status;

#[cfg(test)]
mod testing;

pub use callback::{CallbackRegistry, CallbackToken};
pub use config::{ClConfig, ClConfigBuilder};
pub use context::{Context, Device};
pub use error::{BuildError, ClError, ErrorKind, Result};
pub use event::{CommandStatus, Event};
pub use handle::{Handle, Resource};
pub use image::{ChannelDataType, ChannelOrder, ImageDescriptor, ImageFormat, ImageKind};
pub use memory::{MapFlags, MappedImage, MemFlags, MemObject};
pub use native::{NativeApi, RawHandle, ResourceKind};
pub use program::{BuildStatus, Kernel, PendingBuild, Program};
pub use queue::{CommandQueue, EnqueueError, EnqueueResult, Origin, Region};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::callback::{build_notifications, CallbackRegistry, CallbackToken};
    pub use crate::config::{BuildConfig, ClConfig, ClConfigBuilder, QueryConfig};
    pub use crate::context::{Context, Device};
    pub use crate::error::{BuildError, ClError, ErrorKind, Result};
    pub use crate::event::{wait_for_events, CommandStatus, Event};
    pub use crate::handle::{Handle, Resource};
    pub use crate::image::{
        ChannelDataType, ChannelOrder, ImageDescriptor, ImageFormat, ImageKind, MAX_IMAGE_FORMATS,
    };
    pub use crate::memory::{MapFlags, MappedImage, MemFlags, MemObject};
    pub use crate::native::{MemObjectType, NativeApi, RawHandle, ResourceKind};
    pub use crate::program::{unload_compiler, BuildStatus, Kernel, PendingBuild, Program};
    pub use crate::queue::{CommandQueue, EnqueueError, EnqueueResult, Origin, Region};
    pub use crate::status::{status_name, translate, Status};
}
