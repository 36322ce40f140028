//! Error types for clbind.

use std::fmt;

use crate::context::Device;
use crate::native::ResourceKind;
use crate::status::{self, Status};

/// Result type alias using [`ClError`].
pub type Result<T> = std::result::Result<T, ClError>;

/// Closed classification of every [`ClError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An argument or descriptor was rejected.
    InvalidValue,
    /// A handle (memory object, program, kernel, event, ...) was rejected.
    InvalidResource,
    /// The native side ran out of device or host resources.
    OutOfResources,
    /// Compilation or linking failed.
    BuildFailure,
    /// A status code this layer does not recognize.
    Unknown,
    /// This layer's own bookkeeping was violated. Never recovered.
    InternalConsistency,
    /// The native backend is not compiled in or not installed.
    BackendUnavailable,
}

/// A failed program build, carrying the offending device and its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    /// Device whose log is reported. `None` when no device produced a log.
    pub device: Option<Device>,
    /// Compiler log text, or a synthesized message when none exists.
    pub message: String,
}

impl BuildError {
    /// Message used when every device reports an empty build log.
    pub const NO_LOG: &'static str = "build failed and produced no log entries";

    /// Build failure attributed to a device.
    pub fn on_device(device: Device, message: impl Into<String>) -> Self {
        Self {
            device: Some(device),
            message: message.into(),
        }
    }

    /// Build failure with no device log at all.
    pub fn without_log() -> Self {
        Self {
            device: None,
            message: Self::NO_LOG.to_string(),
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "build error on {:?}: {}", device.name(), self.message),
            None => write!(f, "build error: {}", self.message),
        }
    }
}

impl std::error::Error for BuildError {}

/// Errors surfaced by every fallible operation in clbind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClError {
    /// Invalid argument, descriptor, size or option string.
    #[error("invalid value: {}", status::describe(.code))]
    InvalidValue {
        /// Native status code.
        code: Status,
    },

    /// Invalid or disposed handle.
    #[error("invalid {resource}: {}", status::describe(.code))]
    InvalidResource {
        /// Which kind of handle was rejected.
        resource: ResourceKind,
        /// Native status code.
        code: Status,
    },

    /// Device or host resources exhausted.
    #[error("out of resources: {}", status::describe(.code))]
    OutOfResources {
        /// Native status code.
        code: Status,
    },

    /// Compiler or linker reported failure without a per-device diagnosis.
    #[error("compiler failure: {}", status::describe(.code))]
    Compiler {
        /// Native status code.
        code: Status,
    },

    /// Program build failed; carries the device and its log.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Unmapped native status code.
    #[error("unknown native status {code}")]
    Unknown {
        /// Raw code, kept for diagnostics.
        code: Status,
    },

    /// Internal bookkeeping violated (e.g. callback for an unregistered token).
    #[error("internal consistency failure: {0}")]
    InternalConsistency(String),

    /// Native backend not available.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl ClError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidValue { .. } => ErrorKind::InvalidValue,
            Self::InvalidResource { .. } => ErrorKind::InvalidResource,
            Self::OutOfResources { .. } => ErrorKind::OutOfResources,
            Self::Compiler { .. } | Self::Build(_) => ErrorKind::BuildFailure,
            Self::Unknown { .. } => ErrorKind::Unknown,
            Self::InternalConsistency(_) => ErrorKind::InternalConsistency,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
        }
    }

    /// Native status code behind this error, when there is one.
    pub fn code(&self) -> Option<Status> {
        match self {
            Self::InvalidValue { code }
            | Self::InvalidResource { code, .. }
            | Self::OutOfResources { code }
            | Self::Compiler { code }
            | Self::Unknown { code } => Some(*code),
            Self::Build(_) => Some(status::BUILD_PROGRAM_FAILURE),
            Self::InternalConsistency(_) | Self::BackendUnavailable(_) => None,
        }
    }

    /// Rejected argument detected on the host side, before any native call.
    pub fn invalid_value() -> Self {
        Self::InvalidValue {
            code: status::INVALID_VALUE,
        }
    }

    /// Operation attempted through a disposed or missing handle.
    pub fn invalid_resource(resource: ResourceKind) -> Self {
        Self::InvalidResource {
            resource,
            code: resource.invalid_status(),
        }
    }

    /// Native call reported success but handed back a null handle.
    pub fn null_handle() -> Self {
        Self::Unknown {
            code: status::SUCCESS,
        }
    }

    /// Returns true for build failures carrying a device log.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// The build diagnosis, if this is a build failure.
    pub fn as_build_error(&self) -> Option<&BuildError> {
        match self {
            Self::Build(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::RawHandle;

    #[test]
    fn test_build_error_display() {
        let device = Device::new(RawHandle::from_raw(7), "Sim GPU 0");
        let err = ClError::from(BuildError::on_device(device, "syntax error at line 4"));
        assert_eq!(
            err.to_string(),
            "build error on \"Sim GPU 0\": syntax error at line 4"
        );
        assert_eq!(err.kind(), ErrorKind::BuildFailure);

        let err = ClError::from(BuildError::without_log());
        assert_eq!(
            err.to_string(),
            "build error: build failed and produced no log entries"
        );
    }

    #[test]
    fn test_invalid_resource_uses_matching_code() {
        let err = ClError::invalid_resource(ResourceKind::MemObject);
        assert_eq!(err.code(), Some(status::INVALID_MEM_OBJECT));
        assert_eq!(err.kind(), ErrorKind::InvalidResource);
    }

    #[test]
    fn test_null_handle_is_unknown() {
        assert_eq!(ClError::null_handle().kind(), ErrorKind::Unknown);
    }
}
