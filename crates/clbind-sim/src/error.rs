//! Errors raised by the simulator's own setup and scripting calls.

use clbind_core::native::RawHandle;
use clbind_core::ClError;
use thiserror::Error;

/// Errors from [`SimApi`](crate::SimApi) helpers that are not part of the
/// native interface.
#[derive(Debug, Error)]
pub enum SimError {
    /// The handle does not name a live object of the expected kind.
    #[error("unknown {kind} handle {handle}")]
    UnknownHandle {
        /// Expected object kind.
        kind: &'static str,
        /// Offending handle.
        handle: RawHandle,
    },

    /// A context needs at least one device.
    #[error("a context needs at least one device")]
    NoDevices,

    /// Only user events can be completed by hand.
    #[error("event {0} is not a user event")]
    NotAUserEvent(RawHandle),

    /// User event status must be complete (0) or a negative error code.
    #[error("invalid user event status {0}")]
    InvalidEventStatus(i32),

    /// The user event already reached a terminal state.
    #[error("user event {0} already completed")]
    EventAlreadyComplete(RawHandle),

    /// Wrapping the simulated objects failed.
    #[error(transparent)]
    Cl(#[from] ClError),
}

/// Result type for simulator helpers.
pub type Result<T> = std::result::Result<T, SimError>;
