//! Completion tokens for enqueued commands.

use std::sync::Arc;

use crate::error::{ClError, Result};
use crate::handle::{impl_resource, Handle};
use crate::native::{EventInfo, NativeApi, RawHandle, ResourceKind};
use crate::query::query_scalar;
use crate::status::{self, Status};

/// Execution state of the command behind an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    /// Enqueued, not yet submitted.
    Queued,
    /// Submitted to the device.
    Submitted,
    /// Executing.
    Running,
    /// Finished successfully.
    Complete,
    /// Terminated abnormally with this native status.
    Failed(Status),
}

impl CommandStatus {
    /// Decode a native execution status.
    pub const fn from_code(code: i32) -> Self {
        match code {
            3 => Self::Queued,
            2 => Self::Submitted,
            1 => Self::Running,
            0 => Self::Complete,
            failed => Self::Failed(failed),
        }
    }

    /// Native execution status.
    pub const fn code(self) -> i32 {
        match self {
            Self::Queued => 3,
            Self::Submitted => 2,
            Self::Running => 1,
            Self::Complete => 0,
            Self::Failed(code) => code,
        }
    }

    /// Whether the command will not change state again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// A pending or completed command.
///
/// Dropping an event releases the token; the command keeps running.
#[derive(Debug)]
pub struct Event {
    pub(crate) handle: Handle,
}

impl_resource!(Event);

impl Event {
    pub(crate) fn adopt(api: &Arc<dyn NativeApi>, raw: RawHandle) -> Result<Self> {
        Ok(Self {
            handle: Handle::adopt(Arc::clone(api), ResourceKind::Event, raw)?,
        })
    }

    /// Adopt a native event produced by a call this crate did not wrap.
    pub fn from_raw(api: Arc<dyn NativeApi>, raw: RawHandle) -> Result<Self> {
        Self::adopt(&api, raw)
    }

    /// Native event handle.
    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    /// Second owning wrapper, e.g. to hand the token to another thread.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            handle: self.handle.try_clone()?,
        })
    }

    /// Block until the command has finished.
    ///
    /// A command that terminated abnormally surfaces its status as an error.
    pub fn wait(&self) -> Result<()> {
        let raw = self.raw()?;
        status::translate(self.handle.api().wait_for_events(&[raw]))?;
        match self.status()? {
            CommandStatus::Failed(code) => {
                Err(status::to_error(code).unwrap_or(ClError::Unknown { code }))
            }
            _ => Ok(()),
        }
    }

    /// Current execution state. Never blocks.
    pub fn status(&self) -> Result<CommandStatus> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_scalar::<i32, _>(|value, size_ret| {
            api.event_info(raw, EventInfo::CommandExecutionStatus, value, size_ret)
        })
        .map(CommandStatus::from_code)
    }

    /// Whether the command completed successfully.
    pub fn is_complete(&self) -> Result<bool> {
        Ok(self.status()? == CommandStatus::Complete)
    }

    /// Native reference count. Diagnostic only.
    pub fn reference_count(&self) -> Result<u32> {
        let raw = self.raw()?;
        let api = self.handle.api();
        query_scalar(|value, size_ret| api.event_info(raw, EventInfo::ReferenceCount, value, size_ret))
    }
}

/// Native handles of a wait-list. A disposed event is rejected.
pub(crate) fn raw_wait_list(events: &[&Event]) -> Result<Vec<RawHandle>> {
    events.iter().map(|event| event.raw()).collect()
}

/// Block until every event in `events` has finished.
pub fn wait_for_events(events: &[&Event]) -> Result<()> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    let raw = raw_wait_list(events)?;
    status::translate(first.handle.api().wait_for_events(&raw))
}
