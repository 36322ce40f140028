//! Command execution.
//!
//! Each enqueued command runs on its own thread. It waits until every event
//! of its wait-list is terminal, sleeps for its latency and then applies its
//! effect to the object table. Commands without a wait-list relation may
//! finish in any order.

use std::sync::Arc;
use std::thread;

use clbind_core::native::{RawHandle, ResourceKind};
use clbind_core::status::{self, Status};
use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use crate::api::Shared;
use crate::state::{exec_code, Body, EventBody, SimResult, State};

/// Effect of a command, applied under the state lock once it may run.
pub(crate) type Work = Box<dyn FnOnce(&mut State) -> Status + Send>;

/// Host destination of a read.
pub(crate) struct HostDst(*mut u8);

// SAFETY: the enqueue contract keeps the pointee alive and untouched until
// the command's event completes.
unsafe impl Send for HostDst {}

impl HostDst {
    pub fn new(ptr: *mut u8) -> Self {
        Self(ptr)
    }

    pub fn get(&self) -> *mut u8 {
        self.0
    }
}

/// Host source of a write.
pub(crate) struct HostSrc(*const u8);

// SAFETY: as for `HostDst`.
unsafe impl Send for HostSrc {}

impl HostSrc {
    pub fn new(ptr: *const u8) -> Self {
        Self(ptr)
    }

    pub fn get(&self) -> *const u8 {
        self.0
    }
}

enum WaitState {
    Ready,
    Pending,
    Failed,
}

fn wait_state(state: &State, events: &[RawHandle]) -> WaitState {
    let mut pending = false;
    for &event in events {
        match state.event(event) {
            Ok(body) if body.status < exec_code::COMPLETE => return WaitState::Failed,
            Ok(body) if body.status > exec_code::COMPLETE => pending = true,
            Ok(_) => {}
            Err(_) => return WaitState::Failed,
        }
    }
    if pending {
        WaitState::Pending
    } else {
        WaitState::Ready
    }
}

fn set_status(state: &mut State, event: RawHandle, code: i32) {
    if let Ok(body) = state.event_mut(event) {
        body.status = code;
    }
}

/// Objects a running command keeps alive.
struct CommandRefs {
    event: RawHandle,
    queue: RawHandle,
    waits: Vec<RawHandle>,
    mems: Vec<RawHandle>,
}

impl CommandRefs {
    fn release(&self, state: &mut State) {
        for &event in &self.waits {
            state.release(event, ResourceKind::Event);
        }
        for &mem in &self.mems {
            state.release(mem, ResourceKind::MemObject);
        }
        state.release(self.queue, ResourceKind::CommandQueue);
        state.release(self.event, ResourceKind::Event);
    }
}

impl Shared {
    /// Reject wait-lists naming unknown events or events of another context.
    pub(crate) fn check_wait_list(state: &State, context: RawHandle, waits: &[RawHandle]) -> SimResult<()> {
        for &event in waits {
            let body = state.event(event).map_err(|_| status::INVALID_EVENT_WAIT_LIST)?;
            if body.context != context {
                return Err(status::INVALID_CONTEXT);
            }
        }
        Ok(())
    }

    /// Queue a command and return its event.
    ///
    /// The command holds references to its queue, its wait-list events and
    /// `mems` until it has finished.
    pub(crate) fn submit(
        self: &Arc<Self>,
        state: &mut State,
        queue: RawHandle,
        waits: &[RawHandle],
        mems: &[RawHandle],
        work: Work,
    ) -> SimResult<RawHandle> {
        let context = state.queue(queue)?.context;
        Self::check_wait_list(state, context, waits)?;

        let event = state.insert(Body::Event(EventBody {
            queue,
            context,
            status: exec_code::QUEUED,
            user: false,
        }));
        state.retain(event, ResourceKind::Event);
        state.retain(queue, ResourceKind::CommandQueue);
        for &wait in waits {
            state.retain(wait, ResourceKind::Event);
        }
        for &mem in mems {
            state.retain(mem, ResourceKind::MemObject);
        }
        state.queue_mut(queue)?.in_flight += 1;

        let refs = CommandRefs {
            event,
            queue,
            waits: waits.to_vec(),
            mems: mems.to_vec(),
        };
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("sim-command-{}", event))
            .spawn(move || shared.run(refs, work));

        if let Err(err) = spawned {
            warn!(%event, error = %err, "Failed to start command thread");
            if let Ok(body) = state.queue_mut(queue) {
                body.in_flight -= 1;
            }
            for &wait in waits {
                state.release(wait, ResourceKind::Event);
            }
            for &mem in mems {
                state.release(mem, ResourceKind::MemObject);
            }
            state.release(queue, ResourceKind::CommandQueue);
            // Both the command's reference and the caller's.
            state.release(event, ResourceKind::Event);
            state.release(event, ResourceKind::Event);
            return Err(status::OUT_OF_RESOURCES);
        }

        trace!(%event, %queue, waits = waits.len(), "Submitted command");
        Ok(event)
    }

    fn run(self: Arc<Self>, refs: CommandRefs, work: Work) {
        let latency = self.config.latency_for(refs.event);
        let mut state = self.state.lock();
        set_status(&mut state, refs.event, exec_code::SUBMITTED);

        let blocked = loop {
            match wait_state(&state, &refs.waits) {
                WaitState::Ready => break false,
                WaitState::Failed => break true,
                WaitState::Pending => self.changed.wait(&mut state),
            }
        };

        let outcome = if blocked {
            status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
        } else {
            set_status(&mut state, refs.event, exec_code::RUNNING);
            self.changed.notify_all();
            if !latency.is_zero() {
                MutexGuard::unlocked(&mut state, || thread::sleep(latency));
            }
            work(&mut *state)
        };

        set_status(&mut state, refs.event, outcome);
        state.completions.push(refs.event);
        if let Ok(queue) = state.queue_mut(refs.queue) {
            queue.in_flight -= 1;
        }
        refs.release(&mut state);
        debug!(event = %refs.event, outcome, "Command finished");
        drop(state);
        self.changed.notify_all();
    }

    /// Block until `event` is terminal and return its outcome as a status.
    pub(crate) fn await_event(&self, state: &mut MutexGuard<'_, State>, event: RawHandle) -> Status {
        loop {
            let code = match state.event(event) {
                Ok(body) => body.status,
                Err(code) => return code,
            };
            if code <= exec_code::COMPLETE {
                return code;
            }
            self.changed.wait(state);
        }
    }

    /// Block until every event in `events` is terminal.
    pub(crate) fn await_events(&self, state: &mut MutexGuard<'_, State>, events: &[RawHandle]) -> Status {
        loop {
            match wait_state(state, events) {
                WaitState::Ready => return status::SUCCESS,
                WaitState::Failed => return status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                WaitState::Pending => self.changed.wait(state),
            }
        }
    }

    /// Block until `queue` has no command in flight.
    pub(crate) fn drain_queue(&self, state: &mut MutexGuard<'_, State>, queue: RawHandle) -> Status {
        loop {
            match state.queue(queue).map(|body| body.in_flight) {
                Ok(0) => return status::SUCCESS,
                Ok(_) => self.changed.wait(state),
                Err(code) => return code,
            }
        }
    }
}
