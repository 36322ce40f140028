//! Token-keyed registry routing native callbacks back into closures.
//!
//! A native callback only receives an untyped `user_data` word. Instead of
//! smuggling a host pointer through it, the registry hands out a
//! [`CallbackToken`] (a monotonically increasing integer) and keeps the closure
//! on the host side. Entries are single-shot: [`CallbackRegistry::invoke`]
//! removes the closure under the lock and runs it after the lock is dropped,
//! so a closure may register follow-up callbacks.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::error;

use crate::error::{ClError, Result};
use crate::native::RawHandle;

/// Opaque key of a pending callback. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(NonZeroU64);

impl CallbackToken {
    /// The integer value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Encode for a native `user_data` slot.
    pub fn into_user_data(self) -> usize {
        self.0.get() as usize
    }

    /// Decode from a native `user_data` slot. Zero is not a token.
    pub fn from_user_data(user_data: usize) -> Option<Self> {
        NonZeroU64::new(user_data as u64).map(Self)
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Callback<A> = Box<dyn FnOnce(A) + Send + 'static>;

/// Process-wide mapping from [`CallbackToken`] to pending closure.
pub struct CallbackRegistry<A> {
    next: AtomicU64,
    entries: Mutex<BTreeMap<u64, Callback<A>>>,
}

impl<A> CallbackRegistry<A> {
    /// Empty registry; usable in a `static`.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: parking_lot::const_mutex(BTreeMap::new()),
        }
    }

    /// Register a single-shot closure.
    ///
    /// The entry is visible to [`invoke`](Self::invoke) once this returns, so
    /// call it before issuing the native call that may fire the callback.
    pub fn register<F>(&self, callback: F) -> Result<CallbackToken>
    where
        F: FnOnce(A) + Send + 'static,
    {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let token = NonZeroU64::new(id)
            .map(CallbackToken)
            .ok_or_else(|| ClError::InternalConsistency("callback tokens exhausted".into()))?;

        match self.entries.lock().entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(Box::new(callback));
                Ok(token)
            }
            Entry::Occupied(_) => Err(ClError::InternalConsistency(format!(
                "callback token {} already registered",
                token
            ))),
        }
    }

    /// Deliver `arg` to the closure registered under `token` and remove it.
    ///
    /// An unknown (or already delivered) token is an internal consistency
    /// failure.
    pub fn invoke(&self, token: CallbackToken, arg: A) -> Result<()> {
        let callback = self.entries.lock().remove(&token.get()).ok_or_else(|| {
            ClError::InternalConsistency(format!("callback invoked with unregistered token {}", token))
        })?;
        callback(arg);
        Ok(())
    }

    /// Drop a registration without running it. Returns whether it was pending.
    pub fn unregister(&self, token: CallbackToken) -> bool {
        self.entries.lock().remove(&token.get()).is_some()
    }

    /// Number of registrations awaiting delivery.
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }
}

impl<A> Default for CallbackRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for CallbackRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("next", &self.next.load(Ordering::Relaxed))
            .field("pending", &self.pending())
            .finish()
    }
}

static BUILD_NOTIFICATIONS: CallbackRegistry<RawHandle> = CallbackRegistry::new();

/// Registry for asynchronous program build completion.
pub fn build_notifications() -> &'static CallbackRegistry<RawHandle> {
    &BUILD_NOTIFICATIONS
}

/// Entry point for backends when a native build notification fires.
///
/// Runs on whatever thread the native side chose. A token that does not
/// resolve means the registry and the native side disagree, which cannot be
/// recovered from: the failure is logged and the process aborts.
pub fn dispatch_build_notification(user_data: usize, program: RawHandle) {
    let result = match CallbackToken::from_user_data(user_data) {
        Some(token) => build_notifications().invoke(token, program),
        None => Err(ClError::InternalConsistency(
            "build notification without a token".into(),
        )),
    };

    if let Err(err) = result {
        error!(user_data, program = %program, error = %err, "Build notification dispatch failed");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_invoke_delivers_exactly_once() {
        let registry = CallbackRegistry::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let token = {
            let hits = Arc::clone(&hits);
            let seen = Arc::clone(&seen);
            registry
                .register(move |value| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    *seen.lock() = Some(value);
                })
                .unwrap()
        };

        registry.invoke(token, 42).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), Some(42));

        let err = registry.invoke(token, 43).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_unknown_token_is_internal_consistency() {
        let registry = CallbackRegistry::<()>::new();
        let token = CallbackToken::from_user_data(99).unwrap();
        let err = registry.invoke(token, ()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
    }

    #[test]
    fn test_unregister() {
        let registry = CallbackRegistry::<()>::new();
        let token = registry.register(|_| panic!("must not run")).unwrap();
        assert_eq!(registry.pending(), 1);
        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert!(registry.invoke(token, ()).is_err());
    }

    #[test]
    fn test_tokens_are_unique_and_increasing() {
        let registry = CallbackRegistry::<()>::new();
        let a = registry.register(|_| {}).unwrap();
        let b = registry.register(|_| {}).unwrap();
        assert!(b > a);
        assert_eq!(CallbackToken::from_user_data(a.into_user_data()), Some(a));
        assert_eq!(CallbackToken::from_user_data(0), None);
    }

    #[test]
    fn test_invoke_from_other_threads() {
        let registry = Arc::new(CallbackRegistry::<usize>::new());
        let total = Arc::new(AtomicUsize::new(0));

        let tokens: Vec<_> = (0..32)
            .map(|_| {
                let total = Arc::clone(&total);
                registry
                    .register(move |v| {
                        total.fetch_add(v, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        let handles: Vec<_> = tokens
            .into_iter()
            .map(|token| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.invoke(token, 1).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(total.load(Ordering::SeqCst), 32);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_closure_may_register_follow_up() {
        let registry = Arc::new(CallbackRegistry::<()>::new());
        let inner = Arc::clone(&registry);
        let token = registry
            .register(move |_| {
                inner.register(|_| {}).unwrap();
            })
            .unwrap();
        registry.invoke(token, ()).unwrap();
        assert_eq!(registry.pending(), 1);
    }
}
