//! Owning wrapper around one native handle.
//!
//! A [`Handle`] is created from a successful native allocation and issues the
//! matching native release exactly once: on [`Handle::dispose`] or on `Drop`,
//! whichever comes first. Extra shares taken with [`Handle::retain`] are
//! tracked so that [`Handle::release`] gives back a share before it ever
//! touches the owning reference.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ClError, Result};
use crate::native::{NativeApi, RawHandle, ResourceKind};
use crate::status;

/// One owned native handle plus the API that issued it.
pub struct Handle {
    api: Arc<dyn NativeApi>,
    kind: ResourceKind,
    raw: Option<RawHandle>,
    shares: AtomicU32,
}

impl Handle {
    /// Take ownership of a freshly allocated native handle.
    ///
    /// A null handle is rejected as [`ClError::null_handle`].
    pub fn adopt(api: Arc<dyn NativeApi>, kind: ResourceKind, raw: RawHandle) -> Result<Self> {
        if raw.is_null() {
            return Err(ClError::null_handle());
        }
        debug!(kind = %kind, handle = %raw, backend = api.backend_name(), "Adopted native handle");
        Ok(Self {
            api,
            kind,
            raw: Some(raw),
            shares: AtomicU32::new(0),
        })
    }

    /// Increment the native reference count and record one outstanding share.
    pub fn retain(&self) -> Result<()> {
        let raw = self.raw()?;
        status::translate(self.api.retain(self.kind, raw))?;
        self.shares.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Give back one share taken with [`retain`](Self::retain).
    ///
    /// With no share outstanding this is the final release and behaves like
    /// [`dispose`](Self::dispose). On a disposed handle it does nothing.
    pub fn release(&mut self) -> Result<()> {
        let Some(raw) = self.raw else {
            return Ok(());
        };

        if *self.shares.get_mut() == 0 {
            self.dispose();
            return Ok(());
        }

        // The share stays recorded until the native side has let it go.
        status::translate(self.api.release(self.kind, raw))?;
        *self.shares.get_mut() -= 1;
        Ok(())
    }

    /// Issue the final native release and clear the handle.
    ///
    /// Idempotent; failures are logged, never returned.
    pub fn dispose(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };

        let outstanding = self.shares.swap(0, Ordering::AcqRel);
        if outstanding > 0 {
            warn!(kind = %self.kind, handle = %raw, outstanding, "Disposing handle with retained shares");
        }

        let code = self.api.release(self.kind, raw);
        if code == status::SUCCESS {
            debug!(kind = %self.kind, handle = %raw, "Released native handle");
        } else {
            warn!(
                kind = %self.kind,
                handle = %raw,
                code,
                status = status::status_name(code).unwrap_or("unknown"),
                "Native release failed"
            );
        }
    }

    /// Whether the handle has not been disposed.
    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    /// The native handle, or `InvalidResource` once disposed.
    pub fn raw(&self) -> Result<RawHandle> {
        self.raw.ok_or_else(|| ClError::invalid_resource(self.kind))
    }

    /// The native handle if still valid.
    pub fn as_raw(&self) -> Option<RawHandle> {
        self.raw
    }

    /// What this handle refers to.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The issuing API.
    pub fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    /// Shares taken with [`retain`](Self::retain) and not yet released.
    pub fn outstanding_shares(&self) -> u32 {
        self.shares.load(Ordering::Acquire)
    }

    /// A second owning wrapper for the same native object.
    pub fn try_clone(&self) -> Result<Self> {
        let raw = self.raw()?;
        status::translate(self.api.retain(self.kind, raw))?;
        Ok(Self {
            api: Arc::clone(&self.api),
            kind: self.kind,
            raw: Some(raw),
            shares: AtomicU32::new(0),
        })
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .field("shares", &self.outstanding_shares())
            .finish()
    }
}

/// Lifecycle operations shared by every wrapper type.
pub trait Resource {
    /// The owned handle.
    fn handle(&self) -> &Handle;

    /// The owned handle, mutably.
    fn handle_mut(&mut self) -> &mut Handle;

    /// See [`Handle::retain`].
    fn retain(&self) -> Result<()> {
        self.handle().retain()
    }

    /// See [`Handle::release`].
    fn release(&mut self) -> Result<()> {
        self.handle_mut().release()
    }

    /// See [`Handle::dispose`].
    fn dispose(&mut self) {
        self.handle_mut().dispose()
    }

    /// See [`Handle::is_valid`].
    fn is_valid(&self) -> bool {
        self.handle().is_valid()
    }
}

macro_rules! impl_resource {
    ($ty:ty) => {
        impl $crate::handle::Resource for $ty {
            fn handle(&self) -> &$crate::handle::Handle {
                &self.handle
            }

            fn handle_mut(&mut self) -> &mut $crate::handle::Handle {
                &mut self.handle
            }
        }
    };
}
pub(crate) use impl_resource;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::RecordingApi;

    fn adopt(api: &Arc<RecordingApi>) -> Handle {
        Handle::adopt(api.clone(), ResourceKind::MemObject, RawHandle::from_raw(0x40)).unwrap()
    }

    #[test]
    fn test_null_handle_rejected() {
        let api = Arc::new(RecordingApi::default());
        let err = Handle::adopt(api, ResourceKind::Program, RawHandle::NULL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let api = Arc::new(RecordingApi::default());
        let mut handle = adopt(&api);

        handle.dispose();
        assert!(!handle.is_valid());
        handle.dispose();
        assert!(!handle.is_valid());
        drop(handle);

        assert_eq!(api.releases(), 1);
    }

    #[test]
    fn test_drop_releases_once() {
        let api = Arc::new(RecordingApi::default());
        drop(adopt(&api));
        assert_eq!(api.releases(), 1);
    }

    #[test]
    fn test_retain_release_pairs() {
        let api = Arc::new(RecordingApi::default());
        let mut handle = adopt(&api);

        handle.retain().unwrap();
        handle.retain().unwrap();
        assert_eq!(handle.outstanding_shares(), 2);

        handle.release().unwrap();
        handle.release().unwrap();
        assert!(handle.is_valid());
        assert_eq!(api.retains(), 2);
        assert_eq!(api.releases(), 2);

        // No share left: final release.
        handle.release().unwrap();
        assert!(!handle.is_valid());
        assert_eq!(api.releases(), 3);

        handle.release().unwrap();
        assert_eq!(api.releases(), 3);
    }

    #[test]
    fn test_disposed_handle_refuses_use() {
        let api = Arc::new(RecordingApi::default());
        let mut handle = adopt(&api);
        handle.dispose();

        let err = handle.raw().unwrap_err();
        assert_eq!(err.code(), Some(status::INVALID_MEM_OBJECT));
        assert!(handle.retain().is_err());
        assert!(handle.try_clone().is_err());
        assert_eq!(api.retains(), 0);
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let api = Arc::new(RecordingApi::failing_release());
        let mut handle = adopt(&api);
        handle.dispose();
        assert!(!handle.is_valid());
        assert_eq!(api.releases(), 1);
    }

    #[test]
    fn test_failed_share_release_keeps_share() {
        let api = Arc::new(RecordingApi::failing_release());
        let mut handle = adopt(&api);
        handle.retain().unwrap();

        let err = handle.release().unwrap_err();
        assert_eq!(err.code(), Some(status::INVALID_MEM_OBJECT));
        assert_eq!(handle.outstanding_shares(), 1);
        assert!(handle.is_valid());
        assert_eq!(api.releases(), 1);
    }

    #[test]
    fn test_try_clone_owns_its_own_reference() {
        let api = Arc::new(RecordingApi::default());
        let handle = adopt(&api);
        let clone = handle.try_clone().unwrap();
        assert_eq!(clone.as_raw(), handle.as_raw());
        drop(handle);
        drop(clone);
        assert_eq!(api.retains(), 1);
        assert_eq!(api.releases(), 2);
    }
}
