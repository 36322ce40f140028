//! Devices and contexts.
//!
//! Both come from outside this crate (platform enumeration and context
//! creation belong to the embedding application or backend). They are adopted
//! here as opaque inputs so that programs, images and queues can be created
//! from them.

use std::fmt;
use std::sync::Arc;

use crate::config::ClConfig;
use crate::error::Result;
use crate::handle::{impl_resource, Handle};
use crate::native::{NativeApi, RawHandle, ResourceKind};

/// A compute device reference. Not owned; devices outlive every object here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    id: RawHandle,
    name: String,
}

impl Device {
    /// Wrap a device handle obtained from enumeration.
    pub fn new(id: RawHandle, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Native device handle.
    pub fn id(&self) -> RawHandle {
        self.id
    }

    /// Human-readable device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// An owned native context plus the devices it spans.
#[derive(Debug)]
pub struct Context {
    pub(crate) handle: Handle,
    devices: Vec<Device>,
    config: Arc<ClConfig>,
}

impl_resource!(Context);

impl Context {
    /// Adopt a context created by the embedding application.
    ///
    /// Ownership of one native reference moves into the returned value.
    pub fn from_raw(api: Arc<dyn NativeApi>, raw: RawHandle, devices: Vec<Device>) -> Result<Self> {
        Ok(Self {
            handle: Handle::adopt(api, ResourceKind::Context, raw)?,
            devices,
            config: Arc::new(ClConfig::from_env()),
        })
    }

    /// Replace the configuration handed to objects created from now on.
    #[must_use]
    pub fn with_config(mut self, config: ClConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Devices this context spans, in enumeration order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Look up a device of this context by native handle.
    pub fn device(&self, id: RawHandle) -> Option<&Device> {
        self.devices.iter().find(|device| device.id() == id)
    }

    /// Active configuration.
    pub fn config(&self) -> &Arc<ClConfig> {
        &self.config
    }

    /// The API this context was created through.
    pub fn api(&self) -> &Arc<dyn NativeApi> {
        self.handle.api()
    }

    /// Native context handle.
    pub fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }
}
