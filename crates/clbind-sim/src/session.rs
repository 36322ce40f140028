//! One-call setup of a simulated platform.

use std::sync::Arc;

use clbind_core::config::ClConfig;
use clbind_core::context::{Context, Device};
use clbind_core::native::NativeApi;
use clbind_core::queue::CommandQueue;

use crate::api::SimApi;
use crate::config::SimConfig;
use crate::error::Result;

/// A simulated backend with a context over named devices and one queue.
#[derive(Debug)]
pub struct SimSession {
    /// The backend, for scripting and inspection.
    pub api: Arc<SimApi>,
    /// Devices of the context, in creation order.
    pub devices: Vec<Device>,
    /// Context over all devices.
    pub context: Context,
    /// Command queue on the context.
    pub queue: CommandQueue,
}

impl SimSession {
    /// Session with default timing and configuration read from the
    /// environment.
    pub fn new(device_names: &[&str]) -> Result<Self> {
        Self::with_config(SimConfig::default(), ClConfig::from_env(), device_names)
    }

    /// Session with explicit backend and layer configuration.
    pub fn with_config(sim: SimConfig, config: ClConfig, device_names: &[&str]) -> Result<Self> {
        let api = Arc::new(SimApi::with_config(sim));
        let devices: Vec<Device> = device_names
            .iter()
            .map(|name| Device::new(api.add_device(*name), *name))
            .collect();
        let ids: Vec<_> = devices.iter().map(Device::id).collect();

        let native: Arc<dyn NativeApi> = api.clone();
        let context = Context::from_raw(native, api.create_context(&ids)?, devices.clone())?.with_config(config);
        let queue = CommandQueue::from_raw(&context, api.create_queue(context.raw()?)?)?;

        Ok(Self {
            api,
            devices,
            context,
            queue,
        })
    }

    /// The backend as the layer sees it.
    pub fn native(&self) -> Arc<dyn NativeApi> {
        self.api.clone()
    }

    /// Device by creation index, or `None` past the last device.
    pub fn get_device(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    /// Device by creation index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the number of devices the session was
    /// created with; use [`get_device`](Self::get_device) to check.
    pub fn device(&self, index: usize) -> &Device {
        &self.devices[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_bootstrap() {
        let session = SimSession::new(&["gpu0", "gpu1"]).unwrap();
        assert_eq!(session.context.devices().len(), 2);
        assert_eq!(session.device(1).name(), "gpu1");
        assert_eq!(session.native().backend_name(), "sim");
        // Two devices, the context and the queue.
        assert_eq!(session.api.live_objects(), 4);
    }

    #[test]
    fn test_device_lookup() {
        let session = SimSession::new(&["gpu0"]).unwrap();
        assert_eq!(session.get_device(0).map(Device::name), Some("gpu0"));
        assert!(session.get_device(1).is_none());
    }

    #[test]
    #[should_panic]
    fn test_device_index_out_of_range() {
        let session = SimSession::new(&["gpu0"]).unwrap();
        let _ = session.device(1);
    }

    #[test]
    fn test_session_needs_devices() {
        assert!(SimSession::new(&[]).is_err());
    }

    #[test]
    fn test_dropping_session_releases_context_and_queue() {
        let session = SimSession::new(&["gpu0"]).unwrap();
        let api = Arc::clone(&session.api);
        let queue = session.queue.raw().unwrap();
        drop(session);
        assert_eq!(api.refcount(queue), None);
        assert_eq!(api.release_calls(queue), 1);
        // Only the device remains.
        assert_eq!(api.live_objects(), 1);
    }
}
