//! Timing knobs of the simulated backend.

use std::time::Duration;

use clbind_core::native::RawHandle;

/// Configuration for [`SimApi`](crate::SimApi).
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Base execution time of every command.
    pub command_latency: Duration,
    /// Extra per-command delay, spread over commands so that independent
    /// commands finish out of submission order.
    pub latency_jitter: Duration,
    /// Time a build takes.
    pub build_latency: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            command_latency: Duration::from_micros(200),
            latency_jitter: Duration::from_millis(2),
            build_latency: Duration::from_millis(1),
        }
    }
}

impl SimConfig {
    /// Configuration with no artificial delays.
    pub fn instant() -> Self {
        Self {
            command_latency: Duration::ZERO,
            latency_jitter: Duration::ZERO,
            build_latency: Duration::ZERO,
        }
    }

    /// Set the base command latency.
    pub fn with_command_latency(mut self, latency: Duration) -> Self {
        self.command_latency = latency;
        self
    }

    /// Set the per-command jitter.
    pub fn with_latency_jitter(mut self, jitter: Duration) -> Self {
        self.latency_jitter = jitter;
        self
    }

    /// Set the build latency.
    pub fn with_build_latency(mut self, latency: Duration) -> Self {
        self.build_latency = latency;
        self
    }

    /// Execution time of the command completing `event`.
    pub(crate) fn latency_for(&self, event: RawHandle) -> Duration {
        // Later commands are not uniformly slower; cycle through four steps.
        let step = ((event.as_raw() >> 4) % 4) as u32;
        self.command_latency + self.latency_jitter * (3 - step) / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_varies_between_commands() {
        let config = SimConfig::instant().with_latency_jitter(Duration::from_millis(3));
        let a = config.latency_for(RawHandle::from_raw(0x1000));
        let b = config.latency_for(RawHandle::from_raw(0x1010));
        assert_eq!(a, Duration::from_millis(3));
        assert_eq!(b, Duration::from_millis(2));
        assert_eq!(SimConfig::instant().latency_for(RawHandle::from_raw(0x1000)), Duration::ZERO);
    }
}
