//! Runtime configuration for queries and builds.

use std::env;

use tracing::warn;

/// Environment variable overriding [`QueryConfig::max_size`].
pub const ENV_QUERY_MAX_BYTES: &str = "CLBIND_QUERY_MAX_BYTES";
/// Environment variable overriding [`QueryConfig::max_attempts`].
pub const ENV_QUERY_ATTEMPTS: &str = "CLBIND_QUERY_ATTEMPTS";
/// Environment variable overriding [`BuildConfig::baseline_flag`].
pub const ENV_BUILD_STD: &str = "CLBIND_BUILD_STD";

/// Limits of the grow-and-retry query protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// First buffer size offered to the native call.
    pub initial_size: usize,
    /// Largest buffer the protocol will allocate.
    pub max_size: usize,
    /// Maximum number of native calls per query.
    pub max_attempts: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            initial_size: 1024,
            max_size: 1024 * 1024,
            max_attempts: 3,
        }
    }
}

/// Program build settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Language-standard flag always prepended to build options.
    pub baseline_flag: String,
    /// Largest build log fetched per device.
    pub log_limit: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            baseline_flag: "-cl-std=CL1.1".to_string(),
            log_limit: 1024 * 1024,
        }
    }
}

/// Configuration shared by a context and every object created from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClConfig {
    /// Query protocol limits.
    pub query: QueryConfig,
    /// Build settings.
    pub build: BuildConfig,
}

impl ClConfig {
    /// Defaults overlaid with any `CLBIND_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(bytes) = parse_env::<usize>(ENV_QUERY_MAX_BYTES) {
            config.query.max_size = bytes;
        }
        if let Some(attempts) = parse_env::<u32>(ENV_QUERY_ATTEMPTS) {
            config.query.max_attempts = attempts.max(1);
        }
        if let Ok(flag) = env::var(ENV_BUILD_STD) {
            config.build.baseline_flag = flag;
        }

        config
    }

    /// Configuration for tests: tiny initial buffers so that growth paths run.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            query: QueryConfig {
                initial_size: 16,
                max_size: 64 * 1024,
                max_attempts: 8,
            },
            build: BuildConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Builder for [`ClConfig`].
#[derive(Debug, Default)]
pub struct ClConfigBuilder {
    config: ClConfig,
}

impl ClConfigBuilder {
    /// Creates a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from [`ClConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            config: ClConfig::from_env(),
        }
    }

    /// Sets the first query buffer size.
    #[must_use]
    pub fn with_initial_query_size(mut self, bytes: usize) -> Self {
        self.config.query.initial_size = bytes;
        self
    }

    /// Sets the query buffer cap.
    #[must_use]
    pub fn with_max_query_size(mut self, bytes: usize) -> Self {
        self.config.query.max_size = bytes;
        self
    }

    /// Sets the maximum native calls per query (at least one).
    #[must_use]
    pub fn with_query_attempts(mut self, attempts: u32) -> Self {
        self.config.query.max_attempts = attempts.max(1);
        self
    }

    /// Sets the baseline language-standard flag.
    #[must_use]
    pub fn with_baseline_flag(mut self, flag: impl Into<String>) -> Self {
        self.config.build.baseline_flag = flag.into();
        self
    }

    /// Sets the per-device build log cap.
    #[must_use]
    pub fn with_log_limit(mut self, bytes: usize) -> Self {
        self.config.build.log_limit = bytes;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClConfig::default();
        assert_eq!(config.query.initial_size, 1024);
        assert_eq!(config.query.max_size, 1024 * 1024);
        assert_eq!(config.query.max_attempts, 3);
        assert_eq!(config.build.baseline_flag, "-cl-std=CL1.1");
    }

    #[test]
    fn test_builder() {
        let config = ClConfigBuilder::new()
            .with_initial_query_size(8)
            .with_max_query_size(4096)
            .with_query_attempts(0)
            .with_baseline_flag("-cl-std=CL1.2")
            .build();

        assert_eq!(config.query.initial_size, 8);
        assert_eq!(config.query.max_size, 4096);
        assert_eq!(config.query.max_attempts, 1);
        assert_eq!(config.build.baseline_flag, "-cl-std=CL1.2");
    }

    #[test]
    fn test_testing_preset_grows() {
        let config = ClConfig::for_testing();
        assert!(config.query.initial_size < ClConfig::default().query.initial_size);
    }
}
