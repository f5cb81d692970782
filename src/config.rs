use crate::error::{DmuxError, Result};

/// Configuration for a demultiplexer or a standalone writable stream.
///
/// `Config` controls the lifecycle of closed keys and the point at which
/// consumer lag is reported through `tracing`.
///
/// # Examples
///
/// ## Using default configuration
///
/// ```rust
/// use dmux::Config;
///
/// let config = Config::default();
/// assert!(config.retain_closed_streams);
/// assert!(config.backpressure_warn_threshold.is_none());
/// ```
///
/// ## Creating custom configuration
///
/// ```rust
/// use dmux::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .retain_closed_streams(false)
///     .backpressure_warn_threshold(10_000)
///     .build()
///     .expect("Valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// When a key's stream is closed while it has no live consumers, keep
    /// the map entry (terminal packet included) so that a late consumer
    /// can still observe the close. When `false`, the entry is removed at
    /// close time and a late consumer gets a fresh open stream instead.
    pub retain_closed_streams: bool,
    /// Emit a `tracing` warning when any single consumer falls this many
    /// items behind the producer. Reporting only; writes are never blocked
    /// by slow consumers.
    pub backpressure_warn_threshold: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retain_closed_streams: true,
            backpressure_warn_threshold: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backpressure_warn_threshold == Some(0) {
            return Err(DmuxError::Config(
                "Backpressure warn threshold cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for creating custom `Config` instances.
///
/// Starts with default values and allows selective overriding of specific
/// settings; `build` validates the result.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn retain_closed_streams(mut self, retain: bool) -> Self {
        self.config.retain_closed_streams = retain;
        self
    }

    pub fn backpressure_warn_threshold(mut self, threshold: usize) -> Self {
        self.config.backpressure_warn_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
