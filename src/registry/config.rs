//! Registry configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What closing a connection does to the stream bound to it
///
/// The connection's own sinks are always detached from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePolicy {
    /// Leave the stream running; its owner stops it
    DetachOnly,
    /// Stop the stream once no other sink is attached to it
    #[default]
    StopWhenUnused,
    /// Always stop the stream
    StopStream,
}

/// Connection registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Stream handling when a bound connection closes
    pub close_policy: ClosePolicy,

    /// Close a connection automatically when its transport fails
    pub close_on_failure: bool,

    /// Upper bound for background transport teardown
    pub transport_close_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            close_policy: ClosePolicy::default(),
            close_on_failure: true,
            transport_close_timeout: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }

    pub fn close_on_failure(mut self, enabled: bool) -> Self {
        self.close_on_failure = enabled;
        self
    }

    pub fn transport_close_timeout(mut self, timeout: Duration) -> Self {
        self.transport_close_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.close_policy, ClosePolicy::StopWhenUnused);
        assert!(config.close_on_failure);
        assert_eq!(config.transport_close_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default()
            .close_policy(ClosePolicy::DetachOnly)
            .close_on_failure(false)
            .transport_close_timeout(Duration::from_millis(250));
        assert_eq!(config.close_policy, ClosePolicy::DetachOnly);
        assert!(!config.close_on_failure);
        assert_eq!(config.transport_close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_partial_json() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"close_policy":"stop_stream"}"#).unwrap();
        assert_eq!(config.close_policy, ClosePolicy::StopStream);
        assert!(config.close_on_failure);
    }
}
