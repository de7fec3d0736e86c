//! Bridge configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Frame bridge configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Consecutive capture/encode failures before the stream is stopped
    pub max_consecutive_errors: u32,

    /// Emit a debug summary every this many dropped frames (0 = never)
    pub drop_log_interval: u64,

    /// Sample duration used until two frames have been seen
    pub nominal_frame_duration: Duration,

    /// Prefix for producer thread names
    pub thread_name_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 30,
            drop_log_interval: 300,
            nominal_frame_duration: Duration::from_millis(33),
            thread_name_prefix: "frame-bridge".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Set the consecutive error limit (at least 1)
    pub fn max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    pub fn drop_log_interval(mut self, interval: u64) -> Self {
        self.drop_log_interval = interval;
        self
    }

    pub fn nominal_frame_duration(mut self, duration: Duration) -> Self {
        self.nominal_frame_duration = duration;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}
