//! Service configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bridge::BridgeConfig;
use crate::error::Result;
use crate::media::PreviewFormat;
use crate::registry::RegistryConfig;

/// Camera service configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bridge: BridgeConfig,

    pub registry: RegistryConfig,

    /// Payload handed to preview subscribers
    pub preview_format: PreviewFormat,

    /// Id of the outgoing video track
    pub track_id: String,

    /// Media stream label of the outgoing video track
    pub stream_label: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            registry: RegistryConfig::default(),
            preview_format: PreviewFormat::default(),
            track_id: "camera-rtc".to_string(),
            stream_label: "camera-rtc-stream".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn preview_format(mut self, format: PreviewFormat) -> Self {
        self.preview_format = format;
        self
    }

    pub fn track(mut self, track_id: impl Into<String>, stream_label: impl Into<String>) -> Self {
        self.track_id = track_id.into();
        self.stream_label = stream_label.into();
        self
    }
}
