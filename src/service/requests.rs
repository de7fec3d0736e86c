//! Command request and response shapes

use serde::{Deserialize, Serialize};

use crate::capture::CaptureFormat;
use crate::registry::{ConnectionId, StreamId};
use crate::signaling::{IceServer, PeerConfig, SessionDescription};

/// Optional overrides of the device's default format
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

impl VideoConfig {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.fps.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamRequest {
    pub device_id: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

impl StartStreamRequest {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            width: None,
            height: None,
            fps: None,
        }
    }

    pub fn video(&self) -> VideoConfig {
        VideoConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamResponse {
    pub stream_id: StreamId,
    pub format: CaptureFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeerConnectionRequest {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl From<CreatePeerConnectionRequest> for PeerConfig {
    fn from(request: CreatePeerConnectionRequest) -> Self {
        PeerConfig::with_ice_servers(request.ice_servers)
    }
}

/// Combined capture and connection session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub device_id: String,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub video: Option<VideoConfig>,
}

impl StartSessionRequest {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ice_servers: Vec::new(),
            video: None,
        }
    }

    pub fn ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    pub fn video(mut self, video: VideoConfig) -> Self {
        self.video = Some(video);
        self
    }
}

/// Result of starting a session: the new connection and its local offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOffer {
    pub connection_id: ConnectionId,
    pub stream_id: StreamId,
    pub description: SessionDescription,
}
