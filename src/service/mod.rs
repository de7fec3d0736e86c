//! Command facade
//!
//! [`CameraService`] wires capture, bridges, the connection registry and
//! signaling together and exposes the operations an application layer
//! calls. Every method maps onto one bridge or signaling operation, plus
//! the bookkeeping that ties them together.

pub mod config;
pub mod requests;

use std::sync::Arc;

use crate::bridge::{sample_channel, ActiveStream, FrameBridge, FrameSubscription, SinkOwner, StreamTable};
use crate::capture::{CaptureBackend, CaptureFormat, DeviceInfo, PermissionInfo};
use crate::error::{Error, Result};
use crate::media::{DefaultEncoderFactory, EncoderFactory, StreamPurpose};
use crate::registry::{ConnectionId, ConnectionRegistry, StreamId};
use crate::signaling::{
    CandidateDisposition, ConnectionSnapshot, IceCandidate, OfferOptions, SessionDescription,
    SignalingController,
};
use crate::stats::ServiceStats;
use crate::transport::{spawn_track_writer, TransportFactory};

pub use config::ServiceConfig;
pub use requests::{
    CreatePeerConnectionRequest, SessionOffer, StartSessionRequest, StartStreamRequest,
    StartStreamResponse, VideoConfig,
};

/// Label of sinks created by `start_streaming` and `subscribe_frames`
const PREVIEW_OWNER: &str = "preview";

/// Camera streaming and peer connection service
pub struct CameraService {
    config: ServiceConfig,
    backend: Arc<dyn CaptureBackend>,
    encoders: Arc<dyn EncoderFactory>,
    streams: Arc<StreamTable>,
    signaling: SignalingController,
}

impl CameraService {
    pub fn new(
        config: ServiceConfig,
        backend: Arc<dyn CaptureBackend>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_config(config.registry.clone()));
        let streams = Arc::new(StreamTable::new());
        let signaling = SignalingController::new(registry, transports).with_release(streams.clone());
        let encoders = Arc::new(DefaultEncoderFactory::new(config.preview_format));

        Self {
            config,
            backend,
            encoders,
            streams,
            signaling,
        }
    }

    /// Service using webrtc-rs peer connections
    #[cfg(feature = "webrtc")]
    pub fn with_webrtc(config: ServiceConfig, backend: Arc<dyn CaptureBackend>) -> Self {
        let transports = Arc::new(crate::transport::WebRtcTransportFactory::new(
            config.track_id.clone(),
            config.stream_label.clone(),
        ));
        Self::new(config, backend, transports)
    }

    pub fn with_encoders(mut self, encoders: Arc<dyn EncoderFactory>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn signaling(&self) -> &SignalingController {
        &self.signaling
    }

    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    pub async fn initialize(&self) -> Result<String> {
        let message = self.backend.initialize().await?;
        tracing::info!(message = %message, "Camera backend initialized");
        Ok(message)
    }

    pub async fn request_permission(&self) -> Result<PermissionInfo> {
        let info = self.backend.request_permission().await?;
        tracing::info!(status = ?info.status, "Camera permission requested");
        Ok(info)
    }

    pub async fn available_cameras(&self) -> Result<Vec<DeviceInfo>> {
        self.backend.list_devices().await
    }

    /// Start a capture-only stream and subscribe to its frames
    pub async fn start_streaming(
        &self,
        request: StartStreamRequest,
    ) -> Result<(StartStreamResponse, FrameSubscription)> {
        let stream = self
            .open_stream(&request.device_id, request.video(), StreamPurpose::Preview)
            .await?;

        let subscription = match Self::subscribe(&stream.bridge) {
            Ok(subscription) => subscription,
            Err(e) => {
                let _ = self.streams.stop(&stream.id);
                return Err(e);
            }
        };

        Ok((
            StartStreamResponse {
                stream_id: stream.id.clone(),
                format: stream.format,
            },
            subscription,
        ))
    }

    /// Add a frame subscriber to a running stream
    pub fn subscribe_frames(&self, stream_id: &StreamId) -> Result<FrameSubscription> {
        let stream = self.streams.get(stream_id)?;
        Self::subscribe(&stream.bridge)
    }

    /// Stop a stream, releasing any connection binding it has
    pub async fn stop_streaming(&self, stream_id: &StreamId) -> Result<()> {
        self.signaling.registry().unbind_stream(stream_id).await;
        self.streams.stop(stream_id)?;
        Ok(())
    }

    pub async fn create_peer_connection(
        &self,
        request: CreatePeerConnectionRequest,
    ) -> Result<ConnectionId> {
        self.signaling.create_connection(request.into()).await
    }

    pub async fn create_offer(
        &self,
        id: &ConnectionId,
        options: OfferOptions,
    ) -> Result<SessionDescription> {
        self.signaling.create_offer(id, &options).await
    }

    pub async fn create_answer(&self, id: &ConnectionId) -> Result<SessionDescription> {
        self.signaling.create_answer(id).await
    }

    pub async fn set_remote_description(
        &self,
        id: &ConnectionId,
        description: SessionDescription,
    ) -> Result<()> {
        self.signaling.apply_remote_description(id, description).await
    }

    pub async fn add_ice_candidate(
        &self,
        id: &ConnectionId,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        self.signaling.add_candidate(id, candidate).await
    }

    pub async fn get_connection_state(&self, id: &ConnectionId) -> Result<ConnectionSnapshot> {
        self.signaling.get_state(id).await
    }

    pub async fn close_connection(&self, id: &ConnectionId) -> Result<()> {
        self.signaling.close(id).await
    }

    /// Feed a stream into a connection's video track
    ///
    /// A connection moving to another stream stops receiving the old one.
    pub async fn bind_stream(&self, id: &ConnectionId, stream_id: &StreamId) -> Result<()> {
        let stream = self.streams.get(stream_id)?;
        let connection = self.signaling.registry().get(id).await?;
        let previous = self.signaling.bind_stream(id, stream_id).await?;

        let owner = SinkOwner::Connection(id.clone());
        if let Some(previous) = previous {
            if let Ok(old) = self.streams.get(&previous) {
                old.bridge.detach_owner(&owner);
            }
        }

        if stream.bridge.has_owner(&owner) {
            return Ok(());
        }

        let (sink, receiver) = sample_channel(stream.bridge.gate(), false);
        if let Err(e) = stream.bridge.attach_sink(owner, Arc::new(sink)) {
            self.signaling.registry().unbind_stream(stream_id).await;
            return Err(e);
        }
        spawn_track_writer(connection, receiver);

        tracing::info!(connection = %id, stream = %stream_id, "Track attached to stream");
        Ok(())
    }

    /// Detach a stream from the connection it feeds, leaving both running
    pub async fn unbind_stream(&self, stream_id: &StreamId) -> Result<Option<ConnectionId>> {
        let Some(id) = self.signaling.registry().unbind_stream(stream_id).await else {
            return Ok(None);
        };
        if let Ok(stream) = self.streams.get(stream_id) {
            stream.bridge.detach_owner(&SinkOwner::Connection(id.clone()));
        }
        Ok(Some(id))
    }

    /// Open the camera, create a connection fed by it and return its offer
    ///
    /// Whatever was created is torn down again if a later step fails.
    pub async fn start_camera_webrtc_session(&self, request: StartSessionRequest) -> Result<SessionOffer> {
        self.backend.initialize().await?;

        let connection_id = self
            .create_peer_connection(CreatePeerConnectionRequest {
                ice_servers: request.ice_servers.clone(),
            })
            .await?;

        let mut stream_id = None;
        match self.negotiate_session(&connection_id, &request, &mut stream_id).await {
            Ok((stream_id, description)) => {
                tracing::info!(
                    connection = %connection_id,
                    stream = %stream_id,
                    device = %request.device_id,
                    "Camera session started"
                );
                Ok(SessionOffer {
                    connection_id,
                    stream_id,
                    description,
                })
            }
            Err(e) => {
                tracing::warn!(
                    connection = %connection_id,
                    device = %request.device_id,
                    error = %e,
                    "Camera session failed, rolling back"
                );
                let _ = self.signaling.close(&connection_id).await;
                if let Some(stream_id) = stream_id {
                    let _ = self.streams.stop(&stream_id);
                }
                Err(e)
            }
        }
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            registry: self.signaling.registry().stats().await,
            streams: self.streams.active().iter().map(|s| s.summary()).collect(),
        }
    }

    /// Close every connection, stop every stream and wait for the producer
    /// threads to release their cameras
    pub async fn shutdown(&self) {
        let connections = self.signaling.close_all().await;
        let streams = self.streams.stop_all();

        for stream in &streams {
            if let Some(worker) = stream.take_worker() {
                match tokio::task::spawn_blocking(move || worker.join()).await {
                    Ok(Ok(())) => {}
                    _ => tracing::warn!(stream = %stream.id, "Producer thread did not exit cleanly"),
                }
            }
        }

        tracing::info!(
            connections = connections,
            streams = streams.len(),
            "Camera service shut down"
        );
    }

    async fn negotiate_session(
        &self,
        connection_id: &ConnectionId,
        request: &StartSessionRequest,
        stream_id: &mut Option<StreamId>,
    ) -> Result<(StreamId, SessionDescription)> {
        let video = request.video.unwrap_or_default();
        let stream = self
            .open_stream(&request.device_id, video, StreamPurpose::Transport)
            .await?;
        *stream_id = Some(stream.id.clone());

        self.bind_stream(connection_id, &stream.id).await?;
        let offer = self
            .signaling
            .create_offer(connection_id, &OfferOptions::default())
            .await?;
        Ok((stream.id.clone(), offer))
    }

    fn subscribe(bridge: &FrameBridge) -> Result<FrameSubscription> {
        let (sink, receiver) = sample_channel(bridge.gate(), false);
        bridge.attach_sink(SinkOwner::Local(PREVIEW_OWNER.to_string()), Arc::new(sink))?;
        Ok(FrameSubscription::new(receiver))
    }

    /// Open a device and start its producer thread
    async fn open_stream(
        &self,
        device_id: &str,
        video: VideoConfig,
        purpose: StreamPurpose,
    ) -> Result<Arc<ActiveStream>> {
        if self.streams.by_device(device_id).is_some() {
            return Err(Error::StreamingAlreadyActive(device_id.to_string()));
        }

        let requested = if video.is_empty() {
            None
        } else {
            Some(self.requested_format(device_id, video).await?)
        };

        let source = self.backend.open(device_id, requested).await?;
        let format = source.format();
        let encoder = self.encoders.create(purpose, &format)?;

        let bridge = Arc::new(FrameBridge::new(StreamId::new(), self.config.bridge.clone()));
        let worker = bridge.spawn(source, encoder)?;

        let stream = self
            .streams
            .insert(ActiveStream::new(
                device_id,
                format,
                purpose,
                Arc::clone(&bridge),
                Some(worker),
            ))
            .inspect_err(|_| {
                bridge.stop();
            })?;

        tracing::info!(
            stream = %stream.id,
            device = %device_id,
            format = %format,
            purpose = ?purpose,
            "Stream started"
        );
        Ok(stream)
    }

    /// Device default format with the requested overrides applied
    async fn requested_format(&self, device_id: &str, video: VideoConfig) -> Result<CaptureFormat> {
        let devices = self.backend.list_devices().await?;
        let device = devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
        let base = device
            .default_format()
            .ok_or_else(|| Error::FormatNotSupported(format!("{} reports no formats", device_id)))?;
        Ok(base.with_overrides(video.width, video.height, video.fps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PermissionStatus, SyntheticBackend};
    use crate::media::PixelFormat;
    use crate::transport::MemoryTransportFactory;
    use std::time::Duration;

    fn service() -> CameraService {
        let backend = Arc::new(
            SyntheticBackend::new().with_device(
                DeviceInfo::new("cam", "Cam").format(CaptureFormat::new(8, 4, 60.0, PixelFormat::Nv12)),
            ),
        );
        CameraService::new(
            ServiceConfig::default(),
            backend,
            Arc::new(MemoryTransportFactory::new()),
        )
    }

    #[tokio::test]
    async fn test_capture_only_stream() {
        let service = service();
        let (response, mut frames) = service
            .start_streaming(StartStreamRequest::new("cam"))
            .await
            .unwrap();
        assert_eq!(response.format.width, 8);

        let frame = tokio::time::timeout(Duration::from_secs(2), frames.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
        assert_eq!(frame.format, "nv12");

        service.stop_streaming(&response.stream_id).await.unwrap();
        // At most one sample can still be pending, then the subscription ends
        tokio::time::timeout(Duration::from_secs(2), async {
            while frames.next_frame().await.is_some() {}
        })
        .await
        .unwrap();
        assert!(service.stop_streaming(&response.stream_id).await.is_err());
    }

    #[tokio::test]
    async fn test_device_busy() {
        let service = service();
        let _stream = service.start_streaming(StartStreamRequest::new("cam")).await.unwrap();
        let err = service
            .start_streaming(StartStreamRequest::new("cam"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STREAMING_ALREADY_ACTIVE");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_override() {
        let service = service();
        let mut request = StartStreamRequest::new("cam");
        request.width = Some(4096);
        let err = service.start_streaming(request).await.unwrap_err();
        assert!(matches!(err, Error::FormatNotSupported(_)));
        assert!(service.streams().is_empty());
    }

    #[tokio::test]
    async fn test_session_rolls_back_on_denied_permission() {
        let backend = Arc::new(
            SyntheticBackend::default().permission(PermissionStatus::Denied),
        );
        let service = CameraService::new(
            ServiceConfig::default(),
            backend,
            Arc::new(MemoryTransportFactory::new()),
        );

        let err = service
            .start_camera_webrtc_session(StartSessionRequest::new("synthetic-0"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");

        let stats = service.stats().await;
        assert_eq!(stats.registry.active_connections, 0);
        assert_eq!(stats.registry.total_registered, 1);
        assert_eq!(stats.active_streams(), 0);
    }
}
