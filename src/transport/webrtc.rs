//! webrtc-rs peer transport
//!
//! One `RTCPeerConnection` per connection with a single H.264 sample track.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::watch;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};
use crate::media::{EncodedSample, SampleFormat};
use crate::registry::ConnectionId;
use crate::signaling::{IceCandidate, IceServer, OfferOptions, PeerConfig, SdpType, SessionDescription};

use super::{PeerTransport, TransportFactory, TransportState};

fn transport_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Transport(format!("{}: {}", context, e))
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => TransportState::New,
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
        }
    }
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Peer transport backed by webrtc-rs
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    state: Arc<watch::Sender<TransportState>>,
    wait_for_gathering: bool,
}

impl WebRtcTransport {
    /// Local description after the optional wait for ICE gathering
    async fn local_description(&self, fallback: RTCSessionDescription) -> Result<SessionDescription> {
        let description = if self.wait_for_gathering {
            let mut gathered = self.pc.gathering_complete_promise().await;
            let _ = gathered.recv().await;
            self.pc.local_description().await.unwrap_or(fallback)
        } else {
            fallback
        };

        let sdp_type = description.sdp_type.to_string().parse::<SdpType>()?;
        Ok(SessionDescription {
            sdp_type,
            sdp: description.sdp,
        })
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                ice_restart: options.ice_restart,
                voice_activity_detection: false,
            }))
            .await
            .map_err(|e| transport_err("create offer", e))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| transport_err("set local offer", e))?;

        self.local_description(offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| transport_err("create answer", e))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| transport_err("set local answer", e))?;

        self.local_description(answer).await
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        }
        .map_err(|e| Error::InvalidDescription(e.to_string()))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| transport_err("add candidate", e))
    }

    async fn write_sample(&self, sample: &EncodedSample) -> Result<()> {
        if sample.format != SampleFormat::H264 {
            return Err(Error::Transport(format!(
                "video track carries h264, got {}",
                sample.format
            )));
        }

        self.track
            .write_sample(&Sample {
                data: sample.data.clone(),
                duration: sample.duration,
                timestamp: SystemTime::now(),
                ..Default::default()
            })
            .await
            .map_err(|e| transport_err("write sample", e))
    }

    fn state_changes(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| transport_err("close peer connection", e))
    }
}

/// Builds a [`WebRtcTransport`] per connection
pub struct WebRtcTransportFactory {
    track_id: String,
    stream_label: String,
    wait_for_gathering: bool,
}

impl WebRtcTransportFactory {
    pub fn new(track_id: impl Into<String>, stream_label: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            stream_label: stream_label.into(),
            wait_for_gathering: false,
        }
    }

    /// Return descriptions only after ICE gathering has finished, so they
    /// carry every local candidate
    pub fn wait_for_gathering(mut self, wait: bool) -> Self {
        self.wait_for_gathering = wait;
        self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, id: &ConnectionId, config: &PeerConfig) -> Result<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| transport_err("register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| transport_err("register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: config.ice_servers.iter().map(RTCIceServer::from).collect(),
                ..Default::default()
            })
            .await
            .map_err(|e| transport_err("create peer connection", e))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            self.track_id.clone(),
            self.stream_label.clone(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| transport_err("add video track", e))?;

        let (state, _) = watch::channel(TransportState::New);
        let state = Arc::new(state);
        let sender = Arc::clone(&state);
        let connection_id = id.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!(connection = %connection_id, state = %s, "Peer connection state changed");
            sender.send_replace(TransportState::from(s));
            Box::pin(async {})
        }));

        tracing::debug!(
            connection = %id,
            ice_servers = config.ice_servers.len(),
            track = %self.track_id,
            "WebRTC transport created"
        );

        Ok(Arc::new(WebRtcTransport {
            pc,
            track,
            state,
            wait_for_gathering: self.wait_for_gathering,
        }))
    }
}
