//! In-process transport
//!
//! Records every call it receives so tests and demos can observe exactly
//! what the signaling layer forwarded, and in which order. Delays and state
//! changes can be injected to exercise cancellation and connectivity paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::media::EncodedSample;
use crate::registry::ConnectionId;
use crate::signaling::{IceCandidate, OfferOptions, PeerConfig, SdpType, SessionDescription};

use super::{PeerTransport, TransportFactory, TransportState};

/// A call observed by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetRemoteDescription(SdpType),
    AddIceCandidate(IceCandidate),
    Close,
}

/// Transport that negotiates with itself
pub struct MemoryTransport {
    calls: Mutex<Vec<TransportCall>>,
    written: Mutex<Vec<u64>>,
    state: watch::Sender<TransportState>,
    delay: Duration,
    write_delay: Duration,
    session_version: AtomicU64,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TransportState::New);
        Self {
            calls: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            state,
            delay: Duration::ZERO,
            write_delay: Duration::ZERO,
            session_version: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Suspend every negotiation call for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Suspend every sample write for `delay`, simulating a slow network
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Report a connectivity change, as the network would
    pub fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Candidates handed to the transport, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::AddIceCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Sequence numbers of samples written to the track, in order
    pub fn written_sequences(&self) -> Vec<u64> {
        self.written.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport("transport is closed".to_string()));
        }
        Ok(())
    }

    async fn negotiate_delay(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn fake_sdp(&self, role: &str) -> String {
        let version = self.session_version.fetch_add(1, Ordering::Relaxed);
        format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\n\
             m=video 9 UDP/TLS/RTP/SAVPF 102\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\n\
             a=setup:{}\r\na=sendonly\r\na=rtpmap:102 H264/90000\r\n",
            std::process::id(),
            version,
            role
        )
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.negotiate_delay().await;
        self.record(TransportCall::CreateOffer {
            ice_restart: options.ice_restart,
        });
        Ok(SessionDescription::offer(self.fake_sdp("actpass")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.negotiate_delay().await;
        self.record(TransportCall::CreateAnswer);
        Ok(SessionDescription::answer(self.fake_sdp("active")))
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        self.ensure_open()?;
        if description.sdp.trim().is_empty() {
            return Err(Error::InvalidDescription("empty SDP".to_string()));
        }
        self.negotiate_delay().await;
        self.record(TransportCall::SetRemoteDescription(description.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.ensure_open()?;
        if !candidate.is_end_of_candidates() && !candidate.candidate.starts_with("candidate:") {
            return Err(Error::Transport(format!(
                "malformed candidate: {}",
                candidate.candidate
            )));
        }
        self.negotiate_delay().await;
        self.record(TransportCall::AddIceCandidate(candidate.clone()));
        Ok(())
    }

    async fn write_sample(&self, sample: &EncodedSample) -> Result<()> {
        self.ensure_open()?;
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.written.lock().push(sample.sequence);
        Ok(())
    }

    fn state_changes(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.record(TransportCall::Close);
        self.state.send_replace(TransportState::Closed);
        Ok(())
    }
}

/// Creates [`MemoryTransport`]s and keeps a handle to each for inspection
#[derive(Default)]
pub struct MemoryTransportFactory {
    created: Mutex<Vec<(ConnectionId, Arc<MemoryTransport>)>>,
    delay: Duration,
    write_delay: Duration,
    fail_creation: AtomicBool,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Make subsequent `create` calls fail
    pub fn fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::Release);
    }

    /// Transport created for `id`, if any
    pub fn transport(&self, id: &ConnectionId) -> Option<Arc<MemoryTransport>> {
        self.created
            .lock()
            .iter()
            .find(|(created, _)| created == id)
            .map(|(_, transport)| Arc::clone(transport))
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn create(&self, id: &ConnectionId, config: &PeerConfig) -> Result<Arc<dyn PeerTransport>> {
        if self.fail_creation.load(Ordering::Acquire) {
            return Err(Error::Transport("transport creation disabled".to_string()));
        }

        let transport = Arc::new(
            MemoryTransport::new()
                .with_delay(self.delay)
                .with_write_delay(self.write_delay),
        );
        self.created.lock().push((id.clone(), Arc::clone(&transport)));

        tracing::debug!(
            connection = %id,
            ice_servers = config.ice_servers.len(),
            "Memory transport created"
        );
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let transport = MemoryTransport::new();
        transport.create_offer(&OfferOptions::default()).await.unwrap();
        transport
            .set_remote_description(&SessionDescription::answer("v=0"))
            .await
            .unwrap();
        transport
            .add_ice_candidate(&IceCandidate::new("candidate:1"))
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::CreateOffer { ice_restart: false },
                TransportCall::SetRemoteDescription(SdpType::Answer),
                TransportCall::AddIceCandidate(IceCandidate::new("candidate:1")),
                TransportCall::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let transport = MemoryTransport::new();
        assert!(matches!(
            transport
                .set_remote_description(&SessionDescription::answer("  "))
                .await,
            Err(Error::InvalidDescription(_))
        ));
        assert!(transport
            .add_ice_candidate(&IceCandidate::new("nonsense"))
            .await
            .is_err());
        assert!(transport.add_ice_candidate(&IceCandidate::new("")).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_work() {
        let transport = MemoryTransport::new();
        let mut states = transport.state_changes();
        transport.close().await.unwrap();

        assert!(transport.is_closed());
        assert!(transport.create_offer(&OfferOptions::default()).await.is_err());
        states.changed().await.unwrap();
        assert_eq!(*states.borrow(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_factory_tracks_transports() {
        let factory = MemoryTransportFactory::new();
        let id = ConnectionId::from("c");
        factory.create(&id, &PeerConfig::default()).await.unwrap();
        assert_eq!(factory.created_count(), 1);
        assert!(factory.transport(&id).is_some());

        factory.fail_creation(true);
        assert!(factory
            .create(&ConnectionId::from("d"), &PeerConfig::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_offer_sdp_advertises_video() {
        let transport = MemoryTransport::new();
        let offer = transport.create_offer(&OfferOptions::default()).await.unwrap();
        assert!(offer.sdp.starts_with("v=0"));
        assert!(offer.sdp.contains("m=video"));
    }
}
