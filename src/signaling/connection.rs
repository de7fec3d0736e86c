//! Per-connection negotiation
//!
//! Operations on one connection run one at a time behind an async FIFO lock,
//! so candidates reach the transport in the order they were received. The
//! negotiation state itself sits behind a short synchronous lock that is
//! never held across an await.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::registry::{ConnectionId, StreamId};
use crate::transport::{PeerTransport, TransportState};

use super::description::{IceCandidate, OfferOptions, SdpType, SessionDescription};
use super::state::{NegotiationState, SignalingOp};

/// Where an incoming candidate went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "disposition")]
pub enum CandidateDisposition {
    /// Held until the remote description is applied
    Buffered { pending: usize },
    /// Handed to the transport
    Applied,
}

/// Read-only view of a connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub state: NegotiationState,
    pub transport_state: TransportState,
    pub remote_description_applied: bool,
    pub pending_candidates: usize,
    pub applied_candidates: u64,
    pub rejected_candidates: u64,
    pub bound_stream: Option<StreamId>,
    pub age_ms: u64,
}

struct ConnectionInner {
    state: NegotiationState,
    transport_state: TransportState,
    remote_applied: bool,
    /// Candidates received before the remote description, in receipt order
    pending: Vec<IceCandidate>,
    applied: u64,
    rejected: u64,
}

/// One peer connection and its negotiation state
pub struct Connection {
    id: ConnectionId,
    transport: Arc<dyn PeerTransport>,
    inner: Mutex<ConnectionInner>,
    op_lock: tokio::sync::Mutex<()>,
    closed: watch::Sender<bool>,
    created_at: Instant,
}

impl Connection {
    pub fn new(id: ConnectionId, transport: Arc<dyn PeerTransport>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            transport,
            inner: Mutex::new(ConnectionInner {
                state: NegotiationState::New,
                transport_state: TransportState::New,
                remote_applied: false,
                pending: Vec::new(),
                applied: 0,
                rejected: 0,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            closed,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn transport(&self) -> Arc<dyn PeerTransport> {
        Arc::clone(&self.transport)
    }

    pub fn state(&self) -> NegotiationState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Flips to `true` once, when the connection closes
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn snapshot(&self, bound_stream: Option<StreamId>) -> ConnectionSnapshot {
        let inner = self.inner.lock();
        ConnectionSnapshot {
            connection_id: self.id.clone(),
            state: inner.state,
            transport_state: inner.transport_state,
            remote_description_applied: inner.remote_applied,
            pending_candidates: inner.pending.len(),
            applied_candidates: inner.applied,
            rejected_candidates: inner.rejected,
            bound_stream,
            age_ms: self.created_at.elapsed().as_millis() as u64,
        }
    }

    /// Create the local offer. Only valid on a fresh connection.
    pub async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        let _op = self.lock_ops().await?;
        self.check(SignalingOp::CreateOffer)?;

        let offer = self.cancellable(self.transport.create_offer(options)).await?;
        let state = self.commit(SignalingOp::CreateOffer)?;

        tracing::info!(
            connection = %self.id,
            state = %state,
            ice_restart = options.ice_restart,
            "Local offer created"
        );
        Ok(offer)
    }

    /// Create the local answer to an applied remote offer
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        let _op = self.lock_ops().await?;
        self.check(SignalingOp::CreateAnswer)?;

        let answer = self.cancellable(self.transport.create_answer()).await?;
        let state = self.commit(SignalingOp::CreateAnswer)?;

        tracing::info!(connection = %self.id, state = %state, "Local answer created");
        Ok(answer)
    }

    /// Apply the remote offer or answer, then flush buffered candidates in order
    pub async fn apply_remote_description(&self, description: SessionDescription) -> Result<()> {
        let op = match description.sdp_type {
            SdpType::Offer => SignalingOp::ApplyRemoteOffer,
            SdpType::Answer => SignalingOp::ApplyRemoteAnswer,
        };

        let _op = self.lock_ops().await?;
        self.check(op)?;

        self.cancellable(self.transport.set_remote_description(&description))
            .await?;

        let (state, pending) = {
            let mut inner = self.inner.lock();
            if inner.state == NegotiationState::Closed {
                return Err(Error::Cancelled(self.id.clone()));
            }
            inner.state = inner.state.apply(op)?;
            inner.remote_applied = true;
            self.sync_transport(&mut inner);
            (inner.state, std::mem::take(&mut inner.pending))
        };

        tracing::info!(
            connection = %self.id,
            sdp_type = %description.sdp_type,
            state = %state,
            buffered = pending.len(),
            "Remote description applied"
        );

        for candidate in pending {
            self.forward_candidate(&candidate).await?;
        }
        Ok(())
    }

    /// Apply a candidate now, or buffer it until the remote description arrives
    pub async fn add_candidate(&self, candidate: IceCandidate) -> Result<CandidateDisposition> {
        let _op = self.lock_ops().await?;

        {
            let mut inner = self.inner.lock();
            if inner.state == NegotiationState::Closed {
                return Err(Error::Cancelled(self.id.clone()));
            }
            inner.state.apply(SignalingOp::AddCandidate)?;

            if !inner.remote_applied {
                inner.pending.push(candidate);
                let pending = inner.pending.len();
                tracing::debug!(
                    connection = %self.id,
                    pending = pending,
                    "Candidate buffered until remote description"
                );
                return Ok(CandidateDisposition::Buffered { pending });
            }
        }

        self.cancellable(self.transport.add_ice_candidate(&candidate))
            .await?;
        self.inner.lock().applied += 1;

        tracing::debug!(connection = %self.id, "Candidate applied");
        Ok(CandidateDisposition::Applied)
    }

    /// Record a transport state change. Returns the new negotiation state if
    /// it moved.
    pub fn on_transport_state(&self, state: TransportState) -> Option<NegotiationState> {
        let mut inner = self.inner.lock();
        if inner.state == NegotiationState::Closed {
            return None;
        }
        inner.transport_state = state;
        tracing::debug!(connection = %self.id, transport = %state, "Transport state changed");
        self.sync_transport(&mut inner)
    }

    /// Mark the connection closed and cancel in-flight operations.
    /// Returns false if it was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let (previous, dropped) = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.state = NegotiationState::Closed;
            let dropped = inner.pending.len();
            inner.pending.clear();
            (previous, dropped)
        };

        let first = !self.closed.send_replace(true);
        if first {
            tracing::info!(
                connection = %self.id,
                previous_state = %previous,
                dropped_candidates = dropped,
                "Connection closed"
            );
        }
        first
    }

    /// Hand one buffered candidate to the transport. A rejected candidate is
    /// counted and skipped; only cancellation aborts the flush.
    async fn forward_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        match self
            .cancellable(self.transport.add_ice_candidate(candidate))
            .await
        {
            Ok(()) => {
                self.inner.lock().applied += 1;
                Ok(())
            }
            Err(Error::Cancelled(id)) => Err(Error::Cancelled(id)),
            Err(e) => {
                self.inner.lock().rejected += 1;
                tracing::warn!(
                    connection = %self.id,
                    candidate = %candidate.candidate,
                    error = %e,
                    "Buffered candidate rejected by transport"
                );
                Ok(())
            }
        }
    }

    /// Move to Connected/Failed once negotiation allows it
    fn sync_transport(&self, inner: &mut ConnectionInner) -> Option<NegotiationState> {
        let op = match inner.transport_state {
            TransportState::Connected => SignalingOp::TransportConnected,
            TransportState::Failed => SignalingOp::TransportFailed,
            _ => return None,
        };
        if !inner.state.is_negotiated() {
            return None;
        }

        let next = inner.state.apply(op).ok()?;
        if next == inner.state {
            return None;
        }

        tracing::info!(
            connection = %self.id,
            from = %inner.state,
            to = %next,
            "Connection state changed"
        );
        inner.state = next;
        Some(next)
    }

    async fn lock_ops(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.cancellable(async { Ok(self.op_lock.lock().await) })
            .await
    }

    fn check(&self, op: SignalingOp) -> Result<()> {
        let state = self.inner.lock().state;
        if state == NegotiationState::Closed {
            return Err(Error::Cancelled(self.id.clone()));
        }
        state.apply(op).map(|_| ())
    }

    fn commit(&self, op: SignalingOp) -> Result<NegotiationState> {
        let mut inner = self.inner.lock();
        if inner.state == NegotiationState::Closed {
            return Err(Error::Cancelled(self.id.clone()));
        }
        inner.state = inner.state.apply(op)?;
        self.sync_transport(&mut inner);
        Ok(inner.state)
    }

    /// Race `op` against connection close
    async fn cancellable<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(Error::Cancelled(self.id.clone())),
            result = op => result,
        }
    }
}

/// Resolve once the close signal is raised (or its sender is gone)
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("transport_state", &inner.transport_state)
            .field("pending", &inner.pending.len())
            .finish()
    }
}
