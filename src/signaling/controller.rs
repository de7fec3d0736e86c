//! Connection lifecycle controller

use std::sync::Arc;

use crate::error::Result;
use crate::registry::{ConnectionId, ConnectionRegistry, NoopRelease, StreamId, StreamRelease};
use crate::transport::{TransportFactory, TransportState};

use super::connection::{wait_closed, CandidateDisposition, Connection, ConnectionSnapshot};
use super::description::{IceCandidate, OfferOptions, PeerConfig, SessionDescription};
use super::state::NegotiationState;

/// Runs signaling operations against registered connections
///
/// Cloning is cheap; clones share the registry, transport factory and
/// stream release hook.
#[derive(Clone)]
pub struct SignalingController {
    registry: Arc<ConnectionRegistry>,
    transports: Arc<dyn TransportFactory>,
    release: Arc<dyn StreamRelease>,
}

impl SignalingController {
    pub fn new(registry: Arc<ConnectionRegistry>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            registry,
            transports,
            release: Arc::new(NoopRelease),
        }
    }

    /// Hook invoked with a connection's bound stream when it closes
    pub fn with_release(mut self, release: Arc<dyn StreamRelease>) -> Self {
        self.release = release;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Create a transport, register the connection and watch its state
    pub async fn create_connection(&self, config: PeerConfig) -> Result<ConnectionId> {
        let id = ConnectionId::new();
        let transport = self.transports.create(&id, &config).await?;
        let connection = Arc::new(Connection::new(id.clone(), transport));

        if let Err(e) = self.registry.insert(Arc::clone(&connection)).await {
            let _ = connection.transport().close().await;
            return Err(e.into());
        }
        self.spawn_state_watcher(Arc::clone(&connection));

        tracing::info!(
            connection = %id,
            ice_servers = config.ice_servers.len(),
            "Connection created"
        );
        Ok(id)
    }

    pub async fn create_offer(
        &self,
        id: &ConnectionId,
        options: &OfferOptions,
    ) -> Result<SessionDescription> {
        let connection = self.registry.get(id).await?;
        connection.create_offer(options).await
    }

    pub async fn create_answer(&self, id: &ConnectionId) -> Result<SessionDescription> {
        let connection = self.registry.get(id).await?;
        connection.create_answer().await
    }

    pub async fn apply_remote_description(
        &self,
        id: &ConnectionId,
        description: SessionDescription,
    ) -> Result<()> {
        let connection = self.registry.get(id).await?;
        connection.apply_remote_description(description).await?;
        self.close_if_failed(&connection).await;
        Ok(())
    }

    pub async fn add_candidate(
        &self,
        id: &ConnectionId,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        let connection = self.registry.get(id).await?;
        connection.add_candidate(candidate).await
    }

    /// Close a connection
    ///
    /// The registry entry is gone when this returns and in-flight operations
    /// fail with `Cancelled`. The transport is torn down in the background.
    /// Closing an id that is already gone succeeds.
    pub async fn close(&self, id: &ConnectionId) -> Result<()> {
        let Some(removed) = self.registry.remove(id).await else {
            tracing::debug!(connection = %id, "Close ignored, connection already gone");
            return Ok(());
        };

        removed.connection.mark_closed();

        if let Some(stream) = &removed.stream {
            self.release
                .release(stream, id, self.registry.config().close_policy);
        }

        let transport = removed.connection.transport();
        let timeout = self.registry.config().transport_close_timeout;
        let connection_id = id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, transport.close()).await {
                Ok(Ok(())) => {
                    tracing::debug!(connection = %connection_id, "Transport closed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(connection = %connection_id, error = %e, "Transport close failed");
                }
                Err(_) => {
                    tracing::warn!(
                        connection = %connection_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Transport close timed out"
                    );
                }
            }
        });

        Ok(())
    }

    /// Read-only view of a live connection
    pub async fn get_state(&self, id: &ConnectionId) -> Result<ConnectionSnapshot> {
        let connection = self.registry.get(id).await?;
        let stream = self.registry.stream_for(id).await;
        Ok(connection.snapshot(stream))
    }

    /// Bind a stream to a connection, returning the stream it replaced
    pub async fn bind_stream(&self, id: &ConnectionId, stream: &StreamId) -> Result<Option<StreamId>> {
        Ok(self.registry.bind_stream(id, stream).await?)
    }

    /// Close every connection, returning how many were open
    pub async fn close_all(&self) -> usize {
        let ids = self.registry.ids().await;
        let count = ids.len();
        for id in ids {
            // close never fails for a registered id
            let _ = self.close(&id).await;
        }
        count
    }

    /// Map transport state changes onto the negotiation state until close
    fn spawn_state_watcher(&self, connection: Arc<Connection>) {
        let controller = self.clone();
        let mut states = connection.transport().state_changes();
        let mut closed = connection.closed_signal();

        tokio::spawn(async move {
            let initial = *states.borrow_and_update();
            if initial != TransportState::New {
                connection.on_transport_state(initial);
                if controller.close_if_failed(&connection).await {
                    return;
                }
            }

            loop {
                tokio::select! {
                    biased;
                    _ = wait_closed(&mut closed) => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *states.borrow_and_update();
                        connection.on_transport_state(state);
                        if controller.close_if_failed(&connection).await {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Close a failed connection when configured to. Returns true if closed.
    async fn close_if_failed(&self, connection: &Connection) -> bool {
        if connection.state() != NegotiationState::Failed
            || !self.registry.config().close_on_failure
        {
            return false;
        }

        tracing::warn!(connection = %connection.id(), "Transport failed, closing connection");
        let _ = self.close(connection.id()).await;
        true
    }
}
