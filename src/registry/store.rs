//! Connection registry implementation
//!
//! The registry maps connection ids to live connections and records which
//! capture stream feeds which connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::signaling::Connection;
use crate::stats::RegistryStats;

use super::config::RegistryConfig;
use super::entry::{ConnectionEntry, RemovedConnection};
use super::error::RegistryError;
use super::key::{ConnectionId, StreamId};

struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Reverse index, one connection per stream
    streams: HashMap<StreamId, ConnectionId>,
}

/// Central registry for all live connections
///
/// Both maps sit behind one `RwLock`, so a removal and its binding release
/// are a single step for every other reader. The lock is never held across
/// transport I/O.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,

    /// Configuration
    config: RegistryConfig,

    total_registered: AtomicU64,
}

impl ConnectionRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                connections: HashMap::new(),
                streams: HashMap::new(),
            }),
            config,
            total_registered: AtomicU64::new(0),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a connection under its own id
    pub async fn insert(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let id = connection.id().clone();
        let mut inner = self.inner.write().await;

        if inner.connections.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        inner
            .connections
            .insert(id.clone(), ConnectionEntry::new(connection));
        self.total_registered.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            connection = %id,
            active = inner.connections.len(),
            "Connection registered"
        );
        Ok(())
    }

    /// Look up a live connection
    pub async fn get(&self, id: &ConnectionId) -> Result<Arc<Connection>, RegistryError> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(id)
            .map(|entry| Arc::clone(&entry.connection))
            .ok_or_else(|| RegistryError::ConnectionNotFound(id.clone()))
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(id)
    }

    /// Remove a connection together with its stream binding
    ///
    /// Returns `None` if the connection was already gone, so concurrent
    /// closers agree on exactly one winner.
    pub async fn remove(&self, id: &ConnectionId) -> Option<RemovedConnection> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(id)?;

        if let Some(stream) = &entry.stream {
            inner.streams.remove(stream);
        }

        tracing::debug!(
            connection = %id,
            stream = ?entry.stream,
            lifetime_ms = entry.registered_at.elapsed().as_millis() as u64,
            "Connection removed"
        );

        Some(RemovedConnection {
            connection: entry.connection,
            stream: entry.stream,
        })
    }

    /// Bind a stream to a connection
    ///
    /// Rebinding the same pair is a no-op. A connection moving to a new
    /// stream gives up its old one, which is returned.
    pub async fn bind_stream(
        &self,
        id: &ConnectionId,
        stream: &StreamId,
    ) -> Result<Option<StreamId>, RegistryError> {
        let mut inner = self.inner.write().await;

        if !inner.connections.contains_key(id) {
            return Err(RegistryError::ConnectionNotFound(id.clone()));
        }

        match inner.streams.get(stream) {
            Some(owner) if owner == id => return Ok(None),
            Some(owner) => {
                return Err(RegistryError::StreamAlreadyBound {
                    stream: stream.clone(),
                    connection: owner.clone(),
                })
            }
            None => {}
        }

        inner.streams.insert(stream.clone(), id.clone());
        let previous = inner
            .connections
            .get_mut(id)
            .and_then(|entry| entry.stream.replace(stream.clone()));

        if let Some(previous) = &previous {
            inner.streams.remove(previous);
        }

        tracing::info!(
            connection = %id,
            stream = %stream,
            previous = ?previous,
            "Stream bound"
        );
        Ok(previous)
    }

    /// Release a stream's binding, returning the connection it fed
    pub async fn unbind_stream(&self, stream: &StreamId) -> Option<ConnectionId> {
        let mut inner = self.inner.write().await;
        let id = inner.streams.remove(stream)?;

        if let Some(entry) = inner.connections.get_mut(&id) {
            entry.stream = None;
        }

        tracing::info!(connection = %id, stream = %stream, "Stream unbound");
        Some(id)
    }

    pub async fn stream_for(&self, id: &ConnectionId) -> Option<StreamId> {
        let inner = self.inner.read().await;
        inner.connections.get(id).and_then(|entry| entry.stream.clone())
    }

    pub async fn connection_for(&self, stream: &StreamId) -> Option<ConnectionId> {
        self.inner.read().await.streams.get(stream).cloned()
    }

    /// Ids of every live connection
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.inner.read().await.connections.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.connections.is_empty()
    }

    /// Remove every connection, used on shutdown
    pub async fn drain(&self) -> Vec<RemovedConnection> {
        let mut inner = self.inner.write().await;
        inner.streams.clear();
        inner
            .connections
            .drain()
            .map(|(_, entry)| RemovedConnection {
                connection: entry.connection,
                stream: entry.stream,
            })
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            active_connections: inner.connections.len(),
            bound_streams: inner.streams.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
