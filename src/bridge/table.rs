//! Active stream table

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::capture::CaptureFormat;
use crate::error::{Error, Result};
use crate::media::StreamPurpose;
use crate::registry::{ClosePolicy, ConnectionId, StreamId, StreamRelease};
use crate::stats::StreamSummary;

use super::pipeline::{BridgeState, FrameBridge};
use super::sink::SinkOwner;

/// One running capture stream
pub struct ActiveStream {
    pub id: StreamId,
    pub device_id: String,
    pub format: CaptureFormat,
    pub purpose: StreamPurpose,
    pub bridge: Arc<FrameBridge>,
    pub started_at: Instant,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStream")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("format", &self.format)
            .field("purpose", &self.purpose)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ActiveStream {
    pub fn new(
        device_id: impl Into<String>,
        format: CaptureFormat,
        purpose: StreamPurpose,
        bridge: Arc<FrameBridge>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            id: bridge.stream_id().clone(),
            device_id: device_id.into(),
            format,
            purpose,
            bridge,
            started_at: Instant::now(),
            worker: Mutex::new(worker),
        }
    }

    pub fn is_running(&self) -> bool {
        self.bridge.state() != BridgeState::Stopped
    }

    /// Stop the bridge. The producer thread exits after its current frame.
    pub fn stop(&self) -> bool {
        self.bridge.stop()
    }

    /// Take the producer thread handle, for callers that want to join it
    pub fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().take()
    }

    /// True once the producer thread has exited or was never attached
    pub fn worker_finished(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(true, |worker| worker.is_finished())
    }

    pub fn summary(&self) -> StreamSummary {
        let gate = self.bridge.gate().snapshot();
        StreamSummary {
            stream_id: self.id.clone(),
            device_id: self.device_id.clone(),
            uptime: self.started_at.elapsed(),
            listeners: gate.listeners,
            ready_listeners: gate.ready,
            bridge: self.bridge.stats(),
        }
    }
}

/// Streams keyed by id, at most one running stream per device
///
/// Streams stopped through the table stay in `retired` until their
/// producer thread exits, so `stop_all` can hand every unjoined worker to
/// the caller.
#[derive(Default)]
pub struct StreamTable {
    streams: RwLock<HashMap<StreamId, Arc<ActiveStream>>>,
    retired: Mutex<Vec<Arc<ActiveStream>>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream. Fails if its device already has one running.
    pub fn insert(&self, stream: ActiveStream) -> Result<Arc<ActiveStream>> {
        let mut streams = self.streams.write();
        streams.retain(|_, existing| existing.is_running());

        if streams.values().any(|s| s.device_id == stream.device_id) {
            return Err(Error::StreamingAlreadyActive(stream.device_id));
        }

        let stream = Arc::new(stream);
        streams.insert(stream.id.clone(), Arc::clone(&stream));
        Ok(stream)
    }

    pub fn get(&self, id: &StreamId) -> Result<Arc<ActiveStream>> {
        self.streams
            .read()
            .get(id)
            .filter(|s| s.is_running())
            .cloned()
            .ok_or_else(|| Error::NoActiveStream(id.to_string()))
    }

    /// Running stream for `device_id`, if any
    pub fn by_device(&self, device_id: &str) -> Option<Arc<ActiveStream>> {
        self.streams
            .read()
            .values()
            .find(|s| s.device_id == device_id && s.is_running())
            .cloned()
    }

    pub fn remove(&self, id: &StreamId) -> Option<Arc<ActiveStream>> {
        self.streams.write().remove(id)
    }

    /// Stop and remove a stream
    pub fn stop(&self, id: &StreamId) -> Result<Arc<ActiveStream>> {
        let stream = self
            .remove(id)
            .ok_or_else(|| Error::NoActiveStream(id.to_string()))?;
        let stopped = stream.stop();
        self.retire(Arc::clone(&stream));
        if !stopped {
            // Stopped on its own earlier (source ended or failed)
            return Err(Error::NoActiveStream(id.to_string()));
        }
        Ok(stream)
    }

    /// Stop every stream. The result includes streams stopped earlier whose
    /// producer thread had not exited yet.
    pub fn stop_all(&self) -> Vec<Arc<ActiveStream>> {
        let mut drained: Vec<_> = self.streams.write().drain().map(|(_, s)| s).collect();
        for stream in &drained {
            stream.stop();
        }
        drained.append(&mut *self.retired.lock());
        drained
    }

    /// Stopped streams whose producer thread may still be running
    pub fn retired_len(&self) -> usize {
        let mut retired = self.retired.lock();
        retired.retain(|s| !s.worker_finished());
        retired.len()
    }

    fn retire(&self, stream: Arc<ActiveStream>) {
        let mut retired = self.retired.lock();
        retired.retain(|s| !s.worker_finished());
        if !stream.worker_finished() {
            retired.push(stream);
        }
    }

    /// Running streams
    pub fn active(&self) -> Vec<Arc<ActiveStream>> {
        self.streams
            .read()
            .values()
            .filter(|s| s.is_running())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.read().values().filter(|s| s.is_running()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StreamRelease for StreamTable {
    fn release(&self, stream: &StreamId, connection: &ConnectionId, policy: ClosePolicy) {
        let Some(active) = self.streams.read().get(stream).cloned() else {
            tracing::debug!(stream = %stream, connection = %connection, "Released stream no longer exists");
            return;
        };

        let detached = active
            .bridge
            .detach_owner(&SinkOwner::Connection(connection.clone()));

        let stop = match policy {
            ClosePolicy::DetachOnly => false,
            ClosePolicy::StopStream => true,
            ClosePolicy::StopWhenUnused => active.bridge.sink_count() == 0,
        };

        tracing::debug!(
            stream = %stream,
            connection = %connection,
            detached = detached,
            policy = ?policy,
            stop = stop,
            "Stream binding released"
        );

        if stop {
            self.streams.write().remove(stream);
            active.stop();
            self.retire(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::config::BridgeConfig;
    use crate::bridge::sink::sample_channel;
    use crate::media::PixelFormat;

    fn format() -> CaptureFormat {
        CaptureFormat::new(4, 2, 30.0, PixelFormat::Nv12)
    }

    fn stream(device: &str) -> ActiveStream {
        let bridge = Arc::new(FrameBridge::new(StreamId::new(), BridgeConfig::default()));
        bridge.start().unwrap();
        ActiveStream::new(device, format(), StreamPurpose::Transport, bridge, None)
    }

    /// Attach one sink owned by `connection` and one local sink
    fn attach(stream: &ActiveStream, connection: &ConnectionId, local: bool) -> Vec<crate::bridge::SampleReceiver> {
        let mut receivers = Vec::new();
        let (sink, rx) = sample_channel(stream.bridge.gate(), true);
        stream
            .bridge
            .attach_sink(SinkOwner::Connection(connection.clone()), Arc::new(sink))
            .unwrap();
        receivers.push(rx);
        if local {
            let (sink, rx) = sample_channel(stream.bridge.gate(), true);
            stream
                .bridge
                .attach_sink(SinkOwner::Local("ui".into()), Arc::new(sink))
                .unwrap();
            receivers.push(rx);
        }
        receivers
    }

    #[test]
    fn test_one_stream_per_device() {
        let table = StreamTable::new();
        let first = table.insert(stream("cam")).unwrap();
        assert!(matches!(
            table.insert(stream("cam")),
            Err(Error::StreamingAlreadyActive(_))
        ));
        assert!(table.insert(stream("other")).is_ok());
        assert_eq!(table.len(), 2);

        // A stopped stream frees its device
        first.stop();
        assert!(table.insert(stream("cam")).is_ok());
        assert!(table.by_device("cam").is_some());
    }

    #[test]
    fn test_stop_and_lookup() {
        let table = StreamTable::new();
        let id = table.insert(stream("cam")).unwrap().id.clone();
        assert!(table.get(&id).is_ok());

        table.stop(&id).unwrap();
        assert!(matches!(table.get(&id), Err(Error::NoActiveStream(_))));
        assert!(matches!(table.stop(&id), Err(Error::NoActiveStream(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_stop_when_unused() {
        let table = StreamTable::new();
        let active = table.insert(stream("cam")).unwrap();
        let a = ConnectionId::from("a");
        let _rx = attach(&active, &a, true);

        // Local preview keeps it alive
        table.release(&active.id, &a, ClosePolicy::StopWhenUnused);
        assert!(active.is_running());
        assert_eq!(active.bridge.sink_count(), 1);

        let b = ConnectionId::from("b");
        let other = table.insert(stream("cam2")).unwrap();
        let _rx_b = attach(&other, &b, false);
        table.release(&other.id, &b, ClosePolicy::StopWhenUnused);
        assert!(!other.is_running());
        assert!(table.get(&other.id).is_err());
    }

    #[test]
    fn test_release_policies() {
        let table = StreamTable::new();
        let c = ConnectionId::from("c");

        let detach_only = table.insert(stream("cam-a")).unwrap();
        let _rx1 = attach(&detach_only, &c, false);
        table.release(&detach_only.id, &c, ClosePolicy::DetachOnly);
        assert!(detach_only.is_running());
        assert_eq!(detach_only.bridge.sink_count(), 0);

        let stop = table.insert(stream("cam-b")).unwrap();
        let _rx2 = attach(&stop, &c, true);
        table.release(&stop.id, &c, ClosePolicy::StopStream);
        assert!(!stop.is_running());
    }

    #[test]
    fn test_stop_all() {
        let table = StreamTable::new();
        let a = table.insert(stream("a")).unwrap();
        let b = table.insert(stream("b")).unwrap();
        assert_eq!(table.stop_all().len(), 2);
        assert!(!a.is_running());
        assert!(!b.is_running());
        assert!(table.is_empty());
    }

    #[test]
    fn test_stop_all_returns_retired_workers() {
        let table = StreamTable::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            let _ = release_rx.recv();
        });

        let bridge = Arc::new(FrameBridge::new(StreamId::new(), BridgeConfig::default()));
        bridge.start().unwrap();
        let active = table
            .insert(ActiveStream::new("cam", format(), StreamPurpose::Transport, bridge, Some(worker)))
            .unwrap();
        let c = ConnectionId::from("c");
        let _rx = attach(&active, &c, false);

        table.release(&active.id, &c, ClosePolicy::StopWhenUnused);
        assert!(table.is_empty());
        assert_eq!(table.retired_len(), 1);

        let live = table.insert(stream("other")).unwrap();
        let stopped = table.stop_all();
        assert_eq!(stopped.len(), 2);
        assert!(!live.is_running());
        assert_eq!(table.retired_len(), 0);

        release_tx.send(()).unwrap();
        let retired = stopped.iter().find(|s| s.id == active.id).unwrap();
        retired.take_worker().unwrap().join().unwrap();
    }

    #[test]
    fn test_summary_reflects_gate() {
        let table = StreamTable::new();
        let active = table.insert(stream("cam")).unwrap();
        let _rx = attach(&active, &ConnectionId::from("c"), true);
        let summary = active.summary();
        assert_eq!(summary.device_id, "cam");
        assert_eq!(summary.listeners, 2);
        assert_eq!(summary.ready_listeners, 2);
    }
}
