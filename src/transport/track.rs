//! Video track writer

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bridge::SampleReceiver;
use crate::signaling::connection::wait_closed;
use crate::signaling::Connection;

/// Pump samples from `samples` onto the connection's video track
///
/// The receiver is only ready while the previous write has completed, so a
/// slow network makes the bridge drop frames instead of queueing them. The
/// task ends when the connection closes, abandoning any write in flight, or
/// when the stream stops.
pub fn spawn_track_writer(connection: Arc<Connection>, mut samples: SampleReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        let transport = connection.transport();
        let mut closed = connection.closed_signal();
        let mut written = 0u64;
        let mut failures = 0u64;

        loop {
            let sample = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                sample = samples.recv() => match sample {
                    Some(sample) => sample,
                    None => break,
                },
            };

            let result = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => break,
                result = transport.write_sample(&sample) => result,
            };

            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        connection = %connection.id(),
                        sequence = sample.sequence,
                        error = %e,
                        "Failed to write sample to track"
                    );
                }
            }
        }

        tracing::debug!(
            connection = %connection.id(),
            written = written,
            failures = failures,
            "Track writer finished"
        );
    })
}
