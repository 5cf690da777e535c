//! Periodic snapshot publisher thread.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use log::debug;

use crate::controller::Shared;
use crate::snapshot::{Snapshot, SnapshotSink};

/// Handle to a running publisher thread.
pub(crate) struct PublisherHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl PublisherHandle {
    /// Signals the thread and waits for it to finish. A tick in flight
    /// completes before the stop takes effect.
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.thread.join();
    }
}

/// Spawns the publisher. Each period it copies the whole counter buffer
/// under the shared lock, releases the lock, then hands the stamped copy
/// to the sink. The buffer itself is never cleared by publishing.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    mut sink: Box<dyn SnapshotSink>,
    period: Duration,
) -> PublisherHandle {
    let (stop_tx, stop_rx) = mpsc::channel();
    let thread = std::thread::spawn(move || {
        let mut sequence = 0u64;
        loop {
            match stop_rx.recv_timeout(period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let data = {
                let inner = shared.lock();
                inner.accumulator.as_ref().map(|acc| acc.buffer().to_vec())
            };
            if let Some(data) = data {
                sequence += 1;
                debug!("publishing snapshot {sequence} ({} counters)", data.len());
                sink.publish(Snapshot {
                    data,
                    sequence,
                    timestamp: SystemTime::now(),
                });
            }
        }
        debug!("publisher thread exiting after {sequence} snapshots");
    });
    PublisherHandle { stop_tx, thread }
}
