//! Immutable histogram snapshots and the sink that receives them.

use std::time::SystemTime;

/// An owned, timestamped copy of the cumulative histogram buffer.
///
/// Immutable once constructed; ownership transfers to the sink and the
/// core never reads it again.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Copy of the full counter buffer.
    pub data: Vec<u64>,
    /// Monotonically increasing publish sequence number, reset on
    /// acquisition start.
    pub sequence: u64,
    /// Wall-clock time the copy was taken.
    pub timestamp: SystemTime,
}

/// Downstream consumer of published snapshots.
///
/// Implementations must be cheap enough to call from the publisher thread;
/// anything slow should hand the snapshot off to its own worker.
pub trait SnapshotSink: Send {
    /// Receives one published snapshot.
    fn publish(&mut self, snapshot: Snapshot);
}

impl<F> SnapshotSink for F
where
    F: FnMut(Snapshot) + Send,
{
    fn publish(&mut self, snapshot: Snapshot) {
        self(snapshot);
    }
}

impl SnapshotSink for std::sync::mpsc::Sender<Snapshot> {
    fn publish(&mut self, snapshot: Snapshot) {
        // A disconnected receiver just means nobody is listening anymore.
        let _ = self.send(snapshot);
    }
}
