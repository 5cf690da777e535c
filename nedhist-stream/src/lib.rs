//! nedhist-stream: channel integrity checking, snapshot publishing, and
//! acquisition control.
//!
//! This crate wraps the accumulation engine in the concurrency discipline
//! the ingestion side needs: up to [`nedhist_core::MAX_CHANNELS`] feed
//! threads deliver batches through [`Controller::ingest`], a periodic
//! publisher thread copies the counter buffer into immutable [`Snapshot`]
//! values, and a control surface drives the `Idle -> Acquiring -> Idle`
//! state machine. All shared state sits behind one coarse lock, held for
//! the duration of a batch or a buffer copy.

pub mod channel;
pub mod controller;
mod publisher;
pub mod snapshot;

pub use channel::{BatchCheck, ChannelBank, ChannelStats, PRIMARY_CHANNEL};
pub use controller::{AcquisitionState, Controller, DetectorMetrics, IngestHandle, Metrics};
pub use snapshot::{Snapshot, SnapshotSink};
