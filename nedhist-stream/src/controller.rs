//! Acquisition state machine and the shared-state lock discipline.
//!
//! The [`Controller`] is the single owner of the engine. Feed threads call
//! [`Controller::ingest`] concurrently; the publisher thread copies the
//! buffer on its own timer; a control thread drives start/stop/reset and
//! reconfiguration. Everything shares one coarse mutex: per-event work is
//! O(1) and batches are one pulse's worth of events, so hold times stay
//! short and bounded, and the low channel count makes finer locking not
//! worth its complexity.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use nedhist_core::{EngineConfig, Error, EventBatch, Result};
use nedhist_engine::Accumulator;

use crate::channel::{ChannelBank, ChannelStats};
use crate::publisher::{self, PublisherHandle};
use crate::snapshot::SnapshotSink;

/// Acquisition state machine.
///
/// `Idle -> Acquiring -> Idle` is the normal cycle; configuration or
/// allocation failures park the controller in `Error` until an explicit
/// reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// Not acquiring; reconfiguration and table loads are legal.
    Idle,
    /// Ingestion and publishing are live.
    Acquiring,
    /// A start or reconfigure failed; requires reset.
    Error,
}

impl AcquisitionState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Error => "error",
        }
    }
}

/// Observable per-detector metrics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DetectorMetrics {
    /// Cumulative events routed to this detector this acquisition.
    pub total_events: u64,
    /// Events per second since the previous metrics read.
    pub event_rate: f64,
}

/// Point-in-time status view assembled by [`Controller::metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    /// Current state machine position.
    pub state: AcquisitionState,
    /// Counter buffer length, zero before the first reconfigure.
    pub buffer_size: usize,
    /// Global events per second since the previous metrics read.
    pub event_rate: f64,
    /// Pulses seen on the primary channel.
    pub pulse_count: u64,
    /// Integrated proton charge.
    pub proton_charge: f64,
    /// Per-channel integrity counters.
    pub channels: Vec<ChannelStats>,
    /// Per-detector event counters and rates.
    pub detectors: Vec<DetectorMetrics>,
}

/// State behind the coarse lock.
pub(crate) struct Inner {
    pub(crate) accumulator: Option<Accumulator>,
    channels: ChannelBank,
    state: AcquisitionState,
    paused: bool,
    last_rate_read: Instant,
}

/// Lock wrapper shared between the controller and the publisher thread.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another thread panicked mid-batch;
        // the counters are still well-formed u64s, so keep going.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of the accumulation engine and its threads.
///
/// Dropping the controller stops a running publisher thread.
pub struct Controller {
    shared: Arc<Shared>,
    publisher: Option<PublisherHandle>,
    publish_period: Duration,
}

impl Controller {
    /// Creates an idle controller for `channel_count` ingestion channels.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] for a zero or oversized count.
    pub fn new(channel_count: usize, publish_period: Duration) -> Result<Self> {
        let channels = ChannelBank::new(channel_count)?;
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    accumulator: None,
                    channels,
                    state: AcquisitionState::Idle,
                    paused: false,
                    last_rate_read: Instant::now(),
                }),
            }),
            publisher: None,
            publish_period,
        })
    }

    /// Current state machine position.
    #[must_use]
    pub fn state(&self) -> AcquisitionState {
        self.shared.lock().state
    }

    /// Recomputes the buffer layout and swaps in a fresh zero-filled
    /// buffer, discarding the previous one. Idle only.
    ///
    /// # Errors
    /// Returns [`Error::NotIdle`] while acquiring; configuration errors
    /// move the controller to the error state and are returned.
    pub fn reconfigure(&self, config: &EngineConfig) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state != AcquisitionState::Idle {
            return Err(Error::NotIdle(inner.state.name()));
        }
        match Accumulator::new(config) {
            Ok(accumulator) => {
                info!(
                    "allocated histogram buffer: {} counters, {} detectors",
                    accumulator.layout().total_size(),
                    accumulator.layout().detector_count()
                );
                inner.accumulator = Some(accumulator);
                Ok(())
            }
            Err(err) => {
                warn!("reconfigure failed: {err}");
                inner.state = AcquisitionState::Error;
                Err(err)
            }
        }
    }

    /// Loads a pixel map table for one detector. Idle only.
    ///
    /// A rejected table is a recoverable condition: mapping falls back to
    /// identity and acquisition can still start.
    ///
    /// # Errors
    /// Returns [`Error::NotIdle`], [`Error::NotAllocated`], or the table
    /// validation error.
    pub fn load_pixel_map(&self, detector: usize, table: Vec<u32>) -> Result<()> {
        let mut inner = self.idle_engine()?;
        let result = inner
            .accumulator
            .as_mut()
            .ok_or(Error::NotAllocated)?
            .load_pixel_map(detector, table);
        if let Err(ref err) = result {
            warn!("pixel map for detector {detector} rejected: {err}");
        }
        result
    }

    /// Sets a scalar TOF transform parameter for one detector. Idle only.
    ///
    /// # Errors
    /// Returns [`Error::NotIdle`], [`Error::NotAllocated`], or a
    /// parameter-slot error.
    pub fn set_transform_param(&self, detector: usize, index: usize, value: f64) -> Result<()> {
        self.idle_engine()?
            .accumulator
            .as_mut()
            .ok_or(Error::NotAllocated)?
            .set_transform_param(detector, index, value)
    }

    /// Loads a per-pixel TOF transform coefficient array. Idle only.
    ///
    /// # Errors
    /// Returns [`Error::NotIdle`], [`Error::NotAllocated`], or the array
    /// validation error.
    pub fn load_transform_array(
        &self,
        detector: usize,
        index: usize,
        values: Vec<f64>,
    ) -> Result<()> {
        self.idle_engine()?
            .accumulator
            .as_mut()
            .ok_or(Error::NotAllocated)?
            .load_transform_array(detector, index, values)
    }

    /// Starts an acquisition: zeroes the buffer and all per-acquisition
    /// counters, moves to `Acquiring`, and spawns the publisher thread
    /// feeding `sink`.
    ///
    /// # Errors
    /// Returns [`Error::NotIdle`] unless idle; starting without a buffer
    /// moves to the error state and returns [`Error::NotAllocated`].
    pub fn start(&mut self, sink: Box<dyn SnapshotSink>) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            if inner.state != AcquisitionState::Idle {
                return Err(Error::NotIdle(inner.state.name()));
            }
            let Some(accumulator) = inner.accumulator.as_mut() else {
                inner.state = AcquisitionState::Error;
                return Err(Error::NotAllocated);
            };
            accumulator.reset();
            inner.channels.reset();
            inner.paused = false;
            inner.state = AcquisitionState::Acquiring;
            inner.last_rate_read = Instant::now();
        }
        info!("acquisition started");
        self.publisher = Some(publisher::spawn(
            Arc::clone(&self.shared),
            sink,
            self.publish_period,
        ));
        Ok(())
    }

    /// Stops acquiring. A batch in flight completes first; the histogram
    /// buffer keeps its contents, only the rate counters are zeroed.
    pub fn stop(&mut self) {
        {
            let mut inner = self.shared.lock();
            if inner.state == AcquisitionState::Acquiring {
                inner.state = AcquisitionState::Idle;
            }
            if let Some(accumulator) = inner.accumulator.as_mut() {
                accumulator.drain_rate_counters();
            }
        }
        if let Some(handle) = self.publisher.take() {
            handle.stop();
        }
        info!("acquisition stopped");
    }

    /// Clears the error state and zeroes the buffer and counters.
    ///
    /// # Errors
    /// Returns [`Error::NotIdle`] while acquiring.
    pub fn reset(&mut self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state == AcquisitionState::Acquiring {
            return Err(Error::NotIdle(inner.state.name()));
        }
        if let Some(accumulator) = inner.accumulator.as_mut() {
            accumulator.reset();
        }
        inner.channels.reset();
        inner.state = AcquisitionState::Idle;
        info!("controller reset to idle");
        Ok(())
    }

    /// Pauses or resumes histogram accumulation. Integrity checks keep
    /// running while paused so sequence gaps are still observed.
    pub fn set_paused(&self, paused: bool) {
        self.shared.lock().paused = paused;
    }

    /// Ingests one batch. Returns whether the batch's events reached the
    /// histogram. See [`IngestHandle::ingest`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] for an unknown channel id.
    pub fn ingest(&self, batch: &EventBatch) -> Result<bool> {
        ingest_locked(&self.shared, batch)
    }

    /// Creates a cheap cloneable handle for feed threads to deliver
    /// batches while the controller retains the control surface.
    #[must_use]
    pub fn ingest_handle(&self) -> IngestHandle {
        IngestHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Zeroes one detector's TOF spectrum without disturbing anything
    /// else. Legal in any state.
    ///
    /// # Errors
    /// Returns [`Error::NotAllocated`] or [`Error::InvalidDetector`].
    pub fn reset_detector_tof(&self, detector: usize) -> Result<()> {
        self.shared
            .lock()
            .accumulator
            .as_mut()
            .ok_or(Error::NotAllocated)?
            .reset_detector_tof(detector)
    }

    /// Assembles an owned status view. Event rates are computed over the
    /// wall time elapsed since the previous call.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        let mut inner = self.shared.lock();
        let elapsed = inner.last_rate_read.elapsed().as_secs_f64();
        inner.last_rate_read = Instant::now();

        let state = inner.state;
        let channels = inner.channels.stats();
        let Some(accumulator) = inner.accumulator.as_mut() else {
            return Metrics {
                state,
                buffer_size: 0,
                event_rate: 0.0,
                pulse_count: 0,
                proton_charge: 0.0,
                channels,
                detectors: Vec::new(),
            };
        };

        let (global, per_detector) = accumulator.drain_rate_counters();
        let rate = |count: u64| {
            if elapsed > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                let events = count as f64;
                events / elapsed
            } else {
                0.0
            }
        };
        let detectors = accumulator
            .detector_stats()
            .iter()
            .zip(&per_detector)
            .map(|(stats, &delta)| DetectorMetrics {
                total_events: stats.total_events,
                event_rate: rate(delta),
            })
            .collect();

        Metrics {
            state,
            buffer_size: accumulator.layout().total_size(),
            event_rate: rate(global),
            pulse_count: accumulator.pulse_count(),
            proton_charge: accumulator.proton_charge_total(),
            channels,
            detectors,
        }
    }

    /// Locks the shared state for an idle-only table-load operation.
    fn idle_engine(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.shared.lock();
        if inner.state == AcquisitionState::Idle {
            Ok(inner)
        } else {
            Err(Error::NotIdle(inner.state.name()))
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(handle) = self.publisher.take() {
            handle.stop();
        }
    }
}

/// Batch delivery handle for ingestion feed threads.
#[derive(Clone)]
pub struct IngestHandle {
    shared: Arc<Shared>,
}

impl IngestHandle {
    /// Ingests one batch from a feed thread. Returns whether the batch's
    /// events reached the histogram.
    ///
    /// The whole batch is processed under one lock acquisition. Batches
    /// arriving outside an acquisition are ignored. Per-batch anomalies
    /// (malformed arrays, backwards timestamps, gaps) are absorbed into
    /// counters and never returned as errors.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] for an unknown channel id.
    pub fn ingest(&self, batch: &EventBatch) -> Result<bool> {
        ingest_locked(&self.shared, batch)
    }
}

fn ingest_locked(shared: &Shared, batch: &EventBatch) -> Result<bool> {
    let mut inner = shared.lock();
    if inner.state != AcquisitionState::Acquiring {
        return Ok(false);
    }

    if batch.validate().is_err() {
        debug!(
            "dropping malformed batch on channel {}: {} pixel ids vs {} tofs",
            batch.channel,
            batch.pixel_ids.len(),
            batch.tofs.len()
        );
        inner.channels.count_malformed(batch.channel);
        return Ok(false);
    }

    let check = inner.channels.check(batch)?;
    if !check.accepted {
        debug!(
            "dropping batch with backwards timestamp on channel {}",
            batch.channel
        );
        return Ok(false);
    }
    if check.gap > 0 {
        debug!(
            "sequence gap of {} before tag {} on channel {}",
            check.gap, batch.sequence_tag, batch.channel
        );
    }

    if inner.paused {
        return Ok(false);
    }
    if let Some(accumulator) = inner.accumulator.as_mut() {
        accumulator.process_batch(batch, check.new_pulse);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nedhist_core::{DetectorConfig, PulseTime};
    use std::sync::mpsc;

    fn config() -> EngineConfig {
        EngineConfig {
            detectors: vec![DetectorConfig {
                pixel_range_start: 0,
                pixel_range_end: 99,
                ..DetectorConfig::default()
            }],
            tof_max: 10,
        }
    }

    fn batch(tag: u32, secs: u32, pixel_ids: Vec<u32>, tofs: Vec<u32>) -> EventBatch {
        EventBatch {
            channel: 0,
            pixel_ids,
            tofs,
            sequence_tag: tag,
            timestamp: PulseTime::new(secs, 0),
            proton_charge: 1.0,
        }
    }

    fn started_controller() -> (Controller, mpsc::Receiver<crate::Snapshot>) {
        let mut controller = Controller::new(2, Duration::from_millis(5)).unwrap();
        controller.reconfigure(&config()).unwrap();
        let (tx, rx) = mpsc::channel();
        controller.start(Box::new(tx)).unwrap();
        (controller, rx)
    }

    #[test]
    fn test_state_machine_cycle() {
        let mut controller = Controller::new(1, Duration::from_secs(1)).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Idle);

        // Starting without a buffer is a fatal configuration error.
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            controller.start(Box::new(tx)),
            Err(Error::NotAllocated)
        ));
        assert_eq!(controller.state(), AcquisitionState::Error);

        // Reconfigure is refused until the error is reset.
        assert!(matches!(
            controller.reconfigure(&config()),
            Err(Error::NotIdle("error"))
        ));
        controller.reset().unwrap();
        controller.reconfigure(&config()).unwrap();

        let (tx, _rx) = mpsc::channel();
        controller.start(Box::new(tx)).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Acquiring);
        assert!(matches!(
            controller.reconfigure(&config()),
            Err(Error::NotIdle("acquiring"))
        ));

        controller.stop();
        assert_eq!(controller.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_ingest_and_metrics() {
        let (controller, _rx) = started_controller();
        assert!(controller
            .ingest(&batch(1, 10, vec![5, 5, 50], vec![3, 3, 10]))
            .unwrap());

        let metrics = controller.metrics();
        assert_eq!(metrics.state, AcquisitionState::Acquiring);
        assert_eq!(metrics.pulse_count, 1);
        assert!((metrics.proton_charge - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.detectors[0].total_events, 3);
        assert_eq!(metrics.channels[0].batch_count, 1);
    }

    #[test]
    fn test_bad_timestamp_batch_leaves_buffer_unchanged() {
        let (controller, _rx) = started_controller();
        assert!(controller.ingest(&batch(1, 100, vec![5], vec![3])).unwrap());
        let before = controller.metrics().detectors[0].total_events;

        assert!(!controller.ingest(&batch(2, 99, vec![7], vec![4])).unwrap());
        let metrics = controller.metrics();
        assert_eq!(metrics.detectors[0].total_events, before);
        assert_eq!(metrics.channels[0].bad_timestamp_count, 1);
    }

    #[test]
    fn test_ingest_ignored_when_idle() {
        let controller = Controller::new(1, Duration::from_secs(1)).unwrap();
        controller.reconfigure(&config()).unwrap();
        assert!(!controller.ingest(&batch(1, 10, vec![5], vec![3])).unwrap());
    }

    #[test]
    fn test_pause_still_tracks_sequence_gaps() {
        let (controller, _rx) = started_controller();
        controller.set_paused(true);

        assert!(!controller.ingest(&batch(5, 10, vec![5], vec![3])).unwrap());
        assert!(!controller.ingest(&batch(9, 11, vec![6], vec![4])).unwrap());

        let metrics = controller.metrics();
        assert_eq!(metrics.channels[0].missing_count, 3);
        assert_eq!(metrics.detectors[0].total_events, 0);

        controller.set_paused(false);
        assert!(controller.ingest(&batch(10, 12, vec![7], vec![5])).unwrap());
        assert_eq!(controller.metrics().detectors[0].total_events, 1);
    }

    #[test]
    fn test_malformed_batch_counted_and_dropped() {
        let (controller, _rx) = started_controller();
        let bad = EventBatch {
            tofs: vec![1],
            ..batch(1, 10, vec![5, 6], vec![0, 0])
        };
        assert!(!controller.ingest(&bad).unwrap());
        assert_eq!(controller.metrics().channels[0].malformed_count, 1);
    }

    #[test]
    fn test_publisher_emits_cumulative_snapshots() {
        let (mut controller, rx) = started_controller();
        controller.ingest(&batch(1, 10, vec![5], vec![3])).unwrap();

        // One event lands in both the spatial map and the TOF spectrum.
        let first = rx
            .iter()
            .find(|snapshot| snapshot.data.iter().sum::<u64>() == 2)
            .unwrap();

        controller.ingest(&batch(2, 11, vec![5], vec![3])).unwrap();
        let later = rx
            .iter()
            .find(|snapshot| snapshot.data.iter().sum::<u64>() == 4)
            .unwrap();
        assert!(later.sequence > first.sequence);

        // Publishing never clears the accumulator.
        assert_eq!(controller.metrics().detectors[0].total_events, 2);
        controller.stop();
    }

    #[test]
    fn test_snapshot_sequence_restarts_with_acquisition() {
        let (mut controller, rx) = started_controller();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.sequence, 1);
        controller.stop();
        drop(rx);

        let (tx, rx) = mpsc::channel();
        controller.start(Box::new(tx)).unwrap();
        let first_again = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first_again.sequence, 1);
        controller.stop();
    }
}
