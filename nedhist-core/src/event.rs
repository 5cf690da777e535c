//! Event and event-batch types for pulsed-source neutron data.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pulse timestamp as (seconds, nanoseconds) past an arbitrary epoch.
///
/// Ordering is lexicographic on (secs, nanos), which is what the
/// backwards-timestamp check relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PulseTime {
    /// Seconds past epoch.
    pub secs: u32,
    /// Nanoseconds within the second.
    pub nanos: u32,
}

impl PulseTime {
    /// Creates a new pulse timestamp.
    #[inline]
    #[must_use]
    pub fn new(secs: u32, nanos: u32) -> Self {
        Self { secs, nanos }
    }
}

/// One neutron detection: a detector-assigned pixel address and the
/// time of flight since the pulse, in raw detector units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Global pixel identifier.
    pub pixel_id: u32,
    /// Raw time of flight.
    pub tof: u32,
}

/// One pulse's worth of events from a single ingestion channel.
///
/// Pixel ids and TOF values are parallel arrays, exactly as delivered by
/// the upstream feed. The two arrays must have equal length; batches that
/// violate this are dropped by the ingestion path.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Ingestion channel this batch arrived on.
    pub channel: usize,
    /// Pixel id per event.
    pub pixel_ids: Vec<u32>,
    /// Raw time of flight per event, parallel to `pixel_ids`.
    pub tofs: Vec<u32>,
    /// Contiguous per-channel sequence tag.
    pub sequence_tag: u32,
    /// Pulse timestamp.
    pub timestamp: PulseTime,
    /// Integrated proton charge for the pulse.
    pub proton_charge: f64,
}

impl EventBatch {
    /// Number of events in this batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixel_ids.len()
    }

    /// Whether the batch carries no events.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixel_ids.is_empty()
    }

    /// Checks the parallel-array invariant.
    ///
    /// # Errors
    /// Returns [`Error::BatchLengthMismatch`] when the pixel id and TOF
    /// arrays disagree in length.
    pub fn validate(&self) -> Result<()> {
        if self.pixel_ids.len() == self.tofs.len() {
            Ok(())
        } else {
            Err(Error::BatchLengthMismatch {
                pixels: self.pixel_ids.len(),
                tofs: self.tofs.len(),
            })
        }
    }

    /// Iterates the batch as [`Event`] values.
    pub fn events(&self) -> impl Iterator<Item = Event> + '_ {
        self.pixel_ids
            .iter()
            .zip(self.tofs.iter())
            .map(|(&pixel_id, &tof)| Event { pixel_id, tof })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_time_ordering() {
        let t1 = PulseTime::new(100, 0);
        let t2 = PulseTime::new(100, 500);
        let t3 = PulseTime::new(101, 0);
        assert!(t1 < t2);
        assert!(t2 < t3);
        assert_eq!(t1, PulseTime::new(100, 0));
    }

    #[test]
    fn test_batch_validate() {
        let batch = EventBatch {
            channel: 0,
            pixel_ids: vec![1, 2, 3],
            tofs: vec![10, 20, 30],
            sequence_tag: 0,
            timestamp: PulseTime::default(),
            proton_charge: 0.0,
        };
        assert!(batch.validate().is_ok());
        assert_eq!(batch.len(), 3);

        let bad = EventBatch {
            tofs: vec![10, 20],
            ..batch
        };
        assert!(matches!(
            bad.validate(),
            Err(Error::BatchLengthMismatch { pixels: 3, tofs: 2 })
        ));
    }

    #[test]
    fn test_batch_events_iter() {
        let batch = EventBatch {
            channel: 1,
            pixel_ids: vec![5, 7],
            tofs: vec![100, 200],
            sequence_tag: 9,
            timestamp: PulseTime::new(1, 2),
            proton_charge: 1.5,
        };
        let events: Vec<Event> = batch.events().collect();
        assert_eq!(
            events,
            vec![
                Event {
                    pixel_id: 5,
                    tof: 100
                },
                Event {
                    pixel_id: 7,
                    tof: 200
                },
            ]
        );
    }
}
