//! Per-channel sequence and timestamp integrity checking.
//!
//! Each ingestion channel delivers batches tagged with a pulse timestamp
//! and a contiguous sequence tag. Delivery order is not guaranteed
//! upstream, so every batch is checked here: a backwards timestamp drops
//! the batch, a sequence gap is counted but the batch still processes -
//! the gap is data already lost, not a reason to lose more. Nothing ever
//! retries.

use serde::Serialize;

use nedhist_core::{Error, EventBatch, PulseTime, Result, MAX_CHANNELS};

/// The channel whose timestamp changes delimit source pulses.
pub const PRIMARY_CHANNEL: usize = 0;

/// Outcome of checking one batch against its channel's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCheck {
    /// Whether the batch should be processed.
    pub accepted: bool,
    /// Number of sequence tags missing before this batch.
    pub gap: u32,
    /// False when the batch carried a backwards timestamp.
    pub timestamp_ok: bool,
    /// True when this batch opens a new pulse on the primary channel.
    pub new_pulse: bool,
}

/// Integrity-tracking state for one ingestion channel.
#[derive(Debug, Clone, Default)]
struct ChannelState {
    last_sequence_tag: Option<u32>,
    last_timestamp: Option<PulseTime>,
    missing_count: u32,
    bad_timestamp_count: u32,
    malformed_count: u32,
    batch_count: u64,
}

/// Observable per-channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Batches seen since the last acquisition start.
    pub batch_count: u64,
    /// Sum of all sequence gap sizes.
    pub missing_count: u32,
    /// Batches dropped for a backwards timestamp.
    pub bad_timestamp_count: u32,
    /// Batches dropped for malformed parallel arrays.
    pub malformed_count: u32,
    /// Last accepted sequence tag, if any.
    pub last_sequence_tag: Option<u32>,
}

/// Sequence/timestamp integrity monitor for all ingestion channels.
#[derive(Debug)]
pub struct ChannelBank {
    channels: Vec<ChannelState>,
}

impl ChannelBank {
    /// Creates a bank for `count` channels.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] when `count` is zero or exceeds
    /// [`MAX_CHANNELS`].
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 || count > MAX_CHANNELS {
            return Err(Error::InvalidChannel(count));
        }
        Ok(Self {
            channels: vec![ChannelState::default(); count],
        })
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the bank has no channels. Construction forbids this; the
    /// method exists for API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Validates one batch against its channel's history and updates the
    /// channel state.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] for an unknown channel id.
    pub fn check(&mut self, batch: &EventBatch) -> Result<BatchCheck> {
        let state = self
            .channels
            .get_mut(batch.channel)
            .ok_or(Error::InvalidChannel(batch.channel))?;
        state.batch_count += 1;

        // A pulse boundary is a timestamp change on the primary channel.
        // The first batch ever seen also counts as a new pulse.
        let new_pulse =
            batch.channel == PRIMARY_CHANNEL && state.last_timestamp != Some(batch.timestamp);

        if let Some(last) = state.last_timestamp {
            if batch.timestamp < last {
                state.bad_timestamp_count += 1;
                return Ok(BatchCheck {
                    accepted: false,
                    gap: 0,
                    timestamp_ok: false,
                    new_pulse: false,
                });
            }
        }
        state.last_timestamp = Some(batch.timestamp);

        let mut gap = 0;
        if let Some(last) = state.last_sequence_tag {
            let expected = last.wrapping_add(1);
            if batch.sequence_tag != expected {
                gap = batch.sequence_tag.wrapping_sub(expected);
                state.missing_count = state.missing_count.saturating_add(gap);
            }
        }
        state.last_sequence_tag = Some(batch.sequence_tag);

        Ok(BatchCheck {
            accepted: true,
            gap,
            timestamp_ok: true,
            new_pulse,
        })
    }

    /// Counts a batch dropped before integrity checking (malformed
    /// parallel arrays).
    pub fn count_malformed(&mut self, channel: usize) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.malformed_count += 1;
        }
    }

    /// Clears all channel history and counters. Called on acquisition
    /// (re)start.
    pub fn reset(&mut self) {
        for state in &mut self.channels {
            *state = ChannelState::default();
        }
    }

    /// Observable counters for every channel.
    #[must_use]
    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channels
            .iter()
            .map(|state| ChannelStats {
                batch_count: state.batch_count,
                missing_count: state.missing_count,
                bad_timestamp_count: state.bad_timestamp_count,
                malformed_count: state.malformed_count,
                last_sequence_tag: state.last_sequence_tag,
            })
            .collect()
    }
}
