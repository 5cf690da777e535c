//! The per-event histogram accumulation hot path.
//!
//! An [`Accumulator`] owns the flat counter buffer plus the per-detector
//! runtime tables (pixel map, TOF transform) and counters. It processes one
//! accepted batch at a time; the caller holds the shared lock for the whole
//! batch, so nothing here synchronizes.
//!
//! Index arithmetic is confined to the [`DetectorRegion`] descriptors from
//! the layout. Any computed index falling outside its region is skipped,
//! never written.

use nedhist_core::{
    DetectorConfig, EngineConfig, Error, EventBatch, PlotMode, Result, TransformKind,
};

use crate::layout::{BufferLayout, DetectorRegion};
use crate::pixelmap::PixelMap;
use crate::transform::TofTransform;

/// Observable per-detector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    /// Monotonic total over the acquisition.
    pub total_events: u64,
    /// Events since the rate counters were last drained.
    pub events_since_update: u64,
}

/// Per-detector runtime state: static config plus loaded tables and counters.
#[derive(Debug)]
struct DetectorState {
    config: DetectorConfig,
    region: DetectorRegion,
    pixel_map: Option<PixelMap>,
    transform: TofTransform,
    total_events: u64,
    events_since_update: u64,
}

/// Event-to-histogram accumulation engine for one buffer layout.
///
/// Created from a validated [`EngineConfig`]; reconfiguration means building
/// a new `Accumulator` and swapping it in while idle, which is the only way
/// the buffer size ever changes.
#[derive(Debug)]
pub struct Accumulator {
    buffer: Vec<u64>,
    layout: BufferLayout,
    detectors: Vec<DetectorState>,
    tof_max: u32,
    pulse_count: u64,
    proton_charge_total: f64,
    events_since_update: u64,
}

impl Accumulator {
    /// Computes the layout for `config` and allocates a zero-filled buffer.
    ///
    /// # Errors
    /// Returns the layout's configuration errors unchanged.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let layout = BufferLayout::compute(config)?;
        let detectors = config
            .detectors
            .iter()
            .zip(layout.regions())
            .map(|(detector_config, &region)| DetectorState {
                config: detector_config.clone(),
                region,
                pixel_map: None,
                transform: TofTransform::new(),
                total_events: 0,
                events_since_update: 0,
            })
            .collect();

        Ok(Self {
            buffer: vec![0; layout.total_size()],
            tof_max: layout.tof_max(),
            layout,
            detectors,
            pulse_count: 0,
            proton_charge_total: 0.0,
            events_since_update: 0,
        })
    }

    /// The computed address-space layout.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Read-only view of the shared counter buffer.
    #[inline]
    #[must_use]
    pub fn buffer(&self) -> &[u64] {
        &self.buffer
    }

    /// Loads and validates a pixel map table for one detector.
    ///
    /// # Errors
    /// On validation failure the whole table is rejected, any previously
    /// loaded map is cleared (mapping falls back to identity), and the
    /// validation error is returned.
    pub fn load_pixel_map(&mut self, detector: usize, table: Vec<u32>) -> Result<()> {
        let state = self
            .detectors
            .get_mut(detector)
            .ok_or(Error::InvalidDetector(detector))?;
        match PixelMap::from_table(table, state.config.pixel_count()) {
            Ok(map) => {
                state.pixel_map = Some(map);
                Ok(())
            }
            Err(err) => {
                state.pixel_map = None;
                Err(err)
            }
        }
    }

    /// Sets a scalar transform parameter for one detector.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDetector`] or a parameter-slot error.
    pub fn set_transform_param(&mut self, detector: usize, index: usize, value: f64) -> Result<()> {
        self.detectors
            .get_mut(detector)
            .ok_or(Error::InvalidDetector(detector))?
            .transform
            .set_double_param(index, value)
    }

    /// Loads a per-pixel transform coefficient array for one detector.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDetector`], a parameter-slot error, or
    /// [`Error::TransformArrayLength`] when the array does not cover the
    /// detector's pixel range.
    pub fn load_transform_array(
        &mut self,
        detector: usize,
        index: usize,
        values: Vec<f64>,
    ) -> Result<()> {
        let state = self
            .detectors
            .get_mut(detector)
            .ok_or(Error::InvalidDetector(detector))?;
        if values.len() != state.config.pixel_count() as usize {
            return Err(Error::TransformArrayLength {
                index,
                len: values.len(),
                size: state.config.pixel_count(),
            });
        }
        state.transform.set_array(index, values)
    }

    /// Processes every event in an accepted batch, then does the once-per-
    /// batch pulse accounting.
    ///
    /// `new_pulse` is true when the primary channel's timestamp changed,
    /// meaning this batch opens a new source pulse.
    pub fn process_batch(&mut self, batch: &EventBatch, new_pulse: bool) {
        for event in batch.events() {
            self.process_event(event.pixel_id, event.tof);
        }
        if new_pulse {
            self.proton_charge_total += batch.proton_charge;
            self.pulse_count += 1;
        }
    }

    /// Routes one event to its owning detector and increments counters.
    ///
    /// Events whose pixel id matches no detector range are silently
    /// dropped. Detector resolution is first-match-wins over the small
    /// configured list.
    pub fn process_event(&mut self, pixel_id: u32, raw_tof: u32) {
        let Some(det) = self
            .detectors
            .iter()
            .position(|state| state.config.contains(pixel_id))
        else {
            return;
        };
        let state = &mut self.detectors[det];
        let buffer = &mut self.buffer;
        let config = &state.config;
        let region = state.region;

        let local_raw = pixel_id - config.pixel_range_start;

        // TOF transform uses the unmapped local index; the coefficient
        // tables are keyed by the detector's native pixel numbering.
        let tof = if config.transform == TransformKind::Identity {
            f64::from(raw_tof)
        } else {
            let value = state.transform.calculate(config.transform, local_raw, raw_tof);
            if config.transform_scale >= 0.0 {
                value * config.transform_scale + config.transform_offset
            } else {
                value
            }
        };

        let local = if config.pixel_map_enabled {
            state
                .pixel_map
                .as_ref()
                .map_or(local_raw, |map| map.map(local_raw))
        } else {
            local_raw
        };

        let tof_in_range = tof >= 0.0 && tof <= f64::from(self.tof_max);

        // Spatial / 2-D accumulation. An enabled TOF ROI replaces the
        // plot-mode branching entirely: only in-window events hit the map.
        if config.tof_roi.enabled {
            let start = f64::from(config.tof_roi.start);
            let end = start + f64::from(config.tof_roi.size);
            if tof >= start && tof < end {
                increment(buffer, region.spatial_offset, region.spatial_size, u64::from(local));
            }
        } else if config.plot_mode == PlotMode::Xy {
            increment(buffer, region.spatial_offset, region.spatial_size, u64::from(local));
        } else if tof_in_range {
            let bins = config.tof_bin_count.clamp(1, self.tof_max.max(1));
            // Integer bin width; the clamp above keeps it nonzero.
            let bin_width = (self.tof_max / bins).max(1);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let tof_bin = (tof / f64::from(bin_width)).floor() as u32;
            let stride = config.pixel_row_stride.max(1);
            // The pixel-times-bins product can exceed u32 for valid
            // configurations; it must fall out of bounds, never wrap.
            let bins = u64::from(bins);
            let index = match config.plot_mode {
                PlotMode::XTof => u64::from(local % stride) * bins + u64::from(tof_bin),
                PlotMode::YTof => u64::from(local / stride) * bins + u64::from(tof_bin),
                PlotMode::PixelTof => u64::from(local) * bins + u64::from(tof_bin),
                PlotMode::Xy => unreachable!(),
            };
            increment(buffer, region.spatial_offset, region.spatial_size, index);
        }

        // TOF spectrum accumulation, independent of the spatial map. The
        // pixel ROI only means anything once mapping has normalized the
        // pixel numbering, so it is ignored when mapping is disabled.
        if tof_in_range {
            let keep = if config.pixel_roi.enabled && config.pixel_map_enabled {
                let stride = config.pixel_row_stride.max(1);
                let col = local % stride;
                let row = local / stride;
                let roi = &config.pixel_roi;
                col >= roi.start_x
                    && col < roi.start_x.saturating_add(roi.size_x)
                    && row >= roi.start_y
                    && row < roi.start_y.saturating_add(roi.size_y)
            } else {
                true
            };
            if keep {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let tof_index = tof.floor() as u64;
                increment(buffer, region.tof_offset, region.tof_size, tof_index);
            }
        }

        state.total_events += 1;
        state.events_since_update += 1;
        self.events_since_update += 1;
    }

    /// Zeroes the buffer and all per-acquisition counters. Called on
    /// acquisition (re)start and on explicit reset, never by publishing.
    pub fn reset(&mut self) {
        self.buffer.fill(0);
        self.pulse_count = 0;
        self.proton_charge_total = 0.0;
        self.events_since_update = 0;
        for state in &mut self.detectors {
            state.total_events = 0;
            state.events_since_update = 0;
        }
    }

    /// Zeroes one detector's TOF spectrum region, leaving everything else
    /// untouched.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDetector`] for an unknown detector.
    pub fn reset_detector_tof(&mut self, detector: usize) -> Result<()> {
        let state = self
            .detectors
            .get(detector)
            .ok_or(Error::InvalidDetector(detector))?;
        let region = state.region;
        self.buffer[region.tof_offset..region.tof_offset + region.tof_size].fill(0);
        Ok(())
    }

    /// Per-detector counters, in configuration order.
    #[must_use]
    pub fn detector_stats(&self) -> Vec<DetectorStats> {
        self.detectors
            .iter()
            .map(|state| DetectorStats {
                total_events: state.total_events,
                events_since_update: state.events_since_update,
            })
            .collect()
    }

    /// Drains the events-since-update counters for rate computation,
    /// returning the global count and the per-detector counts.
    pub fn drain_rate_counters(&mut self) -> (u64, Vec<u64>) {
        let global = std::mem::take(&mut self.events_since_update);
        let per_detector = self
            .detectors
            .iter_mut()
            .map(|state| std::mem::take(&mut state.events_since_update))
            .collect();
        (global, per_detector)
    }

    /// Number of pulses seen on the primary channel.
    #[inline]
    #[must_use]
    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }

    /// Integrated proton charge over the acquisition.
    #[inline]
    #[must_use]
    pub fn proton_charge_total(&self) -> f64 {
        self.proton_charge_total
    }
}

/// Bounds-checked counter increment within one detector region. The index
/// is taken in u64 so oversized candidates from the 2-D plot arithmetic
/// are rejected here instead of wrapping upstream.
#[inline]
fn increment(buffer: &mut [u64], offset: usize, size: usize, index: u64) {
    if let Ok(index) = usize::try_from(index) {
        if index < size {
            buffer[offset + index] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nedhist_core::{PixelRoi, PulseTime, TofRoi};

    fn one_detector_config(tof_max: u32) -> EngineConfig {
        EngineConfig {
            detectors: vec![DetectorConfig {
                pixel_range_start: 0,
                pixel_range_end: 99,
                ..DetectorConfig::default()
            }],
            tof_max,
        }
    }

    fn batch(pixel_ids: Vec<u32>, tofs: Vec<u32>) -> EventBatch {
        EventBatch {
            channel: 0,
            pixel_ids,
            tofs,
            sequence_tag: 0,
            timestamp: PulseTime::new(1, 0),
            proton_charge: 2.5,
        }
    }

    #[test]
    fn test_xy_accumulation_and_tof_spectrum() {
        let mut acc = Accumulator::new(&one_detector_config(10)).unwrap();
        acc.process_batch(&batch(vec![5, 5, 50], vec![3, 3, 10]), true);

        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 5], 2);
        assert_eq!(acc.buffer()[region.spatial_offset + 50], 1);
        assert_eq!(acc.buffer()[region.tof_offset + 3], 2);
        assert_eq!(acc.buffer()[region.tof_offset + 10], 1);

        assert_eq!(acc.pulse_count(), 1);
        assert!((acc.proton_charge_total() - 2.5).abs() < f64::EPSILON);
        assert_eq!(acc.detector_stats()[0].total_events, 3);
    }

    #[test]
    fn test_unrouted_events_dropped() {
        let mut acc = Accumulator::new(&one_detector_config(10)).unwrap();
        acc.process_event(100, 3);
        assert!(acc.buffer().iter().all(|&count| count == 0));
        assert_eq!(acc.detector_stats()[0].total_events, 0);
    }

    #[test]
    fn test_out_of_range_tof_excluded_from_spectrum() {
        let mut acc = Accumulator::new(&one_detector_config(10)).unwrap();
        acc.process_event(5, 11);

        let region = *acc.layout().region(0).unwrap();
        // Spatial map still counts it (XY mode does not depend on TOF).
        assert_eq!(acc.buffer()[region.spatial_offset + 5], 1);
        let tof_slice = &acc.buffer()[region.tof_offset..region.tof_offset + region.tof_size];
        assert!(tof_slice.iter().all(|&count| count == 0));
    }

    #[test]
    fn test_tof_roi_half_open_boundary() {
        let mut config = one_detector_config(100);
        config.detectors[0].tof_roi = TofRoi {
            start: 10,
            size: 5,
            enabled: true,
        };
        let mut acc = Accumulator::new(&config).unwrap();

        acc.process_event(1, 10); // inside
        acc.process_event(2, 14); // inside (last in-window value)
        acc.process_event(3, 15); // start + size: excluded
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 1], 1);
        assert_eq!(acc.buffer()[region.spatial_offset + 2], 1);
        assert_eq!(acc.buffer()[region.spatial_offset + 3], 0);

        // The TOF spectrum is unaffected by the spatial ROI filter.
        assert_eq!(acc.buffer()[region.tof_offset + 15], 1);
    }

    #[test]
    fn test_pixel_tof_plot_binning() {
        let mut config = one_detector_config(100);
        config.detectors[0].plot_mode = PlotMode::PixelTof;
        config.detectors[0].tof_bin_count = 10;
        config.detectors[0].pixel_range_size = 100 * 10;
        let mut acc = Accumulator::new(&config).unwrap();

        // bin width = 100 / 10 = 10; tof 25 lands in bin 2.
        acc.process_event(3, 25);
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 3 * 10 + 2], 1);
    }

    #[test]
    fn test_x_tof_plot_binning_and_bounds() {
        let mut config = one_detector_config(100);
        config.detectors[0].plot_mode = PlotMode::XTof;
        config.detectors[0].tof_bin_count = 4;
        config.detectors[0].pixel_row_stride = 10;
        config.detectors[0].pixel_range_size = 10 * 4;
        let mut acc = Accumulator::new(&config).unwrap();

        // local 27 -> column 7; bin width 25; tof 60 -> bin 2.
        acc.process_event(27, 60);
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 7 * 4 + 2], 1);

        // The same event also lands in the TOF spectrum.
        assert_eq!(acc.buffer()[region.tof_offset + 60], 1);
    }

    #[test]
    fn test_oversized_plot_index_skipped_not_wrapped() {
        // A large pixel range with many TOF bins pushes the pixel-times-
        // bins product past u32::MAX. The event must simply miss the
        // (small) spatial region; the TOF spectrum still counts it.
        let config = EngineConfig {
            detectors: vec![DetectorConfig {
                pixel_range_start: 0,
                pixel_range_end: 99_999,
                pixel_range_size: 1000,
                plot_mode: PlotMode::PixelTof,
                tof_bin_count: 100_000,
                ..DetectorConfig::default()
            }],
            tof_max: 100_000,
        };
        let mut acc = Accumulator::new(&config).unwrap();
        acc.process_event(99_999, 50_000);

        let region = *acc.layout().region(0).unwrap();
        let spatial =
            &acc.buffer()[region.spatial_offset..region.spatial_offset + region.spatial_size];
        assert!(spatial.iter().all(|&count| count == 0));
        assert_eq!(acc.buffer()[region.tof_offset + 50_000], 1);
        assert_eq!(acc.detector_stats()[0].total_events, 1);
    }

    #[test]
    fn test_pixel_map_applied_after_transform() {
        let mut config = one_detector_config(10);
        config.detectors[0].pixel_map_enabled = true;
        let mut acc = Accumulator::new(&config).unwrap();

        let mut table: Vec<u32> = (0..100).collect();
        table.swap(5, 6);
        acc.load_pixel_map(0, table).unwrap();

        acc.process_event(5, 3);
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 6], 1);
        assert_eq!(acc.buffer()[region.spatial_offset + 5], 0);
    }

    #[test]
    fn test_rejected_pixel_map_falls_back_to_identity() {
        let mut config = one_detector_config(10);
        config.detectors[0].pixel_map_enabled = true;
        let mut acc = Accumulator::new(&config).unwrap();

        let mut table: Vec<u32> = (0..100).collect();
        table[40] = 100; // out of range
        assert!(acc.load_pixel_map(0, table).is_err());

        acc.process_event(5, 3);
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 5], 1);
    }

    #[test]
    fn test_pixel_roi_filters_tof_spectrum_only_with_mapping() {
        let mut config = one_detector_config(100);
        config.detectors[0].pixel_row_stride = 10;
        config.detectors[0].pixel_roi = PixelRoi {
            start_x: 0,
            start_y: 0,
            size_x: 5,
            size_y: 5,
            enabled: true,
        };
        // Mapping disabled: the ROI is meaningless and the spectrum fills.
        let mut acc = Accumulator::new(&config).unwrap();
        acc.process_event(77, 3); // col 7, outside ROI
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.tof_offset + 3], 1);

        // Mapping enabled (identity table): the ROI now applies.
        config.detectors[0].pixel_map_enabled = true;
        let mut acc = Accumulator::new(&config).unwrap();
        acc.load_pixel_map(0, (0..100).collect()).unwrap();
        acc.process_event(77, 3); // col 7, filtered out
        acc.process_event(33, 4); // col 3, row 3, inside
        assert_eq!(acc.buffer()[region.tof_offset + 3], 0);
        assert_eq!(acc.buffer()[region.tof_offset + 4], 1);
    }

    #[test]
    fn test_pixel_roi_window_near_u32_max_filters_without_overflow() {
        let mut config = one_detector_config(100);
        config.detectors[0].pixel_row_stride = 10;
        config.detectors[0].pixel_map_enabled = true;
        config.detectors[0].pixel_roi = PixelRoi {
            start_x: u32::MAX - 1,
            start_y: 0,
            size_x: 10,
            size_y: 10,
            enabled: true,
        };
        let mut acc = Accumulator::new(&config).unwrap();
        acc.load_pixel_map(0, (0..100).collect()).unwrap();

        // No reachable column sits in a window starting at u32::MAX - 1;
        // every event is filtered from the spectrum, none may panic.
        acc.process_event(77, 3);
        let region = *acc.layout().region(0).unwrap();
        let tof_slice = &acc.buffer()[region.tof_offset..region.tof_offset + region.tof_size];
        assert!(tof_slice.iter().all(|&count| count == 0));
    }

    #[test]
    fn test_transform_rescale_onto_tof_axis() {
        let mut config = one_detector_config(100);
        config.detectors[0].transform = TransformKind::DspaceStatic;
        config.detectors[0].transform_scale = 10.0;
        config.detectors[0].transform_offset = 1.0;
        let mut acc = Accumulator::new(&config).unwrap();
        acc.load_transform_array(0, 0, vec![0.5; 100]).unwrap();

        // tof 8 * coeff 0.5 = 4.0; rescaled: 4 * 10 + 1 = 41.
        acc.process_event(0, 8);
        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.tof_offset + 41], 1);
    }

    #[test]
    fn test_reset_clears_buffer_and_counters() {
        let mut acc = Accumulator::new(&one_detector_config(10)).unwrap();
        acc.process_batch(&batch(vec![5], vec![3]), true);
        acc.reset();
        assert!(acc.buffer().iter().all(|&count| count == 0));
        assert_eq!(acc.pulse_count(), 0);
        assert_eq!(acc.detector_stats()[0].total_events, 0);
    }

    #[test]
    fn test_reset_detector_tof_region_only() {
        let mut acc = Accumulator::new(&one_detector_config(10)).unwrap();
        acc.process_event(5, 3);
        acc.reset_detector_tof(0).unwrap();

        let region = *acc.layout().region(0).unwrap();
        assert_eq!(acc.buffer()[region.spatial_offset + 5], 1);
        assert_eq!(acc.buffer()[region.tof_offset + 3], 0);
    }

    #[test]
    fn test_drain_rate_counters() {
        let mut acc = Accumulator::new(&one_detector_config(10)).unwrap();
        acc.process_batch(&batch(vec![5, 6], vec![3, 4]), false);
        let (global, per_detector) = acc.drain_rate_counters();
        assert_eq!(global, 2);
        assert_eq!(per_detector, vec![2]);

        let (global, _) = acc.drain_rate_counters();
        assert_eq!(global, 0);
        assert_eq!(acc.detector_stats()[0].total_events, 2);
    }
}
