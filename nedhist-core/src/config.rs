//! Detector and engine configuration types.
//!
//! A small number of logical detectors share one flat counter buffer.
//! Each detector owns a contiguous pixel id range, a plot mode for its
//! spatial region, optional ROI filters, and a time-of-flight transform
//! selection. Configuration is static while acquiring; it may only change
//! while the controller is idle.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of logical detectors sharing the buffer.
pub const MAX_DETECTORS: usize = 4;

/// Maximum number of ingestion channels.
pub const MAX_CHANNELS: usize = 4;

/// What the spatial region of a detector holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotMode {
    /// Plain spatial map: one counter per local pixel.
    #[default]
    Xy,
    /// Column vs. TOF-bin map.
    XTof,
    /// Row vs. TOF-bin map.
    YTof,
    /// Pixel id vs. TOF-bin map.
    PixelTof,
}

/// Time-of-flight transform selection for a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Raw TOF is used directly.
    #[default]
    Identity,
    /// d-spacing for fixed-geometry instruments: TOF times a per-pixel
    /// coefficient.
    DspaceStatic,
    /// Energy transfer for indirect-geometry inelastic detectors.
    EnergyTransfer,
}

/// Half-open TOF region of interest `[start, start + size)` used to filter
/// which events contribute to the spatial map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TofRoi {
    pub start: u32,
    pub size: u32,
    pub enabled: bool,
}

/// Rectangular pixel region of interest in detector-local row/column space,
/// used to filter which events contribute to the TOF spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelRoi {
    pub start_x: u32,
    pub start_y: u32,
    pub size_x: u32,
    pub size_y: u32,
    pub enabled: bool,
}

/// Static description of one logical detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// First global pixel id owned by this detector.
    pub pixel_range_start: u32,
    /// Last global pixel id owned by this detector (inclusive).
    pub pixel_range_end: u32,
    /// Spatial region size in counters. Zero means "derive from the pixel
    /// range" (`end - start + 1`); 2-D plot modes need a larger region.
    pub pixel_range_size: u32,
    /// Number of TOF bins for the 2-D plot modes.
    pub tof_bin_count: u32,
    /// What the spatial region holds.
    pub plot_mode: PlotMode,
    /// Optional TOF filter for the spatial map.
    pub tof_roi: TofRoi,
    /// Optional pixel filter for the TOF spectrum.
    pub pixel_roi: PixelRoi,
    /// Row stride: number of pixels per detector row, used to derive
    /// row/column from a local pixel index.
    pub pixel_row_stride: u32,
    /// Whether the per-detector pixel map table is applied.
    pub pixel_map_enabled: bool,
    /// TOF transform selection.
    pub transform: TransformKind,
    /// Linear rescale applied after a non-identity transform, used to rebin
    /// a physical unit back onto the integer TOF axis.
    pub transform_scale: f64,
    /// Offset applied together with `transform_scale`.
    pub transform_offset: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pixel_range_start: 0,
            pixel_range_end: 0,
            pixel_range_size: 0,
            tof_bin_count: 1,
            plot_mode: PlotMode::default(),
            tof_roi: TofRoi::default(),
            pixel_roi: PixelRoi::default(),
            pixel_row_stride: 1,
            pixel_map_enabled: false,
            transform: TransformKind::default(),
            transform_scale: 1.0,
            transform_offset: 0.0,
        }
    }
}

impl DetectorConfig {
    /// Number of global pixel ids in this detector's range. `validate`
    /// rejects ranges ending at `u32::MAX`, so the inclusive count fits.
    #[inline]
    #[must_use]
    pub fn pixel_count(&self) -> u32 {
        self.pixel_range_end - self.pixel_range_start + 1
    }

    /// Spatial region size in counters, deriving the default when unset.
    #[inline]
    #[must_use]
    pub fn spatial_size(&self) -> u32 {
        if self.pixel_range_size == 0 {
            self.pixel_count()
        } else {
            self.pixel_range_size
        }
    }

    /// Whether a global pixel id falls in this detector's range.
    #[inline]
    #[must_use]
    pub fn contains(&self, pixel_id: u32) -> bool {
        pixel_id >= self.pixel_range_start && pixel_id <= self.pixel_range_end
    }

    /// Validates the pixel range.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPixelRange`] when `start > end`, or when the
    /// range ends at `u32::MAX` (the inclusive count would not fit in u32).
    pub fn validate(&self, detector: usize) -> Result<()> {
        if self.pixel_range_start > self.pixel_range_end || self.pixel_range_end == u32::MAX {
            return Err(Error::InvalidPixelRange {
                detector,
                start: self.pixel_range_start,
                end: self.pixel_range_end,
            });
        }
        Ok(())
    }
}

/// Full engine configuration: the detector list plus the global TOF axis
/// length. The TOF spectrum region for each detector holds `tof_max + 1`
/// counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logical detectors, at most [`MAX_DETECTORS`].
    pub detectors: Vec<DetectorConfig>,
    /// Largest valid value on the integer TOF axis.
    pub tof_max: u32,
}

impl EngineConfig {
    /// Validates detector count and each detector's pixel range.
    ///
    /// # Errors
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        if self.detectors.is_empty() {
            return Err(Error::NoDetectors);
        }
        if self.detectors.len() > MAX_DETECTORS {
            return Err(Error::TooManyDetectors(self.detectors.len()));
        }
        for (det, config) in self.detectors.iter().enumerate() {
            config.validate(det)?;
        }
        Ok(())
    }
}
