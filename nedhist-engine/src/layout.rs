//! Flat-buffer address space layout for multiple logical detectors.
//!
//! All detectors share one flat array of counters. The layout places every
//! detector's spatial region first, in configuration order, followed by
//! every detector's TOF spectrum region (`tof_max + 1` counters each),
//! continuing the same index space. Offsets never change while acquiring;
//! the layout is recomputed only on an idle-state reconfigure.

use log::warn;
use nedhist_core::{EngineConfig, Error, Result};

/// Per-detector slice descriptors into the shared counter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorRegion {
    /// First counter index of the spatial region.
    pub spatial_offset: usize,
    /// Spatial region length in counters.
    pub spatial_size: usize,
    /// First counter index of the TOF spectrum region.
    pub tof_offset: usize,
    /// TOF spectrum region length (`tof_max + 1`).
    pub tof_size: usize,
}

/// Computed address-space layout for one [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    regions: Vec<DetectorRegion>,
    total_size: usize,
    tof_max: u32,
}

impl BufferLayout {
    /// Computes the layout for a validated configuration.
    ///
    /// Detector pixel ranges are assumed non-overlapping; overlap is not an
    /// error (event routing is first-match-wins) but is logged since it is
    /// almost certainly a misconfiguration.
    ///
    /// # Errors
    /// Returns a configuration error for an empty detector list, an
    /// inverted pixel range, or a zero total size.
    pub fn compute(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut regions = Vec::with_capacity(config.detectors.len());
        let mut offset = 0usize;

        for det in &config.detectors {
            let spatial_size = det.spatial_size() as usize;
            regions.push(DetectorRegion {
                spatial_offset: offset,
                spatial_size,
                tof_offset: 0,
                tof_size: 0,
            });
            offset += spatial_size;
        }

        let tof_size = config.tof_max as usize + 1;
        for region in &mut regions {
            region.tof_offset = offset;
            region.tof_size = tof_size;
            offset += tof_size;
        }

        if offset == 0 {
            return Err(Error::EmptyLayout);
        }

        for (i, a) in config.detectors.iter().enumerate() {
            for (j, b) in config.detectors.iter().enumerate().skip(i + 1) {
                if a.pixel_range_start <= b.pixel_range_end
                    && b.pixel_range_start <= a.pixel_range_end
                {
                    warn!(
                        "detectors {i} and {j} have overlapping pixel ranges; \
                         events route to the first match"
                    );
                }
            }
        }

        Ok(Self {
            regions,
            total_size: offset,
            tof_max: config.tof_max,
        })
    }

    /// Total buffer length in counters.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Largest valid value on the integer TOF axis.
    #[inline]
    #[must_use]
    pub fn tof_max(&self) -> u32 {
        self.tof_max
    }

    /// Number of detector regions.
    #[inline]
    #[must_use]
    pub fn detector_count(&self) -> usize {
        self.regions.len()
    }

    /// Region descriptor for one detector.
    #[inline]
    #[must_use]
    pub fn region(&self, detector: usize) -> Option<&DetectorRegion> {
        self.regions.get(detector)
    }

    /// All region descriptors, in configuration order.
    #[inline]
    #[must_use]
    pub fn regions(&self) -> &[DetectorRegion] {
        &self.regions
    }
}
