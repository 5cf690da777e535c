//! Time-of-flight transforms.
//!
//! A transform converts `(local pixel index, raw TOF)` into a physical
//! value - d-spacing or energy transfer - using a small fixed set of scalar
//! parameters and optional per-pixel coefficient arrays loaded once from
//! external tables. The accumulator then applies a linear rescale to bring
//! the physical unit back onto the integer TOF axis.
//!
//! Degenerate inputs (missing arrays, zero TOF, non-physical coefficients)
//! yield [`TRANSFORM_ERROR`], which falls outside the TOF axis and is
//! therefore never binned.

use nedhist_core::{Error, Result, TransformKind};

/// Number of scalar and array parameter slots per transform.
pub const MAX_TRANSFORM_PARAMS: usize = 6;

/// Sentinel returned for inputs the transform cannot handle.
pub const TRANSFORM_ERROR: f64 = -9999.0;

/// Mass of the neutron in kg.
const NEUTRON_MASS_KG: f64 = 1.674_954e-27;

/// 1 eV in joules.
const EV_TO_J: f64 = 1.602_176_35e-19;

/// Raw TOF is in units of 100 ns.
const TOF_TO_S: f64 = 1e-7;

/// 1 eV in meV.
const EV_TO_MEV: f64 = 1e3;

/// Per-detector transform parameter set.
///
/// Stateless aside from its parameters, so `calculate` is safe to call
/// concurrently for different detectors.
#[derive(Debug, Clone, Default)]
pub struct TofTransform {
    double_params: [f64; MAX_TRANSFORM_PARAMS],
    arrays: [Vec<f64>; MAX_TRANSFORM_PARAMS],
}

impl TofTransform {
    /// Creates a transform with all parameters zeroed and no arrays loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one scalar parameter.
    ///
    /// # Errors
    /// Returns [`Error::TransformParamIndex`] for an out-of-range slot.
    pub fn set_double_param(&mut self, index: usize, value: f64) -> Result<()> {
        if index >= MAX_TRANSFORM_PARAMS {
            return Err(Error::TransformParamIndex(index));
        }
        self.double_params[index] = value;
        Ok(())
    }

    /// Loads one per-pixel coefficient array, replacing any previous one.
    ///
    /// # Errors
    /// Returns [`Error::TransformParamIndex`] for an out-of-range slot.
    pub fn set_array(&mut self, index: usize, values: Vec<f64>) -> Result<()> {
        if index >= MAX_TRANSFORM_PARAMS {
            return Err(Error::TransformParamIndex(index));
        }
        self.arrays[index] = values;
        Ok(())
    }

    /// Transforms a raw TOF value for one local pixel.
    ///
    /// [`TransformKind::Identity`] passes the raw TOF through unchanged;
    /// callers normally skip the call entirely in that case.
    #[must_use]
    pub fn calculate(&self, kind: TransformKind, local_pixel: u32, raw_tof: u32) -> f64 {
        match kind {
            TransformKind::Identity => f64::from(raw_tof),
            TransformKind::DspaceStatic => self.dspace_static(local_pixel, raw_tof),
            TransformKind::EnergyTransfer => self.energy_transfer(local_pixel, raw_tof),
        }
    }

    /// d-spacing for fixed-geometry instruments: raw TOF multiplied by a
    /// per-pixel coefficient from array slot 0.
    fn dspace_static(&self, local_pixel: u32, raw_tof: u32) -> f64 {
        match self.arrays[0].get(local_pixel as usize) {
            Some(&coeff) => f64::from(raw_tof) * coeff,
            None => TRANSFORM_ERROR,
        }
    }

    /// Energy transfer for indirect-geometry inelastic detectors.
    ///
    /// The final energy per pixel is fixed by the analyzer mirrors, so the
    /// incident energy follows from the measured TOF:
    ///
    /// `deltaE = (1/2) Mn (L1 / (TOF - L2 sqrt(Mn / (2 Ef))))^2 - Ef`
    ///
    /// Scalar slot 0 holds L1 in meters; array slot 0 holds Ef in meV and
    /// array slot 1 holds L2 in meters, both indexed by local pixel. The
    /// calculation runs in SI units and the result is converted to meV.
    fn energy_transfer(&self, local_pixel: u32, raw_tof: u32) -> f64 {
        let pixel = local_pixel as usize;
        let (Some(&ef_mev), Some(&l2_m)) = (self.arrays[0].get(pixel), self.arrays[1].get(pixel))
        else {
            return TRANSFORM_ERROR;
        };
        if ef_mev <= 0.0 || l2_m <= 0.0 || raw_tof == 0 {
            return TRANSFORM_ERROR;
        }

        let ef_j = (ef_mev / EV_TO_MEV) * EV_TO_J;
        let tof_s = f64::from(raw_tof) * TOF_TO_S;
        let l1_m = self.double_params[0];

        let flight_time = tof_s - l2_m * (NEUTRON_MASS_KG / (2.0 * ef_j)).sqrt();
        let ei_j = 0.5 * NEUTRON_MASS_KG * (l1_m / flight_time).powi(2);

        (ei_j - ef_j) / EV_TO_J * EV_TO_MEV
    }
}
