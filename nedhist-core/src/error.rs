//! Error types for nedhist-core.

use thiserror::Error;

use crate::config::MAX_DETECTORS;

/// Result type alias for nedhist operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for nedhist operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Detector pixel range is inverted or does not fit the pixel id space.
    #[error("invalid pixel range for detector {detector}: {start}..={end}")]
    InvalidPixelRange {
        detector: usize,
        start: u32,
        end: u32,
    },

    /// Computed buffer layout has zero total size.
    #[error("buffer layout has zero total size")]
    EmptyLayout,

    /// No detectors configured.
    #[error("no detectors configured")]
    NoDetectors,

    /// Too many detectors configured.
    #[error("too many detectors: {0} (maximum is {MAX_DETECTORS})")]
    TooManyDetectors(usize),

    /// Detector index out of range.
    #[error("detector index {0} out of range")]
    InvalidDetector(usize),

    /// Channel identifier out of range.
    #[error("channel id {0} out of range")]
    InvalidChannel(usize),

    /// A pixel map entry points outside the detector's local pixel space.
    #[error("pixel map entry {value} at index {index} outside detector size {size}")]
    PixelMapOutOfRange { index: usize, value: u32, size: u32 },

    /// Pixel map table length does not match the detector's pixel range size.
    #[error("pixel map length {len} does not match detector size {size}")]
    PixelMapLength { len: usize, size: u32 },

    /// Per-pixel transform coefficient array has the wrong length.
    #[error("transform array {index} length {len} does not match detector size {size}")]
    TransformArrayLength { index: usize, len: usize, size: u32 },

    /// Transform parameter slot out of range.
    #[error("transform parameter index {0} out of range")]
    TransformParamIndex(usize),

    /// Event batch parallel arrays disagree in length.
    #[error("event batch length mismatch: {pixels} pixel ids, {tofs} tof values")]
    BatchLengthMismatch { pixels: usize, tofs: usize },

    /// No buffer has been allocated yet.
    #[error("no buffer allocated; reconfigure first")]
    NotAllocated,

    /// Operation requires the idle state.
    #[error("operation requires idle state (currently {0})")]
    NotIdle(&'static str),
}
