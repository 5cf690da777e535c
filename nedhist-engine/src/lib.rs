//! nedhist-engine: the event-to-histogram accumulation core.
//!
//! # Key components
//!
//! - [`BufferLayout`] - flat-buffer address space shared by all detectors
//! - [`PixelMap`] - optional per-detector pixel index remapping
//! - [`TofTransform`] - time-of-flight to physical-unit conversion
//! - [`Accumulator`] - the per-event hot path incrementing shared counters
//!
//! The accumulator owns the counter buffer. Concurrency between ingestion
//! feeds and the snapshot publisher is handled one layer up, in
//! nedhist-stream, by holding a single lock around whole batches.

pub mod accumulate;
pub mod layout;
pub mod pixelmap;
pub mod transform;

pub use accumulate::{Accumulator, DetectorStats};
pub use layout::{BufferLayout, DetectorRegion};
pub use pixelmap::PixelMap;
pub use transform::TofTransform;
