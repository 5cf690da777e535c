//! nedhist-core: Core types for event-mode neutron histogramming.
//!
//! This crate provides the foundational types shared by the accumulation
//! engine and the streaming/control layer: events and event batches as
//! delivered by the pulsed source, detector configuration, and error types.

pub mod config;
pub mod error;
pub mod event;

pub use config::{
    DetectorConfig, EngineConfig, PixelRoi, PlotMode, TofRoi, TransformKind, MAX_CHANNELS,
    MAX_DETECTORS,
};
pub use error::{Error, Result};
pub use event::{Event, EventBatch, PulseTime};
