// src/analysis/mod.rs

//! Answer analysis: signal scoring, uncertainty detection and topic coverage.
//!
//! All detectors are literal substring matchers over fixed phrase lists.

pub mod signal;
pub mod topics;
pub mod uncertainty;

pub use signal::{SignalCategory, SignalDetector, SignalResult};
pub use topics::{ESSENTIAL_TOPICS, TopicCoverage, TopicTracker};
pub use uncertainty::{
    PersonaMismatch, UncertaintyCategory, UncertaintyDetector, UncertaintyEntry,
    UncertaintyResult, UncertaintyTracker,
};
