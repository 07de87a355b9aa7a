//! Inference execution and result reduction.

pub mod executor;
pub mod reducer;

pub use executor::{normalize_output, run, validate};
pub use reducer::{reduce, ClassScore, PredictionResult, Ranking, StageTimings};
