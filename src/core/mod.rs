//! Core value types shared across the pipeline: the millisecond-precision
//! media timestamp used for A/V synchronization and its per-stream
//! normalization bookkeeping.

pub mod timestamp;

pub use timestamp::{MediaTimestamp, NormalizationBase, NO_PTS};
