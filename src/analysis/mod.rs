//! Completed-trace analysis
//!
//! Consumes a [`crate::job::Trace`] whose start and end times have been
//! filled in (by an external scheduler simulator or by
//! [`crate::job::Trace::replay_unconstrained`]) and recovers:
//!
//! - per-job-group statistics ([`stats`])
//! - per-workflow critical paths and metrics ([`workflows`])
//! - the utilization timeline and its integral ([`utilization`])
//! - capacity reserved but idle inside single-job workflows ([`waste`])
//!
//! [`report::analyze`] runs all of them and assembles an [`AnalysisReport`].

pub mod critical_path;
pub mod report;
pub mod stats;
pub mod utilization;
pub mod waste;
pub mod workflows;

pub use critical_path::{find_critical_path, CriticalPath};
pub use report::{analyze, AnalysisOptions, AnalysisReport};
pub use stats::{percentile, summarize, NumericSummary};
pub use utilization::{UtilizationEngine, UtilizationSample, UtilizationTimeline};
pub use waste::{WasteDelta, WasteExtractor, WasteReport};
pub use workflows::{TaskTracker, WorkflowMetrics, WorkflowTracker, WorkflowsExtractor};

use crate::manifest::ManifestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("parallel arrays differ in length: {starts} starts, {durations} durations, {cores} cores")]
    LengthMismatch {
        starts: usize,
        durations: usize,
        cores: usize,
    },

    #[error("utilization needs at least two samples, got {0}")]
    InsufficientSamples(usize),

    #[error("invalid analysis window [{start}, {end})")]
    InvalidWindow { start: i64, end: i64 },

    #[error("capacity must be > 0")]
    ZeroCapacity,

    #[error("waste exceeds cores in use at {timestamp} (corrected usage {cores})")]
    NegativeCorrectedUtilization { timestamp: i64, cores: i64 },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests;
