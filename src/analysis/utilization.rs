//! Resource utilization accounting
//!
//! Turns job allocations into a piecewise-constant timeline of cores in use
//! and integrates it as a fraction of machine capacity.
//!
//! # Example
//!
//! ```
//! use hpcload::analysis::UtilizationEngine;
//!
//! let engine = UtilizationEngine::new(144);
//! let timeline = engine.timeline(&[3001, 3002], &[4, 8], &[96, 48]).unwrap();
//! let points: Vec<(i64, i64)> = timeline
//!     .samples()
//!     .iter()
//!     .map(|s| (s.timestamp, s.cores))
//!     .collect();
//! assert_eq!(points, vec![(3001, 96), (3002, 144), (3005, 48), (3010, 0)]);
//! ```

use super::waste::WasteDelta;
use super::{AnalysisError, Result};
use crate::job::JobRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Cores in use from `timestamp` until the next sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub timestamp: i64,
    pub cores: i64,
}

/// Samples with strictly increasing timestamps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtilizationTimeline {
    samples: Vec<UtilizationSample>,
}

impl UtilizationTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample; a sample at the last timestamp overwrites it
    pub fn register(&mut self, timestamp: i64, cores: i64) {
        match self.samples.last_mut() {
            Some(last) if last.timestamp == timestamp => last.cores = cores,
            _ => self.samples.push(UtilizationSample { timestamp, cores }),
        }
    }

    pub fn samples(&self) -> &[UtilizationSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time between the first and last sample
    pub fn span(&self) -> i64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Integral of cores in use over the timeline
    pub fn core_seconds(&self) -> f64 {
        self.samples
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp) as f64 * w[0].cores as f64)
            .sum()
    }

    pub fn peak(&self) -> i64 {
        self.samples.iter().map(|s| s.cores).max().unwrap_or(0)
    }

    /// Cores in use at `t`, `None` before the first sample
    pub fn value_at(&self, t: i64) -> Option<i64> {
        let idx = self.samples.partition_point(|s| s.timestamp <= t);
        idx.checked_sub(1).map(|i| self.samples[i].cores)
    }
}

/// In-flight allocations ordered by end time
#[derive(Debug, Default)]
struct Ledger {
    in_flight: VecDeque<(i64, u32)>,
    usage: i64,
    timeline: UtilizationTimeline,
}

impl Ledger {
    fn allocate(&mut self, end: i64, cores: u32) {
        let pos = self.in_flight.partition_point(|&(e, _)| e <= end);
        self.in_flight.insert(pos, (end, cores));
        self.usage += cores as i64;
    }

    fn retire_until(&mut self, t: i64, register: bool) {
        while let Some(&(end, cores)) = self.in_flight.front() {
            if end > t {
                break;
            }
            self.in_flight.pop_front();
            self.usage -= cores as i64;
            if register {
                self.timeline.register(end, self.usage);
            }
        }
    }
}

/// Computes utilization timelines over an optional `[start_cut, end_cut)` window
#[derive(Debug, Clone)]
pub struct UtilizationEngine {
    capacity: u32,
    start_cut: Option<i64>,
    end_cut: Option<i64>,
}

impl UtilizationEngine {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            start_cut: None,
            end_cut: None,
        }
    }

    /// Restrict the timeline to a window. Jobs starting before `start_cut`
    /// only pre-load usage; jobs starting at or after `end_cut` are ignored.
    pub fn with_window(mut self, start_cut: Option<i64>, end_cut: Option<i64>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start_cut, end_cut) {
            if start >= end {
                return Err(AnalysisError::InvalidWindow { start, end });
            }
        }
        self.start_cut = start_cut;
        self.end_cut = end_cut;
        Ok(self)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Build the timeline from parallel `(start, duration, cores)` arrays
    pub fn timeline(&self, starts: &[i64], durations: &[i64], cores: &[u32]) -> Result<UtilizationTimeline> {
        if durations.len() != starts.len() || cores.len() != starts.len() {
            return Err(AnalysisError::LengthMismatch {
                starts: starts.len(),
                durations: durations.len(),
                cores: cores.len(),
            });
        }

        let mut order: Vec<usize> = (0..starts.len()).collect();
        order.sort_by_key(|&i| starts[i]);

        let mut ledger = Ledger::default();
        let mut primed = self.start_cut.is_none();
        let mut skipped = 0usize;

        for i in order {
            let (start, duration, job_cores) = (starts[i], durations[i], cores[i]);
            if duration <= 0 || job_cores == 0 {
                skipped += 1;
                continue;
            }
            if self.end_cut.is_some_and(|end| start >= end) {
                break;
            }
            if let (false, Some(cut)) = (primed, self.start_cut) {
                if start >= cut {
                    ledger.retire_until(cut, false);
                    ledger.timeline.register(cut, ledger.usage);
                    primed = true;
                }
            }
            ledger.retire_until(start, primed);
            ledger.allocate(start + duration, job_cores);
            if primed {
                ledger.timeline.register(start, ledger.usage);
            }
        }

        if let (false, Some(cut)) = (primed, self.start_cut) {
            ledger.retire_until(cut, false);
            ledger.timeline.register(cut, ledger.usage);
        }

        while let Some((end, job_cores)) = ledger.in_flight.pop_front() {
            ledger.usage -= job_cores as i64;
            if self.end_cut.map_or(true, |cut| end <= cut) {
                ledger.timeline.register(end, ledger.usage);
            }
        }
        if let Some(cut) = self.end_cut {
            if ledger.timeline.samples().last().map_or(true, |s| s.timestamp != cut) {
                ledger.timeline.register(cut, 0);
            }
        }

        if skipped > 0 {
            warn!(skipped, "jobs with zero duration or cores excluded from utilization");
        }
        debug!(samples = ledger.timeline.len(), "utilization timeline built");
        Ok(ledger.timeline)
    }

    /// Timeline of every job that ran
    pub fn timeline_for_jobs<'a>(
        &self,
        jobs: impl IntoIterator<Item = &'a JobRecord>,
    ) -> Result<UtilizationTimeline> {
        let mut starts = Vec::new();
        let mut durations = Vec::new();
        let mut cores = Vec::new();
        for job in jobs {
            if let (Some(start), Some(runtime)) = (job.start_time, job.runtime()) {
                starts.push(start);
                durations.push(runtime);
                cores.push(job.cores());
            }
        }
        self.timeline(&starts, &durations, &cores)
    }

    /// `Σ Δt_i × usage_i / (capacity × window)`
    pub fn integrate(&self, timeline: &UtilizationTimeline) -> Result<f64> {
        if timeline.len() < 2 {
            return Err(AnalysisError::InsufficientSamples(timeline.len()));
        }
        if self.capacity == 0 {
            return Err(AnalysisError::ZeroCapacity);
        }
        Ok(timeline.core_seconds() / (self.capacity as f64 * timeline.span() as f64))
    }

    /// Subtract the running waste level from the timeline.
    ///
    /// Every delta timestamp inside the timeline gets a sample (carried
    /// forward from the previous one when absent). Samples between two
    /// consecutive deltas are lowered by the level accumulated so far; the
    /// last delta's bracket runs to the end of the timeline. The closing
    /// sample spans no time and is left as is, so waste still held by a job
    /// that outlives `end_cut` does not push it below zero.
    ///
    /// A waste level above the cores in use is an error: the waste profile
    /// does not belong to this timeline.
    pub fn apply_waste(&self, timeline: &UtilizationTimeline, deltas: &[WasteDelta]) -> Result<UtilizationTimeline> {
        let mut samples = timeline.samples().to_vec();
        if samples.is_empty() || deltas.is_empty() {
            return Ok(timeline.clone());
        }
        let mut deltas = deltas.to_vec();
        deltas.sort_by_key(|d| d.timestamp);

        for delta in &deltas {
            let idx = samples.partition_point(|s| s.timestamp < delta.timestamp);
            let present = samples.get(idx).is_some_and(|s| s.timestamp == delta.timestamp);
            if !present && idx > 0 && idx < samples.len() {
                let carried = samples[idx - 1].cores;
                samples.insert(
                    idx,
                    UtilizationSample {
                        timestamp: delta.timestamp,
                        cores: carried,
                    },
                );
            }
        }

        let last = samples.len() - 1;
        let mut level = 0i64;
        for (i, delta) in deltas.iter().enumerate() {
            level += delta.delta;
            let from = samples.partition_point(|s| s.timestamp < delta.timestamp);
            let to = match deltas.get(i + 1) {
                Some(next) => samples.partition_point(|s| s.timestamp < next.timestamp),
                None => samples.len(),
            }
            .min(last);
            if from >= to {
                continue;
            }
            for sample in &mut samples[from..to] {
                sample.cores -= level;
                if sample.cores < 0 {
                    return Err(AnalysisError::NegativeCorrectedUtilization {
                        timestamp: sample.timestamp,
                        cores: sample.cores,
                    });
                }
            }
        }
        if level != 0 {
            warn!(residual = level, "waste deltas do not sum to zero");
        }

        Ok(UtilizationTimeline { samples })
    }
}
