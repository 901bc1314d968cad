//! Submitted core-seconds, the input of share keeping and overload control

use crate::job::JobRecord;

/// Running account of submitted core-seconds.
///
/// Submissions arrive in non-decreasing time order, so trailing-window sums
/// are answered with a binary search over prefix sums.
#[derive(Debug, Clone, Default)]
pub struct SubmissionLedger {
    start: i64,
    times: Vec<i64>,
    /// `prefix[i]` is the total of the first `i` submissions
    prefix: Vec<f64>,
    workflow_core_seconds: f64,
}

impl SubmissionLedger {
    pub fn new(start: i64) -> Self {
        Self {
            start,
            times: Vec::new(),
            prefix: vec![0.0],
            workflow_core_seconds: 0.0,
        }
    }

    pub fn record(&mut self, job: &JobRecord) {
        self.add(job.submit_time, job.submitted_core_seconds(), job.is_workflow());
    }

    pub fn add(&mut self, time: i64, core_seconds: f64, workflow: bool) {
        let total = self.total_core_seconds() + core_seconds;
        self.times.push(time);
        self.prefix.push(total);
        if workflow {
            self.workflow_core_seconds += core_seconds;
        }
    }

    pub fn submissions(&self) -> usize {
        self.times.len()
    }

    pub fn total_core_seconds(&self) -> f64 {
        self.prefix.last().copied().unwrap_or(0.0)
    }

    pub fn workflow_core_seconds(&self) -> f64 {
        self.workflow_core_seconds
    }

    /// Workflow share of all submitted core-seconds, 0 before any submission
    pub fn workflow_fraction(&self) -> f64 {
        let total = self.total_core_seconds();
        if total > 0.0 {
            self.workflow_core_seconds / total
        } else {
            0.0
        }
    }

    /// Core-seconds submitted in `(now - window, now]`
    pub fn window_core_seconds(&self, now: i64, window: i64) -> f64 {
        let from = self.times.partition_point(|&t| t <= now - window);
        let to = self.times.partition_point(|&t| t <= now);
        self.prefix[to] - self.prefix[from]
    }

    /// Submitted core-seconds over the capacity available since start
    pub fn pressure(&self, now: i64, capacity_cores: u32) -> f64 {
        let elapsed = (now - self.start).max(1);
        self.total_core_seconds() / (capacity_cores as f64 * elapsed as f64)
    }

    /// Submitted core-seconds of the trailing window over the capacity of
    /// the part of the window that has elapsed
    pub fn window_pressure(&self, now: i64, window: i64, capacity_cores: u32) -> f64 {
        let elapsed = window.min(now - self.start).max(1);
        self.window_core_seconds(now, window) / (capacity_cores as f64 * elapsed as f64)
    }
}
