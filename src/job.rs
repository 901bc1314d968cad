//! Job records and traces
//!
//! A [`JobRecord`] is created by the synthesizer and becomes immutable once
//! it is appended to a [`Trace`], except for the fields an external
//! scheduler simulator fills in afterwards (`start_time`, `end_time`,
//! `allocated_cores`).

use crate::workflow_tag::{TagError, WorkflowTag, PLAIN_JOB_NAME, WORKFLOW_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dependency type understood by the external simulator
pub const AFTER_OK: &str = "afterok:";

/// One job submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    /// Submission time (epoch seconds)
    pub submit_time: i64,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Runtime the simulator executes (seconds)
    pub duration: i64,
    pub requested_cores: u32,
    /// Cores granted by the scheduler, 0 until simulated
    #[serde(default)]
    pub allocated_cores: u32,
    pub wallclock_limit_minutes: u32,
    pub user: String,
    pub qos: String,
    pub partition: String,
    pub account: String,
    /// Comma-joined `afterok:<id>` list, empty if none
    #[serde(default)]
    pub dependency_spec: String,
    /// Empty for non-workflow jobs; see [`crate::workflow_tag`]
    #[serde(default)]
    pub workflow_tag: String,
}

impl JobRecord {
    /// Name of the job as seen by the scheduler
    pub fn job_name(&self) -> String {
        if self.workflow_tag.is_empty() {
            PLAIN_JOB_NAME.to_string()
        } else {
            format!("{}{}", WORKFLOW_PREFIX, self.workflow_tag)
        }
    }

    pub fn is_workflow(&self) -> bool {
        !self.workflow_tag.is_empty()
    }

    /// Decoded workflow tag, `None` for plain jobs
    pub fn workflow(&self) -> Option<Result<WorkflowTag, TagError>> {
        if self.is_workflow() {
            Some(self.workflow_tag.parse())
        } else {
            None
        }
    }

    /// Cores actually held by the job
    pub fn cores(&self) -> u32 {
        if self.allocated_cores > 0 {
            self.allocated_cores
        } else {
            self.requested_cores
        }
    }

    /// Core-seconds the job asks for when submitted
    pub fn submitted_core_seconds(&self) -> f64 {
        self.requested_cores as f64 * self.duration as f64
    }

    /// Seconds spent queued, if the job ran
    pub fn wait_time(&self) -> Option<i64> {
        self.start_time.map(|s| s - self.submit_time)
    }

    /// Seconds spent running, if the job ran
    pub fn runtime(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Upstream job ids of an `afterok` dependency list
    pub fn dependency_ids(&self) -> Vec<u64> {
        self.dependency_spec
            .split(',')
            .filter_map(|d| d.trim().strip_prefix(AFTER_OK))
            .filter_map(|id| id.parse().ok())
            .collect()
    }
}

/// Format an `afterok` dependency list
pub fn after_ok_spec(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| format!("{}{}", AFTER_OK, id))
        .collect::<Vec<_>>()
        .join(",")
}

/// A set of jobs ordered by submit time with a secondary start-time order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    jobs: Vec<JobRecord>,
    start_order: Vec<usize>,
}

impl Trace {
    pub fn new(mut jobs: Vec<JobRecord>) -> Self {
        jobs.sort_by_key(|j| (j.submit_time, j.id));
        let mut trace = Self {
            jobs,
            start_order: Vec::new(),
        };
        trace.reindex();
        trace
    }

    fn reindex(&mut self) {
        let mut order: Vec<usize> = (0..self.jobs.len()).collect();
        // Unstarted jobs go last
        order.sort_by_key(|&i| (self.jobs[i].start_time.unwrap_or(i64::MAX), self.jobs[i].id));
        self.start_order = order;
    }

    /// Jobs by submit time
    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    /// Jobs by start time, unstarted jobs last
    pub fn by_start(&self) -> impl Iterator<Item = &JobRecord> {
        self.start_order.iter().map(move |&i| &self.jobs[i])
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_jobs(self) -> Vec<JobRecord> {
        self.jobs
    }

    /// Fill start/end times as if the machine had unlimited capacity.
    ///
    /// Each job starts at its submit time or when its last `afterok`
    /// dependency ends, whichever is later, and runs for its duration.
    /// Jobs whose dependency is not in the trace start at submission.
    pub fn replay_unconstrained(&mut self) {
        let mut ends: HashMap<u64, i64> = HashMap::with_capacity(self.jobs.len());
        // Dependencies are always submitted no later than their dependents
        for job in &mut self.jobs {
            let ready = job
                .dependency_ids()
                .iter()
                .filter_map(|id| ends.get(id))
                .copied()
                .max()
                .unwrap_or(job.submit_time);
            let start = ready.max(job.submit_time);
            let end = start + job.duration;
            job.start_time = Some(start);
            job.end_time = Some(end);
            job.allocated_cores = job.requested_cores;
            ends.insert(job.id, end);
        }
        self.reindex();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn job(id: u64, submit: i64, duration: i64, cores: u32) -> JobRecord {
        JobRecord {
            id,
            submit_time: submit,
            start_time: None,
            end_time: None,
            duration,
            requested_cores: cores,
            allocated_cores: 0,
            wallclock_limit_minutes: ((duration + 59) / 60).max(1) as u32,
            user: "user1".to_string(),
            qos: "normal".to_string(),
            partition: "main".to_string(),
            account: "account1".to_string(),
            dependency_spec: String::new(),
            workflow_tag: String::new(),
        }
    }

    pub(crate) fn ran(mut job: JobRecord, start: i64, end: i64) -> JobRecord {
        job.start_time = Some(start);
        job.end_time = Some(end);
        job.allocated_cores = job.requested_cores;
        job
    }

    #[test]
    fn test_job_name() {
        let mut j = job(1, 0, 10, 1);
        assert_eq!(j.job_name(), "sim_job");
        j.workflow_tag = "m.json-1_S0".to_string();
        assert_eq!(j.job_name(), "wf_m.json-1_S0");
        assert!(j.workflow().unwrap().is_ok());
    }

    #[test]
    fn test_dependency_ids() {
        let mut j = job(3, 0, 10, 1);
        j.dependency_spec = after_ok_spec(&[1, 2]);
        assert_eq!(j.dependency_spec, "afterok:1,afterok:2");
        assert_eq!(j.dependency_ids(), vec![1, 2]);
    }

    #[test]
    fn test_trace_orderings_hold_same_jobs() {
        let trace = Trace::new(vec![
            ran(job(2, 10, 5, 1), 30, 35),
            ran(job(1, 5, 5, 1), 40, 45),
            job(3, 20, 5, 1),
        ]);
        let by_submit: Vec<u64> = trace.jobs().iter().map(|j| j.id).collect();
        let by_start: Vec<u64> = trace.by_start().map(|j| j.id).collect();
        assert_eq!(by_submit, vec![1, 2, 3]);
        assert_eq!(by_start, vec![2, 1, 3]);
    }

    #[test]
    fn test_replay_unconstrained_honors_afterok() {
        let a = job(1, 100, 50, 4);
        let mut b = job(2, 100, 20, 4);
        b.dependency_spec = after_ok_spec(&[1]);
        let mut trace = Trace::new(vec![b, a]);
        trace.replay_unconstrained();

        let jobs = trace.jobs();
        assert_eq!(jobs[0].start_time, Some(100));
        assert_eq!(jobs[0].end_time, Some(150));
        assert_eq!(jobs[1].start_time, Some(150));
        assert_eq!(jobs[1].end_time, Some(170));
        assert_eq!(jobs[1].wait_time(), Some(50));
    }
}
