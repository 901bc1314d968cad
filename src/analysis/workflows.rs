//! Workflow reconstruction from a flat job set
//!
//! Jobs named `wf_...` are grouped by workflow key into [`WorkflowTracker`]s.
//! Each staged job becomes a [`TaskTracker`]; the stage-less bounding job of
//! a single-job workflow becomes the tracker's parent. A workflow that
//! references a stage absent from the trace, or contains a job that never
//! ran, is incomplete and excluded from metrics.

use super::critical_path::{find_critical_path, CriticalPath};
use crate::job::JobRecord;
use crate::workflow_tag::WorkflowTag;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One job's role in a workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTracker {
    pub job_id: u64,
    /// `None` for the bounding job
    pub stage: Option<String>,
    /// Upstream stage ids
    pub deps: Vec<String>,
    /// Indices of downstream tasks, filled by dependency resolution
    pub dependencies_to: Vec<usize>,
    pub submit_time: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub cores: u32,
}

impl TaskTracker {
    fn from_job(job: &JobRecord, tag: WorkflowTag) -> Self {
        Self {
            job_id: job.id,
            stage: tag.stage,
            deps: tag.deps,
            dependencies_to: Vec::new(),
            submit_time: job.submit_time,
            start_time: job.start_time,
            end_time: job.end_time,
            cores: job.cores(),
        }
    }

    pub fn stage_id(&self) -> &str {
        self.stage.as_deref().unwrap_or("")
    }

    pub fn has_run(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_some()
    }

    pub fn start(&self) -> i64 {
        self.start_time.unwrap_or(self.submit_time)
    }

    pub fn end(&self) -> i64 {
        self.end_time.unwrap_or_else(|| self.start())
    }

    pub fn runtime(&self) -> i64 {
        self.end() - self.start()
    }

    pub fn wait(&self) -> i64 {
        self.start() - self.submit_time
    }

    #[cfg(test)]
    pub(crate) fn for_test(stage: &str, start: i64, end: i64) -> Self {
        Self {
            job_id: 0,
            stage: Some(stage.to_string()),
            deps: Vec::new(),
            dependencies_to: Vec::new(),
            submit_time: start,
            start_time: Some(start),
            end_time: Some(end),
            cores: 1,
        }
    }
}

/// Scored workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub key: String,
    pub manifest: String,
    pub instance_id: u64,
    pub tasks: usize,
    /// Widest job of the workflow
    pub cores: u32,
    pub submit_time: i64,
    /// Critical path length, queue gaps between tasks included
    pub runtime: i64,
    pub wait: i64,
    pub turnaround: i64,
    /// (initial wait + gaps) / turnaround
    pub stretch_factor: f64,
    pub critical_path: Vec<String>,
}

/// All jobs of one workflow instance
#[derive(Debug, Clone)]
pub struct WorkflowTracker {
    key: String,
    manifest: String,
    instance_id: u64,
    parent: Option<TaskTracker>,
    tasks: Vec<TaskTracker>,
    index: HashMap<String, usize>,
    /// Conflicting jobs (duplicate stage or bounding job) seen
    conflict: bool,
    incomplete: bool,
    critical_path: Option<CriticalPath>,
}

impl WorkflowTracker {
    fn new(tag: &WorkflowTag) -> Self {
        Self {
            key: tag.workflow_key(),
            manifest: tag.manifest.clone(),
            instance_id: tag.instance_id,
            parent: None,
            tasks: Vec::new(),
            index: HashMap::new(),
            conflict: false,
            incomplete: false,
            critical_path: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn manifest(&self) -> &str {
        &self.manifest
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn parent(&self) -> Option<&TaskTracker> {
        self.parent.as_ref()
    }

    /// Staged tasks in discovery order
    pub fn tasks(&self) -> &[TaskTracker] {
        &self.tasks
    }

    pub fn task(&self, stage: &str) -> Option<&TaskTracker> {
        self.index.get(stage).map(|&i| &self.tasks[i])
    }

    pub fn is_complete(&self) -> bool {
        !self.incomplete
    }

    pub fn critical_path(&self) -> Option<&CriticalPath> {
        self.critical_path.as_ref()
    }

    fn add(&mut self, task: TaskTracker) {
        match task.stage.clone() {
            None => {
                if self.parent.is_some() {
                    warn!(workflow = %self.key, job = task.job_id, "second bounding job, workflow excluded");
                    self.conflict = true;
                }
                self.parent = Some(task);
            }
            Some(stage) => {
                if self.index.contains_key(&stage) {
                    warn!(workflow = %self.key, %stage, "duplicate stage, workflow excluded");
                    self.conflict = true;
                    return;
                }
                self.index.insert(stage, self.tasks.len());
                self.tasks.push(task);
            }
        }
    }

    /// Attach forward edges and score the workflow
    fn resolve(&mut self) {
        self.incomplete = self.conflict;
        for task in &mut self.tasks {
            task.dependencies_to.clear();
        }
        for i in 0..self.tasks.len() {
            let deps = self.tasks[i].deps.clone();
            for dep in &deps {
                match self.index.get(dep) {
                    Some(&upstream) => self.tasks[upstream].dependencies_to.push(i),
                    None => {
                        debug!(workflow = %self.key, stage = %dep, "missing upstream stage");
                        self.incomplete = true;
                    }
                }
            }
        }

        let all_ran = self.tasks.iter().all(TaskTracker::has_run)
            && self.parent.as_ref().map_or(true, TaskTracker::has_run);
        if !all_ran {
            self.incomplete = true;
        }

        self.critical_path = None;
        if self.incomplete {
            return;
        }
        self.critical_path = if self.tasks.is_empty() {
            self.parent.as_ref().map(|p| CriticalPath {
                stages: Vec::new(),
                length: p.runtime(),
                compute: p.runtime(),
                gaps: 0,
            })
        } else {
            find_critical_path(&self.tasks)
        };
        if self.critical_path.is_none() {
            warn!(workflow = %self.key, "cyclic stage dependencies, workflow excluded");
            self.incomplete = true;
        }
    }

    /// Metrics of a complete workflow
    pub fn metrics(&self) -> Option<WorkflowMetrics> {
        if self.incomplete {
            return None;
        }
        let path = self.critical_path.as_ref()?;
        let first = match (&self.parent, path.stages.first()) {
            (Some(parent), _) => parent,
            (None, Some(stage)) => self.task(stage)?,
            (None, None) => return None,
        };
        let wait = first.wait();
        let runtime = path.length;
        let turnaround = runtime + wait;
        let stretch_factor = if turnaround > 0 {
            (wait + path.gaps) as f64 / turnaround as f64
        } else {
            0.0
        };
        let jobs = self.parent.iter().chain(self.tasks.iter());
        let cores = jobs.clone().map(|t| t.cores).max().unwrap_or(0);
        let submit_time = jobs.map(|t| t.submit_time).min().unwrap_or(0);

        Some(WorkflowMetrics {
            key: self.key.clone(),
            manifest: self.manifest.clone(),
            instance_id: self.instance_id,
            tasks: self.tasks.len().max(1),
            cores,
            submit_time,
            runtime,
            wait,
            turnaround,
            stretch_factor,
            critical_path: path.stages.clone(),
        })
    }
}

/// Groups workflow jobs into trackers
#[derive(Debug, Clone, Default)]
pub struct WorkflowsExtractor {
    workflows: Vec<WorkflowTracker>,
    index: HashMap<String, usize>,
    seen_jobs: HashSet<u64>,
    malformed: usize,
}

impl WorkflowsExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `jobs` for workflow members and rebuild every tracker.
    ///
    /// Without `append` all previous state is dropped first, so repeated
    /// calls on the same input give the same trackers. Returns the number
    /// of workflows tracked.
    pub fn extract(&mut self, jobs: &[JobRecord], append: bool) -> usize {
        if !append {
            *self = Self::default();
        }

        for job in jobs {
            let Some(parsed) = job.workflow() else {
                continue;
            };
            let tag = match parsed {
                Ok(tag) => tag,
                Err(e) => {
                    warn!(job = job.id, error = %e, "malformed workflow tag");
                    self.malformed += 1;
                    continue;
                }
            };
            if !self.seen_jobs.insert(job.id) {
                debug!(job = job.id, "job already tracked");
                continue;
            }
            let key = tag.workflow_key();
            let idx = match self.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    self.workflows.push(WorkflowTracker::new(&tag));
                    self.index.insert(key, self.workflows.len() - 1);
                    self.workflows.len() - 1
                }
            };
            self.workflows[idx].add(TaskTracker::from_job(job, tag));
        }

        for workflow in &mut self.workflows {
            workflow.resolve();
        }
        debug!(
            workflows = self.workflows.len(),
            incomplete = self.incomplete_count(),
            malformed = self.malformed,
            "workflows extracted"
        );
        self.workflows.len()
    }

    /// Trackers in discovery order
    pub fn workflows(&self) -> &[WorkflowTracker] {
        &self.workflows
    }

    pub fn workflow(&self, key: &str) -> Option<&WorkflowTracker> {
        self.index.get(key).map(|&i| &self.workflows[i])
    }

    pub fn incomplete_count(&self) -> usize {
        self.workflows.iter().filter(|w| !w.is_complete()).count()
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Metrics of every complete workflow
    pub fn metrics(&self) -> Vec<WorkflowMetrics> {
        self.workflows.iter().filter_map(WorkflowTracker::metrics).collect()
    }
}
