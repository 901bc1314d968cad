//! Capacity reserved but idle inside single-job workflows
//!
//! A tagged bounding job holds `max_cores` for the whole workflow while its
//! tasks only use part of them at any instant. Re-expanding the manifest
//! ASAP from the job start gives the active cores over time; the difference
//! is the waste.

use super::Result;
use crate::job::JobRecord;
use crate::manifest::ManifestRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Change of the waste level at `timestamp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasteDelta {
    pub timestamp: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WasteReport {
    /// Merged deltas of all workflows, by timestamp
    pub deltas: Vec<WasteDelta>,
    /// Waste core-seconds per workflow key
    pub per_workflow: BTreeMap<String, f64>,
    pub total_core_seconds: f64,
}

/// Waste of one bounding job
#[derive(Debug, Clone, PartialEq)]
pub struct JobWaste {
    pub deltas: Vec<WasteDelta>,
    pub core_seconds: f64,
}

pub struct WasteExtractor<'a> {
    registry: &'a ManifestRegistry,
}

impl<'a> WasteExtractor<'a> {
    pub fn new(registry: &'a ManifestRegistry) -> Self {
        Self { registry }
    }

    /// Waste of a bounding job of `manifest` that ran over `[start, end)`
    /// holding `cores`. Tasks are clipped to the job end.
    pub fn job_waste(&self, manifest: &str, start: i64, end: i64, cores: u32) -> Result<JobWaste> {
        let manifest = self.registry.get(manifest)?;
        let cores = cores as i64;

        let mut events: BTreeMap<i64, i64> = BTreeMap::new();
        events.insert(start, 0);
        for task in manifest.expand_asap() {
            let (task_start, task_end) = (start + task.start, start + task.end);
            if task_start >= end {
                continue;
            }
            *events.entry(task_start).or_insert(0) += task.cores as i64;
            if task_end < end {
                *events.entry(task_end).or_insert(0) -= task.cores as i64;
            }
        }

        let mut deltas = Vec::new();
        let mut active = 0i64;
        let mut level = 0i64;
        let mut core_seconds = 0.0;
        let mut prev = start;
        for (t, change) in events {
            core_seconds += (level * (t - prev)) as f64;
            active += change;
            let next = (cores - active).max(0);
            if next != level {
                deltas.push(WasteDelta {
                    timestamp: t,
                    delta: next - level,
                });
                level = next;
            }
            prev = t;
        }
        core_seconds += (level * (end - prev)) as f64;
        if level != 0 {
            deltas.push(WasteDelta {
                timestamp: end,
                delta: -level,
            });
        }
        Ok(JobWaste {
            deltas,
            core_seconds,
        })
    }

    /// Waste of every tagged bounding job that ran. A manifest missing from
    /// the registry is an error.
    pub fn extract(&self, jobs: &[JobRecord]) -> Result<WasteReport> {
        let mut report = WasteReport::default();
        let mut merged: BTreeMap<i64, i64> = BTreeMap::new();

        for job in jobs {
            let Some(Ok(tag)) = job.workflow() else {
                continue;
            };
            if !tag.is_bounding() {
                continue;
            }
            let (Some(start), Some(end)) = (job.start_time, job.end_time) else {
                continue;
            };
            if end <= start {
                continue;
            }
            let waste = self.job_waste(&tag.manifest, start, end, job.cores())?;
            for d in &waste.deltas {
                *merged.entry(d.timestamp).or_insert(0) += d.delta;
            }
            report.total_core_seconds += waste.core_seconds;
            *report.per_workflow.entry(tag.workflow_key()).or_insert(0.0) += waste.core_seconds;
        }

        report.deltas = merged
            .into_iter()
            .filter(|&(_, delta)| delta != 0)
            .map(|(timestamp, delta)| WasteDelta { timestamp, delta })
            .collect();
        debug!(
            workflows = report.per_workflow.len(),
            core_seconds = report.total_core_seconds,
            "waste extracted"
        );
        Ok(report)
    }
}
