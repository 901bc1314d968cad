//! Assembled analysis of a completed trace
//!
//! [`analyze`] runs the job statistics, the workflow extractor, the waste
//! extractor and the utilization engine over one trace. Jobs that never ran
//! are counted and excluded; a workflow whose manifest is unknown, or a
//! trace too short to integrate, is an error.

use super::stats::{summarize, NumericSummary};
use super::utilization::{UtilizationEngine, UtilizationTimeline};
use super::waste::WasteExtractor;
use super::workflows::{WorkflowMetrics, WorkflowsExtractor};
use super::Result;
use crate::job::{JobRecord, Trace};
use crate::manifest::ManifestRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Runtimes below this many seconds are raised to it for slowdown
pub const SLOWDOWN_MIN_RUNTIME: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub capacity_cores: u32,
    /// Jobs starting earlier only pre-load the utilization timeline
    pub start_cut: Option<i64>,
    /// Jobs starting at or after this are left out of the utilization timeline
    pub end_cut: Option<i64>,
    /// Keep the full timelines in the report
    pub include_timeline: bool,
}

impl AnalysisOptions {
    pub fn new(capacity_cores: u32) -> Self {
        Self {
            capacity_cores,
            start_cut: None,
            end_cut: None,
            include_timeline: false,
        }
    }
}

/// Summaries over one group of jobs; `None` when the group is empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobGroupStats {
    pub jobs: usize,
    pub runtime: Option<NumericSummary>,
    pub wait: Option<NumericSummary>,
    pub turnaround: Option<NumericSummary>,
    /// Requested wallclock limit in minutes
    pub wallclock_requested: Option<NumericSummary>,
    pub allocated_cores: Option<NumericSummary>,
    /// `(wait + runtime) / max(runtime, SLOWDOWN_MIN_RUNTIME)`
    pub slowdown: Option<NumericSummary>,
}

impl JobGroupStats {
    fn from_jobs<'a>(jobs: impl Iterator<Item = &'a JobRecord>) -> Self {
        let mut runtime = Vec::new();
        let mut wait = Vec::new();
        let mut turnaround = Vec::new();
        let mut wallclock = Vec::new();
        let mut cores = Vec::new();
        let mut slowdown = Vec::new();

        for job in jobs {
            let (Some(run), Some(queued)) = (job.runtime(), job.wait_time()) else {
                continue;
            };
            runtime.push(run as f64);
            wait.push(queued as f64);
            turnaround.push((run + queued) as f64);
            wallclock.push(job.wallclock_limit_minutes as f64);
            cores.push(job.cores() as f64);
            slowdown.push((run + queued) as f64 / run.max(SLOWDOWN_MIN_RUNTIME) as f64);
        }

        Self {
            jobs: runtime.len(),
            runtime: summarize(&runtime),
            wait: summarize(&wait),
            turnaround: summarize(&turnaround),
            wallclock_requested: summarize(&wallclock),
            allocated_cores: summarize(&cores),
            slowdown: summarize(&slowdown),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobGroups {
    pub all: JobGroupStats,
    pub baseline: JobGroupStats,
    pub workflow: JobGroupStats,
}

/// Summaries over a set of complete workflows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGroupStats {
    pub workflows: usize,
    pub runtime: Option<NumericSummary>,
    pub wait: Option<NumericSummary>,
    pub turnaround: Option<NumericSummary>,
    pub stretch_factor: Option<NumericSummary>,
    pub critical_path_length: Option<NumericSummary>,
    pub cores: Option<NumericSummary>,
}

impl WorkflowGroupStats {
    fn from_metrics<'a>(metrics: impl Iterator<Item = &'a WorkflowMetrics>) -> Self {
        let metrics: Vec<&WorkflowMetrics> = metrics.collect();
        let column = |f: fn(&WorkflowMetrics) -> f64| -> Option<NumericSummary> {
            summarize(&metrics.iter().map(|m| f(m)).collect::<Vec<_>>())
        };
        Self {
            workflows: metrics.len(),
            runtime: column(|m| m.runtime as f64),
            wait: column(|m| m.wait as f64),
            turnaround: column(|m| m.turnaround as f64),
            stretch_factor: column(|m| m.stretch_factor),
            critical_path_length: column(|m| m.critical_path.len() as f64),
            cores: column(|m| m.cores as f64),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowsReport {
    pub tracked: usize,
    pub complete: usize,
    pub incomplete: usize,
    /// Jobs whose name carried an undecodable tag
    pub malformed_tags: usize,
    pub overall: WorkflowGroupStats,
    pub per_manifest: BTreeMap<String, WorkflowGroupStats>,
    pub instances: Vec<WorkflowMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReport {
    pub capacity_cores: u32,
    /// Fraction of capacity in use over the timeline span
    pub integrated: f64,
    /// Same, with capacity idle inside single-job workflows removed
    pub corrected: f64,
    pub total_waste_core_seconds: f64,
    pub waste_per_workflow: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<UtilizationTimeline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_timeline: Option<UtilizationTimeline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub jobs: usize,
    /// Jobs without start and end times
    pub not_run: usize,
    pub job_groups: JobGroups,
    pub workflows: WorkflowsReport,
    pub utilization: UtilizationReport,
}

impl AnalysisReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

/// Analyze a completed trace
pub fn analyze(trace: &Trace, registry: &ManifestRegistry, options: &AnalysisOptions) -> Result<AnalysisReport> {
    let jobs = trace.jobs();
    let not_run = jobs.iter().filter(|j| j.runtime().is_none()).count();
    if not_run > 0 {
        warn!(not_run, "jobs without start or end time excluded");
    }

    let job_groups = JobGroups {
        all: JobGroupStats::from_jobs(jobs.iter()),
        baseline: JobGroupStats::from_jobs(jobs.iter().filter(|j| !j.is_workflow())),
        workflow: JobGroupStats::from_jobs(jobs.iter().filter(|j| j.is_workflow())),
    };

    let mut extractor = WorkflowsExtractor::new();
    let tracked = extractor.extract(jobs, false);
    let instances = extractor.metrics();
    let mut per_manifest: BTreeMap<String, Vec<&WorkflowMetrics>> = BTreeMap::new();
    for m in &instances {
        per_manifest.entry(m.manifest.clone()).or_default().push(m);
    }
    let workflows = WorkflowsReport {
        tracked,
        complete: instances.len(),
        incomplete: extractor.incomplete_count(),
        malformed_tags: extractor.malformed_count(),
        overall: WorkflowGroupStats::from_metrics(instances.iter()),
        per_manifest: per_manifest
            .into_iter()
            .map(|(name, ms)| (name, WorkflowGroupStats::from_metrics(ms.into_iter())))
            .collect(),
        instances,
    };

    let waste = WasteExtractor::new(registry).extract(jobs)?;
    let engine = UtilizationEngine::new(options.capacity_cores).with_window(options.start_cut, options.end_cut)?;
    let timeline = engine.timeline_for_jobs(trace.by_start())?;
    let integrated = engine.integrate(&timeline)?;
    let corrected_timeline = engine.apply_waste(&timeline, &waste.deltas)?;
    let corrected = engine.integrate(&corrected_timeline)?;

    info!(
        jobs = jobs.len(),
        workflows = workflows.complete,
        utilization = integrated,
        corrected,
        "trace analyzed"
    );

    let (timeline, corrected_timeline) = if options.include_timeline {
        (Some(timeline), Some(corrected_timeline))
    } else {
        (None, None)
    };
    Ok(AnalysisReport {
        jobs: jobs.len(),
        not_run,
        job_groups,
        workflows,
        utilization: UtilizationReport {
            capacity_cores: options.capacity_cores,
            integrated,
            corrected,
            total_waste_core_seconds: waste.total_core_seconds,
            waste_per_workflow: waste.per_workflow,
            timeline,
            corrected_timeline,
        },
    })
}

fn write_summary(f: &mut fmt::Formatter<'_>, label: &str, summary: &Option<NumericSummary>) -> fmt::Result {
    match summary {
        Some(s) => writeln!(
            f,
            "  {:<20} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
            label, s.mean, s.std, s.min, s.median, s.p95, s.max
        ),
        None => writeln!(f, "  {:<20} {:>12}", label, "-"),
    }
}

fn write_header(f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
        f,
        "  {:<20} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "metric", "mean", "std", "min", "median", "p95", "max"
    )
}

impl fmt::Display for JobGroupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f)?;
        write_summary(f, "runtime (s)", &self.runtime)?;
        write_summary(f, "wait (s)", &self.wait)?;
        write_summary(f, "turnaround (s)", &self.turnaround)?;
        write_summary(f, "wallclock (min)", &self.wallclock_requested)?;
        write_summary(f, "cores", &self.allocated_cores)?;
        write_summary(f, "slowdown", &self.slowdown)
    }
}

impl fmt::Display for WorkflowGroupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f)?;
        write_summary(f, "runtime (s)", &self.runtime)?;
        write_summary(f, "wait (s)", &self.wait)?;
        write_summary(f, "turnaround (s)", &self.turnaround)?;
        write_summary(f, "stretch factor", &self.stretch_factor)?;
        write_summary(f, "critical path", &self.critical_path_length)?;
        write_summary(f, "cores", &self.cores)
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Jobs ({} total, {} not run) ===", self.jobs, self.not_run)?;
        for (name, group) in [
            ("all", &self.job_groups.all),
            ("baseline", &self.job_groups.baseline),
            ("workflow", &self.job_groups.workflow),
        ] {
            writeln!(f, "\n{} ({} jobs):", name, group.jobs)?;
            write!(f, "{}", group)?;
        }

        let wf = &self.workflows;
        writeln!(
            f,
            "\n=== Workflows ({} tracked, {} complete, {} incomplete, {} malformed tags) ===",
            wf.tracked, wf.complete, wf.incomplete, wf.malformed_tags
        )?;
        if wf.complete > 0 {
            writeln!(f, "\noverall:")?;
            write!(f, "{}", wf.overall)?;
            for (manifest, group) in &wf.per_manifest {
                writeln!(f, "\n{} ({} workflows):", manifest, group.workflows)?;
                write!(f, "{}", group)?;
            }
        }

        let u = &self.utilization;
        writeln!(f, "\n=== Utilization ({} cores) ===", u.capacity_cores)?;
        writeln!(f, "  integrated:  {:.4}", u.integrated)?;
        writeln!(f, "  corrected:   {:.4}", u.corrected)?;
        writeln!(f, "  waste:       {:.0} core-s", u.total_waste_core_seconds)
    }
}
