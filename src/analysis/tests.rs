use super::*;
use crate::config::{JobDefaults, WorkflowMode};
use crate::job::tests::{job, ran};
use crate::job::{JobRecord, Trace};
use crate::manifest::tests::TWO_TASK;
use crate::manifest::{Manifest, ManifestRegistry};
use crate::random::RandomSelector;
use crate::synth::{IdAllocator, WorkflowGenerator};
use std::sync::Arc;

fn registry() -> ManifestRegistry {
    let mut registry = ManifestRegistry::new();
    registry.insert(Manifest::from_json("two.json", TWO_TASK).unwrap());
    registry
}

/// Expanded two-task workflow submitted at 1000, replayed without contention
fn replayed_two_task() -> Trace {
    let manifest = Arc::new(Manifest::from_json("two.json", TWO_TASK).unwrap());
    let selector = RandomSelector::new(vec![1.0], vec![Arc::clone(&manifest)], None).unwrap();
    let generator = WorkflowGenerator::new(WorkflowMode::Multi, selector, JobDefaults::default());
    let mut ids = IdAllocator::new(1);
    let jobs = generator.expand(&manifest, 1000, &mut ids).unwrap();

    let mut trace = Trace::new(jobs);
    trace.replay_unconstrained();
    trace
}

fn bounding(id: u64, start: i64, end: i64) -> JobRecord {
    let mut j = ran(job(id, start, end - start, 144), start, end);
    j.workflow_tag = format!("two.json-{}", id);
    j
}

#[test]
fn test_generated_workflow_round_trip() {
    let trace = replayed_two_task();
    let mut extractor = WorkflowsExtractor::new();
    assert_eq!(extractor.extract(trace.jobs(), false), 1);

    let workflow = extractor.workflow("two.json-1").unwrap();
    assert!(workflow.is_complete());
    assert_eq!(workflow.tasks().len(), 2);
    let path = workflow.critical_path().unwrap();
    assert_eq!(path.stages, vec!["S0", "S1"]);
    assert_eq!(path.length, 220);
    assert_eq!(path.gaps, 0);

    let metrics = extractor.metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!((metrics[0].wait, metrics[0].turnaround), (0, 220));
    assert_eq!(metrics[0].stretch_factor, 0.0);
}

#[test]
fn test_extract_is_idempotent() {
    let trace = replayed_two_task();
    let mut extractor = WorkflowsExtractor::new();
    extractor.extract(trace.jobs(), false);
    let first = extractor.metrics();
    extractor.extract(trace.jobs(), false);
    assert_eq!(extractor.metrics(), first);
    assert_eq!(extractor.workflows().len(), 1);
}

#[test]
fn test_analyze_expanded_workflow() {
    let trace = replayed_two_task();
    let report = analyze(&trace, &registry(), &AnalysisOptions::new(288)).unwrap();

    assert_eq!((report.jobs, report.not_run), (2, 0));
    assert_eq!(report.job_groups.workflow.jobs, 2);
    assert_eq!(report.job_groups.baseline.jobs, 0);
    assert!(report.job_groups.baseline.runtime.is_none());
    assert_eq!(report.workflows.complete, 1);
    assert_eq!(report.workflows.per_manifest["two.json"].workflows, 1);

    // 112 cores for 120 s then 144 for 100 s over 220 s of 288 cores
    let expected = (112.0 * 120.0 + 144.0 * 100.0) / (288.0 * 220.0);
    assert!((report.utilization.integrated - expected).abs() < 1e-9);
    assert_eq!(report.utilization.corrected, report.utilization.integrated);
    assert_eq!(report.utilization.total_waste_core_seconds, 0.0);
    assert!(report.utilization.timeline.is_none());
}

#[test]
fn test_analyze_corrects_bounding_waste() {
    // queued but never started
    let waiting = job(9, 900, 50, 1);
    let trace = Trace::new(vec![bounding(1, 1000, 1220), waiting]);
    let mut options = AnalysisOptions::new(144);
    options.include_timeline = true;

    let report = analyze(&trace, &registry(), &options).unwrap();
    assert_eq!(report.not_run, 1);
    assert!((report.utilization.integrated - 1.0).abs() < 1e-9);
    assert_eq!(report.utilization.total_waste_core_seconds, 3840.0);
    let expected = 1.0 - 3840.0 / (144.0 * 220.0);
    assert!((report.utilization.corrected - expected).abs() < 1e-9);

    let corrected = report.utilization.corrected_timeline.as_ref().unwrap();
    assert_eq!(corrected.value_at(1000), Some(112));
    assert_eq!(corrected.value_at(1120), Some(144));
}

#[test]
fn test_analyze_unknown_manifest_fails() {
    let mut j = bounding(1, 0, 100);
    j.workflow_tag = "other.json-1".to_string();
    let trace = Trace::new(vec![j]);
    assert!(matches!(
        analyze(&trace, &registry(), &AnalysisOptions::new(144)),
        Err(AnalysisError::Manifest(_))
    ));
}

#[test]
fn test_analyze_empty_trace_is_insufficient() {
    let trace = Trace::new(Vec::new());
    assert!(matches!(
        analyze(&trace, &registry(), &AnalysisOptions::new(144)),
        Err(AnalysisError::InsufficientSamples(0))
    ));
}

#[test]
fn test_report_renders() {
    let report = analyze(&replayed_two_task(), &registry(), &AnalysisOptions::new(288)).unwrap();
    let text = report.render_text();
    assert!(text.contains("=== Workflows (1 tracked, 1 complete"));
    assert!(text.contains("two.json (1 workflows)"));
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["workflows"]["instances"][0]["critical_path"][1], "S1");
}
