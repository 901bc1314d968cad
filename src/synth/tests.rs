use super::*;
use crate::config::PatternConfig;
use crate::manifest::tests::TWO_TASK;
use crate::manifest::Manifest;

fn config(extra: &str) -> ExperimentConfig {
    let text = format!(
        r#"
        seed = 42
        start = 0
        run_limit_s = 100
        first_job_id = 1000

        [system]
        capacity_cores = 288

        [clock]
        inter_arrival = {{ kind = "constant", value = 10.0 }}

        {}
        "#,
        extra
    );
    toml::from_str(&text).unwrap()
}

const MULTI_WORKFLOWS: &str = r#"
    [workflows]
    mode = "multi"
    shares = [{ manifest = "two.json", share = 1.0 }]
"#;

fn registry() -> ManifestRegistry {
    let mut registry = ManifestRegistry::new();
    registry.insert(Manifest::from_json("two.json", TWO_TASK).unwrap());
    registry
}

#[test]
fn test_baseline_only_run() {
    let config = config("");
    let mut synth = Synthesizer::from_config(&config, &ManifestRegistry::new()).unwrap();
    let jobs = synth.run().unwrap();

    // ticks at 10, 20, ..., 90; the tick reaching 100 ends the run
    assert_eq!(jobs.len(), 9);
    let ids: Vec<u64> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids, (1000..1009).collect::<Vec<_>>());
    assert!(jobs.iter().all(|j| !j.is_workflow() && j.submit_time < 100));
    assert_eq!(synth.ledger().submissions(), 9);
    assert_eq!(synth.clock().now(), 100);
}

#[test]
fn test_same_seed_same_trace() {
    let mut config = config(
        r#"
        [baseline]
        cores = { kind = "uniform", low = 1.0, high = 200.0 }
        wallclock_minutes = { kind = "exponential", mean = 30.0 }
        accuracy = { kind = "uniform", low = 0.1, high = 1.0 }
        "#,
    );
    config.clock.inter_arrival = crate::random::DistributionSpec::Exponential { mean: 5.0 };
    config.run_limit_s = 1000;

    let first = Synthesizer::from_config(&config, &registry()).unwrap().run().unwrap();
    let second = Synthesizer::from_config(&config, &registry()).unwrap().run().unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);

    config.seed = 43;
    let other = Synthesizer::from_config(&config, &registry()).unwrap().run().unwrap();
    assert_ne!(first, other);
}

#[test]
fn test_job_limit() {
    let mut config = config("");
    config.job_limit = Some(3);
    let jobs = Synthesizer::from_config(&config, &registry()).unwrap().run().unwrap();
    assert_eq!(jobs.len(), 3);
}

#[test]
fn test_random_selection_multi_workflows() {
    let config = config(&format!(
        "{}\n[selection]\npolicy = \"random\"\nworkflow_share = 1.0\n",
        MULTI_WORKFLOWS
    ));
    let jobs = Synthesizer::from_config(&config, &registry()).unwrap().run().unwrap();
    assert_eq!(jobs.len(), 18);
    for pair in jobs.chunks(2) {
        assert_eq!(pair[0].dependency_spec, "");
        assert_eq!(pair[1].dependency_spec, format!("afterok:{}", pair[0].id));
        let tag = pair[1].workflow().unwrap().unwrap();
        assert_eq!(tag.instance_id, pair[0].id);
        assert_eq!(tag.deps, vec!["S0"]);
    }
}

#[test]
fn test_percent_selection_keeps_share() {
    let mut config = config(&format!(
        "{}\n[selection]\npolicy = \"percent\"\nworkflow_share = 0.5\npressure_cap = 1000.0\n",
        MULTI_WORKFLOWS
    ));
    config.run_limit_s = 20_000;
    let mut synth = Synthesizer::from_config(&config, &registry()).unwrap();
    let jobs = synth.run().unwrap();
    assert!(jobs.iter().any(|j| j.is_workflow()));
    assert!(jobs.iter().any(|j| !j.is_workflow()));
    let fraction = synth.ledger().workflow_fraction();
    assert!((fraction - 0.5).abs() < 0.05, "fraction {}", fraction);
}

#[test]
fn test_percent_pressure_cap_limits_submissions() {
    let mut config = config(&format!(
        "{}\n[selection]\npolicy = \"percent\"\nworkflow_share = 0.0\npressure_cap = 0.5\n",
        MULTI_WORKFLOWS
    ));
    config.run_limit_s = 10_000;
    let mut synth = Synthesizer::from_config(&config, &registry()).unwrap();
    synth.run().unwrap();
    // one baseline job (48 cores x 3600 s) overshoots the cap, later ticks idle
    // until elapsed capacity catches up
    let pressure = synth.ledger().pressure(10_000, 288);
    assert!(pressure < 0.6, "pressure {}", pressure);
}

#[test]
fn test_saturate_pattern_in_run() {
    let mut config = config(
        r#"
        [[patterns]]
        kind = "saturate"
        job = { cores = 96, runtime_s = 30 }
        jobs_per_blast = 2
        job_period_s = 10
        blast_period_s = 50
        "#,
    );
    config.selection = crate::config::SelectionConfig::BaselineOnly;
    let jobs = Synthesizer::from_config(&config, &registry()).unwrap().run().unwrap();
    let blasts: Vec<i64> = jobs
        .iter()
        .filter(|j| j.requested_cores == 96)
        .map(|j| j.submit_time)
        .collect();
    // due at 0, 10, 50, 60; the first two are caught up at the first tick
    assert_eq!(blasts, vec![10, 10, 50, 60]);
}

#[test]
fn test_overload_pattern_holds_window_pressure() {
    let mut config = config(&format!(
        r#"
        {}
        [selection]
        policy = "percent"
        workflow_share = 0.0
        pressure_cap = 1e-9

        [[patterns]]
        kind = "overload"
        target = 1.0
        window_s = 600
        duration_s = 1000
        source = {{ type = "fixed", cores = 48, runtime_s = 100 }}
        "#,
        MULTI_WORKFLOWS
    ));
    config.run_limit_s = 2000;
    let mut synth = Synthesizer::from_config(&config, &registry()).unwrap();
    let jobs = synth.run().unwrap();

    // the selector idles once anything is submitted, every job is the controller's
    assert!(jobs.iter().all(|j| j.requested_cores == 48 && j.duration == 100));
    assert!(jobs.iter().all(|j| j.submit_time < 1000));
    // 99 ticks in the active period, but only as many jobs as the target allows
    assert_eq!(jobs.len(), 60);

    // at the target, overshooting by at most one job (4800 core-seconds over
    // at least 100 s of capacity)
    let ledger = synth.ledger();
    for now in (100..1000).step_by(10) {
        let pressure = ledger.window_pressure(now, 600, 288);
        assert!((1.0..=1.0 + 4800.0 / 28_800.0).contains(&pressure), "pressure {} at {}", pressure, now);
    }
    // nothing submitted after the active period
    assert_eq!(ledger.window_pressure(1990, 600, 288), 0.0);
}

#[test]
fn test_invalid_pattern_rejected_at_build() {
    let mut config = config("");
    config.patterns.push(PatternConfig::Saturate {
        job: crate::config::FixedJobConfig {
            cores: 1,
            runtime_s: 10,
            wallclock_minutes: None,
        },
        jobs_per_blast: 5,
        job_period_s: 10,
        blast_period_s: 50,
        start: None,
        end: None,
    });
    assert!(matches!(
        Synthesizer::from_config(&config, &registry()),
        Err(SynthError::Config(_))
    ));
}

#[test]
fn test_missing_manifest_is_fatal() {
    let config = config(&format!(
        "{}\n[selection]\npolicy = \"random\"\nworkflow_share = 0.5\n",
        MULTI_WORKFLOWS
    ));
    assert!(Synthesizer::from_config(&config, &ManifestRegistry::new()).is_err());
}
