//! Experiment configuration
//!
//! An experiment is described by one TOML document. Everything stochastic is
//! expressed as a [`DistributionSpec`]; everything scripted (periodic
//! workflows, blasts, preload) as a [`PatternConfig`].
//!
//! # Example
//!
//! ```
//! use hpcload::config::ExperimentConfig;
//!
//! let config: ExperimentConfig = toml::from_str(r#"
//!     seed = 7
//!     start = 1500000000
//!     run_limit_s = 3600
//!
//!     [system]
//!     capacity_cores = 3456
//!
//!     [clock]
//!     inter_arrival = { kind = "exponential", mean = 30.0 }
//! "#).unwrap();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.system.cores_per_node, 48);
//! ```

use crate::manifest::ManifestError;
use crate::random::{DistributionError, DistributionSpec, SHARE_EPSILON};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid pattern: {0}")]
    Pattern(String),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Top-level experiment description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Seed of the single experiment RNG
    pub seed: u64,
    /// Simulation start (epoch seconds)
    pub start: i64,
    /// Length of the synthesized trace in seconds
    pub run_limit_s: i64,
    /// Stop after this many jobs
    #[serde(default)]
    pub job_limit: Option<usize>,
    #[serde(default = "default_first_job_id")]
    pub first_job_id: u64,
    pub system: SystemConfig,
    pub clock: ClockConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub workflows: Option<WorkflowsConfig>,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

fn default_first_job_id() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub capacity_cores: u32,
    #[serde(default = "default_cores_per_node")]
    pub cores_per_node: u32,
}

fn default_cores_per_node() -> u32 {
    48
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Inter-arrival time distribution (seconds)
    pub inter_arrival: DistributionSpec,
    /// Cap on any single inter-arrival delta
    #[serde(default)]
    pub max_interval_s: Option<i64>,
}

/// Submission attributes shared by generated jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub user: String,
    pub qos: String,
    pub partition: String,
    pub account: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            user: "user1".to_string(),
            qos: "normal".to_string(),
            partition: "main".to_string(),
            account: "account1".to_string(),
        }
    }
}

/// Stochastic baseline job shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub cores: DistributionSpec,
    pub wallclock_minutes: DistributionSpec,
    /// Fraction of the wallclock request actually used
    pub accuracy: DistributionSpec,
    #[serde(flatten)]
    pub defaults: JobDefaults,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            cores: DistributionSpec::Constant { value: 48.0 },
            wallclock_minutes: DistributionSpec::Constant { value: 60.0 },
            accuracy: DistributionSpec::Constant { value: 1.0 },
            defaults: JobDefaults::default(),
        }
    }
}

/// How a workflow trigger is turned into jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// One untagged job sized to the whole workflow
    Single,
    /// One bounding job tagged with the manifest name
    Tagged,
    /// One job per task, linked with `afterok` dependencies
    Multi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestShare {
    pub manifest: String,
    pub share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    pub mode: WorkflowMode,
    /// Directory holding the manifest files
    #[serde(default)]
    pub manifest_dir: Option<PathBuf>,
    /// Manifest draw table; shares must sum to 1.0
    pub shares: Vec<ManifestShare>,
    #[serde(flatten)]
    pub defaults: JobDefaults,
}

/// Per-tick choice between baseline jobs and workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionConfig {
    BaselineOnly,
    /// Random draw, `workflow_share` of ticks inject a workflow
    Random { workflow_share: f64 },
    /// Keep workflows at `workflow_share` of submitted core-seconds
    Percent {
        workflow_share: f64,
        /// Submitted core-seconds over capacity-seconds above which nothing is submitted
        pressure_cap: f64,
    },
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::BaselineOnly
    }
}

/// Identical jobs emitted by a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedJobConfig {
    pub cores: u32,
    pub runtime_s: i64,
    #[serde(default)]
    pub wallclock_minutes: Option<u32>,
}

/// What a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Workflow,
    Baseline,
    Fixed(FixedJobConfig),
}

/// Scripted injection pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternConfig {
    MultiAlarm {
        alarms: Vec<i64>,
        source: SourceConfig,
    },
    RepeatingAlarm {
        period_s: i64,
        /// Defaults to the simulation start
        #[serde(default)]
        origin: Option<i64>,
        source: SourceConfig,
    },
    Saturate {
        job: FixedJobConfig,
        jobs_per_blast: u32,
        job_period_s: i64,
        blast_period_s: i64,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        end: Option<i64>,
    },
    BfSaturate {
        long_job: FixedJobConfig,
        wide_runtime_s: i64,
        fill_job: FixedJobConfig,
        fill_job_period_s: i64,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        end: Option<i64>,
    },
    Overload {
        /// Pressure to maintain, e.g. 1.5 for 150% of capacity
        target: f64,
        window_s: i64,
        #[serde(default)]
        start: Option<i64>,
        duration_s: i64,
        source: SourceConfig,
    },
}

impl ExperimentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// End of the synthesized window
    pub fn end(&self) -> i64 {
        self.start + self.run_limit_s
    }

    /// Validate configuration values that do not need manifests or an RNG
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_limit_s <= 0 {
            return Err(ConfigError::Invalid(format!(
                "run_limit_s must be > 0, got {}",
                self.run_limit_s
            )));
        }
        if self.system.capacity_cores == 0 || self.system.cores_per_node == 0 {
            return Err(ConfigError::Invalid(
                "capacity_cores and cores_per_node must be > 0".to_string(),
            ));
        }
        if let Some(cap) = self.clock.max_interval_s {
            if cap <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "max_interval_s must be > 0, got {}",
                    cap
                )));
            }
        }

        self.clock.inter_arrival.build()?;
        self.baseline.cores.build()?;
        self.baseline.wallclock_minutes.build()?;
        self.baseline.accuracy.build()?;

        let wants_workflows = !matches!(self.selection, SelectionConfig::BaselineOnly)
            || self.patterns.iter().any(|p| p.source() == Some(SourceConfig::Workflow));
        match &self.workflows {
            Some(workflows) => {
                let total: f64 = workflows.shares.iter().map(|s| s.share).sum();
                if workflows.shares.is_empty() || (total - 1.0).abs() > SHARE_EPSILON {
                    return Err(ConfigError::Invalid(format!(
                        "manifest shares must sum to 1.0, got {}",
                        total
                    )));
                }
            }
            None if wants_workflows => {
                return Err(ConfigError::Invalid(
                    "workflow injection requested but [workflows] is missing".to_string(),
                ));
            }
            None => {}
        }

        match self.selection {
            SelectionConfig::BaselineOnly => {}
            SelectionConfig::Random { workflow_share } => {
                check_fraction("workflow_share", workflow_share)?;
            }
            SelectionConfig::Percent {
                workflow_share,
                pressure_cap,
            } => {
                check_fraction("workflow_share", workflow_share)?;
                if !(pressure_cap.is_finite() && pressure_cap > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "pressure_cap must be > 0, got {}",
                        pressure_cap
                    )));
                }
            }
        }
        Ok(())
    }
}

impl PatternConfig {
    /// Source fired by timer-style patterns
    pub fn source(&self) -> Option<SourceConfig> {
        match self {
            Self::MultiAlarm { source, .. }
            | Self::RepeatingAlarm { source, .. }
            | Self::Overload { source, .. } => Some(*source),
            Self::Saturate { .. } | Self::BfSaturate { .. } => None,
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
