//! Workflow manifests
//!
//! A manifest describes one workflow as a DAG of tasks. It is loaded once
//! from a JSON document and treated as immutable afterwards. The dependency
//! graph arrives as DOT text (`dot_dag`), of which only edge statements
//! (`A -> B`, chains such as `A -> B -> C`) and bare node statements are
//! read.
//!
//! Both the workflow injector (to size and expand jobs) and the waste
//! computation (to re-derive per-task timing inside a bounding job) use
//! [`Manifest::expand_asap`].
//!
//! ```json
//! {
//!   "max_cores": 144,
//!   "total_runtime": 220,
//!   "tasks": [
//!     {"id": "S0", "number_of_cores": 112, "runtime_sim": 120, "runtime_limit": 180},
//!     {"id": "S1", "number_of_cores": 144, "runtime_sim": 100, "runtime_limit": 160}
//!   ],
//!   "dot_dag": "strict digraph { S0 -> S1 }"
//! }
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::workflow_tag::validate_manifest_name;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest {name}: duplicate task id {id}")]
    DuplicateTask { name: String, id: String },

    #[error("manifest {name}: task {task} depends on unknown task {dep}")]
    UnknownDependency {
        name: String,
        task: String,
        dep: String,
    },

    #[error("manifest {name}: dependency graph contains a cycle")]
    Cycle { name: String },

    #[error("manifest {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("manifest not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// One task of a workflow manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub cores: u32,
    /// Simulated runtime in seconds
    pub runtime_sim: i64,
    /// Runtime limit in seconds
    pub runtime_limit: i64,
    /// Stage ids this task waits for
    pub depends_on: Vec<String>,
}

impl Task {
    /// Wallclock request in whole minutes (at least one)
    pub fn wallclock_minutes(&self) -> u32 {
        minutes_ceil(self.runtime_limit)
    }
}

/// Step of the nominal resource profile of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStep {
    pub num_cores: u32,
    /// Offset from workflow start in seconds
    pub time: i64,
}

/// One task placed at its earliest possible start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: String,
    pub cores: u32,
    /// Offset from workflow start in seconds
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    number_of_cores: u32,
    runtime_sim: f64,
    runtime_limit: f64,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    max_cores: u32,
    total_runtime: f64,
    tasks: Vec<RawTask>,
    #[serde(default)]
    dot_dag: String,
    #[serde(default)]
    resource_steps: Option<Vec<ResourceStep>>,
}

/// Immutable workflow description
#[derive(Debug, Clone)]
pub struct Manifest {
    name: String,
    max_cores: u32,
    total_runtime: i64,
    /// Tasks in document order
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    resource_steps: Vec<ResourceStep>,
}

impl Manifest {
    /// Load a manifest file; the manifest is named after the file name
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_json(&name, &text)
    }

    /// Parse a manifest document
    pub fn from_json(name: &str, text: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(text).map_err(|source| ManifestError::Parse {
            name: name.to_string(),
            source,
        })?;

        let edges = parse_dot_edges(&raw.dot_dag);
        let tasks = raw
            .tasks
            .into_iter()
            .map(|t| Task {
                depends_on: edges
                    .iter()
                    .filter(|(_, to)| *to == t.id)
                    .map(|(from, _)| from.clone())
                    .collect(),
                id: t.id,
                cores: t.number_of_cores,
                runtime_sim: t.runtime_sim.round() as i64,
                runtime_limit: t.runtime_limit.round() as i64,
            })
            .collect();

        Self::new(
            name,
            raw.max_cores,
            raw.total_runtime.round() as i64,
            tasks,
            raw.resource_steps,
        )
    }

    /// Build and validate a manifest
    ///
    /// Fails on names that cannot be carried in a job name, duplicate ids,
    /// unknown dependencies, cycles, tasks wider than `max_cores` and
    /// negative runtimes.
    pub fn new(
        name: &str,
        max_cores: u32,
        total_runtime: i64,
        tasks: Vec<Task>,
        resource_steps: Option<Vec<ResourceStep>>,
    ) -> Result<Self> {
        if let Err(err) = validate_manifest_name(name) {
            return Err(ManifestError::Invalid {
                name: name.to_string(),
                reason: err.to_string(),
            });
        }
        if tasks.is_empty() {
            return Err(ManifestError::Invalid {
                name: name.to_string(),
                reason: "no tasks".to_string(),
            });
        }

        let mut index = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(ManifestError::DuplicateTask {
                    name: name.to_string(),
                    id: task.id.clone(),
                });
            }
            if task.cores == 0 || task.cores > max_cores {
                return Err(ManifestError::Invalid {
                    name: name.to_string(),
                    reason: format!(
                        "task {} requests {} cores (max_cores {})",
                        task.id, task.cores, max_cores
                    ),
                });
            }
            if task.runtime_sim < 0 || task.runtime_limit < 0 {
                return Err(ManifestError::Invalid {
                    name: name.to_string(),
                    reason: format!("task {} has a negative runtime", task.id),
                });
            }
        }
        for task in &tasks {
            for dep in &task.depends_on {
                if !index.contains_key(dep) {
                    return Err(ManifestError::UnknownDependency {
                        name: name.to_string(),
                        task: task.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        let mut manifest = Self {
            name: name.to_string(),
            max_cores,
            total_runtime,
            tasks,
            index,
            resource_steps: Vec::new(),
        };
        // topological_order doubles as the cycle check
        manifest.topological_order()?;
        manifest.resource_steps = match resource_steps {
            Some(steps) => steps,
            None => manifest.derive_resource_steps(),
        };
        Ok(manifest)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_cores(&self) -> u32 {
        self.max_cores
    }

    /// Nominal runtime declared by the manifest (seconds)
    pub fn total_runtime(&self) -> i64 {
        self.total_runtime
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn resource_steps(&self) -> &[ResourceStep] {
        &self.resource_steps
    }

    /// Task indices in a dependency-respecting order (Kahn, document order on ties)
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let mut pending: Vec<usize> = self.tasks.iter().map(|t| t.depends_on.len()).collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        let mut done = vec![false; self.tasks.len()];

        while order.len() < self.tasks.len() {
            let ready: Vec<usize> = (0..self.tasks.len())
                .filter(|&i| !done[i] && pending[i] == 0)
                .collect();
            if ready.is_empty() {
                return Err(ManifestError::Cycle {
                    name: self.name.clone(),
                });
            }
            for i in ready {
                done[i] = true;
                order.push(i);
                let id = &self.tasks[i].id;
                for (j, other) in self.tasks.iter().enumerate() {
                    pending[j] -= other.depends_on.iter().filter(|d| *d == id).count();
                }
            }
        }
        Ok(order)
    }

    /// Place every task at the earliest time its dependencies allow,
    /// ignoring any scheduling contention. Offsets are relative to the
    /// workflow start; output follows topological order.
    pub fn expand_asap(&self) -> Vec<ScheduledTask> {
        self.expand_with(|t| t.runtime_sim)
    }

    /// Length of the ASAP expansion: what a perfectly packed execution takes
    pub fn packed_runtime(&self) -> i64 {
        self.expand_asap().iter().map(|t| t.end).max().unwrap_or(0)
    }

    /// ASAP makespan using each task's runtime limit, in whole minutes
    pub fn packed_wallclock_minutes(&self) -> u32 {
        let limit = self.expand_with(|t| t.runtime_limit);
        minutes_ceil(limit.iter().map(|t| t.end).max().unwrap_or(0))
    }

    fn expand_with(&self, runtime: impl Fn(&Task) -> i64) -> Vec<ScheduledTask> {
        // Order was validated in new()
        let order = self
            .topological_order()
            .unwrap_or_else(|_| (0..self.tasks.len()).collect());
        let mut ends: HashMap<&str, i64> = HashMap::new();
        let mut scheduled = Vec::with_capacity(order.len());
        for i in order {
            let task = &self.tasks[i];
            let start = task
                .depends_on
                .iter()
                .filter_map(|d| ends.get(d.as_str()))
                .copied()
                .max()
                .unwrap_or(0);
            let end = start + runtime(task);
            ends.insert(task.id.as_str(), end);
            scheduled.push(ScheduledTask {
                id: task.id.clone(),
                cores: task.cores,
                start,
                end,
            });
        }
        scheduled
    }

    fn derive_resource_steps(&self) -> Vec<ResourceStep> {
        let mut changes: BTreeMap<i64, i64> = BTreeMap::new();
        for task in self.expand_asap() {
            *changes.entry(task.start).or_default() += task.cores as i64;
            *changes.entry(task.end).or_default() -= task.cores as i64;
        }
        let mut level = 0i64;
        changes
            .into_iter()
            .map(|(time, delta)| {
                level += delta;
                ResourceStep {
                    num_cores: level.max(0) as u32,
                    time,
                }
            })
            .collect()
    }
}

fn minutes_ceil(seconds: i64) -> u32 {
    (((seconds.max(0) + 59) / 60).max(1)) as u32
}

fn edge_regex() -> &'static Regex {
    static EDGE_RE: OnceLock<Regex> = OnceLock::new();
    EDGE_RE.get_or_init(|| Regex::new(r#""?([A-Za-z0-9_.\-]+)"?"#).expect("static node regex"))
}

/// Extract `(from, to)` pairs from DOT edge statements
fn parse_dot_edges(dot: &str) -> Vec<(String, String)> {
    let body = match (dot.find('{'), dot.rfind('}')) {
        (Some(open), Some(close)) if open < close => &dot[open + 1..close],
        _ => dot,
    };

    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    for statement in body.split([';', '\n']) {
        let statement = statement.split('[').next().unwrap_or("").trim();
        if !statement.contains("->") {
            continue;
        }
        let nodes: Vec<String> = statement
            .split("->")
            .filter_map(|part| edge_regex().captures(part.trim()))
            .map(|c| c[1].to_string())
            .collect();
        for pair in nodes.windows(2) {
            if seen.insert((pair[0].clone(), pair[1].clone())) {
                edges.push((pair[0].clone(), pair[1].clone()));
            }
        }
    }
    edges
}

/// Manifests available to an experiment, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
    manifests: BTreeMap<String, Manifest>,
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file of a directory
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| ManifestError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut registry = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|source| ManifestError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path.extension().is_some_and(|e| e == "json") {
                registry.insert(Manifest::from_file(&path)?);
            }
        }
        tracing::debug!("loaded {} manifests from {}", registry.len(), dir.display());
        Ok(registry)
    }

    pub fn insert(&mut self, manifest: Manifest) {
        self.manifests.insert(manifest.name().to_string(), manifest);
    }

    pub fn get(&self, name: &str) -> Result<&Manifest> {
        self.manifests
            .get(name)
            .ok_or_else(|| ManifestError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}
