//! Workflow tag codec
//!
//! The external simulator's accounting log has no structured field for
//! workflow membership, so workflow structure travels inside the job name.
//! Every encode and decode of that string goes through this module.
//!
//! # Format
//!
//! ```text
//! wf_<manifest>-<instance>                                bounding job
//! wf_<manifest>-<instance>_<stage>                        staged task
//! wf_<manifest>-<instance>_<stage>_d<dep1>-d<dep2>...     staged task with deps
//! ```
//!
//! The workflow key is the shortest prefix ending in `-<digits>`, so stage
//! ids may contain hyphens (`S1-2`) and manifest names may contain
//! underscores. Stage ids must not contain the `-d` or `_d` separators, and
//! manifest names must not contain a `-<digits>_` segment, which would end
//! the key early.
//!
//! # Example
//!
//! ```
//! use hpcload::workflow_tag::WorkflowTag;
//!
//! let tag = WorkflowTag::parse_job_name("wf_manifest-2_S1_dS0").unwrap();
//! assert_eq!(tag.workflow_key(), "manifest-2");
//! assert_eq!(tag.stage.as_deref(), Some("S1"));
//! assert_eq!(tag.deps, vec!["S0".to_string()]);
//! ```

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Prefix of every workflow job name
pub const WORKFLOW_PREFIX: &str = "wf_";

/// Name given to jobs that do not belong to a workflow
pub const PLAIN_JOB_NAME: &str = "sim_job";

const STAGE_SEPARATOR: &str = "_";
const DEPS_SEPARATOR: &str = "_d";
const DEP_SEPARATOR: &str = "-d";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("not a workflow job name: {0}")]
    NotWorkflow(String),

    #[error("malformed workflow tag: {0}")]
    Malformed(String),

    #[error("stage id {0:?} contains a reserved separator")]
    ReservedSeparator(String),

    #[error("manifest name {0:?} cannot be encoded in a job name")]
    AmbiguousManifest(String),
}

fn tag_regex() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| {
        Regex::new(r"^(?P<manifest>.+?)-(?P<instance>\d+)(?:_(?P<stage>.+?)(?:_d(?P<deps>.+))?)?$")
            .expect("static workflow tag regex")
    })
}

fn ambiguous_manifest_regex() -> &'static Regex {
    static AMBIGUOUS_RE: OnceLock<Regex> = OnceLock::new();
    AMBIGUOUS_RE.get_or_init(|| Regex::new(r"-\d+_").expect("static manifest name regex"))
}

/// Check that `name` decodes back as itself once embedded in a tag
pub fn validate_manifest_name(name: &str) -> Result<(), TagError> {
    if name.is_empty() || ambiguous_manifest_regex().is_match(name) {
        return Err(TagError::AmbiguousManifest(name.to_string()));
    }
    Ok(())
}

/// Decoded workflow tag of one job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowTag {
    /// Manifest name (usually the manifest file name)
    pub manifest: String,
    /// Id of the job that started the workflow instance
    pub instance_id: u64,
    /// Stage id, `None` for the bounding job of a single-job workflow
    pub stage: Option<String>,
    /// Stage ids this task depends on
    pub deps: Vec<String>,
}

impl WorkflowTag {
    /// Tag of a bounding (single-job) workflow
    pub fn bounding(manifest: impl Into<String>, instance_id: u64) -> Result<Self, TagError> {
        let manifest = manifest.into();
        validate_manifest_name(&manifest)?;
        Ok(Self {
            manifest,
            instance_id,
            stage: None,
            deps: Vec::new(),
        })
    }

    /// Tag of one staged task of an expanded workflow
    pub fn staged(
        manifest: impl Into<String>,
        instance_id: u64,
        stage: impl Into<String>,
        deps: Vec<String>,
    ) -> Result<Self, TagError> {
        let manifest = manifest.into();
        validate_manifest_name(&manifest)?;
        let stage = stage.into();
        for id in std::iter::once(&stage).chain(deps.iter()) {
            if id.is_empty() || id.contains(DEP_SEPARATOR) || id.contains(DEPS_SEPARATOR) {
                return Err(TagError::ReservedSeparator(id.clone()));
            }
        }
        Ok(Self {
            manifest,
            instance_id,
            stage: Some(stage),
            deps,
        })
    }

    /// `manifest-instance`, the key shared by all jobs of one workflow
    pub fn workflow_key(&self) -> String {
        format!("{}-{}", self.manifest, self.instance_id)
    }

    /// True for the bounding job of a single-job workflow
    pub fn is_bounding(&self) -> bool {
        self.stage.is_none()
    }

    /// Full job name, `wf_` prefix included
    pub fn to_job_name(&self) -> String {
        format!("{}{}", WORKFLOW_PREFIX, self)
    }

    /// Decode a full job name (`wf_...`)
    pub fn parse_job_name(name: &str) -> Result<Self, TagError> {
        match name.strip_prefix(WORKFLOW_PREFIX) {
            Some(tag) => tag.parse(),
            None => Err(TagError::NotWorkflow(name.to_string())),
        }
    }

    /// True if the job name carries a workflow tag
    pub fn is_workflow_job_name(name: &str) -> bool {
        name.starts_with(WORKFLOW_PREFIX)
    }
}

impl fmt::Display for WorkflowTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.workflow_key())?;
        if let Some(stage) = &self.stage {
            write!(f, "{}{}", STAGE_SEPARATOR, stage)?;
            if !self.deps.is_empty() {
                let deps = self.deps.join(DEP_SEPARATOR);
                write!(f, "{}{}", DEPS_SEPARATOR, deps)?;
            }
        }
        Ok(())
    }
}

impl FromStr for WorkflowTag {
    type Err = TagError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let caps = tag_regex()
            .captures(tag)
            .ok_or_else(|| TagError::Malformed(tag.to_string()))?;

        let instance_id = caps["instance"]
            .parse::<u64>()
            .map_err(|_| TagError::Malformed(tag.to_string()))?;

        let deps = match caps.name("deps") {
            Some(deps) => deps
                .as_str()
                .split(DEP_SEPARATOR)
                .map(str::to_string)
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };
        if deps.iter().any(String::is_empty) {
            return Err(TagError::Malformed(tag.to_string()));
        }

        Ok(Self {
            manifest: caps["manifest"].to_string(),
            instance_id,
            stage: caps.name("stage").map(|s| s.as_str().to_string()),
            deps,
        })
    }
}
