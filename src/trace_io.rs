//! Completed traces on disk
//!
//! CSV and JSON files of [`JobRecord`]s, the form in which a scheduler
//! simulator's results come back for analysis. CSV rows carry an extra
//! `job_name` column; when a row's `workflow_tag` is empty the tag is
//! recovered from that name, so accounting logs that only keep job names
//! still yield workflows.

use crate::job::{JobRecord, Trace};
use crate::workflow_tag::{WorkflowTag, WORKFLOW_PREFIX};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// File format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFileFormat {
    Csv,
    Json,
}

impl TraceFileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(Self::Csv),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => bail!("cannot tell trace format of {} (expected .csv or .json)", path.display()),
        }
    }
}

/// One CSV row: the job record fields plus its scheduler-visible name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TraceRow {
    id: u64,
    job_name: String,
    submit_time: i64,
    start_time: Option<i64>,
    end_time: Option<i64>,
    duration: i64,
    requested_cores: u32,
    #[serde(default)]
    allocated_cores: u32,
    wallclock_limit_minutes: u32,
    user: String,
    qos: String,
    partition: String,
    account: String,
    #[serde(default)]
    dependency_spec: String,
    #[serde(default)]
    workflow_tag: String,
}

impl From<&JobRecord> for TraceRow {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id,
            job_name: job.job_name(),
            submit_time: job.submit_time,
            start_time: job.start_time,
            end_time: job.end_time,
            duration: job.duration,
            requested_cores: job.requested_cores,
            allocated_cores: job.allocated_cores,
            wallclock_limit_minutes: job.wallclock_limit_minutes,
            user: job.user.clone(),
            qos: job.qos.clone(),
            partition: job.partition.clone(),
            account: job.account.clone(),
            dependency_spec: job.dependency_spec.clone(),
            workflow_tag: job.workflow_tag.clone(),
        }
    }
}

impl From<TraceRow> for JobRecord {
    fn from(row: TraceRow) -> Self {
        let workflow_tag = if row.workflow_tag.is_empty() && WorkflowTag::is_workflow_job_name(&row.job_name) {
            // kept verbatim; a malformed tag is reported by the extractor
            row.job_name[WORKFLOW_PREFIX.len()..].to_string()
        } else {
            row.workflow_tag
        };
        Self {
            id: row.id,
            submit_time: row.submit_time,
            start_time: row.start_time,
            end_time: row.end_time,
            duration: row.duration,
            requested_cores: row.requested_cores,
            allocated_cores: row.allocated_cores,
            wallclock_limit_minutes: row.wallclock_limit_minutes,
            user: row.user,
            qos: row.qos,
            partition: row.partition,
            account: row.account,
            dependency_spec: row.dependency_spec,
            workflow_tag,
        }
    }
}

pub fn write_csv<'a, W: Write>(out: W, jobs: impl IntoIterator<Item = &'a JobRecord>) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for job in jobs {
        writer
            .serialize(TraceRow::from(job))
            .with_context(|| format!("failed to write job {}", job.id))?;
    }
    writer.flush().context("failed to flush CSV trace")?;
    Ok(())
}

pub fn read_csv<R: Read>(input: R) -> Result<Vec<JobRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
    let mut jobs = Vec::new();
    for (line, row) in reader.deserialize::<TraceRow>().enumerate() {
        // line 1 is the header
        let row = row.with_context(|| format!("invalid CSV trace row {}", line + 2))?;
        jobs.push(JobRecord::from(row));
    }
    Ok(jobs)
}

pub fn write_json<'a, W: Write>(out: W, jobs: impl IntoIterator<Item = &'a JobRecord>) -> Result<()> {
    let jobs: Vec<&JobRecord> = jobs.into_iter().collect();
    serde_json::to_writer_pretty(out, &jobs).context("failed to write JSON trace")?;
    Ok(())
}

pub fn read_json<R: Read>(input: R) -> Result<Vec<JobRecord>> {
    serde_json::from_reader(input).context("invalid JSON trace")
}

/// Load a trace file, format by extension
pub fn load_trace(path: impl AsRef<Path>) -> Result<Trace> {
    let path = path.as_ref();
    let format = TraceFileFormat::from_path(path)?;
    let file = File::open(path).with_context(|| format!("failed to open trace {}", path.display()))?;
    let input = BufReader::new(file);
    let jobs = match format {
        TraceFileFormat::Csv => read_csv(input),
        TraceFileFormat::Json => read_json(input),
    }
    .with_context(|| format!("failed to read trace {}", path.display()))?;
    Ok(Trace::new(jobs))
}

/// Save jobs to a trace file, format by extension
pub fn save_trace<'a>(path: impl AsRef<Path>, jobs: impl IntoIterator<Item = &'a JobRecord>) -> Result<()> {
    let path = path.as_ref();
    let format = TraceFileFormat::from_path(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        TraceFileFormat::Csv => write_csv(&mut out, jobs)?,
        TraceFileFormat::Json => write_json(&mut out, jobs)?,
    }
    out.flush().with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
