//! Binary job-trace records for the external scheduler simulator
//!
//! One fixed-layout record per job, little-endian, no padding and no
//! delimiter between records:
//!
//! ```text
//! i32      job_id
//! [u8;30]  username
//! i64      submit
//! i32      duration
//! i32      wclimit (minutes)
//! i32      tasks
//! [u8;30]  qosname
//! [u8;30]  partition
//! [u8;30]  account
//! i32      cpus_per_task
//! i32      tasks_per_node
//! [u8;30]  reservation
//! [u8;1024] dependency
//! ```
//!
//! Workflow jobs use the extended variant: the record is preceded by the
//! sentinel `-1` (i32) and followed by a 1024-byte field holding the job
//! name. Strings are NUL padded; a string that does not fit its field is an
//! error rather than being truncated.

use crate::job::JobRecord;
use std::io::{Read, Write};
use thiserror::Error;

pub const NAME_FIELD_LEN: usize = 30;
pub const DEPENDENCY_FIELD_LEN: usize = 1024;
pub const WORKFLOW_FIELD_LEN: usize = 1024;

/// Leading marker of an extended (workflow) record
pub const WORKFLOW_RECORD_SENTINEL: i32 = -1;

/// Size of a plain record in bytes
pub const RECORD_LEN: usize =
    4 + NAME_FIELD_LEN + 8 + 4 + 4 + 4 + 3 * NAME_FIELD_LEN + 4 + 4 + NAME_FIELD_LEN + DEPENDENCY_FIELD_LEN;

/// Size of an extended record in bytes
pub const WORKFLOW_RECORD_LEN: usize = 4 + RECORD_LEN + WORKFLOW_FIELD_LEN;

#[derive(Error, Debug)]
pub enum TraceFormatError {
    #[error("job {job_id}: field {field} is {len} bytes, limit is {limit}")]
    FieldTooLong {
        job_id: u64,
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("job {job_id}: {field} value {value} does not fit the record")]
    OutOfRange {
        job_id: u64,
        field: &'static str,
        value: i64,
    },

    #[error("truncated record after {0} complete records")]
    Truncated(usize),

    #[error("field {0} is not valid UTF-8")]
    InvalidText(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceFormatError>;

/// Node geometry used to fill `tasks_per_node`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub cores_per_node: u32,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self { cores_per_node: 48 }
    }
}

/// Writes job records into a byte stream
pub struct TraceWriter<W: Write> {
    out: W,
    layout: RecordLayout,
    written: usize,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W, layout: RecordLayout) -> Self {
        Self {
            out,
            layout,
            written: 0,
        }
    }

    pub fn write_job(&mut self, job: &JobRecord) -> Result<()> {
        let record = encode_record(job, self.layout)?;
        self.out.write_all(&record)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_all<'a>(&mut self, jobs: impl IntoIterator<Item = &'a JobRecord>) -> Result<usize> {
        for job in jobs {
            self.write_job(job)?;
        }
        Ok(self.written)
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Encode one job, choosing the extended variant for workflow jobs
pub fn encode_record(job: &JobRecord, layout: RecordLayout) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(WORKFLOW_RECORD_LEN);
    if job.is_workflow() {
        buf.extend_from_slice(&WORKFLOW_RECORD_SENTINEL.to_le_bytes());
    }

    let tasks_per_node = layout.cores_per_node.min(job.requested_cores).max(1);

    put_i32(&mut buf, job.id, "job_id", job.id as i64)?;
    put_str(&mut buf, job.id, "username", &job.user, NAME_FIELD_LEN)?;
    buf.extend_from_slice(&job.submit_time.to_le_bytes());
    put_i32(&mut buf, job.id, "duration", job.duration)?;
    put_i32(&mut buf, job.id, "wclimit", job.wallclock_limit_minutes as i64)?;
    put_i32(&mut buf, job.id, "tasks", job.requested_cores as i64)?;
    put_str(&mut buf, job.id, "qosname", &job.qos, NAME_FIELD_LEN)?;
    put_str(&mut buf, job.id, "partition", &job.partition, NAME_FIELD_LEN)?;
    put_str(&mut buf, job.id, "account", &job.account, NAME_FIELD_LEN)?;
    put_i32(&mut buf, job.id, "cpus_per_task", 1)?;
    put_i32(&mut buf, job.id, "tasks_per_node", tasks_per_node as i64)?;
    put_str(&mut buf, job.id, "reservation", "", NAME_FIELD_LEN)?;
    put_str(
        &mut buf,
        job.id,
        "dependency",
        &job.dependency_spec,
        DEPENDENCY_FIELD_LEN,
    )?;

    if job.is_workflow() {
        put_str(
            &mut buf,
            job.id,
            "workflow",
            &job.job_name(),
            WORKFLOW_FIELD_LEN,
        )?;
    }
    Ok(buf)
}

fn put_i32(buf: &mut Vec<u8>, job_id: u64, field: &'static str, value: i64) -> Result<()> {
    let v = i32::try_from(value).map_err(|_| TraceFormatError::OutOfRange {
        job_id,
        field,
        value,
    })?;
    buf.extend_from_slice(&v.to_le_bytes());
    Ok(())
}

fn put_str(buf: &mut Vec<u8>, job_id: u64, field: &'static str, value: &str, limit: usize) -> Result<()> {
    let bytes = value.as_bytes();
    // Keep one byte for the C string terminator
    if bytes.len() >= limit {
        return Err(TraceFormatError::FieldTooLong {
            job_id,
            field,
            len: bytes.len(),
            limit: limit - 1,
        });
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (limit - bytes.len()), 0);
    Ok(())
}

/// Record as read back from a binary trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub job_id: i32,
    pub username: String,
    pub submit: i64,
    pub duration: i32,
    pub wclimit: i32,
    pub tasks: i32,
    pub qosname: String,
    pub partition: String,
    pub account: String,
    pub cpus_per_task: i32,
    pub tasks_per_node: i32,
    pub reservation: String,
    pub dependency: String,
    /// Job name of extended records
    pub workflow_name: Option<String>,
}

/// Decode a concatenation of records
pub fn decode_records(mut input: impl Read) -> Result<Vec<DecodedRecord>> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;

    let mut records = Vec::new();
    let mut cursor = Cursor { data: &data, pos: 0 };
    while cursor.remaining() > 0 {
        let truncated = TraceFormatError::Truncated(records.len());
        let first = cursor.peek_i32().ok_or(truncated)?;
        let extended = first == WORKFLOW_RECORD_SENTINEL;
        let needed = if extended { WORKFLOW_RECORD_LEN } else { RECORD_LEN };
        if cursor.remaining() < needed {
            return Err(TraceFormatError::Truncated(records.len()));
        }
        if extended {
            cursor.i32();
        }
        let mut record = DecodedRecord {
            job_id: cursor.i32(),
            username: cursor.text("username", NAME_FIELD_LEN)?,
            submit: cursor.i64(),
            duration: cursor.i32(),
            wclimit: cursor.i32(),
            tasks: cursor.i32(),
            qosname: cursor.text("qosname", NAME_FIELD_LEN)?,
            partition: cursor.text("partition", NAME_FIELD_LEN)?,
            account: cursor.text("account", NAME_FIELD_LEN)?,
            cpus_per_task: cursor.i32(),
            tasks_per_node: cursor.i32(),
            reservation: cursor.text("reservation", NAME_FIELD_LEN)?,
            dependency: cursor.text("dependency", DEPENDENCY_FIELD_LEN)?,
            workflow_name: None,
        };
        if extended {
            record.workflow_name = Some(cursor.text("workflow", WORKFLOW_FIELD_LEN)?);
        }
        records.push(record);
    }
    Ok(records)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

// Callers check remaining() against the full record length first
impl Cursor<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn peek_i32(&self) -> Option<i32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take::<4>())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take::<8>())
    }

    fn text(&mut self, field: &'static str, len: usize) -> Result<String> {
        let raw = &self.data[self.pos..self.pos + len];
        self.pos += len;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8(raw[..end].to_vec()).map_err(|_| TraceFormatError::InvalidText(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::job;

    #[test]
    fn test_record_lengths() {
        assert_eq!(RECORD_LEN, 1206);
        assert_eq!(WORKFLOW_RECORD_LEN, 4 + 1206 + 1024);
        let plain = encode_record(&job(7, 1000, 60, 96), RecordLayout::default()).unwrap();
        assert_eq!(plain.len(), RECORD_LEN);
    }

    #[test]
    fn test_field_offsets() {
        let mut j = job(7, 0x0102_0304_0506, 3600, 96);
        j.user = "alice".to_string();
        let bytes = encode_record(&j, RecordLayout::default()).unwrap();
        assert_eq!(&bytes[0..4], &7i32.to_le_bytes());
        assert_eq!(&bytes[4..9], b"alice");
        assert!(bytes[9..34].iter().all(|&b| b == 0));
        assert_eq!(&bytes[34..42], &0x0102_0304_0506i64.to_le_bytes());
        assert_eq!(&bytes[42..46], &3600i32.to_le_bytes());
    }

    #[test]
    fn test_mixed_stream_decodes() {
        let plain = job(1, 100, 60, 48);
        let mut staged = job(2, 100, 120, 112);
        staged.workflow_tag = "two.json-2_S1_dS0".to_string();
        staged.dependency_spec = "afterok:1".to_string();

        let mut writer = TraceWriter::new(Vec::new(), RecordLayout { cores_per_node: 48 });
        assert_eq!(writer.write_all([&plain, &staged]).unwrap(), 2);
        let bytes = writer.into_inner().unwrap();
        assert_eq!(bytes.len(), RECORD_LEN + WORKFLOW_RECORD_LEN);

        let records = decode_records(bytes.as_slice()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].workflow_name, None);
        assert_eq!(records[0].tasks_per_node, 48);
        assert_eq!(records[1].job_id, 2);
        assert_eq!(records[1].dependency, "afterok:1");
        assert_eq!(records[1].tasks, 112);
        assert_eq!(
            records[1].workflow_name.as_deref(),
            Some("wf_two.json-2_S1_dS0")
        );
    }

    #[test]
    fn test_long_field_rejected() {
        let mut j = job(1, 0, 10, 1);
        j.account = "a".repeat(40);
        assert!(matches!(
            encode_record(&j, RecordLayout::default()),
            Err(TraceFormatError::FieldTooLong { field: "account", .. })
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = encode_record(&job(1, 0, 10, 1), RecordLayout::default()).unwrap();
        let err = decode_records(&bytes[..100]).unwrap_err();
        assert!(matches!(err, TraceFormatError::Truncated(0)));
    }
}
