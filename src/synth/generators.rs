//! Job sources
//!
//! A [`JobSource`] turns one trigger into zero or more [`JobRecord`]s
//! submitted at the trigger time. Sources draw job ids from the shared
//! [`IdAllocator`] and randomness from the run RNG, both carried by
//! [`EmitContext`].

use super::{GeneratorKind, Result, WorkflowGenerator};
use crate::config::{BaselineConfig, ConfigError, FixedJobConfig, JobDefaults};
use crate::job::JobRecord;
use crate::random::ValueSource;
use rand::rngs::StdRng;

/// Sequential job id allocation
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new(first: u64) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Id the next allocation will return
    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// Per-emission handles passed down from the synthesizer
pub struct EmitContext<'a> {
    pub rng: &'a mut StdRng,
    pub ids: &'a mut IdAllocator,
    pub capacity_cores: u32,
}

pub trait JobSource {
    fn emit(&mut self, now: i64, ctx: &mut EmitContext<'_>) -> Result<Vec<JobRecord>>;
}

/// Build an unscheduled submission
pub(crate) fn submission(
    id: u64,
    now: i64,
    duration: i64,
    cores: u32,
    wallclock_limit_minutes: u32,
    defaults: &JobDefaults,
) -> JobRecord {
    JobRecord {
        id,
        submit_time: now,
        start_time: None,
        end_time: None,
        duration,
        requested_cores: cores,
        allocated_cores: 0,
        wallclock_limit_minutes,
        user: defaults.user.clone(),
        qos: defaults.qos.clone(),
        partition: defaults.partition.clone(),
        account: defaults.account.clone(),
        dependency_spec: String::new(),
        workflow_tag: String::new(),
    }
}

/// Stochastic background jobs: cores, wallclock request and the fraction of
/// the request actually used are drawn independently.
#[derive(Debug, Clone)]
pub struct BaselineJobGenerator {
    cores: ValueSource,
    wallclock_minutes: ValueSource,
    accuracy: ValueSource,
    defaults: JobDefaults,
}

impl BaselineJobGenerator {
    pub fn from_config(config: &BaselineConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            cores: config.cores.build()?,
            wallclock_minutes: config.wallclock_minutes.build()?,
            accuracy: config.accuracy.build()?,
            defaults: config.defaults.clone(),
        })
    }
}

impl JobSource for BaselineJobGenerator {
    fn emit(&mut self, now: i64, ctx: &mut EmitContext<'_>) -> Result<Vec<JobRecord>> {
        let cores = self
            .cores
            .sample(ctx.rng)
            .round()
            .clamp(1.0, ctx.capacity_cores.max(1) as f64) as u32;
        let wallclock = self.wallclock_minutes.sample(ctx.rng).round().max(1.0) as u32;
        let accuracy = self.accuracy.sample(ctx.rng).clamp(0.0, 1.0);
        let duration = ((wallclock as f64 * 60.0 * accuracy).round() as i64).max(1);
        let id = ctx.ids.next_id();
        Ok(vec![submission(id, now, duration, cores, wallclock, &self.defaults)])
    }
}

/// Identical jobs, used by scripted patterns
#[derive(Debug, Clone)]
pub struct FixedJobGenerator {
    job: FixedJobConfig,
    defaults: JobDefaults,
}

impl FixedJobGenerator {
    pub fn new(job: FixedJobConfig, defaults: JobDefaults) -> std::result::Result<Self, ConfigError> {
        if job.cores == 0 || job.runtime_s <= 0 {
            return Err(ConfigError::Pattern(format!(
                "fixed job needs cores > 0 and runtime_s > 0, got {} cores / {} s",
                job.cores, job.runtime_s
            )));
        }
        Ok(Self { job, defaults })
    }

    pub fn runtime(&self) -> i64 {
        self.job.runtime_s
    }

    pub fn cores(&self) -> u32 {
        self.job.cores
    }

    fn wallclock_minutes(&self) -> u32 {
        self.job
            .wallclock_minutes
            .unwrap_or_else(|| (((self.job.runtime_s + 59) / 60).max(1)) as u32)
    }
}

impl JobSource for FixedJobGenerator {
    fn emit(&mut self, now: i64, ctx: &mut EmitContext<'_>) -> Result<Vec<JobRecord>> {
        let id = ctx.ids.next_id();
        Ok(vec![submission(
            id,
            now,
            self.job.runtime_s,
            self.job.cores,
            self.wallclock_minutes(),
            &self.defaults,
        )])
    }
}

/// Sources shared by the selector and the pattern timers
pub struct Sources {
    pub baseline: BaselineJobGenerator,
    pub workflow: Option<WorkflowGenerator>,
}

impl Sources {
    pub fn source_mut(&mut self, kind: GeneratorKind) -> Result<&mut dyn JobSource> {
        match kind {
            GeneratorKind::Baseline => Ok(&mut self.baseline),
            GeneratorKind::Workflow => match self.workflow.as_mut() {
                Some(workflow) => Ok(workflow),
                None => Err(ConfigError::Invalid("no workflows configured".to_string()).into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::DistributionSpec;
    use rand::SeedableRng;

    #[test]
    fn test_baseline_job_shape() {
        let config = BaselineConfig {
            cores: DistributionSpec::Constant { value: 500.0 },
            wallclock_minutes: DistributionSpec::Constant { value: 10.0 },
            accuracy: DistributionSpec::Constant { value: 0.5 },
            defaults: JobDefaults::default(),
        };
        let mut generator = BaselineJobGenerator::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ids = IdAllocator::new(7);
        let mut ctx = EmitContext {
            rng: &mut rng,
            ids: &mut ids,
            capacity_cores: 144,
        };
        let jobs = generator.emit(50, &mut ctx).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.id, 7);
        assert_eq!(job.submit_time, 50);
        assert_eq!(job.requested_cores, 144);
        assert_eq!(job.wallclock_limit_minutes, 10);
        assert_eq!(job.duration, 300);
        assert!(!job.is_workflow());
        assert_eq!(ids.peek(), 8);
    }

    #[test]
    fn test_fixed_job_wallclock_rounds_up() {
        let mut generator = FixedJobGenerator::new(
            FixedJobConfig {
                cores: 48,
                runtime_s: 61,
                wallclock_minutes: None,
            },
            JobDefaults::default(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ids = IdAllocator::new(1);
        let mut ctx = EmitContext {
            rng: &mut rng,
            ids: &mut ids,
            capacity_cores: 96,
        };
        let job = generator.emit(0, &mut ctx).unwrap().remove(0);
        assert_eq!(job.wallclock_limit_minutes, 2);
        assert_eq!(job.duration, 61);
    }

    #[test]
    fn test_fixed_job_rejects_empty_shape() {
        let bad = FixedJobConfig {
            cores: 0,
            runtime_s: 10,
            wallclock_minutes: None,
        };
        assert!(FixedJobGenerator::new(bad, JobDefaults::default()).is_err());
    }

    #[test]
    fn test_missing_workflow_source() {
        let mut sources = Sources {
            baseline: BaselineJobGenerator::from_config(&BaselineConfig::default()).unwrap(),
            workflow: None,
        };
        assert!(sources.source_mut(GeneratorKind::Baseline).is_ok());
        assert!(sources.source_mut(GeneratorKind::Workflow).is_err());
    }
}
