//! Scripted injection patterns
//!
//! Each pattern is a small independent state machine polled once per clock
//! tick. [`PatternTimer::is_it_time`] reports how many times the pattern
//! fires at `now` and commits that many firings to its state; the
//! synthesizer then calls [`PatternTimer::do_trigger`] once per firing.

use super::{EmitContext, FixedJobGenerator, GeneratorKind, JobSource, Result, Sources, SubmissionLedger};
use crate::config::{ConfigError, ExperimentConfig, FixedJobConfig, PatternConfig, SourceConfig};
use crate::job::JobRecord;
use std::collections::VecDeque;

/// Delay between the long job and the wide job of a backfill cycle
pub const BF_WIDE_DELAY: i64 = 60;

pub trait PatternTimer {
    /// Number of firings due at `now`
    fn is_it_time(&mut self, now: i64, ledger: &SubmissionLedger) -> u32;

    /// Emit the jobs of one firing
    fn do_trigger(&mut self, now: i64, ctx: &mut EmitContext<'_>, sources: &mut Sources) -> Result<Vec<JobRecord>>;

    /// True once the pattern can never fire again
    fn can_be_purged(&self, now: i64) -> bool;

    fn name(&self) -> &'static str;
}

/// What a timer emits when it fires
#[derive(Debug, Clone)]
pub enum PatternSource {
    Workflow,
    Baseline,
    Fixed(FixedJobGenerator),
}

impl PatternSource {
    fn from_config(source: SourceConfig, config: &ExperimentConfig) -> std::result::Result<Self, ConfigError> {
        Ok(match source {
            SourceConfig::Workflow => Self::Workflow,
            SourceConfig::Baseline => Self::Baseline,
            SourceConfig::Fixed(job) => {
                Self::Fixed(FixedJobGenerator::new(job, config.baseline.defaults.clone())?)
            }
        })
    }

    fn emit(&mut self, now: i64, ctx: &mut EmitContext<'_>, sources: &mut Sources) -> Result<Vec<JobRecord>> {
        match self {
            Self::Workflow => sources.source_mut(GeneratorKind::Workflow)?.emit(now, ctx),
            Self::Baseline => sources.source_mut(GeneratorKind::Baseline)?.emit(now, ctx),
            Self::Fixed(fixed) => fixed.emit(now, ctx),
        }
    }
}

/// Build the timer described by one `[[patterns]]` entry
pub fn build(
    pattern: &PatternConfig,
    config: &ExperimentConfig,
) -> std::result::Result<Box<dyn PatternTimer>, ConfigError> {
    let defaults = &config.baseline.defaults;
    let timer: Box<dyn PatternTimer> = match pattern {
        PatternConfig::MultiAlarm { alarms, source } => Box::new(MultiAlarmTimer::new(
            alarms.clone(),
            config.start,
            PatternSource::from_config(*source, config)?,
        )?),
        PatternConfig::RepeatingAlarm {
            period_s,
            origin,
            source,
        } => Box::new(RepeatingAlarmTimer::new(
            *period_s,
            origin.unwrap_or(config.start),
            PatternSource::from_config(*source, config)?,
        )?),
        PatternConfig::Saturate {
            job,
            jobs_per_blast,
            job_period_s,
            blast_period_s,
            start,
            end,
        } => Box::new(SaturateGenerator::new(
            FixedJobGenerator::new(*job, defaults.clone())?,
            *jobs_per_blast,
            *job_period_s,
            *blast_period_s,
            start.unwrap_or(config.start),
            *end,
        )?),
        PatternConfig::BfSaturate {
            long_job,
            wide_runtime_s,
            fill_job,
            fill_job_period_s,
            start,
            end,
        } => {
            let wide = FixedJobConfig {
                cores: config.system.capacity_cores,
                runtime_s: *wide_runtime_s,
                wallclock_minutes: None,
            };
            Box::new(BFSaturateGenerator::new(
                FixedJobGenerator::new(*long_job, defaults.clone())?,
                FixedJobGenerator::new(wide, defaults.clone())?,
                FixedJobGenerator::new(*fill_job, defaults.clone())?,
                *fill_job_period_s,
                start.unwrap_or(config.start),
                *end,
            )?)
        }
        PatternConfig::Overload {
            target,
            window_s,
            start,
            duration_s,
            source,
        } => Box::new(OverloadTimeController::new(
            *target,
            *window_s,
            start.unwrap_or(config.start),
            *duration_s,
            config.system.capacity_cores,
            PatternSource::from_config(*source, config)?,
        )?),
    };
    Ok(timer)
}

/// Fires once per absolute alarm time that has passed
#[derive(Debug, Clone)]
pub struct MultiAlarmTimer {
    alarms: VecDeque<i64>,
    source: PatternSource,
}

impl MultiAlarmTimer {
    pub fn new(alarms: Vec<i64>, sim_start: i64, source: PatternSource) -> std::result::Result<Self, ConfigError> {
        if let Some(early) = alarms.iter().find(|&&a| a < sim_start) {
            return Err(ConfigError::Pattern(format!(
                "alarm {} is before the simulation start {}",
                early, sim_start
            )));
        }
        if alarms.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::Pattern("alarms are not sorted".to_string()));
        }
        Ok(Self {
            alarms: alarms.into(),
            source,
        })
    }

    pub fn pending(&self) -> usize {
        self.alarms.len()
    }
}

impl PatternTimer for MultiAlarmTimer {
    fn is_it_time(&mut self, now: i64, _ledger: &SubmissionLedger) -> u32 {
        let mut fires = 0;
        while self.alarms.front().is_some_and(|&a| a <= now) {
            self.alarms.pop_front();
            fires += 1;
        }
        fires
    }

    fn do_trigger(&mut self, now: i64, ctx: &mut EmitContext<'_>, sources: &mut Sources) -> Result<Vec<JobRecord>> {
        self.source.emit(now, ctx, sources)
    }

    fn can_be_purged(&self, _now: i64) -> bool {
        self.alarms.is_empty()
    }

    fn name(&self) -> &'static str {
        "multi_alarm"
    }
}

/// Fires at every multiple of `period` after its origin, catching up on
/// boundaries skipped between ticks
#[derive(Debug, Clone)]
pub struct RepeatingAlarmTimer {
    period: i64,
    origin: i64,
    /// Boundaries already fired
    fired: i64,
    source: PatternSource,
}

impl RepeatingAlarmTimer {
    pub fn new(period: i64, origin: i64, source: PatternSource) -> std::result::Result<Self, ConfigError> {
        if period <= 0 {
            return Err(ConfigError::Pattern(format!("period must be > 0, got {}", period)));
        }
        Ok(Self {
            period,
            origin,
            fired: 0,
            source,
        })
    }
}

impl PatternTimer for RepeatingAlarmTimer {
    fn is_it_time(&mut self, now: i64, _ledger: &SubmissionLedger) -> u32 {
        if now < self.origin {
            return 0;
        }
        let crossed = (now - self.origin) / self.period;
        let fires = crossed - self.fired;
        self.fired = crossed;
        fires.max(0) as u32
    }

    fn do_trigger(&mut self, now: i64, ctx: &mut EmitContext<'_>, sources: &mut Sources) -> Result<Vec<JobRecord>> {
        self.source.emit(now, ctx, sources)
    }

    fn can_be_purged(&self, _now: i64) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "repeating_alarm"
    }
}

/// Blasts of identical jobs.
///
/// Job `k` of a blast is due at `blast_start + k * job_period`; the next
/// blast starts `blast_period` after the previous one started.
#[derive(Debug, Clone)]
pub struct SaturateGenerator {
    job: FixedJobGenerator,
    jobs_per_blast: u32,
    job_period: i64,
    blast_period: i64,
    blast_start: i64,
    emitted_in_blast: u32,
    end: Option<i64>,
}

impl SaturateGenerator {
    pub fn new(
        job: FixedJobGenerator,
        jobs_per_blast: u32,
        job_period: i64,
        blast_period: i64,
        start: i64,
        end: Option<i64>,
    ) -> std::result::Result<Self, ConfigError> {
        if jobs_per_blast == 0 || job_period < 0 {
            return Err(ConfigError::Pattern(format!(
                "saturate needs jobs_per_blast > 0 and job_period >= 0, got {} / {}",
                jobs_per_blast, job_period
            )));
        }
        if blast_period <= jobs_per_blast as i64 * job_period {
            return Err(ConfigError::Pattern(format!(
                "blast_period {} must exceed jobs_per_blast {} x job_period {}",
                blast_period, jobs_per_blast, job_period
            )));
        }
        Ok(Self {
            job,
            jobs_per_blast,
            job_period,
            blast_period,
            blast_start: start,
            emitted_in_blast: 0,
            end,
        })
    }

    /// Due time of the next job
    pub fn next_due(&self) -> i64 {
        self.blast_start + self.emitted_in_blast as i64 * self.job_period
    }

    fn exhausted(&self) -> bool {
        self.end.is_some_and(|end| self.next_due() >= end)
    }
}

impl PatternTimer for SaturateGenerator {
    fn is_it_time(&mut self, now: i64, _ledger: &SubmissionLedger) -> u32 {
        let mut fires = 0;
        while !self.exhausted() && self.next_due() <= now {
            fires += 1;
            self.emitted_in_blast += 1;
            if self.emitted_in_blast == self.jobs_per_blast {
                self.blast_start += self.blast_period;
                self.emitted_in_blast = 0;
            }
        }
        fires
    }

    fn do_trigger(&mut self, now: i64, ctx: &mut EmitContext<'_>, _sources: &mut Sources) -> Result<Vec<JobRecord>> {
        self.job.emit(now, ctx)
    }

    fn can_be_purged(&self, _now: i64) -> bool {
        self.exhausted()
    }

    fn name(&self) -> &'static str {
        "saturate"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BfJob {
    Long,
    Wide,
    Fill,
}

#[derive(Debug, Clone)]
enum BfPhase {
    AwaitLong,
    AwaitWide,
    Filling(SaturateGenerator),
}

/// Backfill stress cycles.
///
/// A cycle submits a long job, then `BF_WIDE_DELAY` seconds later a job as
/// wide as the machine, which cannot start before the long job ends. Small
/// fill jobs are then submitted every `fill_period` until the long job would
/// end. The next cycle starts when the wide job would have completed.
#[derive(Debug, Clone)]
pub struct BFSaturateGenerator {
    long_job: FixedJobGenerator,
    wide_job: FixedJobGenerator,
    fill_job: FixedJobGenerator,
    fill_period: i64,
    cycle_start: i64,
    phase: BfPhase,
    pending: VecDeque<BfJob>,
    end: Option<i64>,
}

impl BFSaturateGenerator {
    pub fn new(
        long_job: FixedJobGenerator,
        wide_job: FixedJobGenerator,
        fill_job: FixedJobGenerator,
        fill_period: i64,
        start: i64,
        end: Option<i64>,
    ) -> std::result::Result<Self, ConfigError> {
        if long_job.runtime() <= BF_WIDE_DELAY {
            return Err(ConfigError::Pattern(format!(
                "long job runtime {} must exceed {} s",
                long_job.runtime(),
                BF_WIDE_DELAY
            )));
        }
        if fill_period <= 0 {
            return Err(ConfigError::Pattern(format!(
                "fill_job_period_s must be > 0, got {}",
                fill_period
            )));
        }
        Ok(Self {
            long_job,
            wide_job,
            fill_job,
            fill_period,
            cycle_start: start,
            phase: BfPhase::AwaitLong,
            pending: VecDeque::new(),
            end,
        })
    }

    /// Start of the current cycle
    pub fn cycle_start(&self) -> i64 {
        self.cycle_start
    }

    fn finished(&self) -> bool {
        matches!(self.phase, BfPhase::AwaitLong) && self.end.is_some_and(|end| self.cycle_start >= end)
    }

    /// Fill jobs for the current cycle: one every `fill_period` from the
    /// wide job until the long job would end
    fn filler(&self) -> SaturateGenerator {
        SaturateGenerator {
            job: self.fill_job.clone(),
            jobs_per_blast: 1,
            job_period: 0,
            blast_period: self.fill_period,
            blast_start: self.cycle_start + BF_WIDE_DELAY,
            emitted_in_blast: 0,
            end: Some(self.cycle_start + self.long_job.runtime()),
        }
    }
}

impl PatternTimer for BFSaturateGenerator {
    fn is_it_time(&mut self, now: i64, ledger: &SubmissionLedger) -> u32 {
        loop {
            match &mut self.phase {
                BfPhase::AwaitLong => {
                    if self.finished() || self.cycle_start > now {
                        break;
                    }
                    self.pending.push_back(BfJob::Long);
                    self.phase = BfPhase::AwaitWide;
                }
                BfPhase::AwaitWide => {
                    if self.cycle_start + BF_WIDE_DELAY > now {
                        break;
                    }
                    self.pending.push_back(BfJob::Wide);
                    self.phase = BfPhase::Filling(self.filler());
                }
                BfPhase::Filling(filler) => {
                    let due = filler.is_it_time(now, ledger);
                    self.pending.extend(std::iter::repeat(BfJob::Fill).take(due as usize));
                    if !filler.can_be_purged(now) {
                        break;
                    }
                    self.cycle_start += self.long_job.runtime() + self.wide_job.runtime();
                    self.phase = BfPhase::AwaitLong;
                }
            }
        }
        self.pending.len() as u32
    }

    fn do_trigger(&mut self, now: i64, ctx: &mut EmitContext<'_>, _sources: &mut Sources) -> Result<Vec<JobRecord>> {
        match self.pending.pop_front() {
            Some(BfJob::Long) => self.long_job.emit(now, ctx),
            Some(BfJob::Wide) => self.wide_job.emit(now, ctx),
            Some(BfJob::Fill) => self.fill_job.emit(now, ctx),
            None => Ok(Vec::new()),
        }
    }

    fn can_be_purged(&self, _now: i64) -> bool {
        self.pending.is_empty() && self.finished()
    }

    fn name(&self) -> &'static str {
        "bf_saturate"
    }
}

/// Keeps the trailing-window pressure at `target` during its active period
#[derive(Debug, Clone)]
pub struct OverloadTimeController {
    target: f64,
    window: i64,
    start: i64,
    duration: i64,
    capacity_cores: u32,
    source: PatternSource,
}

impl OverloadTimeController {
    pub fn new(
        target: f64,
        window: i64,
        start: i64,
        duration: i64,
        capacity_cores: u32,
        source: PatternSource,
    ) -> std::result::Result<Self, ConfigError> {
        if !(target.is_finite() && target > 0.0) || window <= 0 || duration <= 0 {
            return Err(ConfigError::Pattern(format!(
                "overload needs target > 0, window_s > 0 and duration_s > 0, got {} / {} / {}",
                target, window, duration
            )));
        }
        Ok(Self {
            target,
            window,
            start,
            duration,
            capacity_cores,
            source,
        })
    }

    fn active(&self, now: i64) -> bool {
        now >= self.start && now < self.start + self.duration
    }
}

impl PatternTimer for OverloadTimeController {
    fn is_it_time(&mut self, now: i64, ledger: &SubmissionLedger) -> u32 {
        if self.active(now) && ledger.window_pressure(now, self.window, self.capacity_cores) < self.target {
            1
        } else {
            0
        }
    }

    fn do_trigger(&mut self, now: i64, ctx: &mut EmitContext<'_>, sources: &mut Sources) -> Result<Vec<JobRecord>> {
        self.source.emit(now, ctx, sources)
    }

    fn can_be_purged(&self, now: i64) -> bool {
        now >= self.start + self.duration
    }

    fn name(&self) -> &'static str {
        "overload"
    }
}
