//! Stochastic trace synthesis
//!
//! A run advances a SimClock by random inter-arrival deltas. On every tick the
//! pattern timers are polled first (each fires zero or more times), then the
//! configured JobSelection decides whether the tick produces a baseline job,
//! a workflow injection, or nothing. Every submission is recorded in the
//! SubmissionLedger, which in turn feeds the share-keeping selector and the
//! overload controllers.
//!
//! Determinism: one StdRng seeded from the experiment seed is created per run
//! and handed down as `&mut` to every stochastic component.

mod clock;
pub mod generators;
mod ledger;
pub mod patterns;
pub mod selector;
pub mod workflow;

pub use clock::SimClock;
pub use generators::{BaselineJobGenerator, EmitContext, FixedJobGenerator, IdAllocator, JobSource, Sources};
pub use ledger::SubmissionLedger;
pub use patterns::PatternTimer;
pub use selector::{GeneratorKind, JobSelection, WorkflowPercent};
pub use workflow::WorkflowGenerator;

use crate::config::{ConfigError, ExperimentConfig};
use crate::job::JobRecord;
use crate::manifest::{ManifestError, ManifestRegistry};
use crate::random::DistributionError;
use crate::workflow_tag::TagError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("inter-arrival distribution produced {0}")]
    InvalidInterArrival(f64),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

pub type Result<T> = std::result::Result<T, SynthError>;

/// Drives one trace synthesis run
pub struct Synthesizer {
    seed: u64,
    clock: SimClock,
    capacity_cores: u32,
    job_limit: Option<usize>,
    ids: IdAllocator,
    sources: Sources,
    selection: JobSelection,
    timers: Vec<Box<dyn PatternTimer>>,
    ledger: SubmissionLedger,
}

impl Synthesizer {
    /// Build every component of a run. Manifests named by the workflow
    /// share table must already be in `registry`.
    pub fn from_config(config: &ExperimentConfig, registry: &ManifestRegistry) -> Result<Self> {
        config.validate()?;

        let clock = SimClock::new(
            config.start,
            config.run_limit_s,
            config.clock.inter_arrival.build()?,
            config.clock.max_interval_s,
        );
        let workflow = match &config.workflows {
            Some(workflows) => Some(WorkflowGenerator::from_config(workflows, registry)?),
            None => None,
        };
        let sources = Sources {
            baseline: BaselineJobGenerator::from_config(&config.baseline)?,
            workflow,
        };
        let selection = JobSelection::from_config(&config.selection, config.system.capacity_cores)?;
        let timers = config
            .patterns
            .iter()
            .map(|p| patterns::build(p, config))
            .collect::<std::result::Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            seed: config.seed,
            clock,
            capacity_cores: config.system.capacity_cores,
            job_limit: config.job_limit,
            ids: IdAllocator::new(config.first_job_id),
            sources,
            selection,
            timers,
            ledger: SubmissionLedger::new(config.start),
        })
    }

    pub fn ledger(&self) -> &SubmissionLedger {
        &self.ledger
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Ask the selection policy what this tick produces
    pub fn select_generator(&self, now: i64, rng: &mut StdRng) -> Option<GeneratorKind> {
        self.selection.choose(now, &self.ledger, rng)
    }

    fn limit_reached(&self, emitted: usize) -> bool {
        self.job_limit.is_some_and(|limit| emitted >= limit)
    }

    /// Generate the full job sequence in submission order.
    ///
    /// Stops once the clock passes `start + run_limit` or the job limit is
    /// reached. A multi-job workflow is never split by the job limit.
    pub fn run(&mut self) -> Result<Vec<JobRecord>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut jobs: Vec<JobRecord> = Vec::new();

        while !self.limit_reached(jobs.len()) {
            let now = self.clock.advance(&mut rng)?;
            if self.clock.is_done() {
                break;
            }

            let mut ctx = EmitContext {
                rng: &mut rng,
                ids: &mut self.ids,
                capacity_cores: self.capacity_cores,
            };
            for timer in self.timers.iter_mut() {
                let fires = timer.is_it_time(now, &self.ledger);
                for _ in 0..fires {
                    if self.job_limit.is_some_and(|limit| jobs.len() >= limit) {
                        break;
                    }
                    let emitted = timer.do_trigger(now, &mut ctx, &mut self.sources)?;
                    debug!(timer = timer.name(), now, count = emitted.len(), "pattern fired");
                    for job in &emitted {
                        self.ledger.record(job);
                    }
                    jobs.extend(emitted);
                }
            }
            let before = self.timers.len();
            self.timers.retain(|t| !t.can_be_purged(now));
            if self.timers.len() != before {
                debug!(now, purged = before - self.timers.len(), "purged pattern timers");
            }
            if self.limit_reached(jobs.len()) {
                break;
            }

            let Some(kind) = self.select_generator(now, &mut rng) else {
                debug!(now, "selector idle");
                continue;
            };
            let mut ctx = EmitContext {
                rng: &mut rng,
                ids: &mut self.ids,
                capacity_cores: self.capacity_cores,
            };
            let emitted = self.sources.source_mut(kind)?.emit(now, &mut ctx)?;
            debug!(?kind, now, count = emitted.len(), "tick");
            for job in &emitted {
                self.ledger.record(job);
            }
            jobs.extend(emitted);
        }

        info!(
            jobs = jobs.len(),
            core_seconds = self.ledger.total_core_seconds(),
            workflow_fraction = self.ledger.workflow_fraction(),
            "synthesis finished"
        );
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests;
