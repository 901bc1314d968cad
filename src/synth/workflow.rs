//! Workflow injection and DAG expansion

use super::generators::submission;
use super::{EmitContext, IdAllocator, JobSource, Result};
use crate::config::{ConfigError, JobDefaults, WorkflowMode, WorkflowsConfig};
use crate::job::{after_ok_spec, JobRecord};
use crate::manifest::{Manifest, ManifestError, ManifestRegistry};
use crate::random::RandomSelector;
use crate::workflow_tag::WorkflowTag;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Draws a manifest by share and turns it into jobs
#[derive(Debug, Clone)]
pub struct WorkflowGenerator {
    mode: WorkflowMode,
    manifests: RandomSelector<Arc<Manifest>>,
    defaults: JobDefaults,
}

impl WorkflowGenerator {
    pub fn new(
        mode: WorkflowMode,
        manifests: RandomSelector<Arc<Manifest>>,
        defaults: JobDefaults,
    ) -> Self {
        Self {
            mode,
            manifests,
            defaults,
        }
    }

    pub fn from_config(
        config: &WorkflowsConfig,
        registry: &ManifestRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        let mut shares = Vec::with_capacity(config.shares.len());
        let mut manifests = Vec::with_capacity(config.shares.len());
        for entry in &config.shares {
            shares.push(entry.share);
            manifests.push(Arc::new(registry.get(&entry.manifest)?.clone()));
        }
        let selector = RandomSelector::new(shares, manifests, None)?;
        Ok(Self::new(config.mode, selector, config.defaults.clone()))
    }

    pub fn mode(&self) -> WorkflowMode {
        self.mode
    }

    /// One job covering the whole manifest, sized to its peak core count
    fn bounding_job(&self, manifest: &Manifest, now: i64, ids: &mut IdAllocator, tagged: bool) -> Result<JobRecord> {
        let id = ids.next_id();
        let mut job = submission(
            id,
            now,
            manifest.packed_runtime(),
            manifest.max_cores(),
            manifest.packed_wallclock_minutes(),
            &self.defaults,
        );
        if tagged {
            job.workflow_tag = WorkflowTag::bounding(manifest.name(), id)?.to_string();
        }
        Ok(job)
    }

    /// One job per task, linked by `afterok` dependencies.
    ///
    /// Each scan over the manifest emits every task whose dependencies are
    /// already emitted; the first job's id names the instance.
    pub fn expand(&self, manifest: &Manifest, now: i64, ids: &mut IdAllocator) -> Result<Vec<JobRecord>> {
        let tasks = manifest.tasks();
        let mut emitted: HashMap<&str, u64> = HashMap::with_capacity(tasks.len());
        let mut jobs = Vec::with_capacity(tasks.len());
        let mut instance_id = None;

        while emitted.len() < tasks.len() {
            let mut progress = false;
            for task in tasks {
                if emitted.contains_key(task.id.as_str()) {
                    continue;
                }
                let upstream: Option<Vec<u64>> = task
                    .depends_on
                    .iter()
                    .map(|d| emitted.get(d.as_str()).copied())
                    .collect();
                let Some(upstream) = upstream else {
                    continue;
                };

                let id = ids.next_id();
                let instance = *instance_id.get_or_insert(id);
                let tag = WorkflowTag::staged(
                    manifest.name(),
                    instance,
                    task.id.clone(),
                    task.depends_on.clone(),
                )?;
                let mut job = submission(
                    id,
                    now,
                    task.runtime_sim,
                    task.cores,
                    task.wallclock_minutes(),
                    &self.defaults,
                );
                job.dependency_spec = after_ok_spec(&upstream);
                job.workflow_tag = tag.to_string();
                jobs.push(job);
                emitted.insert(task.id.as_str(), id);
                progress = true;
            }
            if !progress {
                return Err(ManifestError::Cycle {
                    name: manifest.name().to_string(),
                }
                .into());
            }
        }
        Ok(jobs)
    }
}

impl JobSource for WorkflowGenerator {
    fn emit(&mut self, now: i64, ctx: &mut EmitContext<'_>) -> Result<Vec<JobRecord>> {
        let manifest = Arc::clone(self.manifests.get_random_obj(ctx.rng));
        let jobs = match self.mode {
            WorkflowMode::Single => vec![self.bounding_job(&manifest, now, ctx.ids, false)?],
            WorkflowMode::Tagged => vec![self.bounding_job(&manifest, now, ctx.ids, true)?],
            WorkflowMode::Multi => self.expand(&manifest, now, ctx.ids)?,
        };
        debug!(manifest = manifest.name(), mode = ?self.mode, jobs = jobs.len(), "workflow injected");
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::{DIAMOND, TWO_TASK};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn generator(mode: WorkflowMode, text: &str) -> WorkflowGenerator {
        let manifest = Arc::new(Manifest::from_json("two.json", text).unwrap());
        let selector = RandomSelector::new(vec![1.0], vec![manifest], None).unwrap();
        WorkflowGenerator::new(mode, selector, JobDefaults::default())
    }

    fn emit(generator: &mut WorkflowGenerator, first_id: u64) -> Vec<JobRecord> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut ids = IdAllocator::new(first_id);
        let mut ctx = EmitContext {
            rng: &mut rng,
            ids: &mut ids,
            capacity_cores: 288,
        };
        generator.emit(1000, &mut ctx).unwrap()
    }

    #[test]
    fn test_multi_two_task_expansion() {
        let mut generator = generator(WorkflowMode::Multi, TWO_TASK);
        let jobs = emit(&mut generator, 40);
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].id, 40);
        assert_eq!(jobs[0].requested_cores, 112);
        assert_eq!(jobs[0].duration, 120);
        assert_eq!(jobs[0].wallclock_limit_minutes, 3);
        assert_eq!(jobs[0].dependency_spec, "");
        assert_eq!(jobs[0].job_name(), "wf_two.json-40_S0");

        assert_eq!(jobs[1].id, 41);
        assert_eq!(jobs[1].requested_cores, 144);
        assert_eq!(jobs[1].duration, 100);
        assert_eq!(jobs[1].dependency_spec, "afterok:40");
        assert_eq!(jobs[1].job_name(), "wf_two.json-40_S1_dS0");
        assert!(jobs.iter().all(|j| j.submit_time == 1000));
    }

    #[test]
    fn test_multi_diamond_dependencies() {
        let mut generator = generator(WorkflowMode::Multi, DIAMOND);
        let jobs = emit(&mut generator, 1);
        assert_eq!(jobs.len(), 4);
        let last = jobs.last().unwrap();
        assert_eq!(last.dependency_ids().len(), 2);
        let tag = last.workflow().unwrap().unwrap();
        assert_eq!(tag.instance_id, 1);
        assert_eq!(tag.stage.as_deref(), Some("S3"));
    }

    #[test]
    fn test_single_and_tagged_use_packed_runtime() {
        let mut single = generator(WorkflowMode::Single, DIAMOND);
        let job = emit(&mut single, 5).remove(0);
        assert_eq!(job.duration, 400);
        assert_eq!(job.workflow_tag, "");

        let mut tagged = generator(WorkflowMode::Tagged, DIAMOND);
        let job = emit(&mut tagged, 5).remove(0);
        assert_eq!(job.duration, 400);
        assert_eq!(job.workflow_tag, "two.json-5");
        assert!(job.workflow().unwrap().unwrap().is_bounding());
    }
}
