//! Per-tick choice between baseline jobs and workflow injection

use super::{Result, SubmissionLedger};
use crate::config::{ConfigError, SelectionConfig};
use crate::random::RandomSelector;
use rand::Rng;

/// Which source a tick draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Baseline,
    Workflow,
}

/// Keeps workflows at a target share of submitted core-seconds.
///
/// Routing is deterministic: whichever side is under its share gets the
/// tick. Above `pressure_cap` nothing is submitted at all.
#[derive(Debug, Clone)]
pub struct WorkflowPercent {
    workflow_share: f64,
    pressure_cap: f64,
    capacity_cores: u32,
}

impl WorkflowPercent {
    pub fn new(workflow_share: f64, pressure_cap: f64, capacity_cores: u32) -> Self {
        Self {
            workflow_share,
            pressure_cap,
            capacity_cores,
        }
    }

    pub fn choose(&self, now: i64, ledger: &SubmissionLedger) -> Option<GeneratorKind> {
        if ledger.pressure(now, self.capacity_cores) >= self.pressure_cap {
            return None;
        }
        if ledger.workflow_fraction() < self.workflow_share {
            Some(GeneratorKind::Workflow)
        } else {
            Some(GeneratorKind::Baseline)
        }
    }
}

/// Selection policy of a run
#[derive(Debug, Clone)]
pub enum JobSelection {
    BaselineOnly,
    Random(RandomSelector<GeneratorKind>),
    Percent(WorkflowPercent),
}

impl JobSelection {
    pub fn from_config(config: &SelectionConfig, capacity_cores: u32) -> Result<Self> {
        let selection = match *config {
            SelectionConfig::BaselineOnly => Self::BaselineOnly,
            SelectionConfig::Random { workflow_share } => Self::Random(
                RandomSelector::new(
                    vec![workflow_share],
                    vec![GeneratorKind::Workflow],
                    Some(GeneratorKind::Baseline),
                )
                .map_err(ConfigError::from)?,
            ),
            SelectionConfig::Percent {
                workflow_share,
                pressure_cap,
            } => Self::Percent(WorkflowPercent::new(workflow_share, pressure_cap, capacity_cores)),
        };
        Ok(selection)
    }

    pub fn choose<R: Rng>(
        &self,
        now: i64,
        ledger: &SubmissionLedger,
        rng: &mut R,
    ) -> Option<GeneratorKind> {
        match self {
            Self::BaselineOnly => Some(GeneratorKind::Baseline),
            Self::Random(selector) => Some(*selector.get_random_obj(rng)),
            Self::Percent(percent) => percent.choose(now, ledger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_percent_routes_to_lagging_side() {
        let percent = WorkflowPercent::new(0.5, 10.0, 100);
        let mut ledger = SubmissionLedger::new(0);
        assert_eq!(percent.choose(10, &ledger), Some(GeneratorKind::Workflow));
        ledger.add(10, 100.0, true);
        assert_eq!(percent.choose(20, &ledger), Some(GeneratorKind::Baseline));
        ledger.add(20, 300.0, false);
        assert_eq!(percent.choose(30, &ledger), Some(GeneratorKind::Workflow));
    }

    #[test]
    fn test_percent_pressure_cap_idles() {
        let percent = WorkflowPercent::new(0.5, 1.0, 10);
        let mut ledger = SubmissionLedger::new(0);
        ledger.add(5, 100.0, false);
        // 100 core-s over 10 cores x 10 s is exactly the cap
        assert_eq!(percent.choose(10, &ledger), None);
        assert!(percent.choose(20, &ledger).is_some());
    }

    #[test]
    fn test_random_extremes() {
        let mut rng = StdRng::seed_from_u64(9);
        let ledger = SubmissionLedger::new(0);
        let always = JobSelection::from_config(
            &SelectionConfig::Random { workflow_share: 1.0 },
            10,
        )
        .unwrap();
        let never = JobSelection::from_config(
            &SelectionConfig::Random { workflow_share: 0.0 },
            10,
        )
        .unwrap();
        for _ in 0..200 {
            assert_eq!(always.choose(1, &ledger, &mut rng), Some(GeneratorKind::Workflow));
            assert_eq!(never.choose(1, &ledger, &mut rng), Some(GeneratorKind::Baseline));
        }
    }
}
