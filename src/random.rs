//! Random value sources and share-based selection
//!
//! Every stochastic component receives the experiment RNG as an explicit
//! `&mut R: Rng` argument; there is no process-wide generator. A run is
//! reproducible from its seed alone.

use rand::Rng;
use rand_distr::{Distribution, Exp, Normal, Uniform, WeightedIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance used when comparing share sums against 1.0
pub const SHARE_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("invalid {kind} distribution: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("shares sum to {0}, above 1.0")]
    SharesAboveOne(f64),

    #[error("shares sum to {0} and no remaining object absorbs the rest")]
    SharesBelowOne(f64),

    #[error("share {0} is negative or not finite")]
    BadShare(f64),

    #[error("{shares} shares given for {objects} objects")]
    LengthMismatch { shares: usize, objects: usize },

    #[error("no objects registered")]
    Empty,
}

/// Serializable description of a scalar distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionSpec {
    Constant { value: f64 },
    Uniform { low: f64, high: f64 },
    Exponential { mean: f64 },
    Normal { mean: f64, std_dev: f64 },
    /// Histogram of observed values: `values[i]` drawn with weight `weights[i]`
    Empirical { values: Vec<f64>, weights: Vec<f64> },
}

impl DistributionSpec {
    pub fn build(&self) -> Result<ValueSource, DistributionError> {
        let source = match self {
            Self::Constant { value } => {
                if !value.is_finite() {
                    return Err(invalid("constant", "value is not finite"));
                }
                ValueSource::Constant(*value)
            }
            Self::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite()) || low > high {
                    return Err(invalid("uniform", format!("bad range [{}, {}]", low, high)));
                }
                if low == high {
                    ValueSource::Constant(*low)
                } else {
                    ValueSource::Uniform(Uniform::new(*low, *high))
                }
            }
            Self::Exponential { mean } => {
                if !(mean.is_finite() && *mean > 0.0) {
                    return Err(invalid("exponential", format!("mean {} must be > 0", mean)));
                }
                let exp = Exp::new(1.0 / mean)
                    .map_err(|e| invalid("exponential", e.to_string()))?;
                ValueSource::Exponential(exp)
            }
            Self::Normal { mean, std_dev } => {
                let normal = Normal::new(*mean, *std_dev)
                    .map_err(|e| invalid("normal", e.to_string()))?;
                ValueSource::Normal(normal)
            }
            Self::Empirical { values, weights } => {
                if values.is_empty() || values.len() != weights.len() {
                    return Err(invalid(
                        "empirical",
                        format!("{} values for {} weights", values.len(), weights.len()),
                    ));
                }
                let index = WeightedIndex::new(weights)
                    .map_err(|e| invalid("empirical", e.to_string()))?;
                ValueSource::Empirical {
                    values: values.clone(),
                    index,
                }
            }
        };
        Ok(source)
    }
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> DistributionError {
    DistributionError::Invalid {
        kind,
        reason: reason.into(),
    }
}

/// A built distribution ready to be sampled
#[derive(Debug, Clone)]
pub enum ValueSource {
    Constant(f64),
    Uniform(Uniform<f64>),
    Exponential(Exp<f64>),
    Normal(Normal<f64>),
    Empirical {
        values: Vec<f64>,
        index: WeightedIndex<f64>,
    },
}

impl ValueSource {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Uniform(d) => d.sample(rng),
            Self::Exponential(d) => d.sample(rng),
            Self::Normal(d) => d.sample(rng),
            Self::Empirical { values, index } => values[index.sample(rng)],
        }
    }
}

/// Maps a uniform draw in `[0, 1)` to one of several objects by cumulative share.
///
/// An optional "remaining" object absorbs `1 - Σ shares`.
#[derive(Debug, Clone)]
pub struct RandomSelector<T> {
    shares: Vec<f64>,
    objects: Vec<T>,
}

impl<T> RandomSelector<T> {
    pub fn new(
        shares: Vec<f64>,
        objects: Vec<T>,
        remaining: Option<T>,
    ) -> Result<Self, DistributionError> {
        if shares.len() != objects.len() {
            return Err(DistributionError::LengthMismatch {
                shares: shares.len(),
                objects: objects.len(),
            });
        }
        if let Some(bad) = shares.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(DistributionError::BadShare(*bad));
        }
        let total: f64 = shares.iter().sum();
        if total > 1.0 + SHARE_EPSILON {
            return Err(DistributionError::SharesAboveOne(total));
        }

        let mut shares = shares;
        let mut objects = objects;
        match remaining {
            Some(rest) => {
                shares.push((1.0 - total).max(0.0));
                objects.push(rest);
            }
            None if objects.is_empty() => return Err(DistributionError::Empty),
            None if (total - 1.0).abs() > SHARE_EPSILON => {
                return Err(DistributionError::SharesBelowOne(total))
            }
            None => {}
        }
        Ok(Self { shares, objects })
    }

    /// Probability mass of each registered object, in registration order
    pub fn probabilities(&self) -> &[f64] {
        &self.shares
    }

    pub fn objects(&self) -> &[T] {
        &self.objects
    }

    /// Object selected by a draw `r` in `[0, 1)`
    pub fn select(&self, r: f64) -> &T {
        let mut acc = 0.0;
        for (share, obj) in self.shares.iter().zip(&self.objects) {
            acc += share;
            if r < acc {
                return obj;
            }
        }
        // Rounding can leave r just above the accumulated total
        let last = self
            .shares
            .iter()
            .rposition(|s| *s > 0.0)
            .unwrap_or(self.objects.len() - 1);
        &self.objects[last]
    }

    pub fn get_random_obj<R: Rng>(&self, rng: &mut R) -> &T {
        self.select(rng.gen::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_selector_with_remaining() {
        let sel = RandomSelector::new(vec![0.2, 0.3], vec!["a", "b"], Some("rest")).unwrap();
        assert_eq!(sel.probabilities(), &[0.2, 0.3, 0.5]);
        assert_eq!(*sel.select(0.0), "a");
        assert_eq!(*sel.select(0.19), "a");
        assert_eq!(*sel.select(0.2), "b");
        assert_eq!(*sel.select(0.6), "rest");
        assert_eq!(*sel.select(0.999_999), "rest");
    }

    #[test]
    fn test_selector_rejects_bad_shares() {
        assert!(matches!(
            RandomSelector::new(vec![0.7, 0.4], vec![1, 2], None),
            Err(DistributionError::SharesAboveOne(_))
        ));
        assert!(matches!(
            RandomSelector::new(vec![0.5], vec![1], None),
            Err(DistributionError::SharesBelowOne(_))
        ));
        assert!(matches!(
            RandomSelector::new(vec![-0.1], vec![1], Some(2)),
            Err(DistributionError::BadShare(_))
        ));
        assert!(matches!(
            RandomSelector::new(Vec::<f64>::new(), Vec::<u8>::new(), None),
            Err(DistributionError::Empty)
        ));
    }

    #[test]
    fn test_selector_zero_share_never_selected() {
        let sel = RandomSelector::new(vec![1.0, 0.0], vec!["a", "b"], None).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_eq!(*sel.get_random_obj(&mut rng), "a");
        }
        assert_eq!(*sel.select(1.0), "a");
    }

    #[test]
    fn test_distribution_specs() {
        let mut rng = StdRng::seed_from_u64(42);
        let c = DistributionSpec::Constant { value: 4.0 }.build().unwrap();
        assert_eq!(c.sample(&mut rng), 4.0);

        let u = DistributionSpec::Uniform { low: 1.0, high: 2.0 }.build().unwrap();
        for _ in 0..100 {
            let v = u.sample(&mut rng);
            assert!((1.0..2.0).contains(&v));
        }

        let e = DistributionSpec::Empirical {
            values: vec![48.0, 96.0],
            weights: vec![0.0, 1.0],
        }
        .build()
        .unwrap();
        assert_eq!(e.sample(&mut rng), 96.0);
    }

    #[test]
    fn test_invalid_distributions() {
        assert!(DistributionSpec::Exponential { mean: 0.0 }.build().is_err());
        assert!(DistributionSpec::Uniform { low: 3.0, high: 1.0 }.build().is_err());
        assert!(DistributionSpec::Empirical {
            values: vec![1.0],
            weights: vec![]
        }
        .build()
        .is_err());
        assert!(DistributionSpec::Normal {
            mean: 0.0,
            std_dev: -1.0
        }
        .build()
        .is_err());
    }

    #[test]
    fn test_spec_from_toml() {
        let spec: DistributionSpec = toml::from_str("kind = \"exponential\"\nmean = 30.0").unwrap();
        assert_eq!(spec, DistributionSpec::Exponential { mean: 30.0 });
    }
}
