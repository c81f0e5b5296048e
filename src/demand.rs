//! Demand sampled from normal distributions, for inputs that give demand parameters instead of
//! a demand table.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::parse::{format_key, parse_key};
use crate::problem::{DataInconsistency, Problem};

/// Demand keyed by (product id, period id)
pub type DemandTable = BTreeMap<(usize, usize), f64>;

/// The mean demand of a product: one value for every period, or one per period
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Mean {
    Constant(f64),
    PerPeriod(Vec<f64>),
}

impl Mean {
    /// The mean for each period. A list shorter than the periods is padded with its last value,
    /// a longer one is cut.
    fn per_period(&self, periods: usize) -> Option<Vec<f64>> {
        match self {
            Mean::Constant(mean) => Some(vec![*mean; periods]),
            Mean::PerPeriod(means) => {
                let last = *means.last()?;
                Some(
                    means
                        .iter()
                        .copied()
                        .chain(std::iter::repeat(last))
                        .take(periods)
                        .collect(),
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Distribution {
    #[serde(alias = "moyenne")]
    pub mean: Mean,
    #[serde(alias = "ecart_type", default)]
    pub std_dev: f64,
}

/// Demand parameters: one distribution shared by all products, or one per product keyed like
/// any one-dimensional table (`"P1"`, `"2"`, ...).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DemandParams {
    Shared(Distribution),
    PerProduct(BTreeMap<String, Distribution>),
}

impl DemandParams {
    fn distribution(&self, product: usize) -> Result<&Distribution, DataInconsistency> {
        match self {
            DemandParams::Shared(distribution) => Ok(distribution),
            DemandParams::PerProduct(entries) => {
                for (key, distribution) in entries {
                    match parse_key(key).as_deref() {
                        Ok([id]) if *id == product => return Ok(distribution),
                        Ok([_]) => continue,
                        _ => {
                            return Err(DataInconsistency::MalformedKey {
                                table: "demand_params".to_string(),
                                key: key.clone(),
                            })
                        }
                    }
                }
                Err(DataInconsistency::MissingEntry {
                    table: "demand_params".to_string(),
                    key: format_key(&[product]),
                })
            }
        }
    }

    /// Mean per period and standard deviation of a product
    fn resolve(
        &self,
        product: usize,
        periods: usize,
    ) -> Result<(Vec<f64>, f64), DataInconsistency> {
        let distribution = self.distribution(product)?;
        if distribution.std_dev < 0.0 {
            return Err(DataInconsistency::Negative {
                table: "demand_params".to_string(),
                key: format_key(&[product]),
                value: distribution.std_dev,
            });
        }
        let means = distribution
            .mean
            .per_period(periods)
            .ok_or_else(|| DataInconsistency::MissingEntry {
                table: "demand_params".to_string(),
                key: format_key(&[product]),
            })?;
        Ok((means, distribution.std_dev))
    }
}

pub struct DemandGenerator {
    rng: StdRng,
}

impl DemandGenerator {
    pub fn seeded(seed: u64) -> DemandGenerator {
        DemandGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> DemandGenerator {
        DemandGenerator {
            rng: StdRng::from_entropy(),
        }
    }

    /// Draws from N(mean, std_dev), clamped to a non-negative integer.
    pub fn sample(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return mean.max(0.0).floor();
        }
        // Box-Muller; u1 lies in (0, 1] so the logarithm is finite
        let u1 = 1.0 - self.rng.gen::<f64>();
        let u2 = self.rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        (mean + std_dev * z).max(0.0).floor()
    }

    /// Samples demand independently for every (product, period)
    pub fn generate(
        &mut self,
        params: &DemandParams,
        products: &[usize],
        periods: &[usize],
    ) -> Result<DemandTable, DataInconsistency> {
        let mut demand = DemandTable::new();
        for &p in products {
            let (means, std_dev) = params.resolve(p, periods.len())?;
            for (&t, mean) in periods.iter().zip(means) {
                demand.insert((p, t), self.sample(mean, std_dev));
            }
        }
        Ok(demand)
    }
}

/// The demand without sampling: means rounded to the nearest non-negative integer
pub fn expected(
    params: &DemandParams,
    products: &[usize],
    periods: &[usize],
) -> Result<DemandTable, DataInconsistency> {
    let mut demand = DemandTable::new();
    for &p in products {
        let (means, _) = params.resolve(p, periods.len())?;
        for (&t, mean) in periods.iter().zip(means) {
            demand.insert((p, t), mean.round().max(0.0));
        }
    }
    Ok(demand)
}

/// Fills in the demand table of `problem` from its parameters when it has none.
/// Without a seed the generator draws from entropy.
pub fn ensure_demand(problem: &mut Problem, seed: Option<u64>) -> Result<(), DataInconsistency> {
    if problem.demand.is_some() {
        return Ok(());
    }
    let params = problem
        .demand_params
        .clone()
        .ok_or(DataInconsistency::MissingDemand)?;

    let mut generator = match seed {
        Some(seed) => {
            debug!("sampling demand with seed {}", seed);
            DemandGenerator::seeded(seed)
        }
        None => DemandGenerator::from_entropy(),
    };
    let demand = generator.generate(&params, &problem.products, &problem.periods)?;
    info!(
        "sampled demand for {} products over {} periods",
        problem.products.len(),
        problem.periods.len()
    );
    problem.set_demand(&demand);
    Ok(())
}
