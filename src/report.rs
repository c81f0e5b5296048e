//! Reads a solved model back from its engine and renders it as text or JSON.

use std::fmt;
use std::time::Duration;

use derive_more::Display;
use itertools::iproduct;
use log::{debug, trace};
use serde::Serialize;

use crate::models::cms::keys::var_name;
use crate::models::cms::{CmsModel, Parameters, Sets, FAMILIES};
use crate::solver::external::ExternalResults;
use crate::solver::{Engine, EngineError, ModelStats, SolveOutcome, SolveStatus};

#[derive(Debug, Clone, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ReportStatus {
    #[display(fmt = "{}", _0)]
    Solved(SolveStatus),
    #[display(fmt = "engine failure: {}", _0)]
    EngineFailure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub engine: String,
    pub status: ReportStatus,
    pub objective_value: Option<f64>,
    pub variable_count: usize,
    pub constraint_count: usize,
    pub nonzero_count: usize,
    pub iteration_count: Option<u64>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub name: String,
    pub value: f64,
}

/// Values of one variable family above the tolerance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyReport {
    pub family: &'static str,
    pub symbol: &'static str,
    pub values: Vec<Entry>,
    /// Sum over every variable of the family, including the ones left out of `values`
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEntry {
    pub term: &'static str,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandEntry {
    pub product: usize,
    pub period: usize,
    pub demand: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub statistics: Statistics,
    /// Q1 to Q7 at the solution. Empty without solution values.
    pub costs: Vec<CostEntry>,
    /// Empty without solution values
    pub families: Vec<FamilyReport>,
    pub demand: Vec<DemandEntry>,
    pub cell_bounds: CellBounds,
}

/// A results file of an external optimizer read on its own, without the model that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsReport {
    pub statistics: Statistics,
    pub objective_bound: Option<f64>,
    pub families: Vec<FamilyReport>,
}

impl ResultsReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Report {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn status(&self) -> &ReportStatus {
        &self.statistics.status
    }
}

pub struct Reporter {
    tolerance: f64,
}

impl Reporter {
    pub fn new(tolerance: f64) -> Reporter {
        Reporter { tolerance }
    }

    /// Reports a finished solve. Variable values are only read when the status has them.
    pub fn report<E: Engine + ?Sized>(
        &self,
        engine: &E,
        model: &CmsModel,
        sets: &Sets,
        parameters: &Parameters,
        outcome: &SolveOutcome,
        elapsed: Duration,
    ) -> Result<Report, EngineError> {
        let statistics = statistics(
            engine.name(),
            engine.stats(),
            ReportStatus::Solved(outcome.status),
            outcome.objective,
            outcome.iterations,
            elapsed,
        );

        let (costs, families) = if outcome.status.has_values() {
            (self.costs(engine, model)?, self.families(engine, model)?)
        } else {
            debug!("no values to report for status {}", outcome.status);
            (Vec::new(), Vec::new())
        };

        Ok(Report {
            statistics,
            costs,
            families,
            demand: demand(sets, parameters),
            cell_bounds: cell_bounds(parameters),
        })
    }

    /// Reports a solve that ended with an engine error
    pub fn failure<E: Engine + ?Sized>(
        &self,
        engine: &E,
        sets: &Sets,
        parameters: &Parameters,
        error: &EngineError,
        elapsed: Duration,
    ) -> Report {
        Report {
            statistics: statistics(
                engine.name(),
                engine.stats(),
                ReportStatus::EngineFailure(error.to_string()),
                None,
                None,
                elapsed,
            ),
            costs: Vec::new(),
            families: Vec::new(),
            demand: demand(sets, parameters),
            cell_bounds: cell_bounds(parameters),
        }
    }

    /// Reports what a results file says, with the families it names values for
    pub fn results(&self, results: &ExternalResults) -> ResultsReport {
        let status = match results.status {
            Some(status) => ReportStatus::Solved(status),
            None => ReportStatus::EngineFailure("the results file has no status line".to_string()),
        };
        let stats = ModelStats {
            variables: results.total_variables.unwrap_or(0),
            constraints: results.total_constraints.unwrap_or(0),
            nonzeros: results.total_nonzeros.unwrap_or(0),
        };
        let elapsed = results
            .elapsed_seconds
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .unwrap_or_default();

        let families = FAMILIES
            .iter()
            .map(|&(family, symbol)| {
                let prefix = format!("{}(", symbol);
                let values = results
                    .values
                    .iter()
                    .filter(|(name, value)| {
                        name.starts_with(&prefix) && value.abs() > self.tolerance
                    })
                    .map(|(name, value)| Entry {
                        name: name.clone(),
                        value: *value,
                    })
                    .collect();
                FamilyReport {
                    family,
                    symbol,
                    values,
                    total: results.family_total(symbol),
                }
            })
            .collect();

        ResultsReport {
            statistics: statistics(
                "external",
                stats,
                status,
                results.objective,
                results.iterations,
                elapsed,
            ),
            objective_bound: results.objective_bound,
            families,
        }
    }

    fn costs<E: Engine + ?Sized>(
        &self,
        engine: &E,
        model: &CmsModel,
    ) -> Result<Vec<CostEntry>, EngineError> {
        model
            .costs
            .terms()
            .into_iter()
            .map(|(term, expr)| -> Result<CostEntry, EngineError> {
                let value = expr.try_evaluate(|var| engine.value(var))?;
                Ok(CostEntry { term, value })
            })
            .collect()
    }

    fn families<E: Engine + ?Sized>(
        &self,
        engine: &E,
        model: &CmsModel,
    ) -> Result<Vec<FamilyReport>, EngineError> {
        let mut reports = Vec::new();
        for family in model.variables.families() {
            let mut values = Vec::new();
            let mut total = 0.0;
            for (key, var) in &family.vars {
                let value = engine.value(*var)?;
                total += value;
                if value.abs() > self.tolerance {
                    trace!("{}{} = {}", family.symbol, key, value);
                    values.push(Entry {
                        name: var_name(family.symbol, key),
                        value,
                    });
                }
            }
            reports.push(FamilyReport {
                family: family.name,
                symbol: family.symbol,
                values,
                total,
            });
        }
        Ok(reports)
    }
}

fn statistics(
    engine: &str,
    stats: ModelStats,
    status: ReportStatus,
    objective_value: Option<f64>,
    iteration_count: Option<u64>,
    elapsed: Duration,
) -> Statistics {
    Statistics {
        engine: engine.to_string(),
        status,
        objective_value,
        variable_count: stats.variables,
        constraint_count: stats.constraints,
        nonzero_count: stats.nonzeros,
        iteration_count,
        elapsed_seconds: elapsed.as_secs_f64(),
    }
}

fn demand(sets: &Sets, parameters: &Parameters) -> Vec<DemandEntry> {
    iproduct!(sets.P.iter(), sets.T.iter())
        .map(|(p, t)| DemandEntry {
            product: **p,
            period: **t,
            demand: parameters.demand.get(&(*p, *t)).copied().unwrap_or(0.0),
        })
        .collect()
}

fn cell_bounds(parameters: &Parameters) -> CellBounds {
    CellBounds {
        min: parameters.cell_capacity_min,
        max: parameters.cell_capacity_max,
    }
}

fn optional<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "engine:      {}", self.engine)?;
        writeln!(f, "status:      {}", self.status)?;
        writeln!(f, "objective:   {}", optional(&self.objective_value))?;
        writeln!(f, "variables:   {}", self.variable_count)?;
        writeln!(f, "constraints: {}", self.constraint_count)?;
        writeln!(f, "nonzeros:    {}", self.nonzero_count)?;
        writeln!(f, "iterations:  {}", optional(&self.iteration_count))?;
        writeln!(f, "elapsed:     {:.3}s", self.elapsed_seconds)
    }
}

fn write_families(f: &mut fmt::Formatter<'_>, families: &[FamilyReport]) -> fmt::Result {
    for family in families {
        writeln!(f)?;
        writeln!(f, "{} ({}), total {}", family.family, family.symbol, family.total)?;
        if family.values.is_empty() {
            writeln!(f, "  no significant values")?;
        }
        for entry in &family.values {
            writeln!(f, "  {} = {}", entry.name, entry.value)?;
        }
    }
    Ok(())
}

impl fmt::Display for ResultsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statistics)?;
        writeln!(f, "bound:       {}", optional(&self.objective_bound))?;
        write_families(f, &self.families)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statistics)?;

        if !self.costs.is_empty() {
            writeln!(f)?;
            writeln!(f, "cost breakdown")?;
            for cost in &self.costs {
                writeln!(f, "  {:<16}{}", cost.term, cost.value)?;
            }
        }

        write_families(f, &self.families)?;

        writeln!(f)?;
        writeln!(f, "demand")?;
        for entry in &self.demand {
            writeln!(f, "  ({}, {})  {}", entry.product, entry.period, entry.demand)?;
        }
        writeln!(
            f,
            "cell bounds: {} <= machines per cell <= {}",
            self.cell_bounds.min, self.cell_bounds.max
        )
    }
}
