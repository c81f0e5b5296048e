//! Reader for the line oriented solution reports written by external optimizers.

use std::collections::BTreeMap;

use log::{debug, trace, warn};
use serde::Serialize;

use super::lp_format::sanitize;
use super::ExternalEngineFailure;
use crate::solver::SolveStatus;

/// Everything recognised in a results file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExternalResults {
    pub status: Option<SolveStatus>,
    pub objective: Option<f64>,
    pub objective_bound: Option<f64>,
    pub iterations: Option<u64>,
    pub elapsed_seconds: Option<f64>,
    pub total_variables: Option<usize>,
    pub integer_variables: Option<usize>,
    pub total_constraints: Option<usize>,
    pub total_nonzeros: Option<usize>,
    /// Variable values by whitespace-free name
    pub values: BTreeMap<String, f64>,
}

impl ExternalResults {
    /// Value of a variable. Variables missing from the file are at zero.
    pub fn value(&self, name: &str) -> f64 {
        self.values.get(&sanitize(name)).copied().unwrap_or(0.0)
    }

    /// Sum of the values of every variable whose name starts with `symbol(`
    pub fn family_total(&self, symbol: &str) -> f64 {
        let prefix = format!("{}(", symbol);
        self.values
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, value)| value)
            .sum()
    }
}

fn status_of(line: &str) -> Option<SolveStatus> {
    let line = line.to_lowercase();
    if line.contains("global optimal solution found") {
        Some(SolveStatus::Optimal)
    } else if line.contains("no feasible solution found") {
        Some(SolveStatus::Infeasible)
    } else if line.contains("local optimal solution found")
        || line.contains("feasible solution found")
    {
        Some(SolveStatus::Feasible)
    } else if line.contains("unbounded solution") {
        Some(SolveStatus::Unbounded)
    } else if line.contains("interrupted") || line.contains("time limit") {
        Some(SolveStatus::TimedOut)
    } else {
        None
    }
}

fn number<T: std::str::FromStr>(
    text: &str,
    line: usize,
    content: &str,
) -> Result<T, ExternalEngineFailure> {
    text.split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| ExternalEngineFailure::Malformed {
            line,
            content: content.to_string(),
        })
}

/// Splits a table row into the variable name and the remaining columns. Names may contain
/// whitespace inside their parentheses, as in `X( 1, 2)`.
fn split_row(row: &str) -> (&str, &str) {
    let end = match (row.find('('), row.find(char::is_whitespace)) {
        (Some(open), Some(space)) if open < space => {
            row[open..].find(')').map(|close| open + close + 1)
        }
        (_, space) => space,
    };
    match end {
        Some(end) if end < row.len() => row.split_at(end),
        _ => (row, ""),
    }
}

/// Part of a results file being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Variables,
    /// Slack and dual values per constraint, which the reports have no use for
    Rows,
}

/// Parses the text of a results file.
pub fn parse(text: &str) -> Result<ExternalResults, ExternalEngineFailure> {
    let mut results = ExternalResults::default();
    let mut section = Section::Summary;

    for (index, raw) in text.lines().enumerate() {
        let number_of_line = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let lower = line.to_lowercase();
        if lower.starts_with("variable") && lower.contains("value") {
            section = Section::Variables;
            continue;
        }
        if lower.starts_with("row") && lower.contains("slack") {
            section = Section::Rows;
            continue;
        }

        match section {
            Section::Variables => {
                let (name, rest) = split_row(line);
                let value: f64 = number(rest, number_of_line, raw)?;
                trace!("{} = {}", name, value);
                results.values.insert(sanitize(name), value);
                continue;
            }
            Section::Rows => {
                trace!("skipping row line {}: {}", number_of_line, line);
                continue;
            }
            Section::Summary => (),
        }

        if let Some(status) = status_of(line) {
            results.status = Some(status);
            continue;
        }

        let (label, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => {
                warn!("ignoring unrecognised results line {}: {}", number_of_line, line);
                continue;
            }
        };

        match label.trim().to_lowercase().as_str() {
            "objective value" => results.objective = Some(number(value, number_of_line, raw)?),
            "objective bound" => {
                results.objective_bound = Some(number(value, number_of_line, raw)?)
            }
            "total solver iterations" => {
                results.iterations = Some(number(value, number_of_line, raw)?)
            }
            "elapsed runtime seconds" => {
                results.elapsed_seconds = Some(number(value, number_of_line, raw)?)
            }
            "total variables" => {
                results.total_variables = Some(number(value, number_of_line, raw)?)
            }
            "integer variables" => {
                results.integer_variables = Some(number(value, number_of_line, raw)?)
            }
            "total constraints" => {
                results.total_constraints = Some(number(value, number_of_line, raw)?)
            }
            "total nonzeros" => results.total_nonzeros = Some(number(value, number_of_line, raw)?),
            other => debug!("ignoring results entry '{}'", other),
        }
    }

    Ok(results)
}
