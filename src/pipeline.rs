//! Load, build, solve and report, in that order.

use std::time::{Duration, Instant};

use derive_more::Display;
use log::{error, info, warn};

use crate::config::{Config, ConfigError};
use crate::demand::ensure_demand;
use crate::models::cms::{CmsModel, ModelConstructionError, ModelOptions, Parameters, Sets};
use crate::problem::{DataInconsistency, Problem};
use crate::report::{Report, Reporter};
use crate::solver::{Engine, EngineError, SolveStatus};

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "inconsistent data: {}", _0)]
    Data(DataInconsistency),
    #[display(fmt = "could not build the model: {}", _0)]
    Model(ModelConstructionError),
    #[display(fmt = "{}", _0)]
    Engine(EngineError),
    #[display(fmt = "{}", _0)]
    Config(ConfigError),
}

impl std::error::Error for Error {}

impl From<DataInconsistency> for Error {
    fn from(e: DataInconsistency) -> Self {
        Error::Data(e)
    }
}

impl From<ModelConstructionError> for Error {
    fn from(e: ModelConstructionError) -> Self {
        Error::Model(e)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Error::Engine(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

/// Fills in missing demand and validates the document into sets and parameters
pub fn load(mut problem: Problem, seed: Option<u64>) -> Result<(Sets, Parameters), Error> {
    ensure_demand(&mut problem, seed)?;
    let sets = Sets::new(&problem)?;
    let parameters = Parameters::new(&problem, &sets)?;
    info!(
        "loaded {} products, {} machines, {} cells over {} periods",
        sets.P.len(),
        sets.M.len(),
        sets.C.len(),
        sets.T.len()
    );
    Ok((sets, parameters))
}

/// One solve of one instance. Consumed by [`Pipeline::run`].
pub struct Pipeline<E: Engine> {
    sets: Sets,
    parameters: Parameters,
    engine: E,
    options: ModelOptions,
    time_limit: Option<Duration>,
    tolerance: f64,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(
        sets: Sets,
        parameters: Parameters,
        engine: E,
        options: ModelOptions,
        time_limit: Option<Duration>,
        tolerance: f64,
    ) -> Pipeline<E> {
        Pipeline {
            sets,
            parameters,
            engine,
            options,
            time_limit,
            tolerance,
        }
    }

    pub fn from_config(
        sets: Sets,
        parameters: Parameters,
        engine: E,
        config: &Config,
    ) -> Pipeline<E> {
        Pipeline::new(
            sets,
            parameters,
            engine,
            config.model,
            config.time_limit(),
            config.tolerance,
        )
    }

    /// Builds the model, solves it and reports the result.
    ///
    /// Data and model construction errors are returned. Engine errors raised while solving or
    /// reading values end up in the report instead.
    pub fn run(mut self) -> Result<Report, Error> {
        let model = CmsModel::build(
            &mut self.engine,
            &self.sets,
            &self.parameters,
            &self.options,
        )?;
        let reporter = Reporter::new(self.tolerance);

        info!("solving with {}", self.engine.name());
        let start = Instant::now();
        let outcome = match self.engine.solve(self.time_limit) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} failed: {}", self.engine.name(), e);
                let elapsed = start.elapsed();
                let report =
                    reporter.failure(&self.engine, &self.sets, &self.parameters, &e, elapsed);
                return Ok(report);
            }
        };
        let elapsed = start.elapsed();

        match outcome.status {
            SolveStatus::Optimal | SolveStatus::Feasible => info!(
                "{} solution with objective {:?} after {:?}",
                outcome.status, outcome.objective, elapsed
            ),
            SolveStatus::TimedOut => warn!(
                "time limit reached after {:?}, best objective {:?}",
                elapsed, outcome.objective
            ),
            SolveStatus::Infeasible | SolveStatus::Unbounded => {
                warn!("model is {}", outcome.status)
            }
        }

        let report = reporter.report(
            &self.engine,
            &model,
            &self.sets,
            &self.parameters,
            &outcome,
            elapsed,
        );
        match report {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("could not read the solution: {}", e);
                Ok(reporter.failure(&self.engine, &self.sets, &self.parameters, &e, elapsed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{Table1, Table2};
    use crate::problem::tests::SMALL;
    use crate::report::ReportStatus;
    use crate::solver::{ExternalCommand, ExternalEngine, MicrolpEngine};

    fn small() -> Problem {
        Problem::from_json(SMALL).unwrap()
    }

    fn solve(problem: Problem) -> Report {
        let (sets, parameters) = load(problem, Some(1)).unwrap();
        Pipeline::new(
            sets,
            parameters,
            MicrolpEngine::new(),
            ModelOptions::default(),
            Some(Duration::from_secs(60)),
            1e-6,
        )
        .run()
        .unwrap()
    }

    /// The reported value of a variable, zero when filtered out
    fn value(report: &Report, name: &str) -> f64 {
        report
            .families
            .iter()
            .flat_map(|family| family.values.iter())
            .find(|entry| entry.name == name)
            .map(|entry| entry.value)
            .unwrap_or(0.0)
    }

    #[test]
    fn small_instance_is_solved_to_optimality() {
        let report = solve(small());
        assert_eq!(report.status(), &ReportStatus::Solved(SolveStatus::Optimal));

        let objective = report.statistics.objective_value.unwrap();
        assert!((objective - 130.0).abs() < 1e-6, "objective {}", objective);
        assert!((value(&report, "X(1,1,1,1,1,1)") - 10.0).abs() < 1e-6);
        assert_eq!(value(&report, "X(1,2,1,1,1,1)"), 0.0);
        assert!((value(&report, "Z(1,1,1,1,1,1)") - 1.0).abs() < 1e-6);
        assert!((value(&report, "MN(1,1,1)") - 1.0).abs() < 1e-6);

        let total: f64 = report.costs.iter().map(|c| c.value).sum();
        assert!((total - objective).abs() < 1e-6);
    }

    #[test]
    fn flow_only_on_set_up_eligible_routes() {
        let mut problem = small();
        problem.demand = Some(Table2::Uniform(6.0));
        let report = solve(problem);
        assert_eq!(report.status(), &ReportStatus::Solved(SolveStatus::Optimal));

        let flows = &report.families[0];
        assert_eq!(flows.symbol, "X");
        assert!(!flows.values.is_empty());
        for entry in &flows.values {
            let setup = entry.name.replacen('X', "Z", 1);
            assert!((value(&report, &setup) - 1.0).abs() < 1e-6, "{} is not set up", entry.name);
        }
    }

    #[test]
    fn ineligible_routes_carry_no_flow() {
        let mut problem = small();
        problem.machines = vec![1, 2];
        problem.machine_capacity = Table1::Uniform(100.0);
        problem.setup_cost = Table1::Uniform(100.0);
        problem.purchase_cost = Table1::Uniform(1000.0);
        problem.sale_cost = Table1::Uniform(200.0);
        problem.initial_machines = Table1::Uniform(1.0);
        // product 1 only on machine 2
        problem.eligibility = Table2::Nested(vec![vec![0.0, 1.0], vec![1.0, 1.0]]);
        let report = solve(problem);
        assert_eq!(report.status(), &ReportStatus::Solved(SolveStatus::Optimal));

        let flows = &report.families[0];
        assert!(
            flows.values.iter().all(|entry| !entry.name.starts_with("X(1,1,1,")),
            "flow on an ineligible route: {:?}",
            flows.values
        );
        assert!((value(&report, "X(1,1,2,1,1,1)") - 10.0).abs() < 1e-6);
    }

    #[test]
    fn crossed_cell_bounds_are_infeasible() {
        let mut problem = small();
        problem.cell_capacity_min = 3.0;
        problem.cell_capacity_max = 2.0;
        let report = solve(problem);
        assert_eq!(report.status(), &ReportStatus::Solved(SolveStatus::Infeasible));
        assert!(report.families.is_empty());
        assert_eq!(report.statistics.objective_value, None);
    }

    #[test]
    fn machine_balance_holds_across_periods() {
        let mut problem = small();
        problem.periods = vec![1, 2];
        problem.demand = Some(Table2::Keyed(
            [("(1, 1)", 10.0), ("(1, 2)", 150.0), ("(2, 1)", 0.0), ("(2, 2)", 0.0)]
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        ));
        problem.machine_slots = vec![1, 2];
        problem.lot_size = Table1::Uniform(200.0);
        problem.subcontract_capacity = Table1::Uniform(0.0);
        let report = solve(problem);
        assert_eq!(report.status(), &ReportStatus::Solved(SolveStatus::Optimal));

        let mut before = 1.0;
        for t in [1, 2] {
            let installed = value(&report, &format!("MN(1,1,{})", t));
            let added = value(&report, &format!("NAJ(1,1,{})", t));
            let removed = value(&report, &format!("NRE(1,1,{})", t));
            assert!((installed - (before + added - removed)).abs() < 1e-6);
            before = installed;
        }
        // 150 units in period 2 need a second machine
        assert!(value(&report, "MN(1,1,2)") >= 2.0 - 1e-6);
    }

    #[test]
    fn runs_are_repeatable() {
        let first = solve(small());
        let second = solve(small());
        assert_eq!(
            first.statistics.objective_value,
            second.statistics.objective_value
        );
        assert_eq!(first.families, second.families);
    }

    #[test]
    fn sampled_demand_is_seeded() {
        let text = SMALL.replace(
            r#""demand": {"(1, 1)": 10, "(2, 1)": 0},"#,
            r#""params": {"moyenne": 20, "ecart_type": 5},"#,
        );
        let problem = Problem::from_json(&text).unwrap();
        let (_, first) = load(problem.clone(), Some(42)).unwrap();
        let (_, second) = load(problem, Some(42)).unwrap();
        assert_eq!(first.demand, second.demand);
    }

    #[test]
    fn engine_failures_become_reports() {
        let (sets, parameters) = load(small(), None).unwrap();
        let engine = ExternalEngine::new(ExternalCommand::new(
            "/nonexistent/cms-optimizer",
            vec!["{model}".to_string()],
        ));
        let report = Pipeline::new(sets, parameters, engine, ModelOptions::default(), None, 1e-6)
            .run()
            .unwrap();
        assert!(matches!(report.status(), ReportStatus::EngineFailure(_)));
        assert!(report.families.is_empty());
        assert!(report.statistics.variable_count > 0);
    }

    #[test]
    fn inconsistent_data_is_an_error() {
        let mut problem = small();
        problem.eligibility = Table2::Uniform(0.0);
        assert!(matches!(
            load(problem, None),
            Err(Error::Data(DataInconsistency::NoEligibleMachine { product: 1 }))
        ));
    }
}
