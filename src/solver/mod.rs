//! The engine interface the model builder and the reporter are written against, and the engines
//! implementing it.

pub mod expr;
pub mod external;
#[cfg(feature = "gurobi")]
pub mod gurobi;
pub mod microlp;

pub use expr::{Constraint, LinExpr, LinSum, Relation, VarHandle};
pub use external::{ExternalCommand, ExternalEngine, ExternalEngineFailure};
#[cfg(feature = "gurobi")]
pub use gurobi::GurobiEngine;
pub use microlp::MicrolpEngine;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum VarKind {
    #[display(fmt = "continuous")]
    Continuous,
    #[display(fmt = "integer")]
    Integer,
    #[display(fmt = "binary")]
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Sense {
    #[display(fmt = "minimize")]
    Minimize,
    #[display(fmt = "maximize")]
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    #[display(fmt = "optimal")]
    Optimal,
    #[display(fmt = "feasible")]
    Feasible,
    #[display(fmt = "infeasible")]
    Infeasible,
    #[display(fmt = "unbounded")]
    Unbounded,
    #[display(fmt = "timed out")]
    TimedOut,
}

impl SolveStatus {
    /// Whether variable values may be queried after a solve ending in this status
    pub fn has_values(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub iterations: Option<u64>,
}

impl SolveOutcome {
    /// An outcome without objective or iteration count
    pub fn bare(status: SolveStatus) -> SolveOutcome {
        SolveOutcome {
            status,
            objective: None,
            iterations: None,
        }
    }
}

/// Size of the model held by an engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub variables: usize,
    pub constraints: usize,
    pub nonzeros: usize,
}

#[derive(Debug, Display)]
pub enum EngineError {
    #[display(fmt = "variable {} was not declared on this engine", _0)]
    UnknownVariable(VarHandle),
    #[display(fmt = "no solution values available")]
    NotSolved,
    #[display(fmt = "no objective has been set")]
    MissingObjective,
    #[display(fmt = "integer variable {} needs finite bounds", _0)]
    UnboundedInteger(String),
    #[display(fmt = "solver failure: {}", _0)]
    Internal(String),
    #[display(fmt = "external engine failure: {}", _0)]
    External(ExternalEngineFailure),
}

impl std::error::Error for EngineError {}

impl From<ExternalEngineFailure> for EngineError {
    fn from(failure: ExternalEngineFailure) -> Self {
        EngineError::External(failure)
    }
}

/// A MILP engine: declares variables and linear constraints, solves, and reports values.
pub trait Engine {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    fn add_var(
        &mut self,
        name: &str,
        kind: VarKind,
        lb: f64,
        ub: f64,
    ) -> Result<VarHandle, EngineError>;

    fn add_constr(&mut self, constraint: &Constraint) -> Result<(), EngineError>;

    fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), EngineError>;

    /// Solves the model, returning `TimedOut` once `time_limit` has passed.
    ///
    /// No solver work is left running when this returns, timed out or not.
    fn solve(&mut self, time_limit: Option<Duration>) -> Result<SolveOutcome, EngineError>;

    /// Value of a variable. Only defined after a solve with [`SolveStatus::has_values`].
    fn value(&self, var: VarHandle) -> Result<f64, EngineError>;

    fn stats(&self) -> ModelStats;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn add_var(
        &mut self,
        name: &str,
        kind: VarKind,
        lb: f64,
        ub: f64,
    ) -> Result<VarHandle, EngineError> {
        (**self).add_var(name, kind, lb, ub)
    }

    fn add_constr(&mut self, constraint: &Constraint) -> Result<(), EngineError> {
        (**self).add_constr(constraint)
    }

    fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), EngineError> {
        (**self).set_objective(expr, sense)
    }

    fn solve(&mut self, time_limit: Option<Duration>) -> Result<SolveOutcome, EngineError> {
        (**self).solve(time_limit)
    }

    fn value(&self, var: VarHandle) -> Result<f64, EngineError> {
        (**self).value(var)
    }

    fn stats(&self) -> ModelStats {
        (**self).stats()
    }
}

/// A declared variable as kept by the buffering engines
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub kind: VarKind,
    pub lb: f64,
    pub ub: f64,
}

/// In-memory copy of a model, for engines that hand the whole model over at solve time.
#[derive(Debug, Clone, Default)]
pub struct ModelBuffer {
    pub vars: Vec<VarDecl>,
    pub constraints: Vec<Constraint>,
    pub objective: Option<(LinExpr, Sense)>,
}

impl ModelBuffer {
    pub fn add_var(&mut self, name: &str, kind: VarKind, lb: f64, ub: f64) -> VarHandle {
        let (lb, ub) = match kind {
            VarKind::Binary => (lb.max(0.0), ub.min(1.0)),
            _ => (lb, ub),
        };
        self.vars.push(VarDecl {
            name: name.to_string(),
            kind,
            lb,
            ub,
        });
        VarHandle::from(self.vars.len() - 1)
    }

    pub fn add_constr(&mut self, constraint: &Constraint) -> Result<(), EngineError> {
        self.check(&constraint.lhs)?;
        self.constraints.push(constraint.clone());
        Ok(())
    }

    pub fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), EngineError> {
        let expr = expr.compact();
        self.check(&expr)?;
        self.objective = Some((expr, sense));
        Ok(())
    }

    /// Fails on the first handle this buffer did not hand out
    fn check(&self, expr: &LinExpr) -> Result<(), EngineError> {
        match expr
            .terms()
            .iter()
            .find(|(var, _)| var.index() >= self.vars.len())
        {
            Some((var, _)) => Err(EngineError::UnknownVariable(*var)),
            None => Ok(()),
        }
    }

    /// A constraint without variables whose constant sides contradict each other
    pub fn violated_constant_row(&self, tolerance: f64) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.lhs.is_empty() && !c.is_satisfied(|_| 0.0, tolerance))
    }

    /// Objective constant, which neither engine is handed
    pub fn objective_offset(&self) -> f64 {
        self.objective
            .as_ref()
            .map(|(expr, _)| expr.offset())
            .unwrap_or(0.0)
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            variables: self.vars.len(),
            constraints: self.constraints.len(),
            nonzeros: self.constraints.iter().map(|c| c.lhs.terms().len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_rejects_foreign_handles() {
        let mut buffer = ModelBuffer::default();
        let x = buffer.add_var("x", VarKind::Continuous, 0.0, f64::INFINITY);
        let foreign = VarHandle::from(7usize);

        assert!(buffer.add_constr(&Constraint::le("ok", x, 1.0)).is_ok());
        assert!(matches!(
            buffer.add_constr(&Constraint::le("bad", x + foreign, 1.0)),
            Err(EngineError::UnknownVariable(v)) if v == foreign
        ));
    }

    #[test]
    fn buffer_counts_nonzeros() {
        let mut buffer = ModelBuffer::default();
        let x = buffer.add_var("x", VarKind::Continuous, 0.0, f64::INFINITY);
        let z = buffer.add_var("z", VarKind::Binary, 0.0, 1.0);
        buffer
            .add_constr(&Constraint::le("link", x, 10.0 * z))
            .unwrap();
        buffer.add_constr(&Constraint::le("lot", x, 5.0)).unwrap();

        assert_eq!(
            buffer.stats(),
            ModelStats {
                variables: 2,
                constraints: 2,
                nonzeros: 3
            }
        );
    }
}
