use std::time::Duration;

use grb::prelude::*;
use log::{debug, warn};

use super::{
    Constraint, Engine, EngineError, LinExpr, ModelStats, Relation, Sense, SolveOutcome,
    SolveStatus, VarHandle, VarKind,
};

impl From<grb::Error> for EngineError {
    fn from(e: grb::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

/// Engine backed by a Gurobi model.
pub struct GurobiEngine {
    model: Model,
    vars: Vec<Var>,
    constraints: usize,
    nonzeros: usize,
    solved: bool,
}

impl GurobiEngine {
    pub fn new(name: &str) -> Result<GurobiEngine, EngineError> {
        let mut model = Model::new(name)?;
        model.set_param(param::OutputFlag, 0)?;
        Ok(GurobiEngine {
            model,
            vars: Vec::new(),
            constraints: 0,
            nonzeros: 0,
            solved: false,
        })
    }

    fn var(&self, handle: VarHandle) -> Result<Var, EngineError> {
        self.vars
            .get(handle.index())
            .copied()
            .ok_or(EngineError::UnknownVariable(handle))
    }

    fn expr(&self, expr: &LinExpr) -> Result<Expr, EngineError> {
        let terms = expr
            .terms()
            .iter()
            .map(|(handle, coeff)| Ok(*coeff * self.var(*handle)?))
            .collect::<Result<Vec<Expr>, EngineError>>()?;
        Ok(terms.into_iter().grb_sum() + expr.offset())
    }
}

impl Engine for GurobiEngine {
    fn name(&self) -> &str {
        "gurobi"
    }

    fn add_var(
        &mut self,
        name: &str,
        kind: VarKind,
        lb: f64,
        ub: f64,
    ) -> Result<VarHandle, EngineError> {
        let vtype = match kind {
            VarKind::Continuous => VarType::Continuous,
            VarKind::Integer => VarType::Integer,
            VarKind::Binary => VarType::Binary,
        };
        let var = self
            .model
            .add_var(name, vtype, 0.0, lb, ub, std::iter::empty())?;
        self.vars.push(var);
        Ok(VarHandle::from(self.vars.len() - 1))
    }

    fn add_constr(&mut self, constraint: &Constraint) -> Result<(), EngineError> {
        let lhs = self.expr(&constraint.lhs)?;
        let rhs = constraint.rhs;
        let ineq = match constraint.relation {
            Relation::Le => c!(lhs <= rhs),
            Relation::Ge => c!(lhs >= rhs),
            Relation::Eq => c!(lhs == rhs),
        };
        self.model.add_constr(&constraint.name, ineq)?;
        self.constraints += 1;
        self.nonzeros += constraint.lhs.terms().len();
        Ok(())
    }

    fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), EngineError> {
        let objective = self.expr(&expr.compact())?;
        let sense = match sense {
            Sense::Minimize => Minimize,
            Sense::Maximize => Maximize,
        };
        self.model.set_objective(objective, sense)?;
        Ok(())
    }

    fn solve(&mut self, time_limit: Option<Duration>) -> Result<SolveOutcome, EngineError> {
        self.solved = false;
        if let Some(limit) = time_limit {
            self.model.set_param(param::TimeLimit, limit.as_secs_f64())?;
        }
        self.model.optimize()?;

        let status = match self.model.status()? {
            Status::Optimal => SolveStatus::Optimal,
            Status::SubOptimal => SolveStatus::Feasible,
            Status::Infeasible => SolveStatus::Infeasible,
            Status::InfOrUnbd | Status::Unbounded => SolveStatus::Unbounded,
            Status::TimeLimit => {
                warn!("gurobi stopped at the time limit");
                SolveStatus::TimedOut
            }
            other => return Err(EngineError::Internal(format!("gurobi ended with {:?}", other))),
        };
        debug!("gurobi status {:?}", status);

        let has_solution = self.model.get_attr(attr::SolCount)? > 0;
        let objective = if has_solution {
            Some(self.model.get_attr(attr::ObjVal)?)
        } else {
            None
        };
        let iterations = self.model.get_attr(attr::IterCount)?;

        self.solved = status.has_values();
        Ok(SolveOutcome {
            status,
            objective,
            iterations: Some(iterations as u64),
        })
    }

    fn value(&self, var: VarHandle) -> Result<f64, EngineError> {
        if !self.solved {
            return Err(EngineError::NotSolved);
        }
        Ok(self.model.get_obj_attr(attr::X, &self.var(var)?)?)
    }

    fn stats(&self) -> ModelStats {
        ModelStats {
            variables: self.vars.len(),
            constraints: self.constraints,
            nonzeros: self.nonzeros,
        }
    }
}
