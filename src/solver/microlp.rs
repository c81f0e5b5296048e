use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};
use microlp::{ComparisonOp, OptimizationDirection, Problem, Solution, Variable};

use super::{
    Constraint, Engine, EngineError, LinExpr, ModelBuffer, ModelStats, Relation, Sense,
    SolveOutcome, SolveStatus, VarHandle, VarKind,
};

/// Slack allowed when snapping integer variables to the nearest integer
const INTEGRALITY_TOLERANCE: f64 = 1e-6;

/// In-process engine backed by the `microlp` crate.
///
/// The model is buffered and translated into the LP relaxation of a [`microlp::Problem`] when
/// `solve` is called. Integrality is enforced by a depth-first branch and bound over warm
/// started [`microlp::Solution`]s, run on a worker thread that checks a stop flag between nodes.
#[derive(Debug, Default)]
pub struct MicrolpEngine {
    buffer: ModelBuffer,
    values: Option<Vec<f64>>,
}

/// The LP relaxation of the buffered model and the columns that must come out integral
struct Relaxation {
    problem: Problem,
    direction: OptimizationDirection,
    integers: Vec<(Variable, VarKind)>,
}

/// Best integral point found so far
#[derive(Debug, Clone)]
struct Incumbent {
    objective: f64,
    values: Vec<f64>,
}

#[derive(Debug)]
enum Search {
    /// Every node was explored, so the incumbent is optimal
    Finished(Option<Incumbent>),
    /// The stop flag was raised with nodes left to explore
    Stopped(Option<Incumbent>),
}

fn improves(direction: OptimizationDirection, objective: f64, best: Option<&Incumbent>) -> bool {
    match (best, direction) {
        (None, _) => true,
        (Some(best), OptimizationDirection::Minimize) => {
            objective < best.objective - INTEGRALITY_TOLERANCE
        }
        (Some(best), OptimizationDirection::Maximize) => {
            objective > best.objective + INTEGRALITY_TOLERANCE
        }
    }
}

/// The integer column whose value is furthest from an integer, if any is fractional
fn most_fractional(
    node: &Solution,
    integers: &[(Variable, VarKind)],
) -> Option<(Variable, VarKind, f64)> {
    let distance = |value: f64| (value - value.round()).abs();
    integers
        .iter()
        .map(|&(var, kind)| (var, kind, *node.var_value(var)))
        .filter(|(_, _, value)| distance(*value) > INTEGRALITY_TOLERANCE)
        .max_by(|a, b| distance(a.2).total_cmp(&distance(b.2)))
}

fn branch_and_bound(relaxation: Relaxation, stop: &AtomicBool) -> Result<Search, microlp::Error> {
    let root = relaxation.problem.solve()?;
    let mut incumbent: Option<Incumbent> = None;
    let mut stack = vec![root];
    let mut nodes = 0u64;

    while let Some(node) = stack.pop() {
        if stop.load(Ordering::Relaxed) {
            debug!("branch and bound stopped after {} nodes", nodes);
            return Ok(Search::Stopped(incumbent));
        }
        nodes += 1;

        if !improves(relaxation.direction, node.objective(), incumbent.as_ref()) {
            continue;
        }

        let (var, kind, value) = match most_fractional(&node, &relaxation.integers) {
            Some(branch) => branch,
            None => {
                trace!("integral point with objective {} at node {}", node.objective(), nodes);
                incumbent = Some(Incumbent {
                    objective: node.objective(),
                    values: node.iter().map(|(_, v)| *v).collect(),
                });
                continue;
            }
        };

        let (down, up) = match kind {
            VarKind::Binary => (node.clone().fix_var(var, 0.0), node.fix_var(var, 1.0)),
            _ => (
                node.clone()
                    .add_constraint([(var, 1.0)], ComparisonOp::Le, value.floor()),
                node.add_constraint([(var, 1.0)], ComparisonOp::Ge, value.ceil()),
            ),
        };
        // Pushed last, so the down branch is explored first
        for child in [up, down] {
            match child {
                Ok(child) => stack.push(child),
                Err(microlp::Error::InternalError(message)) => {
                    return Err(microlp::Error::InternalError(message))
                }
                Err(_) => (),
            }
        }
    }

    debug!("branch and bound finished after {} nodes", nodes);
    Ok(Search::Finished(incumbent))
}

fn worker_lost() -> EngineError {
    EngineError::Internal("microlp worker panicked".to_string())
}

impl MicrolpEngine {
    pub fn new() -> MicrolpEngine {
        MicrolpEngine::default()
    }

    fn translate(&self) -> Result<Relaxation, EngineError> {
        let (objective, sense) = self
            .buffer
            .objective
            .as_ref()
            .ok_or(EngineError::MissingObjective)?;

        let direction = match sense {
            Sense::Minimize => OptimizationDirection::Minimize,
            Sense::Maximize => OptimizationDirection::Maximize,
        };

        let mut coefficients = vec![0.0; self.buffer.vars.len()];
        for (var, coeff) in objective.terms() {
            coefficients[var.index()] += coeff;
        }

        let mut problem = Problem::new(direction);
        let mut variables = Vec::with_capacity(self.buffer.vars.len());
        let mut integers = Vec::new();
        for (decl, coeff) in self.buffer.vars.iter().zip(coefficients) {
            let var = match decl.kind {
                VarKind::Continuous => problem.add_var(coeff, (decl.lb, decl.ub)),
                VarKind::Integer | VarKind::Binary => {
                    let var = problem.add_var(coeff, (decl.lb.ceil(), decl.ub.floor()));
                    integers.push((var, decl.kind));
                    var
                }
            };
            variables.push(var);
        }

        for constraint in &self.buffer.constraints {
            if constraint.lhs.is_empty() {
                continue;
            }

            let op = match constraint.relation {
                Relation::Le => ComparisonOp::Le,
                Relation::Ge => ComparisonOp::Ge,
                Relation::Eq => ComparisonOp::Eq,
            };
            let terms = constraint
                .lhs
                .terms()
                .iter()
                .map(|(var, coeff)| (variables[var.index()], *coeff))
                .collect::<Vec<_>>();
            problem.add_constraint(&terms[..], op, constraint.rhs);
        }

        Ok(Relaxation {
            problem,
            direction,
            integers,
        })
    }

    fn snap(&self, values: Vec<f64>) -> Vec<f64> {
        values
            .into_iter()
            .zip(&self.buffer.vars)
            .map(|(value, decl)| match decl.kind {
                VarKind::Continuous => value,
                VarKind::Integer | VarKind::Binary => {
                    let rounded = value.round();
                    if (rounded - value).abs() <= INTEGRALITY_TOLERANCE {
                        rounded
                    } else {
                        value
                    }
                }
            })
            .collect()
    }
}

impl Engine for MicrolpEngine {
    fn name(&self) -> &str {
        "microlp"
    }

    /// Integer variables need finite bounds, the search branches inside them
    fn add_var(
        &mut self,
        name: &str,
        kind: VarKind,
        lb: f64,
        ub: f64,
    ) -> Result<VarHandle, EngineError> {
        if kind == VarKind::Integer && !(lb.is_finite() && ub.is_finite()) {
            return Err(EngineError::UnboundedInteger(name.to_string()));
        }
        trace!("declaring {} variable {} in [{}, {}]", kind, name, lb, ub);
        Ok(self.buffer.add_var(name, kind, lb, ub))
    }

    fn add_constr(&mut self, constraint: &Constraint) -> Result<(), EngineError> {
        self.buffer.add_constr(constraint)
    }

    fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), EngineError> {
        self.buffer.set_objective(expr, sense)
    }

    /// On timeout the search is told to stop and joined. A node already being reoptimized is
    /// finished first, so `solve` may return slightly after `time_limit`.
    fn solve(&mut self, time_limit: Option<Duration>) -> Result<SolveOutcome, EngineError> {
        self.values = None;

        let offset = self.buffer.objective_offset();
        let relaxation = self.translate()?;
        if let Some(row) = self.buffer.violated_constant_row(INTEGRALITY_TOLERANCE) {
            debug!("constant row {} cannot hold", row.name);
            return Ok(SolveOutcome::bare(SolveStatus::Infeasible));
        }
        debug!(
            "handing {:?} with {} integer columns to microlp",
            relaxation.problem,
            relaxation.integers.len()
        );

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let (sender, receiver) = mpsc::channel();
        let worker = thread::spawn(move || {
            let _ = sender.send(branch_and_bound(relaxation, &worker_stop));
        });

        let received = match time_limit {
            Some(limit) => match receiver.recv_timeout(limit) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("microlp did not finish within {:?}, stopping it", limit);
                    stop.store(true, Ordering::Relaxed);
                    receiver.recv().map_err(|_| worker_lost())?
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(worker_lost()),
            },
            None => receiver.recv().map_err(|_| worker_lost())?,
        };
        worker.join().map_err(|_| worker_lost())?;

        match received {
            Ok(Search::Finished(Some(best))) => {
                self.values = Some(self.snap(best.values));
                Ok(SolveOutcome {
                    status: SolveStatus::Optimal,
                    objective: Some(best.objective + offset),
                    iterations: None,
                })
            }
            Ok(Search::Finished(None)) => Ok(SolveOutcome::bare(SolveStatus::Infeasible)),
            Ok(Search::Stopped(best)) => Ok(SolveOutcome {
                status: SolveStatus::TimedOut,
                objective: best.map(|best| best.objective + offset),
                iterations: None,
            }),
            Err(microlp::Error::Infeasible) => Ok(SolveOutcome::bare(SolveStatus::Infeasible)),
            Err(microlp::Error::Unbounded) => Ok(SolveOutcome::bare(SolveStatus::Unbounded)),
            Err(microlp::Error::InternalError(message)) => Err(EngineError::Internal(message)),
        }
    }

    fn value(&self, var: VarHandle) -> Result<f64, EngineError> {
        let values = self.values.as_ref().ok_or(EngineError::NotSolved)?;
        values
            .get(var.index())
            .copied()
            .ok_or(EngineError::UnknownVariable(var))
    }

    fn stats(&self) -> ModelStats {
        self.buffer.stats()
    }
}
