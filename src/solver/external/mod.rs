//! Engine that hands the model to an optimizer process through files.
//!
//! The model is written in LP format, the configured program is started with the `{model}` and
//! `{results}` placeholders of its arguments replaced by the two file paths, and the results
//! file it leaves behind is parsed once the process exits.

pub mod lp_format;
pub mod results;

pub use results::{parse, ExternalResults};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use derive_more::Display;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    Constraint, Engine, EngineError, LinExpr, ModelBuffer, ModelStats, Sense, SolveOutcome,
    SolveStatus, VarHandle, VarKind,
};

/// How often a running optimizer is checked for completion
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Failures specific to running an external optimizer
#[derive(Debug, Clone, PartialEq, Display)]
pub enum ExternalEngineFailure {
    #[display(fmt = "i/o error: {}", _0)]
    Io(String),
    #[display(fmt = "could not start the optimizer: {}", _0)]
    Spawn(String),
    #[display(fmt = "optimizer exited with status {:?}", _0)]
    ExitStatus(Option<i32>),
    #[display(fmt = "no results file at {}", _0)]
    MissingResults(String),
    #[display(fmt = "malformed results line {}: {}", line, content)]
    Malformed { line: usize, content: String },
}

impl std::error::Error for ExternalEngineFailure {}

impl From<io::Error> for ExternalEngineFailure {
    fn from(e: io::Error) -> Self {
        ExternalEngineFailure::Io(e.to_string())
    }
}

/// The optimizer program to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Where the model and results files are placed. The system temp directory if unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Leave the model and results files behind after the solve
    #[serde(default)]
    pub keep_files: bool,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> ExternalCommand {
        ExternalCommand {
            program: program.into(),
            args,
            work_dir: None,
            keep_files: false,
        }
    }

    fn arguments(&self, model: &Path, results: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{model}", &model.to_string_lossy())
                    .replace("{results}", &results.to_string_lossy())
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct ExternalEngine {
    command: ExternalCommand,
    buffer: ModelBuffer,
    results: Option<ExternalResults>,
}

impl ExternalEngine {
    pub fn new(command: ExternalCommand) -> ExternalEngine {
        ExternalEngine {
            command,
            buffer: ModelBuffer::default(),
            results: None,
        }
    }

    /// The parsed results of the last solve, if any
    pub fn results(&self) -> Option<&ExternalResults> {
        self.results.as_ref()
    }

    /// Runs the optimizer on `model`, returning `None` if it had to be killed
    fn run(
        &self,
        model: &Path,
        results: &Path,
        time_limit: Option<Duration>,
    ) -> Result<Option<String>, ExternalEngineFailure> {
        let mut command = Command::new(&self.command.program);
        command
            .args(self.command.arguments(model, results))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &self.command.work_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ExternalEngineFailure::Spawn(format!("{}: {}", self.command.program, e)))?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = time_limit {
                if start.elapsed() >= limit {
                    warn!("{} exceeded {:?}, killing it", self.command.program, limit);
                    child.kill()?;
                    child.wait()?;
                    return Ok(None);
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(ExternalEngineFailure::ExitStatus(status.code()));
        }

        match fs::read_to_string(results) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(
                ExternalEngineFailure::MissingResults(results.display().to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn cleanup(&self, paths: &[&Path]) {
        if self.command.keep_files {
            return;
        }
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("could not remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Engine for ExternalEngine {
    fn name(&self) -> &str {
        "external"
    }

    fn add_var(
        &mut self,
        name: &str,
        kind: VarKind,
        lb: f64,
        ub: f64,
    ) -> Result<VarHandle, EngineError> {
        Ok(self.buffer.add_var(name, kind, lb, ub))
    }

    fn add_constr(&mut self, constraint: &Constraint) -> Result<(), EngineError> {
        self.buffer.add_constr(constraint)
    }

    fn set_objective(&mut self, expr: LinExpr, sense: Sense) -> Result<(), EngineError> {
        self.buffer.set_objective(expr, sense)
    }

    fn solve(&mut self, time_limit: Option<Duration>) -> Result<SolveOutcome, EngineError> {
        self.results = None;
        if self.buffer.objective.is_none() {
            return Err(EngineError::MissingObjective);
        }
        if let Some(row) = self.buffer.violated_constant_row(1e-9) {
            debug!("constant row {} cannot hold", row.name);
            return Ok(SolveOutcome::bare(SolveStatus::Infeasible));
        }

        let dir = match &self.command.work_dir {
            Some(dir) => std::env::current_dir()
                .map_err(ExternalEngineFailure::from)?
                .join(dir),
            None => std::env::temp_dir(),
        };
        let id = Uuid::new_v4();
        let model_path = dir.join(format!("cms-{}.lp", id));
        let results_path = dir.join(format!("cms-{}.txt", id));

        let lp = lp_format::write_lp(&self.buffer)
            .map_err(|e| EngineError::Internal(format!("rendering the LP model: {}", e)))?;
        fs::write(&model_path, lp).map_err(ExternalEngineFailure::from)?;
        info!(
            "running {} on {}",
            self.command.program,
            model_path.display()
        );

        let ran = self.run(&model_path, &results_path, time_limit);
        self.cleanup(&[&model_path, &results_path]);

        let text = match ran? {
            Some(text) => text,
            None => return Ok(SolveOutcome::bare(SolveStatus::TimedOut)),
        };
        let results = results::parse(&text)?;

        let status = match results.status {
            Some(status) => status,
            None if results.objective.is_some() => SolveStatus::Feasible,
            None => {
                return Err(ExternalEngineFailure::Malformed {
                    line: 0,
                    content: "no solver status in the results file".to_string(),
                }
                .into())
            }
        };

        let outcome = SolveOutcome {
            status,
            objective: results.objective.map(|o| o + self.buffer.objective_offset()),
            iterations: results.iterations,
        };
        self.results = Some(results);
        Ok(outcome)
    }

    fn value(&self, var: VarHandle) -> Result<f64, EngineError> {
        let results = self
            .results
            .as_ref()
            .filter(|r| r.status.map_or(true, SolveStatus::has_values))
            .ok_or(EngineError::NotSolved)?;
        let decl = self
            .buffer
            .vars
            .get(var.index())
            .ok_or(EngineError::UnknownVariable(var))?;
        Ok(results.value(&decl.name))
    }

    fn stats(&self) -> ModelStats {
        self.buffer.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(command: ExternalCommand) -> (ExternalEngine, VarHandle, VarHandle) {
        let mut engine = ExternalEngine::new(command);
        let x = engine
            .add_var("X(1, 1)", VarKind::Continuous, 0.0, f64::INFINITY)
            .unwrap();
        let z = engine.add_var("Z(1, 1)", VarKind::Binary, 0.0, 1.0).unwrap();
        engine
            .add_constr(&Constraint::le("link", x, 100.0 * z))
            .unwrap();
        engine
            .set_objective(2.0 * x + 5.0 * z + 1.0, Sense::Minimize)
            .unwrap();
        (engine, x, z)
    }

    #[test]
    fn placeholders_are_substituted() {
        let command = ExternalCommand::new(
            "solver",
            vec!["-m".into(), "{model}".into(), "out={results}".into()],
        );
        let args = command.arguments(Path::new("/tmp/a.lp"), Path::new("/tmp/a.txt"));
        assert_eq!(args, vec!["-m", "/tmp/a.lp", "out=/tmp/a.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn reads_values_written_by_the_process() {
        let script = "printf 'Global optimal solution found.\\n\
            Objective value: 25.0\\n\
            Total solver iterations: 3\\n\
            Variable Value Reduced Cost\\n\
            X( 1, 1) 10.0 0.0\\n\
            Z( 1, 1) 1.0 0.0\\n' > \"$1\"";
        let command = ExternalCommand::new(
            "sh",
            vec!["-c".into(), script.into(), "sh".into(), "{results}".into()],
        );
        let (mut engine, x, z) = engine_with(command);

        let outcome = engine.solve(Some(Duration::from_secs(30))).unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.objective, Some(26.0));
        assert_eq!(outcome.iterations, Some(3));
        assert_eq!(engine.value(x).unwrap(), 10.0);
        assert_eq!(engine.value(z).unwrap(), 1.0);
    }

    #[cfg(unix)]
    #[test]
    fn failing_process_is_an_engine_error() {
        let command = ExternalCommand::new("sh", vec!["-c".into(), "exit 3".into()]);
        let (mut engine, x, _) = engine_with(command);

        assert!(matches!(
            engine.solve(None),
            Err(EngineError::External(ExternalEngineFailure::ExitStatus(Some(3))))
        ));
        assert!(matches!(engine.value(x), Err(EngineError::NotSolved)));
    }

    #[cfg(unix)]
    #[test]
    fn missing_results_file_is_reported() {
        let command = ExternalCommand::new("sh", vec!["-c".into(), "true".into()]);
        let (mut engine, _, _) = engine_with(command);

        assert!(matches!(
            engine.solve(None),
            Err(EngineError::External(ExternalEngineFailure::MissingResults(_)))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_is_killed() {
        let command = ExternalCommand::new("sh", vec!["-c".into(), "sleep 5".into()]);
        let (mut engine, _, _) = engine_with(command);

        let outcome = engine.solve(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(outcome.status, SolveStatus::TimedOut);
        assert_eq!(outcome.objective, None);
    }

    #[test]
    fn unknown_program_fails_to_spawn() {
        let command = ExternalCommand::new("definitely-not-an-optimizer-4f1c", vec![]);
        let (mut engine, _, _) = engine_with(command);

        assert!(matches!(
            engine.solve(None),
            Err(EngineError::External(ExternalEngineFailure::Spawn(_)))
        ));
    }
}
