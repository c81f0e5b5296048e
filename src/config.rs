//! Run configuration, read from an optional JSON file. Every field has a default, so `{}` is a
//! valid configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use derive_more::Display;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::models::cms::ModelOptions;
use crate::solver::{Engine, ExternalCommand, ExternalEngine, MicrolpEngine};

/// Which engine solves the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EngineConfig {
    Microlp,
    Gurobi,
    External(ExternalCommand),
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Microlp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Solved values at or below this magnitude are left out of the report
    pub tolerance: f64,
    pub time_limit_seconds: Option<f64>,
    /// Seed of the demand generator. Drawn from entropy when unset.
    pub seed: Option<u64>,
    pub model: ModelOptions,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tolerance: 1e-6,
            time_limit_seconds: None,
            seed: None,
            model: ModelOptions::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Display)]
pub enum ConfigError {
    #[display(fmt = "could not read the configuration: {}", _0)]
    Unreadable(String),
    #[display(fmt = "malformed configuration: {}", _0)]
    Malformed(String),
    #[display(fmt = "tolerance must be positive, got {}", _0)]
    Tolerance(f64),
    #[display(fmt = "time limit must be a positive number of seconds, got {}", _0)]
    TimeLimit(f64),
    #[display(fmt = "engine {} is not available in this build", _0)]
    EngineUnavailable(&'static str),
    #[display(fmt = "could not create the engine: {}", _0)]
    Engine(String),
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ConfigError::Unreadable(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        debug!("read configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0) {
            return Err(ConfigError::Tolerance(self.tolerance));
        }
        match self.time_limit_seconds {
            Some(limit) if !(limit > 0.0) || Duration::try_from_secs_f64(limit).is_err() => {
                Err(ConfigError::TimeLimit(limit))
            }
            _ => Ok(()),
        }
    }

    /// The time limit as a duration. Unset when it cannot be represented, which
    /// [`Config::validate`] rejects.
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_seconds
            .and_then(|limit| Duration::try_from_secs_f64(limit).ok())
    }

    /// A fresh engine of the configured kind
    pub fn build_engine(&self) -> Result<Box<dyn Engine>, ConfigError> {
        match &self.engine {
            EngineConfig::Microlp => Ok(Box::new(MicrolpEngine::new())),
            EngineConfig::External(command) => Ok(Box::new(ExternalEngine::new(command.clone()))),
            EngineConfig::Gurobi => gurobi(),
        }
    }
}

#[cfg(feature = "gurobi")]
fn gurobi() -> Result<Box<dyn Engine>, ConfigError> {
    let engine = crate::solver::GurobiEngine::new("cms")
        .map_err(|e| ConfigError::Engine(e.to_string()))?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "gurobi"))]
fn gurobi() -> Result<Box<dyn Engine>, ConfigError> {
    Err(ConfigError::EngineUnavailable("gurobi"))
}
