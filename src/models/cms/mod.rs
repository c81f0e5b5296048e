//! The cellular manufacturing planning model: flow of products through machine slots in cells,
//! machines bought and sold per cell, subcontracting and backlog.

pub mod constraints;
pub mod keys;
pub mod model;
pub mod sets_and_parameters;

pub use keys::{FlowKey, MachineCellPeriod, ProductPeriod, SubcontractKey};
pub use model::{CmsModel, CostTerms, Family, Variables, FAMILIES};
pub use sets_and_parameters::{
    Cell, Machine, Operation, Parameters, Period, Product, Sets, Slot, Subcontractor,
};

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::solver::EngineError;

/// Switches for the optional parts of the formulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Backlog and subcontracted quantities are integer
    pub integer_quantities: bool,
    /// Flow on a machine in a cell is bounded by its capacity times the machines installed there
    pub link_installed_capacity: bool,
    /// Units processed in a cell at an operation must have been processed at the previous one
    pub flow_balance: bool,
    /// Operations with an id below this carry the intra- and inter-cell costs
    pub early_operations: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions {
            integer_quantities: false,
            link_installed_capacity: true,
            flow_balance: false,
            early_operations: 3,
        }
    }
}

#[derive(Debug, Display)]
pub enum ModelConstructionError {
    #[display(fmt = "index set {} is empty", _0)]
    EmptyIndexSet(&'static str),
    #[display(fmt = "variable {} declared twice", _0)]
    DuplicateKey(String),
    #[display(fmt = "variable {} was never declared", _0)]
    UndeclaredVariable(String),
    #[display(fmt = "{}", _0)]
    Engine(EngineError),
}

impl std::error::Error for ModelConstructionError {}

impl From<EngineError> for ModelConstructionError {
    fn from(e: EngineError) -> Self {
        ModelConstructionError::Engine(e)
    }
}
