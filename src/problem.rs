use std::collections::BTreeMap;
use std::io::Read;

use derive_more::Display;
use serde::Deserialize;

use crate::demand::DemandParams;
use crate::parse::{format_key, Table1, Table2, Table3};

/// The input document describing one production system.
///
/// Set members are the 1-based ids used by the document. Tables are resolved against
/// the sets by [`Parameters::new`](crate::models::cms::Parameters::new), which is where
/// consistency is checked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Problem {
    #[serde(alias = "P")]
    pub products: Vec<usize>,
    #[serde(alias = "M")]
    pub machines: Vec<usize>,
    #[serde(alias = "C")]
    pub cells: Vec<usize>,
    #[serde(alias = "T")]
    pub periods: Vec<usize>,
    #[serde(alias = "L")]
    pub subcontractors: Vec<usize>,
    #[serde(alias = "O")]
    pub operations: Vec<usize>,
    /// The physical unit slots a machine may occupy
    #[serde(alias = "machineN", alias = "F")]
    pub machine_slots: Vec<usize>,

    /// Demand per (product, period). Sampled from `demand_params` when absent.
    #[serde(default)]
    pub demand: Option<Table2>,
    #[serde(default, alias = "params")]
    pub demand_params: Option<DemandParams>,

    #[serde(alias = "MC")]
    pub machine_capacity: Table1,
    #[serde(alias = "set_cost")]
    pub setup_cost: Table1,
    #[serde(alias = "mcost")]
    pub purchase_cost: Table1,
    #[serde(alias = "sal_cost")]
    pub sale_cost: Table1,
    #[serde(alias = "tlot")]
    pub lot_size: Table1,
    pub hold_cost: Table1,
    #[serde(alias = "intr_cost")]
    pub intra_cell_cost: Table1,
    pub inter_cell_cost: Table1,
    #[serde(alias = "sub_cost")]
    pub subcontract_cost: Table1,
    #[serde(alias = "sub_capacity")]
    pub subcontract_capacity: Table1,
    #[serde(alias = "pdef")]
    pub backlog_limit: Table2,
    #[serde(alias = "mcim")]
    pub eligibility: Table2,
    #[serde(alias = "INT")]
    pub initial_machines: Table1,
    /// Cost per unit of flow for (product, machine, operation)
    #[serde(default)]
    pub operation_cost: Table3,

    #[serde(alias = "LP")]
    pub cell_capacity_min: f64,
    #[serde(alias = "CL")]
    pub cell_capacity_max: f64,
    #[serde(alias = "bigM")]
    pub big_m: f64,
}

impl Problem {
    pub fn from_json(text: &str) -> Result<Problem, DataInconsistency> {
        serde_json::from_str(text).map_err(|e| DataInconsistency::Document(e.to_string()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Problem, DataInconsistency> {
        serde_json::from_reader(reader).map_err(|e| DataInconsistency::Document(e.to_string()))
    }

    /// Replaces the demand table, keyed by (product id, period id)
    pub fn set_demand(&mut self, demand: &BTreeMap<(usize, usize), f64>) {
        let entries = demand
            .iter()
            .map(|((p, t), d)| (format_key(&[*p, *t]), *d))
            .collect();
        self.demand = Some(Table2::Keyed(entries));
    }
}

/// The input data contradicts itself or is incomplete
#[derive(Debug, Clone, PartialEq, Display)]
pub enum DataInconsistency {
    #[display(fmt = "could not read the input document: {}", _0)]
    Document(String),
    #[display(fmt = "set {} lists {} more than once", set, id)]
    DuplicateMember { set: String, id: usize },
    #[display(fmt = "set {} lists id 0, ids start at 1", set)]
    ZeroMember { set: String },
    #[display(fmt = "table {} has no entry for {}", table, key)]
    MissingEntry { table: String, key: String },
    #[display(fmt = "table {} has an entry {} outside its sets", table, key)]
    UnknownEntry { table: String, key: String },
    #[display(fmt = "table {} gives {} more than once", table, key)]
    DuplicateEntry { table: String, key: String },
    #[display(fmt = "table {} has a malformed key '{}'", table, key)]
    MalformedKey { table: String, key: String },
    #[display(fmt = "{} {} is negative ({})", table, key, value)]
    Negative {
        table: String,
        key: String,
        value: f64,
    },
    #[display(fmt = "{} {} must be an integer, got {}", table, key, value)]
    NotInteger {
        table: String,
        key: String,
        value: f64,
    },
    #[display(fmt = "eligibility {} must be 0 or 1, got {}", key, value)]
    InvalidEligibility { key: String, value: f64 },
    #[display(fmt = "product {} has demand but no eligible machine", product)]
    NoEligibleMachine { product: usize },
    #[display(fmt = "product {} has a lot size of zero", product)]
    ZeroLotSize { product: usize },
    #[display(fmt = "the input has neither demand nor demand parameters")]
    MissingDemand,
}

impl std::error::Error for DataInconsistency {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two products on one machine in one cell over one period, demand only for product 1
    pub const SMALL: &str = r#"{
        "products": [1, 2],
        "machines": [1],
        "cells": [1],
        "periods": [1],
        "subcontractors": [1],
        "operations": [1],
        "machine_slots": [1],
        "demand": {"(1, 1)": 10, "(2, 1)": 0},
        "machine_capacity": [100],
        "setup_cost": [100],
        "purchase_cost": [1000],
        "sale_cost": [200],
        "lot_size": [10, 10],
        "hold_cost": 1,
        "intra_cell_cost": 1,
        "inter_cell_cost": 1,
        "subcontract_cost": [50],
        "subcontract_capacity": [100],
        "backlog_limit": 0,
        "eligibility": [[1], [1]],
        "initial_machines": [1],
        "operation_cost": 1,
        "cell_capacity_min": 0,
        "cell_capacity_max": 5,
        "big_m": 1000
    }"#;

    #[test]
    fn reads_canonical_names() {
        let problem = Problem::from_json(SMALL).unwrap();
        assert_eq!(problem.products, vec![1, 2]);
        assert_eq!(problem.operation_cost, Table3::Uniform(1.0));
        assert_eq!(problem.cell_capacity_max, 5.0);
    }

    #[test]
    fn reads_original_aliases() {
        let text = r#"{
            "P": [1], "M": [1], "C": [1], "T": [1, 2], "L": [1], "O": [1], "machineN": [1],
            "params": {"moyenne": 20, "ecart_type": 2},
            "MC": 80, "set_cost": 10, "mcost": 500, "sal_cost": 100, "tlot": 25,
            "hold_cost": 2, "intr_cost": 1, "inter_cell_cost": 3,
            "sub_cost": 40, "sub_capacity": 15,
            "pdef": {"(1, 1)": 5, "(1, 2)": 5},
            "mcim": {"(1, 1)": 1},
            "INT": 1, "LP": 1, "CL": 3, "bigM": 10000
        }"#;
        let problem = Problem::from_json(text).unwrap();
        assert_eq!(problem.periods, vec![1, 2]);
        assert_eq!(problem.machine_slots, vec![1]);
        assert!(problem.demand.is_none());
        assert!(problem.demand_params.is_some());
        assert_eq!(problem.operation_cost, Table3::Uniform(0.0));
        assert_eq!(problem.big_m, 10000.0);
    }

    #[test]
    fn unreadable_document() {
        assert!(matches!(
            Problem::from_json("{\"products\": [1]"),
            Err(DataInconsistency::Document(_))
        ));
    }

    #[test]
    fn demand_can_be_replaced() {
        let mut problem = Problem::from_json(SMALL).unwrap();
        let mut demand = BTreeMap::new();
        demand.insert((1, 1), 7.0);
        demand.insert((2, 1), 3.0);
        problem.set_demand(&demand);

        match problem.demand {
            Some(Table2::Keyed(entries)) => {
                assert_eq!(entries.get("(1, 1)"), Some(&7.0));
                assert_eq!(entries.get("(2, 1)"), Some(&3.0));
            }
            other => panic!("unexpected demand table {:?}", other),
        }
    }
}
