use std::collections::BTreeMap;
use std::fmt::Display;

use itertools::iproduct;
use log::{debug, info, trace};

use super::constraints;
use super::keys::{var_name, FlowKey, MachineCellPeriod, ProductPeriod, SubcontractKey};
use super::sets_and_parameters::{Parameters, Sets};
use super::{ModelConstructionError, ModelOptions};
use crate::models::utils::AddVars;
use crate::solver::{Engine, LinExpr, Sense, VarHandle};

pub struct Variables {
    /// Quantity processed, per (operation, product, machine, slot, cell, period)
    pub flow: BTreeMap<FlowKey, VarHandle>,
    /// 1 if the flow at the same key is nonzero
    pub setup: BTreeMap<FlowKey, VarHandle>,
    pub backlog: BTreeMap<ProductPeriod, VarHandle>,
    pub subcontract: BTreeMap<SubcontractKey, VarHandle>,
    pub added: BTreeMap<MachineCellPeriod, VarHandle>,
    pub removed: BTreeMap<MachineCellPeriod, VarHandle>,
    pub installed: BTreeMap<MachineCellPeriod, VarHandle>,
}

/// The variables of one family with their rendered keys, in key order
pub struct Family {
    pub name: &'static str,
    pub symbol: &'static str,
    pub vars: Vec<(String, VarHandle)>,
}

/// (name, symbol) of every family in reporting order
pub const FAMILIES: [(&str, &str); 7] = [
    ("flow", "X"),
    ("setup", "Z"),
    ("backlog", "B"),
    ("subcontract", "Y"),
    ("added", "NAJ"),
    ("removed", "NRE"),
    ("installed", "MN"),
];

fn family<K: Display>(
    (name, symbol): (&'static str, &'static str),
    vars: &BTreeMap<K, VarHandle>,
) -> Family {
    Family {
        name,
        symbol,
        vars: vars.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

impl Variables {
    /// All families in reporting order
    pub fn families(&self) -> Vec<Family> {
        let [flow, setup, backlog, subcontract, added, removed, installed] = FAMILIES;
        vec![
            family(flow, &self.flow),
            family(setup, &self.setup),
            family(backlog, &self.backlog),
            family(subcontract, &self.subcontract),
            family(added, &self.added),
            family(removed, &self.removed),
            family(installed, &self.installed),
        ]
    }

    pub fn count(&self) -> usize {
        self.flow.len()
            + self.setup.len()
            + self.backlog.len()
            + self.subcontract.len()
            + self.added.len()
            + self.removed.len()
            + self.installed.len()
    }
}

/// Looks up the variable of `key`, failing if it was never declared
pub(super) fn lookup<K: Ord + Display>(
    vars: &BTreeMap<K, VarHandle>,
    symbol: &str,
    key: &K,
) -> Result<VarHandle, ModelConstructionError> {
    vars.get(key)
        .copied()
        .ok_or_else(|| ModelConstructionError::UndeclaredVariable(var_name(symbol, key)))
}

/// The seven terms of the objective
#[derive(Debug, Clone, Default)]
pub struct CostTerms {
    /// Q1
    pub setup: LinExpr,
    /// Q2
    pub operation: LinExpr,
    /// Q3, purchases minus sales
    pub capital: LinExpr,
    /// Q4
    pub holding: LinExpr,
    /// Q5
    pub subcontracting: LinExpr,
    /// Q6
    pub intra_cell: LinExpr,
    /// Q7
    pub inter_cell: LinExpr,
}

impl CostTerms {
    pub fn terms(&self) -> [(&'static str, &LinExpr); 7] {
        [
            ("setup", &self.setup),
            ("operation", &self.operation),
            ("capital", &self.capital),
            ("holding", &self.holding),
            ("subcontracting", &self.subcontracting),
            ("intra_cell", &self.intra_cell),
            ("inter_cell", &self.inter_cell),
        ]
    }

    /// The objective: the sum of all terms
    pub fn total(&self) -> LinExpr {
        self.terms()
            .into_iter()
            .map(|(_, expr)| expr.clone())
            .sum()
    }
}

/// A built model: the variables declared on the engine and the cost terms of its objective
pub struct CmsModel {
    pub variables: Variables,
    pub costs: CostTerms,
}

impl CmsModel {
    /// Declares every variable family over its full key domain
    pub fn declare_variables<E: Engine + ?Sized>(
        engine: &mut E,
        sets: &Sets,
        parameters: &Parameters,
        options: &ModelOptions,
    ) -> Result<Variables, ModelConstructionError> {
        for (name, size) in sets.sizes() {
            if size == 0 {
                return Err(ModelConstructionError::EmptyIndexSet(name));
            }
        }

        let flow_keys = flow_domain(sets).collect::<Vec<_>>();
        let mcp_keys = iproduct!(
            sets.M.iter().cloned(),
            sets.C.iter().cloned(),
            sets.T.iter().cloned()
        )
        .map(|(m, c, t)| MachineCellPeriod::new(m, c, t))
        .collect::<Vec<_>>();
        let backlog_keys = iproduct!(sets.P.iter().cloned(), sets.T.iter().cloned())
            .map(|(p, t)| ProductPeriod::new(p, t));
        let subcontract_keys = iproduct!(
            sets.P.iter().cloned(),
            sets.L.iter().cloned(),
            sets.T.iter().cloned()
        )
        .map(|(p, l, t)| SubcontractKey::new(p, l, t));

        let flow = flow_keys.iter().copied().cont(engine, "X")?;
        let setup = flow_keys.iter().copied().binary(engine, "Z")?;
        let (backlog, subcontract) = if options.integer_quantities {
            (
                backlog_keys.int(engine, "B", parameters.backlog_ceiling())?,
                subcontract_keys.int(engine, "Y", parameters.subcontract_ceiling())?,
            )
        } else {
            (
                backlog_keys.cont(engine, "B")?,
                subcontract_keys.cont(engine, "Y")?,
            )
        };
        let machines = parameters.machine_count_limit();
        let added = mcp_keys.iter().copied().int(engine, "NAJ", machines)?;
        let removed = mcp_keys.iter().copied().int(engine, "NRE", machines)?;
        let installed = mcp_keys.iter().copied().int(engine, "MN", machines)?;

        let variables = Variables {
            flow,
            setup,
            backlog,
            subcontract,
            added,
            removed,
            installed,
        };
        debug!("declared {} variables", variables.count());
        Ok(variables)
    }

    /// Builds the seven cost terms
    pub fn build_objective(
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
        options: &ModelOptions,
    ) -> Result<CostTerms, ModelConstructionError> {
        let mut costs = CostTerms::default();

        for k in flow_domain(sets) {
            let x = lookup(&vars.flow, "X", &k)?;
            costs
                .setup
                .add_term(parameters.setup_cost[&k.m] / parameters.lot_size[&k.p], x);
            costs
                .operation
                .add_term(parameters.operation_cost[&(k.p, k.m, k.o)], x);
            if *k.o < options.early_operations {
                costs.intra_cell.add_term(parameters.intra_cell_cost[&k.p], x);
                costs.inter_cell.add_term(parameters.inter_cell_cost[&k.p], x);
            }
        }

        for (m, c, t) in iproduct!(sets.M.iter(), sets.C.iter(), sets.T.iter()) {
            let key = MachineCellPeriod::new(*m, *c, *t);
            costs
                .capital
                .add_term(parameters.purchase_cost[m], lookup(&vars.added, "NAJ", &key)?);
            costs
                .capital
                .add_term(-parameters.sale_cost[m], lookup(&vars.removed, "NRE", &key)?);
        }

        for (p, t) in iproduct!(sets.P.iter(), sets.T.iter()) {
            let key = ProductPeriod::new(*p, *t);
            costs
                .holding
                .add_term(parameters.hold_cost[p], lookup(&vars.backlog, "B", &key)?);
            for l in &sets.L {
                let key = SubcontractKey::new(*p, *l, *t);
                costs.subcontracting.add_term(
                    parameters.subcontract_cost[l],
                    lookup(&vars.subcontract, "Y", &key)?,
                );
            }
        }

        trace!("cost terms: {:?}", costs);
        Ok(costs)
    }

    /// Every constraint of the model
    pub fn build_constraints(
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
        options: &ModelOptions,
    ) -> Result<Vec<crate::solver::Constraint>, ModelConstructionError> {
        let mut all = Vec::new();
        macro_rules! collect {
            ($name:expr, $built:expr) => {{
                let built = $built?;
                debug!("{}: {} constraints", $name, built.len());
                all.extend(built);
            }};
        }

        collect!("demand", constraints::demand(sets, parameters, vars));
        collect!(
            "machine capacity",
            constraints::machine_capacity(sets, parameters, vars)
        );
        collect!("lot size", constraints::lot_size(sets, parameters, vars));
        collect!("setup linking", constraints::setup_link(sets, parameters, vars));
        collect!("eligibility", constraints::eligibility(sets, parameters, vars));
        collect!(
            "subcontractor capacity",
            constraints::subcontract_capacity(sets, parameters, vars)
        );
        collect!("backlog bound", constraints::backlog_bound(sets, parameters, vars));
        collect!(
            "machine balance",
            constraints::machine_balance(sets, parameters, vars)
        );
        collect!("cell capacity", constraints::cell_capacity(sets, parameters, vars));
        if options.link_installed_capacity {
            collect!(
                "installed capacity",
                constraints::installed_capacity(sets, parameters, vars)
            );
        }
        if options.flow_balance {
            collect!("flow balance", constraints::flow_balance(sets, vars));
        }

        Ok(all)
    }

    /// Declares the variables, adds every constraint and minimizes the total cost
    pub fn build<E: Engine + ?Sized>(
        engine: &mut E,
        sets: &Sets,
        parameters: &Parameters,
        options: &ModelOptions,
    ) -> Result<CmsModel, ModelConstructionError> {
        let variables = Self::declare_variables(engine, sets, parameters, options)?;
        let costs = Self::build_objective(sets, parameters, &variables, options)?;
        let constraints = Self::build_constraints(sets, parameters, &variables, options)?;

        for constraint in &constraints {
            engine.add_constr(constraint)?;
        }
        engine.set_objective(costs.total(), Sense::Minimize)?;

        let stats = engine.stats();
        info!(
            "built model with {} variables, {} constraints and {} nonzeros",
            stats.variables, stats.constraints, stats.nonzeros
        );

        Ok(CmsModel { variables, costs })
    }
}

/// Every flow key, in key order
pub(super) fn flow_domain(sets: &Sets) -> impl Iterator<Item = FlowKey> + '_ {
    iproduct!(
        sets.O.iter().cloned(),
        sets.P.iter().cloned(),
        sets.M.iter().cloned(),
        sets.F.iter().cloned(),
        sets.C.iter().cloned(),
        sets.T.iter().cloned()
    )
    .map(|(o, p, m, f, c, t)| FlowKey::new(o, p, m, f, c, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::tests::SMALL;
    use crate::problem::Problem;
    use crate::solver::MicrolpEngine;
    use proptest::prelude::*;

    fn small() -> (Sets, Parameters) {
        let problem = Problem::from_json(SMALL).unwrap();
        let sets = Sets::new(&problem).unwrap();
        let parameters = Parameters::new(&problem, &sets).unwrap();
        (sets, parameters)
    }

    fn ids<T: From<usize>>(n: usize) -> Vec<T> {
        (1..=n).map(T::from).collect()
    }

    #[test]
    fn empty_sets_are_rejected() {
        let (mut sets, parameters) = small();
        sets.L.clear();
        let mut engine = MicrolpEngine::new();
        assert!(matches!(
            CmsModel::declare_variables(
                &mut engine,
                &sets,
                &parameters,
                &ModelOptions::default()
            ),
            Err(ModelConstructionError::EmptyIndexSet("subcontractors"))
        ));
    }

    #[test]
    fn objective_coefficients() {
        let (sets, parameters) = small();
        let mut engine = MicrolpEngine::new();
        let options = ModelOptions::default();
        let vars =
            CmsModel::declare_variables(&mut engine, &sets, &parameters, &options).unwrap();
        let costs = CmsModel::build_objective(&sets, &parameters, &vars, &options).unwrap();

        let x = *vars.flow.values().next().unwrap();
        assert!(costs.setup.terms().contains(&(x, 10.0)));
        assert!(costs.operation.terms().contains(&(x, 1.0)));
        assert!(costs.intra_cell.terms().contains(&(x, 1.0)));
        assert!(costs.inter_cell.terms().contains(&(x, 1.0)));
        assert_eq!(costs.capital.terms().len(), 2);
        assert!(costs.capital.terms().iter().any(|(_, c)| *c == -200.0));
        assert_eq!(costs.holding.terms().len(), 2);
        assert_eq!(costs.subcontracting.terms().len(), 2);

        let total = costs.total().compact();
        assert!(total.terms().contains(&(x, 13.0)));
    }

    #[test]
    fn late_operations_carry_no_cell_costs() {
        let (sets, parameters) = small();
        let mut engine = MicrolpEngine::new();
        let options = ModelOptions {
            early_operations: 1,
            ..ModelOptions::default()
        };
        let vars =
            CmsModel::declare_variables(&mut engine, &sets, &parameters, &options).unwrap();
        let costs = CmsModel::build_objective(&sets, &parameters, &vars, &options).unwrap();
        assert!(costs.intra_cell.is_empty());
        assert!(costs.inter_cell.is_empty());
    }

    #[test]
    fn integer_quantities_option() {
        let (sets, parameters) = small();
        for integer in [false, true] {
            let mut engine = MicrolpEngine::new();
            let options = ModelOptions {
                integer_quantities: integer,
                ..ModelOptions::default()
            };
            CmsModel::build(&mut engine, &sets, &parameters, &options).unwrap();
            // X continuous, Z binary, machine counts integer, B and Y depending on the option
            assert_eq!(engine.stats().variables, 2 + 2 + 2 + 2 + 3);
        }
    }

    #[test]
    fn optional_families_change_the_row_count() {
        let (mut sets, parameters) = small();
        sets.O = ids(2);
        let rows = |options: ModelOptions| {
            let mut engine = MicrolpEngine::new();
            let vars =
            CmsModel::declare_variables(&mut engine, &sets, &parameters, &options).unwrap();
            CmsModel::build_constraints(&sets, &parameters, &vars, &options)
                .unwrap()
                .len()
        };
        let default = rows(ModelOptions::default());
        let without_link = rows(ModelOptions {
            link_installed_capacity: false,
            ..ModelOptions::default()
        });
        let with_balance = rows(ModelOptions {
            flow_balance: true,
            ..ModelOptions::default()
        });
        assert_eq!(default - without_link, 1);
        assert_eq!(with_balance - default, 2);
    }

    #[test]
    fn missing_variables_are_reported_by_the_objective() {
        let (sets, parameters) = small();
        let mut engine = MicrolpEngine::new();
        let options = ModelOptions::default();
        let mut vars =
            CmsModel::declare_variables(&mut engine, &sets, &parameters, &options).unwrap();
        vars.removed.clear();
        assert!(matches!(
            CmsModel::build_objective(&sets, &parameters, &vars, &options),
            Err(ModelConstructionError::UndeclaredVariable(name)) if name == "NRE(1,1,1)"
        ));
    }

    proptest! {
        #[test]
        fn one_flow_variable_per_key(
            p in 1usize..4, m in 1usize..4, c in 1usize..3, t in 1usize..4,
            l in 1usize..3, o in 1usize..4, f in 1usize..3,
        ) {
            let sets = Sets {
                P: ids(p),
                M: ids(m),
                C: ids(c),
                T: ids(t),
                L: ids(l),
                O: ids(o),
                F: ids(f),
            };
            // The parameters only bound the integer families, any instance will do
            let (_, parameters) = small();
            let mut engine = MicrolpEngine::new();
            let options = ModelOptions::default();
            let vars = CmsModel::declare_variables(&mut engine, &sets, &parameters, &options)
                .unwrap();
            let keys = o * p * m * f * c * t;
            prop_assert_eq!(vars.flow.len(), keys);
            prop_assert_eq!(vars.setup.len(), keys);
            prop_assert_eq!(vars.backlog.len(), p * t);
            prop_assert_eq!(vars.subcontract.len(), p * l * t);
            prop_assert_eq!(vars.installed.len(), m * c * t);
            prop_assert_eq!(engine.stats().variables, vars.count());
        }
    }
}
