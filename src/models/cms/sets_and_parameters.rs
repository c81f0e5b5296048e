use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use derive_more::{Deref, Display, From, Into};
use itertools::iproduct;
use log::debug;

use crate::parse::{format_key, resolve1, resolve2, resolve3};
use crate::problem::{DataInconsistency, Problem};

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Product(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Machine(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Cell(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Period(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Subcontractor(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Operation(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct Slot(usize);

/// The index sets, in declared order
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct Sets {
    /// Products
    pub P: Vec<Product>,
    /// Machines
    pub M: Vec<Machine>,
    /// Cells
    pub C: Vec<Cell>,
    /// Periods. Declared order is time order.
    pub T: Vec<Period>,
    /// Subcontractors
    pub L: Vec<Subcontractor>,
    /// Operations
    pub O: Vec<Operation>,
    /// Machine slots
    pub F: Vec<Slot>,
}

#[allow(non_snake_case)]
impl Sets {
    pub fn new(problem: &Problem) -> Result<Sets, DataInconsistency> {
        macro_rules! set {
            ($type:ident, $name:expr, $ids:expr) => {{
                if $ids.contains(&0) {
                    return Err(DataInconsistency::ZeroMember {
                        set: $name.to_string(),
                    });
                }
                let mut seen = HashSet::new();
                if let Some(id) = $ids.iter().find(|id| !seen.insert(**id)) {
                    return Err(DataInconsistency::DuplicateMember {
                        set: $name.to_string(),
                        id: *id,
                    });
                }
                $ids.iter().map(|i| $type(*i)).collect::<Vec<_>>()
            }};
        }

        Ok(Sets {
            P: set!(Product, "products", problem.products),
            M: set!(Machine, "machines", problem.machines),
            C: set!(Cell, "cells", problem.cells),
            T: set!(Period, "periods", problem.periods),
            L: set!(Subcontractor, "subcontractors", problem.subcontractors),
            O: set!(Operation, "operations", problem.operations),
            F: set!(Slot, "machine_slots", problem.machine_slots),
        })
    }

    /// The period declared before `t`
    pub fn previous_period(&self, t: Period) -> Option<Period> {
        let i = self.T.iter().position(|x| *x == t)?;
        i.checked_sub(1).map(|i| self.T[i])
    }

    /// The operation declared before `o`
    pub fn previous_operation(&self, o: Operation) -> Option<Operation> {
        let i = self.O.iter().position(|x| *x == o)?;
        i.checked_sub(1).map(|i| self.O[i])
    }

    /// Sizes of the sets as (name, size) pairs
    pub fn sizes(&self) -> [(&'static str, usize); 7] {
        [
            ("products", self.P.len()),
            ("machines", self.M.len()),
            ("cells", self.C.len()),
            ("periods", self.T.len()),
            ("subcontractors", self.L.len()),
            ("operations", self.O.len()),
            ("machine slots", self.F.len()),
        ]
    }
}

/// The validated parameter tables, total over their index sets
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Units of a product required in a period
    pub demand: HashMap<(Product, Period), f64>,
    pub machine_capacity: HashMap<Machine, f64>,
    pub setup_cost: HashMap<Machine, f64>,
    pub purchase_cost: HashMap<Machine, f64>,
    pub sale_cost: HashMap<Machine, f64>,
    /// Largest quantity of a product processed per visit (tlot)
    pub lot_size: HashMap<Product, f64>,
    pub hold_cost: HashMap<Product, f64>,
    pub intra_cell_cost: HashMap<Product, f64>,
    pub inter_cell_cost: HashMap<Product, f64>,
    pub subcontract_cost: HashMap<Subcontractor, f64>,
    pub subcontract_capacity: HashMap<Subcontractor, f64>,
    /// Upper bound on the backlog of a product in a period (pdef)
    pub backlog_limit: HashMap<(Product, Period), f64>,
    /// 1 if a product may be routed through a machine (MCIM)
    pub eligibility: HashMap<(Product, Machine), f64>,
    /// Machines present in each cell before the first period (INT)
    pub initial_machines: HashMap<Machine, f64>,
    pub operation_cost: HashMap<(Product, Machine, Operation), f64>,
    /// Fewest machines a cell may hold in a period (LP)
    pub cell_capacity_min: f64,
    /// Most machines a cell may hold in a period (CL)
    pub cell_capacity_max: f64,
    pub big_m: f64,
    /// Number of machines each product is eligible for
    pub eligible_machines: HashMap<Product, f64>,
}

/// Fails on the first value of `domain` that is negative, or not integral when `integral` is set.
fn check_values<K, I, F>(
    table: &str,
    values: &HashMap<K, f64>,
    domain: I,
    ids: F,
    integral: bool,
) -> Result<(), DataInconsistency>
where
    K: Eq + Hash,
    I: IntoIterator<Item = K>,
    F: Fn(&K) -> Vec<usize>,
{
    for k in domain {
        let value = values.get(&k).copied().unwrap_or(0.0);
        if value < 0.0 || value.is_nan() {
            return Err(DataInconsistency::Negative {
                table: table.to_string(),
                key: format_key(&ids(&k)),
                value,
            });
        }
        if integral && value.fract() != 0.0 {
            return Err(DataInconsistency::NotInteger {
                table: table.to_string(),
                key: format_key(&ids(&k)),
                value,
            });
        }
    }
    Ok(())
}

#[allow(non_snake_case)]
impl Parameters {
    pub fn new(problem: &Problem, sets: &Sets) -> Result<Parameters, DataInconsistency> {
        let P = &sets.P;
        let M = &sets.M;
        let T = &sets.T;
        let L = &sets.L;
        let O = &sets.O;

        let demand = match &problem.demand {
            Some(table) => resolve2("demand", table, P, T)?,
            None => return Err(DataInconsistency::MissingDemand),
        };

        let machine_capacity = resolve1("machine_capacity", &problem.machine_capacity, M)?;
        let setup_cost = resolve1("setup_cost", &problem.setup_cost, M)?;
        let purchase_cost = resolve1("purchase_cost", &problem.purchase_cost, M)?;
        let sale_cost = resolve1("sale_cost", &problem.sale_cost, M)?;
        let initial_machines = resolve1("initial_machines", &problem.initial_machines, M)?;
        let lot_size = resolve1("lot_size", &problem.lot_size, P)?;
        let hold_cost = resolve1("hold_cost", &problem.hold_cost, P)?;
        let intra_cell_cost = resolve1("intra_cell_cost", &problem.intra_cell_cost, P)?;
        let inter_cell_cost = resolve1("inter_cell_cost", &problem.inter_cell_cost, P)?;
        let subcontract_cost = resolve1("subcontract_cost", &problem.subcontract_cost, L)?;
        let subcontract_capacity =
            resolve1("subcontract_capacity", &problem.subcontract_capacity, L)?;
        let backlog_limit = resolve2("backlog_limit", &problem.backlog_limit, P, T)?;
        let eligibility = resolve2("eligibility", &problem.eligibility, P, M)?;
        let operation_cost = resolve3("operation_cost", &problem.operation_cost, P, M, O)?;

        let machine = |m: &Machine| vec![**m];
        let product = |p: &Product| vec![**p];
        let subcontractor = |l: &Subcontractor| vec![**l];
        let product_period = |(p, t): &(Product, Period)| vec![**p, **t];

        check_values(
            "demand",
            &demand,
            iproduct!(P.iter().copied(), T.iter().copied()),
            product_period,
            true,
        )?;
        for (name, table) in [
            ("machine_capacity", &machine_capacity),
            ("setup_cost", &setup_cost),
            ("purchase_cost", &purchase_cost),
            ("sale_cost", &sale_cost),
        ] {
            check_values(name, table, M.iter().copied(), machine, false)?;
        }
        check_values("initial_machines", &initial_machines, M.iter().copied(), machine, true)?;
        for (name, table) in [
            ("lot_size", &lot_size),
            ("hold_cost", &hold_cost),
            ("intra_cell_cost", &intra_cell_cost),
            ("inter_cell_cost", &inter_cell_cost),
        ] {
            check_values(name, table, P.iter().copied(), product, false)?;
        }
        for (name, table) in [
            ("subcontract_cost", &subcontract_cost),
            ("subcontract_capacity", &subcontract_capacity),
        ] {
            check_values(name, table, L.iter().copied(), subcontractor, false)?;
        }
        check_values(
            "backlog_limit",
            &backlog_limit,
            iproduct!(P.iter().copied(), T.iter().copied()),
            product_period,
            false,
        )?;
        check_values(
            "operation_cost",
            &operation_cost,
            iproduct!(P.iter().copied(), M.iter().copied(), O.iter().copied()),
            |(p, m, o): &(Product, Machine, Operation)| vec![**p, **m, **o],
            false,
        )?;

        for (name, value) in [
            ("cell_capacity_min", problem.cell_capacity_min),
            ("cell_capacity_max", problem.cell_capacity_max),
            ("big_m", problem.big_m),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(DataInconsistency::Negative {
                    table: name.to_string(),
                    key: format_key(&[]),
                    value,
                });
            }
        }

        for (p, m) in iproduct!(P.iter().copied(), M.iter().copied()) {
            let value = eligibility[&(p, m)];
            if value != 0.0 && value != 1.0 {
                return Err(DataInconsistency::InvalidEligibility {
                    key: format_key(&[*p, *m]),
                    value,
                });
            }
        }

        let eligible_machines: HashMap<Product, f64> = P
            .iter()
            .map(|&p| (p, M.iter().map(|&m| eligibility[&(p, m)]).sum()))
            .collect();

        for &p in P {
            if lot_size[&p] == 0.0 {
                return Err(DataInconsistency::ZeroLotSize { product: *p });
            }
            if eligible_machines[&p] == 0.0 && T.iter().any(|&t| demand[&(p, t)] > 0.0) {
                return Err(DataInconsistency::NoEligibleMachine { product: *p });
            }
        }

        debug!(
            "validated parameters, eligible machines per product: {:?}",
            P.iter().map(|p| eligible_machines[p]).collect::<Vec<_>>()
        );

        Ok(Parameters {
            demand,
            machine_capacity,
            setup_cost,
            purchase_cost,
            sale_cost,
            lot_size,
            hold_cost,
            intra_cell_cost,
            inter_cell_cost,
            subcontract_cost,
            subcontract_capacity,
            backlog_limit,
            eligibility,
            initial_machines,
            operation_cost,
            cell_capacity_min: problem.cell_capacity_min,
            cell_capacity_max: problem.cell_capacity_max,
            big_m: problem.big_m,
            eligible_machines,
        })
    }

    /// Most machines of one type a cell can hold, add or remove in a period. A cell holds at
    /// most `cell_capacity_max` machines, and can only shed what it held before.
    pub fn machine_count_limit(&self) -> f64 {
        self.initial_machines
            .values()
            .copied()
            .fold(self.cell_capacity_max, f64::max)
            .floor()
    }

    /// Largest backlog any product may carry
    pub fn backlog_ceiling(&self) -> f64 {
        self.backlog_limit.values().copied().fold(0.0, f64::max)
    }

    /// Largest quantity any subcontractor takes in a period
    pub fn subcontract_ceiling(&self) -> f64 {
        self.subcontract_capacity.values().copied().fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{Table1, Table2};
    use crate::problem::tests::SMALL;

    fn small() -> Problem {
        Problem::from_json(SMALL).unwrap()
    }

    fn validate(problem: &Problem) -> Result<Parameters, DataInconsistency> {
        let sets = Sets::new(problem)?;
        Parameters::new(problem, &sets)
    }

    #[test]
    fn small_instance_is_consistent() {
        let problem = small();
        let sets = Sets::new(&problem).unwrap();
        let parameters = Parameters::new(&problem, &sets).unwrap();

        assert_eq!(parameters.demand[&(Product(1), Period(1))], 10.0);
        assert_eq!(parameters.eligible_machines[&Product(2)], 1.0);
        assert_eq!(parameters.operation_cost.len(), 2);
        assert_eq!(parameters.cell_capacity_max, 5.0);
    }

    #[test]
    fn previous_follows_declared_order() {
        let mut problem = small();
        problem.periods = vec![3, 1, 2];
        let sets = Sets::new(&problem).unwrap();
        assert_eq!(sets.previous_period(Period(3)), None);
        assert_eq!(sets.previous_period(Period(1)), Some(Period(3)));
        assert_eq!(sets.previous_period(Period(2)), Some(Period(1)));
        assert_eq!(sets.previous_operation(Operation(1)), None);
    }

    #[test]
    fn duplicate_set_member() {
        let mut problem = small();
        problem.machines = vec![1, 2, 1];
        assert_eq!(
            Sets::new(&problem).unwrap_err(),
            DataInconsistency::DuplicateMember {
                set: "machines".into(),
                id: 1
            }
        );
    }

    #[test]
    fn ids_start_at_one() {
        let mut problem = small();
        problem.cells = vec![0, 1];
        assert_eq!(
            Sets::new(&problem).unwrap_err(),
            DataInconsistency::ZeroMember {
                set: "cells".into()
            }
        );
    }

    #[test]
    fn integer_bounds_follow_the_data() {
        let mut problem = small();
        let parameters = validate(&problem).unwrap();
        assert_eq!(parameters.machine_count_limit(), 5.0);
        assert_eq!(parameters.backlog_ceiling(), 0.0);
        assert_eq!(parameters.subcontract_ceiling(), 100.0);

        // a cell may start with more machines than it is allowed to keep
        problem.initial_machines = Table1::Uniform(7.0);
        problem.backlog_limit = Table2::Uniform(3.0);
        let parameters = validate(&problem).unwrap();
        assert_eq!(parameters.machine_count_limit(), 7.0);
        assert_eq!(parameters.backlog_ceiling(), 3.0);
    }

    #[test]
    fn negative_sale_cost() {
        let mut problem = small();
        problem.sale_cost = Table1::Uniform(-1.0);
        assert_eq!(
            validate(&problem).unwrap_err(),
            DataInconsistency::Negative {
                table: "sale_cost".into(),
                key: "(1)".into(),
                value: -1.0
            }
        );
    }

    #[test]
    fn fractional_demand_and_machines() {
        let mut problem = small();
        problem.initial_machines = Table1::Uniform(1.5);
        assert!(matches!(
            validate(&problem),
            Err(DataInconsistency::NotInteger { table, .. }) if table == "initial_machines"
        ));

        let mut problem = small();
        problem.demand = Some(Table2::Uniform(2.5));
        assert!(matches!(
            validate(&problem),
            Err(DataInconsistency::NotInteger { table, .. }) if table == "demand"
        ));
    }

    #[test]
    fn eligibility_must_be_binary() {
        let mut problem = small();
        problem.eligibility = Table2::Nested(vec![vec![1.0], vec![0.5]]);
        assert_eq!(
            validate(&problem).unwrap_err(),
            DataInconsistency::InvalidEligibility {
                key: "(2, 1)".into(),
                value: 0.5
            }
        );
    }

    #[test]
    fn ineligible_product_needs_zero_demand() {
        // product 2 has no demand, so an empty eligibility row is accepted
        let mut problem = small();
        problem.eligibility = Table2::Nested(vec![vec![1.0], vec![0.0]]);
        let parameters = validate(&problem).unwrap();
        assert_eq!(parameters.eligible_machines[&Product(2)], 0.0);

        problem.eligibility = Table2::Nested(vec![vec![0.0], vec![1.0]]);
        assert_eq!(
            validate(&problem).unwrap_err(),
            DataInconsistency::NoEligibleMachine { product: 1 }
        );
    }

    #[test]
    fn zero_lot_size() {
        let mut problem = small();
        problem.lot_size = Table1::Positional(vec![10.0, 0.0]);
        assert_eq!(
            validate(&problem).unwrap_err(),
            DataInconsistency::ZeroLotSize { product: 2 }
        );
    }

    #[test]
    fn demand_is_required() {
        let mut problem = small();
        problem.demand = None;
        assert_eq!(
            validate(&problem).unwrap_err(),
            DataInconsistency::MissingDemand
        );
    }
}
