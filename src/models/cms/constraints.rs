//! One function per constraint family. Each is a pure function of the sets, the parameters and the
//! declared variables, and names its rows after the family and the key, e.g. `demand(1,2)`.

use itertools::iproduct;
use log::trace;

use super::keys::{var_name, FlowKey, MachineCellPeriod, ProductPeriod, SubcontractKey};
use super::model::{flow_domain, lookup, Variables};
use super::sets_and_parameters::{Parameters, Sets};
use super::ModelConstructionError;
use crate::parse::format_key;
use crate::solver::{Constraint, LinExpr};

type Row = Result<Constraint, ModelConstructionError>;
type Rows = Result<Vec<Constraint>, ModelConstructionError>;

fn row(family: &str, ids: &[usize]) -> String {
    var_name(family, &format_key(ids))
}

/// Demand of a product in a period is met by its flow spread over the eligible machines,
/// subcontracting and backlog, and the backlog of the previous period must be made up.
pub fn demand(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for (&p, &t) in iproduct!(sets.P.iter(), sets.T.iter()) {
        let key = ProductPeriod::new(p, t);
        let mut lhs = LinExpr::new();

        // products without eligible machines only get here with zero demand
        let eligible = parameters.eligible_machines[&p];
        if eligible > 0.0 {
            let routes = iproduct!(sets.O.iter(), sets.M.iter(), sets.F.iter(), sets.C.iter());
            for (&o, &m, &f, &c) in routes {
                let x = lookup(&vars.flow, "X", &FlowKey::new(o, p, m, f, c, t))?;
                lhs.add_term(1.0 / eligible, x);
            }
        }
        for &l in &sets.L {
            lhs.add_term(1.0, lookup(&vars.subcontract, "Y", &SubcontractKey::new(p, l, t))?);
        }
        lhs.add_term(1.0, lookup(&vars.backlog, "B", &key)?);

        let mut rhs = LinExpr::constant(parameters.demand[&(p, t)]);
        if let Some(prev) = sets.previous_period(t) {
            rhs.add_term(1.0, lookup(&vars.backlog, "B", &ProductPeriod::new(p, prev))?);
        }

        rows.push(Constraint::ge(var_name("demand", &key), lhs, rhs));
    }
    Ok(rows)
}

/// Work on a machine slot in a cell is bounded by the machine's capacity.
pub fn machine_capacity(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for (&m, &f, &c, &t) in iproduct!(sets.M.iter(), sets.F.iter(), sets.C.iter(), sets.T.iter()) {
        let mut lhs = LinExpr::new();
        for (&o, &p) in iproduct!(sets.O.iter(), sets.P.iter()) {
            lhs.add_term(1.0, lookup(&vars.flow, "X", &FlowKey::new(o, p, m, f, c, t))?);
        }
        rows.push(Constraint::le(
            row("machine_capacity", &[*m, *f, *c, *t]),
            lhs,
            parameters.machine_capacity[&m],
        ));
    }
    Ok(rows)
}

pub fn lot_size(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    flow_domain(sets)
        .map(|k| -> Row {
            let x = lookup(&vars.flow, "X", &k)?;
            Ok(Constraint::le(var_name("lot_size", &k), x, parameters.lot_size[&k.p]))
        })
        .collect()
}

/// Flow is only possible where the setup variable is on
pub fn setup_link(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    flow_domain(sets)
        .map(|k| -> Row {
            let x = lookup(&vars.flow, "X", &k)?;
            let z = lookup(&vars.setup, "Z", &k)?;
            Ok(Constraint::le(var_name("setup", &k), x, parameters.big_m * z))
        })
        .collect()
}

/// `(1 - eligibility) * flow <= 0`. Eligible routes give `0 <= 0` and are skipped.
pub fn eligibility(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for k in flow_domain(sets) {
        let coeff = 1.0 - parameters.eligibility[&(k.p, k.m)];
        if coeff == 0.0 {
            continue;
        }
        let x = lookup(&vars.flow, "X", &k)?;
        rows.push(Constraint::le(var_name("eligibility", &k), coeff * x, 0.0));
    }
    trace!("{} ineligible routes", rows.len());
    Ok(rows)
}

pub fn subcontract_capacity(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for (&l, &t) in iproduct!(sets.L.iter(), sets.T.iter()) {
        let mut lhs = LinExpr::new();
        for &p in &sets.P {
            lhs.add_term(1.0, lookup(&vars.subcontract, "Y", &SubcontractKey::new(p, l, t))?);
        }
        rows.push(Constraint::le(
            row("subcontract_capacity", &[*l, *t]),
            lhs,
            parameters.subcontract_capacity[&l],
        ));
    }
    Ok(rows)
}

pub fn backlog_bound(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    iproduct!(sets.P.iter(), sets.T.iter())
        .map(|(&p, &t)| -> Row {
            let key = ProductPeriod::new(p, t);
            let b = lookup(&vars.backlog, "B", &key)?;
            Ok(Constraint::le(
                var_name("backlog", &key),
                b,
                parameters.backlog_limit[&(p, t)],
            ))
        })
        .collect()
}

/// Machines installed in a cell are the ones installed the period before, plus the ones added,
/// minus the ones removed. Before the first period every cell holds the initial machines.
pub fn machine_balance(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for (&m, &c, &t) in iproduct!(sets.M.iter(), sets.C.iter(), sets.T.iter()) {
        let key = MachineCellPeriod::new(m, c, t);
        let installed = lookup(&vars.installed, "MN", &key)?;
        let added = lookup(&vars.added, "NAJ", &key)?;
        let removed = lookup(&vars.removed, "NRE", &key)?;

        let before = match sets.previous_period(t) {
            Some(prev) => LinExpr::from(lookup(
                &vars.installed,
                "MN",
                &MachineCellPeriod::new(m, c, prev),
            )?),
            None => LinExpr::constant(parameters.initial_machines[&m]),
        };

        rows.push(Constraint::equal(
            var_name("balance", &key),
            installed,
            before + added - removed,
        ));
    }
    Ok(rows)
}

/// Lower and upper bound on the machines of a cell, two rows per (cell, period)
pub fn cell_capacity(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for (&c, &t) in iproduct!(sets.C.iter(), sets.T.iter()) {
        let mut machines = LinExpr::new();
        for &m in &sets.M {
            let key = MachineCellPeriod::new(m, c, t);
            machines.add_term(1.0, lookup(&vars.installed, "MN", &key)?);
        }
        rows.push(Constraint::ge(
            row("cell_min", &[*c, *t]),
            machines.clone(),
            parameters.cell_capacity_min,
        ));
        rows.push(Constraint::le(
            row("cell_max", &[*c, *t]),
            machines,
            parameters.cell_capacity_max,
        ));
    }
    Ok(rows)
}

/// Flow through a machine in a cell needs that machine to be installed there
pub fn installed_capacity(sets: &Sets, parameters: &Parameters, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for (&m, &c, &t) in iproduct!(sets.M.iter(), sets.C.iter(), sets.T.iter()) {
        let key = MachineCellPeriod::new(m, c, t);
        let mut lhs = LinExpr::new();
        for (&o, &p, &f) in iproduct!(sets.O.iter(), sets.P.iter(), sets.F.iter()) {
            lhs.add_term(1.0, lookup(&vars.flow, "X", &FlowKey::new(o, p, m, f, c, t))?);
        }
        let installed = lookup(&vars.installed, "MN", &key)?;
        rows.push(Constraint::le(
            var_name("installed", &key),
            lhs,
            parameters.machine_capacity[&m] * installed,
        ));
    }
    Ok(rows)
}

/// What a cell processes at an operation must have been processed at the previous operation,
/// in any cell.
pub fn flow_balance(sets: &Sets, vars: &Variables) -> Rows {
    let mut rows = Vec::new();
    for &o in &sets.O {
        let prev = match sets.previous_operation(o) {
            Some(prev) => prev,
            None => continue,
        };
        for (&p, &c, &t) in iproduct!(sets.P.iter(), sets.C.iter(), sets.T.iter()) {
            let mut here = LinExpr::new();
            for (&m, &f) in iproduct!(sets.M.iter(), sets.F.iter()) {
                here.add_term(1.0, lookup(&vars.flow, "X", &FlowKey::new(o, p, m, f, c, t))?);
            }
            let mut upstream = LinExpr::new();
            for (&m, &f, &c2) in iproduct!(sets.M.iter(), sets.F.iter(), sets.C.iter()) {
                let key = FlowKey::new(prev, p, m, f, c2, t);
                upstream.add_term(1.0, lookup(&vars.flow, "X", &key)?);
            }
            rows.push(Constraint::le(
                row("flow_balance", &[*o, *p, *c, *t]),
                here,
                upstream,
            ));
        }
    }
    Ok(rows)
}
