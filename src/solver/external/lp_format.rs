//! Writer for the CPLEX LP text format read by most external optimizers.

use std::fmt::Write;

use crate::solver::{LinExpr, ModelBuffer, Relation, Sense, VarKind};

/// Terms written per line before wrapping
const TERMS_PER_LINE: usize = 8;

/// Renders `buffer` as an LP file. The objective constant is left out; LP readers disagree on
/// whether they accept one, so callers add it back to the reported objective.
pub fn write_lp(buffer: &ModelBuffer) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    let names = buffer
        .vars
        .iter()
        .map(|v| sanitize(&v.name))
        .collect::<Vec<_>>();

    writeln!(out, "\\ Problem: cms")?;
    match &buffer.objective {
        Some((expr, Sense::Maximize)) => {
            writeln!(out, "Maximize")?;
            write_row(&mut out, "obj", expr, &names)?;
        }
        Some((expr, Sense::Minimize)) => {
            writeln!(out, "Minimize")?;
            write_row(&mut out, "obj", expr, &names)?;
        }
        None => {
            writeln!(out, "Minimize")?;
            writeln!(out, " obj:")?;
        }
    }

    writeln!(out, "Subject To")?;
    for constraint in buffer.constraints.iter().filter(|c| !c.lhs.is_empty()) {
        write_row(&mut out, &sanitize(&constraint.name), &constraint.lhs, &names)?;
        let relation = match constraint.relation {
            Relation::Le => "<=",
            Relation::Ge => ">=",
            Relation::Eq => "=",
        };
        writeln!(out, "   {} {}", relation, constraint.rhs)?;
    }

    writeln!(out, "Bounds")?;
    for (decl, name) in buffer.vars.iter().zip(&names) {
        if decl.kind == VarKind::Binary {
            continue;
        }
        match (decl.lb.is_finite(), decl.ub.is_finite()) {
            (true, false) if decl.lb == 0.0 => {}
            (false, false) => writeln!(out, " {} free", name)?,
            (true, false) => writeln!(out, " {} >= {}", name, decl.lb)?,
            (false, true) => writeln!(out, " -inf <= {} <= {}", name, decl.ub)?,
            (true, true) => writeln!(out, " {} <= {} <= {}", decl.lb, name, decl.ub)?,
        }
    }

    for (section, kind) in [("General", VarKind::Integer), ("Binary", VarKind::Binary)] {
        let members = buffer
            .vars
            .iter()
            .zip(&names)
            .filter(|(decl, _)| decl.kind == kind)
            .map(|(_, name)| name.as_str())
            .collect::<Vec<_>>();
        if members.is_empty() {
            continue;
        }
        writeln!(out, "{}", section)?;
        for chunk in members.chunks(TERMS_PER_LINE) {
            writeln!(out, " {}", chunk.join(" "))?;
        }
    }

    writeln!(out, "End")?;
    Ok(out)
}

/// Variable and row names with whitespace removed, which is also how result files are matched
pub fn sanitize(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

fn write_row(
    out: &mut String,
    label: &str,
    expr: &LinExpr,
    names: &[String],
) -> std::fmt::Result {
    write!(out, " {}:", label)?;
    for (i, (var, coeff)) in expr.terms().iter().enumerate() {
        if i > 0 && i % TERMS_PER_LINE == 0 {
            write!(out, "\n   ")?;
        }
        let sign = if *coeff < 0.0 { '-' } else { '+' };
        match (i, coeff.abs()) {
            (0, c) if *coeff >= 0.0 && c == 1.0 => write!(out, " {}", names[var.index()])?,
            (0, c) if *coeff >= 0.0 => write!(out, " {} {}", c, names[var.index()])?,
            (_, c) if c == 1.0 => write!(out, " {} {}", sign, names[var.index()])?,
            (_, c) => write!(out, " {} {} {}", sign, c, names[var.index()])?,
        }
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Constraint;

    #[test]
    fn writes_all_sections() {
        let mut buffer = ModelBuffer::default();
        let x = buffer.add_var("X(1, 2)", VarKind::Continuous, 0.0, f64::INFINITY);
        let z = buffer.add_var("Z(1, 2)", VarKind::Binary, 0.0, 1.0);
        let n = buffer.add_var("MN(1)", VarKind::Integer, 0.0, 5.0);
        buffer
            .add_constr(&Constraint::le("link(1, 2)", x, 100.0 * z))
            .unwrap();
        buffer.add_constr(&Constraint::ge("cell", n, 1.0)).unwrap();
        buffer
            .set_objective(2.0 * x + 3.0 * n - 1.0 * z, Sense::Minimize)
            .unwrap();

        let lp = write_lp(&buffer).unwrap();
        let expected = "\\ Problem: cms\n\
            Minimize\n \
            obj: 2 X(1,2) - Z(1,2) + 3 MN(1)\n\
            Subject To\n \
            link(1,2): X(1,2) - 100 Z(1,2)\n   <= 0\n \
            cell: MN(1)\n   >= 1\n\
            Bounds\n \
            0 <= MN(1) <= 5\n\
            General\n \
            MN(1)\n\
            Binary\n \
            Z(1,2)\n\
            End\n";
        assert_eq!(lp, expected);
    }

    #[test]
    fn long_rows_wrap() {
        let mut buffer = ModelBuffer::default();
        let vars = (0..10)
            .map(|i| buffer.add_var(&format!("x{}", i), VarKind::Continuous, 0.0, f64::INFINITY))
            .collect::<Vec<_>>();
        buffer
            .set_objective(vars.iter().map(|v| LinExpr::from(*v)).sum(), Sense::Maximize)
            .unwrap();

        let lp = write_lp(&buffer).unwrap();
        assert!(lp.contains("Maximize\n obj: x0 + x1"));
        assert!(lp.contains("+ x7\n    + x8 + x9\n"));
    }
}
