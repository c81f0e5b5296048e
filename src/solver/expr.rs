use derive_more::{Display, From, Into};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Opaque reference to a variable declared on an [`Engine`](super::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display)]
#[display(fmt = "v{}", _0)]
pub struct VarHandle(usize);

impl VarHandle {
    /// Position of the variable in declaration order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A linear expression `Σ coeff · var + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    terms: Vec<(VarHandle, f64)>,
    constant: f64,
}

impl LinExpr {
    pub fn new() -> LinExpr {
        LinExpr::default()
    }

    pub fn constant(constant: f64) -> LinExpr {
        LinExpr {
            terms: Vec::new(),
            constant,
        }
    }

    pub fn add_term(&mut self, coeff: f64, var: VarHandle) -> &mut Self {
        self.terms.push((var, coeff));
        self
    }

    pub fn add_constant(&mut self, constant: f64) -> &mut Self {
        self.constant += constant;
        self
    }

    pub fn terms(&self) -> &[(VarHandle, f64)] {
        &self.terms
    }

    /// The constant part of the expression
    pub fn offset(&self) -> f64 {
        self.constant
    }

    /// True if the expression has no variable terms
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Merges repeated variables and drops zero coefficients. Terms come out ordered by handle.
    pub fn compact(self) -> LinExpr {
        let mut merged: BTreeMap<VarHandle, f64> = BTreeMap::new();
        for (var, coeff) in self.terms {
            *merged.entry(var).or_insert(0.0) += coeff;
        }

        LinExpr {
            terms: merged.into_iter().filter(|(_, c)| *c != 0.0).collect(),
            constant: self.constant,
        }
    }

    /// The expression without its constant part
    pub fn without_constant(mut self) -> LinExpr {
        self.constant = 0.0;
        self
    }

    /// Evaluates the expression given a value for each variable
    pub fn evaluate<F>(&self, mut value: F) -> f64
    where
        F: FnMut(VarHandle) -> f64,
    {
        self.terms
            .iter()
            .map(|(var, coeff)| coeff * value(*var))
            .sum::<f64>()
            + self.constant
    }

    /// Same as [`LinExpr::evaluate`], for lookups that may fail
    pub fn try_evaluate<F, E>(&self, mut value: F) -> Result<f64, E>
    where
        F: FnMut(VarHandle) -> Result<f64, E>,
    {
        let mut sum = self.constant;
        for (var, coeff) in &self.terms {
            sum += coeff * value(*var)?;
        }
        Ok(sum)
    }

    fn scaled(mut self, factor: f64) -> LinExpr {
        for (_, coeff) in &mut self.terms {
            *coeff *= factor;
        }
        self.constant *= factor;
        self
    }
}

impl From<VarHandle> for LinExpr {
    fn from(var: VarHandle) -> Self {
        LinExpr {
            terms: vec![(var, 1.0)],
            constant: 0.0,
        }
    }
}

impl From<&VarHandle> for LinExpr {
    fn from(var: &VarHandle) -> Self {
        LinExpr::from(*var)
    }
}

impl From<f64> for LinExpr {
    fn from(constant: f64) -> Self {
        LinExpr::constant(constant)
    }
}

impl<T: Into<LinExpr>> Add<T> for LinExpr {
    type Output = LinExpr;

    fn add(mut self, rhs: T) -> LinExpr {
        self += rhs;
        self
    }
}

impl<T: Into<LinExpr>> AddAssign<T> for LinExpr {
    fn add_assign(&mut self, rhs: T) {
        let rhs = rhs.into();
        self.terms.extend(rhs.terms);
        self.constant += rhs.constant;
    }
}

impl<T: Into<LinExpr>> Sub<T> for LinExpr {
    type Output = LinExpr;

    fn sub(self, rhs: T) -> LinExpr {
        self + rhs.into().scaled(-1.0)
    }
}

impl Neg for LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self.scaled(-1.0)
    }
}

impl Mul<f64> for LinExpr {
    type Output = LinExpr;

    fn mul(self, rhs: f64) -> LinExpr {
        self.scaled(rhs)
    }
}

impl Mul<LinExpr> for f64 {
    type Output = LinExpr;

    fn mul(self, rhs: LinExpr) -> LinExpr {
        rhs.scaled(self)
    }
}

impl Mul<VarHandle> for f64 {
    type Output = LinExpr;

    fn mul(self, rhs: VarHandle) -> LinExpr {
        LinExpr {
            terms: vec![(rhs, self)],
            constant: 0.0,
        }
    }
}

impl<T: Into<LinExpr>> Add<T> for VarHandle {
    type Output = LinExpr;

    fn add(self, rhs: T) -> LinExpr {
        LinExpr::from(self) + rhs
    }
}

impl<T: Into<LinExpr>> Sub<T> for VarHandle {
    type Output = LinExpr;

    fn sub(self, rhs: T) -> LinExpr {
        LinExpr::from(self) - rhs
    }
}

impl std::iter::Sum<LinExpr> for LinExpr {
    fn sum<I: Iterator<Item = LinExpr>>(iter: I) -> Self {
        iter.fold(LinExpr::new(), |acc, e| acc + e)
    }
}

/// Sums anything that converts into a [`LinExpr`], the way `grb_sum` does for gurobi expressions.
pub trait LinSum {
    fn lin_sum(self) -> LinExpr;
}

impl<I, T> LinSum for I
where
    I: IntoIterator<Item = T>,
    T: Into<LinExpr>,
{
    fn lin_sum(self) -> LinExpr {
        let mut expr = LinExpr::new();
        for item in self {
            expr += item;
        }
        expr
    }
}

/// Relation between the two sides of a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum Relation {
    #[display(fmt = "<=")]
    Le,
    #[display(fmt = "=")]
    Eq,
    #[display(fmt = ">=")]
    Ge,
}

/// A named linear constraint in normal form: variable terms on the left, a scalar on the right.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub lhs: LinExpr,
    pub relation: Relation,
    pub rhs: f64,
}

impl Constraint {
    pub fn new(
        name: impl Into<String>,
        lhs: impl Into<LinExpr>,
        relation: Relation,
        rhs: impl Into<LinExpr>,
    ) -> Constraint {
        let diff = (lhs.into() - rhs.into()).compact();
        let rhs = 0.0 - diff.offset();
        Constraint {
            name: name.into(),
            lhs: diff.without_constant(),
            relation,
            rhs,
        }
    }

    pub fn le(name: impl Into<String>, lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Constraint::new(name, lhs, Relation::Le, rhs)
    }

    pub fn ge(name: impl Into<String>, lhs: impl Into<LinExpr>, rhs: impl Into<LinExpr>) -> Self {
        Constraint::new(name, lhs, Relation::Ge, rhs)
    }

    pub fn equal(
        name: impl Into<String>,
        lhs: impl Into<LinExpr>,
        rhs: impl Into<LinExpr>,
    ) -> Self {
        Constraint::new(name, lhs, Relation::Eq, rhs)
    }

    /// Whether the constraint holds for the given values, up to `tolerance`
    pub fn is_satisfied<F>(&self, value: F, tolerance: f64) -> bool
    where
        F: FnMut(VarHandle) -> f64,
    {
        let lhs = self.lhs.evaluate(value);
        match self.relation {
            Relation::Le => lhs <= self.rhs + tolerance,
            Relation::Ge => lhs >= self.rhs - tolerance,
            Relation::Eq => (lhs - self.rhs).abs() <= tolerance,
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.name)?;
        for (var, coeff) in self.lhs.terms() {
            write!(f, " {:+} {}", coeff, var)?;
        }
        write!(f, " {} {}", self.relation, self.rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: usize) -> VarHandle {
        VarHandle::from(i)
    }

    #[test]
    fn compact_merges_repeated_variables() {
        let expr = (v(1) + v(0) + 2.0 * v(1) - v(0)).compact();
        assert_eq!(expr.terms(), &[(v(1), 3.0)]);
    }

    #[test]
    fn constraint_moves_constants_to_the_right() {
        // x + 3 <= 10 · z + 5  ->  x - 10 z <= 2
        let c = Constraint::le("c", v(0) + 3.0, 10.0 * v(1) + 5.0);
        assert_eq!(c.lhs.terms(), &[(v(0), 1.0), (v(1), -10.0)]);
        assert_eq!(c.rhs, 2.0);
        assert_eq!(c.relation, Relation::Le);
    }

    #[test]
    fn satisfaction_respects_relation() {
        let c = Constraint::ge("c", v(0) + v(1), 4.0);
        let values = [1.0, 3.0];
        assert!(c.is_satisfied(|var| values[var.index()], 1e-9));
        let values = [1.0, 2.0];
        assert!(!c.is_satisfied(|var| values[var.index()], 1e-9));
    }

    #[test]
    fn lin_sum_of_handles() {
        let expr = (0..4).map(v).lin_sum();
        assert_eq!(expr.terms().len(), 4);
        assert_eq!(expr.evaluate(|_| 2.5), 10.0);
    }
}
