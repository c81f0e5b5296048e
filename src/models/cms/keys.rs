//! Composite keys of the variable families.

use derive_more::{Constructor, Display};

use super::sets_and_parameters::{Cell, Machine, Operation, Period, Product, Slot, Subcontractor};

/// Key of the flow and setup variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Constructor, Display)]
#[display(fmt = "({}, {}, {}, {}, {}, {})", o, p, m, f, c, t)]
pub struct FlowKey {
    pub o: Operation,
    pub p: Product,
    pub m: Machine,
    pub f: Slot,
    pub c: Cell,
    pub t: Period,
}

/// Key of the backlog variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Constructor, Display)]
#[display(fmt = "({}, {})", p, t)]
pub struct ProductPeriod {
    pub p: Product,
    pub t: Period,
}

/// Key of the subcontracting variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Constructor, Display)]
#[display(fmt = "({}, {}, {})", p, l, t)]
pub struct SubcontractKey {
    pub p: Product,
    pub l: Subcontractor,
    pub t: Period,
}

/// Key of the machine count variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Constructor, Display)]
#[display(fmt = "({}, {}, {})", m, c, t)]
pub struct MachineCellPeriod {
    pub m: Machine,
    pub c: Cell,
    pub t: Period,
}

/// The engine-facing name of a variable, such as `X(1,2,1,1,1,3)`
pub fn var_name(symbol: &str, key: &impl std::fmt::Display) -> String {
    let key = key.to_string();
    let mut name = String::with_capacity(symbol.len() + key.len());
    name.push_str(symbol);
    name.extend(key.chars().filter(|c| !c.is_whitespace()));
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_have_no_whitespace() {
        let key = FlowKey::new(
            Operation::from(1usize),
            Product::from(2usize),
            Machine::from(1usize),
            Slot::from(1usize),
            Cell::from(3usize),
            Period::from(12usize),
        );
        assert_eq!(key.to_string(), "(1, 2, 1, 1, 3, 12)");
        assert_eq!(var_name("X", &key), "X(1,2,1,1,3,12)");
        assert_eq!(
            var_name("B", &ProductPeriod::new(Product::from(1usize), Period::from(2usize))),
            "B(1,2)"
        );
    }

    #[test]
    fn keys_order_by_their_fields() {
        let key = |m: usize, c: usize, t: usize| {
            MachineCellPeriod::new(Machine::from(m), Cell::from(c), Period::from(t))
        };
        let (a, b, c) = (key(1, 2, 1), key(1, 2, 2), key(2, 1, 1));
        assert!(a < b && b < c);
    }
}
