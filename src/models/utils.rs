use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::Range;

use crate::models::cms::keys::var_name;
use crate::models::cms::ModelConstructionError;
use crate::solver::{Engine, VarHandle, VarKind};

pub trait AddVars {
    type Key;

    /// Create a variable for every key
    fn vars<E: Engine + ?Sized>(
        self,
        engine: &mut E,
        symbol: &str,
        kind: VarKind,
        bounds: &Range<f64>,
    ) -> Result<BTreeMap<Self::Key, VarHandle>, ModelConstructionError>;

    /// Binary variables
    fn binary<E: Engine + ?Sized>(
        self,
        engine: &mut E,
        symbol: &str,
    ) -> Result<BTreeMap<Self::Key, VarHandle>, ModelConstructionError>
    where
        Self: Sized,
    {
        self.vars(engine, symbol, VarKind::Binary, &(0.0..1.0))
    }

    /// Continuous non-negative variables
    fn cont<E: Engine + ?Sized>(
        self,
        engine: &mut E,
        symbol: &str,
    ) -> Result<BTreeMap<Self::Key, VarHandle>, ModelConstructionError>
    where
        Self: Sized,
    {
        self.vars(engine, symbol, VarKind::Continuous, &(0.0..f64::INFINITY))
    }

    /// Integer variables in `[0, ub]`
    fn int<E: Engine + ?Sized>(
        self,
        engine: &mut E,
        symbol: &str,
        ub: f64,
    ) -> Result<BTreeMap<Self::Key, VarHandle>, ModelConstructionError>
    where
        Self: Sized,
    {
        self.vars(engine, symbol, VarKind::Integer, &(0.0..ub))
    }
}

impl<I, K> AddVars for I
where
    I: IntoIterator<Item = K>,
    K: Ord + Copy + Display,
{
    type Key = K;

    fn vars<E: Engine + ?Sized>(
        self,
        engine: &mut E,
        symbol: &str,
        kind: VarKind,
        bounds: &Range<f64>,
    ) -> Result<BTreeMap<K, VarHandle>, ModelConstructionError> {
        let mut out = BTreeMap::new();
        for key in self {
            if out.contains_key(&key) {
                return Err(ModelConstructionError::DuplicateKey(var_name(symbol, &key)));
            }
            let var = engine.add_var(&var_name(symbol, &key), kind, bounds.start, bounds.end)?;
            out.insert(key, var);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::MicrolpEngine;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
    #[display(fmt = "({})", _0)]
    struct Key(usize);

    #[test]
    fn one_variable_per_key() {
        let mut engine = MicrolpEngine::new();
        let vars = (1..=3).map(Key).cont(&mut engine, "Y").unwrap();
        assert_eq!(vars.len(), 3);
        assert_eq!(engine.stats().variables, 3);
    }

    #[test]
    fn integer_variables_carry_their_bound() {
        let mut engine = MicrolpEngine::new();
        let vars = (1..=2).map(Key).int(&mut engine, "MN", 4.0).unwrap();
        assert_eq!(vars.len(), 2);
        assert!(matches!(
            (1..=2).map(Key).int(&mut engine, "NAJ", f64::INFINITY),
            Err(ModelConstructionError::Engine(_))
        ));
    }

    #[test]
    fn repeated_keys_are_rejected() {
        let mut engine = MicrolpEngine::new();
        let result = vec![Key(1), Key(2), Key(1)].binary(&mut engine, "Z");
        assert!(matches!(
            result,
            Err(ModelConstructionError::DuplicateKey(name)) if name == "Z(1)"
        ));
    }
}
