//! The table grammar of the input document.
//!
//! A table is either a single number applied to every key, positional arrays in declared set
//! order, or an object whose keys are composite keys such as `"(1, 2)"`, `"1,2"` or `"P3"`.
//! Keys are parsed by [`parse_key`]; nothing in the input is ever evaluated.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use derive_more::Display;
use serde::Deserialize;

use crate::problem::DataInconsistency;

/// A table over one index set
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Table1 {
    Uniform(f64),
    Positional(Vec<f64>),
    Keyed(BTreeMap<String, f64>),
}

/// A table over the product of two index sets
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Table2 {
    Uniform(f64),
    /// One row per member of the first set
    Nested(Vec<Vec<f64>>),
    Keyed(BTreeMap<String, f64>),
}

/// A table over the product of three index sets
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Table3 {
    Uniform(f64),
    Keyed(BTreeMap<String, f64>),
}

impl Default for Table3 {
    fn default() -> Self {
        Table3::Uniform(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum KeyError {
    #[display(fmt = "empty key")]
    Empty,
    #[display(fmt = "unbalanced brackets")]
    Unbalanced,
    #[display(fmt = "'{}' is not an index", _0)]
    BadAtom(String),
}

impl std::error::Error for KeyError {}

/// Parses a composite key into its ids.
///
/// ```text
/// key   := ws? ( '(' atoms ')' | '[' atoms ']' | atoms ) ws?
/// atoms := atom (',' atom)*
/// atom  := ws? letter* digit+ ws?
/// ```
pub fn parse_key(text: &str) -> Result<Vec<usize>, KeyError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(KeyError::Empty);
    }

    let inner = match (text.chars().next(), text.chars().last()) {
        (Some('('), Some(')')) | (Some('['), Some(']')) => &text[1..text.len() - 1],
        (Some('(' | '['), _) | (_, Some(')' | ']')) => return Err(KeyError::Unbalanced),
        _ => text,
    };

    inner
        .split(',')
        .map(|atom| {
            let atom = atom.trim();
            let digits = atom.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(KeyError::BadAtom(atom.to_string()));
            }
            digits
                .parse::<usize>()
                .map_err(|_| KeyError::BadAtom(atom.to_string()))
        })
        .collect()
}

/// Renders ids the way error messages and reports show keys
pub fn format_key(ids: &[usize]) -> String {
    let inner = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({})", inner)
}

/// Parses every key of a keyed table, checking its arity.
fn keyed_entries(
    table: &str,
    entries: &BTreeMap<String, f64>,
    arity: usize,
) -> Result<Vec<(Vec<usize>, f64)>, DataInconsistency> {
    entries
        .iter()
        .map(|(key, value)| match parse_key(key) {
            Ok(ids) if ids.len() == arity => Ok((ids, *value)),
            _ => Err(DataInconsistency::MalformedKey {
                table: table.to_string(),
                key: key.clone(),
            }),
        })
        .collect()
}

/// Finds the set member with the given id
fn member<K: Copy + Into<usize>>(
    table: &str,
    set: &[K],
    id: usize,
    ids: &[usize],
) -> Result<K, DataInconsistency> {
    set.iter()
        .copied()
        .find(|k| (*k).into() == id)
        .ok_or_else(|| DataInconsistency::UnknownEntry {
            table: table.to_string(),
            key: format_key(ids),
        })
}

fn insert_unique<K: Eq + Hash>(
    table: &str,
    out: &mut HashMap<K, f64>,
    key: K,
    ids: &[usize],
    value: f64,
) -> Result<(), DataInconsistency> {
    match out.insert(key, value) {
        Some(_) => Err(DataInconsistency::DuplicateEntry {
            table: table.to_string(),
            key: format_key(ids),
        }),
        None => Ok(()),
    }
}

/// Fails on the first key of the domain the table leaves out
fn check_total<K, I, F>(
    table: &str,
    out: &HashMap<K, f64>,
    domain: I,
    ids: F,
) -> Result<(), DataInconsistency>
where
    K: Eq + Hash,
    I: IntoIterator<Item = K>,
    F: Fn(&K) -> Vec<usize>,
{
    match domain.into_iter().find(|k| !out.contains_key(k)) {
        Some(missing) => Err(DataInconsistency::MissingEntry {
            table: table.to_string(),
            key: format_key(&ids(&missing)),
        }),
        None => Ok(()),
    }
}

/// Resolves a one-dimensional table against its index set
pub fn resolve1<K>(
    table: &str,
    data: &Table1,
    set: &[K],
) -> Result<HashMap<K, f64>, DataInconsistency>
where
    K: Copy + Eq + Hash + Into<usize>,
{
    let mut out = HashMap::with_capacity(set.len());
    match data {
        Table1::Uniform(value) => {
            out.extend(set.iter().map(|k| (*k, *value)));
        }
        Table1::Positional(values) => {
            if values.len() > set.len() {
                return Err(DataInconsistency::UnknownEntry {
                    table: table.to_string(),
                    key: format!("position {}", set.len() + 1),
                });
            }
            out.extend(set.iter().copied().zip(values.iter().copied()));
        }
        Table1::Keyed(entries) => {
            for (ids, value) in keyed_entries(table, entries, 1)? {
                let k = member(table, set, ids[0], &ids)?;
                insert_unique(table, &mut out, k, &ids, value)?;
            }
        }
    }

    check_total(table, &out, set.iter().copied(), |k| vec![(*k).into()])?;
    Ok(out)
}

/// Resolves a table over `first × second`
pub fn resolve2<A, B>(
    table: &str,
    data: &Table2,
    first: &[A],
    second: &[B],
) -> Result<HashMap<(A, B), f64>, DataInconsistency>
where
    A: Copy + Eq + Hash + Into<usize>,
    B: Copy + Eq + Hash + Into<usize>,
{
    let mut out = HashMap::with_capacity(first.len() * second.len());
    match data {
        Table2::Uniform(value) => {
            for a in first {
                out.extend(second.iter().map(|b| ((*a, *b), *value)));
            }
        }
        Table2::Nested(rows) => {
            if rows.len() > first.len() {
                return Err(DataInconsistency::UnknownEntry {
                    table: table.to_string(),
                    key: format!("row {}", first.len() + 1),
                });
            }
            for (a, row) in first.iter().zip(rows) {
                if row.len() > second.len() {
                    return Err(DataInconsistency::UnknownEntry {
                        table: table.to_string(),
                        key: format_key(&[(*a).into(), second.len() + 1]),
                    });
                }
                out.extend(second.iter().zip(row).map(|(b, v)| ((*a, *b), *v)));
            }
        }
        Table2::Keyed(entries) => {
            for (ids, value) in keyed_entries(table, entries, 2)? {
                let a = member(table, first, ids[0], &ids)?;
                let b = member(table, second, ids[1], &ids)?;
                insert_unique(table, &mut out, (a, b), &ids, value)?;
            }
        }
    }

    let domain = first
        .iter()
        .flat_map(|a| second.iter().map(move |b| (*a, *b)));
    check_total(table, &out, domain, |(a, b)| vec![(*a).into(), (*b).into()])?;
    Ok(out)
}

/// Resolves a table over `first × second × third`
pub fn resolve3<A, B, C>(
    table: &str,
    data: &Table3,
    first: &[A],
    second: &[B],
    third: &[C],
) -> Result<HashMap<(A, B, C), f64>, DataInconsistency>
where
    A: Copy + Eq + Hash + Into<usize>,
    B: Copy + Eq + Hash + Into<usize>,
    C: Copy + Eq + Hash + Into<usize>,
{
    let domain = || {
        first.iter().flat_map(move |a| {
            second
                .iter()
                .flat_map(move |b| third.iter().map(move |c| (*a, *b, *c)))
        })
    };

    let mut out = HashMap::new();
    match data {
        Table3::Uniform(value) => out.extend(domain().map(|k| (k, *value))),
        Table3::Keyed(entries) => {
            for (ids, value) in keyed_entries(table, entries, 3)? {
                let a = member(table, first, ids[0], &ids)?;
                let b = member(table, second, ids[1], &ids)?;
                let c = member(table, third, ids[2], &ids)?;
                insert_unique(table, &mut out, (a, b, c), &ids, value)?;
            }
        }
    }

    check_total(table, &out, domain(), |(a, b, c)| {
        vec![(*a).into(), (*b).into(), (*c).into()]
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_forms() {
        assert_eq!(parse_key("(1, 2)"), Ok(vec![1, 2]));
        assert_eq!(parse_key(" [3,4,5] "), Ok(vec![3, 4, 5]));
        assert_eq!(parse_key("1,2"), Ok(vec![1, 2]));
        assert_eq!(parse_key("P3"), Ok(vec![3]));
        assert_eq!(parse_key("(P1, M12)"), Ok(vec![1, 12]));
    }

    #[test]
    fn bad_keys() {
        assert_eq!(parse_key("   "), Err(KeyError::Empty));
        assert_eq!(parse_key("(1, 2"), Err(KeyError::Unbalanced));
        assert_eq!(parse_key("1, 2]"), Err(KeyError::Unbalanced));
        assert_eq!(parse_key("(1, x)"), Err(KeyError::BadAtom("x".into())));
        assert_eq!(parse_key("1+1"), Err(KeyError::BadAtom("1+1".into())));
        assert_eq!(parse_key("(1,,2)"), Err(KeyError::BadAtom("".into())));
        assert_eq!(parse_key("os.system"), Err(KeyError::BadAtom("os.system".into())));
    }

    #[test]
    fn one_dimensional_forms_agree() {
        let set = [1usize, 2, 3];
        let uniform = resolve1("t", &Table1::Uniform(4.0), &set).unwrap();
        assert_eq!(uniform[&2], 4.0);

        let positional = resolve1("t", &Table1::Positional(vec![1.0, 2.0, 3.0]), &set).unwrap();
        let keyed: Table1 = serde_json::from_str(r#"{"1": 1, "(2)": 2, "P3": 3}"#).unwrap();
        assert_eq!(positional, resolve1("t", &keyed, &set).unwrap());
    }

    #[test]
    fn totality_is_enforced() {
        let set = [1usize, 2];
        assert_eq!(
            resolve1("MC", &Table1::Positional(vec![1.0]), &set),
            Err(DataInconsistency::MissingEntry {
                table: "MC".into(),
                key: "(2)".into()
            })
        );
        assert!(matches!(
            resolve1("MC", &Table1::Positional(vec![1.0, 2.0, 3.0]), &set),
            Err(DataInconsistency::UnknownEntry { .. })
        ));

        let keyed: Table2 = serde_json::from_str(r#"{"(1, 1)": 1, "(1, 3)": 0}"#).unwrap();
        assert_eq!(
            resolve2("mcim", &keyed, &set, &set),
            Err(DataInconsistency::UnknownEntry {
                table: "mcim".into(),
                key: "(1, 3)".into()
            })
        );
    }

    #[test]
    fn keyed_duplicates_and_arity() {
        let set = [1usize, 2];
        let dup: Table1 = serde_json::from_str(r#"{"1": 1, "(1)": 2, "2": 0}"#).unwrap();
        assert!(matches!(
            resolve1("hold_cost", &dup, &set),
            Err(DataInconsistency::DuplicateEntry { .. })
        ));

        let wrong_arity: Table2 = serde_json::from_str(r#"{"1": 1}"#).unwrap();
        assert_eq!(
            resolve2("pdef", &wrong_arity, &set, &set),
            Err(DataInconsistency::MalformedKey {
                table: "pdef".into(),
                key: "1".into()
            })
        );
    }

    #[test]
    fn nested_rows_follow_the_first_set() {
        let rows: Table2 = serde_json::from_str("[[1, 0], [1, 1]]").unwrap();
        let table = resolve2("mcim", &rows, &[1usize, 2], &[1usize, 2]).unwrap();
        assert_eq!(table[&(1, 2)], 0.0);
        assert_eq!(table[&(2, 1)], 1.0);
    }

    #[test]
    fn three_dimensional_defaults() {
        let products = [1usize];
        let machines = [1usize, 2];
        let operations = [1usize];
        let table = resolve3(
            "operation_cost",
            &Table3::default(),
            &products,
            &machines,
            &operations,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.values().all(|v| *v == 0.0));
    }

    proptest! {
        #[test]
        fn formatted_keys_parse_back(
            ids in proptest::collection::vec(0usize..10_000, 1..5),
            prefix in "[A-Za-z]{0,3}",
            brackets in 0usize..3,
            spaces in " {0,2}",
        ) {
            let atoms = ids
                .iter()
                .map(|id| format!("{}{}{}{}", spaces, prefix, id, spaces))
                .collect::<Vec<_>>()
                .join(",");
            let key = match brackets {
                0 => atoms,
                1 => format!("({})", atoms),
                _ => format!("[{}]", atoms),
            };
            prop_assert_eq!(parse_key(&key), Ok(ids));
        }
    }
}
