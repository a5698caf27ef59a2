//! # Signing Thresholds
//!
//! A threshold says which subsets of an identifier's keys may speak for it.
//! Two shapes exist on the wire ([`Sith`]):
//!
//! - **Simple**: an integer `m`: any `m` of the keys. Encoded as a hex
//!   string (`"2"`, `"a"`) or, leniently, a JSON number.
//! - **Weighted**: lists of fractional weights, one list per clause:
//!   `[["1/2","1/2"],["1"]]`. Clause positions are flattened across the
//!   whole structure, so the example addresses keys 0, 1 and 2. A clause is
//!   met when the weights of the signing keys it covers add up to at least
//!   one; the threshold is met when any clause is.
//!
//! All arithmetic is exact. Weights are reduced fractions summed by
//! cross-multiplication, so `1/3 + 1/3 + 1/3` is exactly one and never
//! `0.9999999`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Wire form of a threshold, as it appears in `kt`/`nt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sith {
    Number(u64),
    Simple(String),
    Flat(Vec<String>),
    Clauses(Vec<Vec<String>>),
}

impl From<u64> for Sith {
    fn from(n: u64) -> Self {
        Sith::Simple(format!("{n:x}"))
    }
}

impl From<&str> for Sith {
    fn from(s: &str) -> Self {
        Sith::Simple(s.to_string())
    }
}

impl From<Vec<Vec<&str>>> for Sith {
    fn from(clauses: Vec<Vec<&str>>) -> Self {
        Sith::Clauses(
            clauses
                .into_iter()
                .map(|c| c.into_iter().map(str::to_string).collect())
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Weight
// ---------------------------------------------------------------------------

/// An exact fractional weight in `[0, 1]`, kept reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weight {
    num: u64,
    den: u64,
}

impl Weight {
    pub fn new(num: u64, den: u64) -> Result<Self> {
        if den == 0 {
            return Err(malformed(format!("zero denominator in {num}/{den}")));
        }
        if num > den {
            return Err(malformed(format!("weight {num}/{den} exceeds one")));
        }
        let g = gcd(num, den).max(1);
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let parse_part = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| malformed(format!("invalid weight `{text}`")))
        };
        match text.split_once('/') {
            Some((num, den)) => Self::new(parse_part(num)?, parse_part(den)?),
            None => Self::new(parse_part(text)?, 1),
        }
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Running exact sum of weights.
#[derive(Debug, Clone, Copy)]
struct Sum {
    num: u128,
    den: u128,
}

impl Sum {
    const ZERO: Sum = Sum { num: 0, den: 1 };

    /// Exact sum, or `None` once the common denominator leaves `u128`.
    fn add(self, w: Weight) -> Option<Sum> {
        let (wn, wd) = (u128::from(w.num), u128::from(w.den));
        let g = gcd128(self.den, wd).max(1);
        let den = (self.den / g).checked_mul(wd)?;
        let num = self
            .num
            .checked_mul(den / self.den)?
            .checked_add(wn.checked_mul(den / wd)?)?;
        let r = gcd128(num, den).max(1);
        Some(Sum {
            num: num / r,
            den: den / r,
        })
    }

    fn at_least_one(self) -> bool {
        self.num >= self.den
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn gcd128(a: u128, b: u128) -> u128 {
    if b == 0 {
        a
    } else {
        gcd128(b, a % b)
    }
}

fn malformed(reason: String) -> crate::SignifyError {
    ValidationError::MalformedThreshold(reason).into()
}

// ---------------------------------------------------------------------------
// Tholder
// ---------------------------------------------------------------------------

/// Parsed, validated threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tholder {
    Simple(u64),
    Weighted(Vec<Vec<Weight>>),
}

impl Tholder {
    /// Parse and validate a wire threshold.
    pub fn from_sith(sith: &Sith) -> Result<Self> {
        match sith {
            Sith::Number(n) => Ok(Tholder::Simple(*n)),
            Sith::Simple(text) => {
                if text.contains('/') {
                    return Err(malformed(format!(
                        "fractional threshold `{text}` must be given as a weight list"
                    )));
                }
                u64::from_str_radix(text.trim(), 16)
                    .map(Tholder::Simple)
                    .map_err(|_| malformed(format!("`{text}` is not a hex integer")))
            }
            Sith::Flat(weights) => Self::weighted(std::slice::from_ref(weights)),
            Sith::Clauses(clauses) => Self::weighted(clauses),
        }
    }

    fn weighted(clauses: &[Vec<String>]) -> Result<Self> {
        if clauses.is_empty() {
            return Err(malformed("empty clause list".into()));
        }
        let mut parsed = Vec::with_capacity(clauses.len());
        for (i, clause) in clauses.iter().enumerate() {
            if clause.is_empty() {
                return Err(malformed(format!("clause {i} is empty")));
            }
            let weights = clause
                .iter()
                .map(|w| Weight::parse(w))
                .collect::<Result<Vec<_>>>()?;
            let total = weights
                .iter()
                .try_fold(Sum::ZERO, |acc, w| acc.add(*w))
                .ok_or_else(|| malformed(format!("clause {i} weights overflow an exact sum")))?;
            if !total.at_least_one() {
                return Err(malformed(format!("clause {i} can never reach one")));
            }
            parsed.push(weights);
        }
        Ok(Tholder::Weighted(parsed))
    }

    /// Simple majority over `count` keys: `max(1, ceil(count / 2))`.
    pub fn default_for(count: usize) -> Self {
        Tholder::Simple(count.div_ceil(2).max(1) as u64)
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self, Tholder::Weighted(_))
    }

    /// Number of keys the threshold addresses: the integer itself for a
    /// simple threshold, the total weight count otherwise.
    pub fn size(&self) -> usize {
        match self {
            Tholder::Simple(n) => *n as usize,
            Tholder::Weighted(clauses) => clauses.iter().map(Vec::len).sum(),
        }
    }

    /// Canonical wire form.
    pub fn sith(&self) -> Sith {
        match self {
            Tholder::Simple(n) => Sith::from(*n),
            Tholder::Weighted(clauses) => {
                let mut rendered: Vec<Vec<String>> = clauses
                    .iter()
                    .map(|c| c.iter().map(Weight::to_string).collect())
                    .collect();
                if rendered.len() == 1 {
                    Sith::Flat(rendered.remove(0))
                } else {
                    Sith::Clauses(rendered)
                }
            }
        }
    }

    /// True when the keys at `indices` satisfy the threshold. Duplicate
    /// indices count once; indices the threshold does not address are
    /// ignored by weighted thresholds.
    pub fn satisfy<I>(&self, indices: I) -> bool
    where
        I: IntoIterator<Item = usize>,
    {
        let indices: BTreeSet<usize> = indices.into_iter().collect();
        match self {
            Tholder::Simple(n) => indices.len() as u64 >= *n,
            Tholder::Weighted(clauses) => {
                let mut offset = 0;
                clauses.iter().any(|clause| {
                    let start = offset;
                    offset += clause.len();
                    clause
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| indices.contains(&(start + i)))
                        .try_fold(Sum::ZERO, |acc, (_, w)| acc.add(*w))
                        .is_some_and(Sum::at_least_one)
                })
            }
        }
    }
}

impl TryFrom<&Sith> for Tholder {
    type Error = crate::SignifyError;

    fn try_from(sith: &Sith) -> Result<Self> {
        Tholder::from_sith(sith)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignifyError;

    fn clauses(c: Vec<Vec<&str>>) -> Tholder {
        Tholder::from_sith(&Sith::from(c)).unwrap()
    }

    #[test]
    fn test_simple_hex_threshold() {
        let t = Tholder::from_sith(&Sith::from("a")).unwrap();
        assert_eq!(t, Tholder::Simple(10));
        assert_eq!(t.sith(), Sith::Simple("a".into()));
        assert!(Tholder::Simple(2).satisfy([0, 3]));
        assert!(!Tholder::Simple(2).satisfy([1, 1]));
    }

    #[test]
    fn test_json_number_accepted() {
        let sith: Sith = serde_json::from_str("2").unwrap();
        assert_eq!(Tholder::from_sith(&sith).unwrap(), Tholder::Simple(2));
    }

    #[test]
    fn test_wire_forms_parse() {
        let flat: Sith = serde_json::from_str(r#"["1/2","1/2"]"#).unwrap();
        assert!(matches!(flat, Sith::Flat(_)));
        let nested: Sith = serde_json::from_str(r#"[["1/2","1/2"],["1"]]"#).unwrap();
        assert!(matches!(nested, Sith::Clauses(_)));
        // A flat list is the single-clause form of a nested one.
        assert_eq!(
            Tholder::from_sith(&flat).unwrap(),
            clauses(vec![vec!["1/2", "1/2"]])
        );
    }

    #[test]
    fn test_weighted_or_across_clauses() {
        let t = clauses(vec![vec!["1/2", "1/2"], vec!["1/1"]]);
        assert_eq!(t.size(), 3);
        assert!(t.satisfy([0, 1]));
        assert!(t.satisfy([2]));
        assert!(!t.satisfy([0]));
        assert!(!t.satisfy([1]));
    }

    #[test]
    fn test_thirds_sum_exactly() {
        let t = clauses(vec![vec!["1/3", "1/3", "1/3"]]);
        assert!(t.satisfy([0, 1, 2]));
        assert!(!t.satisfy([0, 2]));
    }

    #[test]
    fn test_satisfaction_is_monotonic() {
        let t = clauses(vec![vec!["1/2", "1/4", "1/4"], vec!["1/3", "2/3"]]);
        let n = t.size();
        for subset in 0u32..(1 << n) {
            let set: Vec<usize> = (0..n).filter(|i| subset & (1 << i) != 0).collect();
            if !t.satisfy(set.iter().copied()) {
                continue;
            }
            for extra in 0..n {
                let mut bigger = set.clone();
                bigger.push(extra);
                assert!(t.satisfy(bigger), "adding {extra} to {set:?} lost satisfaction");
            }
        }
    }

    #[test]
    fn test_malformed_thresholds_rejected_at_construction() {
        let bad: Vec<Sith> = vec![
            Sith::Clauses(vec![]),
            Sith::Clauses(vec![vec![]]),
            Sith::from(vec![vec!["1/3", "1/3"]]),
            Sith::from(vec![vec!["3/2"]]),
            Sith::from(vec![vec!["1/0", "1"]]),
            Sith::from(vec![vec!["half"]]),
            Sith::from("1/2"),
            Sith::from("zz"),
        ];
        for sith in bad {
            assert!(
                matches!(
                    Tholder::from_sith(&sith),
                    Err(SignifyError::Validation(ValidationError::MalformedThreshold(_)))
                ),
                "{sith:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_huge_denominators_rejected_not_wrapped() {
        let sith = Sith::from(vec![vec![
            "1/18446744073709551557",
            "1/18446744073709551533",
            "1/18446744073709551521",
            "1",
        ]]);
        assert!(matches!(
            Tholder::from_sith(&sith),
            Err(SignifyError::Validation(ValidationError::MalformedThreshold(_)))
        ));

        let t = clauses(vec![vec!["1/18446744073709551557", "1"]]);
        assert!(t.satisfy([1]));
        assert!(!t.satisfy([0]));
    }

    #[test]
    fn test_default_majority() {
        assert_eq!(Tholder::default_for(0), Tholder::Simple(1));
        assert_eq!(Tholder::default_for(1), Tholder::Simple(1));
        assert_eq!(Tholder::default_for(3), Tholder::Simple(2));
        assert_eq!(Tholder::default_for(4), Tholder::Simple(2));
    }

    #[test]
    fn test_canonical_sith_reduces_weights() {
        let t = clauses(vec![vec!["2/4", "2/4"], vec!["1/1"]]);
        assert_eq!(
            serde_json::to_string(&t.sith()).unwrap(),
            r#"[["1/2","1/2"],["1"]]"#
        );
    }
}
