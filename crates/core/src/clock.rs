//! Per-actor logical clock used to order writes between devices and the server.
//!
//! A `VectorClock` maps actor ids to counters. Missing entries read as 0 and
//! zero entries are never stored, so `{}` and `{"A": 0}` are the same clock.
//! `merge` is the pointwise max and forms a join-semilattice, which is what
//! lets document merges converge under retries and reordered delivery.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ClockError;

/// Actor id reserved for writes originating on the sync server.
pub const SERVER_ACTOR: &str = "server";

/// Largest counter a clock holds. Wire counters are signed, so anything
/// above this could not be read back.
pub const MAX_COUNTER: u64 = i64::MAX as u64;

/// Causal relationship between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalOrder {
    Before,
    After,
    Concurrent,
    Equal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from wire counters, rejecting negative counters and
    /// empty actor ids. This is the only way signed input becomes a clock.
    pub fn from_signed<'a, I>(counters: I) -> Result<Self, ClockError>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut clock = VectorClock::new();
        for (actor, counter) in counters {
            if actor.trim().is_empty() {
                return Err(ClockError::EmptyActor);
            }
            if counter < 0 {
                return Err(ClockError::NegativeCounter {
                    actor: actor.to_string(),
                    counter,
                });
            }
            clock.set(actor, counter as u64);
        }
        Ok(clock)
    }

    /// Counter for `actor`; 0 when absent.
    pub fn get(&self, actor: &str) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    fn set(&mut self, actor: &str, counter: u64) {
        if counter == 0 {
            self.entries.remove(actor);
        } else {
            self.entries.insert(actor.to_string(), counter);
        }
    }

    /// Advance `actor`'s own entry by one and return the new counter.
    /// Saturates at [`MAX_COUNTER`].
    pub fn increment(&mut self, actor: &str) -> u64 {
        let next = self.get(actor).saturating_add(1).min(MAX_COUNTER);
        self.set(actor, next);
        next
    }

    /// Pointwise max of both clocks.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.clone();
        merged.merge_in_place(other);
        merged
    }

    pub fn merge_in_place(&mut self, other: &VectorClock) {
        for (actor, &counter) in &other.entries {
            let entry = self.entries.entry(actor.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
    }

    /// Compare two clocks under the happened-before partial order.
    pub fn compare(&self, other: &VectorClock) -> CausalOrder {
        let mut less = false;
        let mut greater = false;

        for actor in self.entries.keys().chain(other.entries.keys()) {
            match self.get(actor).cmp(&other.get(actor)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return CausalOrder::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// True when every write `other` has seen is also seen by `self`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(a, c)| (a.as_str(), *c))
    }
}

impl<'de> Deserialize<'de> for VectorClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, i64> = BTreeMap::deserialize(deserializer)?;
        VectorClock::from_signed(raw.iter().map(|(a, c)| (a.as_str(), *c)))
            .map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (actor, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", actor, counter)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(pairs: &[(&str, i64)]) -> VectorClock {
        VectorClock::from_signed(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn increment_only_touches_own_entry() {
        let mut c = clock(&[("B", 4)]);
        assert_eq!(c.increment("A"), 1);
        assert_eq!(c.increment("A"), 2);
        assert_eq!(c.get("A"), 2);
        assert_eq!(c.get("B"), 4);
    }

    #[test]
    fn compare_covers_all_orders() {
        let a1 = clock(&[("A", 1)]);
        let a2 = clock(&[("A", 2)]);
        let b1 = clock(&[("B", 1)]);

        assert_eq!(a1.compare(&a1), CausalOrder::Equal);
        assert_eq!(a1.compare(&a2), CausalOrder::Before);
        assert_eq!(a2.compare(&a1), CausalOrder::After);
        assert_eq!(a1.compare(&b1), CausalOrder::Concurrent);
        assert_eq!(a1.merge(&b1).compare(&b1), CausalOrder::After);
    }

    #[test]
    fn zero_entries_are_equivalent_to_missing() {
        let explicit = clock(&[("A", 0), ("B", 1)]);
        let implicit = clock(&[("B", 1)]);
        assert_eq!(explicit, implicit);
        assert_eq!(explicit.compare(&implicit), CausalOrder::Equal);
    }

    #[test]
    fn merge_is_commutative_associative_idempotent() {
        let x = clock(&[("A", 3), ("B", 1)]);
        let y = clock(&[("B", 2), ("server", 7)]);
        let z = clock(&[("A", 1), ("C", 5)]);

        assert_eq!(x.merge(&y), y.merge(&x));
        assert_eq!(x.merge(&y).merge(&z), x.merge(&y.merge(&z)));
        assert_eq!(x.merge(&x), x);
    }

    #[test]
    fn negative_counter_is_rejected() {
        let err = VectorClock::from_signed([("A", -1)]).unwrap_err();
        assert_eq!(
            err,
            ClockError::NegativeCounter {
                actor: "A".to_string(),
                counter: -1
            }
        );
    }

    #[test]
    fn empty_actor_is_rejected() {
        assert_eq!(
            VectorClock::from_signed([(" ", 1)]).unwrap_err(),
            ClockError::EmptyActor
        );
    }

    #[test]
    fn deserialize_rejects_negative_counters() {
        let err = serde_json::from_str::<VectorClock>(r#"{"A": -3}"#).unwrap_err();
        assert!(err.to_string().contains("negative"));
        let ok: VectorClock = serde_json::from_str(r#"{"A": 2, "server": 0}"#).unwrap();
        assert_eq!(ok, clock(&[("A", 2)]));
    }

    #[test]
    fn saturated_counter_still_deserializes() {
        let mut c = clock(&[("A", i64::MAX)]);
        assert_eq!(c.increment("A"), MAX_COUNTER);

        let json = serde_json::to_string(&c).unwrap();
        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.get("A"), i64::MAX as u64);
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(clock(&[("B", 1), ("A", 2)]).to_string(), "{A:2, B:1}");
    }
}
