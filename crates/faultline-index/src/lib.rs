//! Distributed execution index — structural identity of an RPC call site.
//!
//! An [`ExecutionIndex`] identifies one outbound RPC by its position in the
//! call graph: an ordered sequence of call-site fragments, one per level of
//! nesting.  Two calls made from the same call-graph position in two
//! different executions of the same test produce *equal* indexes, which is
//! what lets fault-injection state transfer between runs despite process
//! restarts.
//!
//! The index is a pure value type with no shared mutable state.  The
//! interception layer pushes one fragment per outbound call as calls nest
//! and pops on return.  Callers are responsible for chain isolation:
//! fragments from independent concurrent call chains must never be
//! interleaved into a single index (typically enforced with request-scoped
//! storage on the interception side).
//!
//! Serialization is canonical: `deserialize(serialize(x)) == x` for every
//! index, and the serialized string doubles as a stable mapping key.

use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from execution index parsing.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("malformed execution index: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One call-site identity fragment.
///
/// A fragment captures where a call originated (`service`), the precise
/// call site (`location`), what was called (`signature`), and an
/// `occurrence` counter disambiguating repeated calls from the same site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteFragment {
    /// Name of the calling service.
    pub service: String,
    /// Source location of the call site (file, line, or equivalent).
    pub location: String,
    /// Signature of the invoked method.
    pub signature: String,
    /// How many times this call site has fired within the current chain.
    pub occurrence: u32,
}

impl CallSiteFragment {
    /// Create a new fragment.
    pub fn new(
        service: impl Into<String>,
        location: impl Into<String>,
        signature: impl Into<String>,
        occurrence: u32,
    ) -> Self {
        Self {
            service: service.into(),
            location: location.into(),
            signature: signature.into(),
            occurrence,
        }
    }
}

// Fragments serialize as compact 4-tuples so the canonical index string
// stays short enough to use as a mapping key.
impl Serialize for CallSiteFragment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            &self.service,
            &self.location,
            &self.signature,
            self.occurrence,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallSiteFragment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (service, location, signature, occurrence) =
            <(String, String, String, u32)>::deserialize(deserializer)
                .map_err(D::Error::custom)?;
        Ok(Self {
            service,
            location,
            signature,
            occurrence,
        })
    }
}

/// Ordered sequence of call-site fragments identifying one RPC call.
///
/// Equality is structural (sequence equality of fragments), never reference
/// identity.  Push/pop must follow call-stack discipline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExecutionIndex {
    fragments: Vec<CallSiteFragment>,
}

impl ExecutionIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a fragment as a call begins.
    pub fn push(&mut self, fragment: CallSiteFragment) {
        self.fragments.push(fragment);
    }

    /// Pop the innermost fragment as a call returns.
    pub fn pop(&mut self) -> Option<CallSiteFragment> {
        self.fragments.pop()
    }

    /// Current call nesting depth.
    pub fn depth(&self) -> usize {
        self.fragments.len()
    }

    /// Whether any fragments have been pushed.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The fragments, outermost first.
    pub fn fragments(&self) -> &[CallSiteFragment] {
        &self.fragments
    }

    /// Canonical string form, usable as a mapping key.
    pub fn serialize(&self) -> String {
        // Encoding a vector of strings and integers cannot fail.
        serde_json::to_string(&self.fragments).expect("fragment encoding is infallible")
    }

    /// Parse an index back from its canonical string form.
    pub fn deserialize(serialized: &str) -> Result<Self, IndexError> {
        let fragments = serde_json::from_str(serialized)?;
        Ok(Self { fragments })
    }
}

impl fmt::Display for ExecutionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_index() -> ExecutionIndex {
        let mut index = ExecutionIndex::new();
        index.push(CallSiteFragment::new("test", "harness.rs:14", "Api::checkout", 0));
        index.push(CallSiteFragment::new("api", "api.rs:88", "Cart::get", 1));
        index
    }

    #[test]
    fn push_pop_follow_stack_discipline() {
        let mut index = sample_index();
        assert_eq!(index.depth(), 2);

        let inner = index.pop().unwrap();
        assert_eq!(inner.service, "api");
        assert_eq!(inner.occurrence, 1);
        assert_eq!(index.depth(), 1);

        index.pop();
        assert!(index.is_empty());
        assert!(index.pop().is_none());
    }

    #[test]
    fn serialization_round_trips() {
        let index = sample_index();
        let serialized = index.serialize();
        let restored = ExecutionIndex::deserialize(&serialized).unwrap();
        assert_eq!(index, restored);
        assert_eq!(serialized, restored.serialize());
    }

    #[test]
    fn empty_index_round_trips() {
        let index = ExecutionIndex::new();
        let restored = ExecutionIndex::deserialize(&index.serialize()).unwrap();
        assert_eq!(index, restored);
    }

    #[test]
    fn display_matches_serialize() {
        let index = sample_index();
        assert_eq!(index.to_string(), index.serialize());
    }

    #[test]
    fn equality_is_structural() {
        let a = sample_index();
        let b = sample_index();
        assert_eq!(a, b);

        let mut c = sample_index();
        c.push(CallSiteFragment::new("cart", "cart.rs:3", "Db::read", 0));
        assert_ne!(a, c);
    }

    #[test]
    fn occurrence_counter_disambiguates() {
        let mut a = ExecutionIndex::new();
        a.push(CallSiteFragment::new("svc", "svc.rs:1", "get", 0));

        let mut b = ExecutionIndex::new();
        b.push(CallSiteFragment::new("svc", "svc.rs:1", "get", 1));

        assert_ne!(a, b);
    }

    #[test]
    fn usable_as_map_key() {
        let mut map = HashMap::new();
        map.insert(sample_index(), "fault");
        assert_eq!(map.get(&sample_index()), Some(&"fault"));
    }

    #[test]
    fn deserialize_rejects_garbage() {
        assert!(ExecutionIndex::deserialize("not json").is_err());
        assert!(ExecutionIndex::deserialize("{\"service\": 1}").is_err());
    }

    #[test]
    fn serialized_form_is_compact_tuples() {
        let mut index = ExecutionIndex::new();
        index.push(CallSiteFragment::new("svc", "f.rs:1", "get", 2));
        assert_eq!(index.serialize(), r#"[["svc","f.rs:1","get",2]]"#);
    }
}
