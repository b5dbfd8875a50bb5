//! Cross-community overlap graph.
//!
//! Turns per-community participant sets into weighted edges. Every unordered
//! pair of distinct communities is evaluated exactly once; the edge weight is
//! the exact size of the intersection of the two sets, and only strictly
//! positive weights are materialized.
//!
//! The edge is stored once, under the community that comes first in the
//! input order (the "from" side). [`EdgeGraph::weight`] answers lookups in
//! either direction.
//!
//! ```text
//!  A: {m1, m2}   B: {m2, m3}   C: {m4}
//!
//!  A ──1── B        (A, C) and (B, C) have no overlap: no edge
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::models::MembershipKind;

/// Edges of one membership kind over one community set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeGraph {
    pub kind: MembershipKind,
    /// `from -> (to -> weight)`. Every input community has an entry, possibly empty.
    pub edges: BTreeMap<String, BTreeMap<String, u32>>,
    /// Number of unordered pairs compared, `n·(n-1)/2`.
    pub pairs_evaluated: usize,
}

impl EdgeGraph {
    /// Overlap between two communities regardless of which side stores it.
    pub fn weight(&self, a: &str, b: &str) -> Option<u32> {
        self.edges
            .get(a)
            .and_then(|out| out.get(b))
            .or_else(|| self.edges.get(b).and_then(|out| out.get(a)))
            .copied()
    }

    /// Edges stored under `community` as the "from" side.
    pub fn outgoing(&self, community: &str) -> BTreeMap<String, u32> {
        self.edges.get(community).cloned().unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|out| out.len()).sum()
    }

    /// All materialized edges as `(from, to, weight)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u32)> {
        self.edges.iter().flat_map(|(from, out)| {
            out.iter()
                .map(move |(to, weight)| (from.as_str(), to.as_str(), *weight))
        })
    }
}

/// Build the overlap graph for one membership kind.
///
/// `membership` lists communities in processing order; that order only
/// decides which side of a pair is labeled "from", never which edges exist.
pub fn build_edges(kind: MembershipKind, membership: &[(String, BTreeSet<String>)]) -> EdgeGraph {
    let mut pairs_evaluated = 0;

    let edges = membership
        .iter()
        .enumerate()
        .map(|(i, (from, from_set))| {
            let outgoing: BTreeMap<String, u32> = membership[i + 1..]
                .iter()
                .filter_map(|(to, to_set)| {
                    pairs_evaluated += 1;
                    if to == from {
                        return None;
                    }
                    let weight = overlap(from_set, to_set);
                    (weight > 0).then(|| (to.clone(), weight))
                })
                .collect();
            (from.clone(), outgoing)
        })
        .collect();

    EdgeGraph {
        kind,
        edges,
        pairs_evaluated,
    }
}

/// Exact cardinality of `a ∩ b`.
fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> u32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|id| large.contains(*id)).count() as u32
}
