//! Merge-reduce support for per-worker partial results (exception counts,
//! page/revision tallies) produced by the parallel driver (C8). Generalizes
//! the corpus's shard-build-then-merge idiom to in-memory reduction, since
//! driver workers already hold their partial results without needing to
//! round-trip them through JSONL shard files.

use rayon::prelude::*;

/// A partial result that knows how to absorb another instance of itself.
/// Implementors should be cheap to combine; `merge` is called pairwise in an
/// arbitrary, associative order during a parallel reduce.
pub trait Mergeable: Send + Default {
    fn merge(&mut self, other: Self);
}

/// Reduces every partial result into one, in parallel. Returns `A::default()`
/// for an empty input.
pub fn merge_all<A: Mergeable>(parts: Vec<A>) -> A {
    parts.into_par_iter().reduce(A::default, |mut acc, part| {
        acc.merge(part);
        acc
    })
}

/// Per-worker build statistics accumulated by the parallel driver: how many
/// pages/revisions were processed and which exceptions (by error-taxonomy
/// variant name) were raised and swallowed under a non-strict run.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct BuildStats {
    pub pages_processed: u64,
    pub revisions_processed: u64,
    pub exceptions: std::collections::BTreeMap<String, u64>,
}

impl BuildStats {
    pub fn record_exception(&mut self, kind: impl Into<String>) {
        *self.exceptions.entry(kind.into()).or_insert(0) += 1;
    }
}

impl Mergeable for BuildStats {
    fn merge(&mut self, other: Self) {
        self.pages_processed += other.pages_processed;
        self.revisions_processed += other.revisions_processed;
        for (k, v) in other.exceptions {
            *self.exceptions.entry(k).or_insert(0) += v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_counts_and_exceptions() {
        let mut a = BuildStats { pages_processed: 3, revisions_processed: 10, ..Default::default() };
        a.record_exception("dump_parse_error");
        let mut b = BuildStats { pages_processed: 2, revisions_processed: 5, ..Default::default() };
        b.record_exception("dump_parse_error");
        b.record_exception("rdf_conversion_error");

        let merged = merge_all(vec![a, b]);
        assert_eq!(merged.pages_processed, 5);
        assert_eq!(merged.revisions_processed, 15);
        assert_eq!(merged.exceptions.get("dump_parse_error"), Some(&2));
        assert_eq!(merged.exceptions.get("rdf_conversion_error"), Some(&1));
    }

    #[test]
    fn empty_input_yields_default() {
        let merged: BuildStats = merge_all(vec![]);
        assert_eq!(merged.pages_processed, 0);
    }
}
