//! Bound-filter semantics for the dataset facade (C9): `min_*`/`max_*` are all
//! inclusive, and a revision is emitted iff every provided bound holds.

use time::OffsetDateTime;

use crate::model::WikidatedRevision;

/// Revision-id and timestamp bounds shared by every iteration mode. Page-id
/// bounds are handled separately by the routing policy in `dataset`, since
/// they pick *which files* to open rather than filtering revisions within one.
#[derive(Debug, Clone, Default)]
pub struct RevisionBounds {
    pub min_revision_id: Option<i64>,
    pub max_revision_id: Option<i64>,
    pub min_timestamp: Option<OffsetDateTime>,
    pub max_timestamp: Option<OffsetDateTime>,
}

impl RevisionBounds {
    pub fn is_unbounded(&self) -> bool {
        self.min_revision_id.is_none()
            && self.max_revision_id.is_none()
            && self.min_timestamp.is_none()
            && self.max_timestamp.is_none()
    }

    /// True iff `revision` satisfies every bound that is `Some`. Timestamps
    /// are compared in UTC regardless of the offset the revision or the bound
    /// carry, per the "specify UTC uniformly" decision in the design notes.
    pub fn matches(&self, revision: &WikidatedRevision) -> bool {
        let rid = revision.meta.revision_id;
        if let Some(min) = self.min_revision_id {
            if rid < min {
                return false;
            }
        }
        if let Some(max) = self.max_revision_id {
            if rid > max {
                return false;
            }
        }
        let ts = revision.meta.timestamp.to_offset(time::UtcOffset::UTC);
        if let Some(min) = self.min_timestamp {
            if ts < min.to_offset(time::UtcOffset::UTC) {
                return false;
            }
        }
        if let Some(max) = self.max_timestamp {
            if ts > max.to_offset(time::UtcOffset::UTC) {
                return false;
            }
        }
        true
    }

    /// For page-scoped iteration only: revisions within one page are
    /// monotonically increasing in revision-id, so once we're strictly past
    /// `max_revision_id` every subsequent revision is also past it and the
    /// member can stop being read (testable property E5).
    pub fn past_upper_revision_bound(&self, revision: &WikidatedRevision) -> bool {
        matches!(self.max_revision_id, Some(max) if revision.meta.revision_id > max)
    }
}

/// Overlap test for "does `[lo, hi]` intersect the half-open range `r`?",
/// used to decide which entity-streams/global-stream files a range-scoped
/// query must open.
pub fn bounds_overlap_range(min: Option<i64>, max: Option<i64>, r: &std::ops::Range<i64>) -> bool {
    let lo = min.unwrap_or(i64::MIN);
    let hi = max.unwrap_or(i64::MAX);
    lo <= r.end - 1 && r.start <= hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RevisionMetadata;
    use time::macros::datetime;

    fn rev(revision_id: i64, ts: OffsetDateTime) -> WikidatedRevision {
        let meta = RevisionMetadata {
            entity_id: "Q1".into(),
            page_id: 1,
            namespace: 0,
            redirect: None,
            revision_id,
            parent_revision_id: None,
            timestamp: ts,
            contributor: None,
            contributor_id: None,
            is_minor: false,
            comment: None,
            wikibase_model: "wikibase-item".into(),
            wikibase_format: "application/json".into(),
            sha1: None,
        };
        WikidatedRevision::from_diff(meta, vec![], vec![])
    }

    #[test]
    fn inclusive_revision_bounds() {
        let bounds = RevisionBounds { min_revision_id: Some(200), max_revision_id: Some(300), ..Default::default() };
        assert!(bounds.matches(&rev(200, datetime!(2021-06-01 00:00:00 UTC))));
        assert!(bounds.matches(&rev(300, datetime!(2021-06-01 00:00:00 UTC))));
        assert!(!bounds.matches(&rev(199, datetime!(2021-06-01 00:00:00 UTC))));
        assert!(!bounds.matches(&rev(301, datetime!(2021-06-01 00:00:00 UTC))));
    }

    #[test]
    fn past_upper_bound_stops_page_scan() {
        let bounds = RevisionBounds { max_revision_id: Some(300), ..Default::default() };
        assert!(!bounds.past_upper_revision_bound(&rev(300, datetime!(2021-06-01 00:00:00 UTC))));
        assert!(bounds.past_upper_revision_bound(&rev(301, datetime!(2021-06-01 00:00:00 UTC))));
    }

    #[test]
    fn range_overlap() {
        assert!(bounds_overlap_range(Some(5), Some(15), &(10..20)));
        assert!(!bounds_overlap_range(Some(5), Some(9), &(10..20)));
        assert!(bounds_overlap_range(None, None, &(10..20)));
    }
}
