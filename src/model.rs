use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// An (subject, predicate, object) RDF fact, already prefix-substituted.
///
/// Equality and ordering are lexicographic on the three fields *unless* both
/// operands' objects carry the blank-node marker (`_:`), in which case only
/// subject and predicate participate: the serializer's blank-node identifiers
/// are not stable across re-serializations, so comparing them would make
/// otherwise-identical triples compare unequal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: impl Into<String>) -> Self {
        Self { subject: subject.into(), predicate: predicate.into(), object: object.into() }
    }

    fn is_blank(object: &str) -> bool {
        object.as_bytes().starts_with(b"_:")
    }

    fn both_blank(&self, other: &Triple) -> bool {
        Self::is_blank(&self.object) && Self::is_blank(&other.object)
    }

    /// Sort/equality key used by callers that need a total order but not
    /// blank-node-aware equality (e.g. stable `.sort()` of a member's triples).
    fn sort_key(&self) -> (&str, &str, &str) {
        (&self.subject, &self.predicate, &self.object)
    }
}

impl PartialEq for Triple {
    fn eq(&self, other: &Self) -> bool {
        if self.both_blank(other) {
            self.subject == other.subject && self.predicate == other.predicate
        } else {
            self.subject == other.subject && self.predicate == other.predicate && self.object == other.object
        }
    }
}
impl Eq for Triple {}

impl Hash for Triple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subject.hash(state);
        self.predicate.hash(state);
        if !Self::is_blank(&self.object) {
            self.object.hash(state);
        }
    }
}

impl PartialOrd for Triple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Triple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

pub(crate) fn serialize_offset_datetime<S: Serializer>(
    dt: &OffsetDateTime,
    s: S,
) -> Result<S::Ok, S::Error> {
    let formatted = dt.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    s.serialize_str(&formatted)
}

pub(crate) fn deserialize_offset_datetime<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<OffsetDateTime, D::Error> {
    let s = String::deserialize(d)?;
    OffsetDateTime::parse(&s, &Rfc3339).map_err(serde::de::Error::custom)
}

/// Metadata common to every revision: entity identity plus per-revision fields
/// read off the dump's `<revision>` element. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionMetadata {
    pub entity_id: String,
    pub page_id: i64,
    pub namespace: i32,
    pub redirect: Option<String>,
    pub revision_id: i64,
    pub parent_revision_id: Option<i64>,
    #[serde(
        serialize_with = "serialize_offset_datetime",
        deserialize_with = "deserialize_offset_datetime"
    )]
    pub timestamp: OffsetDateTime,
    pub contributor: Option<String>,
    pub contributor_id: Option<i64>,
    pub is_minor: bool,
    pub comment: Option<String>,
    pub wikibase_model: String,
    pub wikibase_format: String,
    pub sha1: Option<String>,
}

/// One raw `<revision>` as scanned off the dump, metadata plus the unparsed
/// JSON text body. `text` is `None` for a self-closed `<text/>` element.
#[derive(Debug, Clone)]
pub struct RawRevision {
    pub meta: RevisionMetadata,
    pub text: Option<String>,
}

/// A revision expressed as the triple-level diff against the entity's previous
/// revision. This is the unit written to entity-streams/sorted-entity-streams/
/// global-stream archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikidatedRevision {
    #[serde(flatten)]
    pub meta: RevisionMetadata,
    pub triple_deletions: Vec<Triple>,
    pub triple_additions: Vec<Triple>,
    pub triple_deletions_sample: Vec<f64>,
    pub triple_additions_sample: Vec<f64>,
}

/// Deterministic hash-derived fingerprint of the first triple of a sequence,
/// used to populate `triple_*_sample` without depending on the full vector.
/// Not archived authoritatively anywhere else; purely a cheap comparison aid.
pub fn sample_of(triples: &[Triple]) -> Vec<f64> {
    match triples.first() {
        None => Vec::new(),
        Some(t) => {
            let mut h = ahash::AHasher::default();
            t.subject.hash(&mut h);
            t.predicate.hash(&mut h);
            if !t.object.starts_with("_:") {
                t.object.hash(&mut h);
            }
            let bits = h.finish();
            vec![(bits >> 11) as f64 / (1u64 << 53) as f64]
        }
    }
}

impl WikidatedRevision {
    pub fn from_diff(
        meta: RevisionMetadata,
        mut triple_deletions: Vec<Triple>,
        mut triple_additions: Vec<Triple>,
    ) -> Self {
        triple_deletions.sort();
        triple_additions.sort();
        let triple_deletions_sample = sample_of(&triple_deletions);
        let triple_additions_sample = sample_of(&triple_additions);
        Self { meta, triple_deletions, triple_additions, triple_deletions_sample, triple_additions_sample }
    }
}

/// Lightweight id+timestamp pair, used only inside aggregated views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikidataRevisionMeta {
    pub revision_id: i64,
    #[serde(
        serialize_with = "serialize_offset_datetime",
        deserialize_with = "deserialize_offset_datetime"
    )]
    pub timestamp: OffsetDateTime,
}

/// Net change across a contiguous run of a page's revisions. In-memory only
/// convenience produced by `Dataset::aggregate_revisions`; never archived.
#[derive(Debug, Clone)]
pub struct WikidatedAggregatedRevision {
    pub meta: RevisionMetadata,
    pub triple_deletions: Vec<Triple>,
    pub triple_additions: Vec<Triple>,
    pub revisions: Vec<WikidataRevisionMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn blank_node_equality_ignores_identifier() {
        let a = Triple::new("wd:Q1", "wdt:P31", "_:b0");
        let b = Triple::new("wd:Q1", "wdt:P31", "_:b7");
        assert_eq!(a, b);
        let c = Triple::new("wd:Q1", "wdt:P32", "_:b7");
        assert_ne!(a, c);
    }

    #[test]
    fn non_blank_requires_full_match() {
        let a = Triple::new("wd:Q1", "wdt:P31", "wd:Q5");
        let b = Triple::new("wd:Q1", "wdt:P31", "wd:Q6");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trip_preserves_field_order() {
        let meta = RevisionMetadata {
            entity_id: "Q1".into(),
            page_id: 1,
            namespace: 0,
            redirect: None,
            revision_id: 101,
            parent_revision_id: None,
            timestamp: datetime!(2021-06-01 00:00:00 UTC),
            contributor: Some("alice".into()),
            contributor_id: Some(7),
            is_minor: false,
            comment: None,
            wikibase_model: "wikibase-item".into(),
            wikibase_format: "application/json".into(),
            sha1: None,
        };
        let rev = WikidatedRevision::from_diff(
            meta,
            vec![],
            vec![Triple::new("wd:Q1", "wdt:P1", "\"x\"")],
        );
        let encoded = serde_json::to_string(&rev).unwrap();
        let decoded: WikidatedRevision = serde_json::from_str(&encoded).unwrap();
        let re_encoded = serde_json::to_string(&decoded).unwrap();
        assert_eq!(encoded, re_encoded);
    }
}
