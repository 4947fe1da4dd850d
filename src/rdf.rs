//! RDF converter (C4): turns one raw revision's JSON body into a canonical,
//! prefix-substituted set of triples.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::json_utils::{extract_redirect_target, is_redirect_body};
use crate::model::{RawRevision, Triple};

/// The three error classes a conversion can fail with. Per-revision: the
/// caller (C5) logs and skips, it never aborts the shard.
#[derive(Debug, Clone)]
pub enum RdfConversionError {
    NoText,
    UnsupportedModel(String),
    SerializerFailure(String),
}

impl fmt::Display for RdfConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdfConversionError::NoText => write!(f, "revision has no text body"),
            RdfConversionError::UnsupportedModel(m) => write!(f, "unsupported content model: {m}"),
            RdfConversionError::SerializerFailure(e) => write!(f, "rdf serializer failed: {e}"),
        }
    }
}

impl std::error::Error for RdfConversionError {}

/// Error surfaced by an `RdfSerializer` implementation.
#[derive(Debug, Clone)]
pub struct SerializerError(pub String);

impl fmt::Display for SerializerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SerializerError {}

/// The namespace table extracted from a dump shard's `<siteinfo>` header,
/// shared read-only by every worker's serializer instance.
#[derive(Debug, Clone, Default)]
pub struct SitesTable {
    pub namespaces: HashMap<i32, String>,
}

impl From<&crate::dump_parser::SiteInfo> for SitesTable {
    fn from(info: &crate::dump_parser::SiteInfo) -> Self {
        Self { namespaces: info.namespaces.clone() }
    }
}

/// Property id → datatype, accumulated as properties are observed. Shared
/// read-only once built; never mutated mid-conversion.
#[derive(Debug, Clone, Default)]
pub struct PropertyRegister {
    pub datatypes: HashMap<String, String>,
}

impl PropertyRegister {
    pub fn record(&mut self, property_id: impl Into<String>, datatype: impl Into<String>) {
        self.datatypes.insert(property_id.into(), datatype.into());
    }
    pub fn datatype_of(&self, property_id: &str) -> Option<&str> {
        self.datatypes.get(property_id).map(String::as_str)
    }
}

/// Serializes one revision's JSON body into raw N-triples text. Thread-unsafe
/// by contract (one instance per worker); constructed once in the worker's
/// init hook and reused for the worker's lifetime.
pub trait RdfSerializer {
    fn serialize(
        &mut self,
        body: &str,
        sites: &SitesTable,
        properties: &PropertyRegister,
    ) -> Result<String, SerializerError>;
}

const SUPPORTED_MODELS: &[&str] = &["wikibase-item", "wikibase-property"];

/// Converts one raw revision. Redirect documents are handled directly
/// without invoking the serializer; everything else is delegated.
pub fn convert_revision(
    raw: &RawRevision,
    serializer: &mut dyn RdfSerializer,
    sites: &SitesTable,
    properties: &PropertyRegister,
) -> Result<Vec<Triple>, RdfConversionError> {
    let body = raw.text.as_deref().ok_or(RdfConversionError::NoText)?;

    if is_redirect_body(body) {
        let target = extract_redirect_target(body)
            .ok_or_else(|| RdfConversionError::SerializerFailure("redirect body missing target".into()))?;
        return Ok(vec![Triple {
            subject: format!("wd:{}", raw.meta.entity_id),
            predicate: "owl:sameAs".to_string(),
            object: format!("wd:{target}"),
        }]);
    }

    if !SUPPORTED_MODELS.contains(&raw.meta.wikibase_model.as_str()) {
        return Err(RdfConversionError::UnsupportedModel(raw.meta.wikibase_model.clone()));
    }

    let ntriples = serializer
        .serialize(body, sites, properties)
        .map_err(|e| RdfConversionError::SerializerFailure(e.0))?;

    Ok(parse_and_prefix(&ntriples))
}

/// Splits raw N-triples text on the literal delimiter ` .\n` and applies
/// prefix substitution to each statement's subject/predicate/object. See the
/// design note on this delimiter's one known edge case (a literal containing
/// the exact substring ` .\n`).
pub fn parse_and_prefix(ntriples: &str) -> Vec<Triple> {
    let table = prefix_table();
    ntriples
        .split(" .\n")
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, ' ');
            let subject = parts.next()?;
            let predicate = parts.next()?;
            let object = parts.next()?;
            Some(Triple {
                subject: table.apply(subject),
                predicate: table.apply(predicate),
                object: table.apply(object),
            })
        })
        .collect()
}

/// A fixed table of well-known Wikidata/W3C prefixes, keyed by full IRI, with
/// longest-match lookup for substitution and exact reverse lookup for
/// property 9 ("prefix then unprefix recovers the original IRI").
pub struct PrefixTable {
    entries: Vec<(&'static str, &'static str)>,
}

impl PrefixTable {
    fn new(mut entries: Vec<(&'static str, &'static str)>) -> Self {
        // Longest IRI first so the longest matching prefix wins.
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    /// Replaces a bracketed IRI with `prefix:suffix` if a known prefix
    /// matches; leaves blank nodes, literals, and unmatched IRIs untouched.
    pub fn apply(&self, token: &str) -> String {
        if !(token.starts_with('<') && token.ends_with('>')) {
            return token.to_string();
        }
        let iri = &token[1..token.len() - 1];
        for (url, prefix) in &self.entries {
            if let Some(suffix) = iri.strip_prefix(*url) {
                return format!("{prefix}{suffix}");
            }
        }
        token.to_string()
    }

    /// Reverses `apply`: given a `prefix:suffix` token, reconstructs the
    /// original bracketed IRI. Returns the token unchanged if no known prefix
    /// matches (it was never substituted).
    pub fn unapply(&self, token: &str) -> String {
        for (url, prefix) in &self.entries {
            if let Some(suffix) = token.strip_prefix(*prefix) {
                return format!("<{url}{suffix}>");
            }
        }
        token.to_string()
    }
}

pub fn prefix_table() -> &'static PrefixTable {
    static TABLE: OnceLock<PrefixTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        PrefixTable::new(vec![
            ("http://creativecommons.org/ns#", "cc:"),
            ("http://purl.org/dc/terms/", "dct:"),
            ("http://schema.org/", "schema:"),
            ("http://wikiba.se/ontology#", "wikibase:"),
            ("http://www.bigdata.com/queryHints#", "hint:"),
            ("http://www.bigdata.com/rdf#", "bd:"),
            ("http://www.opengis.net/ont/geosparql#", "geo:"),
            ("http://www.w3.org/1999/02/22-rdf-syntax-ns#", "rdf:"),
            ("http://www.w3.org/2000/01/rdf-schema#", "rdfs:"),
            ("http://www.w3.org/2001/XMLSchema#", "xsd:"),
            ("http://www.w3.org/2002/07/owl#", "owl:"),
            ("http://www.w3.org/2004/02/skos/core#", "skos:"),
            ("http://www.w3.org/ns/lemon/ontolex#", "ontolex:"),
            ("http://www.w3.org/ns/prov#", "prov:"),
            ("http://www.wikidata.org/entity/", "wd:"),
            ("http://www.wikidata.org/entity/statement/", "wds:"),
            ("http://www.wikidata.org/prop/", "p:"),
            ("http://www.wikidata.org/prop/direct-normalized/", "wdtn:"),
            ("http://www.wikidata.org/prop/direct/", "wdt:"),
            ("http://www.wikidata.org/prop/novalue/", "wdno:"),
            ("http://www.wikidata.org/prop/qualifier/", "pq:"),
            ("http://www.wikidata.org/prop/qualifier/value-normalized/", "pqn:"),
            ("http://www.wikidata.org/prop/qualifier/value/", "pqv:"),
            ("http://www.wikidata.org/prop/reference/", "pr:"),
            ("http://www.wikidata.org/prop/reference/value-normalized/", "prn:"),
            ("http://www.wikidata.org/prop/reference/value/", "prv:"),
            ("http://www.wikidata.org/prop/statement/", "ps:"),
            ("http://www.wikidata.org/prop/statement/value-normalized/", "psn:"),
            ("http://www.wikidata.org/prop/statement/value/", "psv:"),
            ("http://www.wikidata.org/reference/", "wdref:"),
            ("http://www.wikidata.org/value/", "wdv:"),
            ("http://www.wikidata.org/wiki/Special:EntityData/", "wdata:"),
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RevisionMetadata;
    use time::macros::datetime;

    fn meta(model: &str) -> RevisionMetadata {
        RevisionMetadata {
            entity_id: "Q1".into(),
            page_id: 1,
            namespace: 0,
            redirect: None,
            revision_id: 101,
            parent_revision_id: None,
            timestamp: datetime!(2021-06-01 00:00:00 UTC),
            contributor: None,
            contributor_id: None,
            is_minor: false,
            comment: None,
            wikibase_model: model.to_string(),
            wikibase_format: "application/json".into(),
            sha1: None,
        }
    }

    struct StubSerializer(&'static str);
    impl RdfSerializer for StubSerializer {
        fn serialize(&mut self, _body: &str, _sites: &SitesTable, _properties: &PropertyRegister) -> Result<String, SerializerError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn no_text_is_skipped_with_typed_error() {
        let raw = RawRevision { meta: meta("wikibase-item"), text: None };
        let mut s = StubSerializer("");
        let err = convert_revision(&raw, &mut s, &SitesTable::default(), &PropertyRegister::default()).unwrap_err();
        assert!(matches!(err, RdfConversionError::NoText));
    }

    #[test]
    fn unsupported_model_is_rejected() {
        let raw = RawRevision { meta: meta("wikitext"), text: Some("hello".into()) };
        let mut s = StubSerializer("");
        let err = convert_revision(&raw, &mut s, &SitesTable::default(), &PropertyRegister::default()).unwrap_err();
        assert!(matches!(err, RdfConversionError::UnsupportedModel(m) if m == "wikitext"));
    }

    #[test]
    fn redirect_body_yields_same_as_triple() {
        let raw = RawRevision { meta: meta("wikibase-item"), text: Some(r#"{"redirect":{"target":"Q2"}}"#.into()) };
        let mut s = StubSerializer("");
        let triples = convert_revision(&raw, &mut s, &SitesTable::default(), &PropertyRegister::default()).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].subject, "wd:Q1");
        assert_eq!(triples[0].predicate, "owl:sameAs");
        assert_eq!(triples[0].object, "wd:Q2");
    }

    #[test]
    fn splits_and_prefixes_ntriples() {
        let body = "<http://www.wikidata.org/entity/Q1> <http://www.wikidata.org/prop/direct/P1> \"x\" .\n\
                    <http://www.wikidata.org/entity/Q1> <http://www.wikidata.org/prop/direct/P2> \"y\" .\n";
        let raw = RawRevision { meta: meta("wikibase-item"), text: Some("{}".into()) };
        let mut s = StubSerializer(body);
        let triples = convert_revision(&raw, &mut s, &SitesTable::default(), &PropertyRegister::default()).unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0].subject, "wd:Q1");
        assert_eq!(triples[0].predicate, "wdt:P1");
        assert_eq!(triples[0].object, "\"x\"");
    }

    #[test]
    fn prefix_roundtrip_recovers_iri() {
        let table = prefix_table();
        let original = "<http://www.wikidata.org/entity/Q42>";
        let prefixed = table.apply(original);
        assert_eq!(prefixed, "wd:Q42");
        assert_eq!(table.unapply(&prefixed), original);
    }

    #[test]
    fn unmatched_iri_is_left_bracketed() {
        let table = prefix_table();
        let original = "<http://example.com/unmapped>";
        assert_eq!(table.apply(original), original);
    }
}
