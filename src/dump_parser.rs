//! Dump parser (C3): line-oriented scan of a `pages-meta-history` shard.
//!
//! Not a general XML parser. Assumes every element's opening and closing tag
//! sits on its own line and that element order is fixed by the MediaWiki
//! export, exactly as the source this was ported from does.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Lines};

use anyhow::{anyhow, bail, Context, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::archive::{SevenZipArchive, SevenZipReader};
use crate::model::{RawRevision, RevisionMetadata};
use crate::paths::DumpShardFile;

/// One-shot header scan product: the dump's site name/namespace table.
#[derive(Debug, Clone, Default)]
pub struct SiteInfo {
    pub site_name: String,
    pub db_name: String,
    pub base: String,
    pub generator: String,
    pub case: String,
    pub namespaces: HashMap<i32, String>,
}

/// A line cursor with one-line pushback, mirroring the `chain((line,), lines)`
/// lookahead idiom the reference parser uses throughout.
struct LineCursor {
    lines: Lines<SevenZipReader>,
    pushback: Option<String>,
}

impl LineCursor {
    fn new(reader: SevenZipReader) -> Self {
        Self { lines: reader.lines(), pushback: None }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pushback.take() {
            return Ok(Some(line));
        }
        match self.lines.next() {
            Some(line) => Ok(Some(line.context("reading dump stream")?)),
            None => Ok(None),
        }
    }

    fn next_line_required(&mut self) -> Result<String> {
        self.next_line()?.ok_or_else(|| anyhow!("unexpected end of dump stream"))
    }

    fn push_back(&mut self, line: String) {
        self.pushback = Some(line);
    }
}

fn is_opening_tag(line: &str, element: &str) -> bool {
    line.trim_start().starts_with(&format!("<{element}"))
}

fn assert_opening_tag(line: &str, element: &str) -> Result<()> {
    if !is_opening_tag(line, element) {
        bail!("expected <{element}>, instead line was: '{line}'");
    }
    Ok(())
}

fn is_closing_tag(line: &str, element: &str) -> bool {
    line.trim_end().ends_with(&format!("</{element}>"))
}

fn assert_closing_tag(line: &str, element: &str) -> Result<()> {
    if !is_closing_tag(line, element) {
        bail!("expected </{element}>, instead line was: '{line}'");
    }
    Ok(())
}

fn extract_value(line: &str, element: &str) -> Result<String> {
    assert_opening_tag(line, element)?;
    assert_closing_tag(line, element)?;
    let start = line.find('>').ok_or_else(|| anyhow!("malformed tag: '{line}'"))? + 1;
    let end = line.rfind("</").ok_or_else(|| anyhow!("malformed tag: '{line}'"))?;
    Ok(line[start..end].to_string())
}

/// Reads a possibly-multi-line element value. `None` for a self-closed
/// element (e.g. `<text bytes="0" />`).
fn extract_value_multiline(cur: &mut LineCursor, element: &str) -> Result<Option<String>> {
    let line = cur.next_line_required()?;
    assert_opening_tag(&line, element)?;
    let closing_tag = format!("</{element}>");
    let stripped = line.trim_end();

    if stripped.ends_with("/>") {
        return Ok(None);
    }
    if stripped.ends_with(closing_tag.as_str()) {
        return Ok(Some(extract_value(&line, element)?));
    }

    let start = line.find('>').ok_or_else(|| anyhow!("malformed tag: '{line}'"))? + 1;
    let mut value = vec![line[start..].to_string()];
    loop {
        let line = cur.next_line_required()?;
        if is_closing_tag(&line, element) {
            let end = line.rfind("</").ok_or_else(|| anyhow!("malformed tag: '{line}'"))?;
            value.push(line[..end].to_string());
            break;
        }
        value.push(line);
    }
    Ok(Some(value.join("")))
}

/// Unescapes XML entities in element text, matching the reference parser's
/// custom-entity unescape (lt/gt/quot, then `&amp;` last so an `&amp;lt;`
/// sequence doesn't get double-unescaped into `<`).
fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("parsing timestamp '{s}'"))
}

struct RevisionFields {
    revision_id: i64,
    parent_revision_id: Option<i64>,
    timestamp: OffsetDateTime,
    contributor: Option<String>,
    contributor_id: Option<i64>,
    is_minor: bool,
    comment: Option<String>,
    wikibase_model: String,
    wikibase_format: String,
    sha1: Option<String>,
    text: Option<String>,
}

fn process_revision(cur: &mut LineCursor) -> Result<RevisionFields> {
    assert_opening_tag(&cur.next_line_required()?, "revision")?;
    let revision_id: i64 = extract_value(&cur.next_line_required()?, "id")?.parse()?;

    let mut parent_revision_id = None;
    let line = cur.next_line_required()?;
    if is_opening_tag(&line, "parentid") {
        parent_revision_id = Some(extract_value(&line, "parentid")?.parse()?);
    } else {
        cur.push_back(line);
    }

    let timestamp = parse_timestamp(&extract_value(&cur.next_line_required()?, "timestamp")?)?;

    let mut contributor = None;
    let mut contributor_id = None;
    let line = cur.next_line_required()?;
    assert_opening_tag(&line, "contributor")?;
    if !line.contains(r#"deleted="deleted""#) {
        let line = cur.next_line_required()?;
        if is_opening_tag(&line, "ip") {
            contributor = Some(extract_value(&line, "ip")?);
        } else {
            contributor = Some(extract_value(&line, "username")?);
            contributor_id = Some(extract_value(&cur.next_line_required()?, "id")?.parse()?);
        }
        assert_closing_tag(&cur.next_line_required()?, "contributor")?;
    }

    let mut is_minor = false;
    let line = cur.next_line_required()?;
    if is_opening_tag(&line, "minor") {
        is_minor = true;
    } else {
        cur.push_back(line);
    }

    let mut comment = None;
    let line = cur.next_line_required()?;
    if is_opening_tag(&line, "comment") {
        if !line.contains(r#"deleted="deleted""#) {
            cur.push_back(line);
            comment = extract_value_multiline(cur, "comment")?.map(|c| unescape_xml(&c));
        }
    } else {
        cur.push_back(line);
    }

    let wikibase_model = extract_value(&cur.next_line_required()?, "model")?;
    let wikibase_format = extract_value(&cur.next_line_required()?, "format")?;

    let text = extract_value_multiline(cur, "text")?.map(|t| unescape_xml(&t));

    let mut sha1 = None;
    let line = cur.next_line_required()?;
    assert_opening_tag(&line, "sha1")?;
    if !line.trim_end().ends_with("/>") {
        sha1 = Some(extract_value(&line, "sha1")?);
    }

    assert_closing_tag(&cur.next_line_required()?, "revision")?;

    Ok(RevisionFields {
        revision_id,
        parent_revision_id,
        timestamp,
        contributor,
        contributor_id,
        is_minor,
        comment,
        wikibase_model,
        wikibase_format,
        sha1,
        text,
    })
}

fn process_page(cur: &mut LineCursor) -> Result<Vec<RawRevision>> {
    assert_opening_tag(&cur.next_line_required()?, "page")?;
    let entity_id = unescape_xml(&extract_value(&cur.next_line_required()?, "title")?);
    let namespace: i32 = extract_value(&cur.next_line_required()?, "ns")?.parse()?;
    let page_id: i64 = extract_value(&cur.next_line_required()?, "id")?.parse()?;

    let mut redirect = None;
    let line = cur.next_line_required()?;
    if is_opening_tag(&line, "redirect") {
        let key = r#"title=""#;
        let start = line.find(key).ok_or_else(|| anyhow!("malformed redirect tag: '{line}'"))? + key.len();
        let end = line[start..].find('"').ok_or_else(|| anyhow!("malformed redirect tag: '{line}'"))? + start;
        redirect = Some(line[start..end].to_string());
    } else {
        cur.push_back(line);
    }

    let mut revisions = Vec::new();
    loop {
        let line = cur.next_line_required()?;
        if is_closing_tag(&line, "page") {
            break;
        }
        cur.push_back(line);
        let fields = process_revision(cur)?;
        revisions.push(RawRevision {
            meta: RevisionMetadata {
                entity_id: entity_id.clone(),
                page_id,
                namespace,
                redirect: redirect.clone(),
                revision_id: fields.revision_id,
                parent_revision_id: fields.parent_revision_id,
                timestamp: fields.timestamp,
                contributor: fields.contributor,
                contributor_id: fields.contributor_id,
                is_minor: fields.is_minor,
                comment: fields.comment,
                wikibase_model: fields.wikibase_model,
                wikibase_format: fields.wikibase_format,
                sha1: fields.sha1,
            },
            text: fields.text,
        });
    }
    Ok(revisions)
}

fn process_site_info(cur: &mut LineCursor) -> Result<SiteInfo> {
    assert_opening_tag(&cur.next_line_required()?, "siteinfo")?;
    let site_name = extract_value(&cur.next_line_required()?, "sitename")?;
    let db_name = extract_value(&cur.next_line_required()?, "dbname")?;
    let base = extract_value(&cur.next_line_required()?, "base")?;
    let generator = extract_value(&cur.next_line_required()?, "generator")?;
    let case = extract_value(&cur.next_line_required()?, "case")?;

    let mut namespaces = HashMap::new();
    assert_opening_tag(&cur.next_line_required()?, "namespaces")?;
    loop {
        let line = cur.next_line_required()?;
        if is_closing_tag(&line, "namespaces") {
            break;
        }
        assert_opening_tag(&line, "namespace")?;
        let key = r#"key=""#;
        let start = line.find(key).ok_or_else(|| anyhow!("malformed namespace tag: '{line}'"))? + key.len();
        let end = line[start..].find('"').ok_or_else(|| anyhow!("malformed namespace tag: '{line}'"))? + start;
        let namespace_key: i32 = line[start..end].parse()?;
        if line.trim_end().ends_with("/>") {
            namespaces.insert(namespace_key, String::new());
        } else {
            namespaces.insert(namespace_key, extract_value(&line, "namespace")?);
        }
    }
    assert_closing_tag(&cur.next_line_required()?, "siteinfo")?;

    Ok(SiteInfo { site_name, db_name, base, generator, case, namespaces })
}

/// Parses a single dump shard. `site_info()` and `iter_revisions()` each open
/// their own stream over the shard's archive, as the reference parser does.
pub struct DumpParser {
    shard: DumpShardFile,
}

impl DumpParser {
    pub fn new(shard: DumpShardFile) -> Self {
        Self { shard }
    }

    fn open(&self) -> Result<LineCursor> {
        let archive = SevenZipArchive::new(self.shard.path.clone());
        let reader = archive.read(None).with_context(|| format!("opening {}", self.shard.path.display()))?;
        Ok(LineCursor::new(reader))
    }

    pub fn site_info(&self) -> Result<SiteInfo> {
        tracing::debug!(shard = %self.shard.path.display(), "parsing site info");
        let mut cur = self.open()?;
        assert_opening_tag(&cur.next_line_required()?, "mediawiki")?;
        let info = process_site_info(&mut cur)?;
        tracing::debug!(shard = %self.shard.path.display(), "done parsing site info");
        Ok(info)
    }

    /// Returns a lazy, single-use iterator over every revision in the shard,
    /// in page-major, chronological-per-page order.
    pub fn iter_revisions(&self) -> Result<RevisionIter> {
        let mut cur = self.open()?;
        assert_opening_tag(&cur.next_line_required()?, "mediawiki")?;
        assert_opening_tag(&cur.next_line_required()?, "siteinfo")?;
        loop {
            let line = cur.next_line_required()?;
            if is_closing_tag(&line, "siteinfo") {
                break;
            }
        }
        Ok(RevisionIter {
            cur,
            pending: VecDeque::new(),
            done: false,
            shard_name: self.shard.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            num_pages: 0,
            num_revisions: 0,
        })
    }
}

/// Lazy iterator produced by `DumpParser::iter_revisions`. Exhausts the whole
/// archive stream once.
pub struct RevisionIter {
    cur: LineCursor,
    pending: VecDeque<RawRevision>,
    done: bool,
    shard_name: String,
    num_pages: u64,
    num_revisions: u64,
}

impl RevisionIter {
    pub fn pages_seen(&self) -> u64 {
        self.num_pages
    }
    pub fn revisions_seen(&self) -> u64 {
        self.num_revisions
    }
}

impl Iterator for RevisionIter {
    type Item = Result<RawRevision>;

    fn next(&mut self) -> Option<Result<RawRevision>> {
        loop {
            if let Some(rev) = self.pending.pop_front() {
                self.num_revisions += 1;
                return Some(Ok(rev));
            }
            if self.done {
                return None;
            }

            let line = match self.cur.next_line_required() {
                Ok(l) => l,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if is_closing_tag(&line, "mediawiki") {
                self.done = true;
                tracing::debug!(
                    shard = %self.shard_name,
                    pages = self.num_pages,
                    revisions = self.num_revisions,
                    "done parsing revisions"
                );
                return match self.cur.next_line() {
                    Ok(None) => None,
                    Ok(Some(extra)) => Some(Err(anyhow!("expected EOF, instead line was: '{extra}'"))),
                    Err(e) => Some(Err(e)),
                };
            }

            self.cur.push_back(line);
            match process_page(&mut self.cur) {
                Ok(revisions) => {
                    self.num_pages += 1;
                    self.pending.extend(revisions);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescapes_quot_and_standard_entities() {
        assert_eq!(unescape_xml("a &quot;b&quot; &amp; c"), "a \"b\" & c");
        assert_eq!(unescape_xml("&lt;tag&gt;"), "<tag>");
    }

    #[test]
    fn extracts_single_line_value() {
        assert_eq!(extract_value("  <id>123</id>", "id").unwrap(), "123");
    }

    #[test]
    fn rejects_mismatched_tag() {
        assert!(extract_value("<id>123</id>", "ns").is_err());
    }
}
