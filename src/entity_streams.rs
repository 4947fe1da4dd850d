//! Entity-streams builder (C5): groups consecutive revisions by page-id,
//! computes per-page triple diffs, writes a per-shard archive.

use std::collections::VecDeque;
use std::fs;
use std::io::Write as _;
use std::ops::Range;
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::aggregate::BuildStats;
use crate::archive::SevenZipArchive;
use crate::dump_parser::DumpParser;
use crate::filters::RevisionBounds;
use crate::model::{Triple, WikidatedRevision};
use crate::paths::{self, DumpShardFile};
use crate::rdf::{self, PropertyRegister, RdfSerializer, SitesTable};
use crate::util::remove_dir_all_with_backoff;

/// Name of the sidecar error log every dataset directory accumulates,
/// one line per RDF-conversion failure, alongside the in-memory
/// [`BuildStats::exceptions`] counts.
const EXCEPTIONS_LOG_NAME: &str = "rdf-serialization.exceptions.log";

/// Serializes appends to the exceptions log across concurrent shard
/// workers (C8 runs one `build_entity_streams_file` call per worker);
/// a plain append-mode open can still interleave two workers' lines.
static EXCEPTIONS_LOG_LOCK: Mutex<()> = Mutex::new(());

/// Appends one line to `{dataset_dir}/rdf-serialization.exceptions.log`
/// recording a per-revision RDF-conversion failure: timestamp, page id,
/// revision id, and the error-taxonomy reason.
fn log_exception(dataset_dir: &Path, page_id: i64, revision_id: i64, kind: &str, detail: &str) -> Result<()> {
    let _guard = EXCEPTIONS_LOG_LOCK.lock();
    fs::create_dir_all(dataset_dir).with_context(|| format!("creating {}", dataset_dir.display()))?;
    let path = dataset_dir.join(EXCEPTIONS_LOG_NAME);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    writeln!(
        file,
        "{}\tpage_id={page_id}\trevision_id={revision_id}\treason={kind}\t{detail}",
        time::OffsetDateTime::now_utc().unix_timestamp(),
    )
    .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// A built (or loaded) entity-streams archive: revisions for page-ids
/// `[page_ids.start, page_ids.end)`, one member `p{page_id}.jsonl` per page
/// that produced at least one triple.
#[derive(Debug, Clone)]
pub struct EntityStreamsFile {
    pub archive_path: PathBuf,
    pub page_ids: Range<i64>,
}

impl EntityStreamsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let page_ids = paths::parse_entity_streams_name(path, false)?;
        Ok(Self { archive_path: path.to_path_buf(), page_ids })
    }

    /// Streams revisions from this file. If `page_id` is given, only that
    /// page's member is read and iteration stops once past
    /// `bounds.max_revision_id` (revisions within one page are monotonic);
    /// otherwise every member is concatenated in archive (page-id) order and
    /// the scan must continue to the end regardless of bounds, since
    /// ordering is per-member, not per-file.
    pub fn iter_revisions(
        &self,
        page_id: Option<i64>,
        bounds: &RevisionBounds,
    ) -> Result<Box<dyn Iterator<Item = Result<WikidatedRevision>>>> {
        if !self.archive_path.exists() {
            anyhow::bail!("entity streams file not found: {}", self.archive_path.display());
        }
        let archive = SevenZipArchive::new(self.archive_path.clone());
        let member = page_id.map(paths::entity_streams_component_name);
        let reader = archive.read(member.as_deref())?;

        let bounds = bounds.clone();
        let stop_at_page_bound = page_id.is_some();
        let lines = std::io::BufRead::lines(reader);

        let iter = lines.filter_map(move |line| {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(anyhow::Error::new(e))),
            };
            if line.is_empty() {
                return None;
            }
            let revision: WikidatedRevision = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => return Some(Err(e).context("decoding wikidated revision line")),
            };
            if stop_at_page_bound && bounds.past_upper_revision_bound(&revision) {
                return None;
            }
            if bounds.matches(&revision) {
                Some(Ok(revision))
            } else {
                None
            }
        });
        Ok(Box::new(iter))
    }

    /// Enumerates every page-id present in this file, ascending.
    pub fn iter_page_ids(&self) -> Result<Vec<i64>> {
        if !self.archive_path.exists() {
            anyhow::bail!("entity streams file not found: {}", self.archive_path.display());
        }
        let archive = SevenZipArchive::new(self.archive_path.clone());
        let mut ids: Vec<i64> = archive
            .iter_file_names()?
            .iter()
            .filter_map(|name| paths::parse_entity_streams_component(Path::new(name)).ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Builds (or, if already present, loads) the entity-streams file for one
/// dump shard. Returns the file descriptor plus per-shard build statistics
/// (exception counts per the error taxonomy).
pub fn build_entity_streams_file(
    dataset_dir: &Path,
    shard: &DumpShardFile,
    serializer: &mut dyn RdfSerializer,
    sites: &SitesTable,
    properties: &PropertyRegister,
    resume: bool,
) -> Result<(EntityStreamsFile, BuildStats)> {
    let archive_path = paths::entity_streams_path(dataset_dir, &shard.page_ids);
    let mut stats = BuildStats::default();

    if resume && archive_path.exists() {
        tracing::debug!(archive = %archive_path.display(), "entity streams file already exists, skipping");
        return Ok((EntityStreamsFile { archive_path, page_ids: shard.page_ids.clone() }, stats));
    }

    tracing::debug!(archive = %archive_path.display(), "building entity streams file");

    let tmp_dir = archive_path.with_file_name(format!(
        "tmp.{}",
        archive_path.file_name().unwrap().to_string_lossy()
    ));
    if tmp_dir.exists() {
        remove_dir_all_with_backoff(&tmp_dir, 20, 50)?;
    }
    fs::create_dir_all(&tmp_dir).with_context(|| format!("creating {}", tmp_dir.display()))?;

    let parser = DumpParser::new(shard.clone());
    let mut revisions = parser.iter_revisions()?.peekable();

    let result = (|| -> Result<()> {
        while let Some(first) = revisions.next() {
            let first = first?;
            let page_id = first.meta.page_id;
            let mut group = VecDeque::from([first]);
            while matches!(revisions.peek(), Some(Ok(r)) if r.meta.page_id == page_id) {
                group.push_back(revisions.next().unwrap()?);
            }

            let mut state: AHashSet<Triple> = AHashSet::new();
            let mut out: Option<std::io::BufWriter<fs::File>> = None;

            for raw in group {
                let triples = match rdf::convert_revision(&raw, serializer, sites, properties) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::debug!(revision_id = raw.meta.revision_id, error = %e, "rdf conversion error, skipping revision");
                        let kind = rdf_error_kind(&e);
                        stats.record_exception(kind);
                        if let Err(log_err) = log_exception(dataset_dir, page_id, raw.meta.revision_id, kind, &e.to_string()) {
                            tracing::warn!(error = %log_err, "failed to append to rdf-serialization.exceptions.log");
                        }
                        continue;
                    }
                };
                let triples_set: AHashSet<Triple> = triples.into_iter().collect();
                let (deletions, additions) = diff_triples(&state, &triples_set);
                state = triples_set;

                let revision = WikidatedRevision::from_diff(raw.meta, deletions, additions);

                if out.is_none() {
                    let member_path = tmp_dir.join(paths::entity_streams_component_name(page_id));
                    let file = fs::File::create(&member_path)
                        .with_context(|| format!("creating {}", member_path.display()))?;
                    out = Some(std::io::BufWriter::new(file));
                }
                let writer = out.as_mut().unwrap();
                serde_json::to_writer(&mut *writer, &revision)?;
                use std::io::Write;
                writer.write_all(b"\n")?;
                stats.revisions_processed += 1;
            }

            if out.is_some() {
                stats.pages_processed += 1;
            } else {
                tracing::debug!(page_id, "no wikidated revisions for page; likely not a wikidata entity");
            }
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = remove_dir_all_with_backoff(&tmp_dir, 5, 20);
        result?;
    }

    SevenZipArchive::from_dir_with_order(&tmp_dir, &archive_path, |p| {
        paths::parse_entity_streams_component(p).unwrap_or(i64::MAX)
    })?;
    remove_dir_all_with_backoff(&tmp_dir, 20, 50)?;

    tracing::debug!(archive = %archive_path.display(), "done building entity streams file");
    Ok((EntityStreamsFile { archive_path, page_ids: shard.page_ids.clone() }, stats))
}

fn rdf_error_kind(e: &rdf::RdfConversionError) -> &'static str {
    match e {
        rdf::RdfConversionError::NoText => "no_text",
        rdf::RdfConversionError::UnsupportedModel(_) => "unsupported_model",
        rdf::RdfConversionError::SerializerFailure(_) => "serializer_failure",
    }
}

/// Diffs one revision's triple set against the running per-page `state`:
/// deletions are triples `state` has that `new_triples` doesn't, additions
/// are the reverse. Blank-node-aware equality (see `Triple`) means a triple
/// restated with a fresh blank-node id is neither added nor deleted.
fn diff_triples(state: &AHashSet<Triple>, new_triples: &AHashSet<Triple>) -> (Vec<Triple>, Vec<Triple>) {
    let deletions: Vec<Triple> = state.iter().filter(|t| !new_triples.contains(*t)).cloned().collect();
    let additions: Vec<Triple> = new_triples.iter().filter(|t| !state.contains(*t)).cloned().collect();
    (deletions, additions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_revision_is_all_additions() {
        let state = AHashSet::new();
        let new: AHashSet<Triple> = [Triple::new("wd:Q1", "wdt:P31", "wd:Q5")].into_iter().collect();
        let (deletions, additions) = diff_triples(&state, &new);
        assert!(deletions.is_empty());
        assert_eq!(additions.len(), 1);
    }

    #[test]
    fn unchanged_triple_is_neither_added_nor_deleted() {
        let state: AHashSet<Triple> = [Triple::new("wd:Q1", "wdt:P31", "wd:Q5")].into_iter().collect();
        let new: AHashSet<Triple> =
            [Triple::new("wd:Q1", "wdt:P31", "wd:Q5"), Triple::new("wd:Q1", "wdt:P106", "wd:Q82594")]
                .into_iter()
                .collect();
        let (deletions, additions) = diff_triples(&state, &new);
        assert!(deletions.is_empty());
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].predicate, "wdt:P106");
    }

    #[test]
    fn removed_triple_is_a_deletion() {
        let state: AHashSet<Triple> =
            [Triple::new("wd:Q1", "wdt:P31", "wd:Q5"), Triple::new("wd:Q1", "wdt:P106", "wd:Q82594")]
                .into_iter()
                .collect();
        let new: AHashSet<Triple> = [Triple::new("wd:Q1", "wdt:P31", "wd:Q5")].into_iter().collect();
        let (deletions, additions) = diff_triples(&state, &new);
        assert!(additions.is_empty());
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].predicate, "wdt:P106");
    }

    #[test]
    fn restated_blank_node_is_not_a_diff() {
        let state: AHashSet<Triple> = [Triple::new("wd:Q1", "wdt:P31", "_:b0")].into_iter().collect();
        let new: AHashSet<Triple> = [Triple::new("wd:Q1", "wdt:P31", "_:b9")].into_iter().collect();
        let (deletions, additions) = diff_triples(&state, &new);
        assert!(deletions.is_empty());
        assert!(additions.is_empty());
    }
}
