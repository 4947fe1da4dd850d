//! Global-stream builder (C7): k-way merges every sorted-entity-streams file
//! by revision-id, then partitions the merged stream into one archive per
//! calendar month and one member per day within the month.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::archive::SevenZipArchive;
use crate::date::{YearMonth, WIKIDATA_INCEPTION_DATE};
use crate::model::WikidatedRevision;
use crate::paths;
use crate::sorted_entity_streams::SortedEntityStreamsFile;
use crate::util::remove_dir_all_with_backoff;

#[derive(Debug, Clone)]
pub struct GlobalStreamFile {
    pub archive_path: PathBuf,
    pub month: YearMonth,
    pub revision_ids: Range<i64>,
}

impl GlobalStreamFile {
    pub fn load(path: &Path) -> Result<Self> {
        let (month, revision_ids) = paths::parse_global_stream_name(path)?;
        Ok(Self { archive_path: path.to_path_buf(), month, revision_ids })
    }

    /// Streams every revision of this month's archive, day members
    /// concatenated in archive (chronological) order.
    pub fn iter_revisions(
        &self,
        bounds: &crate::filters::RevisionBounds,
    ) -> Result<impl Iterator<Item = Result<WikidatedRevision>>> {
        let archive = SevenZipArchive::new(self.archive_path.clone());
        let reader = archive.read(None)?;
        let bounds = bounds.clone();
        let iter = std::io::BufRead::lines(reader).filter_map(move |line| {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(anyhow::Error::new(e))),
            };
            if line.is_empty() {
                return None;
            }
            let revision: WikidatedRevision = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => return Some(Err(anyhow::Error::new(e).context("decoding wikidated revision line"))),
            };
            if bounds.matches(&revision) {
                Some(Ok(revision))
            } else {
                None
            }
        });
        Ok(iter)
    }
}

/// A k-way merge of already-sorted (by revision-id) revision streams, using a
/// binary min-heap keyed on revision-id, same algorithmic shape as
/// `dedupe.rs`'s run-merging but over an open-ended set of sources.
struct KWayMerge {
    heads: Vec<Option<WikidatedRevision>>,
    sources: Vec<Box<dyn Iterator<Item = Result<WikidatedRevision>>>>,
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    pending_error: Option<anyhow::Error>,
}

impl KWayMerge {
    fn new(mut sources: Vec<Box<dyn Iterator<Item = Result<WikidatedRevision>>>>) -> Result<Self> {
        let mut heads = Vec::with_capacity(sources.len());
        let mut heap = BinaryHeap::new();
        for (i, src) in sources.iter_mut().enumerate() {
            match src.next() {
                Some(Ok(rev)) => {
                    heap.push(Reverse((rev.meta.revision_id, i)));
                    heads.push(Some(rev));
                }
                Some(Err(e)) => return Err(e),
                None => heads.push(None),
            }
        }
        Ok(Self { heads, sources, heap, pending_error: None })
    }
}

impl Iterator for KWayMerge {
    type Item = Result<WikidatedRevision>;

    fn next(&mut self) -> Option<Result<WikidatedRevision>> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        let Reverse((_, idx)) = self.heap.pop()?;
        let revision = self.heads[idx].take().expect("head present for every heap entry");
        match self.sources[idx].next() {
            Some(Ok(next_rev)) => {
                self.heap.push(Reverse((next_rev.meta.revision_id, idx)));
                self.heads[idx] = Some(next_rev);
            }
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }
        Some(Ok(revision))
    }
}

/// A one-revision lookahead buffer over the merged stream, needed because a
/// revision read while building one day's member may belong to the next day.
struct RevisionCursor {
    inner: KWayMerge,
    pending: Option<WikidatedRevision>,
}

impl RevisionCursor {
    fn next(&mut self) -> Option<Result<WikidatedRevision>> {
        if let Some(r) = self.pending.take() {
            return Some(Ok(r));
        }
        self.inner.next()
    }

    fn push_back(&mut self, revision: WikidatedRevision) {
        self.pending = Some(revision);
    }
}

fn find_existing_global_stream(dataset_dir: &Path, month: YearMonth) -> Result<Option<PathBuf>> {
    if !dataset_dir.exists() {
        return Ok(None);
    }
    for entry in fs::read_dir(dataset_dir).with_context(|| format!("reading {}", dataset_dir.display()))? {
        let path = entry?.path();
        if let Ok((parsed_month, _)) = paths::parse_global_stream_name(&path) {
            if parsed_month == month {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

fn drain_month(cursor: &mut RevisionCursor, month: YearMonth) -> Result<()> {
    let next_month_first_day = month.next().first_day();
    loop {
        match cursor.next() {
            Some(Ok(revision)) => {
                if revision.meta.timestamp.date() >= next_month_first_day {
                    cursor.push_back(revision);
                    break;
                }
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    Ok(())
}

fn extend_range(existing: Option<Range<i64>>, revision_id: i64) -> Range<i64> {
    match existing {
        Some(r) => r.start..(revision_id + 1),
        None => revision_id..(revision_id + 1),
    }
}

fn build_month(dataset_dir: &Path, month: YearMonth, cursor: &mut RevisionCursor) -> Result<Option<GlobalStreamFile>> {
    if let Some(existing) = find_existing_global_stream(dataset_dir, month)? {
        tracing::debug!(archive = %existing.display(), "global stream file already exists, skipping building but draining revisions");
        drain_month(cursor, month)?;
        return Ok(Some(GlobalStreamFile::load(&existing)?));
    }

    tracing::debug!(%month, "building global stream file");

    let dataset_name = dataset_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let tmp_dir = dataset_dir.join(format!("tmp.{dataset_name}-global-stream-d{month}"));
    if tmp_dir.exists() {
        remove_dir_all_with_backoff(&tmp_dir, 20, 50)?;
    }
    fs::create_dir_all(&tmp_dir).with_context(|| format!("creating {}", tmp_dir.display()))?;

    let mut revision_ids: Option<Range<i64>> = None;

    for day in crate::date::iter_days(month.first_day(), month.last_day()) {
        if day < WIKIDATA_INCEPTION_DATE {
            continue;
        }
        let tmp_file = tmp_dir.join(format!("tmp.{:04}{:02}{:02}.jsonl", day.year(), day.month() as u8, day.day()));
        let mut revision_ids_of_day: Option<Range<i64>> = None;
        {
            let mut writer = std::io::BufWriter::new(
                fs::File::create(&tmp_file).with_context(|| format!("creating {}", tmp_file.display()))?,
            );
            loop {
                let revision = match cursor.next() {
                    Some(r) => r?,
                    None => break,
                };
                let revision_date = revision.meta.timestamp.date();
                if revision_date < day {
                    tracing::warn!(
                        revision_id = revision.meta.revision_id,
                        timestamp = %revision.meta.timestamp,
                        day = %day,
                        "revision authored before this day has a higher revision id than revisions of this day; including it with this day"
                    );
                } else if revision_date > day {
                    cursor.push_back(revision);
                    break;
                }
                revision_ids_of_day = Some(extend_range(revision_ids_of_day, revision.meta.revision_id));
                serde_json::to_writer(&mut writer, &revision)?;
                writer.write_all(b"\n")?;
            }
        }

        match revision_ids_of_day {
            Some(day_range) => {
                revision_ids = Some(match revision_ids {
                    Some(r) => r.start..day_range.end,
                    None => day_range.clone(),
                });
                let final_name = paths::global_stream_member_name(day, &day_range);
                fs::rename(&tmp_file, tmp_dir.join(final_name))?;
            }
            None => {
                tracing::warn!(day = %day, "no revisions found for this day in global stream");
                fs::remove_file(&tmp_file).ok();
            }
        }
    }

    if revision_ids.is_none() {
        tracing::warn!(%month, "no revisions found for this month in global stream");
        remove_dir_all_with_backoff(&tmp_dir, 20, 50)?;
        return Ok(None);
    }
    let revision_ids = revision_ids.unwrap();

    let archive_path = paths::global_stream_path(dataset_dir, month, &revision_ids);
    SevenZipArchive::from_dir_with_order(&tmp_dir, &archive_path, |p| p.file_name().map(|n| n.to_os_string()))?;
    remove_dir_all_with_backoff(&tmp_dir, 20, 50)?;

    tracing::debug!(archive = %archive_path.display(), "done building global stream file");
    Ok(Some(GlobalStreamFile { archive_path, month, revision_ids }))
}

/// Builds every global-stream file from `inception_month` through
/// `dump_version_month` inclusive. A month with zero revisions yields no
/// file. Asserts the merged stream contains nothing past the dump version.
pub fn build_global_stream(
    dataset_dir: &Path,
    sorted_files: &[SortedEntityStreamsFile],
    dump_version_month: YearMonth,
) -> Result<Vec<GlobalStreamFile>> {
    let sources: Vec<Box<dyn Iterator<Item = Result<WikidatedRevision>>>> = sorted_files
        .iter()
        .map(|f| -> Result<Box<dyn Iterator<Item = Result<WikidatedRevision>>>> { Ok(Box::new(f.iter_revisions()?)) })
        .collect::<Result<Vec<_>>>()?;
    let merged = KWayMerge::new(sources)?;
    let mut cursor = RevisionCursor { inner: merged, pending: None };

    let inception_month = YearMonth::from_date(WIKIDATA_INCEPTION_DATE);
    let mut files = Vec::new();
    for month in crate::date::iter_year_months(inception_month, dump_version_month) {
        if let Some(file) = build_month(dataset_dir, month, &mut cursor)? {
            files.push(file);
        }
    }

    if let Some(extra) = cursor.next() {
        let revision = extra?;
        bail!("found revisions after dump version date: revision_id={}", revision.meta.revision_id);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RevisionMetadata;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn rev(revision_id: i64, ts: OffsetDateTime) -> WikidatedRevision {
        let meta = RevisionMetadata {
            entity_id: format!("Q{revision_id}"),
            page_id: revision_id,
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

    fn source(revisions: Vec<WikidatedRevision>) -> Box<dyn Iterator<Item = Result<WikidatedRevision>>> {
        Box::new(revisions.into_iter().map(Ok))
    }

    #[test]
    fn kway_merge_interleaves_sources_by_revision_id() {
        let a = source(vec![rev(100, datetime!(2012-10-30 00:00:00 UTC)), rev(103, datetime!(2012-10-30 06:00:00 UTC))]);
        let b = source(vec![rev(101, datetime!(2012-10-30 01:00:00 UTC)), rev(102, datetime!(2012-10-30 02:00:00 UTC))]);
        let merge = KWayMerge::new(vec![a, b]).unwrap();
        let ids: Vec<i64> = merge.map(|r| r.unwrap().meta.revision_id).collect();
        assert_eq!(ids, vec![100, 101, 102, 103]);
    }

    /// A revision with a higher revision-id but an earlier timestamp than the
    /// day currently being written is not dropped: it's merged by revision-id
    /// order, so `build_month` logs a warning and includes it with the day
    /// being written rather than the day its own timestamp falls on.
    #[test]
    fn out_of_order_timestamp_is_kept_with_the_later_days_member() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("dataset");

        let revisions = vec![
            rev(100, datetime!(2012-10-30 00:00:00 UTC)),
            rev(101, datetime!(2012-10-29 00:00:00 UTC)),
        ];
        let merged = KWayMerge::new(vec![source(revisions)]).unwrap();
        let mut cursor = RevisionCursor { inner: merged, pending: None };

        let file = build_month(&dataset_dir, YearMonth::new(2012, 10), &mut cursor)
            .unwrap()
            .expect("month has revisions");
        assert_eq!(file.revision_ids, 100..102);

        let out: Vec<_> = file
            .iter_revisions(&crate::filters::RevisionBounds::default())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let ids: Vec<i64> = out.iter().map(|r| r.meta.revision_id).collect();
        assert_eq!(ids, vec![100, 101]);
    }

    #[test]
    fn month_with_no_revisions_yields_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("dataset");
        let merged = KWayMerge::new(vec![source(vec![])]).unwrap();
        let mut cursor = RevisionCursor { inner: merged, pending: None };
        let file = build_month(&dataset_dir, YearMonth::new(2012, 10), &mut cursor).unwrap();
        assert!(file.is_none());
    }
}
