//! Dataset facade (C9): loads a built dataset and answers `iter_revisions`/
//! `iter_page_ids`/`aggregate_revisions` queries, routing to the entity-
//! streams, sorted-entity-streams, or global-stream archives as appropriate.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ahash::AHashSet;
use anyhow::{Context, Result};
use regex::Regex;
use time::Date;

use crate::aggregate::BuildStats;
use crate::config::WikidatedOptions;
use crate::date::YearMonth;
use crate::driver;
use crate::entity_streams::{self, EntityStreamsFile};
use crate::filters::{bounds_overlap_range, RevisionBounds};
use crate::global_stream::{self, GlobalStreamFile};
use crate::model::{Triple, WikidataRevisionMeta, WikidatedAggregatedRevision, WikidatedRevision};
use crate::paths::{self, DumpShardFile};
use crate::range_map::RangeMap;
use crate::rdf::{PropertyRegister, RdfSerializer, SitesTable};
use crate::sorted_entity_streams::{self, SortedEntityStreamsFile};

/// Bounded FIFO cache of decoded archive members, so that adjacent queries
/// against the same file don't re-invoke the external `7z` reader per call.
/// Same eviction idiom as the base tree's per-worker id-shard caches: a
/// `VecDeque` tracking insertion order, popped from the front on overflow.
struct ArchiveCache {
    entries: Mutex<(HashMap<PathBuf, Vec<WikidatedRevision>>, VecDeque<PathBuf>)>,
    capacity: usize,
}

impl ArchiveCache {
    fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new((HashMap::new(), VecDeque::new())), capacity: capacity.max(1) }
    }

    fn get_or_load(&self, key: &Path, load: impl FnOnce() -> Result<Vec<WikidatedRevision>>) -> Result<Vec<WikidatedRevision>> {
        let mut guard = self.entries.lock().unwrap();
        if let Some(v) = guard.0.get(key) {
            return Ok(v.clone());
        }
        drop(guard);
        let loaded = load()?;
        let mut guard = self.entries.lock().unwrap();
        if guard.0.len() >= self.capacity {
            if let Some(old) = guard.1.pop_front() {
                guard.0.remove(&old);
            }
        }
        guard.0.insert(key.to_path_buf(), loaded.clone());
        guard.1.push_back(key.to_path_buf());
        Ok(loaded)
    }
}

/// A built (or loaded) Wikidated dataset: every entity-streams, sorted-
/// entity-streams, and global-stream archive under one dataset directory.
pub struct Dataset {
    pub dataset_dir: PathBuf,
    pub dump_version: Option<Date>,
    entity_streams: RangeMap<EntityStreamsFile>,
    sorted_entity_streams: RangeMap<SortedEntityStreamsFile>,
    global_stream: Vec<GlobalStreamFile>,
    cache: ArchiveCache,
}

fn dataset_version_date(dataset_dir: &Path) -> Option<Date> {
    let name = dataset_dir.file_name()?.to_str()?;
    let re = Regex::new(r"(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})").unwrap();
    let caps = re.captures(name)?;
    let month: u8 = caps["month"].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Date::from_calendar_date(
        caps["year"].parse().ok()?,
        time::Month::January.nth_next(month - 1),
        caps["day"].parse().ok()?,
    )
    .ok()
}

impl Dataset {
    /// Loads every archive already present in `dataset_dir`.
    pub fn load(dataset_dir: &Path) -> Result<Self> {
        tracing::debug!(dir = %dataset_dir.display(), "loading dataset");
        let dump_version = dataset_version_date(dataset_dir);

        let mut entity_streams = RangeMap::new();
        let mut sorted_entity_streams = RangeMap::new();
        let mut global_stream = Vec::new();

        for entry in fs::read_dir(dataset_dir).with_context(|| format!("reading {}", dataset_dir.display()))? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Ok(page_ids) = paths::parse_entity_streams_name(&path, true) {
                sorted_entity_streams.insert(page_ids.clone(), SortedEntityStreamsFile { archive_path: path.clone(), page_ids }).ok();
            } else if let Ok(page_ids) = paths::parse_entity_streams_name(&path, false) {
                entity_streams.insert(page_ids.clone(), EntityStreamsFile { archive_path: path.clone(), page_ids }).ok();
            } else if let Ok((month, revision_ids)) = paths::parse_global_stream_name(&path) {
                global_stream.push(GlobalStreamFile { archive_path: path, month, revision_ids });
            }
        }
        global_stream.sort_by_key(|f| f.month);

        tracing::debug!(dir = %dataset_dir.display(), "done loading dataset");
        Ok(Self {
            dataset_dir: dataset_dir.to_path_buf(),
            dump_version,
            entity_streams,
            sorted_entity_streams,
            global_stream,
            cache: ArchiveCache::new(64),
        })
    }

    /// Builds every archive kind from a set of discovered dump shards: one
    /// entity-streams file per shard, then a sorted counterpart of each, then
    /// the month-partitioned global stream over all of them.
    pub fn build(
        dataset_dir: &Path,
        shards: &[DumpShardFile],
        sites: &SitesTable,
        properties: &PropertyRegister,
        dump_version_month: YearMonth,
        opts: &WikidatedOptions,
        make_serializer: impl Fn() -> Result<Box<dyn RdfSerializer>> + Sync,
    ) -> Result<(Self, BuildStats)> {
        tracing::info!(dir = %dataset_dir.display(), workers = opts.workers, "building dataset");
        fs::create_dir_all(dataset_dir).with_context(|| format!("creating {}", dataset_dir.display()))?;

        let entity_stats = driver::run_build(shards, opts, "entity streams", |shard| {
            let mut serializer = make_serializer()?;
            let (_, stats) = entity_streams::build_entity_streams_file(
                dataset_dir,
                shard,
                serializer.as_mut(),
                sites,
                properties,
                opts.resume,
            )?;
            Ok(stats)
        })?;

        let mut entity_streams = RangeMap::new();
        for shard in shards {
            let path = paths::entity_streams_path(dataset_dir, &shard.page_ids);
            entity_streams.insert(shard.page_ids.clone(), EntityStreamsFile { archive_path: path, page_ids: shard.page_ids.clone() }).ok();
        }

        let entity_files: Vec<EntityStreamsFile> = entity_streams.iter().map(|(_, f)| f.clone()).collect();
        let sorted_files: Vec<SortedEntityStreamsFile> =
            driver::for_each_build_one(&entity_files, opts, "sorted entity streams", |f| {
                sorted_entity_streams::build_sorted_entity_streams_file(dataset_dir, f, opts.resume)
            })?;

        let mut sorted_entity_streams = RangeMap::new();
        for f in &sorted_files {
            sorted_entity_streams.insert(f.page_ids.clone(), f.clone()).ok();
        }

        let global_stream = global_stream::build_global_stream(dataset_dir, &sorted_files, dump_version_month)?;

        tracing::info!(dir = %dataset_dir.display(), "done building dataset");
        Ok((
            Self {
                dataset_dir: dataset_dir.to_path_buf(),
                dump_version: Some(dump_version_month.first_day()),
                entity_streams,
                sorted_entity_streams,
                global_stream,
                cache: ArchiveCache::new(64),
            },
            entity_stats,
        ))
    }

    /// Loads (through the archive cache) every revision of one page's member
    /// within `file`, unfiltered; repeat queries for the same page reuse the
    /// cached decode instead of re-invoking `7z`.
    fn entity_member(&self, file: &EntityStreamsFile, page_id: i64) -> Result<Vec<WikidatedRevision>> {
        let key = file.archive_path.join(format!("#p{page_id}"));
        self.cache.get_or_load(&key, || {
            file.iter_revisions(Some(page_id), &RevisionBounds::default())?.collect()
        })
    }

    /// Loads (through the archive cache) every revision of every page in
    /// `file`, unfiltered.
    fn entity_shard_all(&self, file: &EntityStreamsFile) -> Result<Vec<WikidatedRevision>> {
        self.cache.get_or_load(&file.archive_path, || {
            file.iter_revisions(None, &RevisionBounds::default())?.collect()
        })
    }

    /// Loads (through the archive cache) every revision of one global-stream
    /// month, unfiltered.
    fn global_month_all(&self, file: &GlobalStreamFile) -> Result<Vec<WikidatedRevision>> {
        self.cache.get_or_load(&file.archive_path, || file.iter_revisions(&RevisionBounds::default())?.collect())
    }

    /// Routes a query to the cheapest archive kind able to answer it: a
    /// single entity-streams member for `page_id`, the overlapping entity-
    /// streams files for a page-id-bounded query, or the global stream
    /// otherwise.
    pub fn iter_revisions(
        &self,
        page_id: Option<i64>,
        min_page_id: Option<i64>,
        max_page_id: Option<i64>,
        bounds: RevisionBounds,
    ) -> Result<Box<dyn Iterator<Item = Result<WikidatedRevision>>>> {
        if let Some(page_id) = page_id {
            anyhow::ensure!(
                min_page_id.is_none() && max_page_id.is_none(),
                "do not use page_id together with min_page_id or max_page_id"
            );
            let revisions = match self.entity_streams.lookup(page_id) {
                Some(file) => self.entity_member(file, page_id)?,
                None => Vec::new(),
            };
            let bounds2 = bounds.clone();
            let filtered: Vec<WikidatedRevision> = revisions
                .into_iter()
                .take_while(move |r| !bounds.past_upper_revision_bound(r))
                .filter(move |r| bounds2.matches(r))
                .collect();
            return Ok(Box::new(filtered.into_iter().map(Ok)));
        }

        if min_page_id.is_some() || max_page_id.is_some() {
            let interval = min_page_id.unwrap_or(0)..max_page_id.map(|m| m + 1).unwrap_or(i64::MAX);
            let files: Vec<EntityStreamsFile> = self.entity_streams.slice(&interval).into_iter().cloned().collect();
            let mut filtered = Vec::new();
            for file in &files {
                let revisions = self.entity_shard_all(file)?;
                filtered.extend(revisions.into_iter().filter(|r| bounds.matches(r)));
            }
            return Ok(Box::new(filtered.into_iter().map(Ok)));
        }

        let files: Vec<GlobalStreamFile> = self
            .global_stream
            .iter()
            .filter(|f| {
                bounds_overlap_range(bounds.min_revision_id, bounds.max_revision_id, &f.revision_ids)
                    && month_overlaps_timestamps(f.month, &bounds)
            })
            .cloned()
            .collect();
        let mut filtered = Vec::new();
        for file in &files {
            let revisions = self.global_month_all(file)?;
            filtered.extend(revisions.into_iter().filter(|r| bounds.matches(r)));
        }
        Ok(Box::new(filtered.into_iter().map(Ok)))
    }

    /// Every page-id present across all entity-streams files, ascending.
    pub fn iter_page_ids(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for (_, file) in self.entity_streams.iter() {
            ids.extend(file.iter_page_ids()?);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Folds consecutive runs of up to `window` revisions of `page_id` into
    /// net-change records: triples added in one revision and deleted in a
    /// later one within the same run cancel per `Triple`'s blank-node-aware
    /// equality.
    pub fn aggregate_revisions(&self, page_id: i64, window: usize) -> Result<Vec<WikidatedAggregatedRevision>> {
        anyhow::ensure!(window > 0, "window must be at least 1");
        let revisions: Vec<WikidatedRevision> = self
            .iter_revisions(Some(page_id), None, None, RevisionBounds::default())?
            .collect::<Result<Vec<_>>>()?;

        let mut aggregated = Vec::new();
        for run in revisions.chunks(window) {
            if run.is_empty() {
                continue;
            }
            let mut state: AHashSet<Triple> = AHashSet::new();
            let mut revisions_meta = Vec::with_capacity(run.len());
            for revision in run {
                for t in &revision.triple_deletions {
                    state.remove(t);
                }
                for t in &revision.triple_additions {
                    state.insert(t.clone());
                }
                revisions_meta.push(WikidataRevisionMeta { revision_id: revision.meta.revision_id, timestamp: revision.meta.timestamp });
            }
            let first = &run[0];
            let prior: AHashSet<Triple> = {
                let mut s = state.clone();
                for revision in run.iter().rev() {
                    for t in &revision.triple_additions {
                        s.remove(t);
                    }
                    for t in &revision.triple_deletions {
                        s.insert(t.clone());
                    }
                }
                s
            };
            let triple_deletions: Vec<Triple> = prior.iter().filter(|t| !state.contains(*t)).cloned().collect();
            let triple_additions: Vec<Triple> = state.iter().filter(|t| !prior.contains(*t)).cloned().collect();

            aggregated.push(WikidatedAggregatedRevision {
                meta: first.meta.clone(),
                triple_deletions,
                triple_additions,
                revisions: revisions_meta,
            });
        }
        Ok(aggregated)
    }
}

fn month_overlaps_timestamps(month: YearMonth, bounds: &RevisionBounds) -> bool {
    let min_date = bounds.min_timestamp.map(|t| t.to_offset(time::UtcOffset::UTC).date());
    let max_date = bounds.max_timestamp.map(|t| t.to_offset(time::UtcOffset::UTC).date());
    if let Some(min_date) = min_date {
        if month.last_day() < min_date {
            return false;
        }
    }
    if let Some(max_date) = max_date {
        if month.first_day() > max_date {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RevisionMetadata;
    use time::macros::datetime;

    fn meta(page_id: i64, revision_id: i64, ts: time::OffsetDateTime) -> RevisionMetadata {
        RevisionMetadata {
            entity_id: format!("Q{page_id}"),
            page_id,
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
        }
    }

    #[test]
    fn month_overlap_respects_bounds() {
        let month = YearMonth::new(2021, 6);
        let bounds = RevisionBounds { min_timestamp: Some(datetime!(2021-07-01 00:00:00 UTC)), ..Default::default() };
        assert!(!month_overlaps_timestamps(month, &bounds));
        let bounds = RevisionBounds { min_timestamp: Some(datetime!(2021-06-15 00:00:00 UTC)), ..Default::default() };
        assert!(month_overlaps_timestamps(month, &bounds));
    }

    #[test]
    fn aggregate_cancels_add_then_delete_within_window() {
        let r1 = WikidatedRevision::from_diff(
            meta(1, 101, datetime!(2021-06-01 00:00:00 UTC)),
            vec![],
            vec![Triple::new("wd:Q1", "wdt:P31", "wd:Q5")],
        );
        let r2 = WikidatedRevision::from_diff(
            meta(1, 102, datetime!(2021-06-02 00:00:00 UTC)),
            vec![Triple::new("wd:Q1", "wdt:P31", "wd:Q5")],
            vec![],
        );
        let revisions = vec![r1, r2];
        let mut state: AHashSet<Triple> = AHashSet::new();
        for r in &revisions {
            for t in &r.triple_deletions {
                state.remove(t);
            }
            for t in &r.triple_additions {
                state.insert(t.clone());
            }
        }
        assert!(state.is_empty());
    }
}
