//! Sorted-entity-streams builder (C6): re-sorts one entity-streams archive
//! by revision-id into a single-member archive. Pure reordering — no
//! triple-level recomputation.

use std::io::{BufRead, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::archive::SevenZipArchive;
use crate::entity_streams::EntityStreamsFile;
use crate::filters::RevisionBounds;
use crate::model::WikidatedRevision;
use crate::paths;
use crate::util::rename_with_backoff;

#[derive(Debug, Clone)]
pub struct SortedEntityStreamsFile {
    pub archive_path: PathBuf,
    pub page_ids: Range<i64>,
}

impl SortedEntityStreamsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let page_ids = paths::parse_entity_streams_name(path, true)?;
        Ok(Self { archive_path: path.to_path_buf(), page_ids })
    }

    pub fn iter_revisions(&self) -> Result<impl Iterator<Item = Result<WikidatedRevision>>> {
        let archive = SevenZipArchive::new(self.archive_path.clone());
        let reader = archive.read(None)?;
        Ok(reader.lines().filter(|l| !matches!(l, Ok(s) if s.is_empty())).map(|line| {
            let line = line.context("reading sorted entity streams line")?;
            serde_json::from_str(&line).context("decoding wikidated revision line")
        }))
    }
}

/// Builds (or, if present, loads) the sorted counterpart of `entity_streams`.
pub fn build_sorted_entity_streams_file(
    dataset_dir: &Path,
    entity_streams: &EntityStreamsFile,
    resume: bool,
) -> Result<SortedEntityStreamsFile> {
    let archive_path = paths::sorted_entity_streams_path(dataset_dir, &entity_streams.page_ids);

    if resume && archive_path.exists() {
        tracing::debug!(archive = %archive_path.display(), "sorted entity streams file already exists, skipping");
        return Ok(SortedEntityStreamsFile { archive_path, page_ids: entity_streams.page_ids.clone() });
    }

    tracing::debug!(archive = %archive_path.display(), "building sorted entity streams file");

    let no_bounds = RevisionBounds::default();
    let mut revisions: Vec<WikidatedRevision> = entity_streams
        .iter_revisions(None, &no_bounds)?
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("reading {}", entity_streams.archive_path.display()))?;
    revisions.sort_by_key(|r| r.meta.revision_id);

    let tmp_path = archive_path.with_file_name(format!("tmp.{}", archive_path.file_name().unwrap().to_string_lossy()));
    let archive = SevenZipArchive::new(tmp_path.clone());
    let mut writer = archive.write(None)?;
    for revision in &revisions {
        serde_json::to_writer(&mut writer, revision)?;
        writer.write_all(b"\n")?;
    }
    writer.finish()?;
    rename_with_backoff(&tmp_path, &archive_path, 20, 50)?;

    tracing::debug!(archive = %archive_path.display(), "done building sorted entity streams file");
    Ok(SortedEntityStreamsFile { archive_path, page_ids: entity_streams.page_ids.clone() })
}
