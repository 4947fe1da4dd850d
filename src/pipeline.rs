//! Top-level facade: chains `WikidatedOptions` builder calls, then dispatches
//! into [`Dataset::build`]/[`Dataset::load`] and the query methods the
//! dataset exposes once loaded.

use anyhow::Result;
use time::OffsetDateTime;

use crate::aggregate::BuildStats;
use crate::config::WikidatedOptions;
use crate::date::YearMonth;
use crate::dataset::Dataset;
use crate::filters::RevisionBounds;
use crate::model::{WikidatedAggregatedRevision, WikidatedRevision};
use crate::paths;
use crate::rdf::{PropertyRegister, RdfSerializer, SitesTable};
use crate::util::init_tracing_once;

#[derive(Clone)]
pub struct Wikidated {
    pub(crate) opts: WikidatedOptions,
}

impl Wikidated {
    pub fn new() -> Self {
        Self { opts: WikidatedOptions::new() }
    }

    // -------- Builder methods --------
    pub fn dump_shards_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.opts = self.opts.dump_shards_dir(dir);
        self
    }
    pub fn dataset_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.opts = self.opts.dataset_dir(dir);
        self
    }
    pub fn work_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.opts = self.opts.work_dir(dir);
        self
    }
    pub fn workers(mut self, n: usize) -> Self {
        self.opts = self.opts.workers(n);
        self
    }
    pub fn file_concurrency(mut self, n: usize) -> Self {
        self.opts = self.opts.file_concurrency(n);
        self
    }
    pub fn resume(mut self, yes: bool) -> Self {
        self.opts = self.opts.resume(yes);
        self
    }
    pub fn strict(mut self, yes: bool) -> Self {
        self.opts = self.opts.strict(yes);
        self
    }
    pub fn progress(mut self, yes: bool) -> Self {
        self.opts = self.opts.progress(yes);
        self
    }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self {
        self.opts = self.opts.progress_label(label);
        self
    }
    pub fn read_buffer_bytes(mut self, bytes: usize) -> Self {
        self.opts = self.opts.read_buffer_bytes(bytes);
        self
    }
    pub fn write_buffer_bytes(mut self, bytes: usize) -> Self {
        self.opts = self.opts.write_buffer_bytes(bytes);
        self
    }
    pub fn low_memory_threshold(mut self, frac: f64) -> Self {
        self.opts = self.opts.low_memory_threshold(frac);
        self
    }
    pub fn page_id_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.opts = self.opts.page_id_bounds(min, max);
        self
    }
    pub fn revision_id_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.opts = self.opts.revision_id_bounds(min, max);
        self
    }

    /// Discovers dump shards under `dump_shards_dir` and builds every archive
    /// kind (entity-streams, sorted-entity-streams, global-stream) in turn,
    /// returning a queryable [`Dataset`] plus the aggregate build statistics.
    pub fn build(
        self,
        dump_version_month: YearMonth,
        sites: &SitesTable,
        properties: &PropertyRegister,
        make_serializer: impl Fn() -> Result<Box<dyn RdfSerializer>> + Sync,
    ) -> Result<(Dataset, BuildStats)> {
        init_tracing_once();
        if self.opts.workers > 0 {
            rayon::ThreadPoolBuilder::new().num_threads(self.opts.workers).build_global().ok();
        }

        let shards = paths::discover_dump_shards(&self.opts.dump_shards_dir)?;
        if shards.is_empty() {
            anyhow::bail!("no dump shards found under {}", self.opts.dump_shards_dir.display());
        }
        tracing::info!(count = shards.len(), dir = %self.opts.dump_shards_dir.display(), "discovered dump shards");

        Dataset::build(&self.opts.dataset_dir, &shards, sites, properties, dump_version_month, &self.opts, make_serializer)
    }

    /// Loads an already-built dataset from `dataset_dir`.
    pub fn load(self) -> Result<Dataset> {
        Dataset::load(&self.opts.dataset_dir)
    }

    /// Loads the dataset and enters query mode, mirroring the base tree's
    /// `scan()` entry point into its advanced query builder.
    pub fn scan(self) -> Result<WikidatedScan> {
        let opts = self.opts.clone();
        let dataset = self.load()?;
        Ok(WikidatedScan { dataset, opts, page_id: None, min_timestamp: None, max_timestamp: None })
    }
}

impl Default for Wikidated {
    fn default() -> Self {
        Self::new()
    }
}

/// Query builder bound to a loaded dataset: chains page-id/revision-id/
/// timestamp bounds before dispatching to `Dataset::iter_revisions` or
/// `Dataset::aggregate_revisions`.
pub struct WikidatedScan {
    dataset: Dataset,
    opts: WikidatedOptions,
    page_id: Option<i64>,
    min_timestamp: Option<OffsetDateTime>,
    max_timestamp: Option<OffsetDateTime>,
}

impl WikidatedScan {
    /// Restricts iteration to one page's revision history. Mutually
    /// exclusive with `page_id_bounds`.
    pub fn page_id(mut self, id: i64) -> Self {
        self.page_id = Some(id);
        self
    }
    pub fn page_id_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.opts = self.opts.page_id_bounds(min, max);
        self
    }
    pub fn revision_id_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.opts = self.opts.revision_id_bounds(min, max);
        self
    }
    pub fn timestamp_bounds(mut self, min: Option<OffsetDateTime>, max: Option<OffsetDateTime>) -> Self {
        self.min_timestamp = min;
        self.max_timestamp = max;
        self
    }

    fn bounds(&self) -> RevisionBounds {
        RevisionBounds {
            min_revision_id: self.opts.min_revision_id,
            max_revision_id: self.opts.max_revision_id,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
        }
    }

    pub fn iter_revisions(self) -> Result<Box<dyn Iterator<Item = Result<WikidatedRevision>>>> {
        let bounds = self.bounds();
        self.dataset.iter_revisions(self.page_id, self.opts.min_page_id, self.opts.max_page_id, bounds)
    }

    pub fn iter_page_ids(self) -> Result<Vec<i64>> {
        self.dataset.iter_page_ids()
    }

    /// Aggregates the bound page's revisions into net-change records of up to
    /// `window` revisions each. Requires `page_id` to have been set.
    pub fn aggregate_revisions(self, window: usize) -> Result<Vec<WikidatedAggregatedRevision>> {
        let page_id = self.page_id.ok_or_else(|| anyhow::anyhow!("aggregate_revisions requires page_id to be set"))?;
        self.dataset.aggregate_revisions(page_id, window)
    }
}
