use std::path::{Path, PathBuf};

/// User-facing options with sensible defaults and builder chaining, in the
/// same idiom as the base tree's options struct: `::new()` then chained
/// `.with_*` setters, finally handed to `WikidatedBuilder`.
#[derive(Clone, Debug)]
pub struct WikidatedOptions {
    pub dump_shards_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub work_dir: Option<PathBuf>,

    pub workers: usize,
    pub file_concurrency: usize,
    pub resume: bool,
    pub strict: bool,

    pub progress: bool,
    pub progress_label: Option<String>,

    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,

    pub low_memory_threshold: f64,

    pub min_page_id: Option<i64>,
    pub max_page_id: Option<i64>,
    pub min_revision_id: Option<i64>,
    pub max_revision_id: Option<i64>,
}

impl Default for WikidatedOptions {
    fn default() -> Self {
        let base = PathBuf::from("./wikidated");
        Self {
            dump_shards_dir: base.join("dump"),
            dataset_dir: base.join("dataset"),
            work_dir: None,

            workers: num_cpus_fallback(),
            file_concurrency: 1,
            resume: true,
            strict: false,

            progress: true,
            progress_label: None,

            read_buffer_bytes: 256 * 1024,
            write_buffer_bytes: 256 * 1024,

            low_memory_threshold: 0.10,

            min_page_id: None,
            max_page_id: None,
            min_revision_id: None,
            max_revision_id: None,
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl WikidatedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dump_shards_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dump_shards_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn dataset_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dataset_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }
    pub fn file_concurrency(mut self, n: usize) -> Self {
        self.file_concurrency = n.max(1);
        self
    }
    pub fn resume(mut self, yes: bool) -> Self {
        self.resume = yes;
        self
    }
    /// When true, a single worker exception aborts the whole build instead of
    /// being recorded and skipped (see `aggregate::BuildStats`).
    pub fn strict(mut self, yes: bool) -> Self {
        self.strict = yes;
        self
    }
    pub fn progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }
    pub fn read_buffer_bytes(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes.max(8 * 1024);
        self
    }
    pub fn write_buffer_bytes(mut self, bytes: usize) -> Self {
        self.write_buffer_bytes = bytes.max(8 * 1024);
        self
    }
    pub fn low_memory_threshold(mut self, frac: f64) -> Self {
        self.low_memory_threshold = frac.clamp(0.0, 1.0);
        self
    }
    pub fn page_id_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min_page_id = min;
        self.max_page_id = max;
        self
    }
    pub fn revision_id_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min_revision_id = min;
        self.max_revision_id = max;
        self
    }
}
