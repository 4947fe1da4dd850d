mod config;
mod date;
mod paths;

mod model;
mod archive;
mod rdf;
mod dump_parser;
mod range_map;
mod filters;

mod entity_streams;
mod sorted_entity_streams;
mod global_stream;
mod driver;
mod dataset;
mod catalog;

mod progress;
mod concurrency;
mod util;
mod mem;
mod pipeline;

mod aggregate;
mod json_utils;

pub use crate::aggregate::{merge_all, BuildStats, Mergeable};
pub use crate::catalog::{
    CatalogFile, CatalogJob, DumpCatalog, DumpFileDownload, WIKIDATED_V1_0_DUMP_VERSION,
    WIKIDATED_V1_0_NUM_PAGES, WIKIDATED_V1_0_NUM_REVISIONS,
};
pub use crate::config::WikidatedOptions;
pub use crate::dataset::Dataset;
pub use crate::date::{YearMonth, WIKIDATA_INCEPTION_DATE};
pub use crate::entity_streams::EntityStreamsFile;
pub use crate::filters::{bounds_overlap_range, RevisionBounds};
pub use crate::global_stream::GlobalStreamFile;
pub use crate::model::{
    RawRevision, RevisionMetadata, Triple, WikidataRevisionMeta, WikidatedAggregatedRevision,
    WikidatedRevision,
};
pub use crate::paths::{discover_dump_shards, DumpShardFile};
pub use crate::pipeline::{Wikidated, WikidatedScan};
pub use crate::range_map::{RangeMap, RangeOverlapError};
pub use crate::rdf::{
    convert_revision, prefix_table, PrefixTable, PropertyRegister, RdfConversionError,
    RdfSerializer, SerializerError, SitesTable,
};
pub use crate::sorted_entity_streams::SortedEntityStreamsFile;

// Expose multiprogress and progress helpers.
pub use crate::progress::{make_count_progress, make_progress_bar_labeled, set_global_multiprogress, ProgressScope};

// Expose memory helpers for adaptive throttling from the binary.
pub use crate::mem::{available_memory_fraction, is_low_memory};

// Expose robust file ops from util so binaries can import from crate root.
pub use crate::util::{create_with_backoff, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
