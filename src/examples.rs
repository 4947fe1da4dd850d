// ============================================================================
// Combined usage examples for wikidated.
// Everything is commented out so this file is documentation-only.
// Copy/paste blocks into your own small binaries as needed.
// ============================================================================

// --------------------------------------------------------------------------
// Build a dataset from a directory of already-downloaded dump shards.
// --------------------------------------------------------------------------
/*
use anyhow::Result;
use wikidated::{PropertyRegister, RdfSerializer, SerializerError, SitesTable, Wikidated, YearMonth};

struct StubSerializer;
impl RdfSerializer for StubSerializer {
    fn serialize(&mut self, body: &str, _sites: &SitesTable, _properties: &PropertyRegister)
        -> Result<String, SerializerError>
    {
        Ok(body.to_string())
    }
}

fn main() -> Result<()> {
    let (dataset, stats) = Wikidated::new()
        .dump_shards_dir("./data/dumpfiles")
        .dataset_dir("./data/wikidated-20210601")
        .workers(8)
        .resume(true)
        .progress(true)
        .build(
            YearMonth::new(2021, 6),
            &SitesTable::default(),
            &PropertyRegister::default(),
            || Ok(Box::new(StubSerializer) as Box<dyn RdfSerializer>),
        )?;

    println!("pages={} revisions={}", stats.pages_processed, stats.revisions_processed);
    println!("dataset at {}", dataset.dataset_dir.display());
    Ok(())
}
*/

// --------------------------------------------------------------------------
// Load a previously built dataset and read one entity's whole history.
// --------------------------------------------------------------------------
/*
use anyhow::Result;
use wikidated::Wikidated;

fn main() -> Result<()> {
    let dataset = Wikidated::new()
        .dataset_dir("./data/wikidated-20210601")
        .load()?;

    for revision in dataset.iter_revisions(Some(42), None, None, Default::default())? {
        let revision = revision?;
        println!("{} +{} -{}", revision.meta.revision_id, revision.triple_additions.len(), revision.triple_deletions.len());
    }
    Ok(())
}
*/

// --------------------------------------------------------------------------
// Scan every revision in a page-id range, bounded by revision-id.
// --------------------------------------------------------------------------
/*
use anyhow::Result;
use wikidated::Wikidated;

fn main() -> Result<()> {
    let revisions = Wikidated::new()
        .dataset_dir("./data/wikidated-20210601")
        .scan()?
        .page_id_bounds(Some(1), Some(1_000))
        .revision_id_bounds(Some(500_000_000), None)
        .iter_revisions()?;

    let mut count = 0usize;
    for revision in revisions {
        revision?;
        count += 1;
    }
    println!("{count} revisions");
    Ok(())
}
*/

// --------------------------------------------------------------------------
// Aggregate one page's revision history into 10-revision net-change windows.
// --------------------------------------------------------------------------
/*
use anyhow::Result;
use wikidated::Wikidated;

fn main() -> Result<()> {
    let aggregated = Wikidated::new()
        .dataset_dir("./data/wikidated-20210601")
        .scan()?
        .page_id(42)
        .aggregate_revisions(10)?;

    for run in aggregated {
        println!(
            "{}: +{} -{} over {} revisions",
            run.meta.revision_id,
            run.triple_additions.len(),
            run.triple_deletions.len(),
            run.revisions.len(),
        );
    }
    Ok(())
}
*/

// --------------------------------------------------------------------------
// Fetch and verify the dump catalog before downloading shard files.
// --------------------------------------------------------------------------
/*
use anyhow::Result;
use wikidated::DumpCatalog;

fn main() -> Result<()> {
    let catalog = DumpCatalog::load(
        std::path::Path::new("./data/dumpfiles"),
        "wikidatawiki",
        "20210601",
        None,
    )?;

    for file in catalog.job_files("metahistory7zdump", None)? {
        let path = file.download(std::path::Path::new("./data/dumpfiles"))?;
        println!("downloaded {}", path.display());
    }
    Ok(())
}
*/
