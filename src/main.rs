use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use wikidated::{
    DumpCatalog, PropertyRegister, RdfSerializer, SerializerError, SitesTable, Wikidated, YearMonth,
};

const DATA_ROOT: &str = "./data";
const WORK_ROOT: &str = "./wikidated_work";

/// Placeholder `RdfSerializer`: a real build wires this to an external RDF
/// serializer runtime (see `rdf.rs`'s doc comments for the contract).
/// Returning empty output keeps this binary runnable against a toy dump
/// shard without a JVM dependency in the loop.
struct PassthroughSerializer;

impl RdfSerializer for PassthroughSerializer {
    fn serialize(
        &mut self,
        _body: &str,
        _sites: &SitesTable,
        _properties: &PropertyRegister,
    ) -> std::result::Result<String, SerializerError> {
        Ok(String::new())
    }
}

fn main() -> Result<()> {
    let data_root = PathBuf::from(DATA_ROOT);
    let dump_dir = data_root.join("dumpfiles");
    let dataset_dir = data_root.join("wikidated-20210601");
    fs::create_dir_all(WORK_ROOT)?;

    let catalog = DumpCatalog::load(&dump_dir, "wikidatawiki", "20210601", None)?;
    for file in catalog.job_files("metahistory7zdump", None)? {
        file.download(&dump_dir)?;
    }

    let (dataset, stats) = Wikidated::new()
        .dump_shards_dir(&dump_dir)
        .dataset_dir(&dataset_dir)
        .work_dir(WORK_ROOT)
        .progress(true)
        .progress_label("Building Wikidated dataset")
        .build(
            YearMonth::new(2021, 6),
            &SitesTable::default(),
            &PropertyRegister::default(),
            || Ok(Box::new(PassthroughSerializer) as Box<dyn RdfSerializer>),
        )?;

    println!(
        "built dataset at {}: {} pages, {} revisions, {} exception kinds",
        dataset.dataset_dir.display(),
        stats.pages_processed,
        stats.revisions_processed,
        stats.exceptions.len(),
    );

    Ok(())
}
