mod common;

use wikidated::{PropertyRegister, RdfSerializer, SerializerError, SitesTable, Wikidated, YearMonth};

struct StubSerializer;

impl RdfSerializer for StubSerializer {
    fn serialize(
        &mut self,
        body: &str,
        _sites: &SitesTable,
        _properties: &PropertyRegister,
    ) -> Result<String, SerializerError> {
        let ntriples = match body {
            r#"{"foo":1}"# => {
                "<http://www.wikidata.org/entity/Q1> <http://www.wikidata.org/prop/direct/P31> <http://www.wikidata.org/entity/Q5> .\n"
            }
            r#"{"foo":2}"# => {
                "<http://www.wikidata.org/entity/Q1> <http://www.wikidata.org/prop/direct/P31> <http://www.wikidata.org/entity/Q5> .\n\
                 <http://www.wikidata.org/entity/Q1> <http://www.wikidata.org/prop/direct/P106> <http://www.wikidata.org/entity/Q82594> .\n"
            }
            _ => "",
        };
        Ok(ntriples.to_string())
    }
}

fn build_dataset(work: &std::path::Path) -> (wikidated::Dataset, wikidated::BuildStats) {
    let dump_dir = common::make_dump_shard_basic();
    let dataset_dir = work.join("dataset");

    Wikidated::new()
        .dump_shards_dir(&dump_dir)
        .dataset_dir(&dataset_dir)
        .work_dir(work.join("work"))
        .workers(1)
        .progress(false)
        .build(
            YearMonth::new(2012, 10),
            &SitesTable::default(),
            &PropertyRegister::default(),
            || Ok(Box::new(StubSerializer) as Box<dyn RdfSerializer>),
        )
        .expect("building dataset from the basic shard fixture should succeed")
}

#[test]
fn builds_and_lists_page_ids() {
    let work = tempfile::tempdir().unwrap();
    let (dataset, stats) = build_dataset(work.path());

    assert_eq!(stats.pages_processed, 2);
    assert_eq!(stats.revisions_processed, 3);

    let mut page_ids = dataset.iter_page_ids().unwrap();
    page_ids.sort_unstable();
    assert_eq!(page_ids, vec![1, 2]);
}

#[test]
fn iterates_one_pages_full_history_in_revision_order() {
    let work = tempfile::tempdir().unwrap();
    let (dataset, _stats) = build_dataset(work.path());

    let revisions: Vec<_> = dataset
        .iter_revisions(Some(1), None, None, Default::default())
        .unwrap()
        .collect::<anyhow::Result<Vec<_>>>()
        .unwrap();

    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].meta.revision_id, 100);
    assert_eq!(revisions[1].meta.revision_id, 101);
    assert_eq!(revisions[0].triple_additions.len(), 1);
    // revision 101's body adds a second triple but restates the first, so the
    // diff against revision 100's triple set only counts the new one.
    assert_eq!(revisions[1].triple_additions.len(), 1);
}

#[test]
fn page_id_bounds_scope_the_query_to_overlapping_shards() {
    let work = tempfile::tempdir().unwrap();
    let (dataset, _stats) = build_dataset(work.path());

    // Both pages live in the same dump shard (page-id range 1..3), so a
    // bounded query that overlaps that shard returns every revision in it.
    let revisions: Vec<_> = dataset
        .iter_revisions(None, Some(2), Some(2), Default::default())
        .unwrap()
        .collect::<anyhow::Result<Vec<_>>>()
        .unwrap();

    assert_eq!(revisions.len(), 3);
    assert!(revisions.iter().any(|r| r.meta.page_id == 2 && r.meta.redirect.as_deref() == Some("Q1")));

    // A bound entirely past the shard's range matches nothing.
    let none: Vec<_> = dataset
        .iter_revisions(None, Some(50), Some(60), Default::default())
        .unwrap()
        .collect::<anyhow::Result<Vec<_>>>()
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn aggregates_a_pages_history_into_one_window() {
    let work = tempfile::tempdir().unwrap();
    let (dataset, _stats) = build_dataset(work.path());

    let aggregated = dataset.aggregate_revisions(1, 10).unwrap();
    assert_eq!(aggregated.len(), 1);
    let run = &aggregated[0];
    assert_eq!(run.revisions.len(), 2);
    // Neither revision deletes anything, so both triples the page ever gains
    // show up as net additions once the window merges both revisions.
    assert_eq!(run.triple_additions.len(), 2);
    assert!(run.triple_deletions.is_empty());
}

#[test]
fn reloading_a_built_dataset_answers_the_same_queries() {
    let work = tempfile::tempdir().unwrap();
    let (dataset, _stats) = build_dataset(work.path());
    let dataset_dir = dataset.dataset_dir.clone();
    drop(dataset);

    let reloaded = Wikidated::new().dataset_dir(&dataset_dir).load().unwrap();
    let mut page_ids = reloaded.iter_page_ids().unwrap();
    page_ids.sort_unstable();
    assert_eq!(page_ids, vec![1, 2]);
}
