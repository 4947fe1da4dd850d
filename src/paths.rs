//! File-name conventions for dump shards and for the three dataset archive
//! kinds, plus directory discovery of dump shards (mirrors the corpus-wide
//! month discovery idiom, adapted from filename-by-month to filename-by-
//! page-id-range).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use time::{Date, Month};
use walkdir::WalkDir;

/// One `pages-meta-history` dump shard, as named on disk.
#[derive(Clone, Debug)]
pub struct DumpShardFile {
    pub path: PathBuf,
    pub date: Date,
    pub history_index: u32,
    pub page_ids: std::ops::Range<i64>,
}

fn dump_shard_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^wikidatawiki-(?P<year>\d{4})(?P<month>\d{2})(?P<day>\d{2})-pages-meta-history(?P<hist>\d+)\.xml-p(?P<lo>\d+)p(?P<hi>\d+)\.7z$",
        )
        .unwrap()
    })
}

impl DumpShardFile {
    /// Parses a dump shard's identity from its file name. Fatal (per the
    /// parser's failure semantics) if the name doesn't match.
    pub fn parse(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("dump shard path has no file name: {}", path.display()))?;
        let caps = dump_shard_regex()
            .captures(name)
            .ok_or_else(|| anyhow!("'{name}' is not a Wikidata pages-meta-history dump file name"))?;
        let year: i32 = caps["year"].parse()?;
        let month: u8 = caps["month"].parse()?;
        let day: u8 = caps["day"].parse()?;
        let date = Date::from_calendar_date(year, month_from_u8(month), day)
            .with_context(|| format!("invalid date in dump shard name '{name}'"))?;
        let history_index: u32 = caps["hist"].parse()?;
        let lo: i64 = caps["lo"].parse()?;
        let hi: i64 = caps["hi"].parse()?;
        Ok(Self { path: path.to_path_buf(), date, history_index, page_ids: lo..(hi + 1) })
    }
}

fn month_from_u8(m: u8) -> Month {
    Month::January.nth_next(m - 1)
}

/// Discovers every dump shard directly inside `dir`, skipping any file that
/// doesn't match the expected name (a directory may hold the sites table and
/// catalog file alongside the shards).
pub fn discover_dump_shards(dir: &Path) -> Result<Vec<DumpShardFile>> {
    let mut shards = Vec::new();
    if !dir.exists() {
        return Ok(shards);
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        match DumpShardFile::parse(entry.path()) {
            Ok(shard) => shards.push(shard),
            Err(_) => continue,
        }
    }
    shards.sort_by_key(|s| s.page_ids.start);
    Ok(shards)
}

/// Builds `{dataset}-entity-streams-p{lo}-p{hi}.7z`.
pub fn entity_streams_path(dataset_dir: &Path, page_ids: &std::ops::Range<i64>) -> PathBuf {
    let dataset = dataset_name(dataset_dir);
    dataset_dir.join(format!(
        "{dataset}-entity-streams-p{}-p{}.7z",
        page_ids.start,
        page_ids.end - 1
    ))
}

/// Builds `{dataset}-sorted-entity-streams-p{lo}-p{hi}.7z`.
pub fn sorted_entity_streams_path(dataset_dir: &Path, page_ids: &std::ops::Range<i64>) -> PathBuf {
    let dataset = dataset_name(dataset_dir);
    dataset_dir.join(format!(
        "{dataset}-sorted-entity-streams-p{}-p{}.7z",
        page_ids.start,
        page_ids.end - 1
    ))
}

/// Builds `{dataset}-global-stream-d{YYYYMM}-r{lo}-r{hi}.7z`.
pub fn global_stream_path(
    dataset_dir: &Path,
    month: crate::date::YearMonth,
    revision_ids: &std::ops::Range<i64>,
) -> PathBuf {
    let dataset = dataset_name(dataset_dir);
    dataset_dir.join(format!(
        "{dataset}-global-stream-d{month}-r{}-r{}.7z",
        revision_ids.start,
        revision_ids.end - 1
    ))
}

/// Builds the per-day member name `d{YYYYMMDD}-r{lo}-r{hi}.jsonl`.
pub fn global_stream_member_name(day: Date, revision_ids: &std::ops::Range<i64>) -> String {
    format!(
        "d{:04}{:02}{:02}-r{}-r{}.jsonl",
        day.year(),
        day.month() as u8,
        day.day(),
        revision_ids.start,
        revision_ids.end - 1
    )
}

/// Builds the per-page member name `p{page_id}.jsonl`.
pub fn entity_streams_component_name(page_id: i64) -> String {
    format!("p{page_id}.jsonl")
}

/// Parses the page-id out of an entity-streams member file name.
pub fn parse_entity_streams_component(path: &Path) -> Result<i64> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("no file name: {}", path.display()))?;
    let re = Regex::new(r"^p(?P<page_id>\d+)\.jsonl$").unwrap();
    let caps = re
        .captures(name)
        .ok_or_else(|| anyhow!("'{name}' does not match entity-streams member name pattern"))?;
    Ok(caps["page_id"].parse()?)
}

fn dataset_name(dataset_dir: &Path) -> String {
    dataset_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

static ENTITY_STREAMS_RE: &str = r"^(?P<dataset>.+)-entity-streams-p(?P<lo>\d+)-p(?P<hi>\d+)\.7z$";
static SORTED_ENTITY_STREAMS_RE: &str =
    r"^(?P<dataset>.+)-sorted-entity-streams-p(?P<lo>\d+)-p(?P<hi>\d+)\.7z$";
static GLOBAL_STREAM_RE: &str =
    r"^(?P<dataset>.+)-global-stream-d(?P<year>\d{4})(?P<month>\d{2})-r(?P<lo>\d+)-r(?P<hi>\d+)\.7z$";

/// Parses the page-id range out of an entity-streams (or sorted-entity-
/// streams) archive's file name.
pub fn parse_entity_streams_name(path: &Path, sorted: bool) -> Result<std::ops::Range<i64>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("no file name: {}", path.display()))?;
    let pattern = if sorted { SORTED_ENTITY_STREAMS_RE } else { ENTITY_STREAMS_RE };
    let re = Regex::new(pattern).unwrap();
    let caps = re
        .captures(name)
        .ok_or_else(|| anyhow!("'{name}' does not match entity-streams file name pattern"))?;
    let lo: i64 = caps["lo"].parse()?;
    let hi: i64 = caps["hi"].parse()?;
    Ok(lo..(hi + 1))
}

/// Parses the month and revision-id range out of a global-stream archive's
/// file name.
pub fn parse_global_stream_name(path: &Path) -> Result<(crate::date::YearMonth, std::ops::Range<i64>)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("no file name: {}", path.display()))?;
    let re = Regex::new(GLOBAL_STREAM_RE).unwrap();
    let caps = re
        .captures(name)
        .ok_or_else(|| anyhow!("'{name}' does not match global-stream file name pattern"))?;
    let year: i32 = caps["year"].parse()?;
    let month: u8 = caps["month"].parse()?;
    let lo: i64 = caps["lo"].parse()?;
    let hi: i64 = caps["hi"].parse()?;
    Ok((crate::date::YearMonth::new(year, month), lo..(hi + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dump_shard_name() {
        let shard = DumpShardFile::parse(Path::new(
            "wikidatawiki-20210601-pages-meta-history1.xml-p1p2.7z",
        ))
        .unwrap();
        assert_eq!(shard.page_ids, 1..3);
        assert_eq!(shard.history_index, 1);
        assert_eq!(shard.date, Date::from_calendar_date(2021, Month::June, 1).unwrap());
    }

    #[test]
    fn rejects_unrelated_name() {
        assert!(DumpShardFile::parse(Path::new("not-a-dump.7z")).is_err());
    }

    #[test]
    fn builds_and_parses_entity_streams_name() {
        let dir = Path::new("/data/wikidated-20210601");
        let p = entity_streams_path(dir, &(1..3));
        assert_eq!(p.file_name().unwrap(), "wikidated-20210601-entity-streams-p1-p2.7z");
        assert_eq!(parse_entity_streams_name(&p, false).unwrap(), 1..3);
    }

    #[test]
    fn builds_and_parses_global_stream_name() {
        let dir = Path::new("/data/wikidated-20210601");
        let ym = crate::date::YearMonth::new(2021, 6);
        let p = global_stream_path(dir, ym, &(101..103));
        assert_eq!(p.file_name().unwrap(), "wikidated-20210601-global-stream-d202106-r101-r102.7z");
        let (parsed_ym, parsed_range) = parse_global_stream_name(&p).unwrap();
        assert_eq!(parsed_ym, ym);
        assert_eq!(parsed_range, 101..103);
    }

    #[test]
    fn builds_and_parses_entity_streams_component() {
        let name = entity_streams_component_name(42);
        assert_eq!(name, "p42.jsonl");
        assert_eq!(parse_entity_streams_component(Path::new(&name)).unwrap(), 42);
    }
}
