//! Dump catalog and file download (C10): fetches `dumpstatus.json` for one
//! Wikidata dump version, verifies every listed job is `done`, and downloads
//! individual dump files with SHA-1 verification and atomic publish.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::util::rename_with_backoff;

pub const WIKIDATED_V1_0_NUM_PAGES: u64 = 96_646_606;
pub const WIKIDATED_V1_0_NUM_REVISIONS: u64 = 1_411_008_075;
pub const WIKIDATED_V1_0_DUMP_VERSION: &str = "20210601";

const DEFAULT_MIRROR: &str = "https://dumps.wikimedia.org";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub size: u64,
    pub url: String,
    pub md5: String,
    pub sha1: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogJob {
    pub status: String,
    pub updated: String,
    pub files: BTreeMap<String, CatalogFile>,
}

/// The parsed contents of a `{project}-{version}-dumpstatus.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpCatalog {
    pub version: String,
    pub jobs: BTreeMap<String, CatalogJob>,
}

impl DumpCatalog {
    /// Loads the catalog for `version` from `dump_dir`, downloading it first
    /// if absent. A catalog with any job not `status: "done"` is rejected and
    /// its file removed, so a later retry re-fetches rather than trusting a
    /// partial snapshot.
    pub fn load(dump_dir: &Path, project: &str, version: &str, mirror: Option<&str>) -> Result<Self> {
        let mirror = mirror.unwrap_or(DEFAULT_MIRROR);
        let path = dump_dir.join(format!("{project}-{version}-dumpstatus.json"));

        if !path.exists() {
            let url = format!("{mirror}/{project}/{version}/dumpstatus.json");
            tracing::debug!(url, "downloading dump catalog");
            fs::create_dir_all(dump_dir).with_context(|| format!("creating {}", dump_dir.display()))?;
            let body = reqwest::blocking::get(&url)
                .with_context(|| format!("requesting {url}"))?
                .error_for_status()
                .with_context(|| format!("requesting {url}"))?
                .text()
                .with_context(|| format!("reading body of {url}"))?;
            let tmp = path.with_file_name(format!("tmp.{}", path.file_name().unwrap().to_string_lossy()));
            fs::write(&tmp, &body).with_context(|| format!("writing {}", tmp.display()))?;
            rename_with_backoff(&tmp, &path, 20, 50)?;
        }

        let contents = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let catalog: DumpCatalog = serde_json::from_str(&contents).with_context(|| format!("decoding {}", path.display()))?;

        for (job_name, job) in &catalog.jobs {
            if job.status != "done" {
                fs::remove_file(&path).ok();
                bail!("dump job '{job_name}' is not done, but '{}'", job.status);
            }
        }

        Ok(catalog)
    }

    pub fn job_files(&self, job_name: &str, mirror: Option<&str>) -> Result<Vec<DumpFileDownload>> {
        let mirror = mirror.unwrap_or(DEFAULT_MIRROR);
        let job = self.jobs.get(job_name).with_context(|| format!("no dump job named '{job_name}' in catalog"))?;
        Ok(job
            .files
            .iter()
            .map(|(name, file)| DumpFileDownload {
                name: name.clone(),
                url: format!("{mirror}{}", file.url),
                sha1: file.sha1.clone(),
                size: file.size,
            })
            .collect())
    }
}

/// One catalog-listed file, ready to be downloaded into `dump_dir`.
#[derive(Debug, Clone)]
pub struct DumpFileDownload {
    pub name: String,
    pub url: String,
    pub sha1: String,
    pub size: u64,
}

fn sha1_hex(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn hashcheck(path: &Path, expected_sha1: &str) -> Result<()> {
    let actual = sha1_hex(path)?;
    if actual != expected_sha1 {
        bail!("sha1 mismatch for {}: expected {expected_sha1}, got {actual}", path.display());
    }
    Ok(())
}

impl DumpFileDownload {
    /// Downloads the file to `dump_dir/{name}` unless it is already present
    /// with a matching SHA-1. Writes to a `tmp.` sibling and publishes by
    /// rename so a crash mid-download never leaves a corrupt file in place.
    pub fn download(&self, dump_dir: &Path) -> Result<PathBuf> {
        let path = dump_dir.join(&self.name);

        if path.exists() {
            hashcheck(&path, &self.sha1)?;
            tracing::debug!(file = %path.display(), "dump file already exists with matching sha1, skipping download");
            return Ok(path);
        }

        fs::create_dir_all(dump_dir).with_context(|| format!("creating {}", dump_dir.display()))?;
        let tmp_path = path.with_file_name(format!("tmp.{}", self.name));

        tracing::debug!(url = %self.url, file = %path.display(), "downloading dump file");
        let mut response = reqwest::blocking::get(&self.url)
            .with_context(|| format!("requesting {}", self.url))?
            .error_for_status()
            .with_context(|| format!("requesting {}", self.url))?;
        let mut out = fs::File::create(&tmp_path).with_context(|| format!("creating {}", tmp_path.display()))?;
        std::io::copy(&mut response, &mut out).with_context(|| format!("writing {}", tmp_path.display()))?;
        out.flush()?;
        drop(out);

        hashcheck(&tmp_path, &self.sha1)?;
        rename_with_backoff(&tmp_path, &path, 20, 50)?;
        tracing::debug!(file = %path.display(), "done downloading dump file");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_catalog_with_unfinished_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikidatawiki-20210601-dumpstatus.json");
        fs::write(
            &path,
            r#"{"version":"20210601","jobs":{"metahistory7zdump":{"status":"waiting","updated":"2021-06-01 00:00:00","files":{}}}}"#,
        )
        .unwrap();

        let result = DumpCatalog::load(dir.path(), "wikidatawiki", "20210601", None);
        assert!(result.is_err());
        assert!(!path.exists(), "catalog file should be removed after rejection");
    }

    #[test]
    fn loads_catalog_already_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikidatawiki-20210601-dumpstatus.json");
        fs::write(
            &path,
            r#"{
                "version":"20210601",
                "jobs":{
                    "metahistory7zdump":{
                        "status":"done",
                        "updated":"2021-06-01 00:00:00",
                        "files":{
                            "wikidatawiki-20210601-pages-meta-history1.xml-p1p192.7z":{
                                "size":123,
                                "url":"/wikidatawiki/20210601/wikidatawiki-20210601-pages-meta-history1.xml-p1p192.7z",
                                "md5":"d41d8cd98f00b204e9800998ecf8427e",
                                "sha1":"da39a3ee5e6b4b0d3255bfef95601890afd80709"
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let catalog = DumpCatalog::load(dir.path(), "wikidatawiki", "20210601", None).unwrap();
        let files = catalog.job_files("metahistory7zdump", None).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn download_skips_when_sha1_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.7z");
        fs::write(&path, b"hello").unwrap();
        let sha1 = sha1_hex(&path).unwrap();

        let download = DumpFileDownload { name: "existing.7z".to_string(), url: "http://unused.invalid/".to_string(), sha1, size: 5 };
        let result_path = download.download(dir.path()).unwrap();
        assert_eq!(result_path, path);
    }

    #[test]
    fn download_rejects_mismatched_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.7z");
        fs::write(&path, b"hello").unwrap();

        let download = DumpFileDownload {
            name: "existing.7z".to_string(),
            url: "http://unused.invalid/".to_string(),
            sha1: "0000000000000000000000000000000000000".to_string(),
            size: 5,
        };
        assert!(download.download(dir.path()).is_err());
    }
}
