//! Streaming read/write of ordered 7z archives, shelling out to the `7z`
//! binary exactly as the reference implementation does. Order within an
//! archive matters to every consumer (members are read front-to-back with no
//! random seeks), so [`SevenZipArchive::from_dir_with_order`] stages a
//! directory of symlinks to force a specific member order, since the `7z`
//! CLI has no `--order-by` flag of its own.

use std::ffi::OsStr;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

use crate::util::{remove_dir_all_with_backoff, remove_with_backoff, rename_with_backoff};

#[derive(Debug, Clone)]
pub struct SevenZipArchive {
    pub path: PathBuf,
}

fn run_7z(args: &[&OsStr], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("7z");
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .with_context(|| format!("spawn 7z {:?}", args))?;
    for line in output.stdout.lines().flatten() {
        tracing::debug!(target: "7z", "{line}");
    }
    for line in output.stderr.lines().flatten() {
        tracing::debug!(target: "7z", "{line}");
    }
    if !output.status.success() {
        bail!("7z {:?} exited with status {:?}", args, output.status.code());
    }
    Ok(())
}

impl SevenZipArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Archives every file in `dir` (filesystem-listing order) into `path`.
    /// Written to a `.tmp.` sibling first, renamed into place only once the
    /// archive is fully closed, so a reader never observes a partial file.
    pub fn from_dir(dir: &Path, path: &Path) -> Result<Self> {
        let tmp_path = path.with_file_name(format!(".tmp.{}", path.file_name().unwrap().to_string_lossy()));
        tracing::debug!(dir = %dir.display(), path = %path.display(), "creating 7z archive from directory");

        let rel_tmp = pathdiff(&tmp_path, dir);
        run_7z(
            &[OsStr::new("a"), OsStr::new("-ms=off"), rel_tmp.as_os_str(), OsStr::new(".")],
            Some(dir),
        )
        .with_context(|| format!("7z a for archive {}", path.display()))?;

        rename_with_backoff(&tmp_path, path, 20, 50)?;
        Ok(Self::new(path.to_path_buf()))
    }

    /// Like [`Self::from_dir`] but the archive's member order follows `key`
    /// instead of filesystem order. Materializes ordered symlinks in a
    /// sidecar directory, archives those, then renames members back to their
    /// real names with `7z rn @listfile`.
    pub fn from_dir_with_order<F, K>(dir: &Path, path: &Path, mut key: F) -> Result<Self>
    where
        F: FnMut(&Path) -> K,
        K: Ord,
    {
        let tmp_path = path.with_file_name(format!(".tmp.{}", path.file_name().unwrap().to_string_lossy()));
        let tmp_dir = path.with_file_name(format!(".tmp.{}.contents", path.file_name().unwrap().to_string_lossy()));
        let listfile = path.with_file_name(format!(".tmp.{}.listfile-rename", path.file_name().unwrap().to_string_lossy()));
        tracing::debug!(dir = %dir.display(), path = %path.display(), "creating ordered 7z archive");

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read_dir {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        files.sort_by_key(|p| key(p));

        let result = (|| -> Result<()> {
            fs::create_dir_all(&tmp_dir)?;
            let num_digits = files.len().saturating_sub(1).to_string().len().max(1);
            let mut listfile_contents = String::new();
            for (i, file) in files.iter().enumerate() {
                let ordered_name = format!("{:0width$}", i, width = num_digits);
                let real_name = file.file_name().unwrap().to_string_lossy();
                listfile_contents.push_str(&ordered_name);
                listfile_contents.push('\n');
                listfile_contents.push_str(&real_name);
                listfile_contents.push('\n');
                symlink(&file.canonicalize()?, &tmp_dir.join(&ordered_name))?;
            }
            fs::write(&listfile, listfile_contents)?;

            let rel_tmp = pathdiff(&tmp_path, &tmp_dir);
            run_7z(
                &[OsStr::new("a"), OsStr::new("-l"), OsStr::new("-ms=off"), rel_tmp.as_os_str(), OsStr::new(".")],
                Some(&tmp_dir),
            )?;

            remove_dir_all_with_backoff(&tmp_dir, 20, 50)?;

            let rename_arg = format!("@{}", listfile.display());
            run_7z(&[OsStr::new("rn"), tmp_path.as_os_str(), OsStr::new(&rename_arg)], None)?;

            remove_with_backoff(&listfile, 20, 50)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = remove_dir_all_with_backoff(&tmp_dir, 5, 20);
            let _ = remove_with_backoff(&listfile, 5, 20);
            let _ = remove_with_backoff(&tmp_path, 5, 20);
        }
        result.with_context(|| format!("building ordered archive {}", path.display()))?;

        rename_with_backoff(&tmp_path, path, 20, 50)?;
        Ok(Self::new(path.to_path_buf()))
    }

    /// A streaming writer piped into `7z a -si`, writing a single member.
    pub fn write(&self, file_name: Option<&str>) -> Result<SevenZipWriter> {
        let name_arg = format!("-si{}", file_name.unwrap_or(""));
        tracing::debug!(path = %self.path.display(), file_name, "writing to 7z archive");
        let mut child = Command::new("7z")
            .args(["a", "-bd", "-bso0", &name_arg])
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn 7z a -si for {}", self.path.display()))?;
        let stdin = child.stdin.take().expect("piped stdin");
        Ok(SevenZipWriter { child: Some(child), stdin })
    }

    /// A streaming reader piped from `7z x -so`. With no `file_name` the whole
    /// archive is concatenated in member order.
    pub fn read(&self, file_name: Option<&str>) -> Result<SevenZipReader> {
        tracing::debug!(path = %self.path.display(), file_name, "reading from 7z archive");
        let mut child = Command::new("7z")
            .args(["x", "-so"])
            .arg(&self.path)
            .arg(file_name.unwrap_or(""))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn 7z x -so for {}", self.path.display()))?;
        let stdout = child.stdout.take().expect("piped stdout");
        Ok(SevenZipReader { child: Some(child), reader: BufReader::new(stdout) })
    }

    /// Enumerates member names in archive order.
    pub fn iter_file_names(&self) -> Result<Vec<String>> {
        tracing::debug!(path = %self.path.display(), "listing 7z archive members");
        let output = Command::new("7z")
            .args(["l", "-ba", "-slt"])
            .arg(&self.path)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn 7z l -ba -slt for {}", self.path.display()))?;
        if !output.status.success() {
            bail!("7z l exited with status {:?}", output.status.code());
        }
        let mut names = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if let Some(rest) = line.strip_prefix("Path = ") {
                names.push(rest.to_string());
            }
        }
        Ok(names)
    }
}

/// A line-buffered handle to one open archive member's bytes being written.
pub struct SevenZipWriter {
    child: Option<std::process::Child>,
    stdin: std::process::ChildStdin,
}

impl Write for SevenZipWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stdin.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.stdin.flush()
    }
}

impl SevenZipWriter {
    /// Closes stdin and waits for `7z` to finish; any non-zero exit is fatal.
    pub fn finish(mut self) -> Result<()> {
        drop(std::mem::replace(&mut self.stdin, dummy_stdin()));
        let status = self
            .child
            .take()
            .expect("child present")
            .wait()
            .context("wait for 7z a -si")?;
        if !status.success() {
            bail!("7z a -si exited with status {:?}", status.code());
        }
        Ok(())
    }
}

fn dummy_stdin() -> std::process::ChildStdin {
    // SevenZipWriter::finish always replaces `stdin` before this is observed;
    // this only exists to satisfy `mem::replace`'s signature without `Option`.
    Command::new("true")
        .stdin(Stdio::piped())
        .spawn()
        .expect("spawn placeholder for stdin swap")
        .stdin
        .take()
        .expect("piped stdin")
}

pub struct SevenZipReader {
    child: Option<std::process::Child>,
    reader: BufReader<std::process::ChildStdout>,
}

impl std::io::Read for SevenZipReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.reader, buf)
    }
}
impl BufRead for SevenZipReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        self.reader.fill_buf()
    }
    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

impl Drop for SevenZipReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}
#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

/// Best-effort relative path from `path` as seen from `base` (both assumed
/// absolute-enough to share a common ancestor); falls back to the absolute
/// path when no simple relation exists.
fn pathdiff(path: &Path, base: &Path) -> PathBuf {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    match path.strip_prefix(&base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let mut base_it = base.components();
            let mut path_it = path.components();
            let mut common = 0usize;
            for (a, b) in base_it.by_ref().zip(path_it.by_ref()) {
                if a == b {
                    common += 1;
                } else {
                    break;
                }
            }
            let ups = base.components().count() - common;
            let mut rel = PathBuf::new();
            for _ in 0..ups {
                rel.push("..");
            }
            for c in path.components().skip(common) {
                rel.push(c.as_os_str());
            }
            rel
        }
    }
}
