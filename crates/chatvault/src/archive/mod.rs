//! Date-partitioned conversation archive.
//!
//! Every conversation owns two files under `<base>/<platform>/<YYYY-MM>/`:
//! a markdown summary and a full JSON artifact. New files are first written
//! next to their final path with a `.tmp` suffix and only renamed into place
//! once the index row referencing them exists.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::models::{ConversationRecord, FullArtifact, Platform, all_platforms};

pub const SUMMARY_SUFFIX: &str = "_summary.md";
pub const FULL_SUFFIX: &str = "_full.json";
pub const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub directory: PathBuf,
    pub summary: PathBuf,
    pub full: PathBuf,
}

impl ArtifactPaths {
    #[must_use]
    pub fn summary_temp(&self) -> PathBuf {
        temp_path(&self.summary)
    }

    #[must_use]
    pub fn full_temp(&self) -> PathBuf {
        temp_path(&self.full)
    }
}

/// Relative location of the full artifact, stored as the index `file_path`.
/// Always `/`-separated so the index stays portable across hosts.
#[must_use]
pub fn relative_full_path(platform: Platform, year_month: &str, id: &str) -> String {
    format!("{}/{year_month}/{id}{FULL_SUFFIX}", platform.as_str())
}

#[must_use]
pub fn artifact_paths(
    base_dir: &Path,
    platform: Platform,
    year_month: &str,
    id: &str,
) -> ArtifactPaths {
    let directory = base_dir.join(platform.as_str()).join(year_month);
    ArtifactPaths {
        summary: directory.join(format!("{id}{SUMMARY_SUFFIX}")),
        full: directory.join(format!("{id}{FULL_SUFFIX}")),
        directory,
    }
}

#[must_use]
pub fn record_paths(base_dir: &Path, record: &ConversationRecord) -> ArtifactPaths {
    artifact_paths(base_dir, record.platform, record.year_month(), &record.id)
}

/// Resolves an index `file_path` back to the artifact pair it names.
pub fn paths_from_file_path(base_dir: &Path, file_path: &str) -> Result<ArtifactPaths> {
    let full = file_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base_dir.to_path_buf(), |path, segment| path.join(segment));
    let file_name = full
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("index file_path has no file name: {file_path}"))?;
    let id = file_name
        .strip_suffix(FULL_SUFFIX)
        .ok_or_else(|| anyhow!("index file_path does not name a full artifact: {file_path}"))?;
    let directory = full
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_dir.to_path_buf());

    Ok(ArtifactPaths {
        summary: directory.join(format!("{id}{SUMMARY_SUFFIX}")),
        full,
        directory,
    })
}

#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(TEMP_SUFFIX);
    PathBuf::from(raw)
}

/// Final path for a `*.tmp` artifact, or `None` when `path` is not one.
#[must_use]
pub fn final_path_for_temp(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let final_name = name.strip_suffix(TEMP_SUFFIX)?;
    if final_name.ends_with(FULL_SUFFIX) || final_name.ends_with(SUMMARY_SUFFIX) {
        Some(path.with_file_name(final_name))
    } else {
        None
    }
}

#[must_use]
pub fn id_from_full_path(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(FULL_SUFFIX)
}

#[must_use]
pub fn render_summary_markdown(record: &ConversationRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", record.title);
    out.push('\n');
    let _ = writeln!(out, "**Platform:** {}", record.platform);
    let _ = writeln!(out, "**Date:** {}", record.date);
    let _ = writeln!(out, "**ID:** {}", record.id);
    let _ = writeln!(out, "**Tags:** {}", record.tags.join(", "));
    let _ = writeln!(out, "**Topics:** {}", record.topics.join(", "));
    let _ = writeln!(out, "**Messages:** {}", record.message_count);
    let _ = writeln!(
        out,
        "**Estimated tokens:** {}",
        thousands_separated(record.token_estimate)
    );
    out.push('\n');
    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "{}", record.summary);
    out.push('\n');
    out.push_str("## Full Conversation\n\n");
    let _ = writeln!(
        out,
        "[View full conversation](./{}{FULL_SUFFIX})",
        record.id
    );
    out
}

pub fn render_full_artifact(artifact: &FullArtifact) -> Result<Vec<u8>> {
    let mut encoded =
        serde_json::to_vec_pretty(artifact).context("failed to encode full artifact json")?;
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn read_full_artifact(path: &Path) -> Result<FullArtifact> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read full artifact: {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to decode full artifact: {}", path.display()))
}

/// Both artifacts of one conversation written to their temp paths.
#[derive(Debug)]
#[must_use = "staged artifacts must be committed or discarded"]
pub struct StagedArtifacts {
    paths: ArtifactPaths,
}

impl StagedArtifacts {
    /// Renames both temps into place, full artifact last.
    pub fn commit(self) -> Result<ArtifactPaths> {
        promote(&self.paths.summary_temp(), &self.paths.summary)?;
        promote(&self.paths.full_temp(), &self.paths.full)?;
        debug!(path = %self.paths.full.display(), "committed archive artifacts");
        Ok(self.paths)
    }

    pub fn discard(self) -> Result<()> {
        remove_if_exists(&self.paths.summary_temp())?;
        remove_if_exists(&self.paths.full_temp())
    }
}

pub fn stage_artifacts(paths: ArtifactPaths, artifact: &FullArtifact) -> Result<StagedArtifacts> {
    std::fs::create_dir_all(&paths.directory).with_context(|| {
        format!(
            "failed to create archive directory: {}",
            paths.directory.display()
        )
    })?;

    let staged = StagedArtifacts { paths };
    let written = write_file(
        &staged.paths.summary_temp(),
        render_summary_markdown(&artifact.record).as_bytes(),
    )
    .and_then(|()| write_file(&staged.paths.full_temp(), &render_full_artifact(artifact)?));

    match written {
        Ok(()) => Ok(staged),
        Err(error) => {
            let _ = staged.discard();
            Err(error)
        }
    }
}

/// Rewrites just the summary, through a temp file.
pub fn write_summary_artifact(path: &Path, record: &ConversationRecord) -> Result<()> {
    let temp = temp_path(path);
    write_file(&temp, render_summary_markdown(record).as_bytes())?;
    promote(&temp, path)
}

pub fn promote(temp: &Path, target: &Path) -> Result<()> {
    std::fs::rename(temp, target).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            temp.display(),
            target.display()
        )
    })
}

pub fn remove_artifact_pair(paths: &ArtifactPaths) -> Result<()> {
    remove_if_exists(&paths.summary)?;
    remove_if_exists(&paths.full)?;
    // Drop the month directory once it is empty; a non-empty one stays.
    let _ = std::fs::remove_dir(&paths.directory);
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => {
            Err(error).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write archive file: {}", path.display()))
}

/// Files found under the platform partitions of an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveScan {
    pub full_artifacts: Vec<PathBuf>,
    pub summaries: Vec<PathBuf>,
    pub temps: Vec<PathBuf>,
}

/// Lists artifacts under `<base>/<platform>/<YYYY-MM>/` for every known
/// platform. Paths come back sorted.
pub fn scan_archive(base_dir: &Path) -> Result<ArchiveScan> {
    let mut scan = ArchiveScan::default();
    for platform in all_platforms() {
        let platform_dir = base_dir.join(platform.as_str());
        if !platform_dir.is_dir() {
            continue;
        }
        for month_dir in read_dir_sorted(&platform_dir)? {
            if !month_dir.is_dir() {
                continue;
            }
            for path in read_dir_sorted(&month_dir)? {
                let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                if name.ends_with(TEMP_SUFFIX) {
                    scan.temps.push(path);
                } else if name.ends_with(FULL_SUFFIX) {
                    scan.full_artifacts.push(path);
                } else if name.ends_with(SUMMARY_SUFFIX) {
                    scan.summaries.push(path);
                }
            }
        }
    }
    Ok(scan)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read archive directory: {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to enumerate archive directory: {}", dir.display()))?;
    paths.sort();
    Ok(paths)
}

#[must_use]
pub fn thousands_separated(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
