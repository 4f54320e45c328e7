use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

use crate::sqlite::INDEX_FILE_NAME;

pub const DEFAULT_BASE_DIR_NAME: &str = "conversations";
pub const BASE_DIR_ENV: &str = "CHATVAULT_BASE_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    /// Archive root holding `index.db` and the platform partitions.
    pub base_dir: PathBuf,
}

impl RuntimePaths {
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.base_dir.join(INDEX_FILE_NAME)
    }

    /// Resolves a user supplied path (`~/`, relative or absolute).
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_user_path(path, &self.home_dir, &self.cwd)
    }
}

/// Builds the runtime paths from absolute `home_dir`/`cwd` and the optional
/// `--base-dir` (or `CHATVAULT_BASE_DIR`) value.
pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    base_dir_override: Option<&Path>,
) -> Result<RuntimePaths> {
    for (label, path) in [("home_dir", home_dir), ("cwd", cwd)] {
        if !path.is_absolute() {
            bail!("{label} must be absolute: {}", path.display());
        }
    }

    let home_dir = lexically_normal(home_dir);
    let cwd = lexically_normal(cwd);
    let base_dir = resolve_user_path(
        base_dir_override.unwrap_or(Path::new(DEFAULT_BASE_DIR_NAME)),
        &home_dir,
        &cwd,
    )?;

    Ok(RuntimePaths {
        home_dir,
        cwd,
        base_dir,
    })
}

/// `~` and `~/rest` expand against `home_dir`; other relative paths join `cwd`.
fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let anchored = match path.strip_prefix("~") {
        Ok(rest) => home_dir.join(rest),
        Err(_) if path.to_str().is_some_and(|raw| raw.starts_with('~')) => {
            bail!(
                "only `~` and `~/...` home paths are supported: {}",
                path.display()
            )
        }
        Err(_) => cwd.join(path),
    };
    Ok(lexically_normal(&anchored))
}

/// Drops `.` and folds `..` without touching the filesystem.
fn lexically_normal(path: &Path) -> PathBuf {
    path.components()
        .fold(PathBuf::new(), |mut out, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir if out.pop() => {}
                other => out.push(other.as_os_str()),
            }
            out
        })
}
