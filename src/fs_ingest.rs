//! Filesystem scanning for the `sstore query` command.
//!
//! Walks a directory, keeps files matching the include globs, skips the
//! usual build and VCS directories, and turns each file into a
//! [`DocumentInput`] plus its text.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use semantic_store_core::models::DocumentInput;

pub const DEFAULT_INCLUDES: &[&str] = &["**/*.md", "**/*.txt"];

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// A file picked up by [`scan_directory`].
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the scan root, `/`-separated.
    pub relative: String,
}

impl ScannedFile {
    /// Document identity for this file under `source`. The title is the
    /// file stem.
    pub fn to_input(&self, source: &str, tags: &[String]) -> DocumentInput {
        let title = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.relative.clone());
        DocumentInput::new(source, &self.relative, &title).with_tags(tags.iter().cloned())
    }

    pub fn read_text(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// Files under `root` matching `includes` and not the default excludes,
/// sorted by relative path.
pub fn scan_directory(root: &Path, includes: &[&str]) -> Result<Vec<ScannedFile>> {
    if !root.is_dir() {
        bail!("Directory does not exist: {}", root.display());
    }

    let include_set = build_globset(includes)?;
    let exclude_set = build_globset(DEFAULT_EXCLUDES)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(ScannedFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
