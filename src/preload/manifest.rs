//! Preload manifest parsing.
//!
//! A manifest is a plain-text file, one path per line. Lines end with CR,
//! LF or CRLF — manifests come from whatever editor the asset pipeline
//! last touched them with. A trailing `/` names a directory whose
//! immediate entries with the source suffix are each queued
//! (non-recursive, sorted for a deterministic load order). A path without
//! the suffix gets it appended, replacing any existing different
//! extension.
//!
//! Relative entries are resolved against the manifest's own directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::SOURCE_SUFFIX;
use crate::error::ManifestError;

/// Parse a manifest into the ordered list of resolved source paths.
///
/// Manifests above `size_limit` bytes are rejected before parsing; the
/// limit protects the synchronous boot path from unbounded input.
pub fn parse_manifest(path: &Path, size_limit: u64) -> Result<Vec<PathBuf>, ManifestError> {
    let io_err = |cause: std::io::Error| ManifestError::Io {
        path: path.display().to_string(),
        cause,
    };

    let metadata = fs::metadata(path).map_err(io_err)?;
    if metadata.len() > size_limit {
        return Err(ManifestError::TooLarge {
            path: path.display().to_string(),
            size: metadata.len(),
            limit: size_limit,
        });
    }

    let raw = fs::read(path).map_err(io_err)?;
    let text = String::from_utf8_lossy(&raw);
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut entries = Vec::new();
    for line in text.split(['\r', '\n']) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(dir) = line.strip_suffix('/') {
            expand_directory(&resolve(base, dir), &mut entries);
        } else {
            entries.push(with_source_suffix(resolve(base, line)));
        }
    }

    Ok(entries)
}

/// Queue every immediate `.pxi` entry of `dir`, sorted by name.
fn expand_directory(dir: &Path, entries: &mut Vec<PathBuf>) {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "skipping unreadable manifest directory");
            return;
        }
    };

    let mut found: Vec<PathBuf> = listing
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == SOURCE_SUFFIX))
        .collect();
    found.sort();
    entries.extend(found);
}

fn resolve(base: &Path, entry: &str) -> PathBuf {
    let entry = Path::new(entry);
    if entry.is_absolute() {
        entry.to_path_buf()
    } else {
        base.join(entry)
    }
}

fn with_source_suffix(mut path: PathBuf) -> PathBuf {
    if !path.extension().is_some_and(|ext| ext == SOURCE_SUFFIX) {
        path.set_extension(SOURCE_SUFFIX);
    }
    path
}

// =============================================================================
// Tests
// =============================================================================
