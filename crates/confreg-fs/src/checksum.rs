//! SHA-256 checksum utilities
//!
//! Checksums use the canonical `sha256:<hex>` format. The tree fingerprint is
//! the freshness token of the handler cache.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Fingerprint the metadata of every regular file below `roots`.
///
/// The digest covers each file's path, size and modification time, so any
/// added, removed, touched or resized file changes the result. File contents
/// are not read. Missing roots contribute a marker rather than an error, so
/// an absent directory and an empty one fingerprint differently from a
/// populated one.
///
/// # Errors
///
/// Returns an error if a directory exists but cannot be listed.
pub fn compute_tree_fingerprint(roots: &[&Path]) -> std::io::Result<String> {
    let mut hasher = Sha256::new();

    for root in roots {
        hasher.update(root.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        if !root.is_dir() {
            hasher.update(b"<missing>\0");
            continue;
        }

        let mut files = Vec::new();
        collect_files(root, &mut files)?;
        files.sort();

        for file in files {
            let meta = match fs::metadata(&file) {
                Ok(meta) => meta,
                // Removed between listing and stat; the next fingerprint will differ anyway.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();

            let relative = file.strip_prefix(root).unwrap_or(&file);
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(meta.len().to_le_bytes());
            hasher.update(mtime.to_le_bytes());
        }
    }

    Ok(format!("{}{:x}", PREFIX, hasher.finalize()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
