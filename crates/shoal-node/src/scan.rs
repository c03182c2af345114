//! Startup reconciliation of the files directory against the metadata
//! table: every regular file on disk ends up with an entry.

use std::time::UNIX_EPOCH;

use tracing::{info, warn};

use shoal_config::NodePaths;
use shoal_meta::{count_words_chars, FileMetadata, MetadataStore};

use crate::node::unix_now;

/// Owner recorded for files found on disk with no metadata; the real
/// owner is unknown until the name server re-drives it.
const ORPHAN_OWNER: &str = "unknown";

/// Insert an entry for every file in `files/` the table does not know.
/// Returns the number of entries added.
pub fn scan_files_dir(paths: &NodePaths, meta: &MetadataStore) -> std::io::Result<u32> {
    let mut added = 0;

    for entry in std::fs::read_dir(&paths.files)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if meta.exists(&name) {
            continue;
        }

        let content = match std::fs::read(entry.path()) {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %name, error = %e, "unreadable file during startup scan, skipping");
                continue;
            }
        };
        let (words, chars) = count_words_chars(&content);

        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_else(unix_now);

        meta.insert(FileMetadata {
            filename: name.clone(),
            owner: ORPHAN_OWNER.to_string(),
            file_size: content.len() as u64,
            word_count: words,
            char_count: chars,
            last_access: mtime,
            last_modified: mtime,
            is_backup: false,
        });
        info!(file = %name, bytes = content.len(), "adopted untracked file from disk");
        added += 1;
    }

    Ok(added)
}
