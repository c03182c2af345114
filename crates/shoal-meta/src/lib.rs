//! # shoal-meta
//!
//! In-memory metadata table for the files a storage node holds, plus the
//! `metadata.db` on-disk snapshot format.
//!
//! The table is shared by every connection handler in the node, so all
//! operations are keyed single-file updates with atomic update-or-insert
//! semantics. Reads have copy semantics: callers receive an owned record
//! that stays valid across concurrent removal.

pub mod persist;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("no metadata entry for `{0}`")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt metadata record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, MetaError>;

/// Metadata tracked for one file on this node.
///
/// `is_backup` marks entries this node holds as a replica for some other
/// primary; those entries are never replicated outbound again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub owner: String,
    pub file_size: u64,
    pub word_count: u64,
    pub char_count: u64,
    pub last_access: i64,
    pub last_modified: i64,
    pub is_backup: bool,
}

/// Outcome of [`MetadataStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Updated,
}

/// Concurrent filename → [`FileMetadata`] table.
#[derive(Debug, Default)]
pub struct MetadataStore {
    entries: DashMap<String, FileMetadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a record, or overwrite every field (including `owner`) of an
    /// existing one.
    pub fn insert(&self, meta: FileMetadata) -> InsertOutcome {
        match self.entries.insert(meta.filename.clone(), meta) {
            Some(_) => InsertOutcome::Updated,
            None => InsertOutcome::Inserted,
        }
    }

    /// Owned copy of the record for `name`, if present.
    pub fn get(&self, name: &str) -> Option<FileMetadata> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn update_size(&self, name: &str, file_size: u64) -> Result<()> {
        self.mutate(name, |m| m.file_size = file_size)
    }

    pub fn update_counts(&self, name: &str, word_count: u64, char_count: u64) -> Result<()> {
        self.mutate(name, |m| {
            m.word_count = word_count;
            m.char_count = char_count;
        })
    }

    pub fn update_access_time(&self, name: &str, at: i64) -> Result<()> {
        self.mutate(name, |m| m.last_access = at)
    }

    pub fn update_modified_time(&self, name: &str, mt: i64) -> Result<()> {
        self.mutate(name, |m| m.last_modified = mt)
    }

    /// Remove the record for `name`, returning it.
    pub fn remove(&self, name: &str) -> Result<FileMetadata> {
        self.entries
            .remove(name)
            .map(|(_, meta)| meta)
            .ok_or_else(|| MetaError::NotFound(name.to_string()))
    }

    /// Number of records currently in the table.
    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Owned copies of every record. Each entry is consistent in itself;
    /// the set as a whole is not a cross-entry atomic snapshot.
    pub fn snapshot(&self) -> Vec<FileMetadata> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    fn mutate(&self, name: &str, f: impl FnOnce(&mut FileMetadata)) -> Result<()> {
        match self.entries.get_mut(name) {
            Some(mut entry) => {
                f(entry.value_mut());
                Ok(())
            }
            None => Err(MetaError::NotFound(name.to_string())),
        }
    }
}

/// Word and character counts for a file body: words are whitespace-separated
/// runs, characters are the non-whitespace bytes.
pub fn count_words_chars(content: &[u8]) -> (u64, u64) {
    let mut words = 0u64;
    let mut chars = 0u64;
    let mut in_word = false;
    for &b in content {
        if b.is_ascii_whitespace() {
            in_word = false;
        } else {
            chars += 1;
            if !in_word {
                words += 1;
                in_word = true;
            }
        }
    }
    (words, chars)
}
