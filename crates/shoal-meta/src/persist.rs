//! `metadata.db` snapshot format.
//!
//! Little-endian, no magic and no checksum, kept compatible with the
//! historical layout:
//!
//! ```text
//! u32  count
//! repeat count times:
//!   u32 name_len;  bytes[name_len]      // null-terminated
//!   u32 owner_len; bytes[owner_len]     // null-terminated
//!   u64 file_size
//!   u64 word_count
//!   u64 char_count
//!   i64 last_modified
//!   i64 last_access
//! ```
//!
//! `is_backup` is not part of the format; a loaded table starts with every
//! entry marked primary and the name server re-drives backup assignment.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::{FileMetadata, MetaError, MetadataStore, Result};

impl MetadataStore {
    /// Write a point-in-time snapshot to `path`.
    ///
    /// The snapshot is staged in a sibling temp file and renamed into place
    /// so a crash mid-write never leaves a half-written `metadata.db`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.snapshot();

        let tmp = path.with_extension("db.tmp");
        let mut w = BufWriter::new(File::create(&tmp)?);

        w.write_all(&(entries.len() as u32).to_le_bytes())?;
        for meta in &entries {
            write_str(&mut w, &meta.filename)?;
            write_str(&mut w, &meta.owner)?;
            w.write_all(&meta.file_size.to_le_bytes())?;
            w.write_all(&meta.word_count.to_le_bytes())?;
            w.write_all(&meta.char_count.to_le_bytes())?;
            w.write_all(&meta.last_modified.to_le_bytes())?;
            w.write_all(&meta.last_access.to_le_bytes())?;
        }
        w.flush()?;
        w.into_inner()
            .map_err(|e| MetaError::Io(e.into_error()))?
            .sync_all()?;
        std::fs::rename(&tmp, path)?;

        debug!(entries = entries.len(), path = %path.display(), "metadata snapshot written");
        Ok(())
    }

    /// Load a snapshot from `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist (first boot). A
    /// truncated file yields the entries that were fully read; the partial
    /// tail is dropped with a warning rather than failing the whole load.
    pub fn load(path: &Path) -> Result<Option<MetadataStore>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut r = BufReader::new(file);

        let store = MetadataStore::new();
        let expected = match read_u32(&mut r)? {
            Some(n) => n,
            None => {
                warn!(path = %path.display(), "metadata file empty, starting fresh");
                return Ok(Some(store));
            }
        };

        for i in 0..expected {
            match read_entry(&mut r) {
                Ok(Some(meta)) => {
                    store.insert(meta);
                }
                Ok(None) => {
                    warn!(
                        read = i,
                        expected, "metadata file truncated, keeping entries read so far"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(entries = store.count(), path = %path.display(), "metadata snapshot loaded");
        Ok(Some(store))
    }
}

fn write_str(w: &mut impl Write, s: &str) -> Result<()> {
    // Stored length covers the terminating null.
    let len = s.len() as u32 + 1;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    w.write_all(&[0u8])?;
    Ok(())
}

/// One record, or `None` if the stream ended mid-record.
fn read_entry(r: &mut impl Read) -> Result<Option<FileMetadata>> {
    let filename = match read_str(r)? {
        Some(s) => s,
        None => return Ok(None),
    };
    let owner = match read_str(r)? {
        Some(s) => s,
        None => return Ok(None),
    };

    let mut nums = [0u64; 3];
    for n in nums.iter_mut() {
        match read_u64(r)? {
            Some(v) => *n = v,
            None => return Ok(None),
        }
    }
    let last_modified = match read_i64(r)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let last_access = match read_i64(r)? {
        Some(v) => v,
        None => return Ok(None),
    };

    Ok(Some(FileMetadata {
        filename,
        owner,
        file_size: nums[0],
        word_count: nums[1],
        char_count: nums[2],
        last_access,
        last_modified,
        is_backup: false,
    }))
}

fn read_str(r: &mut impl Read) -> Result<Option<String>> {
    let len = match read_u32(r)? {
        Some(n) => n as usize,
        None => return Ok(None),
    };
    if len == 0 {
        return Err(MetaError::Corrupt("zero-length string field".into()));
    }
    let mut buf = vec![0u8; len];
    if !read_full(r, &mut buf)? {
        return Ok(None);
    }
    // Strip the terminating null.
    buf.pop();
    String::from_utf8(buf).map(Some).map_err(|_| {
        MetaError::Corrupt("string field is not valid UTF-8".into())
    })
}

fn read_u32(r: &mut impl Read) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    Ok(read_full(r, &mut buf)?.then(|| u32::from_le_bytes(buf)))
}

fn read_u64(r: &mut impl Read) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    Ok(read_full(r, &mut buf)?.then(|| u64::from_le_bytes(buf)))
}

fn read_i64(r: &mut impl Read) -> Result<Option<i64>> {
    let mut buf = [0u8; 8];
    Ok(read_full(r, &mut buf)?.then(|| i64::from_le_bytes(buf)))
}

/// `read_exact` that reports a clean or mid-buffer EOF as `false` instead of
/// an error, so the loader can stop at a truncation point.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
