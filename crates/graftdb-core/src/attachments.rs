//! Attachment metadata plumbing and the blob-content collaborator.
//!
//! The metadata table (`attachments`) belongs to the revision store; the
//! content itself lives behind [`BlobStore`], keyed by content digest. The
//! shipped [`FsBlobStore`] keeps one `<hex>.blob` file per key in the
//! database's sibling attachment directory.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use graftdb_error::{GraftError, Result};
use graftdb_types::JsonMap;
use rusqlite::params;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Database;

/// Content digest identifying one stored blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey([u8; 32]);

impl BlobKey {
    /// Key for a piece of content.
    #[must_use]
    pub fn for_content(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Rebuild a key from its stored byte form.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, used for blob file names.
    #[must_use]
    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Parse the hex rendering back into a key.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0_u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let text = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(text, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.hex())
    }
}

/// Attachment content store.
///
/// The store is external to the revision core; it only ever sees opaque
/// content keyed by digest, never document structure.
pub trait BlobStore {
    /// Store content, returning its key. Storing the same bytes twice is
    /// idempotent.
    fn store(&self, data: &[u8]) -> Result<BlobKey>;

    /// Read content back by key.
    fn read(&self, key: &BlobKey) -> Result<Vec<u8>>;

    /// Remove every blob whose key is not in `keep`; returns how many were
    /// removed.
    fn delete_all_except(&self, keep: &HashSet<BlobKey>) -> Result<usize>;
}

/// Flat-directory blob store: one `<hex>.blob` file per key.
#[derive(Debug)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.dir.join(format!("{}.blob", key.hex()))
    }
}

impl BlobStore for FsBlobStore {
    fn store(&self, data: &[u8]) -> Result<BlobKey> {
        let key = BlobKey::for_content(data);
        let path = self.blob_path(&key);
        if !path.exists() {
            std::fs::write(&path, data)?;
        }
        Ok(key)
    }

    fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        match std::fs::read(self.blob_path(key)) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(GraftError::not_found(
                format!("attachment blob {}", key.hex()),
            )),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_all_except(&self, keep: &HashSet<BlobKey>) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("blob") {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(BlobKey::from_hex)
            else {
                continue;
            };
            if !keep.contains(&key) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        debug!(removed, dir = %self.dir.display(), "collected attachment garbage");
        Ok(removed)
    }
}

impl Database {
    /// The `_attachments` dictionary for a stored revision: metadata stubs,
    /// plus base64 content when requested.
    pub(crate) fn attachments_dict(
        &self,
        sequence: i64,
        with_content: bool,
    ) -> Result<JsonMap> {
        let mut dict = JsonMap::new();
        if sequence == 0 {
            return Ok(dict);
        }

        let rows = self.engine.query_map_collect(
            "SELECT filename, key, type, length FROM attachments WHERE sequence = ?1",
            params![sequence],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        for (filename, key_bytes, content_type, length) in rows {
            let key = BlobKey::from_bytes(&key_bytes).ok_or_else(|| {
                GraftError::corrupt(format!("attachment key for '{filename}'"))
            })?;
            let mut entry = JsonMap::new();
            entry.insert(
                "content_type".to_owned(),
                content_type.map_or(Value::Null, Value::String),
            );
            entry.insert("length".to_owned(), Value::from(length));
            entry.insert(
                "digest".to_owned(),
                Value::String(format!("sha256-{}", key.hex())),
            );
            if with_content {
                let data = self.blobs.read(&key)?;
                entry.insert("data".to_owned(), Value::String(BASE64.encode(data)));
            } else {
                entry.insert("stub".to_owned(), Value::Bool(true));
            }
            dict.insert(filename, Value::Object(entry));
        }
        Ok(dict)
    }

    /// Apply a write's `_attachments` dictionary to the metadata table.
    ///
    /// Stub and `follows` entries copy the parent revision's row forward;
    /// inline `data` is decoded and stored through the blob store. Runs
    /// inside the write transaction.
    pub(crate) fn process_attachments_dict(
        &self,
        attachments: Option<&Value>,
        new_sequence: i64,
        parent_sequence: i64,
    ) -> Result<()> {
        let Some(attachments) = attachments else {
            return Ok(());
        };
        let Some(entries) = attachments.as_object() else {
            return Err(GraftError::bad_request("_attachments must be an object"));
        };

        for (filename, item) in entries {
            let Some(item) = item.as_object() else {
                return Err(GraftError::bad_request(format!(
                    "attachment '{filename}' must be an object"
                )));
            };

            if let Some(data) = item.get("data") {
                let encoded = data.as_str().ok_or_else(|| {
                    GraftError::bad_request(format!(
                        "attachment '{filename}' data must be a base64 string"
                    ))
                })?;
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    GraftError::bad_request(format!("attachment '{filename}': {e}"))
                })?;
                let key = self.blobs.store(&bytes)?;
                let content_type = item.get("content_type").and_then(Value::as_str);
                self.insert_attachment_row(
                    new_sequence,
                    filename,
                    &key,
                    content_type,
                    bytes.len(),
                )?;
            } else if item.get("stub").and_then(Value::as_bool) == Some(true)
                || item.get("follows").and_then(Value::as_bool) == Some(true)
            {
                self.copy_attachment_row(parent_sequence, new_sequence, filename)?;
            } else {
                return Err(GraftError::bad_request(format!(
                    "attachment '{filename}' carries neither data nor a stub"
                )));
            }
        }
        Ok(())
    }

    fn insert_attachment_row(
        &self,
        sequence: i64,
        filename: &str,
        key: &BlobKey,
        content_type: Option<&str>,
        length: usize,
    ) -> Result<()> {
        self.engine.execute(
            "INSERT INTO attachments (sequence, filename, key, type, length) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sequence,
                filename,
                key.as_bytes().as_slice(),
                content_type,
                i64::try_from(length).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    fn copy_attachment_row(
        &self,
        from_sequence: i64,
        to_sequence: i64,
        filename: &str,
    ) -> Result<()> {
        self.engine.execute(
            "INSERT INTO attachments (sequence, filename, key, type, length) \
             SELECT ?1, filename, key, type, length FROM attachments \
             WHERE sequence = ?2 AND filename = ?3",
            params![to_sequence, from_sequence, filename],
        )?;
        if self.engine.changes() == 0 {
            return Err(GraftError::not_found(format!(
                "attachment '{filename}' on the parent revision"
            )));
        }
        Ok(())
    }

    /// Drop every blob whose key no longer appears in the metadata table.
    pub(crate) fn collect_attachment_garbage(&self) -> Result<usize> {
        let keys = self.engine.query_map_collect(
            "SELECT DISTINCT key FROM attachments",
            [],
            |row| row.get::<_, Vec<u8>>(0),
        )?;
        let keep: HashSet<BlobKey> = keys
            .iter()
            .filter_map(|bytes| BlobKey::from_bytes(bytes))
            .collect();
        self.blobs.delete_all_except(&keep)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn key_hex_roundtrip() {
        let key = BlobKey::for_content(b"some attachment bytes");
        let hex = key.hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(BlobKey::from_hex(&hex), Some(key));
        assert_eq!(BlobKey::from_hex("zz"), None);
    }

    #[test]
    fn key_is_deterministic() {
        assert_eq!(
            BlobKey::for_content(b"same bytes"),
            BlobKey::for_content(b"same bytes")
        );
        assert_ne!(
            BlobKey::for_content(b"these bytes"),
            BlobKey::for_content(b"those bytes")
        );
    }

    #[test]
    fn fs_store_roundtrip_and_gc() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();

        let kept = store.store(b"kept content").unwrap();
        let doomed = store.store(b"doomed content").unwrap();
        assert_eq!(store.read(&kept).unwrap(), b"kept content");

        // Storing the same content again is a no-op.
        assert_eq!(store.store(b"kept content").unwrap(), kept);

        let keep: HashSet<BlobKey> = [kept].into_iter().collect();
        assert_eq!(store.delete_all_except(&keep).unwrap(), 1);
        assert!(store.read(&kept).is_ok());
        assert!(store.read(&doomed).unwrap_err().is_not_found());
    }

    #[test]
    fn foreign_files_survive_gc() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("README"), b"not a blob").unwrap();
        store.store(b"blob").unwrap();
        let removed = store.delete_all_except(&HashSet::new()).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("README").exists());
    }
}
