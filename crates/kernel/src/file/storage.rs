//! Content-addressed blob storage.
//!
//! Blobs are addressed by the hex SHA-256 of their content and laid out as
//! `<root>/<h0h1>/<h2h3>/<hash>`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::service::FileStoreError;

/// Blob storage backend.
pub trait BlobStorage: Send + Sync {
    /// Store `data` and return its content hash.
    fn write(&self, data: &[u8]) -> Result<String, FileStoreError>;

    /// Read the blob with the given content hash.
    fn read(&self, hash: &str) -> Result<Vec<u8>, FileStoreError>;

    /// Remove a blob. Missing blobs are not an error.
    fn delete(&self, hash: &str) -> Result<(), FileStoreError>;

    fn exists(&self, hash: &str) -> Result<bool, FileStoreError>;

    /// Copy a blob's bytes to a filesystem path.
    fn copy_to(&self, hash: &str, target: &Path) -> Result<u64, FileStoreError>;
}

/// Hex SHA-256 of a byte slice.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Local filesystem blob storage.
pub struct LocalBlobStorage {
    base_path: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a content hash to its path.
    ///
    /// Anything but a 64 character hex digest is rejected, so a hash can
    /// never escape the storage root.
    fn blob_path(&self, hash: &str) -> Result<PathBuf, FileStoreError> {
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FileStoreError::InvalidRecord(format!(
                "'{hash}' is not a content hash"
            )));
        }
        Ok(self
            .base_path
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(hash))
    }
}

impl BlobStorage for LocalBlobStorage {
    fn write(&self, data: &[u8]) -> Result<String, FileStoreError> {
        let hash = content_hash(data);
        let path = self.blob_path(&hash)?;
        if path.exists() {
            debug!(hash = %hash, "blob already stored");
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling temp file first so readers never see a partial blob.
        let partial = path.with_extension("partial");
        let mut file = fs::File::create(&partial)?;
        file.write_all(data)?;
        file.flush()?;
        fs::rename(&partial, &path)?;

        debug!(hash = %hash, path = ?path, size = data.len(), "blob written");
        Ok(hash)
    }

    fn read(&self, hash: &str) -> Result<Vec<u8>, FileStoreError> {
        let path = self.blob_path(hash)?;
        if !path.exists() {
            return Err(FileStoreError::MissingContent(hash.to_string()));
        }
        Ok(fs::read(&path)?)
    }

    fn delete(&self, hash: &str) -> Result<(), FileStoreError> {
        let path = self.blob_path(hash)?;
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(hash = %hash, "blob deleted");
        } else {
            warn!(hash = %hash, "blob not found for deletion");
        }
        Ok(())
    }

    fn exists(&self, hash: &str) -> Result<bool, FileStoreError> {
        Ok(self.blob_path(hash)?.exists())
    }

    fn copy_to(&self, hash: &str, target: &Path) -> Result<u64, FileStoreError> {
        let path = self.blob_path(hash)?;
        if !path.exists() {
            return Err(FileStoreError::MissingContent(hash.to_string()));
        }
        Ok(fs::copy(&path, target)?)
    }
}

impl std::fmt::Debug for LocalBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBlobStorage")
            .field("base_path", &self.base_path)
            .finish()
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());

        let hash = storage.write(b"hello").unwrap();
        assert_eq!(hash, content_hash(b"hello"));
        assert!(dir.path().join(&hash[0..2]).join(&hash[2..4]).join(&hash).exists());
        assert_eq!(storage.read(&hash).unwrap(), b"hello");

        // Same content, same blob.
        assert_eq!(storage.write(b"hello").unwrap(), hash);

        storage.delete(&hash).unwrap();
        assert!(!storage.exists(&hash).unwrap());
        assert!(matches!(
            storage.read(&hash),
            Err(FileStoreError::MissingContent(_))
        ));
    }

    #[test]
    fn test_rejects_non_hash_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path());
        assert!(matches!(
            storage.read("../../etc/passwd"),
            Err(FileStoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_copy_to() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlobStorage::new(dir.path().join("blobs"));
        let hash = storage.write(b"abc").unwrap();
        let target = dir.path().join("out.txt");
        assert_eq!(storage.copy_to(&hash, &target).unwrap(), 3);
        assert_eq!(fs::read(target).unwrap(), b"abc");
    }
}
