//! Managed file store.
//!
//! Files are catalogued by (context, component, area, item, path, name) and
//! their bytes live in a [`BlobStorage`]. Draft areas used by file pickers
//! are ordinary areas owned by the user: `(user context, "user", "draft",
//! draft item id)`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use super::storage::{BlobStorage, LocalBlobStorage};

/// Component owning draft areas.
pub const DRAFT_COMPONENT: &str = "user";

/// File area holding drafts.
pub const DRAFT_AREA: &str = "draft";

/// File name marking a directory entry.
const DIRECTORY_MARKER: &str = ".";

/// Errors raised by the file store.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("file already exists: {0}")]
    Duplicate(String),

    #[error("invalid file record: {0}")]
    InvalidRecord(String),

    #[error("stored content is missing: {0}")]
    MissingContent(String),

    #[error("file store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a file lives in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub context_id: i64,
    pub component: String,
    pub file_area: String,
    pub item_id: i64,
    /// Directory path, starting and ending with `/`.
    pub filepath: String,
    pub filename: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl FileRecord {
    pub fn new(
        context_id: i64,
        component: impl Into<String>,
        file_area: impl Into<String>,
        item_id: i64,
        filepath: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            context_id,
            component: component.into(),
            file_area: file_area.into(),
            item_id,
            filepath: filepath.into(),
            filename: filename.into(),
            user_id: None,
        }
    }

    /// Record inside a user's draft area.
    pub fn draft(user_context_id: i64, draft_item_id: i64, filename: impl Into<String>) -> Self {
        Self::new(
            user_context_id,
            DRAFT_COMPONENT,
            DRAFT_AREA,
            draft_item_id,
            "/",
            filename,
        )
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Full logical path: `/<context>/<component>/<area>/<item><path><name>`.
    pub fn pathname(&self) -> String {
        format!(
            "/{}/{}/{}/{}{}{}",
            self.context_id,
            self.component,
            self.file_area,
            self.item_id,
            self.filepath,
            self.filename
        )
    }

    /// SHA-256 of [`Self::pathname`]; the catalog key.
    pub fn pathname_hash(&self) -> String {
        hex::encode(Sha256::digest(self.pathname().as_bytes()))
    }

    fn validate(&self) -> Result<(), FileStoreError> {
        if !self.filepath.starts_with('/') || !self.filepath.ends_with('/') {
            return Err(FileStoreError::InvalidRecord(format!(
                "file path '{}' must start and end with '/'",
                self.filepath
            )));
        }
        if self.filepath.split('/').any(|segment| segment == "..") {
            return Err(FileStoreError::InvalidRecord(format!(
                "file path '{}' contains a parent segment",
                self.filepath
            )));
        }
        if self.filename.is_empty()
            || self.filename.contains('/')
            || self.filename.contains('\\')
            || self.filename == ".."
        {
            return Err(FileStoreError::InvalidRecord(format!(
                "invalid file name '{}'",
                self.filename
            )));
        }
        if self.component.is_empty() || self.file_area.is_empty() {
            return Err(FileStoreError::InvalidRecord(
                "component and file area are required".to_string(),
            ));
        }
        Ok(())
    }

    fn is_same_area(&self, context_id: i64, component: &str, area: &str, item_id: i64) -> bool {
        self.context_id == context_id
            && self.component == component
            && self.file_area == area
            && self.item_id == item_id
    }
}

/// A catalogued file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Increasing per store; newer files have larger ids.
    pub id: u64,
    #[serde(flatten)]
    pub record: FileRecord,
    pub content_hash: String,
    pub pathname_hash: String,
    pub size: u64,
    pub created: i64,
}

impl StoredFile {
    pub fn filename(&self) -> &str {
        &self.record.filename
    }

    pub fn is_directory(&self) -> bool {
        self.record.filename == DIRECTORY_MARKER
    }
}

/// The managed file store used by file-bearing form fields.
pub trait FileStore: Send + Sync {
    /// Files in one area, newest first, directories excluded.
    fn area_files(
        &self,
        context_id: i64,
        component: &str,
        file_area: &str,
        item_id: i64,
    ) -> Result<Vec<StoredFile>, FileStoreError>;

    fn get_file(&self, record: &FileRecord) -> Result<Option<StoredFile>, FileStoreError>;

    fn create_from_bytes(
        &self,
        record: FileRecord,
        data: &[u8],
    ) -> Result<StoredFile, FileStoreError>;

    fn create_from_path(
        &self,
        record: FileRecord,
        path: &Path,
    ) -> Result<StoredFile, FileStoreError>;

    /// New record sharing the content of an existing file.
    fn create_from_stored(
        &self,
        record: FileRecord,
        source: &StoredFile,
    ) -> Result<StoredFile, FileStoreError>;

    fn delete(&self, file: &StoredFile) -> Result<(), FileStoreError>;

    fn content(&self, file: &StoredFile) -> Result<Vec<u8>, FileStoreError>;

    fn copy_content_to(&self, file: &StoredFile, target: &Path) -> Result<(), FileStoreError>;
}

/// File store with an in-memory catalog over a blob storage.
pub struct LocalFileStore {
    blobs: Arc<dyn BlobStorage>,
    catalog: RwLock<BTreeMap<String, StoredFile>>,
    next_id: AtomicU64,
}

impl LocalFileStore {
    /// Store with blobs under `root`.
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self::with_storage(Arc::new(LocalBlobStorage::new(root)))
    }

    pub fn with_storage(blobs: Arc<dyn BlobStorage>) -> Self {
        Self {
            blobs,
            catalog: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn insert(
        &self,
        record: FileRecord,
        content_hash: String,
        size: u64,
    ) -> Result<StoredFile, FileStoreError> {
        record.validate()?;
        let pathname_hash = record.pathname_hash();

        let mut catalog = self.catalog.write();
        if catalog.contains_key(&pathname_hash) {
            return Err(FileStoreError::Duplicate(record.pathname()));
        }

        let file = StoredFile {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            record,
            content_hash,
            pathname_hash: pathname_hash.clone(),
            size,
            created: chrono::Utc::now().timestamp(),
        };
        catalog.insert(pathname_hash, file.clone());

        debug!(
            id = file.id,
            pathname = %file.record.pathname(),
            size = file.size,
            "file stored"
        );
        Ok(file)
    }
}

impl FileStore for LocalFileStore {
    fn area_files(
        &self,
        context_id: i64,
        component: &str,
        file_area: &str,
        item_id: i64,
    ) -> Result<Vec<StoredFile>, FileStoreError> {
        let catalog = self.catalog.read();
        let mut files: Vec<StoredFile> = catalog
            .values()
            .filter(|file| !file.is_directory())
            .filter(|file| {
                file.record
                    .is_same_area(context_id, component, file_area, item_id)
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(files)
    }

    fn get_file(&self, record: &FileRecord) -> Result<Option<StoredFile>, FileStoreError> {
        Ok(self.catalog.read().get(&record.pathname_hash()).cloned())
    }

    fn create_from_bytes(
        &self,
        record: FileRecord,
        data: &[u8],
    ) -> Result<StoredFile, FileStoreError> {
        record.validate()?;
        let hash = self.blobs.write(data)?;
        self.insert(record, hash, data.len() as u64)
    }

    fn create_from_path(
        &self,
        record: FileRecord,
        path: &Path,
    ) -> Result<StoredFile, FileStoreError> {
        let data = fs::read(path)?;
        self.create_from_bytes(record, &data)
    }

    fn create_from_stored(
        &self,
        record: FileRecord,
        source: &StoredFile,
    ) -> Result<StoredFile, FileStoreError> {
        if !self.blobs.exists(&source.content_hash)? {
            return Err(FileStoreError::MissingContent(source.content_hash.clone()));
        }
        self.insert(record, source.content_hash.clone(), source.size)
    }

    fn delete(&self, file: &StoredFile) -> Result<(), FileStoreError> {
        let mut catalog = self.catalog.write();
        if catalog.remove(&file.pathname_hash).is_none() {
            return Ok(());
        }
        let shared = catalog
            .values()
            .any(|other| other.content_hash == file.content_hash);
        drop(catalog);

        if !shared {
            self.blobs.delete(&file.content_hash)?;
        }
        info!(id = file.id, pathname = %file.record.pathname(), "file deleted");
        Ok(())
    }

    fn content(&self, file: &StoredFile) -> Result<Vec<u8>, FileStoreError> {
        self.blobs.read(&file.content_hash)
    }

    fn copy_content_to(&self, file: &StoredFile, target: &Path) -> Result<(), FileStoreError> {
        self.blobs.copy_to(&file.content_hash, target)?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileStore").finish()
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pathname() {
        let record = FileRecord::draft(5, 42, "a.txt");
        assert_eq!(record.pathname(), "/5/user/draft/42/a.txt");
        assert_eq!(record.pathname_hash().len(), 64);
    }

    #[test]
    fn test_record_validation() {
        let store = LocalFileStore::new(tempfile::tempdir().unwrap().path());
        let bad_path = FileRecord::new(1, "mod_x", "intro", 0, "docs", "a.txt");
        assert!(matches!(
            store.create_from_bytes(bad_path, b"x"),
            Err(FileStoreError::InvalidRecord(_))
        ));
        let traversal = FileRecord::new(1, "mod_x", "intro", 0, "/../", "a.txt");
        assert!(matches!(
            store.create_from_bytes(traversal, b"x"),
            Err(FileStoreError::InvalidRecord(_))
        ));
        let empty_name = FileRecord::new(1, "mod_x", "intro", 0, "/", "");
        assert!(matches!(
            store.create_from_bytes(empty_name, b"x"),
            Err(FileStoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_directory_entries_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        store
            .create_from_bytes(FileRecord::draft(1, 7, "."), b"")
            .unwrap();
        store
            .create_from_bytes(FileRecord::draft(1, 7, "x.txt"), b"x")
            .unwrap();
        let files = store.area_files(1, DRAFT_COMPONENT, DRAFT_AREA, 7).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename(), "x.txt");
    }
}
