//! Managed file storage.
//!
//! A catalog of files keyed by context, component, area and item, backed by
//! content-addressed blobs on the local filesystem.

pub mod service;
pub mod storage;

pub use service::{
    DRAFT_AREA, DRAFT_COMPONENT, FileRecord, FileStore, FileStoreError, LocalFileStore,
    StoredFile,
};
pub use storage::{BlobStorage, LocalBlobStorage, content_hash};
