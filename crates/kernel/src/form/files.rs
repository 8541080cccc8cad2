//! File-bearing form fields.
//!
//! Plain `file` inputs deliver an [`UploadedFile`] with the request; file
//! pickers and file managers submit the id of a draft area in the managed
//! store. Both are read through [`FileSource`], and both are checked here
//! before a submission counts as valid.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use super::model::FormModel;
use super::param::{ParamType, clean_param, scalar_to_string};
use super::rules::Rule;
use super::submission::{UploadError, UploadedFile};
use super::types::ElementType;
use crate::file::{DRAFT_AREA, DRAFT_COMPONENT, FileRecord, FileStore, FileStoreError, StoredFile};

/// Read access to the file behind one form element.
pub trait FileSource {
    /// Name of the file as the user supplied it.
    fn filename(&self) -> &str;

    /// Copy the file to `target`, which must not exist.
    fn copy_to(&self, target: &Path) -> Result<(), FileStoreError>;

    fn content(&self) -> Result<Vec<u8>, FileStoreError>;

    /// Create a managed copy described by `record`.
    fn store_as(
        &self,
        store: &dyn FileStore,
        record: FileRecord,
    ) -> Result<StoredFile, FileStoreError>;
}

/// A file delivered with the request.
#[derive(Debug)]
pub struct UploadedFileSource<'a> {
    file: &'a UploadedFile,
}

impl<'a> UploadedFileSource<'a> {
    pub fn new(file: &'a UploadedFile) -> Self {
        Self { file }
    }
}

impl FileSource for UploadedFileSource<'_> {
    fn filename(&self) -> &str {
        &self.file.name
    }

    fn copy_to(&self, target: &Path) -> Result<(), FileStoreError> {
        fs::copy(&self.file.tmp_path, target)?;
        Ok(())
    }

    fn content(&self) -> Result<Vec<u8>, FileStoreError> {
        Ok(fs::read(&self.file.tmp_path)?)
    }

    fn store_as(
        &self,
        store: &dyn FileStore,
        record: FileRecord,
    ) -> Result<StoredFile, FileStoreError> {
        store.create_from_path(record, &self.file.tmp_path)
    }
}

/// The newest file of a draft area.
pub struct DraftFileSource<'a> {
    file: StoredFile,
    store: &'a dyn FileStore,
}

impl<'a> DraftFileSource<'a> {
    pub fn new(file: StoredFile, store: &'a dyn FileStore) -> Self {
        Self { file, store }
    }

    pub fn stored_file(&self) -> &StoredFile {
        &self.file
    }
}

impl FileSource for DraftFileSource<'_> {
    fn filename(&self) -> &str {
        self.file.filename()
    }

    fn copy_to(&self, target: &Path) -> Result<(), FileStoreError> {
        self.store.copy_content_to(&self.file, target)
    }

    fn content(&self) -> Result<Vec<u8>, FileStoreError> {
        self.store.content(&self.file)
    }

    fn store_as(
        &self,
        store: &dyn FileStore,
        record: FileRecord,
    ) -> Result<StoredFile, FileStoreError> {
        store.create_from_stored(record, &self.file)
    }
}

impl std::fmt::Debug for DraftFileSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftFileSource")
            .field("file", &self.file.id)
            .finish()
    }
}

/// Draft item id carried by a picker or manager value; 0 when absent.
pub fn draft_item_id(value: Option<&Value>) -> i64 {
    value
        .and_then(|value| clean_param(value, ParamType::Int).ok())
        .and_then(|value| value.as_i64())
        .unwrap_or(0)
}

/// Files of a user's draft area, newest first.
///
/// Store failures are logged and read as an empty area.
pub fn draft_area_files(store: &dyn FileStore, user_context_id: i64, draft_id: i64) -> Vec<StoredFile> {
    match store.area_files(user_context_id, DRAFT_COMPONENT, DRAFT_AREA, draft_id) {
        Ok(files) => files,
        Err(e) => {
            warn!(draft_id, error = %e, "failed to list draft area");
            Vec::new()
        }
    }
}

/// Outcome of checking the raw uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadCheck {
    /// Accepted uploads with cleaned file names; empty when any check failed.
    pub files: BTreeMap<String, UploadedFile>,
    pub errors: BTreeMap<String, String>,
}

impl UploadCheck {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check the raw uploads of a submission.
///
/// Empty "no file" uploads are dropped, which fails required elements.
/// Transport errors, unreadable temp files, names that clean to nothing and
/// duplicate names are reported. Uploads for elements that are not plain
/// file inputs are dropped silently.
pub fn validate_uploads(model: &FormModel, uploads: &BTreeMap<String, UploadedFile>) -> UploadCheck {
    let mut check = UploadCheck::default();
    let mut seen = BTreeSet::new();

    for (name, upload) in uploads {
        if upload.error == UploadError::NoFile && upload.size == 0 {
            if model.is_element_required(name) {
                check.errors.insert(name.clone(), "Required".to_string());
            }
            continue;
        }
        if upload.error != UploadError::Ok {
            check
                .errors
                .insert(name.clone(), upload.error.message().to_string());
            continue;
        }
        if !upload.tmp_path.is_file() {
            warn!(element = %name, path = %upload.tmp_path.display(), "uploaded temp file is missing");
            check.errors.insert(name.clone(), "Error".to_string());
            continue;
        }
        let is_file_input = model
            .element(name)
            .is_some_and(|el| matches!(el.element_type, ElementType::File));
        if !is_file_input {
            debug!(element = %name, "dropping upload for an element that does not take files");
            continue;
        }

        let cleaned = clean_param(&Value::String(upload.name.clone()), ParamType::File)
            .map(|value| scalar_to_string(&value))
            .unwrap_or_default();
        if cleaned.is_empty() {
            check.errors.insert(name.clone(), "Error".to_string());
            continue;
        }
        if !seen.insert(cleaned.clone()) {
            check.errors.insert(name.clone(), "Error".to_string());
            continue;
        }

        let mut accepted = upload.clone();
        accepted.name = cleaned;
        check.files.insert(name.clone(), accepted);
    }

    if !check.errors.is_empty() {
        check.files.clear();
    }
    check
}

/// Check the draft areas behind file pickers and file managers.
///
/// A required picker or manager needs at least one file; a manager with a
/// file limit may not hold more.
pub fn validate_draft_areas(
    model: &FormModel,
    store: &dyn FileStore,
    user_context_id: i64,
) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();

    for (name, specs) in model.rules() {
        let uses_draft = model
            .element(name)
            .is_some_and(|el| el.element_type.uses_draft_area());
        if !uses_draft {
            continue;
        }
        for spec in specs.iter().filter(|spec| spec.rule == Rule::Required) {
            let draft_id = draft_item_id(model.submit_value(name));
            if draft_area_files(store, user_context_id, draft_id).is_empty() {
                errors.insert(name.clone(), spec.message.clone());
            }
        }
    }

    for element in model.elements() {
        let ElementType::FileManager { max_files, .. } = element.element_type else {
            continue;
        };
        if max_files == 0 {
            continue;
        }
        let draft_id = draft_item_id(model.current_value(element).as_ref());
        let count = draft_area_files(store, user_context_id, draft_id).len();
        if count > max_files {
            errors.insert(
                element.name.clone(),
                format!("Maximum number of files ({max_files}) exceeded"),
            );
        }
    }

    errors
}
