//! Formwork test utilities.
//!
//! Helpers for integration testing: closure-backed form definitions, a
//! throwaway file store and environment, and upload fixtures.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tempfile::TempDir;

use formwork_kernel::file::{FileStore, LocalFileStore};
use formwork_kernel::form::{
    FormDefinition, FormEnvironment, FormError, FormMethod, FormModel, FormOptions, FormSession,
    RequestSnapshot, SessKey, UploadedFile,
};

/// Sesskey used by every test environment.
pub const TEST_SESSKEY: &str = "0123456789abcdef0123456789abcdef";

/// User and context the test environment acts for.
pub const TEST_USER_ID: i64 = 2;
pub const TEST_USER_CONTEXT_ID: i64 = 5;

type DefinitionFn = Box<dyn Fn(&mut FormModel) -> Result<(), FormError> + Send + Sync>;
type ValidationFn = Box<
    dyn Fn(&Map<String, Value>, &BTreeMap<String, PathBuf>) -> BTreeMap<String, String>
        + Send
        + Sync,
>;

/// A form definition built from closures.
pub struct TestForm {
    identifier: String,
    definition: DefinitionFn,
    validation: Option<ValidationFn>,
}

impl TestForm {
    pub fn new(
        identifier: &str,
        definition: impl Fn(&mut FormModel) -> Result<(), FormError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            definition: Box::new(definition),
            validation: None,
        }
    }

    /// Set the custom validation hook.
    pub fn with_validation(
        mut self,
        validation: impl Fn(&Map<String, Value>, &BTreeMap<String, PathBuf>) -> BTreeMap<String, String>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.validation = Some(Box::new(validation));
        self
    }
}

impl FormDefinition for TestForm {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn definition(&self, form: &mut FormModel) -> Result<(), FormError> {
        (self.definition)(form)
    }

    fn validation(
        &self,
        data: &Map<String, Value>,
        files: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, String> {
        self.validation
            .as_ref()
            .map_or_else(BTreeMap::new, |validate| validate(data, files))
    }
}

impl std::fmt::Debug for TestForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestForm")
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// A form environment backed by a temporary directory.
///
/// The directory is removed when this is dropped.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<LocalFileStore>,
    pub env: FormEnvironment,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_developer_mode(false)
    }

    pub fn with_developer_mode(developer_mode: bool) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = Arc::new(LocalFileStore::new(dir.path().join("filestore")));
        let env = FormEnvironment {
            sesskey: test_sesskey(),
            developer_mode,
            temp_dir: dir.path().join("temp"),
            user_context_id: TEST_USER_CONTEXT_ID,
            user_id: TEST_USER_ID,
            store: Arc::clone(&store) as Arc<dyn FileStore>,
        };
        Self { dir, store, env }
    }

    /// Build a POST form session for `definition`.
    pub fn session<D: FormDefinition>(
        &self,
        definition: D,
        request: RequestSnapshot,
    ) -> Result<FormSession<D>, FormError> {
        FormSession::new(
            definition,
            request,
            FormOptions::new("/test"),
            self.env.clone(),
        )
    }

    /// Write `content` as an upload in flight.
    pub fn upload(&self, name: &str, content: &[u8]) -> UploadedFile {
        write_upload(&self.dir.path().join("uploads"), name, content)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// The sesskey every test environment confirms.
pub fn test_sesskey() -> SessKey {
    SessKey::from_string(TEST_SESSKEY)
}

/// Write an upload fixture below `dir`.
pub fn write_upload(dir: &Path, name: &str, content: &[u8]) -> UploadedFile {
    fs::create_dir_all(dir).expect("failed to create upload dir");
    let path = dir.join(format!("upload-{name}"));
    fs::write(&path, content).expect("failed to write upload");
    UploadedFile::new(name, path, content.len() as u64)
}

/// Build a JSON object from pairs.
pub fn data<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// A POST submission of `identifier` carrying the test sesskey.
pub fn submit(identifier: &str, values: Map<String, Value>) -> RequestSnapshot {
    RequestSnapshot::mock_submit(
        values,
        BTreeMap::new(),
        FormMethod::Post,
        identifier,
        &test_sesskey(),
    )
}

/// Like [`submit`], with uploads.
pub fn submit_with_files(
    identifier: &str,
    values: Map<String, Value>,
    files: BTreeMap<String, UploadedFile>,
) -> RequestSnapshot {
    RequestSnapshot::mock_submit(values, files, FormMethod::Post, identifier, &test_sesskey())
}
