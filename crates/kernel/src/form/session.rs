//! Form lifecycle.
//!
//! A [`FormSession`] lives for one request: it builds the form from a
//! [`FormDefinition`], recognizes and cleans the submission captured in a
//! [`RequestSnapshot`], validates lazily (at most once) and hands out the
//! exported data and submitted files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::csrf::{SESSKEY_FIELD, SessKey};
use super::error::FormError;
use super::files::{self, DraftFileSource, FileSource, UploadedFileSource};
use super::model::FormModel;
use super::param::ParamType;
use super::render::{self, RenderedForm};
use super::submission::{FormMethod, RequestSnapshot, Submission, UploadedFile, marker_name};
use super::types::{ElementType, FormElement};
use super::{client_script, values};
use crate::file::{FileRecord, FileStore, StoredFile};

/// A form: its elements and its validation hooks.
pub trait FormDefinition {
    /// Stable identifier, used in the submission marker.
    ///
    /// Defaults to the type name with everything outside `[A-Za-z0-9_]`
    /// replaced by `_`.
    fn identifier(&self) -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        let short = base.rsplit("::").next().unwrap_or(base);
        short
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }

    /// Add elements, types, defaults and rules.
    fn definition(&self, form: &mut FormModel) -> Result<(), FormError>;

    /// Adjust the form once submitted data is known; runs once, before the
    /// first validation or render.
    fn definition_after_data(&self, _form: &mut FormModel) -> Result<(), FormError> {
        Ok(())
    }

    /// Custom validation over the exported data and accepted upload paths.
    ///
    /// Returns `element -> message`; empty means valid.
    fn validation(
        &self,
        _data: &Map<String, Value>,
        _files: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Request-independent services a form session needs.
#[derive(Clone)]
pub struct FormEnvironment {
    pub sesskey: SessKey,
    pub developer_mode: bool,
    /// Temporary files are written below `<temp_dir>/forms`.
    pub temp_dir: PathBuf,
    /// Context owning the current user's draft areas.
    pub user_context_id: i64,
    pub user_id: i64,
    pub store: Arc<dyn FileStore>,
}

impl std::fmt::Debug for FormEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormEnvironment")
            .field("developer_mode", &self.developer_mode)
            .field("temp_dir", &self.temp_dir)
            .field("user_context_id", &self.user_context_id)
            .finish()
    }
}

/// Per-form construction options.
#[derive(Debug, Clone)]
pub struct FormOptions {
    pub action: String,
    pub method: FormMethod,
    /// An uneditable form is frozen and never counts as submitted.
    pub editable: bool,
    pub attributes: BTreeMap<String, String>,
    /// Submission data to use instead of the request, as sent by forms
    /// submitted through AJAX.
    pub ajax_form_data: Option<Map<String, Value>>,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            action: String::new(),
            method: FormMethod::Post,
            editable: true,
            attributes: BTreeMap::new(),
            ajax_form_data: None,
        }
    }
}

impl FormOptions {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: FormMethod) -> Self {
        self.method = method;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn ajax_form_data(mut self, data: Map<String, Value>) -> Self {
        self.ajax_form_data = Some(data);
        self
    }
}

/// One form instance for one request.
pub struct FormSession<D: FormDefinition> {
    definition: D,
    identifier: String,
    model: FormModel,
    env: FormEnvironment,
    validated: Option<bool>,
    no_submit: Option<bool>,
    definition_finalized: bool,
    accepted_files: BTreeMap<String, UploadedFile>,
}

impl<D: FormDefinition> FormSession<D> {
    /// Build the form and import the submission.
    ///
    /// Fails with [`FormError::InvalidSesskey`] when the request carries this
    /// form's marker without the session's sesskey.
    pub fn new(
        definition: D,
        request: RequestSnapshot,
        options: FormOptions,
        env: FormEnvironment,
    ) -> Result<Self, FormError> {
        let identifier = definition.identifier();
        let request = Arc::new(request);
        let mut model = FormModel::new(
            &identifier,
            options.method,
            options.action,
            Arc::clone(&request),
            env.developer_mode,
        );
        model.set_attribute("autocomplete", "off");
        for (name, value) in options.attributes {
            model.set_attribute(name, value);
        }
        if !options.editable {
            model.hard_freeze(None)?;
        }

        definition.definition(&mut model)?;

        let marker = marker_name(&identifier);
        model.add_element(FormElement::hidden(SESSKEY_FIELD, ""))?;
        model.set_type(SESSKEY_FIELD, ParamType::Raw);
        model.set_default(SESSKEY_FIELD, env.sesskey.as_str());
        model.add_element(FormElement::hidden(&marker, ""))?;
        model.set_type(&marker, ParamType::Raw);
        model.set_default(&marker, 1);

        let submission = Submission::import(
            options.method,
            &identifier,
            &request,
            options.ajax_form_data.as_ref(),
            &env.sesskey,
        )?;
        model.detect_missing_set_type();
        model.update_submission(submission.values, submission.files)?;

        debug!(
            form = %identifier,
            submitted = model.is_submitted(),
            elements = model.elements().len(),
            "form session created"
        );
        Ok(Self {
            definition,
            identifier,
            model,
            env,
            validated: None,
            no_submit: None,
            definition_finalized: false,
            accepted_files: BTreeMap::new(),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn model(&self) -> &FormModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut FormModel {
        &mut self.model
    }

    /// Load existing values as defaults, for editing.
    pub fn set_data(&mut self, defaults: Map<String, Value>) {
        self.model.set_defaults(defaults);
    }

    pub fn is_submitted(&self) -> bool {
        self.model.is_submitted()
    }

    /// Whether a registered no-submit button was pressed; decided once.
    pub fn no_submit_button_pressed(&mut self) -> bool {
        if let Some(pressed) = self.no_submit {
            return pressed;
        }
        if !self.is_submitted() {
            return false;
        }
        let pressed = self.model.no_submit_buttons().iter().any(|button| {
            self.model
                .optional_param(button)
                .is_some_and(values::is_truthy)
        });
        self.no_submit = Some(pressed);
        pressed
    }

    /// Whether a registered cancel button was pressed.
    pub fn is_cancelled(&self) -> bool {
        self.is_submitted()
            && self.model.cancel_buttons().iter().any(|button| {
                self.model
                    .optional_param(button)
                    .is_some_and(values::is_truthy)
            })
    }

    fn finalize_definition(&mut self) -> Result<(), FormError> {
        if !self.definition_finalized {
            self.definition_finalized = true;
            self.definition.definition_after_data(&mut self.model)?;
        }
        Ok(())
    }

    /// Run `definition_after_data` once, then validate.
    pub fn is_validated(&mut self) -> Result<bool, FormError> {
        self.finalize_definition()?;
        Ok(self.validate_defined_fields(false))
    }

    /// Validate the form as currently defined.
    ///
    /// With a no-submit button pressed the result is `false` unless
    /// `validate_on_no_submit` is set. Otherwise the result is computed once
    /// and cached: built-in rules, raw uploads, draft areas and the custom
    /// hook must all pass. Upload and draft errors are merged with draft
    /// errors winning; custom errors win over both.
    pub fn validate_defined_fields(&mut self, validate_on_no_submit: bool) -> bool {
        if self.no_submit_button_pressed() && !validate_on_no_submit {
            return false;
        }
        if let Some(validated) = self.validated {
            return validated;
        }

        let rules_ok = self.model.validate();

        let uploads = files::validate_uploads(&self.model, self.model.submit_files());
        let draft_errors = files::validate_draft_areas(
            &self.model,
            self.env.store.as_ref(),
            self.env.user_context_id,
        );
        let mut file_errors = uploads.errors;
        file_errors.extend(draft_errors);
        let files_ok = file_errors.is_empty();
        for (element, message) in file_errors {
            self.model.set_element_error(element, message);
        }
        self.accepted_files = uploads.files;

        let data = self.model.export_values(None);
        let paths: BTreeMap<String, PathBuf> = self
            .accepted_files
            .iter()
            .map(|(name, file)| (name.clone(), file.tmp_path.clone()))
            .collect();
        let custom_errors = self.definition.validation(&data, &paths);
        let custom_ok = custom_errors.is_empty();
        for (element, message) in custom_errors {
            self.model.set_element_error(element, message);
        }

        let validated = rules_ok && files_ok && custom_ok;
        debug!(
            form = %self.identifier,
            validated,
            rules_ok,
            files_ok,
            custom_ok,
            errors = self.model.errors().len(),
            "form validated"
        );
        self.validated = Some(validated);
        validated
    }

    /// Exported data of a submitted, validated and not cancelled form.
    pub fn get_data(&mut self) -> Result<Option<Map<String, Value>>, FormError> {
        if self.is_cancelled() || !self.is_submitted() || !self.is_validated()? {
            return Ok(None);
        }
        Ok(self.exported())
    }

    /// Exported data of a submitted form, without validating it.
    pub fn get_submitted_data(&self) -> Option<Map<String, Value>> {
        if !self.is_submitted() {
            return None;
        }
        self.exported()
    }

    fn exported(&self) -> Option<Map<String, Value>> {
        let mut data = self.model.export_values(None);
        data.remove(SESSKEY_FIELD);
        data.remove(&marker_name(&self.identifier));
        (!data.is_empty()).then_some(data)
    }

    /// `submitted && validated`, the precondition of most file accessors.
    fn ready_for_files(&mut self) -> Result<bool, FormError> {
        Ok(self.is_submitted() && self.is_validated()?)
    }

    /// The file behind an element: the newest draft file for pickers and
    /// managers, the accepted upload otherwise.
    fn file_source(&self, name: &str) -> Option<Box<dyn FileSource + '_>> {
        match self.model.element(name) {
            Some(element) if element.element_type.uses_draft_area() => {
                let file = self.draft_files(name).into_iter().next()?;
                Some(Box::new(DraftFileSource::new(file, self.env.store.as_ref())))
            }
            _ => self
                .accepted_files
                .get(name)
                .map(|file| Box::new(UploadedFileSource::new(file)) as Box<dyn FileSource + '_>),
        }
    }

    fn draft_files(&self, name: &str) -> Vec<StoredFile> {
        let exported = self.model.export_values(Some(&[name]));
        let draft_id = files::draft_item_id(values::lookup(&exported, name));
        if draft_id == 0 {
            return Vec::new();
        }
        files::draft_area_files(self.env.store.as_ref(), self.env.user_context_id, draft_id)
    }

    /// Name of the file submitted through `name`, or through the first
    /// accepted upload.
    pub fn get_new_filename(&mut self, name: Option<&str>) -> Result<Option<String>, FormError> {
        if !self.ready_for_files()? {
            return Ok(None);
        }
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            Some(_) => return Ok(None),
            None => match self.accepted_files.keys().next() {
                Some(first) => first.clone(),
                None => return Ok(None),
            },
        };
        Ok(self
            .file_source(&name)
            .map(|source| source.filename().to_string()))
    }

    /// Copy the file submitted through `name` to `path`.
    ///
    /// An existing target is replaced only with `overwrite`.
    pub fn save_file(&mut self, name: &str, path: &Path, overwrite: bool) -> Result<bool, FormError> {
        if !self.ready_for_files()? {
            return Ok(false);
        }
        if path.exists() {
            if !overwrite {
                return Ok(false);
            }
            if let Err(e) = fs::remove_file(path) {
                warn!(form = %self.identifier, path = %path.display(), error = %e, "failed to replace existing file");
                return Ok(false);
            }
        }

        let Some(source) = self.file_source(name) else {
            return Ok(false);
        };
        match source.copy_to(path) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(form = %self.identifier, element = %name, error = %e, "failed to save submitted file");
                Ok(false)
            }
        }
    }

    /// Copy the file submitted through `name` to a new temporary file.
    ///
    /// The caller owns the returned file.
    pub fn save_temp_file(&mut self, name: &str) -> Result<Option<PathBuf>, FormError> {
        if self.get_new_filename(Some(name))?.is_none() {
            return Ok(None);
        }
        let dir = self.env.temp_dir.join("forms");
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(path = %dir.display(), error = %e, "failed to create temp directory");
            return Ok(None);
        }
        let path = dir.join(format!("tempup_{}", Uuid::now_v7().simple()));
        if !self.save_file(name, &path, true)? {
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Files in the draft area behind a picker or manager.
    ///
    /// Only requires the form to be submitted.
    pub fn get_draft_files(&self, name: &str) -> Option<Vec<StoredFile>> {
        if !self.is_submitted() {
            return None;
        }
        let uses_draft = self
            .model
            .element(name)
            .is_some_and(|el| el.element_type.uses_draft_area());
        if !uses_draft {
            return None;
        }
        let files = self.draft_files(name);
        (!files.is_empty()).then_some(files)
    }

    /// Save the file submitted through `name` into the managed store.
    ///
    /// An empty `target.filename` takes the submitted name; a missing user
    /// takes the session's user. With `overwrite` an existing file at the
    /// target is deleted first. File managers hold several files and are
    /// not saved one at a time.
    pub fn save_stored_file(
        &mut self,
        name: &str,
        mut target: FileRecord,
        overwrite: bool,
    ) -> Result<Option<StoredFile>, FormError> {
        if !self.ready_for_files()? {
            return Ok(None);
        }
        if self
            .model
            .element(name)
            .is_some_and(|el| matches!(el.element_type, ElementType::FileManager { .. }))
        {
            debug!(form = %self.identifier, element = %name, "file managers are saved by draft area");
            return Ok(None);
        }

        let store = Arc::clone(&self.env.store);
        let Some(source) = self.file_source(name) else {
            return Ok(None);
        };
        if target.filename.is_empty() {
            target.filename = source.filename().to_string();
        }
        if target.user_id.is_none() {
            target.user_id = Some(self.env.user_id);
        }

        if overwrite {
            match store.get_file(&target) {
                Ok(Some(existing)) => {
                    if let Err(e) = store.delete(&existing) {
                        warn!(pathname = %target.pathname(), error = %e, "failed to delete file before overwrite");
                        return Ok(None);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(pathname = %target.pathname(), error = %e, "failed to look up existing file");
                    return Ok(None);
                }
            }
        }

        match source.store_as(store.as_ref(), target) {
            Ok(stored) => {
                info!(form = %self.identifier, element = %name, id = stored.id, "submitted file stored");
                Ok(Some(stored))
            }
            Err(e) => {
                warn!(form = %self.identifier, element = %name, error = %e, "failed to store submitted file");
                Ok(None)
            }
        }
    }

    /// Content of the file submitted through `name`.
    pub fn get_file_content(&mut self, name: &str) -> Result<Option<Vec<u8>>, FormError> {
        if !self.ready_for_files()? {
            return Ok(None);
        }
        let Some(source) = self.file_source(name) else {
            return Ok(None);
        };
        match source.content() {
            Ok(content) => Ok(Some(content)),
            Err(e) => {
                warn!(form = %self.identifier, element = %name, error = %e, "failed to read submitted file");
                Ok(None)
            }
        }
    }

    /// JavaScript expression selecting the element to focus.
    ///
    /// The first element with an error wins; otherwise `name`, or the first
    /// element when no name is given. Empty when nothing qualifies.
    pub fn focus(&self, name: Option<&str>) -> String {
        let errors = self.model.errors();
        let mut target = name.filter(|name| !name.is_empty()).map(str::to_string);

        if !errors.is_empty() || target.is_none() {
            let first = self
                .model
                .elements()
                .iter()
                .filter(|el| !el.name.is_empty())
                .filter(|el| errors.is_empty() || errors.contains_key(&el.name))
                .find_map(|el| self.model.element_names_recursive(&el.name).into_iter().next());
            if first.is_some() {
                target = first;
            }
        }

        match target {
            Some(name) => format!("forms['{}'].elements['{name}']", self.model.id()),
            None => String::new(),
        }
    }

    /// Render tree of the form.
    pub fn render(&mut self) -> Result<RenderedForm, FormError> {
        self.finalize_definition()?;
        self.model.resolve_sections()?;
        Ok(render::render(&self.model))
    }

    pub fn validation_script(&self) -> String {
        client_script::validation_script(&self.model)
    }
}

impl<D: FormDefinition> std::fmt::Debug for FormSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("identifier", &self.identifier)
            .field("validated", &self.validated)
            .finish()
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::file::LocalFileStore;

    struct PlainForm;

    impl FormDefinition for PlainForm {
        fn definition(&self, form: &mut FormModel) -> Result<(), FormError> {
            form.add_element(FormElement::text("title"))?;
            form.set_type("title", ParamType::Text);
            Ok(())
        }
    }

    mod nested {
        pub struct Wrapper<T>(pub T);
    }

    impl<T> FormDefinition for nested::Wrapper<T> {
        fn definition(&self, _form: &mut FormModel) -> Result<(), FormError> {
            Ok(())
        }
    }

    fn env(dir: &Path) -> FormEnvironment {
        FormEnvironment {
            sesskey: SessKey::from_string("abc123"),
            developer_mode: true,
            temp_dir: dir.to_path_buf(),
            user_context_id: 5,
            user_id: 2,
            store: Arc::new(LocalFileStore::new(dir.join("store"))),
        }
    }

    #[test]
    fn test_identifier_from_type_name() {
        assert_eq!(PlainForm.identifier(), "PlainForm");
        assert_eq!(nested::Wrapper(1u8).identifier(), "Wrapper");
    }

    #[test]
    fn test_adds_sesskey_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let session = FormSession::new(
            PlainForm,
            RequestSnapshot::new(FormMethod::Post),
            FormOptions::new("/plain"),
            env(dir.path()),
        )
        .unwrap();
        assert!(session.model().element_exists("sesskey"));
        assert!(session.model().element_exists("_qf__PlainForm"));
        assert_eq!(session.model().attributes()["autocomplete"], "off");
        assert!(!session.is_submitted());
    }

    #[test]
    fn test_uneditable_form_is_never_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(dir.path());
        let mut data = Map::new();
        data.insert("title".to_string(), Value::from("x"));
        let request = RequestSnapshot::mock_submit(
            data,
            BTreeMap::new(),
            FormMethod::Post,
            "PlainForm",
            &env.sesskey,
        );
        let mut session =
            FormSession::new(PlainForm, request, FormOptions::new("/plain").read_only(), env)
                .unwrap();
        assert!(!session.is_submitted());
        assert!(session.model().element("title").unwrap().frozen);
        assert_eq!(session.get_data().unwrap(), None);
    }

    #[test]
    fn test_focus() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FormSession::new(
            PlainForm,
            RequestSnapshot::new(FormMethod::Post),
            FormOptions::new("/plain"),
            env(dir.path()),
        )
        .unwrap();
        assert_eq!(session.focus(None), "forms['mform_PlainForm'].elements['title']");
        assert_eq!(
            session.focus(Some("sesskey")),
            "forms['mform_PlainForm'].elements['sesskey']"
        );
        session.model_mut().set_element_error("title", "Bad");
        assert_eq!(
            session.focus(Some("sesskey")),
            "forms['mform_PlainForm'].elements['title']"
        );
    }
}
