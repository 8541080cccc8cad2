//! Request snapshots and submission recognition.
//!
//! A [`RequestSnapshot`] is captured once per request and never changes. A
//! form only treats it as a submission of itself when the marker field
//! `_qf__<identifier>` is `1`; the sesskey is checked after that.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::csrf::{SESSKEY_FIELD, SessKey};
use super::error::FormError;
use super::param::scalar_to_string;
use super::values;

/// HTTP method a form is submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMethod {
    Get,
    #[default]
    Post,
}

impl FormMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            FormMethod::Get => "get",
            FormMethod::Post => "post",
        }
    }
}

/// Transport status of one uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadError {
    #[default]
    Ok,
    /// Larger than the server-wide limit.
    IniSize,
    /// Larger than the form's own limit.
    FormSize,
    /// Only part of the file arrived.
    Partial,
    /// The field was submitted without a file.
    NoFile,
    NoTmpDir,
    CantWrite,
    /// Rejected by a server extension or filter.
    Extension,
}

impl UploadError {
    /// Numeric code as used by upload handlers.
    pub fn code(self) -> u8 {
        match self {
            UploadError::Ok => 0,
            UploadError::IniSize => 1,
            UploadError::FormSize => 2,
            UploadError::Partial => 3,
            UploadError::NoFile => 4,
            UploadError::NoTmpDir => 6,
            UploadError::CantWrite => 7,
            UploadError::Extension => 8,
        }
    }

    /// Human readable message for a failed upload.
    pub fn message(self) -> &'static str {
        match self {
            UploadError::Ok => "The file was uploaded successfully",
            UploadError::IniSize | UploadError::FormSize => {
                "The uploaded file exceeds the maximum allowed size"
            }
            UploadError::Partial => "The file was only partially uploaded",
            UploadError::NoFile => "No file was uploaded",
            UploadError::NoTmpDir => "Missing a temporary folder for uploads",
            UploadError::CantWrite => "Failed to write the file to disk",
            UploadError::Extension => "File upload stopped by extension",
        }
    }
}

/// A raw, transient upload: a file the HTTP layer wrote to a temp path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Client-supplied file name.
    pub name: String,
    pub tmp_path: PathBuf,
    pub size: u64,
    #[serde(default)]
    pub error: UploadError,
}

impl UploadedFile {
    /// Successful upload stored at `tmp_path`.
    pub fn new(name: impl Into<String>, tmp_path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            name: name.into(),
            tmp_path: tmp_path.into(),
            size,
            error: UploadError::Ok,
        }
    }

    /// A file field submitted without any file.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            tmp_path: PathBuf::new(),
            size: 0,
            error: UploadError::NoFile,
        }
    }

    /// Same upload with a transport error.
    pub fn with_error(mut self, error: UploadError) -> Self {
        self.error = error;
        self
    }
}

/// Immutable view of one HTTP request's parameters and uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSnapshot {
    pub method: FormMethod,
    pub query: Map<String, Value>,
    pub body: Map<String, Value>,
    pub files: BTreeMap<String, UploadedFile>,
}

impl RequestSnapshot {
    /// An empty request.
    pub fn new(method: FormMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Build a snapshot from a raw query string and url-encoded body.
    pub fn from_urlencoded(method: FormMethod, query: &str, body: &str) -> Self {
        Self {
            method,
            query: values::parse_urlencoded(query),
            body: values::parse_urlencoded(body),
            files: BTreeMap::new(),
        }
    }

    /// Attach an upload under a field name.
    pub fn with_file(mut self, name: impl Into<String>, file: UploadedFile) -> Self {
        self.files.insert(name.into(), file);
        self
    }

    pub fn with_files(mut self, files: BTreeMap<String, UploadedFile>) -> Self {
        self.files.extend(files);
        self
    }

    /// Simulate a submission of the form `identifier`.
    ///
    /// The marker and sesskey are injected so the form recognizes the data as
    /// its own. GET data goes into the query, POST data into the body.
    pub fn mock_submit(
        data: Map<String, Value>,
        files: BTreeMap<String, UploadedFile>,
        method: FormMethod,
        identifier: &str,
        sesskey: &SessKey,
    ) -> Self {
        let mut payload = data;
        payload.insert(SESSKEY_FIELD.to_string(), Value::String(sesskey.as_str().to_string()));
        payload.insert(marker_name(identifier), Value::from(1));

        let mut snapshot = Self::new(method).with_files(files);
        match method {
            FormMethod::Get => snapshot.query = payload,
            FormMethod::Post => snapshot.body = payload,
        }
        snapshot
    }

    /// A single request parameter, body first then query.
    ///
    /// This is what form definitions read while building themselves (repeat
    /// counters, expanded section state).
    pub fn param(&self, name: &str) -> Option<&Value> {
        values::lookup(&self.body, name).or_else(|| values::lookup(&self.query, name))
    }
}

/// Name of the hidden field marking a submission of `identifier`.
pub fn marker_name(identifier: &str) -> String {
    format!("_qf__{identifier}")
}

/// Values and files recognized as a submission of one form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    pub values: Map<String, Value>,
    pub files: BTreeMap<String, UploadedFile>,
}

impl Submission {
    /// Extract this form's submission from a request.
    ///
    /// Returns an empty submission when the marker is missing. A recognized
    /// submission without a matching sesskey is rejected with
    /// [`FormError::InvalidSesskey`].
    pub fn import(
        method: FormMethod,
        identifier: &str,
        snapshot: &RequestSnapshot,
        override_payload: Option<&Map<String, Value>>,
        sesskey: &SessKey,
    ) -> Result<Self, FormError> {
        let payload = match override_payload {
            Some(data) if !data.is_empty() => data.clone(),
            _ => match method {
                FormMethod::Post => snapshot.body.clone(),
                FormMethod::Get => {
                    let mut merged = snapshot.query.clone();
                    values::merge(&mut merged, &snapshot.body);
                    merged
                }
            },
        };

        let marker = marker_name(identifier);
        let recognized = payload
            .get(&marker)
            .is_some_and(|value| scalar_to_string(value) == "1");
        if !recognized {
            debug!(form = %identifier, "no submission marker in request");
            return Ok(Self::default());
        }

        let submitted_key = payload
            .get(SESSKEY_FIELD)
            .map(scalar_to_string)
            .unwrap_or_default();
        if !sesskey.confirm(&submitted_key) {
            warn!(form = %identifier, "submission rejected: sesskey mismatch");
            return Err(FormError::InvalidSesskey);
        }

        debug!(
            form = %identifier,
            fields = payload.len(),
            files = snapshot.files.len(),
            "submission recognized"
        );
        Ok(Self {
            values: payload,
            files: snapshot.files.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.files.is_empty()
    }
}
