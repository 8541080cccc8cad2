//! Form handling.
//!
//! A form is declared by a [`FormDefinition`] and lives for one request in a
//! [`FormSession`]:
//! - the submission is recognized by its `_qf__<identifier>` marker and
//!   verified against the session's sesskey
//! - submitted values are cleaned with their declared [`ParamType`]
//! - validation runs at most once: built-in rules, uploads, draft areas and
//!   the definition's own hook
//! - validated data is exported with constants applied and frozen values
//!   protected

pub mod client_script;
pub mod csrf;
pub mod error;
pub mod files;
pub mod model;
pub mod param;
pub mod render;
pub mod repeat;
pub mod rules;
pub mod sanitize;
pub mod session;
pub mod submission;
pub mod types;
pub mod values;

pub use csrf::{SESSKEY_FIELD, SessKey};
pub use error::FormError;
pub use files::{DraftFileSource, FileSource, UploadedFileSource};
pub use model::{Condition, FormModel, JsInitCall, JsModule, LockOptions, RuleSpec};
pub use param::{ParamType, clean_param};
pub use render::RenderedForm;
pub use repeat::{
    DEFAULT_MAX_REPEATS, RepeatControls, RepeatInstance, RepeatOptions, RepeatTemplate,
};
pub use rules::{CompareOp, Rule, RunAt};
pub use sanitize::{CleanType, TypeTable, sanitize};
pub use session::{FormDefinition, FormEnvironment, FormOptions, FormSession};
pub use submission::{
    FormMethod, RequestSnapshot, Submission, UploadError, UploadedFile, marker_name,
};
pub use types::{ElementType, FormElement, HelpButton};
