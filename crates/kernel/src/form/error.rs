//! Form pipeline error types.
//!
//! Field validation failures are not errors: they are returned as
//! `field -> message` maps. The variants here are either integrity failures
//! (a forged or replayed submission) or programming mistakes in a form
//! definition.

use thiserror::Error;

use crate::file::FileStoreError;

/// Errors raised while building or processing a form.
#[derive(Debug, Error)]
pub enum FormError {
    /// A submission was recognized but carried no valid sesskey.
    #[error("invalid sesskey: the form submission could not be verified")]
    InvalidSesskey,

    /// A form definition or caller used the API incorrectly.
    #[error("coding error: {0}")]
    Coding(String),

    /// A named element does not exist in the form.
    #[error("form '{form}': element '{element}' does not exist")]
    UnknownElement { form: String, element: String },

    /// A validation rule was declared with arguments it can not use.
    #[error("element '{element}': invalid '{rule}' rule: {details}")]
    InvalidRule {
        element: String,
        rule: String,
        details: String,
    },

    /// The managed file store failed.
    #[error(transparent)]
    Store(#[from] FileStoreError),
}

impl FormError {
    /// Whether this error must terminate the request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FormError::InvalidSesskey)
    }
}
