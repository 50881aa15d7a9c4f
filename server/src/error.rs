use crate::auth::AuthError;
use kvs::KvsError;
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name to the list of problems found with it
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors surfaced by the service, the user directory and the token issuer
#[derive(Debug, Error)]
pub enum Error {
    /// The request carried no usable credential
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),
    /// Username / password pair did not match an active account
    #[error("No active account found with the given credentials")]
    InvalidCredentials,
    /// No record exists under the requested key
    #[error("Not found.")]
    NotFound {
        /// the requested key
        key: String,
    },
    /// One or more request fields are missing or malformed
    #[error("invalid request fields: {}", field_names(.0))]
    Validation(FieldErrors),
    /// The request body is not JSON
    #[error("JSON parse error - {0}")]
    MalformedBody(String),
    /// The store kept rejecting a write at its uniqueness constraint
    #[error("Conflicting writes to key {key:?}, retry the request.")]
    StorageConflict {
        /// the contended key
        key: String,
    },
    /// The record store failed
    #[error("storage failure")]
    Storage(#[from] KvsError),
    /// Anything else that is not the caller's fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A validation error for a single field
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_owned(), vec![message.into()]);
        Error::Validation(fields)
    }
}

fn field_names(fields: &FieldErrors) -> String {
    fields.keys().cloned().collect::<Vec<_>>().join(", ")
}

/// Custom Result type for the server crate
pub type Result<T> = std::result::Result<T, Error>;
