use thiserror::Error;

/// Errors produced when parsing untrusted input into domain types.
///
/// These are validation failures, not I/O failures; the HTTP boundary maps
/// them to 422 responses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The value is not a 64-character lowercase hex SHA-256 digest.
    #[error("invalid object id {0:?}: expected 64 lowercase hex characters")]
    InvalidOid(String),

    /// The value is not an acceptable repository path.
    #[error("invalid repository name {0:?}")]
    InvalidRepo(String),

    /// The value is neither `"download"` nor `"upload"`.
    #[error("invalid action {0:?}: expected \"download\" or \"upload\"")]
    InvalidAction(String),
}
