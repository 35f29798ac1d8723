use thiserror::Error;

/// Errors that can occur in the token store.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No valid token matched the presented credentials.
    ///
    /// Deliberately carries no detail: an absent file, an expired token,
    /// and a wrong password are indistinguishable to the caller.
    #[error("unauthorized")]
    Unauthorized,

    /// The username cannot name a token file.
    #[error("invalid username {0:?}")]
    InvalidUser(String),

    /// An underlying filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The token could not be serialized.
    #[error("token serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
