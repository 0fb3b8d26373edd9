//! Error types for this library

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("An entry with the same key already exists in the table")]
    AlreadyExists,
    #[error("The binding still has sessions attached")]
    SessionsAttached,
    #[error("The handle refers to an entry that no longer exists")]
    StaleHandle,
    #[error("The session's local endpoints do not match its binding")]
    BindingMismatch,
}

/// Result type for `rfc6146`
pub type Result<T> = std::result::Result<T, Error>;
