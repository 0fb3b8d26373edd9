//! Error types for this library

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("Pool has no identifiers left to borrow")]
    Exhausted,
    #[error("Identifier {0} is not available for borrowing")]
    NotFound(u16),
    #[error("Pool already holds every identifier it was built with")]
    Overflow,
    #[error("Invalid identifier range: [{min}, {max}] with stride {stride}")]
    InvalidRange { min: u16, max: u16, stride: u16 },
}

/// Result type for `num-pool`
pub type Result<T> = std::result::Result<T, Error>;
