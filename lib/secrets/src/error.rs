//! Secret storage error types.

use std::fmt;

/// Errors from secret storage and M2M token operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// No secret is stored at the given location.
    NotFound {
        /// The `service/name` location that was resolved.
        location: String,
    },
    /// The backing store failed.
    Backend { details: String },
    /// The store does not support the operation (e.g. writing to a
    /// read-only backend).
    Unsupported { details: String },
    /// A presented M2M token did not match the stored secret.
    ValidationFailed,
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { location } => {
                write!(f, "no secret stored at '{location}'")
            }
            Self::Backend { details } => {
                write!(f, "secret store error: {details}")
            }
            Self::Unsupported { details } => {
                write!(f, "unsupported secret store operation: {details}")
            }
            Self::ValidationFailed => {
                write!(f, "presented token does not match stored secret")
            }
        }
    }
}

impl std::error::Error for SecretError {}
