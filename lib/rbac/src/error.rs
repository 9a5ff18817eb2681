//! RBAC client error types.

use std::fmt;

/// Errors from RBAC service operations.
#[derive(Debug)]
pub enum RbacError {
    /// The requested user or group does not exist.
    NotFound {
        /// What was looked up.
        entity: String,
    },
    /// Failed to reach the RBAC service.
    ConnectionFailed {
        /// Error details.
        details: String,
    },
    /// The RBAC service rejected or failed the request.
    RequestFailed {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for RbacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity } => {
                write!(f, "{entity} not found in RBAC service")
            }
            Self::ConnectionFailed { details } => {
                write!(f, "failed to connect to RBAC service: {details}")
            }
            Self::RequestFailed { details } => {
                write!(f, "RBAC request failed: {details}")
            }
        }
    }
}

impl std::error::Error for RbacError {}
