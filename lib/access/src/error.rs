//! Error types for the access crate.
//!
//! Authentication failures (no session, expired credential) are normal
//! operating conditions and are logged at warning level by callers; the
//! variants here exist so callers can tell those apart from genuine faults.

use std::fmt;

/// Errors from decoding token claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    /// The token does not decode into a claim payload.
    Malformed { reason: String },
    /// The subject claim is not a UUID.
    InvalidSubject { subject: String },
}

impl fmt::Display for ClaimsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => {
                write!(f, "malformed token: {reason}")
            }
            Self::InvalidSubject { subject } => {
                write!(f, "token subject '{subject}' is not a UUID")
            }
        }
    }
}

impl std::error::Error for ClaimsError {}

/// Errors from session state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// An impersonation is already active; impersonation is single-level.
    AlreadyImpersonating,
    /// No active impersonation to revert.
    NotImpersonating,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyImpersonating => {
                write!(f, "already impersonating a user")
            }
            Self::NotImpersonating => {
                write!(f, "no impersonation session to revert")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors from parsing login-state values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The state value does not split into the expected two parts.
    Malformed { state: String },
    /// The redirect component does not URL-decode.
    BadRedirect { reason: String },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { state } => {
                write!(f, "malformed state: {state}")
            }
            Self::BadRedirect { reason } => {
                write!(f, "undecodable redirect in state: {reason}")
            }
        }
    }
}

impl std::error::Error for StateError {}

/// Errors from invite-key operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
    /// The invite has expired.
    Expired,
    /// The invite has already been consumed.
    AlreadyUsed,
    /// The invite is bound to a different user.
    BoundToAnotherUser,
    /// A tenant role is not one of the known roles.
    InvalidRole { role: String },
}

impl fmt::Display for InviteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "invite has expired"),
            Self::AlreadyUsed => write!(f, "invite has already been used"),
            Self::BoundToAnotherUser => {
                write!(f, "invite already used by another user")
            }
            Self::InvalidRole { role } => write!(f, "invalid role: {role}"),
        }
    }
}

impl std::error::Error for InviteError {}

/// Errors from the storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store failed.
    Backend { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { details } => {
                write!(f, "storage error: {details}")
            }
        }
    }
}

impl std::error::Error for StoreError {}
