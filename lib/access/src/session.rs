//! Console session records.
//!
//! A session row holds the active principal's token triple plus, while an
//! operator is impersonating another user, the operator's original triple.
//! The browser cookie carries only the session ID; tokens never leave the
//! server.

use chrono::{DateTime, Utc};
use gatehouse_core::SessionId;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// An ID/access/refresh token triple for one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenSet {
    /// Creates a token triple.
    #[must_use]
    pub fn new(
        id_token: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Returns true if no token in the triple is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_token.is_empty() && self.access_token.is_empty() && self.refresh_token.is_empty()
    }
}

/// Marker persisted in the impersonator ID-token column while the federated
/// re-login that produces the impersonated user's tokens is in flight.
const PENDING_MARKER: &str = "requesting-token";

/// The impersonation state of a session.
///
/// Exactly three states are representable: no impersonation, an impersonation
/// that has been requested but whose re-login has not completed, and an
/// active impersonation holding the original operator's token triple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Impersonation {
    /// The session's active triple belongs to the logged-in operator.
    #[default]
    None,
    /// An impersonation was requested; the re-login has not completed yet.
    Pending,
    /// The active triple belongs to the impersonated user; this holds the
    /// original operator's triple for the eventual revert.
    Active(TokenSet),
}

impl Impersonation {
    /// Returns true if an impersonation is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// Returns true if an impersonation was requested but not completed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns the operator's token triple when an impersonation is active.
    #[must_use]
    pub fn operator_tokens(&self) -> Option<&TokenSet> {
        match self {
            Self::Active(tokens) => Some(tokens),
            _ => None,
        }
    }

    /// Encodes to the three stored token columns.
    #[must_use]
    pub fn to_stored(&self) -> (String, String, String) {
        match self {
            Self::None => (String::new(), String::new(), String::new()),
            Self::Pending => (PENDING_MARKER.to_string(), String::new(), String::new()),
            Self::Active(tokens) => (
                tokens.id_token.clone(),
                tokens.access_token.clone(),
                tokens.refresh_token.clone(),
            ),
        }
    }

    /// Decodes from the three stored token columns.
    #[must_use]
    pub fn from_stored(id_token: String, access_token: String, refresh_token: String) -> Self {
        if id_token.is_empty() {
            Self::None
        } else if id_token == PENDING_MARKER {
            Self::Pending
        } else {
            Self::Active(TokenSet {
                id_token,
                access_token,
                refresh_token,
            })
        }
    }
}

/// Outcome of installing a token triple from a login callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInstall {
    /// A plain login into a session with no tokens.
    Login,
    /// A pending impersonation completed: the previous triple was preserved
    /// as the operator's and the new triple belongs to the impersonated user.
    ImpersonationStarted,
    /// The session already held tokens but no impersonation was pending; the
    /// old triple was overwritten. Callers log this.
    ReplacedUnexpectedly,
}

/// A console session row.
///
/// Owned by the session store; mutated only through the session manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    id: SessionId,
    created: Option<DateTime<Utc>>,
    state: Option<String>,
    tokens: TokenSet,
    impersonation: Impersonation,
}

impl Session {
    /// Creates a new, unsaved session.
    ///
    /// `created` stays unset until the row is first persisted; an unset value
    /// is the anonymous starting state, not an error.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            created: None,
            state: None,
            tokens: TokenSet::default(),
            impersonation: Impersonation::None,
        }
    }

    /// Reconstitutes a session from storage.
    #[must_use]
    pub fn from_stored(
        id: SessionId,
        created: DateTime<Utc>,
        state: Option<String>,
        tokens: TokenSet,
        impersonation: Impersonation,
    ) -> Self {
        Self {
            id,
            created: Some(created),
            state,
            tokens,
            impersonation,
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns when the session row was first persisted, if it has been.
    #[must_use]
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    /// Returns true if the session has never been persisted (anonymous).
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.created.is_none()
    }

    /// Stamps the creation time on first persist. Stores call this.
    pub fn mark_created(&mut self, now: DateTime<Utc>) {
        if self.created.is_none() {
            self.created = Some(now);
        }
    }

    /// Returns the login-state value bound to the session, if any.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Sets the login-state value.
    pub fn set_state(&mut self, state: Option<String>) {
        self.state = state;
    }

    /// Returns the active principal's token triple.
    #[must_use]
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    /// Returns the impersonation state.
    #[must_use]
    pub fn impersonation(&self) -> &Impersonation {
        &self.impersonation
    }

    /// Records that an impersonation has been requested.
    ///
    /// This is persisted *before* the federated re-login starts so that a
    /// concurrent duplicate request observes the pending state instead of
    /// racing. Fails when an impersonation is already active; impersonation
    /// is single-level.
    pub fn request_impersonation(&mut self) -> Result<(), SessionError> {
        if self.impersonation.is_active() {
            return Err(SessionError::AlreadyImpersonating);
        }
        self.impersonation = Impersonation::Pending;
        Ok(())
    }

    /// Clears a pending impersonation request.
    ///
    /// Called when the downstream exchange fails, so an orphaned pending
    /// marker cannot permanently block future impersonation attempts.
    pub fn cancel_pending_impersonation(&mut self) {
        if self.impersonation.is_pending() {
            self.impersonation = Impersonation::None;
        }
    }

    /// Installs a fresh token triple from a login callback.
    ///
    /// When an impersonation is pending and the session already held tokens,
    /// the outgoing triple is preserved as the operator's.
    pub fn install_tokens(&mut self, tokens: TokenSet) -> TokenInstall {
        let outcome = if self.tokens.id_token.is_empty() {
            TokenInstall::Login
        } else if self.impersonation.is_pending() {
            self.impersonation = Impersonation::Active(std::mem::take(&mut self.tokens));
            TokenInstall::ImpersonationStarted
        } else {
            TokenInstall::ReplacedUnexpectedly
        };
        self.tokens = tokens;
        outcome
    }

    /// Reverts an active impersonation: the operator's triple becomes the
    /// active triple and the impersonation state is cleared.
    pub fn revert_impersonation(&mut self) -> Result<(), SessionError> {
        match std::mem::take(&mut self.impersonation) {
            Impersonation::Active(tokens) => {
                self.tokens = tokens;
                Ok(())
            }
            other => {
                self.impersonation = other;
                Err(SessionError::NotImpersonating)
            }
        }
    }
}
