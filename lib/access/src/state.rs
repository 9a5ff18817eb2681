//! Login round-trip state values.
//!
//! The OIDC `state` parameter carries a CSRF nonce bound to the session plus
//! the URL-escaped post-login redirect target, in the wire format
//! `"<nonce>#<escaped-redirect>"`. Invite logins use the same shape with a
//! fixed prefix in place of the nonce.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;

use crate::error::StateError;

/// Prefix tagging an OIDC state value as an invite login.
pub const INVITE_STATE_PREFIX: &str = "invitekey";

/// A CSRF nonce bound to a post-login redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginState {
    nonce: String,
    redirect_to: String,
}

impl LoginState {
    /// Creates a state with a fresh random nonce binding `redirect_to`.
    #[must_use]
    pub fn new(redirect_to: &str) -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self {
            nonce: URL_SAFE_NO_PAD.encode(random_bytes),
            redirect_to: redirect_to.to_string(),
        }
    }

    /// Returns the CSRF nonce.
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Returns the post-login redirect target.
    #[must_use]
    pub fn redirect_to(&self) -> &str {
        &self.redirect_to
    }

    /// Encodes to the wire format stored in the session and sent to the
    /// provider.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}#{}", self.nonce, urlencoding::encode(&self.redirect_to))
    }

    /// Parses the wire format back into its components.
    pub fn parse(raw: &str) -> Result<Self, StateError> {
        let (nonce, escaped) = split_state(raw)?;
        let redirect_to = urlencoding::decode(escaped)
            .map_err(|e| StateError::BadRedirect {
                reason: e.to_string(),
            })?
            .into_owned();
        Ok(Self {
            nonce: nonce.to_string(),
            redirect_to,
        })
    }
}

/// Encodes an invite key as an `invitekey`-prefixed state value.
#[must_use]
pub fn invite_state(key: &str) -> String {
    format!("{INVITE_STATE_PREFIX}#{key}")
}

/// Extracts the invite key from an `invitekey`-prefixed state value.
pub fn parse_invite_state(raw: &str) -> Result<&str, StateError> {
    let (prefix, key) = split_state(raw)?;
    if prefix != INVITE_STATE_PREFIX {
        return Err(StateError::Malformed {
            state: raw.to_string(),
        });
    }
    Ok(key)
}

/// Splits a state value into its two `#`-separated parts.
fn split_state(raw: &str) -> Result<(&str, &str), StateError> {
    let parts: Vec<&str> = raw.split('#').collect();
    match parts.as_slice() {
        [first, second] => Ok((first, second)),
        _ => Err(StateError::Malformed {
            state: raw.to_string(),
        }),
    }
}
