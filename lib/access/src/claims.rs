//! ID-token claim parsing.
//!
//! The console trusts the tokens stored in its own session rows: signatures
//! were verified by the identity provider when the tokens were issued, so
//! claims are decoded here without re-verification. Expiry checks are pure
//! computation on the `exp` claim and never touch the network.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use gatehouse_core::UserId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ClaimsError;

/// Claims decoded from a token issued by the platform identity provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The subject claim. The platform IDP always issues UUID subjects.
    #[serde(rename = "sub", default)]
    pub subject: String,
    /// The issuer URL, which is the tenant URL the login went through.
    #[serde(rename = "iss", default)]
    pub issuer: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub picture: String,
    /// Expiry as a Unix timestamp.
    #[serde(rename = "exp", default)]
    pub expiration: i64,
}

impl TokenClaims {
    /// Decodes claims from a JWT without verifying its signature.
    pub fn decode_unverified(token: &str) -> Result<Self, ClaimsError> {
        // JWT is base64url(header).base64url(payload).signature
        let mut parts = token.split('.');
        let _header = parts.next();
        let payload = parts.next().ok_or_else(|| ClaimsError::Malformed {
            reason: "missing payload segment".to_string(),
        })?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| ClaimsError::Malformed {
                reason: format!("payload is not base64url: {e}"),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Malformed {
            reason: format!("payload is not a claim object: {e}"),
        })
    }

    /// Returns when the token expires.
    ///
    /// A missing or unrepresentable `exp` claim is treated as the distant
    /// past, so such tokens always read as expired.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expiration, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Returns true if the token expiry is in the past.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Utc::now()
    }
}

/// Returns true if the given token's `exp` claim is in the past.
///
/// Errors if the token cannot be decoded at all, which callers treat as a
/// corrupt session rather than a normal expiry.
pub fn token_expired(token: &str) -> Result<bool, ClaimsError> {
    Ok(TokenClaims::decode_unverified(token)?.is_expired())
}

/// The authenticated principal derived from a session's ID token.
///
/// Never persisted; rebuilt per request from the stored token.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    raw_id_token: String,
    claims: TokenClaims,
}

impl UserInfo {
    /// Parses a stored ID token into the principal it identifies.
    pub fn from_id_token(id_token: &str) -> Result<Self, ClaimsError> {
        let claims = TokenClaims::decode_unverified(id_token)?;
        Ok(Self {
            raw_id_token: id_token.to_string(),
            claims,
        })
    }

    /// Returns the raw ID token string.
    #[must_use]
    pub fn raw_id_token(&self) -> &str {
        &self.raw_id_token
    }

    /// Returns the decoded claims.
    #[must_use]
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Returns the principal's user ID, parsed from the subject claim.
    pub fn user_id(&self) -> Result<UserId, ClaimsError> {
        UserId::from_str(&self.claims.subject).map_err(|_| ClaimsError::InvalidSubject {
            subject: self.claims.subject.clone(),
        })
    }
}
