//! Session, token, and invite domain types for the gatehouse console.
//!
//! This crate provides:
//! - Token claim decoding without signature re-verification (`TokenClaims`,
//!   `UserInfo`)
//! - The server-side session record with its two-level token stack
//!   (`Session`, `TokenSet`, `Impersonation`)
//! - Login round-trip state values (`LoginState`)
//! - Invite keys and their binding rules (`InviteKey`)
//! - Storage traits plus in-memory implementations for tests
//!
//! # Impersonation model
//!
//! A session carries the active principal's token triple. When an operator
//! impersonates another user, the operator's own triple is pushed into the
//! impersonator slot and the impersonated user's triple becomes active.
//! Impersonation is single-level, and when the impersonated credential
//! expires the operator's session is restored automatically.
//!
//! # Example
//!
//! ```
//! use gatehouse_access::session::{Session, TokenInstall, TokenSet};
//!
//! let mut session = Session::new();
//! session.install_tokens(TokenSet::new("op-id", "op-access", "op-refresh"));
//!
//! // Operator requests an impersonation; the re-login callback then
//! // installs the target user's tokens, preserving the operator's.
//! session.request_impersonation().expect("not impersonating yet");
//! let outcome = session.install_tokens(TokenSet::new("t-id", "t-access", "t-refresh"));
//! assert_eq!(outcome, TokenInstall::ImpersonationStarted);
//!
//! // Reverting restores the operator's triple.
//! session.revert_impersonation().expect("active impersonation");
//! assert_eq!(session.tokens().id_token, "op-id");
//! ```

pub mod claims;
pub mod error;
pub mod invite;
pub mod session;
pub mod state;
pub mod store;
pub mod tenant;

// Re-export main types at crate root
pub use claims::{TokenClaims, UserInfo, token_expired};
pub use error::{ClaimsError, InviteError, SessionError, StateError, StoreError};
pub use invite::{ADMIN_ROLE, InviteKey, InviteKeyType, MEMBER_ROLE, TenantRoles};
pub use session::{Impersonation, Session, TokenInstall, TokenSet};
pub use state::{INVITE_STATE_PREFIX, LoginState, invite_state, parse_invite_state};
pub use store::{
    InviteKeyStore, MemoryInviteKeyStore, MemorySessionStore, MemoryTenantStore, SessionStore,
    TenantStore,
};
pub use tenant::{Tenant, regional_tenant_url};
