//! Secret storage and machine-to-machine tokens for gatehouse.
//!
//! This crate provides the narrow secret-backend interface the console
//! consumes (`SecretStore`) and the per-tenant M2M secret lifecycle built on
//! top of it: create at provisioning, resolve into an `AccessToken` header
//! for outbound trusted calls, and validate presented tokens in constant
//! time.

pub mod error;
pub mod m2m;
pub mod store;

pub use error::SecretError;
pub use m2m::M2mSecrets;
pub use store::{EnvSecretStore, MemorySecretStore, Secret, SecretStore};
