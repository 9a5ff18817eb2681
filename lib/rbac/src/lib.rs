//! RBAC service client for the gatehouse console.
//!
//! The console consumes the platform's RBAC service through a narrow
//! interface: look up users and groups, and grant or revoke role-bearing
//! group memberships. Everything else about the authorization model lives
//! in the service.

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpRbacClient, RbacService};
pub use error::RbacError;
pub use types::{Membership, RbacGroup, RbacUser};
