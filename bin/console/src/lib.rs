//! gatehouse console server.
//!
//! This crate provides the web console for the gatehouse identity platform:
//! the delegated authentication and impersonation session subsystem, plus
//! the supporting configuration and storage plumbing.

pub mod auth;
pub mod config;
