//! Branchline account service
//!
//! User accounts, credentials, and session tokens for branch-structured
//! organizations: registration, login with rotating refresh tokens,
//! single-use password-reset and email-verification tokens, and an
//! administrative account-management surface.

pub mod account;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod mailer;
pub mod password;
pub mod server;
pub mod token;
pub mod validation;
