//! HTTP host for the lfsvault Git LFS service.
//!
//! The host is deliberately thin: request dispatch, Basic-auth extraction,
//! and the status-code mapping live here, while all domain behavior sits in
//! the store, token, and access crates.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
