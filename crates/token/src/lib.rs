//! Bearer tokens for the LFS HTTP endpoints.
//!
//! The SSH-invoked authenticator mints a short-lived token after consulting
//! the access oracle; later HTTP requests present the same token as Basic
//! credentials. Tokens are durable (one JSON file per user, committed via
//! atomic rename) so the two processes need no channel other than the
//! filesystem.

pub mod error;
pub mod password;
pub mod store;
pub mod token;

pub use error::TokenError;
pub use store::{TokenConfig, TokenStore};
pub use token::Token;
