//! Content-addressed filesystem blob store.
//!
//! Blobs are keyed by `(repository, oid)` and live under a five-level
//! fan-out directory tree. Writes stream through a same-directory tempfile
//! and commit with an atomic rename after the received bytes' SHA-256 has
//! been checked against the object id, so concurrent readers observe either
//! no blob or a complete, verified blob.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{BlobStore, BlobWriter, RepoStore, StoreConfig};
