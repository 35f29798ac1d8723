//! Domain types shared across the lfsvault Git LFS service.
//!
//! Everything in this crate is plain data: validated identifiers ([`Oid`],
//! [`RepoName`]), the privilege verb [`Action`], and the JSON wire types of
//! the LFS Batch API. No I/O happens here; the store, token, and server
//! crates build on these types.

pub mod action;
pub mod batch;
pub mod error;
pub mod oid;
pub mod repo;

pub use action::Action;
pub use batch::{
    ActionPlan, BatchRequest, BatchResponse, ObjectError, ObjectPlan, ObjectSpec, Operation,
    PlannedActions,
};
pub use error::ParseError;
pub use oid::Oid;
pub use repo::{RepoName, RepoSet};
