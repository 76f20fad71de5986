//! Core domain types shared across the thor workspace.
//!
//! This crate provides the typed identifiers and the error-handling
//! foundation used by the identity broker and its HTTP surface.

pub mod error;
pub mod id;

pub use error::{Classify, ErrorClass, Result};
pub use id::{ParseIdError, RoleId, UserId};
