//! Error handling foundation for thor.
//!
//! Two pieces live here:
//! - the `Result` alias over rootcause's `Report`, used by every crate for
//!   fallible operations;
//! - the `ErrorClass` taxonomy, which is how domain errors declare the kind
//!   of failure they represent without knowing anything about HTTP.
//!
//! Each crate defines its own error enums and implements [`Classify`] for
//! the ones that can reach a client. Only the server decides how a class
//! turns into a response.

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Coarse classification of a failure, independent of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed or missing input; safe to describe to the caller.
    BadRequest,
    /// Missing, invalid or expired credentials.
    Unauthorized,
    /// The addressed entity does not exist.
    NotFound,
    /// A create or link collided with an existing entity.
    Conflict,
    /// A call to an external identity provider failed.
    Upstream,
    /// Storage, signing or any other internal failure.
    Internal,
}

impl ErrorClass {
    /// Returns true if details of the failure may be shown to the caller.
    #[must_use]
    pub fn is_client_visible(&self) -> bool {
        matches!(self, Self::BadRequest | Self::Unauthorized | Self::NotFound)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Upstream => "upstream failure",
            Self::Internal => "internal failure",
        };
        f.write_str(name)
    }
}

/// Implemented by domain errors that can surface at the edge of the system.
pub trait Classify {
    /// Returns the class of this failure.
    fn class(&self) -> ErrorClass;
}

impl<C: Classify> Classify for Report<C> {
    fn class(&self) -> ErrorClass {
        self.current_context().class()
    }
}
