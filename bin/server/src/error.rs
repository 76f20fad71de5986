//! Translation of domain failures into HTTP responses.
//!
//! Handlers convert any classified [`Report`] into an [`ApiError`]. Failures
//! a caller can act on are described; internal and upstream failures are
//! logged with a correlation id, which is the only detail the caller sees.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rootcause::Report;
use std::fmt;
use thor_core::{Classify, ErrorClass};
use ulid::Ulid;

/// An error ready to be rendered as a response.
#[derive(Debug)]
pub struct ApiError {
    class: ErrorClass,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Unauthorized,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::NotFound,
            message: message.into(),
        }
    }

    /// An internal failure that did not come from a domain report.
    #[must_use]
    pub fn internal(details: impl fmt::Display) -> Self {
        Self::redacted(ErrorClass::Internal, &details)
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.class
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn redacted(class: ErrorClass, details: &dyn fmt::Display) -> Self {
        let correlation_id = Ulid::new();
        tracing::error!(%correlation_id, %class, error = %details, "request failed");
        Self {
            class,
            message: format!("{class} (correlation id: {correlation_id})"),
        }
    }

    fn status(&self) -> StatusCode {
        match self.class {
            ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
            ErrorClass::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Conflict => StatusCode::CONFLICT,
            ErrorClass::Upstream => StatusCode::BAD_GATEWAY,
            ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<C> From<Report<C>> for ApiError
where
    C: Classify + fmt::Display,
    Report<C>: fmt::Display,
{
    fn from(report: Report<C>) -> Self {
        let class = report.class();
        if class.is_client_visible() {
            tracing::debug!(%class, error = %report, "request rejected");
            Self {
                class,
                message: report.current_context().to_string(),
            }
        } else {
            Self::redacted(class, &report)
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.message).into_response()
    }
}

/// Failures that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded or is invalid.
    Config { reason: String },
    /// Signing key material could not be read or used.
    Keys { reason: String },
    /// The database could not be reached.
    Database { reason: String },
    /// Migrations failed.
    Migration { reason: String },
    /// A configured provider could not be set up.
    Provider { provider: String },
    /// The listener could not be bound.
    Bind { addr: String, reason: String },
    /// The server stopped with an error.
    Serve { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Keys { reason } => write!(f, "unusable signing keys: {reason}"),
            Self::Database { reason } => write!(f, "failed to connect to database: {reason}"),
            Self::Migration { reason } => write!(f, "failed to run migrations: {reason}"),
            Self::Provider { provider } => write!(f, "failed to set up provider '{provider}'"),
            Self::Bind { addr, reason } => write!(f, "failed to bind to {addr}: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}

#[cfg(test)]
mod tests {
    use super::*;
    use thor_platform_access::{LoginError, StoreError};

    #[test]
    fn client_errors_keep_their_message() {
        let report: Report<LoginError> = LoginError::StateMismatch.into();
        let error = ApiError::from(report);

        assert_eq!(error.class(), ErrorClass::BadRequest);
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.message(), "state mismatch");
    }

    #[test]
    fn internal_errors_are_redacted() {
        let report: Report<StoreError> = StoreError::Backend {
            reason: "connection refused to 10.0.0.7".to_string(),
        }
        .into();
        let error = ApiError::from(report);

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error.message().starts_with("internal failure (correlation id: "));
        assert!(!error.message().contains("10.0.0.7"));
    }

    #[test]
    fn upstream_errors_map_to_bad_gateway() {
        let report: Report<LoginError> = LoginError::Upstream {
            provider: "github/main".to_string(),
        }
        .into();
        let error = ApiError::from(report);

        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);
        assert!(!error.message().contains("github"));
    }

    #[test]
    fn conflicts_map_to_409() {
        let report: Report<StoreError> = StoreError::AlreadyExists {
            entity: "user",
            key: "usr_1".to_string(),
        }
        .into();
        assert_eq!(ApiError::from(report).status(), StatusCode::CONFLICT);
    }
}
