//! Core error type shared by the engine crates.
//!
//! Shaped after the teacher's `gateway::error::Error`/`ErrorDetails` split:
//! a flat enum of structured variants, each carrying only what it needs to
//! render a message, with the HTTP-facing classification from spec.md §7
//! attached via [`Error::kind`].

use std::fmt;

/// The seven error kinds from spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationFailure,
    NotFound,
    StateConflict,
    UpstreamFailure,
    Cancelled,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("state conflict: {message}")]
    StateConflict { message: String },

    #[error("upstream call failed: {message}")]
    Upstream { message: String },

    /// The cooperative-cancellation sentinel. Always translates to
    /// `status = cancelled`, never `failed` (spec.md §7).
    #[error("job cancelled")]
    JobCancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationFailure,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::Upstream { .. } => ErrorKind::UpstreamFailure,
            Self::JobCancelled => ErrorKind::Cancelled,
            Self::Database(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Truncates an error message to the first `limit` characters, used when
    /// persisting `Job.error_message` (spec.md §4.1) and when surfacing
    /// JSON-repair failures (spec.md §7: first 500 characters).
    pub fn truncated_message(&self, limit: usize) -> String {
        let message = self.to_string();
        if message.chars().count() <= limit {
            message
        } else {
            message.chars().take(limit).collect()
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
