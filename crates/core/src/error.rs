//! Core error model.

use thiserror::Error;

/// Result type used by the core building blocks.
pub type CoreResult<T> = Result<T, CoreError>;

/// Usage error raised before any I/O happens.
///
/// These are caller mistakes (bad filter input, malformed identifiers) and
/// are always fatal to the call that produced them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Both variants are argument errors from the caller's point of view.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidId(_))
    }
}
