//! Error types for value parsing in budlink-types.

use thiserror::Error;

/// Errors that can occur when parsing link values.
///
/// This error type is platform-agnostic and does not include
/// orchestrator errors (those belong in budlink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The string is not a colon-separated six octet address.
    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    /// Unknown profile name.
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// Unknown role value.
    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Result type alias using budlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
