//! Error types for budlink-core.
//!
//! The orchestrator absorbs link failures inside its state machine, so very
//! little reaches callers. The errors here cover the few synchronous
//! decisions a caller can observe:
//!
//! | Error | When |
//! |-------|------|
//! | [`Error::CampaignRejected`] | `start_campaign` refused the request |
//! | [`Error::InvalidConfig`] | a [`crate::ConnectConfig`] failed validation |
//! | [`Error::InvalidRequest`] | a campaign request failed validation |
//! | [`Error::Storage`] | the reconnect table could not be loaded at startup |
//! | [`Error::ServiceStopped`] | a [`crate::ConnectHandle`] was used after shutdown |
//!
//! Storage failures while the service runs are logged and absorbed; the
//! in-memory table stays authoritative until the next successful save.

use thiserror::Error;

/// Why `start_campaign` refused a request.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RejectReason {
    /// The device already has a base link.
    AlreadyConnected,
    /// A campaign for this address is already queued.
    AlreadyQueued,
    /// Every campaign slot is occupied.
    TableFull,
    /// A TWS campaign is already running.
    TwsCampaignActive,
    /// A phone campaign without explicit profiles needs a reconnect record.
    NotInReconnectTable,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "device already connected"),
            Self::AlreadyQueued => write!(f, "device already in reconnect list"),
            Self::TableFull => write!(f, "no free campaign slot"),
            Self::TwsCampaignActive => write!(f, "a TWS campaign is already active"),
            Self::NotInReconnectTable => write!(f, "device not in reconnect table"),
        }
    }
}

/// Errors surfaced by the reconnect orchestrator.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A campaign start request was refused.
    #[error("Campaign rejected: {0}")]
    CampaignRejected(RejectReason),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid campaign request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Reconnect table storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The connect service task is no longer running.
    #[error("Connect service stopped")]
    ServiceStopped,

    /// Failed to parse a link value.
    #[error(transparent)]
    Parse(#[from] budlink_types::ParseError),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a request validation error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a storage error from any displayable cause.
    pub fn storage(cause: impl std::fmt::Display) -> Self {
        Self::Storage(cause.to_string())
    }
}

/// Result type alias using budlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CampaignRejected(RejectReason::TableFull);
        assert_eq!(err.to_string(), "Campaign rejected: no free campaign slot");

        let err = Error::invalid_config("capacity must be >= 2");
        assert!(err.to_string().contains("capacity"));

        let err = Error::storage("disk full");
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_parse_error_converts() {
        let parse = "bogus".parse::<budlink_types::BdAddr>().unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
