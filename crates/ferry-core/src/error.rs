//! Error types for Ferry

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Internal errors. These never cross the wire; handlers map them to a
/// [`Reject`] before anything reaches a client.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

/// Client-visible denial kinds, serialized on `error` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectKind {
    InvalidInput,
    InvalidCode,
    NotFound,
    AlreadyDownloaded,
    SenderOffline,
    RateLimited,
    SessionCapped,
    Blocked,
    Internal,
}

/// A request denial as shown to the client. Carries a human-readable
/// message and nothing else; internal error chains stay server-side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reject {
    /// Validation failed (bad field, bad id, size overflow)
    InvalidInput(String),
    /// Absent, wrong, or already used access code
    InvalidCode(&'static str),
    /// Session id unknown or expired
    NotFound,
    /// Session was already downloaded
    AlreadyDownloaded,
    /// No sender is registered for the session
    SenderOffline,
    /// A token bucket denied the request
    RateLimited { wait_secs: u64 },
    /// Concurrency or hourly session cap denied the request
    SessionCapped { reason: &'static str },
    /// The abuse guard has this IP in a block
    Blocked { remaining_mins: u64 },
    /// Anything unexpected. Details never leak.
    Internal,
}

impl Reject {
    pub fn kind(&self) -> RejectKind {
        match self {
            Reject::InvalidInput(_) => RejectKind::InvalidInput,
            Reject::InvalidCode(_) => RejectKind::InvalidCode,
            Reject::NotFound => RejectKind::NotFound,
            Reject::AlreadyDownloaded => RejectKind::AlreadyDownloaded,
            Reject::SenderOffline => RejectKind::SenderOffline,
            Reject::RateLimited { .. } => RejectKind::RateLimited,
            Reject::SessionCapped { .. } => RejectKind::SessionCapped,
            Reject::Blocked { .. } => RejectKind::Blocked,
            Reject::Internal => RejectKind::Internal,
        }
    }

    /// Message shown to the client
    pub fn message(&self) -> String {
        match self {
            Reject::InvalidInput(msg) => msg.clone(),
            Reject::InvalidCode(msg) => (*msg).to_string(),
            Reject::NotFound => "File not found or expired".into(),
            Reject::AlreadyDownloaded => "File has already been downloaded".into(),
            Reject::SenderOffline => "Sender is no longer connected".into(),
            Reject::RateLimited { wait_secs } => {
                format!("Too many requests, retry in {} seconds", wait_secs)
            }
            Reject::SessionCapped { reason } => (*reason).to_string(),
            Reject::Blocked { remaining_mins } => {
                format!("Temporarily blocked, try again in {} minutes", remaining_mins)
            }
            Reject::Internal => "Internal server error".into(),
        }
    }

    /// Whether the client should re-prompt for the access code
    pub fn is_code_failure(&self) -> bool {
        matches!(self, Reject::InvalidCode(_))
    }
}
