//! Error types for the enforcement system
//!
//! This module defines the errors that can occur while recording, applying and
//! lifting punishments.

use thiserror::Error;

/// Errors that can occur during enforcement operations
#[derive(Debug, Error)]
pub enum EnforcementError {
    /// Case record not found
    #[error("Case not found: {0}")]
    NotFound(String),

    /// A case already exists for the same content reference and rule
    #[error("Duplicate trigger for content reference {content_ref} in community {community_id}")]
    DuplicateTrigger {
        community_id: u64,
        content_ref: String,
    },

    /// The case is no longer in the state the caller expected
    #[error("Case {0} was modified concurrently")]
    Conflict(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// The moderation action could not be carried out
    #[error("Moderation action failed: {0}")]
    ActionFailed(String),

    /// Membership lookup did not answer in time
    #[error("Member lookup timed out after {0}ms")]
    LookupTimeout(u64),

    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    Config(String),

    /// Case snapshot could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic error
    #[error("Enforcement error: {0}")]
    Other(String),
}

impl From<serenity::Error> for EnforcementError {
    fn from(error: serenity::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<serde_yaml::Error> for EnforcementError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<std::io::Error> for EnforcementError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Convert a string into an `EnforcementError`
impl From<String> for EnforcementError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for enforcement operations
pub type EnforcementResult<T> = Result<T, EnforcementError>;
