//!
//! Error taxonomy for the greaper runtime
//!
//! Every recoverable failure is returned to the immediate caller as one of
//! these variants; none are retried internally. Non-recoverable conditions
//! (poisoned locks, misuse of disabled primitives) never reach this enum,
//! they abort via [`greaper_sync::fatal`].
//!

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No thread, task or interface matches the given id or name.
    #[error("{kind} '{name}' was not found")]
    NotFound { kind: &'static str, name: String },

    /// A name or id is already present in a registry.
    #[error("'{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Operation attempted on an inactive or expired manager or scheduler.
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// The underlying OS thread, lock or condition-variable call failed.
    #[error("platform failure: {source}")]
    PlatformFailure {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
