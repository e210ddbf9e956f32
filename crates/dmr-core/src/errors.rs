use std::path::PathBuf;

use crate::auth::types::{LoginError, LoginErrorKind};

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the console can
/// report failures consistently, with the originating account or destination
/// named in the message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("invalid TOTP secret: {0}")]
    InvalidSecret(String),

    #[error("no saved session at {}", path.display())]
    SessionNotFound { path: PathBuf },

    #[error("saved session at {} is corrupt: {reason}", path.display())]
    SessionCorrupt { path: PathBuf, reason: String },

    #[error("failed to write session {}: {reason}", path.display())]
    SessionWrite { path: PathBuf, reason: String },

    /// All login attempts for an account were exhausted.
    #[error("authentication failed for {username} after {attempts} attempt(s): {last}")]
    Auth {
        username: String,
        attempts: u32,
        last: LoginError,
    },

    #[error("send to {destination} failed: {message}")]
    Send {
        destination: String,
        message: String,
    },

    #[error("realtime connection for {username} failed: {message}")]
    Connect { username: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Login classification of this error, if it came from the login path.
    pub fn login_kind(&self) -> Option<LoginErrorKind> {
        match self {
            Error::Auth { last, .. } => Some(last.kind),
            _ => None,
        }
    }
}
