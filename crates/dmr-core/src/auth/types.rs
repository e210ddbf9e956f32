use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Classification of a failed login call, as signalled by the platform client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginErrorKind {
    TwoFactorRequired,
    ChallengeRequired,
    RateLimited,
    InvalidCredential,
    NetworkError,
    Other,
}

impl LoginErrorKind {
    pub const ALL: [LoginErrorKind; 6] = [
        LoginErrorKind::TwoFactorRequired,
        LoginErrorKind::ChallengeRequired,
        LoginErrorKind::RateLimited,
        LoginErrorKind::InvalidCredential,
        LoginErrorKind::NetworkError,
        LoginErrorKind::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LoginErrorKind::TwoFactorRequired => "two_factor_required",
            LoginErrorKind::ChallengeRequired => "challenge_required",
            LoginErrorKind::RateLimited => "rate_limited",
            LoginErrorKind::InvalidCredential => "invalid_credential",
            LoginErrorKind::NetworkError => "network_error",
            LoginErrorKind::Other => "other",
        }
    }

    /// Classes a later attempt can plausibly recover from.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            LoginErrorKind::RateLimited | LoginErrorKind::NetworkError
        )
    }
}

impl fmt::Display for LoginErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        LoginErrorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| Error::Config(format!("unknown login error class: {s}")))
    }
}

/// A classified login failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginError {
    pub kind: LoginErrorKind,
    pub message: String,
    /// Server-issued identifier of a pending two-factor challenge.
    pub challenge_id: Option<String>,
    /// Server hint for how long to back off after a rate limit.
    pub retry_after: Option<Duration>,
}

impl LoginError {
    pub fn new(kind: LoginErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            challenge_id: None,
            retry_after: None,
        }
    }

    pub fn two_factor(challenge_id: impl Into<String>) -> Self {
        Self {
            challenge_id: Some(challenge_id.into()),
            ..Self::new(
                LoginErrorKind::TwoFactorRequired,
                "two-factor verification required",
            )
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(LoginErrorKind::RateLimited, message)
        }
    }
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for LoginError {}

/// Result of one pass through the login state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(LoginError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub number: u32,
    pub outcome: AttemptOutcome,
}

impl LoginAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }

    pub fn error(&self) -> Option<&LoginError> {
        match &self.outcome {
            AttemptOutcome::Success => None,
            AttemptOutcome::Failed(e) => Some(e),
        }
    }
}

/// Where a manager currently is in the authentication flow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating {
        attempt: u32,
    },
    TwoFactorPending {
        attempt: u32,
        challenge_id: String,
    },
    Authenticated,
    Failed,
}
