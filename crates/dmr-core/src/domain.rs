use std::{fmt, path::PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Platform conversation id (opaque string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(pub String);

/// Platform user id (opaque string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// One managed account as configured by the operator.
#[derive(Clone, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    #[serde(default, alias = "totpSecret")]
    pub totp_secret: Option<String>,
    #[serde(default, alias = "sessionFile")]
    pub session_file: Option<PathBuf>,
    #[serde(default)]
    pub description: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .field("session_file", &self.session_file)
            .field("description", &self.description)
            .finish()
    }
}

impl AccountConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            totp_secret: None,
            session_file: None,
            description: String::new(),
        }
    }

    pub fn with_totp_secret(mut self, secret: impl Into<String>) -> Self {
        self.totp_secret = Some(secret.into()).filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Serialized proof of authentication for one account.
///
/// `state` is produced and consumed by the platform client only; the core never
/// looks inside it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub state: serde_json::Value,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub is_valid: bool,
}

impl Session {
    pub fn new(username: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            username: username.into(),
            state,
            validated_at: None,
            is_valid: false,
        }
    }

    /// A session straight out of a successful login is live by construction.
    pub fn fresh(username: impl Into<String>, state: serde_json::Value) -> Self {
        let mut s = Self::new(username, state);
        s.mark_validated(Utc::now());
        s
    }

    pub fn mark_validated(&mut self, at: DateTime<Utc>) {
        self.validated_at = Some(at);
        self.is_valid = true;
    }

    pub fn mark_invalid(&mut self) {
        self.is_valid = false;
    }
}

/// A target conversation from the inbox snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participant_count: usize,
    /// 1-based position in the inbox listing this destination came from.
    #[serde(default)]
    pub position: usize,
}

impl Destination {
    pub fn display_name(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Group {}", self.position),
        }
    }
}

/// Inbound message observed on the realtime connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub seq: u64,
    pub sender: UserId,
    pub text: String,
    pub received_at: DateTime<Local>,
}
