//! Newline-delimited JSON spoken with the bridge process.
//!
//! Requests carry an `id` echoed back on the matching response; events are
//! unsolicited and tagged with the realtime connection they belong to.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use dmr_core::{
    auth::types::{LoginError, LoginErrorKind},
    domain::{Destination, DestinationId},
    platform::RawMessage,
};

pub const OP_LOGIN: &str = "login";
pub const OP_LOGIN_WITH_CODE: &str = "login_with_code";
pub const OP_IS_SESSION_VALID: &str = "is_session_valid";
pub const OP_GET_INBOX: &str = "get_inbox";
pub const OP_LOGOUT: &str = "logout";
pub const OP_REALTIME_CONNECT: &str = "realtime_connect";
pub const OP_REALTIME_SEND: &str = "realtime_send";
pub const OP_REALTIME_DISCONNECT: &str = "realtime_disconnect";

/// Serialize one request line (without the trailing newline).
pub fn encode_request(id: u64, op: &str, params: Value) -> String {
    let mut obj = match params {
        Value::Object(m) => m,
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("params".to_string(), other);
            m
        }
    };
    obj.insert("id".to_string(), json!(id));
    obj.insert("op".to_string(), json!(op));
    Value::Object(obj).to_string()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WireError {
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub challenge_id: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl WireError {
    pub fn to_login_error(&self) -> LoginError {
        let kind = self
            .kind
            .parse::<LoginErrorKind>()
            .unwrap_or(LoginErrorKind::Other);
        let message = if self.message.trim().is_empty() {
            kind.as_str().replace('_', " ")
        } else {
            self.message.clone()
        };
        LoginError {
            kind,
            message,
            challenge_id: self.challenge_id.clone(),
            retry_after: self.retry_after.map(Duration::from_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl Response {
    /// Human-readable failure reason for non-login calls.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(e) if !e.message.trim().is_empty() => format!("{} ({})", e.message, e.kind),
            Some(e) => e.kind.clone(),
            None => "bridge reported failure without details".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub connection: u64,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn as_message(&self) -> Option<RawMessage> {
        if self.event != "message" {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Response(Response),
    Event(EventEnvelope),
}

pub fn decode_line(line: &str) -> std::result::Result<Incoming, String> {
    let v: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    if v.get("event").is_some() {
        return serde_json::from_value(v)
            .map(Incoming::Event)
            .map_err(|e| e.to_string());
    }
    serde_json::from_value(v)
        .map(Incoming::Response)
        .map_err(|e| e.to_string())
}

#[derive(Clone, Debug, Deserialize)]
struct WireThread {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    participant_count: usize,
}

/// Inbox listing from a `get_inbox` result (`{"threads": [...]}`), positions 1-based.
pub fn parse_inbox(result: &Value) -> std::result::Result<Vec<Destination>, String> {
    let threads = result
        .get("threads")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let threads: Vec<WireThread> = serde_json::from_value(threads).map_err(|e| e.to_string())?;
    Ok(threads
        .into_iter()
        .enumerate()
        .map(|(i, t)| Destination {
            id: DestinationId(t.id),
            title: t.title,
            participant_count: t.participant_count,
            position: i + 1,
        })
        .collect())
}
