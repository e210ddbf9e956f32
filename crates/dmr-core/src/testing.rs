//! Hand-written fakes for the platform ports, shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    auth::types::{LoginError, LoginErrorKind},
    domain::{Destination, DestinationId, Session, UserId},
    errors::Error,
    platform::{
        client::{PlatformClient, RealtimeConnection},
        types::{MessageHandler, RawMessage, Subscriptions},
    },
    Result,
};

pub type LoginReply = std::result::Result<(), LoginError>;

#[derive(Default)]
pub struct FakeClient {
    login_replies: Mutex<VecDeque<LoginReply>>,
    default_login: Mutex<Option<LoginReply>>,
    code_replies: Mutex<VecDeque<LoginReply>>,
    pub login_calls: AtomicUsize,
    pub code_calls: AtomicUsize,
    pub codes_seen: Mutex<Vec<(String, String)>>,
    pub logout_calls: AtomicUsize,
    session_valid: AtomicBool,
    validation_error: Mutex<Option<String>>,
    pub inbox: Mutex<Vec<Destination>>,
    connect_error: Mutex<Option<String>>,
    pub connection: Arc<FakeConnection>,
    pub connects: AtomicUsize,
    /// Inbox ids passed to the last `connect`.
    pub connected_inbox: Mutex<Vec<DestinationId>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, reply: LoginReply) -> &Self {
        self.login_replies.lock().unwrap().push_back(reply);
        self
    }

    /// Reply used once the scripted replies are exhausted.
    pub fn always_login(&self, reply: LoginReply) -> &Self {
        *self.default_login.lock().unwrap() = Some(reply);
        self
    }

    pub fn push_code_reply(&self, reply: LoginReply) -> &Self {
        self.code_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn set_session_valid(&self, valid: bool) {
        *self.validation_error.lock().unwrap() = None;
        self.session_valid.store(valid, Ordering::SeqCst);
    }

    pub fn fail_validation_with(&self, msg: &str) {
        *self.validation_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_connect_with(&self, msg: &str) {
        *self.connect_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn logins(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn code_logins(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    fn next_login(&self) -> LoginReply {
        if let Some(r) = self.login_replies.lock().unwrap().pop_front() {
            return r;
        }
        self.default_login
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(LoginError::new(LoginErrorKind::Other, "no scripted reply")))
    }
}

pub fn destinations(n: usize) -> Vec<Destination> {
    (1..=n)
        .map(|i| Destination {
            id: DestinationId(format!("thread-{i}")),
            title: Some(format!("Chat {i}")),
            participant_count: i + 1,
            position: i,
        })
        .collect()
}

#[async_trait]
impl PlatformClient for FakeClient {
    async fn login(&self, username: &str, _password: &str) -> std::result::Result<Session, LoginError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.next_login()?;
        Ok(Session::fresh(username, serde_json::json!({"token": username})))
    }

    async fn login_with_code(
        &self,
        username: &str,
        _password: &str,
        challenge_id: &str,
        code: &str,
    ) -> std::result::Result<Session, LoginError> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        self.codes_seen
            .lock()
            .unwrap()
            .push((challenge_id.to_string(), code.to_string()));
        let reply = self
            .code_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        reply?;
        Ok(Session::fresh(username, serde_json::json!({"token": username, "2fa": true})))
    }

    async fn is_session_valid(&self, _session: &Session) -> Result<bool> {
        if let Some(msg) = self.validation_error.lock().unwrap().clone() {
            return Err(Error::External(msg));
        }
        Ok(self.session_valid.load(Ordering::SeqCst))
    }

    async fn get_inbox(&self, _session: &Session) -> Result<Vec<Destination>> {
        Ok(self.inbox.lock().unwrap().clone())
    }

    async fn connect(
        &self,
        _session: &Session,
        _subscriptions: &Subscriptions,
        inbox: &[Destination],
    ) -> Result<Arc<dyn RealtimeConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.connected_inbox.lock().unwrap() = inbox.iter().map(|d| d.id.clone()).collect();
        if let Some(msg) = self.connect_error.lock().unwrap().clone() {
            return Err(Error::External(msg));
        }
        Ok(self.connection.clone())
    }

    async fn logout(&self, _session: &Session) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnection {
    pub sends: Mutex<Vec<(DestinationId, String)>>,
    attempts: AtomicUsize,
    /// Fail every n-th send attempt (1-based) when set.
    pub fail_every: Mutex<Option<usize>>,
    pub send_latency: Mutex<Duration>,
    handler: Mutex<Option<MessageHandler>>,
    pub closed: AtomicBool,
}

impl FakeConnection {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(DestinationId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn emit(&self, from: &str, text: Option<&str>) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(h) = handler {
            h(RawMessage {
                from: UserId(from.to_string()),
                text: text.map(str::to_string),
            });
        }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    async fn send_text(&self, destination: &DestinationId, text: &str) -> Result<()> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.send_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let fail_every = *self.fail_every.lock().unwrap();
        if matches!(fail_every, Some(k) if k > 0 && n % k == 0) {
            return Err(Error::External(format!("send #{n} rejected")));
        }
        self.sends
            .lock()
            .unwrap()
            .push((destination.clone(), text.to_string()));
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
