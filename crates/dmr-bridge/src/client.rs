use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use dmr_core::{
    auth::types::{LoginError, LoginErrorKind},
    domain::{Destination, DestinationId, Session},
    errors::Error,
    platform::{MessageHandler, PlatformClient, RealtimeConnection, Subscriptions},
    utils::truncate_text,
    Result,
};

use crate::{
    process::{BridgeConfig, BridgeProcess},
    protocol::{self, Incoming, Response},
};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    writer: Mutex<Writer>,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Response>>>,
    handlers: StdMutex<HashMap<u64, MessageHandler>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    timeout: Duration,
}

impl Shared {
    fn dispatch_line(&self, line: &str) {
        match protocol::decode_line(line) {
            Ok(Incoming::Response(resp)) => {
                let tx = self
                    .pending
                    .lock()
                    .ok()
                    .and_then(|mut p| p.remove(&resp.id));
                match tx {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => debug!(id = resp.id, "response for unknown request"),
                }
            }
            Ok(Incoming::Event(ev)) => {
                let Some(msg) = ev.as_message() else {
                    debug!(event = %ev.event, "ignoring bridge event");
                    return;
                };
                let handler = self
                    .handlers
                    .lock()
                    .ok()
                    .and_then(|h| h.get(&ev.connection).cloned());
                if let Some(h) = handler {
                    h(msg);
                }
            }
            Err(e) => warn!("unparsable bridge line ({e}): {}", truncate_text(line, 200)),
        }
    }

    /// Write one request and wait for its response.
    async fn request(&self, op: &str, params: Value) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::External(format!("bridge {op}: bridge closed its output")));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| Error::External("bridge pending map poisoned".to_string()))?
            .insert(id, tx);

        let mut line = protocol::encode_request(id, op, params);
        line.push('\n');
        let written = {
            let mut w = self.writer.lock().await;
            match w.write_all(line.as_bytes()).await {
                Ok(()) => w.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.forget(id);
            return Err(Error::External(format!("bridge {op}: write failed: {e}")));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(Error::External(format!("bridge {op}: bridge closed its output"))),
            Err(_) => {
                self.forget(id);
                Err(Error::External(format!(
                    "bridge {op}: timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn forget(&self, id: u64) {
        if let Ok(mut p) = self.pending.lock() {
            p.remove(&id);
        }
    }

    /// Fail every in-flight request; their receivers see the sender dropped.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut p) = self.pending.lock() {
            p.clear();
        }
    }
}

/// `PlatformClient` backed by an external bridge process speaking NDJSON.
///
/// Requests may be issued concurrently; responses are matched by id.
pub struct BridgeClient {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    process: Option<BridgeProcess>,
}

impl BridgeClient {
    /// Launch the bridge executable and talk to it over its stdio.
    pub fn spawn(cfg: &BridgeConfig) -> Result<Self> {
        let (process, stdout, stdin) = BridgeProcess::spawn(cfg)?;
        let mut client = Self::from_io(stdout, stdin, cfg.request_timeout);
        client.process = Some(process);
        Ok(client)
    }

    /// Talk to a bridge over arbitrary streams.
    pub fn from_io<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Box::new(writer)),
            pending: StdMutex::new(HashMap::new()),
            handlers: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            timeout,
        });

        let reader = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if !line.trim().is_empty() {
                                shared.dispatch_line(&line);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("bridge stdout read failed: {e}");
                            break;
                        }
                    }
                }
                shared.close();
            })
        };

        Self {
            shared,
            reader,
            process: None,
        }
    }

    async fn request(&self, op: &str, params: Value) -> Result<Response> {
        match self.shared.request(op, params).await {
            Err(_) if self.shared.closed.load(Ordering::SeqCst) => Err(self.closed_error(op).await),
            other => other,
        }
    }

    /// Request whose failure is a plain error.
    async fn call(&self, op: &str, params: Value) -> Result<Value> {
        let resp = self.request(op, params).await?;
        if resp.ok {
            Ok(resp.result)
        } else {
            Err(Error::External(format!("bridge {op}: {}", resp.error_message())))
        }
    }

    /// Request whose failure is a classified login error.
    async fn login_call(
        &self,
        op: &str,
        username: &str,
        params: Value,
    ) -> std::result::Result<Session, LoginError> {
        let resp = self
            .request(op, params)
            .await
            .map_err(|e| LoginError::new(LoginErrorKind::NetworkError, e.to_string()))?;
        if !resp.ok {
            return Err(match &resp.error {
                Some(e) => e.to_login_error(),
                None => LoginError::new(LoginErrorKind::Other, resp.error_message()),
            });
        }
        let state = resp.result.get("state").cloned().unwrap_or(resp.result);
        Ok(Session::fresh(username, state))
    }

    async fn closed_error(&self, op: &str) -> Error {
        let mut msg = format!("bridge {op}: bridge closed its output");
        if let Some(p) = &self.process {
            let stderr = p.stderr_snapshot().await;
            if !stderr.trim().is_empty() {
                msg.push_str("\nstderr (tail):\n");
                msg.push_str(&stderr);
            }
        }
        Error::External(msg)
    }

    /// Stop reading and kill the bridge process, if this client spawned one.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.close();
        self.reader.abort();
        match &self.process {
            Some(p) => p.kill().await,
            None => Ok(()),
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl PlatformClient for BridgeClient {
    async fn login(&self, username: &str, password: &str) -> std::result::Result<Session, LoginError> {
        self.login_call(
            protocol::OP_LOGIN,
            username,
            json!({"username": username, "password": password}),
        )
        .await
    }

    async fn login_with_code(
        &self,
        username: &str,
        password: &str,
        challenge_id: &str,
        code: &str,
    ) -> std::result::Result<Session, LoginError> {
        self.login_call(
            protocol::OP_LOGIN_WITH_CODE,
            username,
            json!({
                "username": username,
                "password": password,
                "challenge_id": challenge_id,
                "code": code,
            }),
        )
        .await
    }

    async fn is_session_valid(&self, session: &Session) -> Result<bool> {
        let v = self
            .call(protocol::OP_IS_SESSION_VALID, json!({"session": session.state}))
            .await?;
        Ok(v.get("valid").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn get_inbox(&self, session: &Session) -> Result<Vec<Destination>> {
        let v = self
            .call(protocol::OP_GET_INBOX, json!({"session": session.state}))
            .await?;
        protocol::parse_inbox(&v)
            .map_err(|e| Error::External(format!("bridge get_inbox: malformed result: {e}")))
    }

    async fn connect(
        &self,
        session: &Session,
        subscriptions: &Subscriptions,
        inbox: &[Destination],
    ) -> Result<Arc<dyn RealtimeConnection>> {
        let thread_ids: Vec<&str> = inbox.iter().map(|d| d.id.0.as_str()).collect();
        let v = self
            .call(
                protocol::OP_REALTIME_CONNECT,
                json!({
                    "session": session.state,
                    "message_topics": subscriptions.message_topics,
                    "presence_topics": subscriptions.presence_topics,
                    "thread_ids": thread_ids,
                }),
            )
            .await?;
        let connection = v.get("connection").and_then(Value::as_u64).ok_or_else(|| {
            Error::External("bridge realtime_connect: missing connection id".to_string())
        })?;
        debug!(connection, "realtime connection opened");

        Ok(Arc::new(BridgeConnection {
            client: BridgeHandle {
                shared: self.shared.clone(),
            },
            connection,
        }))
    }

    async fn logout(&self, session: &Session) -> Result<()> {
        self.call(protocol::OP_LOGOUT, json!({"session": session.state}))
            .await
            .map(|_| ())
    }
}

/// Request-only view of a bridge, kept by connections.
#[derive(Clone)]
struct BridgeHandle {
    shared: Arc<Shared>,
}

impl BridgeHandle {
    async fn call(&self, op: &str, params: Value) -> Result<Value> {
        let resp = self.shared.request(op, params).await?;
        if resp.ok {
            Ok(resp.result)
        } else {
            Err(Error::External(resp.error_message()))
        }
    }
}

/// Realtime connection multiplexed over the bridge stdio.
pub struct BridgeConnection {
    client: BridgeHandle,
    connection: u64,
}

#[async_trait]
impl RealtimeConnection for BridgeConnection {
    async fn send_text(&self, destination: &DestinationId, text: &str) -> Result<()> {
        self.client
            .call(
                protocol::OP_REALTIME_SEND,
                json!({
                    "connection": self.connection,
                    "thread_id": destination.0,
                    "text": text,
                }),
            )
            .await
            .map(|_| ())
    }

    fn on_message(&self, handler: MessageHandler) {
        if let Ok(mut h) = self.client.shared.handlers.lock() {
            h.insert(self.connection, handler);
        }
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut h) = self.client.shared.handlers.lock() {
            h.remove(&self.connection);
        }
        self.client
            .call(
                protocol::OP_REALTIME_DISCONNECT,
                json!({"connection": self.connection}),
            )
            .await
            .map(|_| ())
    }
}
