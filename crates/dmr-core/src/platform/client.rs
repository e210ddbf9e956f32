use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    auth::types::LoginError,
    domain::{Destination, DestinationId, Session},
    Result,
};

use super::types::{MessageHandler, Subscriptions};

/// Hexagonal port for the platform protocol client.
///
/// The client is stateless with respect to accounts: every call receives the
/// `Session` it acts on, so several managers can share one client without
/// stepping on each other's device/session fields.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Basic username/password login.
    ///
    /// A pending second factor is reported as `LoginErrorKind::TwoFactorRequired`
    /// carrying the challenge id.
    async fn login(&self, username: &str, password: &str) -> std::result::Result<Session, LoginError>;

    /// Complete a two-factor challenge with a one-time code.
    async fn login_with_code(
        &self,
        username: &str,
        password: &str,
        challenge_id: &str,
        code: &str,
    ) -> std::result::Result<Session, LoginError>;

    /// Liveness check for a (possibly restored) session.
    async fn is_session_valid(&self, session: &Session) -> Result<bool>;

    /// Current inbox listing, in platform order.
    async fn get_inbox(&self, session: &Session) -> Result<Vec<Destination>>;

    /// Open the realtime transport for `session`.
    async fn connect(
        &self,
        session: &Session,
        subscriptions: &Subscriptions,
        inbox: &[Destination],
    ) -> Result<Arc<dyn RealtimeConnection>>;

    async fn logout(&self, session: &Session) -> Result<()>;
}

/// A live publish/subscribe connection for one account.
#[async_trait]
pub trait RealtimeConnection: Send + Sync {
    async fn send_text(&self, destination: &DestinationId, text: &str) -> Result<()>;

    /// Register the inbound message callback. The callback runs on the
    /// transport's reader and must not block.
    fn on_message(&self, handler: MessageHandler);

    async fn close(&self) -> Result<()>;
}
