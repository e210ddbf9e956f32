use std::{path::Path, sync::Arc};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::AuthSettings,
    domain::{AccountConfig, Session},
    errors::Error,
    platform::PlatformClient,
    session::SessionStore,
    totp, Result,
};

use super::{
    retry::RetryPolicy,
    types::{AttemptOutcome, AuthState, LoginAttempt, LoginError, LoginErrorKind},
};

/// Trace of one `authenticate` call: the state it ended in and every login
/// attempt it made. Never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginRun {
    pub state: AuthState,
    pub attempts: Vec<LoginAttempt>,
    /// Whether a stored session was reused without logging in.
    pub restored: bool,
}

impl LoginRun {
    fn record(&mut self, number: u32, outcome: AttemptOutcome) {
        self.attempts.push(LoginAttempt { number, outcome });
    }

    fn last_error(&self) -> Option<&LoginError> {
        self.attempts.iter().rev().find_map(|a| a.error())
    }
}

/// Credential & session manager.
///
/// Holds no per-account state: every `authenticate` call builds its own
/// `Session`, so one manager can serve a whole batch.
pub struct AuthManager {
    client: Arc<dyn PlatformClient>,
    store: SessionStore,
    settings: AuthSettings,
    policy: RetryPolicy,
    clock: fn() -> u64,
}

impl AuthManager {
    pub fn new(client: Arc<dyn PlatformClient>, store: SessionStore, settings: AuthSettings) -> Self {
        let policy = settings.retry_policy();
        Self {
            client,
            store,
            settings,
            policy,
            clock: totp::now_unix_secs,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the unix-seconds clock used for one-time codes.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn authenticate(&self, account: &AccountConfig) -> Result<Session> {
        self.authenticate_recorded(account).await.0
    }

    /// Like [`authenticate`](Self::authenticate), also returning the attempt trace.
    pub async fn authenticate_recorded(&self, account: &AccountConfig) -> (Result<Session>, LoginRun) {
        let mut run = LoginRun::default();
        let path = self.store.path_for(account);

        if let Some(session) = self.restore(account, &path).await {
            run.state = AuthState::Authenticated;
            run.restored = true;
            return (Ok(session), run);
        }

        let result = self.login_loop(account, &path, &mut run).await;
        run.state = if result.is_ok() {
            AuthState::Authenticated
        } else {
            AuthState::Failed
        };
        (result, run)
    }

    /// Fast path: a stored session that is still alive.
    async fn restore(&self, account: &AccountConfig, path: &Path) -> Option<Session> {
        if !self.settings.save_session {
            return None;
        }
        let mut session = self.store.load_if_usable(path)?;

        if !self.settings.validate_session {
            // Trusted as stored.
            session.is_valid = true;
            info!(username = %account.username, "using stored session (not validated)");
            return Some(session);
        }

        if self.store.validate(self.client.as_ref(), &mut session).await {
            info!(username = %account.username, "restored stored session");
            Some(session)
        } else {
            info!(username = %account.username, "stored session is stale, logging in");
            None
        }
    }

    async fn login_loop(
        &self,
        account: &AccountConfig,
        path: &Path,
        run: &mut LoginRun,
    ) -> Result<Session> {
        let username = account.username.as_str();

        for attempt in 1..=self.policy.max_attempts {
            run.state = AuthState::Authenticating { attempt };
            debug!(username, attempt, "login attempt");

            let err = match self.client.login(username, &account.password).await {
                Ok(session) => {
                    run.record(attempt, AttemptOutcome::Success);
                    return Ok(self.persist(path, session));
                }
                Err(e) if e.kind == LoginErrorKind::TwoFactorRequired => {
                    match self.second_factor(account, attempt, e, run).await? {
                        Ok(session) => {
                            run.record(attempt, AttemptOutcome::Success);
                            return Ok(self.persist(path, session));
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            warn!(username, attempt, "login failed: {err}");
            run.record(attempt, AttemptOutcome::Failed(err.clone()));

            if !self.policy.should_retry(attempt, &err) {
                break;
            }
            let wait = self.policy.delay_after(&err);
            if !wait.is_zero() {
                sleep(wait).await;
            }
        }

        Err(self.exhausted(username, run))
    }

    /// Answer a two-factor challenge with a fresh code.
    ///
    /// The outer `Result` is fatal for the account (no secret, undecodable
    /// secret) and names it;
    /// the inner one is the outcome of the code login.
    async fn second_factor(
        &self,
        account: &AccountConfig,
        attempt: u32,
        challenge: LoginError,
        run: &mut LoginRun,
    ) -> Result<std::result::Result<Session, LoginError>> {
        let username = account.username.as_str();
        let Some(secret) = account.totp_secret.as_deref().filter(|s| !s.trim().is_empty()) else {
            warn!(username, "two-factor required but no TOTP secret is configured");
            let err = LoginError {
                message: "two-factor required but no TOTP secret is configured".to_string(),
                ..challenge
            };
            run.record(attempt, AttemptOutcome::Failed(err));
            return Err(self.exhausted(username, run));
        };

        let challenge_id = challenge.challenge_id.clone().unwrap_or_default();
        run.state = AuthState::TwoFactorPending {
            attempt,
            challenge_id: challenge_id.clone(),
        };

        let code = match totp::generate_with(secret, (self.clock)(), 0, self.settings.totp) {
            Ok(c) => c,
            Err(e) => {
                warn!(username, "cannot compute TOTP code: {e}");
                let err = LoginError {
                    message: e.to_string(),
                    ..challenge
                };
                run.record(attempt, AttemptOutcome::Failed(err));
                return Err(self.exhausted(username, run));
            }
        };
        info!(username, "answering two-factor challenge");

        Ok(self
            .client
            .login_with_code(username, &account.password, &challenge_id, &code)
            .await)
    }

    fn persist(&self, path: &Path, session: Session) -> Session {
        if self.settings.save_session {
            if let Err(e) = self.store.save(path, &session) {
                // The session is live either way; the next run just logs in again.
                warn!(username = %session.username, "{e}");
            }
        }
        info!(username = %session.username, "authenticated");
        session
    }

    fn exhausted(&self, username: &str, run: &LoginRun) -> Error {
        let last = run
            .last_error()
            .cloned()
            .unwrap_or_else(|| LoginError::new(LoginErrorKind::Other, "no login attempt made"));
        Error::Auth {
            username: username.to_string(),
            attempts: run.attempts.len() as u32,
            last,
        }
    }

    /// Liveness check for a session already in hand.
    pub async fn is_logged_in(&self, session: &mut Session) -> bool {
        self.store.validate(self.client.as_ref(), session).await
    }

    /// Log out remotely and delete the stored session file.
    ///
    /// The file is removed even when the remote logout fails.
    pub async fn logout(&self, account: &AccountConfig, session: &Session) -> Result<()> {
        let remote = self.client.logout(session).await;
        let path = self.store.path_for(account);
        if self.store.remove(&path)? {
            info!(username = %account.username, path = %path.display(), "removed stored session");
        }
        remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;
    use serde_json::json;
    use std::time::Duration;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";
    const NOW: u64 = 1_700_000_000;

    fn fixed_clock() -> u64 {
        NOW
    }

    fn tmp_store(name: &str) -> SessionStore {
        let dir = std::env::temp_dir().join(format!(
            "dmr-auth-test-{}-{}-{name}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        SessionStore::new(dir)
    }

    fn settings() -> AuthSettings {
        AuthSettings {
            retry_delay: Duration::ZERO,
            ..AuthSettings::default()
        }
    }

    fn manager(client: &Arc<FakeClient>, store: SessionStore) -> AuthManager {
        AuthManager::new(client.clone(), store, settings()).with_clock(fixed_clock)
    }

    #[tokio::test]
    async fn valid_stored_session_skips_login() {
        let client = Arc::new(FakeClient::new());
        client.set_session_valid(true);
        let store = tmp_store("fast-path");
        let acct = AccountConfig::new("alice", "pw");
        store
            .save(&store.path_for(&acct), &Session::new("alice", json!({"t": 1})))
            .unwrap();

        let (res, run) = manager(&client, store).authenticate_recorded(&acct).await;
        let session = res.unwrap();
        assert!(session.is_valid);
        assert_eq!(session.state, json!({"t": 1}));
        assert!(run.restored);
        assert_eq!(client.logins(), 0);
    }

    #[tokio::test]
    async fn stale_stored_session_falls_back_to_login_and_is_replaced() {
        let client = Arc::new(FakeClient::new());
        client.set_session_valid(false);
        client.push_login(Ok(()));
        let store = tmp_store("stale");
        let acct = AccountConfig::new("alice", "pw");
        let path = store.path_for(&acct);
        store.save(&path, &Session::new("alice", json!({"old": true}))).unwrap();

        let session = manager(&client, store.clone())
            .authenticate(&acct)
            .await
            .unwrap();
        assert_eq!(client.logins(), 1);
        assert_eq!(store.load(&path).unwrap().state, session.state);
    }

    #[tokio::test]
    async fn network_errors_exhaust_max_retries() {
        let client = Arc::new(FakeClient::new());
        client.always_login(Err(LoginError::new(
            LoginErrorKind::NetworkError,
            "connection reset",
        )));
        let acct = AccountConfig::new("bob", "pw");

        let (res, run) = manager(&client, tmp_store("exhaust"))
            .authenticate_recorded(&acct)
            .await;
        match res {
            Err(Error::Auth {
                username,
                attempts,
                last,
            }) => {
                assert_eq!(username, "bob");
                assert_eq!(attempts, 3);
                assert_eq!(last.kind, LoginErrorKind::NetworkError);
                assert_eq!(last.message, "connection reset");
            }
            other => panic!("expected Auth error, got {other:?}"),
        }
        assert_eq!(client.logins(), 3);
        assert_eq!(run.state, AuthState::Failed);
        assert_eq!(run.attempts.len(), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let client = Arc::new(FakeClient::new());
        client
            .push_login(Err(LoginError::new(LoginErrorKind::NetworkError, "timeout")))
            .push_login(Ok(()));
        let acct = AccountConfig::new("carol", "pw");

        let (res, run) = manager(&client, tmp_store("transient"))
            .authenticate_recorded(&acct)
            .await;
        assert!(res.unwrap().is_valid);
        assert_eq!(client.logins(), 2);
        assert!(!run.attempts[0].is_success());
        assert!(run.attempts[1].is_success());
    }

    #[tokio::test]
    async fn two_factor_is_answered_with_current_code() {
        let client = Arc::new(FakeClient::new());
        client.push_login(Err(LoginError::two_factor("chal-9")));
        let acct = AccountConfig::new("dave", "pw").with_totp_secret(SECRET);

        let session = manager(&client, tmp_store("2fa"))
            .authenticate(&acct)
            .await
            .unwrap();
        assert_eq!(session.state["2fa"], json!(true));

        let seen = client.codes_seen.lock().unwrap().clone();
        let expected = totp::generate(SECRET, NOW).unwrap();
        assert_eq!(seen, vec![("chal-9".to_string(), expected)]);
    }

    #[tokio::test]
    async fn failed_code_login_counts_as_an_attempt() {
        let client = Arc::new(FakeClient::new());
        client.always_login(Err(LoginError::two_factor("c")));
        client
            .push_code_reply(Err(LoginError::new(LoginErrorKind::InvalidCredential, "bad code")))
            .push_code_reply(Ok(()));
        let acct = AccountConfig::new("erin", "pw").with_totp_secret(SECRET);

        let (res, run) = manager(&client, tmp_store("2fa-retry"))
            .authenticate_recorded(&acct)
            .await;
        assert!(res.is_ok());
        assert_eq!(client.code_logins(), 2);
        assert_eq!(run.attempts.len(), 2);
    }

    #[tokio::test]
    async fn two_factor_without_secret_fails_immediately() {
        let client = Arc::new(FakeClient::new());
        client.always_login(Err(LoginError::two_factor("c")));
        let acct = AccountConfig::new("frank", "pw");

        let err = manager(&client, tmp_store("no-secret"))
            .authenticate(&acct)
            .await
            .unwrap_err();
        assert_eq!(err.login_kind(), Some(LoginErrorKind::TwoFactorRequired));
        assert!(err.to_string().contains("frank"));
        assert_eq!(client.logins(), 1);
        assert_eq!(client.code_logins(), 0);
    }

    #[tokio::test]
    async fn undecodable_secret_is_reported() {
        let client = Arc::new(FakeClient::new());
        client.always_login(Err(LoginError::two_factor("c")));
        let acct = AccountConfig::new("gina", "pw").with_totp_secret("not base32!");

        let err = manager(&client, tmp_store("bad-secret"))
            .authenticate(&acct)
            .await
            .unwrap_err();
        assert_eq!(err.login_kind(), Some(LoginErrorKind::TwoFactorRequired));
        let msg = err.to_string();
        assert!(msg.contains("gina"), "{msg}");
        assert!(msg.contains("invalid TOTP secret"), "{msg}");
        assert_eq!(client.logins(), 1);
        assert_eq!(client.code_logins(), 0);
    }

    #[tokio::test]
    async fn no_retry_classes_stop_after_one_attempt() {
        let client = Arc::new(FakeClient::new());
        client.always_login(Err(LoginError::new(
            LoginErrorKind::InvalidCredential,
            "wrong password",
        )));
        let mut s = settings();
        s.no_retry_on = vec![LoginErrorKind::InvalidCredential];
        let mgr = AuthManager::new(client.clone(), tmp_store("no-retry"), s);

        let err = mgr
            .authenticate(&AccountConfig::new("hal", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth { attempts: 1, .. }));
        assert_eq!(client.logins(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_extends_the_wait() {
        let client = Arc::new(FakeClient::new());
        client
            .push_login(Err(LoginError::rate_limited(
                "slow down",
                Some(Duration::from_secs(30)),
            )))
            .push_login(Ok(()));
        let mgr = AuthManager::new(
            client.clone(),
            tmp_store("rate-limit"),
            AuthSettings::default(),
        );

        let started = tokio::time::Instant::now();
        mgr.authenticate(&AccountConfig::new("ivy", "pw"))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn without_auto_retry_attempts_run_back_to_back() {
        let client = Arc::new(FakeClient::new());
        client.always_login(Err(LoginError::new(LoginErrorKind::NetworkError, "reset")));
        let s = AuthSettings {
            auto_retry: false,
            retry_delay: Duration::from_secs(10),
            ..AuthSettings::default()
        };
        let mgr = AuthManager::new(client.clone(), tmp_store("no-wait"), s);

        let started = tokio::time::Instant::now();
        let err = mgr
            .authenticate(&AccountConfig::new("kim", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth { attempts: 3, .. }));
        assert_eq!(client.logins(), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn logout_removes_the_stored_session() {
        let client = Arc::new(FakeClient::new());
        client.push_login(Ok(()));
        let store = tmp_store("logout");
        let acct = AccountConfig::new("jo", "pw");
        let mgr = manager(&client, store.clone());

        let session = mgr.authenticate(&acct).await.unwrap();
        assert!(store.path_for(&acct).exists());

        mgr.logout(&acct, &session).await.unwrap();
        assert!(!store.path_for(&acct).exists());
        assert_eq!(
            client
                .logout_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }
}
