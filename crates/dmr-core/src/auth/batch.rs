use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    domain::{AccountConfig, Session},
    errors::Error,
    Result,
};

use super::manager::AuthManager;

#[derive(Debug)]
pub struct BatchResult {
    pub username: String,
    pub description: String,
    pub outcome: Result<Session>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Sequential multi-account login.
///
/// One account's failure never stops the batch; every account gets a result.
pub struct BatchLogin<'a> {
    manager: &'a AuthManager,
    inter_account_delay: Duration,
}

impl<'a> BatchLogin<'a> {
    pub fn new(manager: &'a AuthManager, inter_account_delay: Duration) -> Self {
        Self {
            manager,
            inter_account_delay,
        }
    }

    /// Authenticate `accounts` in order.
    ///
    /// Once `cancel` fires, accounts not yet started are reported as
    /// [`Error::Cancelled`]; an account already logging in is allowed to finish.
    pub async fn run(&self, accounts: &[AccountConfig], cancel: &CancellationToken) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(accounts.len());

        for (i, account) in accounts.iter().enumerate() {
            if i > 0 && !cancel.is_cancelled() && !self.inter_account_delay.is_zero() {
                tokio::select! {
                  _ = cancel.cancelled() => {},
                  _ = sleep(self.inter_account_delay) => {},
                }
            }

            let outcome = if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                info!(
                    username = %account.username,
                    "batch login {}/{}",
                    i + 1,
                    accounts.len()
                );
                self.manager.authenticate(account).await
            };

            if let Err(e) = &outcome {
                if !matches!(e, Error::Cancelled) {
                    warn!(username = %account.username, "{e}");
                }
            }

            results.push(BatchResult {
                username: account.username.clone(),
                description: account.description.clone(),
                outcome,
            });
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        info!("batch login finished: {ok}/{} succeeded", results.len());
        results
    }
}
