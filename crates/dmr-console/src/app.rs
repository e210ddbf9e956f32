use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dmr_bridge::{BridgeClient, BridgeConfig};
use dmr_core::{
    auth::{AuthManager, BatchLogin},
    config::Config,
    dispatch::{Dispatcher, Payload, PayloadMode},
    domain::{AccountConfig, Destination, Session},
    errors::Error,
    platform::PlatformClient,
    session::SessionStore,
};

use crate::{
    prompt::Prompter,
    render,
    reporter::ConsoleReporter,
    selection::{parse_delay, select_destinations},
};

/// Everything `dmr send` collects before dispatching.
struct SendPlan {
    session: Session,
    inbox: Vec<Destination>,
    selected: Vec<Destination>,
    payload: Payload,
    delay: Duration,
}

/// Shared wiring for the console flows.
pub struct App {
    cfg: Config,
    client: Arc<BridgeClient>,
    manager: AuthManager,
}

impl App {
    /// Start the bridge and build the manager from config.
    pub fn start(cfg: Config) -> anyhow::Result<Self> {
        let bridge = BridgeConfig::from_config(&cfg)?;
        let client = Arc::new(BridgeClient::spawn(&bridge)?);
        Ok(Self::with_client(cfg, client))
    }

    pub fn with_client(cfg: Config, client: Arc<BridgeClient>) -> Self {
        let manager = AuthManager::new(
            client.clone(),
            SessionStore::new(&cfg.session_dir),
            cfg.auth.clone(),
        );
        Self {
            cfg,
            client,
            manager,
        }
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.client.shutdown().await {
            warn!("stopping bridge: {e}");
        }
    }

    /// `dmr login`: authenticate every configured account in order.
    pub async fn login_all(&self, cancel: &CancellationToken) -> anyhow::Result<usize> {
        let accounts = self.cfg.load_accounts()?;
        if accounts.is_empty() {
            bail!(
                "no accounts configured in {}",
                self.cfg.accounts_file.display()
            );
        }

        println!("Logging in {} account(s)...", accounts.len());
        let results = BatchLogin::new(&self.manager, self.cfg.inter_account_delay)
            .run(&accounts, cancel)
            .await;
        println!("\n{}", render::batch_summary(&results));

        Ok(results.iter().filter(|r| !r.is_success()).count())
    }

    /// `dmr logout`: log the named account out and forget its stored session.
    pub async fn logout(&self, name: &str) -> anyhow::Result<()> {
        let account = find_account(&self.cfg.load_accounts()?, name)?;
        let path = self.manager.store().path_for(&account);
        let session = match self.manager.store().load(&path) {
            Ok(s) => s,
            Err(Error::SessionNotFound { .. }) => {
                println!("No stored session for {}", account.username);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.manager
            .logout(&account, &session)
            .await
            .with_context(|| format!("logging out {}", account.username))?;
        println!("Logged out {}", account.username);
        Ok(())
    }

    /// `dmr send`: authenticate, pick destinations and payload, then send
    /// until `cancel` fires.
    ///
    /// Cancelling while prompting or logging in returns before anything is sent.
    pub async fn send<R, W>(
        &self,
        prompter: &mut Prompter<R, W>,
        account_name: Option<&str>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let plan = tokio::select! {
          plan = self.prepare_send(prompter, account_name) => plan?,
          _ = cancel.cancelled() => {
              info!("send cancelled before dispatch started");
              return Ok(());
          }
        };

        let sends_per_round = plan.payload.messages().len() * plan.selected.len();
        let reporter = Arc::new(ConsoleReporter::new(sends_per_round, plan.delay));
        let dispatcher = Dispatcher::new(self.client.clone(), reporter)
            .with_throttle(self.cfg.throttle)
            .with_inbox(plan.inbox);
        dispatcher
            .run_infinite_send(
                &plan.session,
                &plan.selected,
                &plan.payload,
                plan.delay,
                cancel,
            )
            .await?;
        Ok(())
    }

    async fn prepare_send<R, W>(
        &self,
        prompter: &mut Prompter<R, W>,
        account_name: Option<&str>,
    ) -> anyhow::Result<SendPlan>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let account = self.choose_account(prompter, account_name).await?;

        println!("Authenticating {}...", account.username);
        let session = self.manager.authenticate(&account).await?;
        println!("Logged in as {}", session.username);

        let inbox = self
            .client
            .get_inbox(&session)
            .await
            .with_context(|| format!("fetching inbox for {}", session.username))?;
        if inbox.is_empty() {
            bail!("inbox for {} is empty", session.username);
        }
        println!(
            "\nAvailable conversations ({}):\n{}\n",
            inbox.len(),
            render::destination_list(&inbox)
        );

        let selected: Vec<Destination> = prompter
            .ask_until(
                "Destination numbers (comma-separated, e.g. 1,2,3): ",
                "No valid destinations selected",
                |s| Some(select_destinations(&inbox, s)).filter(|v| !v.is_empty()),
            )
            .await?;
        println!("\n{}\n", render::selection_summary(&selected));

        let payload = self.ask_payload(prompter).await?;
        let default_delay = self.cfg.send_delay;
        let delay = prompter
            .ask_until(
                &format!(
                    "Delay between messages in seconds [{}]: ",
                    default_delay.as_secs()
                ),
                "Enter a whole number of seconds (0 or more)",
                |s| parse_delay(s, default_delay),
            )
            .await?;

        Ok(SendPlan {
            session,
            inbox,
            selected,
            payload,
            delay,
        })
    }

    async fn choose_account<R, W>(
        &self,
        prompter: &mut Prompter<R, W>,
        name: Option<&str>,
    ) -> anyhow::Result<AccountConfig>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let accounts = self.cfg.load_accounts()?;
        if let Some(name) = name {
            return find_account(&accounts, name);
        }
        match accounts.len() {
            0 => ask_credentials(prompter).await,
            1 => Ok(accounts[0].clone()),
            n => {
                for (i, a) in accounts.iter().enumerate() {
                    let desc = if a.description.is_empty() {
                        String::new()
                    } else {
                        format!(" - {}", a.description)
                    };
                    prompter
                        .say(&format!("  {}. {}{desc}", i + 1, a.username))
                        .await?;
                }
                let idx = prompter
                    .ask_until("Account number: ", "Enter one of the numbers above", |s| {
                        s.trim()
                            .parse::<usize>()
                            .ok()
                            .filter(|i| (1..=n).contains(i))
                    })
                    .await?;
                Ok(accounts[idx - 1].clone())
            }
        }
    }

    async fn ask_payload<R, W>(&self, prompter: &mut Prompter<R, W>) -> anyhow::Result<Payload>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mode = prompter
            .ask_until(
                "Send mode: 1) each line as its own message  2) whole text as one message [2]: ",
                "Enter 1 or 2",
                |s| {
                    if s.trim().is_empty() {
                        Some(PayloadMode::Single)
                    } else {
                        s.parse::<PayloadMode>().ok()
                    }
                },
            )
            .await?;

        loop {
            let input = prompter.ask("Message text or path to a text file: ").await?;
            match Payload::from_input(&input, mode) {
                Ok(p) => {
                    let chars: usize = p.messages().iter().map(|m| m.chars().count()).sum();
                    prompter
                        .say(&format!(
                            "Loaded {} message(s), {chars} characters",
                            p.messages().len()
                        ))
                        .await?;
                    return Ok(p);
                }
                Err(e) => prompter.say(&e.to_string()).await?,
            }
        }
    }
}

fn find_account(accounts: &[AccountConfig], name: &str) -> anyhow::Result<AccountConfig> {
    accounts
        .iter()
        .find(|a| a.username.eq_ignore_ascii_case(name))
        .cloned()
        .with_context(|| format!("account {name} is not configured"))
}

/// Credentials typed in by the operator when no accounts file exists.
async fn ask_credentials<R, W>(prompter: &mut Prompter<R, W>) -> anyhow::Result<AccountConfig>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let username = prompter
        .ask_until("Username: ", "Username is required", |s| {
            Some(s.trim().to_string()).filter(|s| !s.is_empty())
        })
        .await?;
    let password = prompter.ask("Password: ").await?;
    let totp = prompter
        .ask("TOTP secret (press Enter to skip): ")
        .await?;

    let mut account = AccountConfig::new(username, password);
    if !totp.trim().is_empty() {
        account = account.with_totp_secret(totp.trim());
    }
    let session_file = prompter
        .ask("Session file (press Enter for default): ")
        .await?;
    if !session_file.trim().is_empty() {
        account = account.with_session_file(session_file.trim());
    }
    Ok(account)
}
