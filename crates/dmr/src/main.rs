use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use dmr_console::{App, Prompter};
use dmr_core::config::Config;

#[derive(Parser)]
#[command(name = "dmr", about = "Multi-account login and realtime direct-message relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in every configured account and store their sessions.
    Login,
    /// Authenticate one account and send to selected conversations until Ctrl+C.
    Send {
        /// Username from the accounts file (prompted when omitted).
        #[arg(long)]
        account: Option<String>,
    },
    /// Log out an account and delete its stored session.
    Logout {
        #[arg(long)]
        account: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dmr_core::logging::init("dmr")?;

    let cfg = Config::load()?;
    let app = App::start(cfg)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping...");
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Commands::Login => app.login_all(&cancel).await.and_then(|failed| {
            if failed > 0 {
                anyhow::bail!("{failed} account(s) failed to log in");
            }
            Ok(())
        }),
        Commands::Send { account } => {
            let mut prompter = Prompter::stdio();
            app.send(&mut prompter, account.as_deref(), cancel.clone())
                .await
        }
        Commands::Logout { account } => app.logout(&account).await,
    };

    app.shutdown().await;

    // A prompt's stdin read cannot be cancelled and would keep the runtime
    // alive until the operator presses Enter.
    if cancel.is_cancelled() {
        if let Err(e) = &result {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
        std::process::exit(0);
    }
    result
}
