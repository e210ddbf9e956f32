use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    auth::{
        retry::{RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY},
        types::LoginErrorKind,
    },
    domain::AccountConfig,
    errors::Error,
    platform::ThrottleConfig,
    totp::{TotpAlgorithm, TotpParams},
    Result,
};

/// Login behavior shared by every account in a run.
#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub auto_retry: bool,
    pub save_session: bool,
    pub validate_session: bool,
    /// Error classes that end the login loop immediately.
    pub no_retry_on: Vec<LoginErrorKind>,
    pub totp: TotpParams,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            auto_retry: true,
            save_session: true,
            validate_session: true,
            no_retry_on: Vec::new(),
            totp: TotpParams::default(),
        }
    }
}

impl AuthSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut p = RetryPolicy::new(self.max_retries, self.retry_delay);
        p.wait_between_attempts = self.auto_retry;
        for kind in &self.no_retry_on {
            p.set(*kind, RetryDecision::GiveUp);
        }
        p
    }
}

/// Typed configuration.
///
/// Precedence: environment (including `.env`) over the accounts file's
/// `settings` block over built-in defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub accounts_file: PathBuf,
    pub session_dir: PathBuf,

    pub auth: AuthSettings,
    /// Pause between consecutive accounts in a batch login.
    pub inter_account_delay: Duration,

    /// Default pause between sends offered by the console.
    pub send_delay: Duration,
    pub throttle: ThrottleConfig,

    // Bridge process
    pub bridge_path: Option<PathBuf>,
    pub bridge_args: Vec<String>,
    pub request_timeout: Duration,
}

/// On-disk accounts file: `{ "accounts": [...], "settings": {...} }`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub settings: FileSettings,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSettings {
    pub max_retries: Option<u32>,
    /// Milliseconds.
    pub retry_delay: Option<u64>,
    pub auto_retry: Option<bool>,
    pub save_session: Option<bool>,
    pub validate_session: Option<bool>,
    /// Milliseconds.
    pub inter_account_delay: Option<u64>,
    /// Seconds.
    pub send_delay: Option<u64>,
    #[serde(default)]
    pub no_retry_on: Vec<LoginErrorKind>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let accounts_file = get("DMR_ACCOUNTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("accounts.json"));
        let file = read_accounts_file(&accounts_file)?.unwrap_or_default();
        let file_settings = file.settings;

        let session_dir = match get("DMR_SESSION_DIR") {
            Some(d) => PathBuf::from(d),
            None => {
                let home = get("HOME").ok_or_else(|| {
                    Error::Config("HOME is not set (or set DMR_SESSION_DIR)".to_string())
                })?;
                PathBuf::from(home).join(".dmr").join("sessions")
            }
        };

        // Login behavior
        let max_retries = parse_u32(&get, "DMR_MAX_RETRIES")?
            .or(file_settings.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries == 0 {
            return Err(Error::Config("DMR_MAX_RETRIES must be at least 1".to_string()));
        }
        let retry_delay = parse_u64(&get, "DMR_RETRY_DELAY_MS")?
            .or(file_settings.retry_delay)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_DELAY);
        let auto_retry = parse_bool(&get, "DMR_AUTO_RETRY")?
            .or(file_settings.auto_retry)
            .unwrap_or(true);
        let save_session = parse_bool(&get, "DMR_SAVE_SESSION")?
            .or(file_settings.save_session)
            .unwrap_or(true);
        let validate_session = parse_bool(&get, "DMR_VALIDATE_SESSION")?
            .or(file_settings.validate_session)
            .unwrap_or(true);
        let no_retry_on = match get("DMR_NO_RETRY_ON") {
            Some(csv) => parse_csv(&csv)
                .map(|s| s.parse::<LoginErrorKind>())
                .collect::<Result<Vec<_>>>()?,
            None => file_settings.no_retry_on,
        };
        let totp_algorithm = match get("DMR_TOTP_ALGORITHM") {
            Some(s) => s.parse::<TotpAlgorithm>()?,
            None => TotpAlgorithm::default(),
        };

        // Defaults to the retry delay, as the batch pacing historically reused it.
        let inter_account_delay = parse_u64(&get, "DMR_INTER_ACCOUNT_DELAY_MS")?
            .or(file_settings.inter_account_delay)
            .map(Duration::from_millis)
            .unwrap_or(retry_delay);

        // Dispatch pacing
        let send_delay = Duration::from_secs(
            parse_u64(&get, "DMR_SEND_DELAY_SECS")?
                .or(file_settings.send_delay)
                .unwrap_or(5),
        );
        let throttle_defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            global_min_interval: parse_u64(&get, "DMR_GLOBAL_SEND_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(throttle_defaults.global_min_interval),
            per_destination_min_interval: parse_u64(&get, "DMR_PER_DESTINATION_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(throttle_defaults.per_destination_min_interval),
        };

        // Bridge
        let bridge_path = get("DMR_BRIDGE_PATH").map(PathBuf::from);
        let bridge_args = get("DMR_BRIDGE_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let request_timeout = Duration::from_millis(
            parse_u64(&get, "DMR_REQUEST_TIMEOUT_MS")?.unwrap_or(30_000),
        );

        Ok(Self {
            accounts_file,
            session_dir,
            auth: AuthSettings {
                max_retries,
                retry_delay,
                auto_retry,
                save_session,
                validate_session,
                no_retry_on,
                totp: TotpParams {
                    algorithm: totp_algorithm,
                    ..TotpParams::default()
                },
            },
            inter_account_delay,
            send_delay,
            throttle,
            bridge_path,
            bridge_args,
            request_timeout,
        })
    }

    /// Accounts from the accounts file (empty when the file does not exist).
    pub fn load_accounts(&self) -> Result<Vec<AccountConfig>> {
        let accounts = read_accounts_file(&self.accounts_file)?
            .map(|f| f.accounts)
            .unwrap_or_default();
        for (i, a) in accounts.iter().enumerate() {
            if a.username.trim().is_empty() {
                return Err(Error::Config(format!(
                    "{}: account #{} has an empty username",
                    self.accounts_file.display(),
                    i + 1
                )));
            }
        }
        Ok(accounts)
    }
}

fn read_accounts_file(path: &Path) -> Result<Option<AccountsFile>> {
    let txt = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    if txt.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&txt)
        .map(Some)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Export `KEY=value` pairs from a `.env` file without overriding variables
/// that are already set.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, value) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(key, value);
        }
    }
}

/// `KEY=value` lines; `#` comments, blank lines and an `export ` prefix are
/// accepted, and one pair of matching quotes around the value is dropped.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let l = l.strip_prefix("export ").unwrap_or(l);
            let (k, v) = l.split_once('=')?;
            let key = k.trim();
            if key.is_empty() {
                return None;
            }
            let v = v.trim();
            let unquoted = ['"', '\'']
                .iter()
                .find_map(|q| v.strip_prefix(*q)?.strip_suffix(*q))
                .unwrap_or(v);
            Some((key.to_string(), unquoted.to_string()))
        })
        .collect()
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    let Some(s) = get(key) else {
        return Ok(None);
    };
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got {s:?}"))),
    }
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    get(key)
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| Error::Config(format!("{key}: expected a whole number, got {s:?}")))
        })
        .transpose()
}

fn parse_u32(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u32>> {
    get(key)
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| Error::Config(format!("{key}: expected a whole number, got {s:?}")))
        })
        .transpose()
}

fn parse_csv(v: &str) -> impl Iterator<Item = &str> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty())
}
