use std::{collections::VecDeque, path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::Mutex,
};
use tracing::{debug, info};

use dmr_core::{config::Config, errors::Error, Result};

/// Stderr lines kept for error reports.
const STDERR_KEEP_LINES: usize = 40;
/// Lines logged when the bridge's stderr closes.
const STDERR_EXIT_LINES: usize = 5;

/// How to launch the bridge executable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let program = cfg
            .bridge_path
            .clone()
            .ok_or_else(|| Error::Config("DMR_BRIDGE_PATH is not set".to_string()))?;
        Ok(Self {
            program,
            args: cfg.bridge_args.clone(),
            request_timeout: cfg.request_timeout,
        })
    }
}

/// Most recent non-blank lines the bridge wrote to stderr.
#[derive(Debug, Default)]
pub(crate) struct StderrTail(VecDeque<String>);

impl StderrTail {
    pub(crate) fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        if self.0.len() == STDERR_KEEP_LINES {
            self.0.pop_front();
        }
        self.0.push_back(line.to_string());
    }

    /// The last `n` lines, oldest first.
    pub(crate) fn recent(&self, n: usize) -> String {
        let skip = self.0.len().saturating_sub(n);
        self.0
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The spawned bridge process and its stderr tail.
pub(crate) struct BridgeProcess {
    child: Mutex<Option<Child>>,
    pub(crate) stderr_tail: Arc<Mutex<StderrTail>>,
}

impl BridgeProcess {
    /// Spawn the bridge with piped stdio. Returns the process plus its stdin/stdout.
    pub(crate) fn spawn(
        cfg: &BridgeConfig,
    ) -> Result<(Self, tokio::process::ChildStdout, tokio::process::ChildStdin)> {
        let mut cmd = Command::new(&cfg.program);
        cmd.args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::External(format!(
                "failed to start bridge {}: {e}",
                cfg.program.display()
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("bridge stdout was not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::External("bridge stdin was not captured".to_string()))?;
        let stderr_tail = Arc::new(Mutex::new(StderrTail::default()));

        // Drain stderr so a chatty bridge never blocks on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            let program = cfg.program.display().to_string();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    debug!(target: "dmr_bridge::stderr", "{line}");
                    tail.lock().await.push(&line);
                }
                let last = tail.lock().await.recent(STDERR_EXIT_LINES);
                if last.is_empty() {
                    info!(bridge = %program, "bridge exited");
                } else {
                    info!(bridge = %program, "bridge exited; last stderr:\n{last}");
                }
            });
        }

        Ok((
            Self {
                child: Mutex::new(Some(child)),
                stderr_tail,
            },
            stdout,
            stdin,
        ))
    }

    pub(crate) async fn stderr_snapshot(&self) -> String {
        self.stderr_tail.lock().await.recent(STDERR_KEEP_LINES)
    }

    /// Kill and reap the process if it is still running.
    pub(crate) async fn kill(&self) -> Result<()> {
        let child = {
            let mut guard = self.child.lock().await;
            guard.take()
        };

        let Some(mut child) = child else {
            return Ok(());
        };

        // If it's already exited, `try_wait` reaps it.
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        // If kill fails and the process is still alive, keep the handle so
        // callers can retry instead of losing track of the child.
        match child.kill().await {
            Ok(()) => {
                let _ = child.wait().await?;
            }
            Err(e) => {
                if child.try_wait()?.is_none() {
                    let mut guard = self.child.lock().await;
                    *guard = Some(child);
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(())
    }
}
