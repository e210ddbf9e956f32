//! Durable per-account session storage.
//!
//! One JSON file per account. Writes go to a sibling temp file which is then
//! renamed over the target, so readers see either the old or the new session,
//! never a partial one. Two processes must not share a session file; that is a
//! documented precondition, not something enforced here.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    domain::{AccountConfig, Session},
    errors::Error,
    platform::PlatformClient,
    Result,
};

const SESSION_FILE_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionFileData {
    version: u32,
    saved_at: DateTime<Utc>,
    session: Session,
}

#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session file for an account: its explicit `session_file`, else
    /// `<dir>/<username>.json`.
    pub fn path_for(&self, account: &AccountConfig) -> PathBuf {
        match &account.session_file {
            Some(p) => p.clone(),
            None => self
                .dir
                .join(format!("{}.json", sanitize_file_stem(&account.username))),
        }
    }

    pub fn load(&self, path: &Path) -> Result<Session> {
        let txt = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SessionNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if txt.trim().is_empty() {
            return Err(Error::SessionNotFound {
                path: path.to_path_buf(),
            });
        }

        let data: SessionFileData =
            serde_json::from_str(&txt).map_err(|e| Error::SessionCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if data.version != SESSION_FILE_VERSION {
            return Err(Error::SessionCorrupt {
                path: path.to_path_buf(),
                reason: format!("unsupported session file version {}", data.version),
            });
        }

        Ok(data.session)
    }

    /// Load, folding "missing" and "corrupt" into `None`.
    pub fn load_if_usable(&self, path: &Path) -> Option<Session> {
        match self.load(path) {
            Ok(s) => Some(s),
            Err(Error::SessionNotFound { .. }) => None,
            Err(e) => {
                warn!("ignoring saved session: {e}");
                None
            }
        }
    }

    pub fn save(&self, path: &Path, session: &Session) -> Result<()> {
        let data = SessionFileData {
            version: SESSION_FILE_VERSION,
            saved_at: Utc::now(),
            session: session.clone(),
        };
        let txt = serde_json::to_string_pretty(&data)?;
        write_atomic(path, txt.as_bytes()).map_err(|e| Error::SessionWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "session saved");
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Liveness check through the client. Any error counts as "not valid".
    pub async fn validate(&self, client: &dyn PlatformClient, session: &mut Session) -> bool {
        match client.is_session_valid(session).await {
            Ok(true) => {
                session.mark_validated(Utc::now());
                true
            }
            Ok(false) => {
                session.mark_invalid();
                false
            }
            Err(e) => {
                warn!(username = %session.username, "session validation failed: {e}");
                session.mark_invalid();
                false
            }
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

    let result = (|| {
        let mut f = open_private(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn open_private(path: &Path) -> std::io::Result<fs::File> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

fn sanitize_file_stem(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let s = s.trim_start_matches('.').to_string();
    if s.is_empty() {
        "account".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;
    use serde_json::json;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dmr-session-test-{}-{}-{name}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn save_then_load_preserves_opaque_state() {
        let dir = tmp_dir("roundtrip");
        let store = SessionStore::new(&dir);
        let acct = AccountConfig::new("alice", "pw");
        let path = store.path_for(&acct);

        let session = Session::fresh("alice", json!({"cookies": ["a=b"], "device": {"id": 7}}));
        store.save(&path, &session).unwrap();

        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.state, session.state);
        assert!(!loaded.is_valid, "validity must be re-established after load");

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_and_corrupt_files_are_distinguished() {
        let dir = tmp_dir("corrupt");
        let store = SessionStore::new(&dir);
        let path = dir.join("bob.json");

        assert!(matches!(
            store.load(&path),
            Err(Error::SessionNotFound { .. })
        ));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(store.load(&path), Err(Error::SessionCorrupt { .. })));
        assert!(store.load_if_usable(&path).is_none());
    }

    #[test]
    fn explicit_session_file_wins_and_usernames_are_sanitized() {
        let store = SessionStore::new("/var/lib/dmr");
        let plain = AccountConfig::new("../evil/name", "pw");
        assert_eq!(
            store.path_for(&plain),
            PathBuf::from("/var/lib/dmr/_evil_name.json")
        );

        let explicit = AccountConfig::new("x", "pw").with_session_file("/tmp/x-session.json");
        assert_eq!(
            store.path_for(&explicit),
            PathBuf::from("/tmp/x-session.json")
        );
    }

    #[test]
    fn remove_reports_whether_a_file_existed() {
        let dir = tmp_dir("remove");
        let store = SessionStore::new(&dir);
        let path = dir.join("c.json");
        store.save(&path, &Session::fresh("c", json!({}))).unwrap();
        assert!(store.remove(&path).unwrap());
        assert!(!store.remove(&path).unwrap());
    }

    #[tokio::test]
    async fn validate_never_fails_and_marks_the_session() {
        let store = SessionStore::new(tmp_dir("validate"));
        let client = FakeClient::default();
        let mut session = Session::new("a", json!({}));

        client.set_session_valid(true);
        assert!(store.validate(&client, &mut session).await);
        assert!(session.is_valid);
        assert!(session.validated_at.is_some());

        client.fail_validation_with("socket closed");
        assert!(!store.validate(&client, &mut session).await);
        assert!(!session.is_valid);
    }
}
