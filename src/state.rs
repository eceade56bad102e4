//! Shared server state, explicitly owned and passed to every worker.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::debug;

/// Process-lifetime registry of authorized session tokens.
///
/// Insert-only: a token, once issued, stays valid until the process
/// exits. There is no expiry or revocation.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: Mutex<HashSet<String>>,
}

impl TokenRegistry {
    /// Generate a fresh 128-bit token, register it, and return it.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens
            .lock()
            .expect("token registry poisoned")
            .insert(token.clone());
        debug!(%token, "generated new token");
        token
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens
            .lock()
            .expect("token registry poisoned")
            .contains(token)
    }
}

/// State shared by all workers: the token registry, the shutdown flag,
/// the shared working directory, and the server start instant.
///
/// The working directory is deliberately process-wide, so one session's
/// `cd` is visible to every other session. The read-modify-write of a
/// directory change is guarded by the mutex.
#[derive(Debug)]
pub struct ServerState {
    pub tokens: TokenRegistry,
    workdir: Mutex<PathBuf>,
    shutdown: AtomicBool,
    started_at: Instant,
}

impl ServerState {
    pub fn new() -> Self {
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            tokens: TokenRegistry::default(),
            workdir: Mutex::new(workdir),
            shutdown: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Snapshot of the shared working directory.
    pub fn workdir(&self) -> PathBuf {
        self.workdir.lock().expect("workdir poisoned").clone()
    }

    /// Resolve `path` against the shared working directory and switch to
    /// it. Returns the canonicalized directory on success.
    pub fn change_workdir(&self, path: &str) -> io::Result<PathBuf> {
        let mut guard = self.workdir.lock().expect("workdir poisoned");
        let candidate = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            guard.join(path)
        };
        let resolved = candidate.canonicalize()?;
        if !resolved.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", resolved.display()),
            ));
        }
        *guard = resolved.clone();
        Ok(resolved)
    }

    /// Monotonic false-to-true transition; never reset.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Format an uptime duration as `H:MM:SS` with sub-second truncation,
/// growing a days prefix past 24 hours.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    match days {
        0 => format!("{hours}:{minutes:02}:{seconds:02}"),
        1 => format!("1 day, {hours}:{minutes:02}:{seconds:02}"),
        n => format!("{n} days, {hours}:{minutes:02}:{seconds:02}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn issued_tokens_are_unique_and_contained() {
        let registry = TokenRegistry::default();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let token = registry.issue();
            assert_eq!(token.len(), 32);
            assert!(registry.contains(&token));
            assert!(seen.insert(token), "token issued twice");
        }
        assert!(!registry.contains("bogus"));
    }

    #[test]
    fn change_workdir_rejects_missing_directory() {
        let state = ServerState::new();
        let before = state.workdir();
        assert!(state.change_workdir("/no/such/dir/anywhere").is_err());
        assert_eq!(state.workdir(), before);
    }

    #[test]
    fn change_workdir_resolves_relative_paths() {
        let state = ServerState::new();
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("inner");
        std::fs::create_dir(&sub).unwrap();

        let resolved = state.change_workdir(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());

        let resolved = state.change_workdir("inner").unwrap();
        assert_eq!(resolved, sub.canonicalize().unwrap());
        assert_eq!(state.workdir(), resolved);
    }

    #[test]
    fn shutdown_flag_is_monotonic() {
        let state = ServerState::new();
        assert!(!state.shutdown_requested());
        state.request_shutdown();
        assert!(state.shutdown_requested());
        state.request_shutdown();
        assert!(state.shutdown_requested());
    }

    #[test]
    fn uptime_formatting_truncates_subseconds() {
        assert_eq!(format_uptime(Duration::from_millis(62_900)), "0:01:02");
        assert_eq!(format_uptime(Duration::from_secs(3_661)), "1:01:01");
        assert_eq!(
            format_uptime(Duration::from_secs(86_400 + 7_200 + 3)),
            "1 day, 2:00:03"
        );
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400)), "2 days, 0:00:00");
    }
}
