//! Server configuration, built from CLI flags and defaults.
//!
//! There is no configuration-file parser here; the binary assembles a
//! `ServerConfig` from command-line arguments.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the listener, worker pool, and session loop.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the acceptor binds.
    pub listen: SocketAddr,
    /// Number of pooled session workers. A worker waiting on an approval
    /// decision holds its slot, so size the pool with that in mind.
    pub workers: usize,
    /// Maximum total session lifetime, regardless of activity.
    pub session_timeout: Duration,
    /// Maximum gap between successive messages within a session.
    pub idle_timeout: Duration,
    /// Read poll interval; timeouts and the shutdown flag are checked at
    /// this granularity.
    pub poll_interval: Duration,
    /// Maximum message size; a message must arrive in a single read.
    pub recv_buffer: usize,
    /// Identifiers accepted at the handshake.
    pub allowed_ids: Vec<String>,
    /// Append-only event log file.
    pub log_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            workers: 10,
            session_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            recv_buffer: 4096,
            allowed_ids: vec!["Jarvis".to_string()],
            log_file: PathBuf::from("server.log"),
        }
    }
}

impl ServerConfig {
    pub fn allows_identifier(&self, identifier: &str) -> bool {
        self.allowed_ids.iter().any(|id| id == identifier)
    }
}
