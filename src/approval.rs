//! Operator approval gate for dangerous commands.
//!
//! The gate is injected at server construction so tests (or alternative
//! frontends) can substitute the decision source without touching any
//! process-wide state. The call is synchronous from the session's point
//! of view: the worker handling the session is occupied until a decision
//! arrives.

use std::io::{BufRead, Write};
use std::net::SocketAddr;

use async_trait::async_trait;

/// Outcome of one approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Denied,
}

/// One pending decision about a flagged command. Ephemeral; never
/// persisted.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub identifier: String,
    pub addr: SocketAddr,
    pub command: String,
}

impl ApprovalRequest {
    /// Prompt shown to the approver.
    pub fn prompt(&self) -> String {
        format!(
            "Approve dangerous command from {} @ {}: {}\nApprove? (Y/N): ",
            self.identifier, self.addr, self.command
        )
    }
}

/// Decision source consulted before a dangerous command runs.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Obtain a yes/no decision for the request. Blocks the calling
    /// worker until an answer is available.
    async fn approve(&self, request: &ApprovalRequest) -> Approval;
}

/// Reads the decision from the server operator's terminal. Anything
/// other than an explicit `y`/`Y` is a denial.
pub struct StdinApproval;

#[async_trait]
impl ApprovalGate for StdinApproval {
    async fn approve(&self, request: &ApprovalRequest) -> Approval {
        let prompt = request.prompt();
        let answer = tokio::task::spawn_blocking(move || {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(_) => line,
                Err(_) => String::new(),
            }
        })
        .await
        .unwrap_or_default();
        if answer.trim().eq_ignore_ascii_case("y") {
            Approval::Approved
        } else {
            Approval::Denied
        }
    }
}

/// Gate that always returns the same decision. Useful for tests and
/// unattended deployments that want a blanket policy.
pub struct FixedApproval(pub Approval);

#[async_trait]
impl ApprovalGate for FixedApproval {
    async fn approve(&self, _request: &ApprovalRequest) -> Approval {
        self.0
    }
}
