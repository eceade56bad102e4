//! Dangerous-command classification.
//!
//! Best-effort keyword heuristic, not a sandbox: a command is flagged if
//! any destructive-operation substring appears anywhere in its text. No
//! shell-aware parsing, so compound commands are flagged as a whole.

/// Substrings that mark a command as requiring operator approval.
pub const DANGEROUS_KEYWORDS: &[&str] = &[
    "rm -rf", "del /f", "mkfs", "dd if=", "reboot", "poweroff", "halt",
];

/// Check whether the command contains any dangerous keyword.
pub fn is_dangerous(command: &str) -> bool {
    DANGEROUS_KEYWORDS.iter().any(|kw| command.contains(kw))
}
