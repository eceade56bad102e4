//! Command execution: host shell commands and in-process Lua evaluation.
//!
//! Neither mode treats a failing command as a session-level error. A
//! non-zero exit still yields its captured output, and a Lua evaluation
//! failure is returned as the output text. No resource limits are
//! applied to either mode.

use std::path::Path;
use std::sync::{Arc, Mutex};

use mlua::{Function, Lua, Value, Variadic};
use tokio::process::Command;
use tracing::{error, warn};

/// Run a command through the host shell with the given working
/// directory, capturing stdout and stderr as one text blob.
pub async fn run_shell(command: &str, cwd: &Path) -> String {
    let output = shell_command(command).current_dir(cwd).output().await;
    match output {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&out.stderr));
            if !out.status.success() {
                warn!(status = ?out.status, "command exited non-zero");
            }
            text
        }
        Err(e) => {
            error!(error = %e, "failed to spawn shell");
            format!("Failed to execute command: {e}")
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Evaluate Lua source in-process, capturing only what it prints.
///
/// Runs on the blocking pool; the interpreter lives for a single
/// evaluation and shares nothing with the server beyond its address
/// space.
pub async fn run_code(source: String) -> String {
    tokio::task::spawn_blocking(move || eval_lua(&source))
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "code evaluation task failed");
            format!("Code evaluation failed: {e}")
        })
}

fn eval_lua(source: &str) -> String {
    let lua = Lua::new();
    let buffer = Arc::new(Mutex::new(String::new()));

    let result = (|| -> mlua::Result<()> {
        let sink = Arc::clone(&buffer);
        // Replace print so output lands in the capture buffer instead of
        // the server's stdout.
        let print = lua.create_function(move |lua, args: Variadic<Value>| {
            let tostring: Function = lua.globals().get("tostring")?;
            let mut rendered = Vec::with_capacity(args.len());
            for value in args {
                rendered.push(tostring.call::<_, String>(value)?);
            }
            let mut out = sink.lock().expect("print buffer poisoned");
            out.push_str(&rendered.join("\t"));
            out.push('\n');
            Ok(())
        })?;
        lua.globals().set("print", print)?;
        lua.load(source).exec()
    })();

    match result {
        Ok(()) => buffer.lock().expect("print buffer poisoned").clone(),
        Err(e) => {
            error!(error = %e, "error evaluating code");
            e.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap()
    }

    #[tokio::test]
    async fn shell_captures_stdout() {
        let output = run_shell("echo Hello", &cwd()).await;
        assert_eq!(output, "Hello\n");
    }

    #[tokio::test]
    async fn shell_captures_output_on_nonzero_exit() {
        let output = run_shell("echo before; exit 3", &cwd()).await;
        assert_eq!(output, "before\n");
    }

    #[tokio::test]
    async fn shell_captures_stderr_too() {
        let output = run_shell("echo out; echo err 1>&2", &cwd()).await;
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[tokio::test]
    async fn shell_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_shell("pwd", dir.path()).await;
        assert_eq!(
            output.trim(),
            dir.path().canonicalize().unwrap().to_str().unwrap()
        );
    }

    #[tokio::test]
    async fn code_print_is_captured() {
        let output = run_code("print('Hello from run')".to_string()).await;
        assert_eq!(output, "Hello from run\n");
    }

    #[tokio::test]
    async fn code_print_joins_arguments_with_tabs() {
        let output = run_code("print('a', 1, true)".to_string()).await;
        assert_eq!(output, "a\t1\ttrue\n");
    }

    #[tokio::test]
    async fn code_failure_becomes_output_text() {
        let output = run_code("error('boom')".to_string()).await;
        assert!(output.contains("boom"));
    }

    #[tokio::test]
    async fn code_syntax_error_becomes_output_text() {
        let output = run_code("print(".to_string()).await;
        assert!(!output.is_empty());
    }
}
