//! Timeout-bounded external command execution
//!
//! A failed external command must never crash the caller: engine-not-
//! found, spawn errors and timeouts all surface as a synthetic exit
//! code with the underlying error text in stderr, so callers can
//! pattern-match on text without exception handling.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Synthetic exit code for a missing binary
pub const EXIT_NOT_FOUND: i32 = 127;

/// Synthetic exit code for a command that exceeded its timeout
pub const EXIT_TIMEOUT: i32 = 124;

/// Captured result of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdResult {
    pub code: i32,
    pub out: String,
    pub err: String,
}

impl CmdResult {
    pub fn ok(&self) -> bool {
        self.code == 0
    }

    /// Stderr if non-empty, otherwise stdout — the most useful text for
    /// error messages
    pub fn detail(&self) -> &str {
        if self.err.trim().is_empty() {
            self.out.trim()
        } else {
            self.err.trim()
        }
    }

    pub fn success(out: impl Into<String>) -> Self {
        Self {
            code: 0,
            out: out.into(),
            err: String::new(),
        }
    }

    pub fn failure(code: i32, err: impl Into<String>) -> Self {
        Self {
            code,
            out: String::new(),
            err: err.into(),
        }
    }
}

/// Run an external command, capturing exit code, stdout and stderr
///
/// A still-running process at the timeout is force-terminated and
/// reported as a failure result, not a hang.
pub async fn run(
    program: &str,
    args: &[String],
    timeout: Duration,
    stdin: Option<&str>,
) -> CmdResult {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return CmdResult::failure(EXIT_NOT_FOUND, format!("{program}: {e}"));
        }
        Err(e) => return CmdResult::failure(1, e.to_string()),
    };

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            // Closing the pipe signals EOF to the child
            let _ = pipe.write_all(input.as_bytes()).await;
        }
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => CmdResult {
            code: output.status.code().unwrap_or(-1),
            out: String::from_utf8_lossy(&output.stdout).into_owned(),
            err: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Ok(Err(e)) => CmdResult::failure(1, e.to_string()),
        // kill_on_drop terminates the abandoned child
        Err(_) => CmdResult::failure(
            EXIT_TIMEOUT,
            format!("{program} timed out after {}s", timeout.as_secs()),
        ),
    }
}
