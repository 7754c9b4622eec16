//! Scripted executor for tests
//!
//! Used by this crate and by the orchestrator/reconciler tests in
//! berth-deploy, so it lives in src rather than a test module.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::executor::CommandExecutor;
use crate::runner::CmdResult;

/// Executor that replays scripted results instead of spawning anything
///
/// Responses are keyed by the engine subcommand (the first argument:
/// "run", "inspect", "rm", ...). Each scripted response is consumed
/// once, in order; a subcommand with no remaining script gets a default
/// success with empty output. Every call is recorded for assertions.
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<Vec<String>>>,
    scripts: Mutex<HashMap<String, VecDeque<CmdResult>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call of an engine subcommand
    pub fn respond(&self, subcommand: &str, result: CmdResult) {
        self.scripts
            .lock()
            .entry(subcommand.to_string())
            .or_default()
            .push_back(result);
    }

    /// Queue the same response for the next `n` calls of a subcommand
    pub fn respond_n(&self, subcommand: &str, result: CmdResult, n: usize) {
        for _ in 0..n {
            self.respond(subcommand, result.clone());
        }
    }

    /// All recorded calls, each as [subcommand, args...]
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Number of calls made to one subcommand
    pub fn count(&self, subcommand: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.first().map(String::as_str) == Some(subcommand))
            .count()
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(
        &self,
        _program: &str,
        args: &[String],
        _timeout: Duration,
        _stdin: Option<&str>,
    ) -> CmdResult {
        self.calls.lock().push(args.to_vec());
        let key = args.first().cloned().unwrap_or_default();
        if let Some(queue) = self.scripts.lock().get_mut(&key) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        CmdResult::success("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_in_order() {
        let mock = MockExecutor::new();
        mock.respond("inspect", CmdResult::failure(1, "No such container"));
        mock.respond("inspect", CmdResult::success("running"));

        let first = mock
            .execute("docker", &["inspect".to_string()], Duration::from_secs(1), None)
            .await;
        let second = mock
            .execute("docker", &["inspect".to_string()], Duration::from_secs(1), None)
            .await;

        assert_eq!(first.code, 1);
        assert_eq!(second.out, "running");
        assert_eq!(mock.count("inspect"), 2);
    }

    #[tokio::test]
    async fn test_mock_defaults_to_success() {
        let mock = MockExecutor::new();
        let res = mock
            .execute("docker", &["pull".to_string()], Duration::from_secs(1), None)
            .await;
        assert!(res.ok());
    }
}
