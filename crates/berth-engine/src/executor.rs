//! Executor seam between the engine client and real process execution

use std::time::Duration;

use async_trait::async_trait;

use crate::runner::{self, CmdResult};

/// Executes engine commands; the seam that lets orchestration logic run
/// against a scripted mock in tests
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        stdin: Option<&str>,
    ) -> CmdResult;
}

/// Executor that spawns real processes
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        stdin: Option<&str>,
    ) -> CmdResult {
        runner::run(program, args, timeout, stdin).await
    }
}
