//! Engine client: container lifecycle commands for both dialects

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use berth_core::{Config, EngineDialect, Error, RegistryConfig, ResourceLimits, Result};
use tracing::debug;

use crate::executor::{CommandExecutor, ProcessExecutor};
use crate::runner::{CmdResult, EXIT_NOT_FOUND};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
const NETWORK_CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(300);
const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);
const RUN_TIMEOUT: Duration = Duration::from_secs(120);
const LOGS_TIMEOUT: Duration = Duration::from_secs(10);
const IMAGES_TIMEOUT: Duration = Duration::from_secs(30);
const RMI_TIMEOUT: Duration = Duration::from_secs(60);
const PRUNE_TIMEOUT: Duration = Duration::from_secs(60);
const PS_TIMEOUT: Duration = Duration::from_secs(5);

/// Observed container state from `inspect`
#[derive(Debug, Clone)]
pub struct ContainerState {
    pub status: String,
    pub exit_code: i32,
    pub image: Option<String>,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// Definitive terminal signal: the container stopped and will not
    /// come back on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "exited" | "dead")
    }
}

/// Everything needed to compose a `run` invocation
pub struct RunSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub network: Option<&'a str>,
    pub labels: &'a BTreeMap<String, String>,
    pub env: &'a [(String, String)],
    pub limits: &'a ResourceLimits,
    /// Atomic-replace dialect only
    pub replace: bool,
}

/// Client for one container engine instance
pub struct Engine {
    bin: String,
    dialect: EngineDialect,
    executor: Arc<dyn CommandExecutor>,
}

impl Engine {
    pub fn new(bin: String, dialect: EngineDialect, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            bin,
            dialect,
            executor,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.engine_bin.clone(), cfg.dialect, Arc::new(ProcessExecutor))
    }

    pub fn dialect(&self) -> EngineDialect {
        self.dialect
    }

    async fn exec(&self, args: Vec<String>, timeout: Duration, stdin: Option<&str>) -> CmdResult {
        debug!(bin = %self.bin, args = ?args, "engine command");
        self.executor.execute(&self.bin, &args, timeout, stdin).await
    }

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    /// "not found" is a normal answer for idempotent removals and
    /// absence checks, not a failure
    pub fn is_not_found(res: &CmdResult) -> bool {
        let text = res.err.to_lowercase();
        text.contains("no such container")
            || text.contains("no such object")
            || text.contains("no such image")
            || text.contains("no such network")
    }

    /// Map a failed engine command to a distinct unreachability
    /// diagnostic: binary missing, permission denied, or daemon down
    pub fn unreachable_error(&self, res: &CmdResult) -> Error {
        if res.code == EXIT_NOT_FOUND {
            return Error::EngineNotFound(format!(
                "engine binary '{}' not found: {}",
                self.bin,
                res.detail()
            ));
        }
        let text = res.err.to_lowercase();
        if text.contains("permission denied") {
            Error::EnginePermissionDenied(res.detail().to_string())
        } else {
            Error::EngineUnavailable(res.detail().to_string())
        }
    }

    /// Inspect a container: `Ok(None)` means absent, `Err` means the
    /// engine itself could not be reached
    pub async fn inspect_state(&self, name: &str) -> Result<Option<ContainerState>> {
        let res = self
            .exec(
                Self::args(&[
                    "inspect",
                    "-f",
                    "{{.State.Status}}|{{.State.ExitCode}}|{{.Config.Image}}",
                    name,
                ]),
                INSPECT_TIMEOUT,
                None,
            )
            .await;
        if res.ok() {
            let line = res.out.lines().next().unwrap_or("").trim();
            let mut parts = line.splitn(3, '|');
            let status = parts.next().unwrap_or("unknown").trim().to_string();
            let exit_code = parts
                .next()
                .and_then(|s| s.trim().parse::<i32>().ok())
                .unwrap_or(0);
            let image = parts
                .next()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Ok(Some(ContainerState {
                status,
                exit_code,
                image,
            }))
        } else if Self::is_not_found(&res) {
            Ok(None)
        } else {
            Err(self.unreachable_error(&res))
        }
    }

    /// Read a single container label, best-effort
    pub async fn label_value(&self, name: &str, key: &str) -> Option<String> {
        let fmt = format!("{{{{index .Config.Labels \"{key}\"}}}}");
        let res = self
            .exec(
                Self::args(&["inspect", "-f", &fmt, name]),
                INSPECT_TIMEOUT,
                None,
            )
            .await;
        if !res.ok() {
            return None;
        }
        let value = res.out.trim();
        if value.is_empty() || value == "<no value>" {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Make sure the declared network exists, tolerating a concurrent
    /// create racing ours
    pub async fn ensure_network(&self, network: &str) -> Result<()> {
        let inspect = self
            .exec(
                Self::args(&["network", "inspect", network]),
                INSPECT_TIMEOUT,
                None,
            )
            .await;
        if inspect.ok() {
            return Ok(());
        }
        if inspect.code == EXIT_NOT_FOUND {
            return Err(self.unreachable_error(&inspect));
        }
        let create = self
            .exec(
                Self::args(&["network", "create", network]),
                NETWORK_CREATE_TIMEOUT,
                None,
            )
            .await;
        if create.ok() || create.err.to_lowercase().contains("already exists") {
            Ok(())
        } else {
            Err(Error::DeployFailed(format!(
                "network create failed: {}",
                create.detail()
            )))
        }
    }

    /// Registry login; password goes through stdin, never argv
    pub async fn login(&self, registry: &RegistryConfig) -> CmdResult {
        self.exec(
            Self::args(&[
                "login",
                "-u",
                &registry.username,
                "--password-stdin",
                &registry.url,
            ]),
            LOGIN_TIMEOUT,
            Some(&registry.password),
        )
        .await
    }

    pub async fn pull(&self, image: &str) -> CmdResult {
        self.exec(Self::args(&["pull", image]), PULL_TIMEOUT, None).await
    }

    /// Force-remove a container by name
    pub async fn remove_container(&self, name: &str) -> CmdResult {
        self.exec(Self::args(&["rm", "-f", name]), REMOVE_TIMEOUT, None)
            .await
    }

    pub async fn run_container(&self, spec: &RunSpec<'_>) -> CmdResult {
        let mut args = Self::args(&["run", "-d", "--restart=always"]);
        if spec.replace {
            args.push("--replace".to_string());
        }
        args.push("--name".to_string());
        args.push(spec.name.to_string());
        if let Some(network) = spec.network {
            args.push("--network".to_string());
            args.push(network.to_string());
        }
        args.extend(spec.limits.to_flags());
        for (key, value) in spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.to_string());
        self.exec(args, RUN_TIMEOUT, None).await
    }

    /// Last lines of a container's combined output, best-effort
    pub async fn log_tail(&self, name: &str, lines: u32) -> String {
        let res = self
            .exec(
                Self::args(&["logs", "--tail", &lines.to_string(), name]),
                LOGS_TIMEOUT,
                None,
            )
            .await;
        let mut text = res.out;
        if !res.err.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&res.err);
        }
        text.trim().to_string()
    }

    /// Count running containers whose name starts with the prefix
    pub async fn running_count(&self, name_prefix: &str) -> Option<usize> {
        let res = self
            .exec(
                Self::args(&[
                    "ps",
                    "--filter",
                    &format!("name=^{name_prefix}"),
                    "--format",
                    "{{.Names}}",
                ]),
                PS_TIMEOUT,
                None,
            )
            .await;
        if res.ok() {
            Some(res.out.lines().filter(|l| !l.trim().is_empty()).count())
        } else {
            None
        }
    }

    /// All local repository:tag pairs
    pub async fn list_image_tags(&self) -> Result<Vec<String>> {
        let res = self
            .exec(
                Self::args(&["images", "--format", "{{.Repository}}:{{.Tag}}"]),
                IMAGES_TIMEOUT,
                None,
            )
            .await;
        if res.ok() {
            Ok(res
                .out
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect())
        } else {
            Err(self.unreachable_error(&res))
        }
    }

    pub async fn remove_image(&self, reference: &str) -> CmdResult {
        self.exec(Self::args(&["rmi", "-f", reference]), RMI_TIMEOUT, None)
            .await
    }

    /// Prune dangling layers; never touches tagged images
    pub async fn prune_dangling(&self) -> CmdResult {
        self.exec(Self::args(&["image", "prune", "-f"]), PRUNE_TIMEOUT, None)
            .await
    }
}
