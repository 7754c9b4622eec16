//! Best-effort heartbeat reporting to the control plane
//!
//! Keeps the node's record fresh so the control plane does not mark it
//! STALE. Every failure here is logged and swallowed; heartbeats never
//! affect request handling.

use std::sync::Arc;
use std::time::Duration;

use berth_core::constants::CONTAINER_NAME_PREFIX;
use berth_core::Config;
use berth_engine::Engine;
use serde::Serialize;
use sysinfo::Disks;
use tracing::{debug, warn};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody<'a> {
    node_name: &'a str,
    agent_base_url: &'a str,
    gateway_base_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_free_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_free_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_count: Option<usize>,
}

pub struct Heartbeat {
    cfg: Arc<Config>,
    engine: Arc<Engine>,
    client: reqwest::Client,
}

impl Heartbeat {
    pub fn new(cfg: Arc<Config>, engine: Arc<Engine>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HEARTBEAT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            cfg,
            engine,
            client,
        }
    }

    /// Report the node once; skipped with a warning when the control
    /// plane endpoint is not configured
    pub async fn send(&self) {
        let (Some(deploy_base), Some(node_token)) =
            (&self.cfg.deploy_base_url, &self.cfg.deploy_node_token)
        else {
            warn!("heartbeat skipped: deploy base url/node token not configured");
            return;
        };
        let (Some(agent_base), Some(gateway_base)) =
            (&self.cfg.agent_base_url, &self.cfg.gateway_base_url)
        else {
            warn!("heartbeat skipped: agent/gateway base url not configured");
            return;
        };

        let (disk_free_pct, disk_free_bytes) = disk_metrics();
        let container_count = self.engine.running_count(CONTAINER_NAME_PREFIX).await;

        let body = HeartbeatBody {
            node_name: &self.cfg.node_name,
            agent_base_url: agent_base,
            gateway_base_url: gateway_base,
            disk_free_pct,
            disk_free_bytes,
            container_count,
        };
        let url = format!(
            "{}/internal/runtime-nodes/heartbeat",
            deploy_base.trim_end_matches('/')
        );

        match self
            .client
            .post(&url)
            .header("X-RT-Node-Token", node_token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(node = %self.cfg.node_name, "heartbeat ok");
            }
            Ok(resp) => warn!(status = %resp.status(), "heartbeat rejected"),
            Err(e) => warn!(error = %e, "heartbeat failed"),
        }
    }

    /// Fire-and-forget refresh after a lifecycle change
    pub fn refresh(self: &Arc<Self>) {
        let heartbeat = Arc::clone(self);
        tokio::spawn(async move {
            heartbeat.send().await;
        });
    }

    /// Periodic reporting loop; the first tick fires immediately
    pub fn spawn_loop(self: &Arc<Self>) {
        let heartbeat = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(heartbeat.cfg.heartbeat_secs.max(1)));
            loop {
                interval.tick().await;
                heartbeat.send().await;
            }
        });
    }
}

/// Free-space metrics for the root filesystem, best-effort
fn disk_metrics() -> (Option<f64>, Option<u64>) {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().first());
    match root {
        Some(disk) if disk.total_space() > 0 => {
            let free = disk.available_space();
            let pct = (free as f64 / disk.total_space() as f64) * 100.0;
            (Some((pct * 100.0).round() / 100.0), Some(free))
        }
        _ => (None, None),
    }
}
