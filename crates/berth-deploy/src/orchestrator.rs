//! Deployment state machine
//!
//! Sequences engine and database operations for deploy, stop, delete
//! and status. The run command returning success only means the engine
//! accepted the spec; post-start verification polls until the process
//! is observed alive, so a crash-looping image fails the deploy instead
//! of silently reporting success while traffic gets 502s.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use berth_core::constants::{CRASH_LOG_TAIL_LINES, VERIFY_POLL_INTERVAL_MS};
use berth_core::{
    AppRef, AppStatusResponse, Config, DeleteRequest, DeleteResponse, DeployRequest,
    DeployResponse, Error, ImageCleanup, Result, StepOutcome, StopRequest, StopResponse,
};
use berth_db::MongoStore;
use berth_engine::images;
use berth_engine::{Engine, RunSpec, EXIT_NOT_FOUND};
use tracing::{info, warn};

use crate::guard::DeployGuard;

pub struct Orchestrator {
    cfg: Arc<Config>,
    engine: Arc<Engine>,
    guard: Arc<DeployGuard>,
    store: Option<Arc<MongoStore>>,
}

impl Orchestrator {
    pub fn new(
        cfg: Arc<Config>,
        engine: Arc<Engine>,
        guard: Arc<DeployGuard>,
        store: Option<Arc<MongoStore>>,
    ) -> Self {
        Self {
            cfg,
            engine,
            guard,
            store,
        }
    }

    /// Deploy an application, replacing any previous container of the
    /// same name
    pub async fn deploy(&self, req: &DeployRequest) -> Result<DeployResponse> {
        let app = AppRef::new(&req.user_id, &req.app_id)?;
        if req.image.trim().is_empty() {
            return Err(Error::invalid("image must not be empty"));
        }

        let key = app.key();
        let token = self
            .guard
            .try_acquire(&key)
            .ok_or_else(|| Error::conflict(format!("deploy already in progress for {key}")))?;

        let result = self.deploy_inner(&app, req).await;
        self.guard.release(&key, token);
        result
    }

    async fn deploy_inner(&self, app: &AppRef, req: &DeployRequest) -> Result<DeployResponse> {
        let name = app.container_name();
        info!(container = %name, image = %req.image, "deploying");

        if let Some(network) = &self.cfg.network {
            self.engine.ensure_network(network).await?;
        }

        if let Some(registry) = &self.cfg.registry {
            let login = self.engine.login(registry).await;
            if !login.ok() {
                // The pull will surface any real auth problem
                warn!(registry = %registry.url, detail = %login.detail(), "registry login failed");
            }
        }

        let pull = self.engine.pull(&req.image).await;
        if !pull.ok() {
            warn!(image = %req.image, detail = %pull.detail(), "pull failed, relying on cached image");
        }

        let replace = self.engine.dialect().supports_atomic_replace();
        if !replace {
            let removed = self.engine.remove_container(&name).await;
            if !removed.ok()
                && !Engine::is_not_found(&removed)
                && self.engine.inspect_state(&name).await?.is_some()
            {
                return Err(Error::conflict(format!(
                    "container name {name} still occupied after removal: {}",
                    removed.detail()
                )));
            }
        }

        let mut env = Vec::new();
        if let Some(store) = &self.store {
            let db = store.db_name(&app.user_id, &app.app_id);
            if store.precreate() {
                if let Err(e) = store.ensure_database(&db).await {
                    warn!(db = %db, error = %e, "database pre-create failed");
                }
            }
            env = store.connection_env(&db);
        }

        let labels = if self.cfg.traefik_enable {
            berth_proxy::labels_for_app(&app.app_id, req.container_port, &req.base_path)
        } else {
            BTreeMap::new()
        };

        let spec = RunSpec {
            name: &name,
            image: &req.image,
            network: self.cfg.network.as_deref(),
            labels: &labels,
            env: &env,
            limits: &self.cfg.limits,
            replace,
        };
        let run = self.engine.run_container(&spec).await;
        if !run.ok() {
            if run.code == EXIT_NOT_FOUND {
                return Err(self.engine.unreachable_error(&run));
            }
            return Err(Error::DeployFailed(format!(
                "engine run failed: {}",
                run.detail()
            )));
        }

        self.verify_started(&name).await?;
        info!(container = %name, "deploy verified running");

        let preview_url = self.cfg.traefik_enable.then(|| {
            let prefix = berth_proxy::normalize_base_path(&req.base_path, &app.app_id);
            match &self.cfg.gateway_base_url {
                Some(gateway) => format!("{}{prefix}", gateway.trim_end_matches('/')),
                None => prefix,
            }
        });

        Ok(DeployResponse {
            app_id: app.app_id.clone(),
            container_name: name,
            status: "DEPLOYED".to_string(),
            preview_url,
        })
    }

    /// Poll until the container is observed running, crashing, or the
    /// verification window elapses
    async fn verify_started(&self, name: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(self.cfg.verify_wait_ms);
        let mut last_status = "unknown".to_string();
        loop {
            match self.engine.inspect_state(name).await? {
                Some(state) if state.is_running() => return Ok(()),
                Some(state) => {
                    if state.is_terminal() && state.exit_code != 0 {
                        let logs = self.engine.log_tail(name, CRASH_LOG_TAIL_LINES).await;
                        return Err(Error::CrashOnStart {
                            exit_code: state.exit_code,
                            status: state.status,
                            logs,
                        });
                    }
                    last_status = state.status;
                }
                None => last_status = "absent".to_string(),
            }
            if Instant::now() >= deadline {
                let logs = self.engine.log_tail(name, CRASH_LOG_TAIL_LINES).await;
                return Err(Error::VerifyTimeout {
                    status: last_status,
                    logs,
                });
            }
            tokio::time::sleep(Duration::from_millis(VERIFY_POLL_INTERVAL_MS)).await;
        }
    }

    /// Stop an application; a container that never existed is success
    pub async fn stop(&self, req: &StopRequest) -> Result<StopResponse> {
        let app = AppRef::new(&req.user_id, &req.app_id)?;
        self.remove_app_container(&app).await?;

        let image_cleanup = if self.cfg.image_cleanup_on_stop {
            Some(self.cleanup_images(&app).await)
        } else {
            None
        };

        Ok(StopResponse {
            app_id: app.app_id,
            status: "STOPPED".to_string(),
            image_cleanup,
        })
    }

    /// Delete an application and its resources with maximal forward
    /// progress: every sub-step runs and reports, none aborts the rest
    pub async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse> {
        let app = AppRef::new(&req.user_id, &req.app_id)?;

        let container_remove = match self.remove_app_container(&app).await {
            Ok(()) => StepOutcome::done(),
            Err(e) => StepOutcome::failed(e.to_string()),
        };

        let image_cleanup = self.cleanup_images(&app).await;

        let database_drop = match &self.store {
            None => StepOutcome::skipped("no document database endpoint configured"),
            Some(store) if !store.drop_on_delete() => {
                StepOutcome::skipped("database drop on delete disabled")
            }
            Some(store) => {
                let db = store.db_name(&app.user_id, &app.app_id);
                match store.drop_database(&db).await {
                    Ok(()) => StepOutcome::done(),
                    Err(e) => StepOutcome::failed(e.to_string()),
                }
            }
        };

        Ok(DeleteResponse {
            app_id: app.app_id,
            status: "DELETED".to_string(),
            container_remove,
            image_cleanup,
            database_drop,
        })
    }

    async fn remove_app_container(&self, app: &AppRef) -> Result<()> {
        let name = app.container_name();
        let removed = self.engine.remove_container(&name).await;
        if removed.ok() || Engine::is_not_found(&removed) {
            Ok(())
        } else {
            Err(self.engine.unreachable_error(&removed))
        }
    }

    /// Remove this application's images, best-effort, then prune the
    /// dangling layers left behind
    pub async fn cleanup_images(&self, app: &AppRef) -> ImageCleanup {
        let suffix = app.image_suffix();
        let tags = match self.engine.list_image_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "image listing failed, skipping cleanup");
                return ImageCleanup::default();
            }
        };

        let mut cleanup = ImageCleanup::default();
        for reference in images::images_with_suffix(&tags, &suffix) {
            let removed = self.engine.remove_image(reference).await;
            if removed.ok() {
                info!(image = %reference, "removed application image");
                cleanup.removed.push(reference.clone());
            } else {
                warn!(image = %reference, detail = %removed.detail(), "image removal failed");
                cleanup.kept.push(reference.clone());
            }
        }
        if !cleanup.removed.is_empty() {
            let prune = self.engine.prune_dangling().await;
            if !prune.ok() {
                warn!(detail = %prune.detail(), "dangling image prune failed");
            }
        }
        cleanup
    }

    /// Inspect the application's container, distinguishing an
    /// unreachable engine from an absent container
    pub async fn status(&self, user_id: &str, app_id: &str) -> Result<AppStatusResponse> {
        let app = AppRef::new(user_id, app_id)?;
        let name = app.container_name();

        match self.engine.inspect_state(&name).await? {
            None => Ok(AppStatusResponse {
                app_id: app.app_id,
                container_name: name,
                exists: false,
                running: false,
                image: None,
                port: None,
            }),
            Some(state) => {
                let port = if self.cfg.traefik_enable {
                    self.engine
                        .label_value(&name, &berth_proxy::backend_port_key(&app.app_id))
                        .await
                        .and_then(|v| v.parse::<u16>().ok())
                } else {
                    None
                };
                Ok(AppStatusResponse {
                    app_id: app.app_id,
                    container_name: name,
                    exists: true,
                    running: state.is_running(),
                    image: state.image,
                    port,
                })
            }
        }
    }
}
