//! Garbage collection of orphaned resources
//!
//! The control plane is the source of truth: it supplies the set of
//! application IDs that still exist, and the sweeps remove images and
//! databases referencing IDs outside that set. A name that does not
//! match the application pattern is never touched — the pattern match
//! is the only authorization to delete.

use std::collections::HashSet;
use std::sync::Arc;

use berth_core::ImageCleanup;
use berth_db::MongoStore;
use berth_engine::images;
use berth_engine::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

/// Application database names: db_u{userId}_a{appId}, app id captured
static ORPHAN_DB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^db_u\d+_a(\d+)$").expect("invalid orphan db regex"));

/// Database names whose embedded app id is outside the authoritative set
pub fn orphaned_databases<'a>(
    names: &'a [String],
    valid_app_ids: &HashSet<String>,
) -> Vec<&'a String> {
    names
        .iter()
        .filter(|name| {
            ORPHAN_DB_RE
                .captures(name)
                .map(|caps| !valid_app_ids.contains(&caps[1]))
                .unwrap_or(false)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub images: ImageCleanup,
    pub databases_dropped: usize,
    pub database_failures: Vec<String>,
}

pub struct Reconciler {
    engine: Arc<Engine>,
    store: Option<Arc<MongoStore>>,
}

impl Reconciler {
    pub fn new(engine: Arc<Engine>, store: Option<Arc<MongoStore>>) -> Self {
        Self { engine, store }
    }

    /// Run both sweeps against the authoritative ID set
    pub async fn sweep(&self, valid_app_ids: &HashSet<String>) -> SweepReport {
        let images = self.sweep_images(valid_app_ids).await;
        let (databases_dropped, database_failures) = self.sweep_databases(valid_app_ids).await;
        SweepReport {
            images,
            databases_dropped,
            database_failures,
        }
    }

    /// Remove application images whose embedded ID is orphaned, then
    /// prune the dangling layers; tagged non-application images are
    /// never candidates
    pub async fn sweep_images(&self, valid_app_ids: &HashSet<String>) -> ImageCleanup {
        let tags = match self.engine.list_image_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "image listing failed, skipping image sweep");
                return ImageCleanup::default();
            }
        };

        let mut cleanup = ImageCleanup::default();
        for reference in images::orphaned_images(&tags, valid_app_ids) {
            let removed = self.engine.remove_image(reference).await;
            if removed.ok() {
                info!(image = %reference, "removed orphaned image");
                cleanup.removed.push(reference.clone());
            } else {
                warn!(image = %reference, detail = %removed.detail(), "orphaned image removal failed");
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

    /// Drop orphaned application databases; one failure never halts the
    /// sweep
    pub async fn sweep_databases(&self, valid_app_ids: &HashSet<String>) -> (usize, Vec<String>) {
        let Some(store) = &self.store else {
            return (0, Vec::new());
        };
        let names = match store.list_database_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "database listing failed, skipping database sweep");
                return (0, vec![e.to_string()]);
            }
        };

        let mut dropped = 0;
        let mut failures = Vec::new();
        for name in orphaned_databases(&names, valid_app_ids) {
            match store.drop_database(name).await {
                Ok(()) => {
                    info!(db = %name, "dropped orphaned database");
                    dropped += 1;
                }
                Err(e) => {
                    warn!(db = %name, error = %e, "orphaned database drop failed");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }
        (dropped, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::EngineDialect;
    use berth_engine::mock::MockExecutor;
    use berth_engine::{CmdResult, CommandExecutor};

    fn valid(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_orphaned_databases_matches_only_pattern() {
        let names = vec![
            "db_u1_a1".to_string(),
            "db_u2_a9".to_string(),
            "scratch".to_string(),
        ];
        let orphans = orphaned_databases(&names, &valid(&["1"]));
        assert_eq!(orphans, vec!["db_u2_a9"]);
    }

    #[test]
    fn test_non_matching_names_never_touched() {
        let names = vec![
            "admin".to_string(),
            "db_uX_a1".to_string(),
            "db_u1_a1_backup".to_string(),
        ];
        assert!(orphaned_databases(&names, &valid(&[])).is_empty());
    }

    #[tokio::test]
    async fn test_image_sweep_removes_orphans_and_prunes() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond(
            "images",
            CmdResult::success(
                "registry.local/u1-app1:latest\nregistry.local/u2-app9:latest\nlibrary/nginx:latest\n",
            ),
        );
        let executor: Arc<dyn CommandExecutor> = Arc::clone(&mock);
        let engine = Arc::new(Engine::new(
            "docker".to_string(),
            EngineDialect::Docker,
            executor,
        ));
        let reconciler = Reconciler::new(engine, None);

        let cleanup = reconciler.sweep_images(&valid(&["1"])).await;
        assert_eq!(cleanup.removed, vec!["registry.local/u2-app9:latest"]);
        assert!(cleanup.kept.is_empty());
        assert_eq!(mock.count("rmi"), 1);
        assert_eq!(mock.count("image"), 1);
    }

    #[tokio::test]
    async fn test_image_sweep_keeps_images_that_fail_removal() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond("images", CmdResult::success("registry.local/u2-app9:latest\n"));
        mock.respond("rmi", CmdResult::failure(1, "image is in use"));
        let executor: Arc<dyn CommandExecutor> = Arc::clone(&mock);
        let engine = Arc::new(Engine::new(
            "docker".to_string(),
            EngineDialect::Docker,
            executor,
        ));
        let reconciler = Reconciler::new(engine, None);

        let cleanup = reconciler.sweep_images(&valid(&[])).await;
        assert!(cleanup.removed.is_empty());
        assert_eq!(cleanup.kept, vec!["registry.local/u2-app9:latest"]);
        // Nothing removed, so no prune
        assert_eq!(mock.count("image"), 0);
    }

    #[tokio::test]
    async fn test_database_sweep_without_store_is_noop() {
        let mock = Arc::new(MockExecutor::new());
        let executor: Arc<dyn CommandExecutor> = Arc::clone(&mock);
        let engine = Arc::new(Engine::new(
            "docker".to_string(),
            EngineDialect::Docker,
            executor,
        ));
        let reconciler = Reconciler::new(engine, None);

        let (dropped, failures) = reconciler.sweep_databases(&valid(&["1"])).await;
        assert_eq!(dropped, 0);
        assert!(failures.is_empty());
    }
}
