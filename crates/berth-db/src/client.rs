//! MongoDB store wrapper

use std::time::Duration;

use berth_core::{naming, Error, MongoConfig, Result};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use tracing::info;

/// Collection created when pre-provisioning an application database;
/// MongoDB only materializes a database on first write
const INIT_COLLECTION: &str = "app_meta";

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the configured document-database endpoint
pub struct MongoStore {
    client: Client,
    cfg: MongoConfig,
}

impl MongoStore {
    pub async fn connect(cfg: MongoConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(cfg.admin_uri())
            .await
            .map_err(|e| Error::db(format!("bad mongo endpoint: {e}")))?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        let client =
            Client::with_options(options).map_err(|e| Error::db(format!("mongo client: {e}")))?;
        info!(host = %cfg.host, port = cfg.port, "document database endpoint configured");
        Ok(Self { client, cfg })
    }

    /// Derived database name for an application
    pub fn db_name(&self, user_id: &str, app_id: &str) -> String {
        naming::db_name(&self.cfg.db_template, user_id, app_id)
    }

    /// Environment variables injected into an application's container
    pub fn connection_env(&self, db: &str) -> Vec<(String, String)> {
        vec![
            ("MONGODB_URI".to_string(), self.cfg.uri_for(db)),
            ("MONGODB_DB".to_string(), db.to_string()),
        ]
    }

    pub fn precreate(&self) -> bool {
        self.cfg.precreate
    }

    pub fn drop_on_delete(&self) -> bool {
        self.cfg.drop_on_delete
    }

    pub fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    pub async fn list_database_names(&self) -> Result<Vec<String>> {
        self.client
            .list_database_names(None, None)
            .await
            .map_err(|e| Error::db(format!("list databases: {e}")))
    }

    pub async fn drop_database(&self, name: &str) -> Result<()> {
        self.client
            .database(name)
            .drop(None)
            .await
            .map_err(|e| Error::db(format!("drop database {name}: {e}")))
    }

    /// Materialize an application database before its first use
    pub async fn ensure_database(&self, name: &str) -> Result<()> {
        let db = self.client.database(name);
        let collections = db
            .list_collection_names(None)
            .await
            .map_err(|e| Error::db(format!("list collections in {name}: {e}")))?;
        if !collections.is_empty() {
            return Ok(());
        }
        match db.create_collection(INIT_COLLECTION, None).await {
            Ok(()) => Ok(()),
            // A concurrent deploy may have created it between the two calls
            Err(e) if e.to_string().to_lowercase().contains("already exists") => Ok(()),
            Err(e) => Err(Error::db(format!("create database {name}: {e}"))),
        }
    }
}
