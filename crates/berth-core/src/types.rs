//! Request/response types shared across the berth agent

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CONTAINER_PORT;
use crate::error::{Error, Result};
use crate::naming;

/// Identifiers accepted for userId/appId
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("invalid identifier regex"));

/// Validate an opaque identifier before it reaches any external call
pub fn valid_identifier(s: &str) -> bool {
    !s.is_empty() && IDENTIFIER_RE.is_match(s)
}

/// Application identity: the (userId, appId) pair that determines the
/// container name, database name, routing prefix and image suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppRef {
    pub user_id: String,
    pub app_id: String,
}

impl AppRef {
    pub fn new(user_id: &str, app_id: &str) -> Result<Self> {
        if !valid_identifier(user_id) {
            return Err(Error::invalid(format!("bad userId: {user_id:?}")));
        }
        if !valid_identifier(app_id) {
            return Err(Error::invalid(format!("bad appId: {app_id:?}")));
        }
        Ok(Self {
            user_id: user_id.to_string(),
            app_id: app_id.to_string(),
        })
    }

    /// Key used by the deploy guard
    pub fn key(&self) -> String {
        format!("{}:{}", self.user_id, self.app_id)
    }

    pub fn container_name(&self) -> String {
        naming::container_name(&self.user_id, &self.app_id)
    }

    pub fn image_suffix(&self) -> String {
        naming::image_suffix(&self.user_id, &self.app_id)
    }
}

fn default_container_port() -> u16 {
    DEFAULT_CONTAINER_PORT
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub user_id: String,
    pub app_id: String,
    pub image: String,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    /// External path prefix like /apps/{appId}; blank means the
    /// per-app default prefix
    #[serde(default)]
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub user_id: String,
    pub app_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub user_id: String,
    pub app_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub app_id: String,
    pub container_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub app_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_cleanup: Option<ImageCleanup>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub app_id: String,
    pub status: String,
    pub container_remove: StepOutcome,
    pub image_cleanup: ImageCleanup,
    pub database_drop: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusResponse {
    pub app_id: String,
    pub container_name: String,
    pub exists: bool,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub existing_app_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub cleaned_databases: usize,
    pub cleaned_images: usize,
    pub message: String,
}

/// Outcome of a best-effort sub-step
///
/// Best-effort steps never abort the surrounding operation; they report
/// what happened here instead of propagating an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub attempted: bool,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn done() -> Self {
        Self {
            attempted: true,
            ok: true,
            detail: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            attempted: false,
            ok: true,
            detail: Some(reason.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            attempted: true,
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Result of an image cleanup pass: removed references, and references
/// whose removal was attempted but failed (e.g. image still in use)
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCleanup {
    pub removed: Vec<String>,
    pub kept: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifier() {
        assert!(valid_identifier("7"));
        assert!(valid_identifier("user_01-a"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("a b"));
        assert!(!valid_identifier("a/../b"));
    }

    #[test]
    fn test_app_ref_rejects_bad_ids() {
        assert!(AppRef::new("7", "42").is_ok());
        assert!(AppRef::new("", "42").is_err());
        assert!(AppRef::new("7", "4;2").is_err());
    }

    #[test]
    fn test_app_ref_key_and_names() {
        let app = AppRef::new("7", "42").unwrap();
        assert_eq!(app.key(), "7:42");
        assert_eq!(app.container_name(), "rt-u7-app42");
        assert_eq!(app.image_suffix(), "/u7-app42");
    }

    #[test]
    fn test_deploy_request_defaults() {
        let req: DeployRequest = serde_json::from_str(
            r#"{"userId":"7","appId":"42","image":"registry.local/u7-app42:latest"}"#,
        )
        .unwrap();
        assert_eq!(req.container_port, 3000);
        assert_eq!(req.base_path, "");
    }

    #[test]
    fn test_step_outcome_serializes_camel_case() {
        let v = serde_json::to_value(StepOutcome::failed("image in use")).unwrap();
        assert_eq!(v["attempted"], true);
        assert_eq!(v["ok"], false);
        assert_eq!(v["detail"], "image in use");
    }
}
