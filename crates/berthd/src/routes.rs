//! HTTP surface of the agent
//!
//! JSON request/response; every /agent/* route requires the
//! X-Runtime-Token shared secret. The handlers stay thin: validate,
//! call into the orchestrator/reconciler/store, map the error taxonomy
//! onto status codes.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use berth_core::constants::TOKEN_PLACEHOLDER;
use berth_core::{
    AppRef, CleanupRequest, CleanupResponse, Config, DeleteRequest, DeployRequest, Error,
    StopRequest,
};
use berth_db::{FindRequest, MongoStore};
use berth_deploy::{Orchestrator, Reconciler};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::heartbeat::Heartbeat;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: Arc<Reconciler>,
    pub store: Option<Arc<MongoStore>>,
    pub heartbeat: Arc<Heartbeat>,
}

/// Map the error taxonomy onto HTTP status codes
fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::InvalidInput(_) | Error::JsonError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "detail": err.to_string() }))).into_response()
}

/// Shared-secret authentication for mutating routes
async fn runtime_token_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let expected = match state.cfg.agent_token.as_deref() {
        Some(token) if token != TOKEN_PLACEHOLDER => token,
        _ => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "runtime agent token not configured" })),
            )
                .into_response();
        }
    };

    let provided = request
        .headers()
        .get("X-Runtime-Token")
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "unauthorized" })),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/agent/apps/deploy", post(deploy))
        .route("/agent/apps/stop", post(stop))
        .route("/agent/apps/delete", post(delete))
        .route("/agent/apps/status", get(status))
        .route("/agent/cleanup-orphaned", post(cleanup_orphaned))
        .route("/agent/mongo/collections", get(mongo_collections))
        .route("/agent/mongo/find", post(mongo_find))
        .route("/agent/mongo/doc", get(mongo_doc))
        .route("/agent/mongo/insert-one", post(mongo_insert_one))
        .route("/agent/mongo/update-by-id", post(mongo_update_by_id))
        .route("/agent/mongo/delete-by-id", post(mongo_delete_by_id))
        .route("/agent/mongo/create-collection", post(mongo_create_collection))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            runtime_token_auth,
        ));

    let public = Router::new().route("/internal/health", get(health));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn deploy(State(state): State<AppState>, Json(req): Json<DeployRequest>) -> Response {
    match state.orchestrator.deploy(&req).await {
        Ok(resp) => {
            state.heartbeat.refresh();
            Json(resp).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn stop(State(state): State<AppState>, Json(req): Json<StopRequest>) -> Response {
    match state.orchestrator.stop(&req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> Response {
    match state.orchestrator.delete(&req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppQuery {
    user_id: String,
    app_id: String,
}

async fn status(State(state): State<AppState>, Query(q): Query<AppQuery>) -> Response {
    match state.orchestrator.status(&q.user_id, &q.app_id).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn cleanup_orphaned(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Response {
    let valid: HashSet<String> = req.existing_app_ids.iter().map(|id| id.to_string()).collect();
    info!(apps = valid.len(), "sweeping orphaned resources");

    let report = state.reconciler.sweep(&valid).await;
    let message = if report.database_failures.is_empty() {
        "success".to_string()
    } else {
        format!("partial: {}", report.database_failures.join("; "))
    };
    Json(CleanupResponse {
        cleaned_databases: report.databases_dropped,
        cleaned_images: report.images.removed.len(),
        message,
    })
    .into_response()
}

// === Mongo explorer passthrough ===

/// Resolve the per-app database, rejecting bad identifiers before any
/// database call
fn app_db(state: &AppState, q: &AppQuery) -> Result<(Arc<MongoStore>, String), Response> {
    let Some(store) = state.store.clone() else {
        return Err(error_response(Error::db(
            "document database endpoint not configured",
        )));
    };
    let app = AppRef::new(&q.user_id, &q.app_id).map_err(error_response)?;
    let db = store.db_name(&app.user_id, &app.app_id);
    Ok((store, db))
}

async fn mongo_collections(State(state): State<AppState>, Query(q): Query<AppQuery>) -> Response {
    let (store, db) = match app_db(&state, &q) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store.list_collections(&db).await {
        Ok(collections) => Json(json!({
            "userId": q.user_id,
            "appId": q.app_id,
            "dbName": db,
            "collections": collections,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn mongo_find(
    State(state): State<AppState>,
    Query(q): Query<AppQuery>,
    Json(body): Json<FindRequest>,
) -> Response {
    let (store, db) = match app_db(&state, &q) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store.find(&db, &body).await {
        Ok(result) => Json(json!({
            "userId": q.user_id,
            "appId": q.app_id,
            "dbName": db,
            "collection": body.collection,
            "returned": result.returned,
            "items": result.items,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocQuery {
    user_id: String,
    app_id: String,
    collection: String,
    id: String,
}

async fn mongo_doc(State(state): State<AppState>, Query(q): Query<DocQuery>) -> Response {
    let app_query = AppQuery {
        user_id: q.user_id.clone(),
        app_id: q.app_id.clone(),
    };
    let (store, db) = match app_db(&state, &app_query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store.find_one_by_id(&db, &q.collection, &q.id).await {
        Ok(doc) => Json(json!({
            "userId": q.user_id,
            "appId": q.app_id,
            "dbName": db,
            "collection": q.collection,
            "id": q.id,
            "doc": doc,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct InsertOneBody {
    collection: String,
    doc: String,
}

async fn mongo_insert_one(
    State(state): State<AppState>,
    Query(q): Query<AppQuery>,
    Json(body): Json<InsertOneBody>,
) -> Response {
    let (store, db) = match app_db(&state, &q) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store.insert_one(&db, &body.collection, &body.doc).await {
        Ok(inserted_id) => Json(json!({
            "dbName": db,
            "collection": body.collection,
            "insertedId": inserted_id,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateByIdBody {
    collection: String,
    id: String,
    update: String,
    #[serde(default)]
    upsert: bool,
}

async fn mongo_update_by_id(
    State(state): State<AppState>,
    Query(q): Query<AppQuery>,
    Json(body): Json<UpdateByIdBody>,
) -> Response {
    let (store, db) = match app_db(&state, &q) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store
        .update_by_id(&db, &body.collection, &body.id, &body.update, body.upsert)
        .await
    {
        Ok(outcome) => Json(json!({
            "dbName": db,
            "collection": body.collection,
            "matchedCount": outcome.matched_count,
            "modifiedCount": outcome.modified_count,
            "upsertedId": outcome.upserted_id,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteByIdBody {
    collection: String,
    id: String,
}

async fn mongo_delete_by_id(
    State(state): State<AppState>,
    Query(q): Query<AppQuery>,
    Json(body): Json<DeleteByIdBody>,
) -> Response {
    let (store, db) = match app_db(&state, &q) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store.delete_by_id(&db, &body.collection, &body.id).await {
        Ok(deleted) => Json(json!({
            "dbName": db,
            "collection": body.collection,
            "deletedCount": deleted,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateCollectionBody {
    collection: String,
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    fields: Option<String>,
}

async fn mongo_create_collection(
    State(state): State<AppState>,
    Query(q): Query<AppQuery>,
    Json(body): Json<CreateCollectionBody>,
) -> Response {
    let (store, db) = match app_db(&state, &q) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store
        .create_collection(&db, &body.collection, body.strict, &body.fields)
        .await
    {
        Ok(()) => Json(json!({
            "dbName": db,
            "collection": body.collection,
            "created": true,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use berth_core::{EngineDialect, ResourceLimits};
    use berth_deploy::DeployGuard;
    use berth_engine::mock::MockExecutor;
    use berth_engine::{CmdResult, CommandExecutor, Engine};
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn test_config(token: Option<&str>) -> Config {
        Config {
            agent_host: "127.0.0.1".to_string(),
            agent_port: 7005,
            agent_token: token.map(str::to_string),
            engine_bin: "docker".to_string(),
            dialect: EngineDialect::Docker,
            network: None,
            traefik_enable: true,
            limits: ResourceLimits::default(),
            mongo: None,
            registry: None,
            image_cleanup_on_stop: false,
            guard_enabled: true,
            verify_wait_ms: 3000,
            node_name: "rt-node-01".to_string(),
            agent_base_url: None,
            gateway_base_url: None,
            deploy_base_url: None,
            deploy_node_token: None,
            heartbeat_secs: 60,
            log_dir: PathBuf::from("./logs"),
        }
    }

    fn test_state(token: Option<&str>, mock: &Arc<MockExecutor>) -> AppState {
        test_state_with_guard(token, mock, Arc::new(DeployGuard::new(true)))
    }

    fn test_state_with_guard(
        token: Option<&str>,
        mock: &Arc<MockExecutor>,
        guard: Arc<DeployGuard>,
    ) -> AppState {
        let cfg = Arc::new(test_config(token));
        let executor: Arc<dyn CommandExecutor> = Arc::clone(mock);
        let engine = Arc::new(Engine::new("docker".to_string(), cfg.dialect, executor));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&cfg),
            Arc::clone(&engine),
            guard,
            None,
        ));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&engine), None));
        let heartbeat = Arc::new(Heartbeat::new(Arc::clone(&cfg), Arc::clone(&engine)));
        AppState {
            cfg,
            orchestrator,
            reconciler,
            store: None,
            heartbeat,
        }
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let mock = Arc::new(MockExecutor::new());
        let app = router(test_state(Some("secret"), &mock));
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/internal/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_agent_routes_require_token() {
        let mock = Arc::new(MockExecutor::new());
        let app = router(test_state(Some("secret"), &mock));
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/agent/apps/stop")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"userId":"7","appId":"42"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_token_is_server_error() {
        let mock = Arc::new(MockExecutor::new());
        let app = router(test_state(None, &mock));
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/agent/apps/stop")
                    .header("content-type", "application/json")
                    .header("X-Runtime-Token", "anything")
                    .body(Body::from(r#"{"userId":"7","appId":"42"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_placeholder_token_is_rejected() {
        let mock = Arc::new(MockExecutor::new());
        let app = router(test_state(Some(TOKEN_PLACEHOLDER), &mock));
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/agent/apps/stop")
                    .header("content-type", "application/json")
                    .header("X-Runtime-Token", TOKEN_PLACEHOLDER)
                    .body(Body::from(r#"{"userId":"7","appId":"42"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_stop_with_token_succeeds() {
        let mock = Arc::new(MockExecutor::new());
        let app = router(test_state(Some("secret"), &mock));
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/agent/apps/stop")
                    .header("content-type", "application/json")
                    .header("X-Runtime-Token", "secret")
                    .body(Body::from(r#"{"userId":"7","appId":"42"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deploy_conflict_maps_to_409() {
        let mock = Arc::new(MockExecutor::new());
        let guard = Arc::new(DeployGuard::new(true));
        let app = router(test_state_with_guard(Some("secret"), &mock, Arc::clone(&guard)));

        let _held = guard.try_acquire("7:42").unwrap();
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/agent/apps/deploy")
                    .header("content-type", "application/json")
                    .header("X-Runtime-Token", "secret")
                    .body(Body::from(r#"{"userId":"7","appId":"42","image":"img"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(mock.count("run"), 0);
    }

    #[tokio::test]
    async fn test_deploy_success_returns_payload() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond("inspect", CmdResult::success("running|0|img"));
        let app = router(test_state(Some("secret"), &mock));

        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/agent/apps/deploy")
                    .header("content-type", "application/json")
                    .header("X-Runtime-Token", "secret")
                    .body(Body::from(r#"{"userId":"7","appId":"42","image":"img"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mongo_routes_without_store_are_server_error() {
        let mock = Arc::new(MockExecutor::new());
        let app = router(test_state(Some("secret"), &mock));
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/agent/mongo/collections?userId=7&appId=42")
                    .header("X-Runtime-Token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
