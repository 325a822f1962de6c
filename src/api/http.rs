//! HTTP API Server
//!
//! REST API for batch replication, upload and delete triggers, relationship
//! management and status queries.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::MediaSync;
use crate::config::ApiConfig;
use crate::error::{Error, Result, ILLEGAL_PAIR_MESSAGE};
use crate::id::{AssetId, NodeId};
use crate::media::{AssetMetadata, AssetRecord};
use crate::network::RelationshipGraph;
use crate::replication::{BatchProgress, DeletionReport, EngineState};

/// Shared application state
pub struct AppState {
    /// Wired services
    pub app: Arc<MediaSync>,
    /// Process start, for uptime
    pub started_at: Instant,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, app: Arc<MediaSync>) -> Self {
        let state = Arc::new(AppState {
            app,
            started_at: Instant::now(),
        });
        Self { config, state }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            // Batch replication
            .route("/replicate/batch", get(handle_batch_query).post(handle_batch_json))
            // Upload and delete triggers
            .route("/nodes/:node/assets", post(handle_upload).get(handle_list_assets))
            .route("/nodes/:node/assets/:id", get(handle_get_asset).delete(handle_delete_asset))
            // Relationships
            .route("/relationships", get(handle_get_relationships).put(handle_put_relationships))
            .route("/relationships/reload", post(handle_reload_relationships))
            // Status and info
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server, returning when `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Batch replication request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchRequest {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub main_node: NodeId,
    pub current_node: NodeId,
    pub engine: EngineState,
    pub in_process: Option<String>,
    pub share_media: bool,
    pub delete_shared_media: bool,
    pub relationships: usize,
    pub nodes: Vec<NodeSummary>,
    pub uptime_seconds: u64,
}

/// Registered node
#[derive(Debug, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub url: String,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub name: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Maps library errors onto HTTP responses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            // the batch client matches on this exact body
            Error::IllegalPair { .. } => {
                return (StatusCode::BAD_REQUEST, ILLEGAL_PAIR_MESSAGE).into_response();
            }
            Error::AssetNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Config(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============ Handlers ============

async fn handle_batch_query(
    State(state): State<Arc<AppState>>,
    Query(req): Query<BatchRequest>,
) -> ApiResult<Json<BatchProgress>> {
    run_batch(&state, req).await
}

async fn handle_batch_json(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<Json<BatchProgress>> {
    run_batch(&state, req).await
}

async fn run_batch(state: &AppState, req: BatchRequest) -> ApiResult<Json<BatchProgress>> {
    let batch_size = state.app.config.effective_batch_size(req.batch_size);
    let progress = state
        .app
        .orchestrator
        .replicate_batch(req.source, req.target, batch_size)
        .await?;
    Ok(Json(progress))
}

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Path(node): Path<u64>,
    Json(metadata): Json<AssetMetadata>,
) -> ApiResult<(StatusCode, Json<AssetRecord>)> {
    let record = state.app.controller.upload(NodeId(node), metadata).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn handle_list_assets(
    State(state): State<Arc<AppState>>,
    Path(node): Path<u64>,
) -> ApiResult<Json<Vec<AssetRecord>>> {
    Ok(Json(state.app.store.list_assets(NodeId(node)).await?))
}

async fn handle_get_asset(
    State(state): State<Arc<AppState>>,
    Path((node, id)): Path<(u64, u64)>,
) -> ApiResult<Json<AssetRecord>> {
    Ok(Json(state.app.controller.fetch(NodeId(node), AssetId(id)).await?))
}

async fn handle_delete_asset(
    State(state): State<Arc<AppState>>,
    Path((node, id)): Path<(u64, u64)>,
) -> ApiResult<Json<DeletionReport>> {
    Ok(Json(state.app.controller.delete(NodeId(node), AssetId(id)).await?))
}

async fn handle_get_relationships(State(state): State<Arc<AppState>>) -> ApiResult<Json<RelationshipGraph>> {
    let graph = state.app.network.snapshot().await?;
    Ok(Json(graph.as_ref().clone()))
}

async fn handle_put_relationships(
    State(state): State<Arc<AppState>>,
    Json(graph): Json<RelationshipGraph>,
) -> ApiResult<Json<RelationshipGraph>> {
    let graph = state.app.network.replace_all(graph).await?;
    Ok(Json(graph.as_ref().clone()))
}

async fn handle_reload_relationships(State(state): State<Arc<AppState>>) -> ApiResult<Json<RelationshipGraph>> {
    let graph = state.app.network.reload().await?;
    Ok(Json(graph.as_ref().clone()))
}

async fn handle_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let app = &state.app;
    let graph = app.network.snapshot().await?;
    let nodes = app
        .store
        .list_nodes()
        .await?
        .into_iter()
        .map(|(id, url)| NodeSummary { id, url })
        .collect();

    let in_process = app.engine.currently_processing().await.map(|item| match item {
        crate::replication::InProcess::Replicating(record) => format!("replicating {}", record.asset_ref()),
        crate::replication::InProcess::Deleting(asset) => format!("deleting {}", asset),
    });

    Ok(Json(StatusResponse {
        name: app.config.node.name.clone(),
        main_node: app.config.node.main_node,
        current_node: app.context.current(),
        engine: app.engine.state().await,
        in_process,
        share_media: app.config.sharing.share_media,
        delete_shared_media: app.config.sharing.delete_shared_media,
        relationships: graph.pair_count(),
        nodes,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        name: state.app.config.node.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaSyncConfig;
    use crate::testing::{seed_originals, test_store};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn router() -> (Router, Arc<MediaSync>) {
        let config = MediaSyncConfig::from_str(
            r#"
[node]
name = "api-test"

[sharing]
delete_shared_media = true
"#,
        )
        .unwrap();
        let app = Arc::new(MediaSync::with_store(config, test_store().await).await.unwrap());
        app.network
            .replace_all(RelationshipGraph::from_links(vec![(NodeId(1), vec![NodeId(2)])]))
            .await
            .unwrap();

        let state = Arc::new(AppState {
            app: app.clone(),
            started_at: Instant::now(),
        });
        (HttpServer::create_router(state, false), app)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_batch_endpoint() {
        let (router, app) = router().await;
        seed_originals(&app.store, NodeId(1), 12).await;

        let response = router
            .clone()
            .oneshot(
                Request::get("/replicate/batch?source=1&target=2&batch_size=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"total": 12, "not_replicated": 7}));

        // default batch size is 10
        let response = router
            .oneshot(
                Request::post("/replicate/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"source": 1, "target": 2}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["not_replicated"], 0);
    }

    #[tokio::test]
    async fn test_illegal_pair_is_400() {
        let (router, _app) = router().await;
        let response = router
            .oneshot(
                Request::get("/replicate/batch?source=1&target=3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], ILLEGAL_PAIR_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_upload_get_delete() {
        let (router, app) = router().await;
        let upload = serde_json::json!({
            "file_name": "a.jpg",
            "mime_type": "image/jpeg",
            "guid": "https://node-1.example/uploads/a.jpg"
        });

        let response = router
            .clone()
            .oneshot(
                Request::post("/nodes/1/assets")
                    .header("content-type", "application/json")
                    .body(Body::from(upload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let record = body_json(response).await;
        assert_eq!(record["status"], "inherit");
        assert!(record["ledger"]["2"].is_u64());
        let id = record["id"].as_u64().unwrap();

        let response = router
            .clone()
            .oneshot(Request::get(format!("/nodes/1/assets/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(Request::delete(format!("/nodes/1/assets/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], 1);
        assert!(app.store.list_assets(NodeId(2)).await.unwrap().is_empty());

        let response = router
            .oneshot(Request::get(format!("/nodes/1/assets/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_relationships_roundtrip() {
        let (router, _app) = router().await;

        let response = router
            .clone()
            .oneshot(
                Request::put("/relationships")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"site_1": [2, 3]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let graph = body_json(response).await;
        assert_eq!(graph["site_3"], serde_json::json!([1]));

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["relationships"], 2);
        assert_eq!(status["engine"], "idle");
        assert_eq!(status["name"], "api-test");
    }
}
