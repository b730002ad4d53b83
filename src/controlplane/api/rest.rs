//! REST API Handlers
//!
//! JSON endpoints for container allocation, pipeline inspection, datanode
//! heartbeats and usage queries. Handlers only talk to the control plane
//! through [`ContainerLocationProtocol`].

use crate::controlplane::ControlPlane;
use crate::domain::ports::ContainerLocationProtocol;
use crate::domain::replication::ReplicationType;
use crate::error::{Error, ErrorAction};
use crate::node::{NodeId, NodeReport};
use crate::pipeline::PipelineId;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Container allocation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerRequest {
    /// STAND_ALONE or RATIS
    pub replication_type: String,
    /// Number of replicas
    pub replication_factor: u32,
    /// Owning service
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_owner() -> String {
    "ozone".into()
}

/// Usage lookup for a single datanode
#[derive(Debug, Clone, Deserialize)]
pub struct UsageQuery {
    /// IP address or hostname
    pub address: String,
    pub uuid: String,
}

/// Top-K usage query
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUsageQuery {
    #[serde(default = "default_most_used")]
    pub most_used: bool,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_most_used() -> bool {
    true
}

fn default_count() -> usize {
    10
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn error_response(e: Error) -> Response {
    let (status, code) = match &e {
        _ if e.is_not_found() => (StatusCode::NOT_FOUND, "not_found"),
        Error::InsufficientNodes { .. } => (StatusCode::SERVICE_UNAVAILABLE, "insufficient_nodes"),
        Error::InvalidReplication(_) => (StatusCode::BAD_REQUEST, "invalid_replication"),
        Error::InvalidState { .. } => (StatusCode::BAD_REQUEST, "invalid_state"),
        _ => {
            error!("Request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };

    let details = match e.action() {
        ErrorAction::RetryAfter(after) => {
            Some(format!("retry after {}s", after.as_secs()))
        }
        ErrorAction::NoRetry => None,
    };

    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: e.to_string(),
            details,
        }),
    )
        .into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    control_plane: Arc<ControlPlane>,
    request_timeout: Duration,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(control_plane: Arc<ControlPlane>, request_timeout: Duration) -> Self {
        Self {
            control_plane,
            request_timeout,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            control_plane: self.control_plane,
        };

        Router::new()
            // Container endpoints
            .route("/v1/containers", post(create_container))
            .route("/v1/containers/:id", get(get_container).delete(delete_container))
            .route("/v1/containers/:id/close", post(close_container))
            // Pipeline endpoints
            .route("/v1/pipelines", get(list_pipelines))
            .route("/v1/pipelines/:id", get(get_pipeline))
            .route("/v1/pipelines/:id/close", post(close_pipeline))
            // Datanode endpoints
            .route("/v1/nodes/heartbeat", post(node_heartbeat))
            .route("/v1/nodes/usage", get(node_usage))
            .route("/v1/nodes/usage/top", get(node_usage_top))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(self.request_timeout))
                    .layer(CorsLayer::permissive()),
            )
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    control_plane: Arc<ControlPlane>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Allocate a container
async fn create_container(
    State(state): State<AppState>,
    Json(request): Json<CreateContainerRequest>,
) -> Response {
    let replication_type: ReplicationType = match request.replication_type.parse() {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };

    match state
        .control_plane
        .create_container(replication_type, request.replication_factor, &request.owner)
        .await
    {
        Ok(container) => {
            info!(
                "Allocated container {} for {} on pipeline {}",
                container.container_id, container.owner, container.pipeline_id
            );
            (StatusCode::CREATED, Json(container)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Get container info
async fn get_container(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.control_plane.get_container(id).await {
        Ok(container) => (StatusCode::OK, Json(container)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Close a container
async fn close_container(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.control_plane.close_container(id).await {
        Ok(container) => (StatusCode::OK, Json(container)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Delete a container
async fn delete_container(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.control_plane.delete_container(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// List all pipelines
async fn list_pipelines(State(state): State<AppState>) -> Response {
    match state.control_plane.list_pipelines().await {
        Ok(pipelines) => (StatusCode::OK, Json(pipelines)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Get pipeline info
async fn get_pipeline(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let pipeline_id: PipelineId = match id.parse() {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.control_plane.get_pipeline(pipeline_id).await {
        Ok(pipeline) => (StatusCode::OK, Json(pipeline)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Close a pipeline
async fn close_pipeline(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let pipeline_id: PipelineId = match id.parse() {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.control_plane.close_pipeline(pipeline_id).await {
        Ok(pipeline) => (StatusCode::OK, Json(pipeline)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Datanode registration / heartbeat
async fn node_heartbeat(
    State(state): State<AppState>,
    Json(report): Json<NodeReport>,
) -> Response {
    debug!("Heartbeat from {} ({})", report.hostname, report.uuid);

    match state.control_plane.register_node(report).await {
        Ok(node) => (StatusCode::OK, Json(node)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Usage of a single datanode
async fn node_usage(State(state): State<AppState>, Query(query): Query<UsageQuery>) -> Response {
    let node_id: NodeId = match query.uuid.parse() {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state
        .control_plane
        .get_datanode_usage_info(&query.address, node_id)
        .await
    {
        Ok(usage) => (StatusCode::OK, Json(usage)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Most or least used datanodes
async fn node_usage_top(
    State(state): State<AppState>,
    Query(query): Query<TopUsageQuery>,
) -> Response {
    match state
        .control_plane
        .get_datanode_usage_info_top(query.most_used, query.count)
        .await
    {
        Ok(usage) => (StatusCode::OK, Json(usage)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": crate::VERSION
        })),
    )
}

/// Readiness check; ready once at least one datanode is online
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.control_plane.status();
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScmConfig;
    use crate::node::descriptor::{test_report, CURRENT_VERSION};
    use crate::node::NodeRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    fn router(nodes: usize) -> (Router, Arc<ControlPlane>) {
        let registry = NodeRegistry::new();
        for i in 0..nodes {
            registry.register(&test_report(&format!("10.2.0.{}", i + 1), CURRENT_VERSION, 1000, 0));
        }
        let scm = ControlPlane::new(ScmConfig::default(), registry).unwrap();
        scm.start();
        (RestRouter::new(scm.clone(), Duration::from_secs(5)).build(), scm)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_create_and_get_container() {
        let (app, _) = router(3);

        let (status, created) = send(
            app.clone(),
            Method::POST,
            "/v1/containers",
            Some(serde_json::json!({
                "replicationType": "STAND_ALONE",
                "replicationFactor": 1,
                "owner": "ozone"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["replicationType"], "STAND_ALONE");

        let id = created["containerId"].as_u64().unwrap();
        let (status, fetched) = send(app, Method::GET, &format!("/v1/containers/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_close_and_delete_container() {
        let (app, _) = router(1);

        let (_, created) = send(
            app.clone(),
            Method::POST,
            "/v1/containers",
            Some(serde_json::json!({"replicationType": "STAND_ALONE", "replicationFactor": 1})),
        )
        .await;
        let id = created["containerId"].as_u64().unwrap();

        let (status, closed) = send(app.clone(), Method::POST, &format!("/v1/containers/{}/close", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(closed["state"], "CLOSED");

        let (status, _) = send(app.clone(), Method::DELETE, &format!("/v1/containers/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(app, Method::GET, &format!("/v1/containers/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let (app, _) = router(1);

        let (status, body) = send(app.clone(), Method::GET, "/v1/pipelines/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = send(
            app.clone(),
            Method::POST,
            "/v1/containers",
            Some(serde_json::json!({"replicationType": "RATIS", "replicationFactor": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "insufficient_nodes");
        assert!(body["details"].is_string());

        let (status, _) = send(
            app,
            Method::POST,
            "/v1/containers",
            Some(serde_json::json!({"replicationType": "ERASURE", "replicationFactor": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_usage_endpoints() {
        let (app, scm) = router(3);
        let node = scm.registry().list_nodes().remove(0);

        let (status, usage) = send(
            app.clone(),
            Method::GET,
            &format!("/v1/nodes/usage?address={}&uuid={}", node.ip_address, node.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(usage.as_array().unwrap().len(), 1);

        let (status, top) = send(app, Method::GET, "/v1/nodes/usage/top?mostUsed=false&count=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(top.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_readiness_follows_heartbeats() {
        let (app, _) = router(0);

        let (status, _) = send(app.clone(), Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let report = test_report("10.2.0.50", CURRENT_VERSION, 1000, 0);
        let (status, node) = send(
            app.clone(),
            Method::POST,
            "/v1/nodes/heartbeat",
            Some(serde_json::to_value(&report).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node["ipAddress"], "10.2.0.50");

        let (status, _) = send(app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
