//! HTTP API of a registry node
//!
//! Public endpoints:
//! - `POST /api/register`, `/api/unregister`, `/api/heartbeat`
//! - `GET /api/discovery?name=`
//! - `GET /health`, `GET /metrics`
//!
//! Node-to-node endpoints:
//! - `POST /api/internal/sync` (master → slave replication)
//! - `GET /api/internal/loadbalance` (round-robin cursors, master only)

use crate::cluster::ClusterCoordinator;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::Error;
use crate::node::models::{
    ApiResponse, DiscoveryData, DiscoveryErrorData, HealthData, InstanceErrorData,
    InstanceRequest, RegisterConflictData, UnregisterData,
};
use crate::registry::instance::{InstanceView, ServiceInstance};
use crate::registry::service::{ForwardedResponse, RegistryService, Routed, SyncRequest};
use crate::registry::store::RegisterOutcome;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies are a handful of short fields.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct NodeState {
    pub service: Arc<RegistryService>,
    /// `None` for a standalone node.
    pub cluster: Option<Arc<ClusterCoordinator>>,
    pub self_addr: String,
}

impl NodeState {
    fn current_master(&self) -> Option<String> {
        match &self.cluster {
            Some(cluster) => cluster.current_master(),
            None => Some(self.self_addr.clone()),
        }
    }
}

pub fn create_router(state: NodeState) -> Router {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/unregister", post(unregister))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/discovery", get(discovery))
        .route("/api/internal/sync", post(internal_sync))
        .route("/api/internal/loadbalance", get(internal_load_balance))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(request_tracing_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn register(
    State(state): State<NodeState>,
    payload: Result<Json<ServiceInstance>, JsonRejection>,
) -> Response {
    let Json(instance) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return malformed_body(rejection),
    };

    match state.service.register(instance).await {
        Ok(Routed::Local(outcome)) => {
            let msg = match &outcome {
                RegisterOutcome::Registered(_) => "registered",
                RegisterOutcome::Refreshed(_) => "heartbeat refreshed",
            };
            ApiResponse::ok(msg, InstanceView::from(outcome.instance())).into_response()
        }
        Ok(Routed::Forwarded(forwarded)) => proxy(forwarded),
        Err(Error::Conflict { service_id, reason }) => ApiResponse::error(
            StatusCode::CONFLICT,
            reason,
            Some(RegisterConflictData {
                conflict_service_id: service_id,
                suggestion: "use a different serviceId or endpoint, or check for a duplicate registration".into(),
            }),
        )
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn unregister(
    State(state): State<NodeState>,
    payload: Result<Json<InstanceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return malformed_body(rejection),
    };

    let service_id = request.service_id.clone();
    match state.service.unregister(request.into_claim()).await {
        Ok(Routed::Local(removed)) => {
            ApiResponse::ok("unregistered", UnregisterData::from(&removed)).into_response()
        }
        Ok(Routed::Forwarded(forwarded)) => proxy(forwarded),
        Err(e) => instance_error(&service_id, &e),
    }
}

async fn heartbeat(
    State(state): State<NodeState>,
    payload: Result<Json<InstanceRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return malformed_body(rejection),
    };

    let service_id = request.service_id.clone();
    match state.service.heartbeat(request.into_claim()).await {
        Ok(Routed::Local(updated)) => {
            ApiResponse::ok("heartbeat updated", InstanceView::from(&updated)).into_response()
        }
        Ok(Routed::Forwarded(forwarded)) => proxy(forwarded),
        Err(e) => instance_error(&service_id, &e),
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryQuery {
    #[serde(default)]
    name: Option<String>,
}

async fn discovery(State(state): State<NodeState>, Query(query): Query<DiscoveryQuery>) -> Response {
    let name = query.name.unwrap_or_default();

    match state.service.discover(&name).await {
        Ok(Routed::Local(instances)) => {
            let msg = match (name.is_empty(), instances.is_empty()) {
                (true, true) => "no services registered",
                (true, false) => "all instances",
                (false, _) => "service discovered",
            };
            ApiResponse::ok(msg, DiscoveryData::new(&name, &instances)).into_response()
        }
        Ok(Routed::Forwarded(forwarded)) => proxy(forwarded),
        Err(Error::NotFound(_)) => ApiResponse::error(
            StatusCode::NOT_FOUND,
            "service not found",
            Some(DiscoveryErrorData {
                service_name: name,
                suggestion: "check the service name or make sure the service is registered".into(),
            }),
        )
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn internal_sync(
    State(state): State<NodeState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!("Rejected sync payload: {}", rejection.body_text());
            return ApiResponse::<()>::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid sync payload: {}", rejection.body_text()),
                None,
            )
            .into_response();
        }
    };

    let result = match &state.cluster {
        Some(cluster) => cluster.handle_sync(request),
        None => Err(Error::Internal("standalone node does not accept syncs".into())),
    };

    match result {
        Ok(()) => ApiResponse::<()>::message("sync applied").into_response(),
        Err(e) => {
            tracing::warn!("Failed to apply sync: {}", e);
            ApiResponse::<()>::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
                .into_response()
        }
    }
}

async fn internal_load_balance(State(state): State<NodeState>) -> Response {
    let cursors = match &state.cluster {
        Some(cluster) => cluster.load_balance_state(),
        None => Ok(state.service.store().export_load_balance_state()),
    };

    match cursors {
        Ok(cursors) => ApiResponse::ok("load balance state", cursors).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn health(State(state): State<NodeState>) -> impl IntoResponse {
    let role = if state.service.is_master() {
        "master"
    } else {
        "slave"
    };

    Json(HealthData {
        status: "healthy".to_string(),
        role: role.to_string(),
        master: state.current_master(),
        node: state.self_addr.clone(),
        instances: state.service.store().len(),
        version: crate::VERSION.to_string(),
    })
}

async fn metrics(State(state): State<NodeState>) -> impl IntoResponse {
    let body = state
        .service
        .metrics()
        .to_prometheus(state.service.is_master(), state.service.store().len());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Hand the master's answer back unchanged.
fn proxy(forwarded: ForwardedResponse) -> Response {
    let status = StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        forwarded.body,
    )
        .into_response()
}

fn malformed_body(rejection: JsonRejection) -> Response {
    ApiResponse::<()>::error(
        StatusCode::BAD_REQUEST,
        format!("malformed request body: {}", rejection.body_text()),
        None,
    )
    .into_response()
}

fn error_response(e: &Error) -> Response {
    ApiResponse::<()>::error(e.to_http_status(), e.to_string(), None).into_response()
}

/// Errors of calls that name an existing instance (unregister, heartbeat).
fn instance_error(service_id: &str, e: &Error) -> Response {
    let data = match e {
        Error::NotFound(_) => InstanceErrorData {
            service_id: service_id.to_string(),
            suggestion: "check the serviceId or register the instance first".into(),
            ..Default::default()
        },
        Error::Mismatch { field, .. } => InstanceErrorData {
            service_id: service_id.to_string(),
            field_mismatch: field.to_string(),
            suggestion: format!("{} must match the registered value", field),
        },
        Error::Validation(_) => InstanceErrorData {
            service_id: service_id.to_string(),
            suggestion: "serviceId is required".into(),
            ..Default::default()
        },
        _ => return error_response(e),
    };
    ApiResponse::error(e.to_http_status(), e.to_string(), Some(data)).into_response()
}
