//! HTTP front door.
//!
//! The wire surface is OpenAI-shaped: `POST /v1/chat/completions` with the
//! request's `model` field carrying the virtual model id. Terminal routing
//! errors map onto meaningful statuses (429 overloaded, 503 no target, 504
//! deadline) and the response body carries the attempt trail.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use rcc_common::{RouteError, RouteErrorKind};
use rcc_core::{RequestContext, SchedulerManager};
use rcc_protocol::openai::{
    ChatCompletionRequest, ErrorBody, ErrorDetail, ModelEntry, ModelList,
};

#[derive(Clone)]
pub struct RouterState {
    pub manager: Arc<SchedulerManager>,
}

pub fn api_router(manager: Arc<SchedulerManager>) -> Router {
    let state = RouterState { manager };
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/router/mappings", get(mappings))
        .route("/v1/router/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<RouterState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    if req.stream == Some(true) {
        return bad_request("streaming responses are not served by this endpoint");
    }
    if req.model.is_empty() {
        return bad_request("request is missing a model id");
    }

    let virtual_model = req.model.clone();
    let ctx = RequestContext::new(virtual_model.clone())
        .with_trace_id(uuid::Uuid::now_v7().to_string());
    tracing::debug!(request_id = %ctx.request_id, model = %virtual_model, "routing chat request");

    match state.manager.route(ctx, &virtual_model, &req).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            tracing::debug!(model = %virtual_model, kind = err.kind.as_str(), "routing failed");
            error_response(&err).into_response()
        }
    }
}

async fn list_models(State(state): State<RouterState>) -> Json<ModelList> {
    let data = state
        .manager
        .mappings()
        .into_iter()
        .map(|mapping| ModelEntry {
            id: mapping.virtual_model_id,
            object: "model".to_string(),
            created: 0,
            owned_by: "rcc".to_string(),
        })
        .collect();
    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

async fn mappings(State(state): State<RouterState>) -> Response {
    Json(state.manager.mappings()).into_response()
}

async fn metrics(State(state): State<RouterState>) -> Response {
    Json(state.manager.metrics_snapshot().await).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

/// HTTP status for a terminal routing failure.
pub fn status_for(kind: &RouteErrorKind) -> StatusCode {
    match kind {
        RouteErrorKind::UnknownVirtualModel => StatusCode::NOT_FOUND,
        RouteErrorKind::NoTargetAvailable => StatusCode::SERVICE_UNAVAILABLE,
        RouteErrorKind::Overloaded => StatusCode::TOO_MANY_REQUESTS,
        RouteErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RouteErrorKind::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        RouteErrorKind::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
        RouteErrorKind::Upstream { http_status, .. } => http_status
            .and_then(|status| StatusCode::from_u16(status).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY),
    }
}

fn bad_request(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            message: message.to_string(),
            kind: "invalid_request_error".to_string(),
            code: None,
        },
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

pub fn error_response(err: &RouteError) -> (StatusCode, Json<serde_json::Value>) {
    let body = ErrorBody {
        error: ErrorDetail {
            message: err.message.clone(),
            kind: err.kind.as_str().to_string(),
            code: match &err.kind {
                RouteErrorKind::Upstream { error_kind, .. } => Some(error_kind.clone()),
                _ => None,
            },
        },
    };
    let mut value = serde_json::to_value(&body).unwrap_or_default();
    if !err.attempts.is_empty()
        && let Ok(attempts) = serde_json::to_value(&err.attempts)
        && let Some(map) = value.as_object_mut()
    {
        map.insert("attempts".to_string(), attempts);
    }
    (status_for(&err.kind), Json(value))
}
