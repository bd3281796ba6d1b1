//! REST API for the assistant core
//!
//! Exposes query routing and the action lifecycle over HTTP.
//! Integrates with the chat UI, which renders action previews and collects
//! confirm/cancel.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::Assistant;
use crate::error::AssistantError;
use crate::Result;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub user_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActionRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub user_id: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<Assistant>,
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Accepts a UUID or any stable user handle. Actions are scoped to the
/// user, so an identity is required.
fn resolve_user(value: Option<&str>) -> Result<Uuid> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => {
            Ok(Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v)))
        }
        _ => Err(AssistantError::validation("user_id", "is required")),
    }
}

fn parse_action_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AssistantError::validation("action_id", "must be a UUID"))
}

fn status_for(err: &AssistantError) -> StatusCode {
    match err {
        AssistantError::Validation { .. } | AssistantError::Execution(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AssistantError::NotFound(_) => StatusCode::NOT_FOUND,
        AssistantError::InvalidState { .. } => StatusCode::CONFLICT,
        AssistantError::Expired(_) => StatusCode::GONE,
        AssistantError::ChainExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T>) -> (StatusCode, Json<ApiResponse>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = status_for(&e);
            if e.is_user_error() {
                warn!(status = status.as_u16(), error = %e, "Request rejected");
            } else {
                error!(status = status.as_u16(), error = %e, "Request failed");
            }
            (status, Json(ApiResponse::error(e.user_message())))
        }
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Query Endpoint
/// =============================

async fn query_handler(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = match resolve_user(req.user_id.as_deref()) {
        Ok(id) => id,
        Err(e) => return respond::<()>(Err(e)),
    };

    info!(user_id = %user_id, chars = req.text.chars().count(), "Received query");

    let (status, Json(mut response)) =
        respond(state.assistant.route_and_maybe_propose(user_id, &req.text).await);

    if response.success {
        if let Some(data) = response.data.as_mut().and_then(|d| d.as_object_mut()) {
            data.insert("user_id".to_string(), serde_json::json!(user_id.to_string()));
        }
    }
    (status, Json(response))
}

/// =============================
/// Action Endpoints
/// =============================

async fn confirm_handler(
    State(state): State<ApiState>,
    Path(action_id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let ids = resolve_user(req.user_id.as_deref())
        .and_then(|user| parse_action_id(&action_id).map(|action| (user, action)));

    let result = match ids {
        Ok((user_id, action_id)) => {
            info!(user_id = %user_id, action_id = %action_id, "Confirm requested");
            state.assistant.confirm_action(user_id, action_id).await
        }
        Err(e) => Err(e),
    };
    respond(result)
}

async fn cancel_handler(
    State(state): State<ApiState>,
    Path(action_id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let ids = resolve_user(req.user_id.as_deref())
        .and_then(|user| parse_action_id(&action_id).map(|action| (user, action)));

    let result = match ids {
        Ok((user_id, action_id)) => {
            info!(user_id = %user_id, action_id = %action_id, "Cancel requested");
            state.assistant.cancel_action(user_id, action_id).await
        }
        Err(e) => Err(e),
    };
    respond(result)
}

async fn list_handler(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let result = match resolve_user(params.user_id.as_deref()) {
        Ok(user_id) => state.assistant.list_actions(user_id).await,
        Err(e) => Err(e),
    };
    respond(result)
}

/// =============================
/// Router
/// =============================

pub fn create_router(assistant: Arc<Assistant>) -> Router {
    let state = ApiState { assistant };

    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(query_handler))
        .route("/api/actions", get(list_handler))
        .route("/api/actions/:id/confirm", post(confirm_handler))
        .route("/api/actions/:id/cancel", post(cancel_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    assistant: Arc<Assistant>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(assistant);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionStateMachine, InMemoryActionStore};
    use crate::audit::AuditLog;
    use crate::execution::{ActionExecutor, Collaborators, InMemoryLedger};
    use crate::providers::{ProviderClient, ScriptedProvider, ScriptedReply};
    use crate::router::{FailureSignatures, FallbackChains, ProviderRouter};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Datelike, Months, Utc};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const RENT_QUERY: &str = "Schedule my rent payment of ₹15000 on the 1st of every month";

    fn app(replies: Vec<ScriptedReply>) -> Router {
        let fast: Arc<dyn ProviderClient> = Arc::new(ScriptedProvider::new("fast", replies));
        let chains = FallbackChains {
            conversational: vec!["fast".to_string()],
            ..FallbackChains::default()
        };
        let router = Arc::new(
            ProviderRouter::new(vec![fast], chains, FailureSignatures::default()).unwrap(),
        );
        let executor = Arc::new(ActionExecutor::new(Collaborators::in_memory(Arc::new(
            InMemoryLedger::new(),
        ))));
        let actions = Arc::new(ActionStateMachine::new(
            Arc::new(InMemoryActionStore::new()),
            executor,
            Duration::from_secs(600),
            Duration::from_secs(5),
        ));
        let assistant = Assistant::new(router, actions, AuditLog::new(), Duration::from_secs(1));
        create_router(Arc::new(assistant))
    }

    fn rent_reply() -> ScriptedReply {
        let today = Utc::now().date_naive();
        let next_first = today.with_day(1).unwrap() + Months::new(1);
        ScriptedReply::text(format!(
            "Done. {}",
            json!({
                "action": "schedule_payment",
                "arguments": {
                    "name": "Rent",
                    "amount": 15000,
                    "frequency": "monthly",
                    "next_due": next_first.to_string()
                }
            })
        ))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(b) => Body::from(b.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(vec![]), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_propose_confirm_and_reconfirm() {
        let app = app(vec![rent_reply()]);

        let (status, body) = send(
            &app,
            "POST",
            "/api/query",
            Some(json!({ "user_id": "asha", "text": RENT_QUERY })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user_id"], stable_uuid_from_string("asha").to_string());
        let action = &body["data"]["proposed_action"];
        assert_eq!(action["status"], "proposed");
        assert_eq!(action["action_type"], "schedule_payment");
        let id = action["id"].as_str().unwrap().to_string();

        let uri = format!("/api/actions/{}/confirm", id);
        let (status, body) = send(&app, "POST", &uri, Some(json!({ "user_id": "asha" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "executed");
        assert_eq!(body["data"]["related_entity_type"], "scheduled_payment");

        let (status, again) = send(&app, "POST", &uri, Some(json!({ "user_id": "asha" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["data"]["related_entity_id"], body["data"]["related_entity_id"]);

        // Another user cannot see it
        let (status, _) = send(&app, "POST", &uri, Some(json!({ "user_id": "ravi" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, listed) = send(&app, "GET", "/api/actions?user_id=asha", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_then_confirm_conflicts() {
        let app = app(vec![rent_reply()]);
        let (_, body) = send(
            &app,
            "POST",
            "/api/query",
            Some(json!({ "user_id": "asha", "text": RENT_QUERY })),
        )
        .await;
        let id = body["data"]["proposed_action"]["id"].as_str().unwrap().to_string();

        let (status, cancelled) = send(
            &app,
            "POST",
            &format!("/api/actions/{}/cancel", id),
            Some(json!({ "user_id": "asha" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["data"]["status"], "cancelled");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/actions/{}/confirm", id),
            Some(json!({ "user_id": "asha" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "This action was cancelled.");
    }

    #[tokio::test]
    async fn test_bad_identifiers() {
        let app = app(vec![]);

        let (status, _) = send(
            &app,
            "POST",
            "/api/query",
            Some(json!({ "text": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            "POST",
            "/api/actions/not-a-uuid/confirm",
            Some(json!({ "user_id": "asha" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/actions/{}/confirm", Uuid::new_v4()),
            Some(json!({ "user_id": "asha" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_503_without_vendor_detail() {
        let app = app(vec![ScriptedReply::Transport]);
        let (status, body) = send(
            &app,
            "POST",
            "/api/query",
            Some(json!({ "user_id": "asha", "text": "tell me something about saving money" })),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("unavailable"));
        assert!(!message.contains("connection refused"));
    }
}
