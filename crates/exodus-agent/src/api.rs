//! REST surface of the agent.
//!
//! Thin adapter mapping the v1 endpoints onto the collector and the console
//! reporter. Input validation lives here; everything below reports errors as
//! values and [`ApiError`] translates them to status codes.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::error;
use url::Url;

use exodus_store::{Credentials, StoreError};

use crate::collector::CollectorService;
use crate::console::Console;
use crate::error::ApiError;
use crate::models::{AgentStatus, CollectorStatus};

#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<CollectorService>,
    pub console: Console,
}

pub fn build_router(state: AppState, statics_folder: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/agent", get(get_agent_status).post(set_agent_mode))
        .route(
            "/collector",
            get(get_collector_status)
                .post(start_collector)
                .delete(stop_collector),
        )
        .route("/collector/inventory", get(get_inventory))
        .fallback(api_not_found)
        .with_state(state);

    let mut router = Router::new().nest("/api/v1", api);

    if let Some(folder) = statics_folder {
        // Frontend assets; unknown paths fall back to the SPA entry point.
        let statics =
            ServeDir::new(folder).not_found_service(ServeFile::new(folder.join("index.html")));
        router = router.fallback_service(statics);
    }

    router.layer(TraceLayer::new_for_http())
}

async fn api_not_found() -> ApiError {
    ApiError::NotFound("API endpoint not found".to_string())
}

// (GET /agent)
async fn get_agent_status(State(state): State<AppState>) -> Json<AgentStatus> {
    Json(AgentStatus {
        console: state.console.status(),
    })
}

#[derive(Deserialize)]
struct AgentModeRequest {
    mode: String,
}

// (POST /agent)
async fn set_agent_mode(
    State(state): State<AppState>,
    Json(request): Json<AgentModeRequest>,
) -> Result<Json<AgentStatus>, ApiError> {
    let mode = request
        .mode
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    state.console.set_mode(mode);

    Ok(Json(AgentStatus {
        console: state.console.status(),
    }))
}

// (GET /collector)
async fn get_collector_status(State(state): State<AppState>) -> Json<CollectorStatus> {
    Json(state.collector.status())
}

#[derive(Deserialize)]
struct StartCollectorRequest {
    url: String,
    username: String,
    password: String,
}

// (POST /collector)
async fn start_collector(
    State(state): State<AppState>,
    Json(request): Json<StartCollectorRequest>,
) -> Result<(StatusCode, Json<CollectorStatus>), ApiError> {
    if request.url.is_empty() || request.username.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "url, username, and password are required".to_string(),
        ));
    }
    let parsed = Url::parse(&request.url)
        .map_err(|_| ApiError::BadRequest("invalid url format".to_string()))?;
    if parsed.host_str().is_none() {
        return Err(ApiError::BadRequest("invalid url format".to_string()));
    }

    let creds = Credentials::new(request.url, request.username, request.password);
    state.collector.start(creds).await.map_err(|e| {
        error!(error = %e, "failed to start collector");
        ApiError::from(e)
    })?;

    Ok((StatusCode::ACCEPTED, Json(state.collector.status())))
}

// (DELETE /collector)
async fn stop_collector(State(state): State<AppState>) -> Json<CollectorStatus> {
    state.collector.stop();
    Json(state.collector.status())
}

// (GET /collector/inventory)
async fn get_inventory(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    match state.collector.get_inventory() {
        Ok(inventory) => Ok((
            [(header::CONTENT_TYPE, "application/json")],
            inventory.data,
        )),
        Err(StoreError::NotFound) => Err(ApiError::NotFound("inventory not found".to_string())),
        Err(e) => {
            error!(error = %e, "failed to read inventory");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}
