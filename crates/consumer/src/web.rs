use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::broker::ConnectionState;
use crate::db::{Db, HistoryWindow, StoredAction, StoredNotification, StoredReading};
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
}

/// Store failures surface as a 500 with the error text.
struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("status api: {:#}", self.0);
        let body = Json(json!({ "error": format!("{:#}", self.0) }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

// History routes take `?start=<rfc3339>&end=<rfc3339>&limit=<n>`; all optional.

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/greenhouses/{id}/readings", get(readings))
        .route("/api/greenhouses/{id}/actions", get(actions))
        .route("/api/greenhouses/{id}/notifications", get(notifications))
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    broker: ConnectionState,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(Health {
        status: "ok",
        broker: st.connection,
    })
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

async fn readings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(window): Query<HistoryWindow>,
) -> Result<Json<Vec<StoredReading>>, AppError> {
    Ok(Json(state.db.readings_for_greenhouse(id, &window).await?))
}

async fn actions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(window): Query<HistoryWindow>,
) -> Result<Json<Vec<StoredAction>>, AppError> {
    Ok(Json(state.db.actions_for_greenhouse(id, &window).await?))
}

async fn notifications(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(window): Query<HistoryWindow>,
) -> Result<Json<Vec<StoredNotification>>, AppError> {
    Ok(Json(state.db.notifications_for_greenhouse(id, &window).await?))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status port {port}"))?;

    info!("status api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("status server error")
}

// ===========================================================================
// Tests
// ===========================================================================
