// src/api.rs
//! HTTP surface over the same command executor the CLI uses.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::app::App;
use crate::commands::{self, Command, CommandOutcome};
use crate::error::ErrorCode;
use crate::metrics::Metrics;

/// Commands mutate config and state files, so they run one at a time.
pub type SharedApp = Arc<Mutex<App>>;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DigestReq {
    force: bool,
    skip_collect: bool,
    send: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EventReq {
    skip_collect: bool,
    send: bool,
}

#[derive(Debug, Deserialize)]
struct CommandReq {
    text: String,
}

pub fn router(app: App) -> Router {
    router_with(Arc::new(Mutex::new(app)))
}

pub fn router_with(state: SharedApp) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/digest", post(digest))
        .route("/event", post(event))
        .route("/command", post(command))
        .with_state(state)
        .merge(Metrics::router())
        .layer(CorsLayer::very_permissive())
}

fn status_for(outcome: &CommandOutcome) -> StatusCode {
    match outcome.code {
        None => StatusCode::OK,
        Some(ErrorCode::UnknownCommand | ErrorCode::InvalidArgument) => StatusCode::BAD_REQUEST,
        Some(ErrorCode::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorCode::DeliveryFailed) => StatusCode::BAD_GATEWAY,
        Some(ErrorCode::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(result: anyhow::Result<CommandOutcome>) -> Response {
    match result {
        Ok(outcome) => (status_for(&outcome), Json(outcome)).into_response(),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            let outcome = CommandOutcome {
                success: false,
                code: Some(ErrorCode::Internal),
                message: format!("{e:#}"),
                digest_text: None,
                data: serde_json::Value::Null,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(outcome)).into_response()
        }
    }
}

async fn status(State(app): State<SharedApp>) -> Response {
    let mut app = app.lock().await;
    respond(commands::execute(&mut app, Command::Status, Utc::now()).await)
}

async fn digest(State(app): State<SharedApp>, Json(req): Json<DigestReq>) -> Response {
    let cmd = Command::Digest {
        force: req.force,
        skip_collect: req.skip_collect,
        send: req.send,
    };
    let mut app = app.lock().await;
    respond(commands::execute(&mut app, cmd, Utc::now()).await)
}

async fn event(State(app): State<SharedApp>, Json(req): Json<EventReq>) -> Response {
    let cmd = Command::Event {
        skip_collect: req.skip_collect,
        send: req.send,
    };
    let mut app = app.lock().await;
    respond(commands::execute(&mut app, cmd, Utc::now()).await)
}

async fn command(State(app): State<SharedApp>, Json(req): Json<CommandReq>) -> Response {
    let mut app = app.lock().await;
    respond(commands::run_text(&mut app, &req.text, Utc::now()).await)
}
