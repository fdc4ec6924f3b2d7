use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::scheduler::UserWrite;
use crate::state::SharedState;

const INDEX_HTML: &str = include_str!("ui/index.html");

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub writes: mpsc::Sender<UserWrite>,
}

#[derive(Debug, Deserialize)]
struct SettingWrite {
    key: String,
    value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/settings", get(get_settings).post(post_setting))
        .route("/api/modes/auto", post(all_auto))
        .with_state(app)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

async fn get_settings(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.settings.clone())
}

/// Check the write against the current settings, then queue it for the
/// next tick.
async fn post_setting(State(app): State<AppState>, Json(body): Json<SettingWrite>) -> Response {
    let value = match &body.value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => return bad_request(format!("{}: unsupported value {other}", body.key)),
    };

    {
        let mut probe = app.shared.read().await.settings.clone();
        if let Err(e) = probe.apply_checked(&body.key, &value) {
            return bad_request(format!("{e:#}"));
        }
    }

    queue(
        &app,
        UserWrite::Set {
            key: body.key.trim().to_string(),
            value,
        },
    )
    .await
}

async fn all_auto(State(app): State<AppState>) -> Response {
    queue(&app, UserWrite::AllAuto).await
}

async fn queue(app: &AppState, write: UserWrite) -> Response {
    let detail = format!("{write:?}");
    match app.writes.send(write).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "queued": detail }))).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "controller is not running" })),
        )
            .into_response(),
    }
}

fn bad_request(error: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    #[cfg(feature = "tls")]
    {
        if let (Ok(cert), Ok(key)) = (env::var("TLS_CERT"), env::var("TLS_KEY")) {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
                .await
                .with_context(|| format!("failed to load TLS cert/key: {cert}, {key}"))?;
            tracing::info!(%addr, "web ui listening on https");
            axum_server::bind_rustls(addr, tls)
                .serve(router(app).into_make_service())
                .await
                .context("web server error")?;
            return Ok(());
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "web ui listening on http");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
