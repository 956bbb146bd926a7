use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;
use tracing::info;

use crate::engine::Engine;
use crate::fade::FadeRequestInput;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Body of POST /v1/fade
#[derive(Debug, Deserialize)]
struct FadeRequest {
    lights: Vec<String>,

    #[serde(flatten)]
    request: FadeRequestInput,
}

/// Body of POST /v1/exclude and /v1/include
#[derive(Debug, Deserialize)]
struct LightsRequest {
    lights: Vec<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

fn bad_request(error: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn ok() -> Response {
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
        .into_response()
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    debug!("Handling /v1/ping request");
    ok()
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for GET /v1/diagnostics
#[tracing::instrument(skip(state))]
async fn diagnostics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.engine.diagnostics()))
}

/// Handler for POST /v1/fade
///
/// Runs the fade to completion and answers with one outcome per light.
#[tracing::instrument(skip(state))]
async fn fade(State(state): State<Arc<AppState>>, Json(body): Json<FadeRequest>) -> Response {
    if body.lights.is_empty() {
        return bad_request("lights must not be empty");
    }

    let settings = state.engine.settings();
    let params = match body
        .request
        .into_params(settings.default_transition_ms, settings.default_easing)
    {
        Ok(params) => params,
        Err(e) => return bad_request(e),
    };

    let report = state.engine.request_fade(&body.lights, params).await;
    (StatusCode::OK, Json(report)).into_response()
}

/// Handler for POST /v1/exclude
#[tracing::instrument(skip(state))]
async fn exclude(State(state): State<Arc<AppState>>, Json(body): Json<LightsRequest>) -> Response {
    state.engine.exclude(&body.lights).await;
    ok()
}

/// Handler for POST /v1/include
#[tracing::instrument(skip(state))]
async fn include(State(state): State<Arc<AppState>>, Json(body): Json<LightsRequest>) -> Response {
    state.engine.include(&body.lights).await;
    ok()
}

/// Create the API router with all endpoints
pub fn create_router(engine: Arc<Engine>) -> Router {
    let state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        engine,
    });

    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/fade", post(fade))
        .route("/v1/exclude", post(exclude))
        .route("/v1/include", post(include))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    engine: Arc<Engine>,
    listen: String,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(engine);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
