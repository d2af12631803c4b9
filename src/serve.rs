//! Purpose: Provide the HTTP control surface for limbs and configuration.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server translating `/config` and `/limb/{name}` calls into Dispatcher requests.
//! Invariants: 200 means the operation completed; every failure maps to one stable status.
//! Invariants: Loopback-only unless explicitly allowed.
//! Notes: Hardware calls run on the blocking pool so a dropped request never stops one midway.

use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path as AxumPath, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use phal::api::{
    BoardSpec, Dispatcher, Error, ErrorKind, GENERATION_HEADER, LimbValue, SimulatedBoard,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub board: BoardSpec,
    pub initial_config: Option<Vec<u8>>,
    pub max_body_bytes: u64,
}

struct AppState {
    dispatcher: Dispatcher,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let board = SimulatedBoard::new(&config.board)?;
    let dispatcher = Dispatcher::new(Arc::new(board));
    if let Some(payload) = &config.initial_config {
        let registry = dispatcher.apply_config(payload)?;
        info!(limbs = registry.len(), "initial configuration applied");
    }

    let app = router(Arc::new(AppState { dispatcher }), max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read bound address")
            .with_source(err)
    })?;
    info!(addr = %local_addr, "phal listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/config", get(active_config).post(apply_config))
        .route("/limb/:name", get(get_limb).post(set_limb))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Runs one Dispatcher call on the blocking pool; it completes even if the client goes away.
async fn run_blocking<T, F>(state: &AppState, op: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(Dispatcher) -> Result<T, Error> + Send + 'static,
{
    let dispatcher = state.dispatcher.clone();
    tokio::task::spawn_blocking(move || op(dispatcher))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("limb operation did not complete")
                .with_source(err)
        })?
}

async fn index() -> Response {
    Json(json!({ "name": "phal", "version": env!("CARGO_PKG_VERSION") })).into_response()
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn active_config(State(state): State<Arc<AppState>>) -> Response {
    let registry = state.dispatcher.current();
    let body = json!({
        "generation": registry.generation(),
        "limbs": registry.config(),
    });
    with_generation(Json(body).into_response(), registry.generation())
}

async fn apply_config(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let result = run_blocking(&state, move |dispatcher| {
        dispatcher
            .apply_config(&body)
            .map(|registry| (registry.generation(), registry.len()))
    })
    .await;
    match result {
        Ok((generation, limbs)) => with_generation(
            Json(json!({ "generation": generation, "limbs": limbs })).into_response(),
            generation,
        ),
        // A rejected config leaves the current generation serving.
        Err(err) => with_generation(error_response(err), state.dispatcher.current().generation()),
    }
}

async fn get_limb(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    let registry = state.dispatcher.current();
    let generation = registry.generation();
    let result = run_blocking(&state, move |dispatcher| {
        dispatcher.get_limb_in(&registry, &name)
    })
    .await;
    let response = match result {
        Ok(LimbValue::Level(level)) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            level.as_str(),
        )
            .into_response(),
        Ok(LimbValue::Bytes(bytes)) => {
            ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
        }
        Err(err) => error_response(err),
    };
    with_generation(response, generation)
}

async fn set_limb(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    body: Bytes,
) -> Response {
    let registry = state.dispatcher.current();
    let generation = registry.generation();
    let result = run_blocking(&state, move |dispatcher| {
        dispatcher.set_limb_in(&registry, &name, &body)
    })
    .await;
    let response = match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    };
    with_generation(response, generation)
}

fn with_generation(mut response: Response, generation: u64) -> Response {
    response
        .headers_mut()
        .insert(GENERATION_HEADER, HeaderValue::from(generation));
    response
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        kind if kind.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Direction => StatusCode::CONFLICT,
        ErrorKind::Hardware => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: err.kind().as_str(),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            limb: err.limb().map(str::to_string),
            resource: err.resource().map(str::to_string),
        },
    };
    (status, Json(body)).into_response()
}
