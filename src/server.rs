//! HTTP surface: routing and the request pipeline.
//!
//! ```text
//! POST / | POST /pdf
//!   │
//!   ├─ 1. Identity   resolve client for logs (never fails)
//!   ├─ 2. Workspace  acquire per-request temp dir
//!   ├─ 3. Decode     multipart → parts, files stored in the workspace
//!   ├─ 4. Arguments  parts → argv, documentation flag, output target
//!   ├─ 5. Spawn      start the renderer              (500 on failure)
//!   └─ 6. Respond    commit 200, relay output        (abort on failure)
//! ```
//!
//! Steps 2–5 run before anything is sent, so their errors are ordinary
//! plain-text HTTP errors. The workspace is owned by the pipeline and then by
//! the response body; whichever holds it last removes it.

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::diagnostics::resolve_client_identity;
use crate::error::BridgeError;
use crate::pipeline::process::RendererProcess;
use crate::pipeline::workspace::Workspace;
use crate::pipeline::{args, decode, respond};
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared, read-only state of the router.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
}

/// Build the router serving `POST /` and `POST /pdf`.
pub fn router(config: ServerConfig) -> Router {
    let body_limit = match config.max_upload_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };
    let state = AppState {
        config: Arc::new(config),
    };
    let render_route = post(render).fallback(method_not_allowed);

    Router::new()
        .route("/", render_route.clone())
        .route("/pdf", render_route)
        .fallback(not_found)
        .layer(body_limit)
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, config: ServerConfig, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!(
        "kwkhtmltopdf server listening on {}",
        listener.local_addr()?
    );
    axum::serve(
        listener,
        router(config).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn render(State(state): State<AppState>, request: Request) -> Response {
    let started = Instant::now();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = resolve_client_identity(peer, &state.config).await;
    debug!("{} {} from {}", request.method(), request.uri().path(), identity);

    match prepare(&state, identity.clone(), started, request).await {
        Ok(response) => response,
        Err(err) => {
            if err.is_client_error() {
                warn!("Rejected request from {}: {}", identity, err);
            } else {
                warn!("Request from {} failed before response: {}", identity, err);
            }
            err.into_response()
        }
    }
}

/// Steps 2–6. Any error returned here happened before the header was sent.
async fn prepare(
    state: &AppState,
    identity: String,
    started: Instant,
    request: Request,
) -> Result<Response, BridgeError> {
    let config = &state.config;

    let workspace = Workspace::acquire(config.workspace_root.as_deref())?;

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| BridgeError::MalformedRequest(rejection.body_text()))?;
    let parts = decode::decode_parts(&mut multipart, &workspace).await?;

    let arguments =
        args::build_arguments(&parts, config.output_sink, &workspace, &config.output_suffix)?;
    if config.verbose {
        info!("Starting renderer for {}: {}", identity, arguments.redacted());
    } else {
        debug!("Starting renderer for {}: {}", identity, arguments.redacted());
    }

    let ctx = RequestContext::new(identity, arguments, workspace, started);
    let process = RendererProcess::start(&config.renderer_bin, &ctx.arguments)?;
    debug!(
        "Committing {} response to {}",
        if ctx.is_documentation() { "documentation" } else { "document" },
        ctx.identity
    );

    Ok(respond::commit(ctx, process, config))
}

async fn method_not_allowed(method: Method) -> (StatusCode, String) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        format!("http method not allowed: {method}\n"),
    )
}

async fn not_found(uri: Uri) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("path not found: {}\n", uri.path()),
    )
}
