//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::backend::BackendClient;
use crate::config::{Config, ConfigError, CorsConfig};
use crate::error::Result;

/// Response header carrying the per-request correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<BackendClient>,
    pub config: Arc<Config>,
    pub system_prompt: Arc<str>,
}

impl AppState {
    /// Resolve the system prompt and build the backend client.
    pub fn new(config: Config) -> Result<Self> {
        let system_prompt = config.prompt.resolve()?;
        let backend = BackendClient::new(&config.backend)?;

        Ok(Self {
            backend: Arc::new(backend),
            config: Arc::new(config),
            system_prompt: Arc::from(system_prompt),
        })
    }
}

/// Correlation ID assigned to every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Build the CORS policy from the configured allow-list.
///
/// `"*"` allows any origin without credentials. Otherwise only listed origins
/// are allowed, and request headers are mirrored so credentials stay legal.
pub fn cors_layer(config: &CorsConfig) -> std::result::Result<CorsLayer, ConfigError> {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let base = CorsLayer::new()
        .allow_methods(methods)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);

    if config.allows_any_origin() {
        return Ok(base.allow_origin(Any).allow_headers(Any));
    }

    let layer = base.allow_origin(AllowOrigin::list(config.origin_values()?));
    Ok(if config.allow_credentials {
        layer
            .allow_credentials(true)
            .allow_headers(AllowHeaders::mirror_request())
    } else {
        layer.allow_headers(Any)
    })
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Result<Router> {
    let cors = cors_layer(&state.config.cors)?;

    Ok(Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/api/chat",
            post(handlers::chat).fallback(handlers::passthrough),
        )
        .route(
            "/api/chat/stream",
            post(handlers::chat_stream).fallback(handlers::passthrough),
        )
        .route(
            "/api/models",
            get(handlers::list_models).fallback(handlers::passthrough),
        )
        // Everything else under /api goes to the backend untouched
        .route("/api/*path", any(handlers::passthrough))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Outside CORS so preflight answers carry an id too
                .layer(middleware::from_fn(assign_request_id))
                .layer(cors),
        ))
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState::new(config)?;
    let app = create_router(state.clone())?;

    tracing::info!(
        backend = %state.backend.base_url(),
        model = %state.config.backend.model,
        origins = ?state.config.cors.allowed_origins,
        "Backend client ready"
    );

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting ollama-proxy server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Last handle to the backend client; its connection pool closes here.
    drop(state);
    tracing::info!("ollama-proxy stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
