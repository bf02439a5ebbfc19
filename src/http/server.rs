//! HTTP proxy server.
//!
//! # Responsibilities
//! - Read routes and the listen address from the environment
//! - Forward each request to the first route whose prefix matches its path
//! - Wire up middleware (tracing, timeout, request ID)
//! - Announce the listen address on stdout once bound
//!
//! # Design Decisions
//! - Routes are matched by plain path prefix, in declaration order
//! - The target's own path is prepended to the forwarded path
//! - No retries: an upstream failure is a 502

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::http::configure::{ProxyRoute, DEFAULT_HOST, LISTENING_PREFIX};
use crate::http::request::{RequestIdExt, RequestIdLayer};

/// Upper bound on one proxied exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid {name}: {message}")]
    InvalidEnv { name: &'static str, message: String },

    #[error("invalid route: {0}")]
    Route(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where to listen and what to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub routes: Vec<ProxyRoute>,
}

impl ProxySettings {
    /// Read `HOST`, `PORT` and `PROXIES` from the environment.
    pub fn from_env() -> Result<Self, ProxyError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProxyError> {
        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = lookup("PORT")
            .ok_or(ProxyError::MissingEnv("PORT"))?
            .parse::<u16>()
            .map_err(|e| ProxyError::InvalidEnv {
                name: "PORT",
                message: e.to_string(),
            })?;
        let routes: Vec<ProxyRoute> = match lookup("PROXIES") {
            Some(json) => serde_json::from_str(&json).map_err(|e| ProxyError::InvalidEnv {
                name: "PROXIES",
                message: e.to_string(),
            })?,
            None => Vec::new(),
        };
        Ok(Self { host, port, routes })
    }
}

struct CompiledRoute {
    prefixes: Vec<String>,
    target: Url,
}

impl CompiledRoute {
    fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn upstream_uri(&self, original: &Uri) -> Result<Uri, String> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let base = self.target.as_str().trim_end_matches('/');
        format!("{}{}", base, path_and_query)
            .parse::<Uri>()
            .map_err(|e| e.to_string())
    }
}

/// Application state injected into the handler.
#[derive(Clone)]
struct AppState {
    routes: Arc<Vec<CompiledRoute>>,
    client: Client<HttpConnector, Body>,
}

/// Build the proxy router for `routes`.
pub fn build_router(routes: &[ProxyRoute]) -> Result<Router, ProxyError> {
    let routes = routes
        .iter()
        .map(|route| {
            Ok(CompiledRoute {
                prefixes: route.context.clone(),
                target: route.validate().map_err(ProxyError::Route)?,
            })
        })
        .collect::<Result<Vec<_>, ProxyError>>()?;

    let state = AppState {
        routes: Arc::new(routes),
        client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
    };

    Ok(Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        .layer(RequestIdLayer)
        .layer(TraceLayer::new_for_http()))
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(settings: ProxySettings, shutdown: F) -> Result<(), ProxyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind((settings.host.as_str(), settings.port)).await?;
    serve_on(listener, &settings.host, &settings.routes, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(
    listener: TcpListener,
    host: &str,
    routes: &[ProxyRoute],
    shutdown: F,
) -> Result<(), ProxyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(routes)?;
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, routes = routes.len(), "HTTP proxy starting");
    println!("{}{}:{}", LISTENING_PREFIX, host, addr.port());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP proxy stopped");
    Ok(())
}

/// Forward a request to the first matching route.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request.request_id().unwrap_or("unknown").to_string();
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    let Some(route) = state.routes.iter().find(|route| route.matches(&path)) else {
        tracing::warn!(request_id = %request_id, path = %path, "No route matched");
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let uri = match route.upstream_uri(request.uri()) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Invalid upstream URI").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        upstream = %uri,
        "Proxying request"
    );

    let (mut parts, body) = request.into_parts();
    parts.uri = uri;
    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
