//! HTTP reverse-proxy front end.
//!
//! # Data Flow
//! ```text
//! [http_proxies.<id>] config
//!     → configure.rs (a composed service running `http-proxy`)
//!     → child process reads HOST / PORT / PROXIES
//!     → server.rs (Axum router, prefix match, hyper-util client)
//!     → request.rs (x-request-id on every forwarded request)
//! ```

pub mod configure;
pub mod request;
pub mod server;

pub use configure::{configure_http_proxy_service, HttpProxyServiceConfig, ProxyRoute};
pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::{ProxyError, ProxySettings};
