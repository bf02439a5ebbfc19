//! HTTP proxy front end as a composed service.
//!
//! An `[http_proxies.<id>]` entry becomes an ordinary service that runs the
//! `http-proxy` subcommand of the current executable. Routes travel to the
//! child as JSON in `PROXIES`.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::config::schema::{ComposedServiceConfig, ServiceId};
use crate::ready::once_output_line_includes;

/// Host the proxy binds to when none is configured.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Line printed by the proxy once it accepts connections.
pub const LISTENING_PREFIX: &str = "Listening @ http://";

/// Configuration of one HTTP proxy service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpProxyServiceConfig {
    pub host: Option<String>,
    pub port: u16,
    pub dependencies: Vec<ServiceId>,
    /// Routes, tried in order. `None` entries are skipped.
    pub proxies: Vec<Option<ProxyRoute>>,
}

/// Requests whose path starts with one of `context` go to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyRoute {
    #[serde(deserialize_with = "one_or_many")]
    pub context: Vec<String>,
    pub target: String,
}

impl ProxyRoute {
    pub fn new<I, S>(context: I, target: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            context: context.into_iter().map(Into::into).collect(),
            target: target.into(),
        }
    }

    /// Check that the route can be served.
    pub fn validate(&self) -> Result<Url, String> {
        if self.context.is_empty() {
            return Err(format!("Proxy to '{}' has no context", self.target));
        }
        if let Some(path) = self.context.iter().find(|path| !path.starts_with('/')) {
            return Err(format!("Proxy context '{}' must start with '/'", path));
        }
        let target = Url::parse(&self.target)
            .map_err(|e| format!("Invalid proxy target '{}': {}", self.target, e))?;
        if target.scheme() != "http" {
            return Err(format!("Proxy target '{}' must use http", self.target));
        }
        if target.host_str().is_none() {
            return Err(format!("Proxy target '{}' has no host", self.target));
        }
        Ok(target)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

/// Turn a proxy config into the service that runs it.
pub fn configure_http_proxy_service(
    config: &HttpProxyServiceConfig,
) -> Result<ComposedServiceConfig, String> {
    if config.port == 0 {
        return Err("`port` must be set".to_string());
    }

    let routes: Vec<ProxyRoute> = config.proxies.iter().flatten().cloned().collect();
    for route in &routes {
        route.validate()?;
    }
    let proxies = serde_json::to_string(&routes).map_err(|e| e.to_string())?;

    let program = std::env::current_exe()
        .map_err(|e| format!("Cannot locate the proxy executable: {}", e))?;

    Ok(ComposedServiceConfig::new(vec![
        program.to_string_lossy().into_owned(),
        "http-proxy".to_string(),
    ])
    .dependencies(config.dependencies.iter().cloned())
    .env("HOST", config.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()))
    .env("PORT", config.port.to_string())
    .env("PROXIES", proxies)
    .ready(once_output_line_includes(LISTENING_PREFIX)))
}
