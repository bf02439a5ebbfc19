//! Configuration schema definitions.
//!
//! This module defines the raw configuration accepted by the composite
//! service, as written in a config file or built programmatically. Raw
//! service fields stay loosely typed (`serde_json::Value`) so that
//! `validation.rs` can report shape problems with the offending service id
//! instead of a generic deserialization error.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::configure::HttpProxyServiceConfig;
use crate::ready::ReadyProbe;

/// Unique key of a composed service.
pub type ServiceId = String;

/// Root configuration for a composite service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CompositeServiceConfig {
    /// Print the normalized configuration before starting.
    pub print_config: bool,

    /// Services to compose, keyed by id, in declaration order.
    /// Disabled (`false`) entries are discarded during normalization.
    pub services: Declarations<ComposedServiceConfig>,

    /// HTTP reverse-proxy front ends, keyed by id. Each one becomes an
    /// ordinary composed service.
    pub http_proxies: Declarations<HttpProxyServiceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl CompositeServiceConfig {
    /// Declare a service. Declaration order is preserved.
    pub fn service(mut self, id: impl Into<ServiceId>, config: ComposedServiceConfig) -> Self {
        self.services.push(id, Some(config));
        self
    }
}

/// Configuration of a single composed service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ComposedServiceConfig {
    /// Ids of other services that must be started before this one.
    /// Expected to be a list of strings.
    pub dependencies: Option<Value>,

    /// Either a single whitespace-separated string, or a list of strings
    /// and numbers (`argv`).
    pub command: Value,

    /// Environment variables. Values must be strings or numbers; `null`
    /// entries are dropped. Nothing else is inherited except `PATH`.
    pub env: Option<Value>,

    /// Declarative readiness check. Defaults to "ready immediately".
    pub ready: Option<ReadySpec>,

    /// Overrides `timeouts.ready_secs` for this service, in milliseconds.
    /// `0` disables it.
    pub ready_timeout_ms: Option<u64>,

    /// Programmatic readiness check; takes precedence over `ready`.
    #[serde(skip)]
    pub ready_probe: Option<ReadyProbe>,
}

impl ComposedServiceConfig {
    /// Create a service running `command` (string or argv list).
    pub fn new(command: impl Into<Value>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set the dependencies of this service.
    pub fn dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = ids.into_iter().map(|id| Value::String(id.into())).collect();
        self.dependencies = Some(Value::Array(ids));
        self
    }

    /// Set one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let env = self
            .env
            .get_or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = env {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Set a programmatic readiness probe.
    pub fn ready(mut self, probe: ReadyProbe) -> Self {
        self.ready_probe = Some(probe);
        self
    }

    /// Override the readiness timeout for this service. A zero duration
    /// disables it; anything else is rounded up to a whole millisecond.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        let mut ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 && !timeout.is_zero() {
            ms = 1;
        }
        self.ready_timeout_ms = Some(ms);
        self
    }
}

/// Declarative readiness checks usable from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReadySpec {
    /// Ready once an output line equals `value`.
    OutputLineIs { value: String },
    /// Ready once an output line contains `value`.
    OutputLineIncludes { value: String },
    /// Ready once `host:port` accepts TCP connections.
    PortUsed {
        port: u16,
        #[serde(default = "default_host")]
        host: String,
    },
    /// Ready after a fixed delay.
    Timeout { ms: u64 },
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum time a readiness probe may take, in seconds. `0` disables.
    pub ready_secs: u64,

    /// Time between the interrupt signal and a forced kill, in seconds.
    pub stop_secs: u64,
}

impl TimeoutConfig {
    /// Readiness timeout, `None` when disabled.
    pub fn ready(&self) -> Option<Duration> {
        (self.ready_secs > 0).then(|| Duration::from_secs(self.ready_secs))
    }

    /// Grace period before a stopping process is killed.
    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ready_secs: 120,
            stop_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level for diagnostics on stderr (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Ordered `id -> entry` declarations.
///
/// A TOML table does not keep its key order once it lands in a `HashMap`,
/// but startup errors are reported in declaration order, so entries are
/// kept as a list. Falsy scalars (`false`, `0`, `""`) deserialize to a
/// disabled (`None`) entry.
#[derive(Debug, Clone)]
pub struct Declarations<T>(Vec<(ServiceId, Option<T>)>);

impl<T> Declarations<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, id: impl Into<ServiceId>, entry: Option<T>) {
        self.0.push((id.into(), entry));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServiceId, Option<&T>)> {
        self.0.iter().map(|(id, entry)| (id, entry.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for Declarations<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for Declarations<T> {
    type Item = (ServiceId, Option<T>);
    type IntoIter = std::vec::IntoIter<(ServiceId, Option<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: Serialize> Serialize for Declarations<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, entry) in &self.0 {
            match entry {
                Some(entry) => map.serialize_entry(id, entry)?,
                None => map.serialize_entry(id, &false)?,
            }
        }
        map.end()
    }
}

/// A declaration value: either a table or a scalar switch.
#[derive(Deserialize)]
#[serde(untagged)]
enum Entry<T> {
    Declared(T),
    Scalar(Value),
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

struct DeclarationsVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for DeclarationsVisitor<T> {
    type Value = Declarations<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a table of declarations keyed by id")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut declarations = Declarations::new();
        while let Some((id, entry)) = access.next_entry::<ServiceId, Entry<T>>()? {
            let entry = match entry {
                Entry::Declared(config) => Some(config),
                Entry::Scalar(value) if is_falsy(&value) => None,
                Entry::Scalar(value) => {
                    return Err(de::Error::custom(format!(
                        "entry '{}' is neither a valid declaration nor a falsy value: {}",
                        id, value
                    )));
                }
            };
            declarations.push(id, entry);
        }
        Ok(declarations)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Declarations<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DeclarationsVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_keep_order_and_disable_falsy() {
        let config: CompositeServiceConfig = toml::from_str(
            r#"
            [services]
            zeta = { command = "zeta" }
            off = false
            alpha = { command = ["alpha", 1] }
            "#,
        )
        .unwrap();

        let ids: Vec<_> = config.services.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "off", "alpha"]);
        assert!(config.services.iter().nth(1).unwrap().1.is_none());
    }

    #[test]
    fn test_truthy_scalar_entry_rejected() {
        let result: Result<CompositeServiceConfig, _> = toml::from_str(
            r#"
            [services]
            web = true
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ready_spec_parsing() {
        let config: CompositeServiceConfig = toml::from_str(
            r#"
            [services.db]
            command = "postgres"
            ready = { kind = "port-used", port = 5432 }
            "#,
        )
        .unwrap();

        let (_, db) = config.services.iter().next().unwrap();
        assert_eq!(
            db.unwrap().ready,
            Some(ReadySpec::PortUsed {
                port: 5432,
                host: "localhost".into()
            })
        );
    }

    #[test]
    fn test_timeout_defaults() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.ready(), Some(Duration::from_secs(120)));
        assert_eq!(timeouts.stop(), Duration::from_secs(5));

        let disabled = TimeoutConfig {
            ready_secs: 0,
            ..TimeoutConfig::default()
        };
        assert_eq!(disabled.ready(), None);
    }
}
