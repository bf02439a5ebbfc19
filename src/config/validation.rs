//! Configuration validation and normalization.
//!
//! # Responsibilities
//! - Discard disabled service entries
//! - Check referential integrity (dependencies reference existing services)
//! - Normalize commands to argv and environment values to strings
//! - Reject dependency cycles
//!
//! # Design Decisions
//! - Pure function: CompositeServiceConfig → Result<NormalizedConfig, ConfigError>
//! - Returns the first error, in declaration order; shape errors before cycles
//! - Runs before any process exists

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::schema::{
    ComposedServiceConfig, CompositeServiceConfig, ObservabilityConfig, ServiceId, TimeoutConfig,
};
use crate::http::configure::configure_http_proxy_service;
use crate::ready::ReadyProbe;

/// Invalid configuration. Reported before any service starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid Config: No configured service")]
    NoServices,

    #[error("Invalid Config: Duplicate service id '{0}'")]
    DuplicateId(ServiceId),

    #[error("Invalid Config: Service '{service}': {message}")]
    Service { service: ServiceId, message: String },

    #[error("Invalid Config: Found cyclic dependency {}", .path.join(" -> "))]
    Cycle { path: Vec<ServiceId> },
}

impl ConfigError {
    fn service(service: &str, message: impl Into<String>) -> Self {
        ConfigError::Service {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

/// Validated configuration of one service.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedServiceConfig {
    pub id: ServiceId,
    pub dependencies: Vec<ServiceId>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ready: ReadyProbe,
    pub ready_timeout: Option<Duration>,
}

/// Validated configuration. Services are in declaration order and their
/// dependency graph is acyclic.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedConfig {
    pub print_config: bool,
    pub services: Vec<NormalizedServiceConfig>,
    pub timeouts: TimeoutConfig,
    pub observability: ObservabilityConfig,
}

impl NormalizedConfig {
    /// Look up a service by id.
    pub fn get(&self, id: &str) -> Option<&NormalizedServiceConfig> {
        self.services.iter().find(|service| service.id == id)
    }
}

/// Validate and normalize a raw configuration.
pub fn normalize_config(config: CompositeServiceConfig) -> Result<NormalizedConfig, ConfigError> {
    let CompositeServiceConfig {
        print_config,
        services,
        http_proxies,
        timeouts,
        observability,
    } = config;

    let mut declared: Vec<(ServiceId, ComposedServiceConfig)> = services
        .into_iter()
        .filter_map(|(id, entry)| entry.map(|config| (id, config)))
        .collect();

    for (id, proxy) in http_proxies.into_iter() {
        if let Some(proxy) = proxy {
            let service = configure_http_proxy_service(&proxy)
                .map_err(|message| ConfigError::service(&id, message))?;
            declared.push((id, service));
        }
    }

    if declared.is_empty() {
        return Err(ConfigError::NoServices);
    }

    let mut seen = HashSet::new();
    for (id, _) in &declared {
        if !seen.insert(id.as_str()) {
            return Err(ConfigError::DuplicateId(id.clone()));
        }
    }

    let ids: Vec<&str> = declared.iter().map(|(id, _)| id.as_str()).collect();
    let services = declared
        .iter()
        .map(|(id, config)| normalize_service(id, config, &ids, &timeouts))
        .collect::<Result<Vec<_>, _>>()?;

    check_for_cycles(&services)?;

    Ok(NormalizedConfig {
        print_config,
        services,
        timeouts,
        observability,
    })
}

fn normalize_service(
    id: &str,
    config: &ComposedServiceConfig,
    ids: &[&str],
    timeouts: &TimeoutConfig,
) -> Result<NormalizedServiceConfig, ConfigError> {
    let dependencies = normalize_dependencies(id, config.dependencies.as_ref(), ids)?;
    let command = normalize_command(id, &config.command)?;
    let env = normalize_env(id, config.env.as_ref())?;

    let ready = match (&config.ready_probe, &config.ready) {
        (Some(probe), _) => probe.clone(),
        (None, Some(spec)) => ReadyProbe::from(spec),
        (None, None) => ReadyProbe::immediate(),
    };
    let ready_timeout = match config.ready_timeout_ms {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => timeouts.ready(),
    };

    Ok(NormalizedServiceConfig {
        id: id.to_string(),
        dependencies,
        command,
        env,
        ready,
        ready_timeout,
    })
}

fn normalize_dependencies(
    id: &str,
    dependencies: Option<&Value>,
    ids: &[&str],
) -> Result<Vec<ServiceId>, ConfigError> {
    let items = match dependencies {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ConfigError::service(id, "`dependencies` is not an array")),
    };

    let mut normalized: Vec<ServiceId> = Vec::with_capacity(items.len());
    for item in items {
        let dependency = match item {
            Value::String(dependency) => dependency,
            other => {
                return Err(ConfigError::service(
                    id,
                    format!("Dependency {} is not a service id", other),
                ))
            }
        };
        if !ids.contains(&dependency.as_str()) {
            return Err(ConfigError::service(
                id,
                format!("Dependency on nonexistent service '{}'", dependency),
            ));
        }
        if !normalized.contains(dependency) {
            normalized.push(dependency.clone());
        }
    }
    Ok(normalized)
}

fn normalize_command(id: &str, command: &Value) -> Result<Vec<String>, ConfigError> {
    let argv: Vec<String> = match command {
        Value::String(line) => line.split_whitespace().map(str::to_string).collect(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| {
                scalar_to_string(part).ok_or_else(|| {
                    ConfigError::service(
                        id,
                        "Command contains an element that is not string or number",
                    )
                })
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(ConfigError::service(
                id,
                "`command` is not a string or an array",
            ))
        }
    };

    if argv.is_empty() {
        return Err(ConfigError::service(id, "`command` is empty"));
    }
    Ok(argv)
}

fn normalize_env(id: &str, env: Option<&Value>) -> Result<BTreeMap<String, String>, ConfigError> {
    let entries = match env {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(entries)) => entries,
        Some(_) => return Err(ConfigError::service(id, "`env` is not a table")),
    };

    let mut normalized = BTreeMap::new();
    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        let value = scalar_to_string(value).ok_or_else(|| {
            ConfigError::service(
                id,
                format!(
                    "Environment variable '{}' is not string, number, or undefined",
                    key
                ),
            )
        })?;
        normalized.insert(key.clone(), value);
    }
    Ok(normalized)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Depth-first walk from every service, tracking the current path.
fn check_for_cycles(services: &[NormalizedServiceConfig]) -> Result<(), ConfigError> {
    fn visit<'a>(
        id: &'a str,
        services: &'a [NormalizedServiceConfig],
        path: &mut Vec<&'a str>,
        acyclic: &mut HashSet<&'a str>,
    ) -> Result<(), ConfigError> {
        if path.contains(&id) {
            let mut cycle: Vec<ServiceId> = path.iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Err(ConfigError::Cycle { path: cycle });
        }
        if acyclic.contains(id) {
            return Ok(());
        }

        path.push(id);
        if let Some(service) = services.iter().find(|s| s.id == id) {
            for dependency in &service.dependencies {
                visit(dependency, services, path, acyclic)?;
            }
        }
        path.pop();
        acyclic.insert(id);
        Ok(())
    }

    let mut acyclic = HashSet::new();
    for service in services {
        visit(&service.id, services, &mut Vec::new(), &mut acyclic)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(services: Vec<(&str, Option<ComposedServiceConfig>)>) -> CompositeServiceConfig {
        let mut config = CompositeServiceConfig::default();
        for (id, service) in services {
            config.services.push(id, service);
        }
        config
    }

    #[test]
    fn test_cycle_is_reported_in_traversal_order() {
        let result = normalize_config(config(vec![
            ("a", Some(ComposedServiceConfig::new("a").dependencies(["b"]))),
            ("b", Some(ComposedServiceConfig::new("b").dependencies(["c"]))),
            ("c", Some(ComposedServiceConfig::new("c").dependencies(["a"]))),
        ]));

        let err = result.unwrap_err();
        assert_eq!(
            err,
            ConfigError::Cycle {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            }
        );
        assert_eq!(
            err.to_string(),
            "Invalid Config: Found cyclic dependency a -> b -> c -> a"
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = normalize_config(config(vec![(
            "loop",
            Some(ComposedServiceConfig::new("x").dependencies(["loop"])),
        )]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Config: Found cyclic dependency loop -> loop"
        );
    }

    #[test]
    fn test_nonexistent_dependency() {
        let err = normalize_config(config(vec![
            ("web", Some(ComposedServiceConfig::new("web").dependencies(["db"]))),
            ("db", None),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Config: Service 'web': Dependency on nonexistent service 'db'"
        );
    }

    #[test]
    fn test_no_services_after_filtering() {
        let err = normalize_config(config(vec![("web", None)])).unwrap_err();
        assert_eq!(err, ConfigError::NoServices);
    }

    #[test]
    fn test_command_normalization() {
        let normalized = normalize_config(config(vec![
            ("str", Some(ComposedServiceConfig::new("  node   server.js  "))),
            ("argv", Some(ComposedServiceConfig::new(json!(["serve", "--port", 3000])))),
        ]))
        .unwrap();

        assert_eq!(normalized.get("str").unwrap().command, vec!["node", "server.js"]);
        assert_eq!(
            normalized.get("argv").unwrap().command,
            vec!["serve", "--port", "3000"]
        );
    }

    #[test]
    fn test_command_rejections() {
        let err = normalize_config(config(vec![(
            "bad",
            Some(ComposedServiceConfig::new(json!(["serve", true]))),
        )]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Config: Service 'bad': Command contains an element that is not string or number"
        );

        let err = normalize_config(config(vec![(
            "bad",
            Some(ComposedServiceConfig::new(json!({ "bin": "serve" }))),
        )]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Config: Service 'bad': `command` is not a string or an array"
        );

        let err = normalize_config(config(vec![("bad", Some(ComposedServiceConfig::new("   ")))]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid Config: Service 'bad': `command` is empty");
    }

    #[test]
    fn test_env_normalization() {
        let normalized = normalize_config(config(vec![(
            "web",
            Some(
                ComposedServiceConfig::new("web")
                    .env("PORT", 8080)
                    .env("NODE_ENV", "production")
                    .env("UNSET", Value::Null),
            ),
        )]))
        .unwrap();

        let env = &normalized.get("web").unwrap().env;
        assert_eq!(env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert!(!env.contains_key("UNSET"));

        let err = normalize_config(config(vec![(
            "web",
            Some(ComposedServiceConfig::new("web").env("FLAGS", json!(["a"]))),
        )]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Config: Service 'web': Environment variable 'FLAGS' is not string, number, or undefined"
        );
    }

    #[test]
    fn test_first_error_in_declaration_order() {
        let err = normalize_config(config(vec![
            ("a", Some(ComposedServiceConfig::new("a").dependencies(["b"]))),
            ("b", Some(ComposedServiceConfig::new("b").dependencies(["a"]))),
            ("c", Some(ComposedServiceConfig::new(json!(null)))),
            ("d", Some(ComposedServiceConfig::new("d").dependencies(["nope"]))),
        ]))
        .unwrap_err();
        // Shape errors win over the earlier-declared cycle.
        assert_eq!(
            err.to_string(),
            "Invalid Config: Service 'c': `command` is not a string or an array"
        );
    }

    #[test]
    fn test_ready_timeout_resolution() {
        let mut raw = config(vec![
            ("default", Some(ComposedServiceConfig::new("x"))),
            ("custom", Some(ComposedServiceConfig::new("x").ready_timeout(Duration::from_secs(3)))),
            ("unbounded", Some(ComposedServiceConfig::new("x").ready_timeout(Duration::ZERO))),
            ("tight", Some(ComposedServiceConfig::new("x").ready_timeout(Duration::from_millis(500)))),
            ("tiny", Some(ComposedServiceConfig::new("x").ready_timeout(Duration::from_micros(10)))),
        ]);
        raw.timeouts.ready_secs = 30;

        let normalized = normalize_config(raw).unwrap();
        assert_eq!(normalized.get("default").unwrap().ready_timeout, Some(Duration::from_secs(30)));
        assert_eq!(normalized.get("custom").unwrap().ready_timeout, Some(Duration::from_secs(3)));
        assert_eq!(normalized.get("unbounded").unwrap().ready_timeout, None);
        assert_eq!(normalized.get("tight").unwrap().ready_timeout, Some(Duration::from_millis(500)));
        assert_eq!(normalized.get("tiny").unwrap().ready_timeout, Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let normalized = normalize_config(config(vec![
            ("db", Some(ComposedServiceConfig::new("db"))),
            ("web", Some(ComposedServiceConfig::new("web").dependencies(["db", "db"]))),
        ]))
        .unwrap();
        assert_eq!(normalized.get("web").unwrap().dependencies, vec!["db"]);
    }
}
