//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::CompositeServiceConfig;
use crate::config::validation::{normalize_config, ConfigError, NormalizedConfig};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(ConfigError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "IO error: {}", e),
            LoadError::Parse(e) => write!(f, "Parse error: {}", e),
            LoadError::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {}

/// Read a raw configuration from a TOML file.
pub fn read_config(path: &Path) -> Result<CompositeServiceConfig, LoadError> {
    let content = fs::read_to_string(path).map_err(LoadError::Io)?;
    toml::from_str(&content).map_err(LoadError::Parse)
}

/// Load and normalize configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<NormalizedConfig, LoadError> {
    let config = read_config(path)?;
    normalize_config(config).map_err(LoadError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(
            r#"
            print_config = true

            [timeouts]
            stop_secs = 2

            [services.db]
            command = ["postgres", "-p", 5432]
            env = { PGDATA = "/tmp/pg" }
            ready = { kind = "output-line-includes", value = "ready to accept connections" }

            [services.api]
            dependencies = ["db"]
            command = "node api.js"
            env = { PORT = 3000 }
            "#,
        );

        let config = load_config(file.path()).unwrap();
        assert!(config.print_config);
        assert_eq!(config.timeouts.stop_secs, 2);

        let ids: Vec<_> = config.services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["db", "api"]);

        let api = config.get("api").unwrap();
        assert_eq!(api.dependencies, vec!["db"]);
        assert_eq!(api.command, vec!["node", "api.js"]);
        assert_eq!(api.env.get("PORT").map(String::as_str), Some("3000"));
        assert_eq!(config.get("db").unwrap().command, vec!["postgres", "-p", "5432"]);
    }

    #[test]
    fn test_load_reports_invalid_config() {
        let file = write_config(
            r#"
            [services.api]
            dependencies = ["db"]
            command = "node api.js"
            "#,
        );

        match load_config(file.path()) {
            Err(LoadError::Invalid(ConfigError::Service { service, message })) => {
                assert_eq!(service, "api");
                assert_eq!(message, "Dependency on nonexistent service 'db'");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/nonexistent/composite.toml"));
        assert!(matches!(result, Err(LoadError::Io(_))));
    }

    #[test]
    fn test_load_parse_error() {
        let file = write_config("[services\n");
        assert!(matches!(load_config(file.path()), Err(LoadError::Parse(_))));
    }
}
