//! Server configuration read from the environment.
//!
//! Environment variables:
//!   DATABASE_URL           - PostgreSQL URL (default: "postgres://localhost/kura")
//!   HOST                   - bind address (default: "0.0.0.0")
//!   PORT                   - bind port (default: 3000)
//!   RUN_MIGRATIONS         - apply pending migrations on startup (default: true)
//!   HIERARCHY_MAX_RETRIES  - lock attempts per hierarchy mutation (default: 3)
//!   LOG_FORMAT             - "json" or "text" (default: "text")
//!   LOG_FILE               - path to log file (optional, enables file logging)
//!   LOG_ANSI               - "true"/"false" override ANSI colors (auto-detected by default)
//!
//! Pool sizing (`DB_*`) is read by `kura_db::PoolConfig::from_env`.

use kura_core::defaults::HIERARCHY_MAX_ATTEMPTS;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/kura";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub run_migrations: bool,
    pub hierarchy_max_attempts: u32,
    pub log_format: LogFormat,
    pub log_file: Option<String>,
    pub log_ansi: Option<bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            run_migrations: true,
            hierarchy_max_attempts: HIERARCHY_MAX_ATTEMPTS,
            log_format: LogFormat::Text,
            log_file: None,
            log_ansi: None,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// Called before tracing is initialized, so unparseable values silently
    /// fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            database_url: non_empty("DATABASE_URL").unwrap_or(defaults.database_url),
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            run_migrations: non_empty("RUN_MIGRATIONS")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.run_migrations),
            hierarchy_max_attempts: non_empty("HIERARCHY_MAX_RETRIES")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.hierarchy_max_attempts),
            log_format: match non_empty("LOG_FORMAT").as_deref().map(str::trim) {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            log_file: non_empty("LOG_FILE"),
            log_ansi: non_empty("LOG_ANSI").and_then(|v| parse_bool(&v)),
        }
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert!(config.run_migrations);
        assert_eq!(config.hierarchy_max_attempts, HIERARCHY_MAX_ATTEMPTS);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.log_file.is_none());
        assert!(config.log_ansi.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/kura"),
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RUN_MIGRATIONS", "false"),
            ("HIERARCHY_MAX_RETRIES", "5"),
            ("LOG_FORMAT", "json"),
            ("LOG_FILE", "/var/log/kura/api.log"),
            ("LOG_ANSI", "0"),
        ]));
        assert_eq!(config.database_url, "postgres://db/kura");
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(!config.run_migrations);
        assert_eq!(config.hierarchy_max_attempts, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_file.as_deref(), Some("/var/log/kura/api.log"));
        assert_eq!(config.log_ansi, Some(false));
    }

    #[test]
    fn test_garbage_falls_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "eighty"),
            ("RUN_MIGRATIONS", "maybe"),
            ("HIERARCHY_MAX_RETRIES", "0"),
            ("LOG_FORMAT", "xml"),
            ("HOST", "  "),
        ]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.run_migrations);
        assert_eq!(config.hierarchy_max_attempts, HIERARCHY_MAX_ATTEMPTS);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.host, DEFAULT_HOST);
    }
}
