use std::fmt;
use std::time::Duration;

use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "test" => Some(Environment::Test),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    /// Reads `RESTMC_ENV` without logging, for use before tracing is initialised.
    pub fn from_env() -> Self {
        std::env::var("RESTMC_ENV")
            .ok()
            .and_then(|value| Self::parse(&value))
            .unwrap_or(Environment::Development)
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        match self {
            Environment::Development | Environment::Production => "info",
            Environment::Test => "warn",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub http_port: u16,
    /// memcached `host:port` addresses; empty selects the in-process store
    pub servers: Vec<String>,
    pub marshal: bool,
    pub backend_timeout: Duration,
    pub max_entries: Option<u64>,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    const DEFAULT_HOST: &str = "0.0.0.0";
    const DEFAULT_HTTP_PORT: u16 = 8080;
    const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 1000;
    // memcached's default item size limit
    const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("RESTMC_ENV") {
            Some(value) => Environment::parse(&value).unwrap_or_else(|| {
                warn!("Unknown RESTMC_ENV '{}', falling back to development", value);
                Environment::Development
            }),
            None => Environment::Development,
        };

        let http_port = parse_or(&lookup, "RESTMC_HTTP_PORT", Self::DEFAULT_HTTP_PORT);
        let timeout_ms = parse_or(
            &lookup,
            "RESTMC_BACKEND_TIMEOUT_MS",
            Self::DEFAULT_BACKEND_TIMEOUT_MS,
        );

        Self {
            environment,
            host: lookup("RESTMC_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            http_port,
            servers: lookup("RESTMC_SERVERS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            marshal: lookup("RESTMC_MARSHAL")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
            backend_timeout: Duration::from_millis(timeout_ms),
            max_entries: lookup("RESTMC_MAX_ENTRIES").and_then(|v| v.trim().parse().ok()),
            max_body_bytes: parse_or(&lookup, "RESTMC_MAX_BODY_BYTES", Self::DEFAULT_MAX_BODY_BYTES),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn uses_memcached(&self) -> bool {
        !self.servers.is_empty()
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {} '{}', using default {}", name, raw, default);
            default
        }),
        None => default,
    }
}
