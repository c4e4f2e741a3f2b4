//! Process configuration read from the environment

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tm_core::task::CacheSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("CACHE_BACKEND=redis requires REDIS_URL")]
    MissingRedisUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            _ => Err("expected development, production or test".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    File,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "file" | "json" => Ok(Self::File),
            _ => Err("expected sqlite or file".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
    None,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            "none" | "off" => Ok(Self::None),
            _ => Err("expected redis, memory or none".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub default_ttl: Duration,
    pub stats_ttl: Duration,
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings::new(self.default_ttl, self.stats_ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    /// Zero disables limiting
    pub max_requests: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: StoreBackend,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = parse_var(&get, "APP_ENV", Environment::Development)?;
        let host = parse_var(&get, "HOST", IpAddr::from([0, 0, 0, 0]))?;
        let port = parse_var(&get, "PORT", 3000u16)?;
        let data_dir = get("TASKS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".tasks-data"));
        let store = parse_var(&get, "TASKS_STORE", StoreBackend::Sqlite)?;

        let redis_url = get("REDIS_URL");
        let default_backend = if redis_url.is_some() {
            CacheBackend::Redis
        } else {
            CacheBackend::None
        };
        let backend = parse_var(&get, "CACHE_BACKEND", default_backend)?;
        if backend == CacheBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::MissingRedisUrl);
        }

        let default_ttl = positive_secs(&get, "CACHE_TTL_SECS", 3600)?;
        let stats_ttl = positive_secs(&get, "STATS_CACHE_TTL_SECS", 60)?;

        let window_ms = parse_var(&get, "RATE_LIMIT_WINDOW_MS", 900_000u64)?;
        if window_ms == 0 {
            return Err(invalid("RATE_LIMIT_WINDOW_MS", "0", "must be positive"));
        }
        let max_requests = parse_var(&get, "RATE_LIMIT_MAX_REQUESTS", 100u32)?;

        Ok(Self {
            environment,
            host,
            port,
            data_dir,
            store,
            cache: CacheConfig {
                backend,
                redis_url,
                key_prefix: get("CACHE_KEY_PREFIX").unwrap_or_default(),
                default_ttl,
                stats_ttl: stats_ttl.min(default_ttl),
            },
            rate_limit: RateLimitConfig {
                window: Duration::from_millis(window_ms),
                max_requests,
            },
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether internal error details may be returned to clients
    pub fn exposes_internal_errors(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn positive_secs<G>(get: &G, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_var(get, name, default)?;
    if secs == 0 {
        return Err(invalid(name, "0", "must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.listen_addr(), "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.data_dir, PathBuf::from(".tasks-data"));
        assert_eq!(config.store, StoreBackend::Sqlite);
        assert_eq!(config.cache.backend, CacheBackend::None);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.stats_ttl, Duration::from_secs(60));
        assert_eq!(config.rate_limit.window, Duration::from_millis(900_000));
        assert_eq!(config.rate_limit.max_requests, 100);
        assert!(config.exposes_internal_errors());
    }

    #[test]
    fn test_redis_url_selects_redis_backend() {
        let config = config_from(&[("REDIS_URL", "redis://localhost:6379")]).unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Redis);

        let config = config_from(&[
            ("REDIS_URL", "redis://localhost:6379"),
            ("CACHE_BACKEND", "memory"),
        ])
        .unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Memory);

        assert_eq!(
            config_from(&[("CACHE_BACKEND", "redis")]),
            Err(ConfigError::MissingRedisUrl)
        );
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("APP_ENV", "production"),
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("TASKS_STORE", "file"),
            ("CACHE_TTL_SECS", "30"),
            ("STATS_CACHE_TTL_SECS", "120"),
            ("RATE_LIMIT_MAX_REQUESTS", "0"),
            ("CACHE_KEY_PREFIX", "prod:"),
        ])
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.listen_addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.store, StoreBackend::File);
        assert_eq!(config.cache.stats_ttl, Duration::from_secs(30));
        assert_eq!(config.cache.key_prefix, "prod:");
        assert_eq!(config.rate_limit.max_requests, 0);
        assert!(!config.exposes_internal_errors());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            config_from(&[("APP_ENV", "staging")]),
            Err(ConfigError::Invalid { name: "APP_ENV", .. })
        ));
        assert!(matches!(
            config_from(&[("CACHE_TTL_SECS", "0")]),
            Err(ConfigError::Invalid { name: "CACHE_TTL_SECS", .. })
        ));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "  "), ("REDIS_URL", "")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache.backend, CacheBackend::None);
    }
}
