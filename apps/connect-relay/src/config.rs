use std::env;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Redis,
}

impl StorageBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Some(StorageBackend::Memory),
            "redis" => Some(StorageBackend::Redis),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Redis => "redis",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub backend: StorageBackend,
    pub redis_url: String,
    pub session_ttl_seconds: u64,
    pub mailbox_ttl_seconds: u64,
    pub code_retries: usize,
    pub mailbox_capacity: usize,
    pub max_payload_bytes: usize,
    pub cleanup_interval_seconds: u64,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
}

// Hand-written so the signing secret never ends up in logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("mailbox_ttl_seconds", &self.mailbox_ttl_seconds)
            .field("code_retries", &self.code_retries)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("cleanup_interval_seconds", &self.cleanup_interval_seconds)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_env("CONNECT_RELAY_PORT").unwrap_or(defaults.port),
            backend: env::var("CONNECT_RELAY_BACKEND")
                .ok()
                .and_then(|raw| StorageBackend::parse(&raw))
                .unwrap_or(defaults.backend),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            session_ttl_seconds: parsed_env("SESSION_TTL").unwrap_or(defaults.session_ttl_seconds),
            mailbox_ttl_seconds: parsed_env("MAILBOX_TTL").unwrap_or(defaults.mailbox_ttl_seconds),
            code_retries: parsed_env("CODE_RETRIES")
                .filter(|retries: &usize| *retries > 0)
                .unwrap_or(defaults.code_retries),
            mailbox_capacity: parsed_env("MAILBOX_CAPACITY")
                .filter(|capacity: &usize| *capacity > 0)
                .unwrap_or(defaults.mailbox_capacity),
            max_payload_bytes: parsed_env("MAX_PAYLOAD_BYTES").unwrap_or(defaults.max_payload_bytes),
            cleanup_interval_seconds: parsed_env("CLEANUP_INTERVAL")
                .unwrap_or(defaults.cleanup_interval_seconds),
            jwt_secret: non_empty_env("JWT_SECRET"),
            jwt_issuer: non_empty_env("JWT_ISSUER"),
            jwt_audience: non_empty_env("JWT_AUDIENCE"),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn mailbox_ttl(&self) -> Duration {
        Duration::from_secs(self.mailbox_ttl_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            backend: StorageBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            session_ttl_seconds: 86_400, // 24h
            mailbox_ttl_seconds: 3_600,  // 1h
            code_retries: 16,
            mailbox_capacity: 256,
            max_payload_bytes: 64 * 1024,
            cleanup_interval_seconds: 60,
            jwt_secret: None,
            jwt_issuer: None,
            jwt_audience: None,
        }
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn backend_names() {
        assert_eq!(StorageBackend::parse("Redis"), Some(StorageBackend::Redis));
        assert_eq!(StorageBackend::parse("memory"), Some(StorageBackend::Memory));
        assert_eq!(StorageBackend::parse("sqlite"), None);
    }

    #[test_timeout::timeout]
    fn debug_output_redacts_secret() {
        let config = Config {
            jwt_secret: Some("hunter2".into()),
            ..Config::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test_timeout::timeout]
    fn defaults_match_recommended_ttls() {
        let config = Config::default();
        assert_eq!(config.session_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.mailbox_ttl(), Duration::from_secs(60 * 60));
    }
}
