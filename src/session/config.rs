use serde::Deserialize;
use std::time::Duration;

/// Session configuration
///
/// Endpoint, database path, TLS and discovery flags are handed to the
/// connector unchanged. Pool sizing and timeouts are used by
/// [`SessionPool`](super::pool::SessionPool) and the statement executor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Database endpoint, `host:port`
    pub endpoint: String,

    /// Database path
    pub database: String,

    /// Use TLS for the transport
    pub tls: bool,

    /// Discover cluster nodes from the endpoint
    pub discovery: bool,

    /// Time to wait for a session before giving up
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Per-statement timeout
    #[serde(with = "optional_duration_millis")]
    pub query_timeout: Option<Duration>,

    /// Maximum number of sessions in the pool
    pub max_sessions: usize,

    /// Number of sessions opened up front
    pub min_sessions: usize,

    /// Idle sessions older than this are closed
    #[serde(with = "optional_duration_millis")]
    pub idle_timeout: Option<Duration>,

    /// Sessions older than this are closed
    #[serde(with = "optional_duration_millis")]
    pub max_lifetime: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:2136".to_string(),
            database: "/local".to_string(),
            tls: false,
            discovery: false,
            connect_timeout: Duration::from_secs(30),
            query_timeout: None,
            max_sessions: 10,
            min_sessions: 1,
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl SessionConfig {
    pub fn new(endpoint: &str, database: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    pub fn discovery(mut self, enabled: bool) -> Self {
        self.discovery = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn min_sessions(mut self, min: usize) -> Self {
        self.min_sessions = min;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("endpoint cannot be empty".to_string());
        }

        if !self.database.starts_with('/') {
            return Err(format!("database path '{}' must start with '/'", self.database));
        }

        if self.max_sessions == 0 {
            return Err("max_sessions must be > 0".to_string());
        }

        if self.min_sessions > self.max_sessions {
            return Err("min_sessions cannot exceed max_sessions".to_string());
        }

        if self.query_timeout == Some(Duration::ZERO) {
            return Err("query_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_validate() {
        let config = SessionConfig::new("db.internal:2135", "/prod/orders")
            .tls(true)
            .min_sessions(2)
            .max_sessions(4)
            .query_timeout(Duration::from_secs(5));
        assert!(config.validate().is_ok());
        assert!(config.tls);

        assert!(SessionConfig::default().max_sessions(0).validate().is_err());
        assert!(SessionConfig::default().min_sessions(20).validate().is_err());
        assert!(SessionConfig::new("localhost:2136", "local").validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{ "endpoint": "node-1:2136", "query_timeout": 1500, "max_sessions": 3 }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.endpoint, "node-1:2136");
        assert_eq!(config.database, "/local");
        assert_eq!(config.query_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_sessions, 3);
    }
}
