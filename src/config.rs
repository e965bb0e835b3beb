//!
//! Runtime configuration for the server, assembled from CLI flags and
//! environment variables by [`crate::cli`].

use std::path::PathBuf;
use std::time::Duration;

use crate::diagnostics::DEFAULT_ERROR_LOG_PATH;
use crate::knowledge::DEFAULT_API_HOST;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEVELOPMENT_ENVIRONMENT: &str = "development";
const DEFAULT_LOG_DIRECTIVE: &str = "fondu_mcp=info";
const DEVELOPMENT_LOG_DIRECTIVE: &str = "fondu_mcp=debug";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Interface the HTTP transport binds to.
    pub host: String,
    /// Port the HTTP transport binds to.
    pub port: u16,
    /// Base URL of the knowledge search API.
    pub api_host: String,
    /// Deployment environment name. `development` enables debug logging.
    pub environment: String,
    /// Universal resolver base URL for DID methods other than `did:key`.
    pub did_resolver_url: Option<String>,
    /// Lifetime of DID challenges. `None` keeps them for the process lifetime.
    pub session_ttl_secs: Option<u64>,
    /// Append-only log of failed outbound calls.
    pub error_log: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_host: DEFAULT_API_HOST.to_string(),
            environment: "production".to_string(),
            did_resolver_url: None,
            session_ttl_secs: None,
            error_log: PathBuf::from(DEFAULT_ERROR_LOG_PATH),
        }
    }
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case(DEVELOPMENT_ENVIRONMENT)
    }

    /// Host and port for the listener. Host names are resolved at bind time.
    pub fn bind_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    /// Default `tracing` filter directive; `RUST_LOG` still takes precedence.
    pub fn log_directive(&self) -> &'static str {
        if self.is_development() {
            DEVELOPMENT_LOG_DIRECTIVE
        } else {
            DEFAULT_LOG_DIRECTIVE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_host, "https://api.youfondu.com");
        assert_eq!(config.error_log, PathBuf::from("/tmp/error_log.txt"));
        assert!(!config.is_development());
        assert_eq!(config.session_ttl(), None);
        assert_eq!(config.bind_addr(), ("0.0.0.0", 8080));
    }

    #[test]
    fn test_development_raises_log_level() {
        let config = ServerConfig {
            environment: "Development".to_string(),
            ..Default::default()
        };
        assert!(config.is_development());
        assert_eq!(config.log_directive(), "fondu_mcp=debug");
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let config = ServerConfig {
            session_ttl_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(config.session_ttl(), None);

        let config = ServerConfig {
            session_ttl_secs: Some(90),
            ..Default::default()
        };
        assert_eq!(config.session_ttl(), Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn test_host_names_are_accepted() {
        let config = ServerConfig {
            host: "localhost".to_string(),
            port: 0,
            ..Default::default()
        };
        let listener = tokio::net::TcpListener::bind(config.bind_addr()).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }
}
