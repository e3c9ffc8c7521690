//! Client configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`):
//!
//! | Variable | Default |
//! |---|---|
//! | `CONTROL_URL` | `ws://localhost:8080/api/socket` |
//! | `CONTROL_TOKEN` | unset |
//! | `CONTROL_AGENT` | `cluster-control` |
//! | `CONTROL_MAX_RECONNECT_DELAY_MS` | `60000` |
//! | `CONTROL_INITIAL_RECONNECT_DELAY_MS` | `500` |
//! | `CONTROL_CONNECT_TIMEOUT_MS` | `10000` (`0` disables the timeout) |
//! | `CONTROL_LOG_FORMAT` | `text` (`json` for structured output) |

use std::str::FromStr;
use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::ws::ConnectorConfig;

/// Default server endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:8080/api/socket";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Top-level client configuration.
///
/// Loaded once at startup via [`ControlConfig::from_env`].
#[derive(Clone)]
pub struct ControlConfig {
    /// Server WebSocket URL.
    pub url: String,

    /// Access token attached to the handshake, if configured.
    pub token: Option<String>,

    /// Client identifier attached to the handshake.
    pub agent: String,

    /// Upper bound for the reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Delay before the first reconnect attempt.
    pub initial_reconnect_delay: Duration,

    /// Dial plus handshake timeout; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// Log output format for the binary.
    pub log_format: LogFormat,
}

impl std::fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("agent", &self.agent)
            .field("max_reconnect_delay", &self.max_reconnect_delay)
            .field("initial_reconnect_delay", &self.initial_reconnect_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `CONTROL_URL` is not a valid `ws://` or `wss://` URL.
    #[error("invalid CONTROL_URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ControlConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or a numeric value
    /// does not parse. Calls `dotenvy::dotenv().ok()` to optionally load a
    /// `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `CONTROL_URL` is set but is
    /// not a WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("CONTROL_URL").unwrap_or_else(|| DEFAULT_URL.to_string());
        validate_url(&url)?;

        let token = lookup("CONTROL_TOKEN").filter(|t| !t.is_empty());
        let agent = lookup("CONTROL_AGENT").unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

        let max_reconnect_delay =
            Duration::from_millis(parse_var(&lookup, "CONTROL_MAX_RECONNECT_DELAY_MS", 60_000));
        let initial_reconnect_delay =
            Duration::from_millis(parse_var(&lookup, "CONTROL_INITIAL_RECONNECT_DELAY_MS", 500));
        let connect_timeout = match parse_var(&lookup, "CONTROL_CONNECT_TIMEOUT_MS", 10_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let log_format = parse_var(&lookup, "CONTROL_LOG_FORMAT", LogFormat::Text);

        Ok(Self {
            url,
            token,
            agent,
            max_reconnect_delay,
            initial_reconnect_delay,
            connect_timeout,
            log_format,
        })
    }

    /// Returns the connector settings for this configuration.
    #[must_use]
    pub fn connector(&self) -> ConnectorConfig {
        ConnectorConfig {
            agent: self.agent.clone(),
            initial_reconnect_delay: self.initial_reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
            connect_timeout: self.connect_timeout,
            ..ConnectorConfig::new(self.url.clone())
        }
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let uri: Uri = url.parse().map_err(|err| invalid(format!("{err}")))?;
    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        Some(other) => return Err(invalid(format!("unsupported scheme {other}"))),
        None => return Err(invalid("missing scheme".to_string())),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControlConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControlConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let Ok(config) = load(&[]) else {
            panic!("defaults are valid");
        };
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.token, None);
        assert_eq!(config.agent, "cluster-control");
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn log_format_is_case_insensitive_and_falls_back() {
        let Ok(config) = load(&[("CONTROL_LOG_FORMAT", " JSON ")]) else {
            panic!("json format is valid");
        };
        assert_eq!(config.log_format, LogFormat::Json);

        let Ok(config) = load(&[("CONTROL_LOG_FORMAT", "yaml")]) else {
            panic!("unknown formats are not fatal");
        };
        assert_eq!(config.log_format, LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn overrides_and_zero_timeout() {
        let Ok(config) = load(&[
            ("CONTROL_URL", "wss://cluster.example:443/api/socket"),
            ("CONTROL_TOKEN", "secret"),
            ("CONTROL_AGENT", "watcher"),
            ("CONTROL_MAX_RECONNECT_DELAY_MS", "2000"),
            ("CONTROL_CONNECT_TIMEOUT_MS", "0"),
        ]) else {
            panic!("overrides are valid");
        };
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.connect_timeout, None);

        let connector = config.connector();
        assert_eq!(connector.url, "wss://cluster.example:443/api/socket");
        assert_eq!(connector.agent, "watcher");
        assert_eq!(connector.max_reconnect_delay, Duration::from_secs(2));
        assert_eq!(connector.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let Ok(config) = load(&[("CONTROL_INITIAL_RECONNECT_DELAY_MS", "soon")]) else {
            panic!("numeric errors are not fatal");
        };
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(500));
    }

    #[test]
    fn empty_token_counts_as_unset() {
        let Ok(config) = load(&[("CONTROL_TOKEN", "")]) else {
            panic!("empty token is valid");
        };
        assert_eq!(config.token, None);
    }

    #[test]
    fn rejects_non_websocket_urls() {
        for url in ["http://localhost/api/socket", "not a url", "/api/socket"] {
            assert!(
                matches!(load(&[("CONTROL_URL", url)]), Err(ConfigError::InvalidUrl { .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn debug_redacts_token() {
        let Ok(config) = load(&[("CONTROL_TOKEN", "secret")]) else {
            panic!("valid config");
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
