//! Environment-driven configuration: `std::env::var`, sane defaults, no
//! config-file framework.

use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9000;
const DEFAULT_PULSE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_PULSE_LIMIT: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SERVICE_NAME: &str = "conduit";

/// Which `Transport` backend to use. Selected at process start, never
/// negotiated on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    WebSocket,
}

impl TransportKind {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => TransportKind::WebSocket,
            _ => TransportKind::Stream,
        }
    }
}

/// Process configuration, read once at startup from the `CONDUIT_*`
/// environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub pulse_interval: Duration,
    pub pulse_limit: u32,
    pub request_timeout: Duration,
    pub service_name: String,
}

impl Config {
    /// Build a `Config` from the environment, falling back to defaults for
    /// any variable that is unset or fails to parse.
    pub fn from_env() -> Self {
        Self {
            transport: env_var("CONDUIT_TRANSPORT")
                .map(|v| TransportKind::parse(&v))
                .unwrap_or(TransportKind::Stream),
            host: env_var("CONDUIT_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: env_parsed("CONDUIT_PORT").unwrap_or(DEFAULT_PORT),
            pulse_interval: Duration::from_millis(
                env_parsed("CONDUIT_PULSE_INTERVAL_MS").unwrap_or(DEFAULT_PULSE_INTERVAL_MS),
            ),
            pulse_limit: env_parsed("CONDUIT_PULSE_LIMIT").unwrap_or(DEFAULT_PULSE_LIMIT),
            request_timeout: Duration::from_millis(
                env_parsed("CONDUIT_REQUEST_TIMEOUT_MS").unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            service_name: env_var("CONDUIT_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stream,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            pulse_interval: Duration::from_millis(DEFAULT_PULSE_INTERVAL_MS),
            pulse_limit: DEFAULT_PULSE_LIMIT,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_parses_case_insensitively() {
        assert_eq!(TransportKind::parse("WebSocket"), TransportKind::WebSocket);
        assert_eq!(TransportKind::parse("stream"), TransportKind::Stream);
        assert_eq!(TransportKind::parse("garbage"), TransportKind::Stream);
    }

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.pulse_limit, DEFAULT_PULSE_LIMIT);
    }
}
