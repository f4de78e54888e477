//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Hostlink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Interface both listeners bind to. Loopback by default: there is no auth.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "HttpConfig::default")]
    pub http: HttpConfig,

    #[serde(default = "WebSocketConfig::default")]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub ports: PortRetryConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    /// Upper bound on waiting for accept tasks to exit on stop.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Read timeout for HTTP requests and WebSocket handshakes.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            http: HttpConfig::default(),
            websocket: WebSocketConfig::default(),
            ports: PortRetryConfig::default(),
            queue: QueueConfig::default(),
            cors: CorsConfig::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_range_size() -> u16 {
    10
}

/// HTTP request/response listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_http_port")]
    pub base_port: u16,

    /// Number of consecutive ports tried starting at `base_port`.
    #[serde(default = "default_range_size")]
    pub range_size: u16,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_port: default_http_port(),
            range_size: default_range_size(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_http_port() -> u16 {
    8765
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

/// WebSocket push-channel listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ws_port")]
    pub base_port: u16,

    #[serde(default = "default_range_size")]
    pub range_size: u16,

    /// Send a `connection` event right after the handshake.
    #[serde(default = "default_true")]
    pub welcome: bool,

    /// Treat inbound frames that parse as command envelopes as commands and
    /// reply on the same connection.
    #[serde(default = "default_true")]
    pub dispatch_commands: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_port: default_ws_port(),
            range_size: default_range_size(),
            welcome: true,
            dispatch_commands: true,
        }
    }
}

fn default_ws_port() -> u16 {
    8775
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRetryConfig {
    /// Additional full-range scans after the first one fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PortRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// How long a caller waits for the host tick to run its command.
    #[serde(default = "default_queue_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            timeout_ms: default_queue_timeout_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_queue_timeout_ms() -> u64 {
    5_000
}

/// Cross-origin handling for the HTTP listener.
///
/// Preflights are answered without looking at the `Origin` header: the
/// listener trusts anything that can reach the bind address. Set
/// `answer_preflight` to false to refuse browser preflights entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,

    #[serde(default = "default_true")]
    pub answer_preflight: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
            answer_preflight: true,
        }
    }
}

fn default_allow_origin() -> String {
    "*".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_log_format() -> String {
    "plain".to_string()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!(var = var_name, "Config references unset environment variable");
            String::new()
        })
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::HostlinkError::Config(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Validate the config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let gw = &self.gateway;

        if !gw.http.enabled && !gw.websocket.enabled {
            warnings.push("Both HTTP and WebSocket listeners are disabled".to_string());
        }

        for (label, base, range, enabled) in [
            ("http", gw.http.base_port, gw.http.range_size, gw.http.enabled),
            (
                "websocket",
                gw.websocket.base_port,
                gw.websocket.range_size,
                gw.websocket.enabled,
            ),
        ] {
            if !enabled {
                continue;
            }
            if range == 0 {
                errors.push(format!("gateway.{label}.range_size must be at least 1"));
            } else if base != 0 && u32::from(base) + u32::from(range) - 1 > u32::from(u16::MAX) {
                warnings.push(format!(
                    "gateway.{label} port window {base}+{range} extends past 65535 and will be truncated"
                ));
            }
        }

        if gw.http.enabled && gw.websocket.enabled && gw.http.base_port != 0 {
            let http = windows(gw.http.base_port, gw.http.range_size);
            let ws = windows(gw.websocket.base_port, gw.websocket.range_size);
            if http.0 <= ws.1 && ws.0 <= http.1 {
                warnings.push(format!(
                    "HTTP ports {}-{} overlap WebSocket ports {}-{}",
                    http.0, http.1, ws.0, ws.1
                ));
            }
        }

        if gw.queue.capacity == 0 {
            errors.push("gateway.queue.capacity must be at least 1".to_string());
        }
        if gw.queue.timeout_ms == 0 {
            errors.push("gateway.queue.timeout_ms must be greater than 0".to_string());
        }

        if gw.bind != "127.0.0.1" && gw.bind != "localhost" && gw.bind != "::1" {
            warnings.push(format!(
                "gateway.bind is '{}': commands are accepted without authentication",
                gw.bind
            ));
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                errors.push(format!(
                    "logging.format must be 'plain' or 'json', got '{}'",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

fn windows(base: u16, range: u16) -> (u32, u32) {
    let start = u32::from(base);
    (start, start + u32::from(range.max(1)) - 1)
}

/// Resolve the data directory (~/.hostlink).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hostlink")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name is unique to this test
        unsafe { std::env::set_var("TEST_HOSTLINK_BIND", "0.0.0.0") };
        let input = r#"{"bind": "${TEST_HOSTLINK_BIND}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("0.0.0.0"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_HOSTLINK_BIND") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_HOSTLINK_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.gateway.http.base_port, 8765);
        assert_eq!(config.gateway.websocket.base_port, 8775);
        assert_eq!(config.gateway.ports.retry_delay_ms, 5_000);
        assert_eq!(config.gateway.queue.timeout_ms, 5_000);
        assert_eq!(config.gateway.cors.allow_origin, "*");
        let (warnings, errors) = config.validate();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/hostlink/config.json")).unwrap();
        assert_eq!(config.gateway.http.range_size, 10);
    }

    #[test]
    fn test_load_json5_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are allowed
                gateway: {
                    http: { base_port: 9100, range_size: 3 },
                    queue: { timeout_ms: 250 },
                },
                logging: { format: "json" },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway.http.base_port, 9100);
        assert_eq!(config.gateway.http.range_size, 3);
        assert!(config.gateway.http.enabled);
        assert_eq!(config.gateway.queue.timeout_ms, 250);
        assert_eq!(config.gateway.queue.capacity, 1024);
        assert_eq!(config.gateway.websocket.base_port, 8775);
        assert_eq!(config.logging.unwrap().format, "json");
    }

    #[test]
    fn test_load_invalid_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ gateway: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, crate::error::HostlinkError::Config(_)));
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut config = Config::default();
        config.gateway.http.range_size = 0;
        config.gateway.queue.capacity = 0;
        config.gateway.websocket.base_port = 8770;
        config.gateway.bind = "0.0.0.0".into();
        let (warnings, errors) = config.validate();
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(warnings.iter().any(|w| w.contains("without authentication")));
    }

    #[test]
    fn test_validate_overlap() {
        let mut config = Config::default();
        config.gateway.websocket.base_port = 8770;
        let (warnings, _) = config.validate();
        assert!(warnings.iter().any(|w| w.contains("overlap")));
    }
}
