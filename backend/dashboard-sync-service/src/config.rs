use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Config(format!("unknown LOG_FORMAT: {other}"))),
        }
    }
}

/// WebSocket session tuning
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How often the server pings each client
    pub heartbeat_interval: Duration,
    /// Silence after which a client is considered gone
    pub client_timeout: Duration,
    pub max_frame_bytes: usize,
    /// Queued outbound events per session before deliveries are dropped
    pub mailbox_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub websocket: WebSocketConfig,
    /// Body limit for update intake requests
    pub max_update_bytes: usize,
    /// Empty means any origin
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        F: Fn(&str) -> Option<String>,
    {
        match lookup(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw}"))),
            None => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = Self::parse_var(&lookup, "PORT", 8080u16)?;

        let heartbeat_secs = Self::parse_var(&lookup, "WS_HEARTBEAT_INTERVAL_SECS", 5u64)?;
        let timeout_secs = Self::parse_var(&lookup, "WS_CLIENT_TIMEOUT_SECS", 30u64)?;
        if heartbeat_secs == 0 || timeout_secs <= heartbeat_secs {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must exceed a non-zero WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }
        let max_frame_bytes = Self::parse_var(&lookup, "WS_MAX_FRAME_BYTES", 256 * 1024usize)?;
        let mailbox_capacity = Self::parse_var(&lookup, "WS_MAILBOX_CAPACITY", 256usize)?;
        let max_update_bytes =
            Self::parse_var(&lookup, "UPDATE_MAX_BODY_BYTES", 1024 * 1024usize)?;

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|value| Self::parse_list(&value))
            .unwrap_or_default();

        let log_format = match lookup("LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::Text,
        };

        Ok(Self {
            host,
            port,
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                client_timeout: Duration::from_secs(timeout_secs),
                max_frame_bytes,
                mailbox_capacity,
            },
            max_update_bytes,
            cors_allowed_origins,
            log_format,
        })
    }

    /// Loopback config on an ephemeral port
    pub fn test_defaults() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
                max_frame_bytes: 64 * 1024,
                mailbox_capacity: 64,
            },
            max_update_bytes: 256 * 1024,
            cors_allowed_origins: Vec::new(),
            log_format: LogFormat::Text,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
