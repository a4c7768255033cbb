use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Every key has a default; only malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub sse: SseConfig,
    pub resume: ResumeServiceConfig,
    pub xbackbone: XBackboneConfig,
}

/// Connection manager tuning.
#[derive(Debug, Clone)]
pub struct SseConfig {
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_base: Duration,
    /// Capacity of each session's outbound frame buffer.
    pub buffer_size: usize,
}

/// Reactive Resume API endpoint and default credentials.
#[derive(Debug, Clone)]
pub struct ResumeServiceConfig {
    pub base_url: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub pdf_output_dir: String,
}

#[derive(Debug, Clone)]
pub struct XBackboneConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    /// XBackbone instances are commonly served with self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_millis(10_000),
            max_reconnect_attempts: 5,
            reconnect_delay_base: Duration::from_millis(1_000),
            buffer_size: 64,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = SseConfig::default();

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 3000)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            sse: SseConfig {
                heartbeat_interval: Duration::from_secs(parse_env(
                    "HEARTBEAT_INTERVAL_SECS",
                    defaults.heartbeat_interval.as_secs(),
                )?),
                handshake_timeout: Duration::from_millis(parse_env(
                    "HANDSHAKE_TIMEOUT_MS",
                    10_000u64,
                )?),
                max_reconnect_attempts: parse_env(
                    "MAX_RECONNECT_ATTEMPTS",
                    defaults.max_reconnect_attempts,
                )?,
                reconnect_delay_base: Duration::from_millis(parse_env(
                    "RECONNECT_DELAY_BASE_MS",
                    1_000u64,
                )?),
                buffer_size: parse_env("SSE_BUFFER_SIZE", defaults.buffer_size)?,
            },
            resume: ResumeServiceConfig {
                base_url: std::env::var("RX_RESUME_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/api".to_string()),
                email: optional_env("RX_RESUME_EMAIL"),
                password: optional_env("RX_RESUME_PASSWORD"),
                pdf_output_dir: std::env::var("PDF_OUTPUT_DIR").unwrap_or_else(|_| ".".to_string()),
            },
            xbackbone: XBackboneConfig {
                url: optional_env("XBACKBONE_URL"),
                token: optional_env("XBACKBONE_TOKEN"),
                accept_invalid_certs: parse_env("XBACKBONE_ACCEPT_INVALID_CERTS", true)?,
            },
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid value, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
