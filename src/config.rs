//! Configuration management for the auto-sell agent

use anyhow::Result;
use base64::Engine;
use std::env;

/// Agent configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Kraken API key
    pub api_key: String,

    /// Kraken API secret, base-64 decoded at startup
    pub api_secret: Vec<u8>,

    /// The quote asset everything is liquidated into; never sold itself
    pub target_fiat: String,

    /// Use the sandbox REST/WebSocket endpoints
    pub sandbox: bool,

    /// Bind port for the status surface
    pub http_port: u16,

    /// Verbose tracing
    pub debug: bool,

    /// Optional external sink for structured engine events
    pub log_sink_url: Option<String>,
    pub log_sink_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let api_key = env::var("KRAKEN_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("KRAKEN_API_KEY is required"))?;

        let raw_secret = env::var("KRAKEN_API_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("KRAKEN_API_SECRET is required"))?;

        // A secret that does not decode can never sign a request; fail now,
        // not on the first private call.
        let api_secret = base64::engine::general_purpose::STANDARD
            .decode(raw_secret.trim())
            .map_err(|e| anyhow::anyhow!("KRAKEN_API_SECRET is not valid base64: {}", e))?;

        let target_fiat = env::var("TARGET_FIAT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "USD".to_string())
            .to_uppercase();

        let sandbox = env::var("KRAKEN_SANDBOX")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let http_port = env::var("HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let debug = env::var("DEBUG")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let log_sink_url = env::var("LOG_SINK_URL").ok().filter(|s| !s.is_empty());
        let log_sink_token = env::var("LOG_SINK_TOKEN").ok().filter(|s| !s.is_empty());

        Ok(Self {
            api_key,
            api_secret,
            target_fiat,
            sandbox,
            http_port,
            debug,
            log_sink_url,
            log_sink_token,
        })
    }

    /// REST API base URL
    pub fn rest_base(&self) -> &'static str {
        if self.sandbox {
            "https://api.beta.kraken.com"
        } else {
            "https://api.kraken.com"
        }
    }

    /// Streaming API URL (authenticated channels)
    pub fn ws_url(&self) -> &'static str {
        if self.sandbox {
            "wss://ws-auth.beta.kraken.com/v2"
        } else {
            "wss://ws-auth.kraken.com/v2"
        }
    }
}
