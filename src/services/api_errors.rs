//! Exchange API error differentiation
//!
//! Kraken reports failures as an `error` array of prefixed strings
//! (`EAPI:Invalid key`, `EOrder:Insufficient funds`, ...). This module maps
//! those strings plus transport-level failures into structured types so the
//! retry wrapper and the engine can tell transient from terminal.

use serde::Serialize;
use std::fmt;

/// Structured exchange API error types
#[derive(Debug, Clone, Serialize)]
pub enum ApiError {
    /// API key or signature rejected. Never retried.
    Authentication(String),
    /// Nonce arrived out of order at the exchange. Retryable race.
    InvalidNonce,
    /// Not enough balance for the requested volume
    InsufficientFunds,
    /// No such tradable pair
    UnknownPair,
    /// The exchange does not know the referenced order/trade
    UnknownOrder,
    /// Request was malformed (bad volume string, missing argument, ...)
    InvalidArguments(String),
    /// Exchange-side overload or maintenance (HTTP 5xx, EService:*)
    ServiceUnavailable(String),
    /// Transport reset/timeout/refusal before the request reached the wire
    Network(String),
    /// An order submission whose transport failed after the request may have
    /// been written. Outcome unknown; must be reconciled, never retried.
    AmbiguousSubmission,
    /// Anything the classifier does not recognize
    Unknown(String),
}

impl ApiError {
    /// Classify a Kraken `error` array entry
    pub fn from_exchange(message: &str) -> Self {
        let msg = message.trim();
        let lower = msg.to_lowercase();

        if lower.contains("invalid nonce") {
            return ApiError::InvalidNonce;
        }
        if lower.contains("rate limit") || lower.contains("too many requests") {
            return ApiError::ServiceUnavailable(msg.to_string());
        }
        if msg.starts_with("EAPI:")
            || lower.contains("invalid key")
            || lower.contains("invalid signature")
            || lower.contains("permission denied")
        {
            return ApiError::Authentication(msg.to_string());
        }
        if lower.contains("insufficient funds") || lower.contains("insufficient initial margin") {
            return ApiError::InsufficientFunds;
        }
        if lower.contains("unknown asset pair") || lower.contains("unknown pair") {
            return ApiError::UnknownPair;
        }
        if lower.contains("unknown order") || lower.contains("invalid order") && lower.contains("unknown") {
            return ApiError::UnknownOrder;
        }
        if msg.starts_with("EGeneral:Invalid arguments") || lower.contains("invalid arguments") {
            return ApiError::InvalidArguments(msg.to_string());
        }
        if msg.starts_with("EService:") || lower.contains("unavailable") || lower.contains("busy") {
            return ApiError::ServiceUnavailable(msg.to_string());
        }
        if msg.starts_with("EOrder:") {
            // Remaining order-class errors (minimum not met etc.) are terminal
            return ApiError::InvalidArguments(msg.to_string());
        }

        ApiError::Unknown(msg.to_string())
    }

    /// Classify an HTTP status with no parseable exchange error body
    pub fn from_status(status: u16, body: &str) -> Self {
        if status >= 500 {
            ApiError::ServiceUnavailable(format!("HTTP {}: {}", status, body))
        } else if status == 401 || status == 403 {
            ApiError::Authentication(format!("HTTP {}", status))
        } else {
            ApiError::Unknown(format!("HTTP {}: {}", status, body))
        }
    }

    /// Classify a transport error from reqwest
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("connection failed".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// Whether the retry wrapper may re-issue the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidNonce | ApiError::ServiceUnavailable(_) | ApiError::Network(_)
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Authentication(msg) => write!(f, "authentication rejected: {}", msg),
            ApiError::InvalidNonce => write!(f, "invalid nonce"),
            ApiError::InsufficientFunds => write!(f, "insufficient funds"),
            ApiError::UnknownPair => write!(f, "unknown asset pair"),
            ApiError::UnknownOrder => write!(f, "unknown order"),
            ApiError::InvalidArguments(msg) => write!(f, "invalid arguments: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "service unavailable: {}", msg),
            ApiError::Network(msg) => write!(f, "network error: {}", msg),
            ApiError::AmbiguousSubmission => {
                write!(f, "order submission outcome unknown (sent, no response)")
            }
            ApiError::Unknown(msg) => write!(f, "exchange error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}
