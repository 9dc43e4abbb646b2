//! Kraken REST client
//!
//! All authenticated traffic goes through one `KrakenClient`: it owns the
//! nonce sequence, the signing material, the process-wide rate limiter and
//! the retry policy. Operation methods return typed results or `ApiError`.
//!
//! Signing: `API-Sign = base64(HMAC-SHA512(secret, path || SHA256(nonce || body)))`
//! with the secret base-64 decoded once at construction.

use super::api_errors::ApiError;
use super::metrics::Metrics;
use super::rate_limiter::RateLimiter;
use super::retry::{with_retry, RetryConfig};
use crate::config::Config;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type HmacSha512 = Hmac<Sha512>;

/// Kraken wraps every response in `{"error": [...], "result": ...}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

/// One tradable pair from the `AssetPairs` catalog
#[derive(Debug, Clone, Deserialize)]
pub struct PairInfo {
    pub altname: String,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub ordermin: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDescr {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub ordertype: String,
}

/// Order detail as returned by `QueryOrders`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub status: String,
    pub descr: OrderDescr,
    #[serde(default)]
    pub vol: Option<Decimal>,
    #[serde(default)]
    pub vol_exec: Option<Decimal>,
    #[serde(default)]
    pub cost: Option<Decimal>,
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub trades: Vec<String>,
}

/// Trade detail as returned by `QueryTrades`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInfo {
    pub ordertxid: String,
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub price: Decimal,
    pub vol: Decimal,
    pub cost: Decimal,
    pub fee: Decimal,
    pub time: f64,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WsTokenResult {
    token: String,
}

/// Authenticated Kraken REST client
pub struct KrakenClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    secret: Vec<u8>,
    nonce: AtomicU64,
    rate_limiter: RateLimiter,
    retry: RetryConfig,
    metrics: Metrics,
}

impl KrakenClient {
    pub fn new(config: &Config, metrics: Metrics) -> Self {
        Self::with_base_url(config, metrics, config.rest_base().to_string())
    }

    /// Construct against an explicit base URL. Used by tests to point the
    /// client at a mock server.
    pub fn with_base_url(config: &Config, metrics: Metrics, base_url: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .build()
                .expect("failed to create HTTP client"),
            base_url,
            api_key: config.api_key.clone(),
            secret: config.api_secret.clone(),
            nonce: AtomicU64::new(0),
            rate_limiter: RateLimiter::new(),
            retry: RetryConfig::default(),
            metrics,
        }
    }

    /// Full tradable pair catalog, keyed by the exchange's pair name
    pub async fn asset_pairs(&self) -> Result<HashMap<String, PairInfo>, ApiError> {
        with_retry(&self.retry, "AssetPairs", || self.public_get("AssetPairs")).await
    }

    /// Current account balance: native asset code -> amount
    pub async fn balance(&self) -> Result<HashMap<String, Decimal>, ApiError> {
        with_retry(&self.retry, "Balance", || {
            self.private_post::<HashMap<String, Decimal>>("Balance", Vec::new(), false)
        })
        .await
    }

    /// Submit a market sell. Returns the transaction id.
    ///
    /// A transport failure after the request may have reached the wire comes
    /// back as `AmbiguousSubmission`, which the retry wrapper refuses to
    /// re-issue; the engine reconciles those against the next snapshot.
    pub async fn submit_market_sell(
        &self,
        pair: &str,
        volume: Decimal,
    ) -> Result<String, ApiError> {
        let pair = pair.to_string();
        let volume = volume.normalize().to_string();
        let result: AddOrderResult = with_retry(&self.retry, "AddOrder", || {
            let params = vec![
                ("ordertype", "market".to_string()),
                ("type", "sell".to_string()),
                ("pair", pair.clone()),
                ("volume", volume.clone()),
            ];
            self.private_post("AddOrder", params, true)
        })
        .await?;

        result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Unknown("AddOrder returned no txid".to_string()))
    }

    /// Look up orders by transaction id
    pub async fn query_orders(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, OrderInfo>, ApiError> {
        let txid = txids.join(",");
        with_retry(&self.retry, "QueryOrders", || {
            let params = vec![("txid", txid.clone()), ("trades", "true".to_string())];
            self.private_post("QueryOrders", params, false)
        })
        .await
    }

    /// Look up trades (fills) by trade id
    pub async fn query_trades(
        &self,
        txids: &[String],
    ) -> Result<HashMap<String, TradeInfo>, ApiError> {
        let txid = txids.join(",");
        with_retry(&self.retry, "QueryTrades", || {
            let params = vec![("txid", txid.clone())];
            self.private_post("QueryTrades", params, false)
        })
        .await
    }

    /// Short-lived token for the authenticated WebSocket
    pub async fn ws_token(&self) -> Result<String, ApiError> {
        let result: WsTokenResult = with_retry(&self.retry, "GetWebSocketsToken", || {
            self.private_post("GetWebSocketsToken", Vec::new(), false)
        })
        .await?;
        Ok(result.token)
    }

    /// Strictly monotone nonce: microsecond clock, bumped past any value
    /// already handed out. Two calls in the same microsecond still differ.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_micros() as u64;
        let mut prev = self.nonce.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .nonce
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }

    fn sign(&self, path: &str, nonce: u64, body: &str) -> String {
        let mut sha = Sha256::new();
        sha.update(nonce.to_string().as_bytes());
        sha.update(body.as_bytes());
        let digest = sha.finalize();

        let mut mac =
            HmacSha512::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(path.as_bytes());
        mac.update(&digest);

        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    async fn public_get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        if self.rate_limiter.acquire().await {
            self.metrics.inc_api_rate_limited();
        }
        self.metrics.inc_api_calls();

        let url = format!("{}/0/public/{}", self.base_url, endpoint);
        let response = self.http.get(&url).send().await.map_err(|e| {
            self.metrics.inc_api_errors();
            ApiError::from_network_error(&e)
        })?;

        self.decode_envelope(response).await
    }

    /// POST an authenticated request. With `ambiguous_on_send_failure`,
    /// transport failures that may have happened after the request was
    /// written map to `AmbiguousSubmission` instead of a retryable error.
    async fn private_post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
        ambiguous_on_send_failure: bool,
    ) -> Result<T, ApiError> {
        if self.rate_limiter.acquire().await {
            self.metrics.inc_api_rate_limited();
        }
        self.metrics.inc_api_calls();

        let path = format!("/0/private/{}", endpoint);
        let nonce = self.next_nonce();

        let mut body = format!("nonce={}", nonce);
        for (key, value) in &params {
            body.push('&');
            body.push_str(key);
            body.push('=');
            body.push_str(&urlencoding::encode(value));
        }

        let signature = self.sign(&path, nonce, &body);
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} nonce={}", path, nonce);

        let result = self
            .http
            .post(&url)
            .header("API-Key", &self.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.metrics.inc_api_errors();
                // A refused connection never carried the request; anything
                // else may have, and for order submission that distinction
                // is the whole game.
                if ambiguous_on_send_failure && !e.is_connect() {
                    return Err(ApiError::AmbiguousSubmission);
                }
                return Err(ApiError::from_network_error(&e));
            }
        };

        self.decode_envelope(response).await
    }

    async fn decode_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            self.metrics.inc_api_errors();
            ApiError::from_network_error(&e)
        })?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.metrics.inc_api_errors();
                return Err(ApiError::from_status(status.as_u16(), &text));
            }
        };

        if let Some(message) = envelope.error.first() {
            self.metrics.inc_api_errors();
            return Err(ApiError::from_exchange(message));
        }

        envelope
            .result
            .ok_or_else(|| ApiError::Unknown("response carried no result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_client() -> KrakenClient {
        let config = Config {
            api_key: "key".to_string(),
            api_secret: b"super secret signing key".to_vec(),
            target_fiat: "USD".to_string(),
            sandbox: false,
            http_port: 8080,
            debug: false,
            log_sink_url: None,
            log_sink_token: None,
        };
        KrakenClient::with_base_url(&config, Metrics::new(), "http://127.0.0.1:0".to_string())
    }

    #[test]
    fn nonces_strictly_increase() {
        let client = test_client();
        let mut last = 0;
        for _ in 0..1000 {
            let nonce = client.next_nonce();
            assert!(nonce > last);
            last = nonce;
        }
    }

    #[test]
    fn nonces_strictly_increase_across_threads() {
        let client = Arc::new(test_client());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let client = client.clone();
            handles.push(std::thread::spawn(move || {
                (0..500).map(|_| client.next_nonce()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let count = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), count, "duplicate nonce handed out");
    }

    #[test]
    fn signature_is_deterministic() {
        let client = test_client();
        let a = client.sign("/0/private/Balance", 1_700_000_000_000_000, "nonce=1700000000000000");
        let b = client.sign("/0/private/Balance", 1_700_000_000_000_000, "nonce=1700000000000000");
        assert_eq!(a, b);
        // 64-byte HMAC-SHA512 output, base64
        assert_eq!(base64::engine::general_purpose::STANDARD.decode(&a).unwrap().len(), 64);
    }

    #[test]
    fn signature_varies_with_path_and_body() {
        let client = test_client();
        let a = client.sign("/0/private/Balance", 1, "nonce=1");
        let b = client.sign("/0/private/AddOrder", 1, "nonce=1");
        let c = client.sign("/0/private/Balance", 1, "nonce=1&pair=ETHUSD");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn envelope_decodes_error_array() {
        let envelope: Envelope<HashMap<String, Decimal>> =
            serde_json::from_str(r#"{"error":["EAPI:Invalid nonce"]}"#).unwrap();
        assert_eq!(envelope.error, vec!["EAPI:Invalid nonce".to_string()]);
        assert!(envelope.result.is_none());
    }

    #[test]
    fn envelope_decodes_balance_strings() {
        let envelope: Envelope<HashMap<String, Decimal>> = serde_json::from_str(
            r#"{"error":[],"result":{"ZUSD":"100.0000","XETH":"0.5000000000"}}"#,
        )
        .unwrap();
        let result = envelope.result.unwrap();
        assert_eq!(result["XETH"], Decimal::new(5, 1));
    }

    #[test]
    fn pair_info_decodes() {
        let envelope: Envelope<HashMap<String, PairInfo>> = serde_json::from_str(
            r#"{"error":[],"result":{"XETHZUSD":{"altname":"ETHUSD","base":"XETH","quote":"ZUSD","ordermin":"0.01"}}}"#,
        )
        .unwrap();
        let pairs = envelope.result.unwrap();
        let pair = &pairs["XETHZUSD"];
        assert_eq!(pair.altname, "ETHUSD");
        assert_eq!(pair.ordermin, Some(Decimal::new(1, 2)));
    }
}
