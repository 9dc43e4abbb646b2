//! Shared helpers for integration tests
#![allow(dead_code)]

use kraken_autosell::services::exchange::PairInfo;
use kraken_autosell::services::{AssetRegistry, KrakenClient, Metrics};
use kraken_autosell::Config;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::MockServer;

pub fn test_config() -> Config {
    Config {
        api_key: "test-key".to_string(),
        api_secret: b"test signing secret material".to_vec(),
        target_fiat: "USD".to_string(),
        sandbox: false,
        http_port: 0,
        debug: false,
        log_sink_url: None,
        log_sink_token: None,
    }
}

pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn client_for(server: &MockServer) -> Arc<KrakenClient> {
    Arc::new(KrakenClient::with_base_url(
        &test_config(),
        Metrics::new(),
        server.uri(),
    ))
}

/// Registry with the ETH/USD market from the end-to-end scenarios
pub fn test_registry() -> Arc<AssetRegistry> {
    let registry = AssetRegistry::new("USD");
    let mut catalog = HashMap::new();
    catalog.insert(
        "XETHZUSD".to_string(),
        PairInfo {
            altname: "ETHUSD".to_string(),
            base: "XETH".to_string(),
            quote: "ZUSD".to_string(),
            ordermin: Some(dec!(0.01)),
        },
    );
    registry.load(catalog);
    Arc::new(registry)
}
