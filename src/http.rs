use crate::config::HttpConfig;
use reqwest::Client;
use std::time::Duration;

/// Timeouts surface to callers as `reqwest` errors, which both store and model
/// clients classify as "unavailable".
pub fn build_client(config: &HttpConfig) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(concat!("synthstore-api-rs/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
