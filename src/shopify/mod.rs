mod catalog;
mod client;
mod inventory;
mod orders;
#[cfg(test)]
mod stub;

use client::ShopifyClient;
use crate::commerce::{CommerceApi, StoreConnector};
use crate::config::HttpConfig;
use crate::http::build_client;
use crate::pipeline::PipelineError;
use reqwest::Client;
use std::sync::Arc;

/// Builds a `ShopifyClient` per request, sharing one connection pool.
pub struct ShopifyConnector {
    http: Client,
    api_version: String,
}

impl ShopifyConnector {
    pub fn new(http: &HttpConfig, api_version: impl Into<String>) -> Self {
        Self {
            http: build_client(http),
            api_version: api_version.into(),
        }
    }
}

impl StoreConnector for ShopifyConnector {
    fn connect(
        &self,
        shop_url: &str,
        access_token: &str,
    ) -> Result<Arc<dyn CommerceApi>, PipelineError> {
        let shop = normalize_shop_domain(shop_url)?;
        if access_token.trim().is_empty() {
            return Err(PipelineError::invalid_input(
                "connect_store",
                "access_token is required",
            ));
        }
        Ok(Arc::new(ShopifyClient::new(
            self.http.clone(),
            &shop,
            &self.api_version,
            access_token.trim(),
        )))
    }
}

/// `https://Demo.myshopify.com/admin` and `demo` both become
/// `demo.myshopify.com`.
pub fn normalize_shop_domain(shop_url: &str) -> Result<String, PipelineError> {
    let trimmed = shop_url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(PipelineError::invalid_input(
            "connect_store",
            format!("invalid shop_url `{shop_url}`"),
        ));
    }
    if host.contains('.') {
        Ok(host)
    } else {
        Ok(format!("{host}.myshopify.com"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shop_urls_normalize_to_a_bare_domain() {
        assert_eq!(
            normalize_shop_domain("https://Demo-Store.myshopify.com/admin").unwrap(),
            "demo-store.myshopify.com"
        );
        assert_eq!(normalize_shop_domain("demo").unwrap(), "demo.myshopify.com");
        assert_eq!(
            normalize_shop_domain(" shop.example.com ").unwrap(),
            "shop.example.com"
        );
        assert!(normalize_shop_domain("").is_err());
        assert!(normalize_shop_domain("bad host!").is_err());
    }

    #[test]
    fn connector_targets_the_admin_graphql_endpoint() {
        let connector = ShopifyConnector::new(&HttpConfig::default(), "2024-10");
        let client = ShopifyClient::new(
            connector.http.clone(),
            &normalize_shop_domain("demo").unwrap(),
            &connector.api_version,
            "shpat_test",
        );
        assert_eq!(
            client.endpoint(),
            "https://demo.myshopify.com/admin/api/2024-10/graphql.json"
        );
        assert!(connector.connect("demo", "  ").is_err());
        assert!(connector.connect("demo", "shpat_test").is_ok());
    }
}
