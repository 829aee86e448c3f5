use crate::commerce::{
    AdjustmentInput, CommerceApi, CommerceError, DraftOrderInput, TaggedAdjustment, TaggedOrder,
};
use crate::models::{AppliedItem, CatalogItem};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

/// Admin GraphQL client bound to one shop and one access token.
pub struct ShopifyClient {
    http: Client,
    endpoint: String,
    access_token: String,
    pub(super) location: OnceCell<String>,
    pub(super) ledger_ready: OnceCell<()>,
}

impl ShopifyClient {
    pub fn new(http: Client, shop_domain: &str, api_version: &str, access_token: &str) -> Self {
        Self::at_endpoint(
            http,
            format!("https://{shop_domain}/admin/api/{api_version}/graphql.json"),
            access_token,
        )
    }

    pub(super) fn at_endpoint(http: Client, endpoint: String, access_token: &str) -> Self {
        Self {
            http,
            endpoint,
            access_token: access_token.to_string(),
            location: OnceCell::new(),
            ledger_ready: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs one GraphQL document and returns its `data` member.
    pub(super) async fn execute(&self, query: &str, variables: Value) -> Result<Value, CommerceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Shopify-Access-Token", &self.access_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|err| CommerceError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|err| CommerceError::Unavailable(format!("unreadable response: {err}")))?;
        if let Some(cost) = body.pointer("/extensions/cost/actualQueryCost") {
            debug!(target = "synthstore.shopify", cost = %cost, "graphql_cost");
        }
        classify_body(body)
    }
}

pub(super) fn classify_status(status: StatusCode, body: &str) -> CommerceError {
    let snippet: String = body.chars().take(200).collect();
    if status.is_server_error()
        || matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        )
    {
        CommerceError::Unavailable(format!("HTTP {status}"))
    } else if status == StatusCode::NOT_FOUND {
        CommerceError::Unavailable(format!("HTTP {status}: shop not found"))
    } else {
        CommerceError::Rejected(format!("HTTP {status}: {snippet}"))
    }
}

pub(super) fn classify_body(mut body: Value) -> Result<Value, CommerceError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let throttled = errors
            .iter()
            .any(|err| err.pointer("/extensions/code").and_then(Value::as_str) == Some("THROTTLED"));
        let message = errors
            .iter()
            .map(|err| err.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(if throttled {
            CommerceError::Unavailable(format!("throttled: {message}"))
        } else {
            CommerceError::Rejected(format!("GraphQL error: {message}"))
        });
    }
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(CommerceError::Unavailable("response carried no data".into())),
    }
}

/// Fails with the mutation's `userErrors`, if any.
pub(super) fn user_errors(data: &Value, mutation: &str) -> Result<(), CommerceError> {
    let errors = data
        .get(mutation)
        .and_then(|payload| payload.get("userErrors"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if errors.is_empty() {
        return Ok(());
    }
    let message = errors
        .iter()
        .map(|err| {
            let text = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
            match err.get("field").and_then(Value::as_array) {
                Some(field) if !field.is_empty() => {
                    let path: Vec<_> = field.iter().filter_map(Value::as_str).collect();
                    format!("{}: {text}", path.join("."))
                }
                _ => text.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    let lowered = message.to_lowercase();
    if ["does not exist", "not found", "could not be found"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        Err(CommerceError::NotFound(message))
    } else {
        Err(CommerceError::Rejected(message))
    }
}

#[async_trait]
impl CommerceApi for ShopifyClient {
    async fn fetch_catalog(&self, limit: usize) -> Result<Vec<CatalogItem>, CommerceError> {
        super::catalog::fetch_catalog(self, limit).await
    }

    async fn create_order(&self, input: &DraftOrderInput) -> Result<AppliedItem, CommerceError> {
        super::orders::create_order(self, input).await
    }

    async fn adjust_inventory(
        &self,
        input: &AdjustmentInput,
    ) -> Result<AppliedItem, CommerceError> {
        super::inventory::adjust_inventory(self, input).await
    }

    async fn tagged_orders(&self, marker_tag: &str) -> Result<Vec<TaggedOrder>, CommerceError> {
        super::orders::tagged_orders(self, marker_tag).await
    }

    async fn delete_order(&self, order: &TaggedOrder) -> Result<AppliedItem, CommerceError> {
        super::orders::delete_order(self, order).await
    }

    async fn tagged_adjustments(
        &self,
        marker_tag: &str,
    ) -> Result<Vec<TaggedAdjustment>, CommerceError> {
        super::inventory::tagged_adjustments(self, marker_tag).await
    }

    async fn revert_adjustment(
        &self,
        adjustment: &TaggedAdjustment,
    ) -> Result<AppliedItem, CommerceError> {
        super::inventory::revert_adjustment(self, adjustment).await
    }
}
