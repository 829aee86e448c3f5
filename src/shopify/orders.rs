use super::client::{ShopifyClient, user_errors};
use crate::commerce::{CommerceError, DraftOrderInput, TaggedOrder};
use crate::models::AppliedItem;
use serde_json::{Value, json};
use tracing::warn;

const DRAFT_ORDER_CREATE: &str = r#"
mutation DraftOrderCreate($input: DraftOrderInput!) {
  draftOrderCreate(input: $input) {
    draftOrder { id }
    userErrors { field message }
  }
}"#;

const DRAFT_ORDER_COMPLETE: &str = r#"
mutation DraftOrderComplete($id: ID!) {
  draftOrderComplete(id: $id) {
    draftOrder {
      order {
        id
        name
        email
        totalPriceSet { shopMoney { amount currencyCode } }
        displayFinancialStatus
        displayFulfillmentStatus
      }
    }
    userErrors { field message }
  }
}"#;

const DRAFT_ORDER_DELETE: &str = r#"
mutation DraftOrderDelete($input: DraftOrderDeleteInput!) {
  draftOrderDelete(input: $input) {
    deletedId
    userErrors { field message }
  }
}"#;

const TAGGED_ORDERS: &str = r#"
query TaggedOrders($query: String!, $after: String) {
  orders(first: 100, after: $after, query: $query) {
    edges { node { id name tags } }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const ORDER_DELETE: &str = r#"
mutation OrderDelete($orderId: ID!) {
  orderDelete(orderId: $orderId) {
    deletedOrderId
    userErrors { field message }
  }
}"#;

const MAX_PAGES: usize = 50;

/// Creates a draft carrying the marker, then completes it into an order. A
/// draft that cannot be completed is removed again.
pub(super) async fn create_order(
    client: &ShopifyClient,
    input: &DraftOrderInput,
) -> Result<AppliedItem, CommerceError> {
    let data = client
        .execute(DRAFT_ORDER_CREATE, json!({ "input": input }))
        .await?;
    user_errors(&data, "draftOrderCreate")?;
    let draft_id = data
        .pointer("/draftOrderCreate/draftOrder/id")
        .and_then(Value::as_str)
        .ok_or_else(|| CommerceError::Rejected("draft order was not created".into()))?
        .to_string();

    match complete_draft(client, &draft_id).await {
        Ok(order) => Ok(applied_order(&order, input.line_items.len())),
        Err(err) => {
            if let Err(cleanup) = client
                .execute(DRAFT_ORDER_DELETE, json!({ "input": { "id": draft_id } }))
                .await
                .and_then(|data| user_errors(&data, "draftOrderDelete"))
            {
                warn!(
                    target = "synthstore.shopify",
                    draft_id = %draft_id,
                    error = %cleanup,
                    "draft_cleanup_failed"
                );
            }
            Err(match err {
                CommerceError::Unavailable(message) => {
                    CommerceError::Unavailable(format!("Failed to complete draft order: {message}"))
                }
                other => CommerceError::Rejected(format!("Failed to complete draft order: {other}")),
            })
        }
    }
}

async fn complete_draft(client: &ShopifyClient, draft_id: &str) -> Result<Value, CommerceError> {
    let mut data = client
        .execute(DRAFT_ORDER_COMPLETE, json!({ "id": draft_id }))
        .await?;
    user_errors(&data, "draftOrderComplete")?;
    match data.pointer_mut("/draftOrderComplete/draftOrder/order").map(Value::take) {
        Some(order) if !order.is_null() => Ok(order),
        _ => Err(CommerceError::Rejected("no order returned".into())),
    }
}

pub(super) fn applied_order(order: &Value, items: usize) -> AppliedItem {
    let text = |pointer: &str| {
        order
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    AppliedItem::new(text("/id"))
        .with("name", text("/name"))
        .with("email", text("/email"))
        .with("total", text("/totalPriceSet/shopMoney/amount"))
        .with(
            "status",
            json!({
                "financial": text("/displayFinancialStatus"),
                "fulfillment": text("/displayFulfillmentStatus"),
            }),
        )
        .with("items", items)
}

pub(super) async fn tagged_orders(
    client: &ShopifyClient,
    marker_tag: &str,
) -> Result<Vec<TaggedOrder>, CommerceError> {
    let query = format!("tag:{marker_tag}");
    let mut orders = Vec::new();
    let mut after: Option<String> = None;
    for _ in 0..MAX_PAGES {
        let data = client
            .execute(TAGGED_ORDERS, json!({ "query": query, "after": after }))
            .await?;
        let (page, next) = parse_orders_page(&data);
        orders.extend(page);
        match next {
            Some(cursor) => after = Some(cursor),
            None => return Ok(orders),
        }
    }
    warn!(target = "synthstore.shopify", pages = MAX_PAGES, "tagged_orders_truncated");
    Ok(orders)
}

pub(super) fn parse_orders_page(data: &Value) -> (Vec<TaggedOrder>, Option<String>) {
    let orders = data
        .pointer("/orders/edges")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|edge| edge.get("node"))
        .filter_map(|node| {
            Some(TaggedOrder {
                id: node.get("id")?.as_str()?.to_string(),
                name: node
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                tags: node
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect();

    let next = match data.pointer("/orders/pageInfo/hasNextPage") {
        Some(Value::Bool(true)) => data
            .pointer("/orders/pageInfo/endCursor")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    (orders, next)
}

pub(super) async fn delete_order(
    client: &ShopifyClient,
    order: &TaggedOrder,
) -> Result<AppliedItem, CommerceError> {
    let data = client
        .execute(ORDER_DELETE, json!({ "orderId": order.id }))
        .await?;
    user_errors(&data, "orderDelete")?;
    Ok(AppliedItem::new(order.id.clone()).with("name", order.name.clone()))
}
