//! In-memory doubles for the store and the model, shared by unit tests.

use crate::commerce::{
    AdjustmentInput, CommerceApi, CommerceError, DraftOrderInput, StoreConnector,
    TaggedAdjustment, TaggedOrder,
};
use crate::llm::{LlmError, LlmMessage, TextModel};
use crate::models::{
    AdjustmentReason, AppliedItem, CatalogItem, InventoryAdjustment, LineItem, OrderDraft,
    ShippingAddress,
};
use crate::pipeline::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
}

pub fn catalog_of(n: usize) -> Vec<CatalogItem> {
    (1..=n)
        .map(|i| CatalogItem {
            product_id: format!("gid://shopify/Product/{i}"),
            variant_id: format!("gid://shopify/ProductVariant/{}", 1000 + i),
            price: 10.0 + i as f64,
            sku: Some(format!("SKU-{i}")),
            title: format!("Product {i}"),
        })
        .collect()
}

pub fn sample_order(variant_id: &str, quantity: u32) -> OrderDraft {
    OrderDraft {
        email: "jane.doe@example.com".into(),
        line_items: vec![LineItem {
            variant_id: variant_id.into(),
            quantity,
            taxable: true,
        }],
        shipping_address: ShippingAddress {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            address1: "12 Market St".into(),
            address2: None,
            city: "Portland".into(),
            province_code: Some("OR".into()),
            country_code: "US".into(),
            zip: "97205".into(),
            phone: None,
        },
        note: None,
        created_at: test_now() - Duration::days(2),
        tags: Vec::new(),
        custom_attributes: Vec::new(),
    }
}

pub fn sample_adjustment(variant_id: &str, delta: i32) -> InventoryAdjustment {
    InventoryAdjustment {
        variant_id: variant_id.into(),
        product_id: "gid://shopify/Product/1".into(),
        adjustment: delta,
        reason: AdjustmentReason::Recount,
        timestamp: test_now(),
    }
}

/// `n` well-formed orders spread evenly across the `days` before `test_now`.
pub fn orders_json(catalog: &[CatalogItem], n: usize, days: u32) -> String {
    orders_json_at(test_now(), catalog, n, days)
}

pub fn orders_json_at(now: DateTime<Utc>, catalog: &[CatalogItem], n: usize, days: u32) -> String {
    let window_minutes = i64::from(days) * 24 * 60;
    let orders: Vec<_> = (0..n)
        .map(|i| {
            let lines: Vec<_> = (0..1 + i % 3)
                .map(|j| {
                    json!({
                        "variantId": catalog[(i + j) % catalog.len()].variant_id,
                        "quantity": 1 + (i + j) % 5,
                    })
                })
                .collect();
            let offset = window_minutes * (i as i64 + 1) / (n as i64 + 1);
            json!({
                "email": format!("customer{i}@example.com"),
                "lineItems": lines,
                "shippingAddress": {
                    "firstName": "Alex",
                    "lastName": format!("Rivera{i}"),
                    "address1": format!("{} Oak Ave", 100 + i),
                    "city": "Denver",
                    "provinceCode": "CO",
                    "countryCode": "US",
                    "zip": "80202"
                },
                "createdAt": (now - Duration::minutes(offset)).to_rfc3339(),
            })
        })
        .collect();
    json!({ "orders": orders }).to_string()
}

pub fn adjustments_json(catalog: &[CatalogItem], n: usize) -> String {
    const DELTAS: [i32; 6] = [3, -2, 5, 10, -5, 1];
    const REASONS: [&str; 4] = ["recount", "received", "damaged", "sold"];
    let adjustments: Vec<_> = (0..n)
        .map(|i| {
            let item = &catalog[i % catalog.len()];
            json!({
                "variant_id": item.variant_id,
                "product_id": item.product_id,
                "adjustment": DELTAS[i % DELTAS.len()],
                "reason": REASONS[i % REASONS.len()],
                "timestamp": (test_now() - Duration::hours(i as i64 + 1)).to_rfc3339(),
            })
        })
        .collect();
    json!({ "adjustments": adjustments }).to_string()
}

struct StoredOrder {
    id: String,
    name: String,
    input: DraftOrderInput,
}

struct LedgerEntry {
    marker: String,
    adjustment: TaggedAdjustment,
}

#[derive(Default)]
struct FakeState {
    catalog: Vec<CatalogItem>,
    unreachable: bool,
    rejected_variants: HashSet<String>,
    removed_variants: HashSet<String>,
    revert_failure: Option<CommerceError>,
    listing_refusal: Option<String>,
    orders: Vec<StoredOrder>,
    ledger: Vec<LedgerEntry>,
    levels: HashMap<String, i32>,
    next_id: u64,
}

/// In-memory store. Tag search matches prefixes, like a search index would.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn with_catalog(catalog: Vec<CatalogItem>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                catalog,
                ..FakeState::default()
            }),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn replace_catalog(&self, catalog: Vec<CatalogItem>) {
        self.state.lock().unwrap().catalog = catalog;
    }

    pub fn reject_variant(&self, variant_id: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_variants
            .insert(variant_id.to_string());
    }

    /// Deletes the variant and its stock, leaving any ledger entries behind.
    pub fn remove_variant(&self, variant_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.catalog.retain(|item| item.variant_id != variant_id);
        state.levels.remove(variant_id);
        state.removed_variants.insert(variant_id.to_string());
    }

    /// Marked-entity listings are refused, as with a missing access scope.
    pub fn refuse_listing(&self, message: &str) {
        self.state.lock().unwrap().listing_refusal = Some(message.to_string());
    }

    /// Every later `revert_adjustment` fails with `err` and changes nothing.
    pub fn fail_reverts_with(&self, err: CommerceError) {
        self.state.lock().unwrap().revert_failure = Some(err);
    }

    pub fn created_orders(&self) -> Vec<DraftOrderInput> {
        self.state
            .lock()
            .unwrap()
            .orders
            .iter()
            .map(|order| order.input.clone())
            .collect()
    }

    pub fn level(&self, variant_id: &str) -> i32 {
        self.state
            .lock()
            .unwrap()
            .levels
            .get(variant_id)
            .copied()
            .unwrap_or_default()
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, FakeState>, CommerceError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(CommerceError::Unavailable("connection refused".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl CommerceApi for FakeStore {
    async fn fetch_catalog(&self, limit: usize) -> Result<Vec<CatalogItem>, CommerceError> {
        let state = self.guard()?;
        Ok(state.catalog.iter().take(limit).cloned().collect())
    }

    async fn create_order(&self, input: &DraftOrderInput) -> Result<AppliedItem, CommerceError> {
        let mut state = self.guard()?;
        if let Some(line) = input
            .line_items
            .iter()
            .find(|line| state.rejected_variants.contains(&line.variant_id))
        {
            return Err(CommerceError::Rejected(format!(
                "Variant {} is not available for sale",
                line.variant_id
            )));
        }
        state.next_id += 1;
        let id = format!("gid://shopify/Order/{}", state.next_id);
        let name = format!("#{}", 1000 + state.next_id);
        state.orders.push(StoredOrder {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        });
        Ok(AppliedItem::new(id)
            .with("name", name)
            .with("email", input.email.clone())
            .with("items", input.line_items.len()))
    }

    async fn adjust_inventory(
        &self,
        input: &AdjustmentInput,
    ) -> Result<AppliedItem, CommerceError> {
        let mut state = self.guard()?;
        if state.removed_variants.contains(&input.variant_id) {
            return Err(CommerceError::NotFound(format!(
                "no inventory item found for variant {}",
                input.variant_id
            )));
        }
        if state.rejected_variants.contains(&input.variant_id) {
            return Err(CommerceError::Rejected(format!(
                "Variant {} is not stocked at this location",
                input.variant_id
            )));
        }
        state.next_id += 1;
        let id = format!("gid://shopify/Metaobject/{}", state.next_id);
        *state.levels.entry(input.variant_id.clone()).or_default() += input.delta;
        state.ledger.push(LedgerEntry {
            marker: input.marker_tag.clone(),
            adjustment: TaggedAdjustment {
                id: id.clone(),
                marker_tag: input.marker_tag.clone(),
                variant_id: input.variant_id.clone(),
                product_id: input.product_id.clone(),
                inventory_item_id: Some(input.variant_id.replace("ProductVariant", "InventoryItem")),
                location_id: Some("gid://shopify/Location/1".into()),
                delta: input.delta,
                reason: input.reason,
            },
        });
        Ok(AppliedItem::new(id)
            .with("variant_id", input.variant_id.clone())
            .with("adjustment", input.delta))
    }

    async fn tagged_orders(&self, marker_tag: &str) -> Result<Vec<TaggedOrder>, CommerceError> {
        let state = self.guard()?;
        if let Some(message) = &state.listing_refusal {
            return Err(CommerceError::Rejected(message.clone()));
        }
        Ok(state
            .orders
            .iter()
            .filter(|order| order.input.tags.iter().any(|tag| tag.starts_with(marker_tag)))
            .map(|order| TaggedOrder {
                id: order.id.clone(),
                name: order.name.clone(),
                tags: order.input.tags.clone(),
            })
            .collect())
    }

    async fn delete_order(&self, order: &TaggedOrder) -> Result<AppliedItem, CommerceError> {
        let mut state = self.guard()?;
        let Some(pos) = state.orders.iter().position(|stored| stored.id == order.id) else {
            return Err(CommerceError::NotFound(order.id.clone()));
        };
        let removed = state.orders.remove(pos);
        Ok(AppliedItem::new(removed.id).with("name", removed.name))
    }

    async fn tagged_adjustments(
        &self,
        marker_tag: &str,
    ) -> Result<Vec<TaggedAdjustment>, CommerceError> {
        let state = self.guard()?;
        if let Some(message) = &state.listing_refusal {
            return Err(CommerceError::Rejected(message.clone()));
        }
        Ok(state
            .ledger
            .iter()
            .filter(|entry| entry.marker == marker_tag)
            .map(|entry| entry.adjustment.clone())
            .collect())
    }

    async fn revert_adjustment(
        &self,
        adjustment: &TaggedAdjustment,
    ) -> Result<AppliedItem, CommerceError> {
        let mut state = self.guard()?;
        if let Some(err) = &state.revert_failure {
            return Err(err.clone());
        }
        let Some(pos) = state
            .ledger
            .iter()
            .position(|entry| entry.adjustment.id == adjustment.id)
        else {
            return Ok(AppliedItem::new(adjustment.id.clone()).with("already_removed", true));
        };
        let entry = state.ledger.remove(pos);
        if state.removed_variants.contains(&entry.adjustment.variant_id) {
            return Ok(AppliedItem::new(entry.adjustment.id).with("already_removed", true));
        }
        *state
            .levels
            .entry(entry.adjustment.variant_id.clone())
            .or_default() -= entry.adjustment.delta;
        Ok(AppliedItem::new(entry.adjustment.id)
            .with("variant_id", entry.adjustment.variant_id)
            .with("adjustment", -entry.adjustment.delta))
    }
}

/// Hands out the same `FakeStore` for every shop.
pub struct FakeConnector {
    pub store: Arc<FakeStore>,
}

impl StoreConnector for FakeConnector {
    fn connect(
        &self,
        shop_url: &str,
        access_token: &str,
    ) -> Result<Arc<dyn CommerceApi>, PipelineError> {
        if shop_url.trim().is_empty() || access_token.trim().is_empty() {
            return Err(PipelineError::invalid_input(
                "connect_store",
                "shop_url and access_token are required",
            ));
        }
        Ok(self.store.clone())
    }
}

/// Replays canned responses in order; `Err` entries become model failures.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<Result<String, String>>,
    conversations: Mutex<Vec<Vec<LlmMessage>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: Result<String, String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }

    /// Messages sent on the `call`-th request, zero based.
    pub fn conversation(&self, call: usize) -> Vec<LlmMessage> {
        self.conversations.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, messages: &[LlmMessage]) -> Result<String, LlmError> {
        self.conversations.lock().unwrap().push(messages.to_vec());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Err("script exhausted".into()));
        next.map_err(LlmError::Http)
    }
}
