use super::client::{ShopifyClient, user_errors};
use crate::commerce::{AdjustmentInput, CommerceError, TaggedAdjustment};
use crate::models::{AdjustmentReason, AppliedItem};
use chrono::SecondsFormat;
use serde_json::{Value, json};
use tracing::{info, warn};

/// Metaobject type holding one entry per marked inventory adjustment.
const LEDGER_TYPE: &str = "synthetic_inventory_adjustment";

const LEDGER_DEFINITION: &str = r#"
query LedgerDefinition($type: String!) {
  metaobjectDefinitionByType(type: $type) { id }
}"#;

const LEDGER_DEFINITION_CREATE: &str = r#"
mutation LedgerDefinitionCreate($definition: MetaobjectDefinitionCreateInput!) {
  metaobjectDefinitionCreate(definition: $definition) {
    metaobjectDefinition { id }
    userErrors { field message code }
  }
}"#;

const FIRST_LOCATION: &str = r#"
query FirstLocation {
  locations(first: 1) { edges { node { id } } }
}"#;

const VARIANT_INVENTORY_ITEM: &str = r#"
query VariantInventoryItem($id: ID!) {
  productVariant(id: $id) { inventoryItem { id } }
}"#;

const ADJUST_AND_RECORD: &str = r#"
mutation AdjustAndRecord($adjust: InventoryAdjustQuantitiesInput!, $entry: MetaobjectCreateInput!) {
  inventoryAdjustQuantities(input: $adjust) {
    inventoryAdjustmentGroup { id reason referenceDocumentUri }
    userErrors { field message }
  }
  metaobjectCreate(metaobject: $entry) {
    metaobject { id }
    userErrors { field message }
  }
}"#;

const ADJUST: &str = r#"
mutation Adjust($adjust: InventoryAdjustQuantitiesInput!) {
  inventoryAdjustQuantities(input: $adjust) {
    inventoryAdjustmentGroup { id }
    userErrors { field message }
  }
}"#;

const REVERT_AND_DROP: &str = r#"
mutation RevertAndDrop($adjust: InventoryAdjustQuantitiesInput!, $id: ID!) {
  inventoryAdjustQuantities(input: $adjust) {
    inventoryAdjustmentGroup { id }
    userErrors { field message }
  }
  metaobjectDelete(id: $id) {
    deletedId
    userErrors { field message }
  }
}"#;

const LEDGER_ENTRY_CREATE: &str = r#"
mutation LedgerEntryCreate($entry: MetaobjectCreateInput!) {
  metaobjectCreate(metaobject: $entry) {
    metaobject { id }
    userErrors { field message }
  }
}"#;

const LEDGER_ENTRY_DELETE: &str = r#"
mutation LedgerEntryDelete($id: ID!) {
  metaobjectDelete(id: $id) {
    deletedId
    userErrors { field message }
  }
}"#;

const LEDGER_ENTRIES: &str = r#"
query LedgerEntries($type: String!, $after: String) {
  metaobjects(type: $type, first: 100, after: $after) {
    edges { node { id fields { key value } } }
    pageInfo { hasNextPage endCursor }
  }
}"#;

const MAX_PAGES: usize = 50;

/// Shopify's name for each adjustment reason.
pub(super) fn reason_code(reason: AdjustmentReason) -> &'static str {
    match reason {
        AdjustmentReason::Recount => "cycle_count_available",
        AdjustmentReason::Received => "received",
        AdjustmentReason::Damaged => "damaged",
        AdjustmentReason::Sold => "other",
    }
}

/// How one half of a combined mutation ended.
#[derive(Debug)]
enum Half {
    Landed,
    /// Its target no longer exists.
    Missing,
    Failed(CommerceError),
}

impl From<Result<(), CommerceError>> for Half {
    fn from(result: Result<(), CommerceError>) -> Self {
        match result {
            Ok(()) => Half::Landed,
            Err(CommerceError::NotFound(_)) => Half::Missing,
            Err(err) => Half::Failed(err),
        }
    }
}

/// Follow-up that restores the pairing of a delta and its ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compensation {
    /// Delete a ledger entry whose delta never landed.
    DropEntry,
    /// Apply the opposite of a delta that landed alone.
    UndoDelta,
    /// Write back a ledger entry deleted without its reversal.
    RestoreEntry,
}

fn creation_compensation(adjusted: bool, recorded: bool) -> Option<Compensation> {
    match (adjusted, recorded) {
        (true, false) => Some(Compensation::UndoDelta),
        (false, true) => Some(Compensation::DropEntry),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reversal {
    Reverted,
    AlreadyRemoved,
    /// The entry stays listed for a later reset.
    Retry,
}

fn reversal_plan(reversal: &Half, removal: &Half) -> (Reversal, Option<Compensation>) {
    use Half::{Failed, Landed, Missing};
    match (reversal, removal) {
        (Landed, Landed) => (Reversal::Reverted, None),
        // no entry means an earlier reset already reversed this delta
        (Landed, Missing) => (Reversal::AlreadyRemoved, Some(Compensation::UndoDelta)),
        (Landed, Failed(_)) => (Reversal::Retry, Some(Compensation::UndoDelta)),
        (Missing, Landed | Missing) | (Failed(_), Missing) => (Reversal::AlreadyRemoved, None),
        (Failed(_), Landed) => (Reversal::Retry, Some(Compensation::RestoreEntry)),
        (Missing | Failed(_), Failed(_)) => (Reversal::Retry, None),
    }
}

/// Applies the delta and writes its ledger entry in one request. When only one
/// half lands, the other is undone so no unmarked change is left behind.
pub(super) async fn adjust_inventory(
    client: &ShopifyClient,
    input: &AdjustmentInput,
) -> Result<AppliedItem, CommerceError> {
    ensure_ledger(client).await?;
    let location_id = location(client).await?;
    let inventory_item_id = inventory_item(client, &input.variant_id).await?;

    let variables = json!({
        "adjust": {
            "name": "available",
            "reason": reason_code(input.reason),
            "referenceDocumentUri": input.reference_uri,
            "changes": [{
                "delta": input.delta,
                "inventoryItemId": inventory_item_id,
                "locationId": location_id,
            }],
        },
        "entry": {
            "type": LEDGER_TYPE,
            "handle": format!("synthetic-{}", input.adjustment_id),
            "fields": ledger_fields(input, &inventory_item_id, &location_id),
        },
    });
    let data = client.execute(ADJUST_AND_RECORD, variables).await?;

    let adjusted = user_errors(&data, "inventoryAdjustQuantities");
    let recorded = user_errors(&data, "metaobjectCreate").and_then(|_| {
        data.pointer("/metaobjectCreate/metaobject/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CommerceError::Rejected("ledger entry was not created".into()))
    });

    match (creation_compensation(adjusted.is_ok(), recorded.is_ok()), &recorded) {
        (Some(Compensation::DropEntry), Ok(entry_id)) => {
            if let Err(cleanup) = delete_entry(client, entry_id).await {
                warn!(target = "synthstore.shopify", entry_id = %entry_id, error = %cleanup, "ledger_cleanup_failed");
            }
        }
        (Some(Compensation::UndoDelta), _) => {
            if let Err(cleanup) = apply_delta(client, &inventory_item_id, &location_id, -input.delta).await {
                warn!(
                    target = "synthstore.shopify",
                    variant_id = %input.variant_id,
                    error = %cleanup,
                    "unrecorded_adjustment_left_applied"
                );
            }
        }
        _ => {}
    }

    match (adjusted, recorded) {
        (Ok(()), Ok(entry_id)) => Ok(AppliedItem::new(entry_id)
            .with("variant_id", input.variant_id.clone())
            .with("product_id", input.product_id.clone())
            .with("adjustment", input.delta)
            .with("reason", input.reason.as_str())),
        (Err(err), _) | (Ok(()), Err(err)) => Err(err),
    }
}

pub(super) async fn tagged_adjustments(
    client: &ShopifyClient,
    marker_tag: &str,
) -> Result<Vec<TaggedAdjustment>, CommerceError> {
    if !ledger_exists(client).await? {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    let mut after: Option<String> = None;
    for _ in 0..MAX_PAGES {
        let data = client
            .execute(LEDGER_ENTRIES, json!({ "type": LEDGER_TYPE, "after": after }))
            .await?;
        let (page, next) = parse_ledger_page(&data, marker_tag);
        entries.extend(page);
        match next {
            Some(cursor) => after = Some(cursor),
            None => return Ok(entries),
        }
    }
    warn!(target = "synthstore.shopify", pages = MAX_PAGES, "ledger_listing_truncated");
    Ok(entries)
}

/// Reverses the recorded delta at the inventory item and location it landed
/// on, and deletes the ledger entry in the same request.
pub(super) async fn revert_adjustment(
    client: &ShopifyClient,
    adjustment: &TaggedAdjustment,
) -> Result<AppliedItem, CommerceError> {
    let (inventory_item_id, location_id) = match reversal_target(client, adjustment).await {
        Ok(target) => target,
        Err(CommerceError::NotFound(reason)) => {
            return drop_orphaned_entry(client, adjustment, &reason).await;
        }
        Err(err) => return Err(err),
    };

    let variables = json!({
        "adjust": correction(&inventory_item_id, &location_id, -adjustment.delta),
        "id": adjustment.id,
    });
    let data = client.execute(REVERT_AND_DROP, variables).await?;
    let reversal = Half::from(user_errors(&data, "inventoryAdjustQuantities"));
    let removal = Half::from(user_errors(&data, "metaobjectDelete"));
    let (result, compensation) = reversal_plan(&reversal, &removal);

    match compensation {
        Some(Compensation::UndoDelta) => {
            if let Err(err) = apply_delta(client, &inventory_item_id, &location_id, adjustment.delta).await {
                warn!(target = "synthstore.shopify", entry_id = %adjustment.id, error = %err, "reversal_left_applied");
            }
        }
        Some(Compensation::RestoreEntry) => {
            if let Err(err) = restore_entry(client, adjustment, &inventory_item_id, &location_id).await {
                warn!(target = "synthstore.shopify", entry_id = %adjustment.id, error = %err, "ledger_entry_lost");
            }
        }
        Some(Compensation::DropEntry) | None => {}
    }

    match result {
        Reversal::Reverted => Ok(AppliedItem::new(adjustment.id.clone())
            .with("variant_id", adjustment.variant_id.clone())
            .with("adjustment", -adjustment.delta)),
        Reversal::AlreadyRemoved => Ok(already_removed(adjustment)),
        Reversal::Retry => Err(match (reversal, removal) {
            (Half::Failed(err), _) | (_, Half::Failed(err)) => err,
            _ => CommerceError::Rejected("reversal was not applied".into()),
        }),
    }
}

async fn reversal_target(
    client: &ShopifyClient,
    adjustment: &TaggedAdjustment,
) -> Result<(String, String), CommerceError> {
    let inventory_item_id = match &adjustment.inventory_item_id {
        Some(id) => id.clone(),
        None => inventory_item(client, &adjustment.variant_id).await?,
    };
    let location_id = match &adjustment.location_id {
        Some(id) => id.clone(),
        None => location(client).await?,
    };
    Ok((inventory_item_id, location_id))
}

/// The stock an entry points at is gone, so the entry is all that is left.
async fn drop_orphaned_entry(
    client: &ShopifyClient,
    adjustment: &TaggedAdjustment,
    reason: &str,
) -> Result<AppliedItem, CommerceError> {
    match delete_entry(client, &adjustment.id).await {
        Ok(()) | Err(CommerceError::NotFound(_)) => {
            info!(target = "synthstore.shopify", entry_id = %adjustment.id, reason, "orphaned_ledger_entry_dropped");
            Ok(already_removed(adjustment))
        }
        Err(err) => Err(err),
    }
}

fn already_removed(adjustment: &TaggedAdjustment) -> AppliedItem {
    AppliedItem::new(adjustment.id.clone())
        .with("variant_id", adjustment.variant_id.clone())
        .with("already_removed", true)
}

fn correction(inventory_item_id: &str, location_id: &str, delta: i32) -> Value {
    json!({
        "name": "available",
        "reason": "correction",
        "changes": [{
            "delta": delta,
            "inventoryItemId": inventory_item_id,
            "locationId": location_id,
        }],
    })
}

async fn apply_delta(
    client: &ShopifyClient,
    inventory_item_id: &str,
    location_id: &str,
    delta: i32,
) -> Result<(), CommerceError> {
    let variables = json!({ "adjust": correction(inventory_item_id, location_id, delta) });
    let data = client.execute(ADJUST, variables).await?;
    user_errors(&data, "inventoryAdjustQuantities")
}

async fn delete_entry(client: &ShopifyClient, entry_id: &str) -> Result<(), CommerceError> {
    let data = client
        .execute(LEDGER_ENTRY_DELETE, json!({ "id": entry_id }))
        .await?;
    user_errors(&data, "metaobjectDelete")
}

async fn restore_entry(
    client: &ShopifyClient,
    adjustment: &TaggedAdjustment,
    inventory_item_id: &str,
    location_id: &str,
) -> Result<(), CommerceError> {
    let delta = adjustment.delta.to_string();
    let entry = json!({
        "type": LEDGER_TYPE,
        "fields": field_list(&[
            ("marker", adjustment.marker_tag.as_str()),
            ("variant_id", adjustment.variant_id.as_str()),
            ("product_id", adjustment.product_id.as_str()),
            ("inventory_item_id", inventory_item_id),
            ("location_id", location_id),
            ("delta", delta.as_str()),
            ("reason", adjustment.reason.as_str()),
        ]),
    });
    let data = client
        .execute(LEDGER_ENTRY_CREATE, json!({ "entry": entry }))
        .await?;
    user_errors(&data, "metaobjectCreate")
}

async fn ledger_exists(client: &ShopifyClient) -> Result<bool, CommerceError> {
    if client.ledger_ready.initialized() {
        return Ok(true);
    }
    let data = client
        .execute(LEDGER_DEFINITION, json!({ "type": LEDGER_TYPE }))
        .await?;
    Ok(data
        .get("metaobjectDefinitionByType")
        .is_some_and(|definition| !definition.is_null()))
}

async fn ensure_ledger(client: &ShopifyClient) -> Result<(), CommerceError> {
    client
        .ledger_ready
        .get_or_try_init(|| async {
            if ledger_exists(client).await? {
                return Ok(());
            }
            let data = client
                .execute(
                    LEDGER_DEFINITION_CREATE,
                    json!({ "definition": ledger_definition() }),
                )
                .await?;
            let taken = data
                .pointer("/metaobjectDefinitionCreate/userErrors")
                .and_then(Value::as_array)
                .is_some_and(|errors| {
                    errors
                        .iter()
                        .any(|err| err.get("code").and_then(Value::as_str) == Some("TAKEN"))
                });
            if !taken {
                user_errors(&data, "metaobjectDefinitionCreate")?;
            }
            info!(target = "synthstore.shopify", ledger_type = LEDGER_TYPE, "ledger_definition_created");
            Ok(())
        })
        .await
        .map(|_| ())
}

async fn location(client: &ShopifyClient) -> Result<String, CommerceError> {
    client
        .location
        .get_or_try_init(|| async {
            let data = client.execute(FIRST_LOCATION, json!({})).await?;
            data.pointer("/locations/edges/0/node/id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| CommerceError::NotFound("no locations found in the store".into()))
        })
        .await
        .cloned()
}

async fn inventory_item(client: &ShopifyClient, variant_id: &str) -> Result<String, CommerceError> {
    let data = client
        .execute(VARIANT_INVENTORY_ITEM, json!({ "id": variant_id }))
        .await?;
    data.pointer("/productVariant/inventoryItem/id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            CommerceError::NotFound(format!("no inventory item found for variant {variant_id}"))
        })
}

fn ledger_definition() -> Value {
    let text = "single_line_text_field";
    json!({
        "name": "Synthetic inventory adjustment",
        "type": LEDGER_TYPE,
        "fieldDefinitions": [
            {"key": "marker", "name": "Marker", "type": text},
            {"key": "variant_id", "name": "Variant", "type": text},
            {"key": "product_id", "name": "Product", "type": text},
            {"key": "inventory_item_id", "name": "Inventory item", "type": text},
            {"key": "location_id", "name": "Location", "type": text},
            {"key": "delta", "name": "Delta", "type": "number_integer"},
            {"key": "reason", "name": "Reason", "type": text},
            {"key": "reference_uri", "name": "Reference", "type": text},
            {"key": "adjusted_at", "name": "Adjusted at", "type": "date_time"},
        ],
    })
}

fn ledger_fields(input: &AdjustmentInput, inventory_item_id: &str, location_id: &str) -> Value {
    let delta = input.delta.to_string();
    let adjusted_at = input.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    field_list(&[
        ("marker", input.marker_tag.as_str()),
        ("variant_id", input.variant_id.as_str()),
        ("product_id", input.product_id.as_str()),
        ("inventory_item_id", inventory_item_id),
        ("location_id", location_id),
        ("delta", delta.as_str()),
        ("reason", input.reason.as_str()),
        ("reference_uri", input.reference_uri.as_str()),
        ("adjusted_at", adjusted_at.as_str()),
    ])
}

/// Metaobject fields; blank values are left out.
fn field_list(pairs: &[(&str, &str)]) -> Value {
    pairs
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect()
}

/// Ledger entries written under `marker_tag`, plus the next page cursor.
pub(super) fn parse_ledger_page(
    data: &Value,
    marker_tag: &str,
) -> (Vec<TaggedAdjustment>, Option<String>) {
    let entries = data
        .pointer("/metaobjects/edges")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|edge| edge.get("node"))
        .filter_map(|node| {
            let field = |key: &str| {
                node.get("fields")?
                    .as_array()?
                    .iter()
                    .find(|field| field.get("key").and_then(Value::as_str) == Some(key))?
                    .get("value")?
                    .as_str()
            };
            if field("marker")? != marker_tag {
                return None;
            }
            let id = node.get("id")?.as_str()?;
            let Some(delta) = field("delta").and_then(|raw| raw.parse::<i32>().ok()) else {
                warn!(target = "synthstore.shopify", entry_id = %id, "ledger_entry_unreadable");
                return None;
            };
            let recorded = |key: &str| {
                field(key)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };
            Some(TaggedAdjustment {
                id: id.to_string(),
                marker_tag: marker_tag.to_string(),
                variant_id: field("variant_id")?.to_string(),
                product_id: field("product_id").unwrap_or_default().to_string(),
                inventory_item_id: recorded("inventory_item_id"),
                location_id: recorded("location_id"),
                delta,
                reason: field("reason")
                    .and_then(AdjustmentReason::parse)
                    .unwrap_or(AdjustmentReason::Recount),
            })
        })
        .collect();

    let next = match data.pointer("/metaobjects/pageInfo/hasNextPage") {
        Some(Value::Bool(true)) => data
            .pointer("/metaobjects/pageInfo/endCursor")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    (entries, next)
}
