use crate::pipeline::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

/// Body shared by every store operation. The access token is handed to the
/// store connector untouched.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreRequest {
    pub shop_url: String,
    pub access_token: String,
    #[serde(default = "default_num_items")]
    pub num_items: usize,
    #[serde(default = "default_date_range_days")]
    pub date_range_days: u32,
    #[serde(default)]
    pub kind: RecordKind,
}

fn default_num_items() -> usize {
    10
}

fn default_date_range_days() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Orders,
    #[serde(alias = "inventory")]
    InventoryAdjustments,
}

impl RecordKind {
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Orders => "orders",
            RecordKind::InventoryAdjustments => "inventory_adjustments",
        }
    }

    /// Root key of the model's JSON document.
    pub fn root_key(&self) -> &'static str {
        match self {
            RecordKind::Orders => "orders",
            RecordKind::InventoryAdjustments => "adjustments",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Constraints {
    pub date_range_days: Option<u32>,
}

/// Validated, immutable description of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    kind: RecordKind,
    count: usize,
    constraints: Constraints,
}

impl GenerationRequest {
    pub fn new(
        kind: RecordKind,
        count: usize,
        date_range_days: Option<u32>,
        max_items: usize,
    ) -> Result<Self, PipelineError> {
        if count == 0 {
            return Err(PipelineError::invalid_input(
                "request",
                "num_items must be a positive integer",
            ));
        }
        if count > max_items {
            return Err(PipelineError::invalid_input(
                "request",
                format!("num_items must not exceed {max_items}"),
            ));
        }
        let date_range_days = match kind {
            RecordKind::Orders => match date_range_days {
                Some(0) => {
                    return Err(PipelineError::invalid_input(
                        "request",
                        "date_range_days must be a positive integer",
                    ));
                }
                Some(days) => Some(days),
                None => Some(default_date_range_days()),
            },
            RecordKind::InventoryAdjustments => None,
        };
        Ok(Self {
            kind,
            count,
            constraints: Constraints { date_range_days },
        })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn constraints(&self) -> Constraints {
        self.constraints
    }
}

/// One sellable variant from the store, as seen at snapshot time.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub product_id: String,
    pub variant_id: String,
    pub price: f64,
    pub sku: Option<String>,
    pub title: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub email: String,
    pub line_items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub variant_id: String,
    pub quantity: u32,
    #[serde(default = "default_taxable")]
    pub taxable: bool,
}

fn default_taxable() -> bool {
    true
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub province_code: Option<String>,
    pub country_code: String,
    pub zip: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomAttribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryAdjustment {
    pub variant_id: String,
    pub product_id: String,
    pub adjustment: i32,
    pub reason: AdjustmentReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentReason {
    Recount,
    Received,
    Damaged,
    Sold,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Recount => "recount",
            AdjustmentReason::Received => "received",
            AdjustmentReason::Damaged => "damaged",
            AdjustmentReason::Sold => "sold",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "recount" => Some(AdjustmentReason::Recount),
            "received" => Some(AdjustmentReason::Received),
            "damaged" => Some(AdjustmentReason::Damaged),
            "sold" => Some(AdjustmentReason::Sold),
            _ => None,
        }
    }
}

/// Schema-validated output of the generator, not yet applied.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CandidateRecord {
    Order(OrderDraft),
    Adjustment(InventoryAdjustment),
}

impl CandidateRecord {
    pub fn as_order(&self) -> Option<&OrderDraft> {
        match self {
            CandidateRecord::Order(order) => Some(order),
            CandidateRecord::Adjustment(_) => None,
        }
    }

    pub fn as_adjustment(&self) -> Option<&InventoryAdjustment> {
        match self {
            CandidateRecord::Adjustment(adjustment) => Some(adjustment),
            CandidateRecord::Order(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppliedItem {
    pub id: String,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl AppliedItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            detail: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// A record the store refused, identified by the fields a caller recognizes
/// (email and item count for orders, variant for adjustments).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailedItem {
    #[serde(flatten)]
    pub identity: Map<String, Value>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ApplyOutcome {
    pub succeeded: Vec<AppliedItem>,
    pub failed: Vec<FailedItem>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Complete,
    Partial,
    Failed,
}

impl ApplyOutcome {
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> OutcomeStatus {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (_, true) => OutcomeStatus::Complete,
            (false, false) => OutcomeStatus::Partial,
            (true, false) => OutcomeStatus::Failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub message: String,
    pub status: OutcomeStatus,
    pub success: bool,
    pub items: Vec<AppliedItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_items: Vec<FailedItem>,
}

impl OperationResponse {
    pub fn from_outcome(message: String, outcome: ApplyOutcome) -> Self {
        let status = outcome.status();
        Self {
            message,
            status,
            success: status != OutcomeStatus::Failed,
            items: outcome.succeeded,
            failed_items: outcome.failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub message: String,
    pub items: Vec<CandidateRecord>,
    pub available_products: usize,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: Option<String>,
    pub stage: Option<String>,
}
