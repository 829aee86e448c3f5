use crate::models::{AdjustmentReason, AppliedItem, CatalogItem, CustomAttribute, LineItem, ShippingAddress};
use crate::pipeline::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommerceError {
    /// The store could not be reached or answered with a server-side failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store understood the request and refused it.
    #[error("{0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl CommerceError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CommerceError::Unavailable(_))
    }
}

/// Draft order payload as sent to the store, marker already stamped.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftOrderInput {
    pub email: String,
    pub tags: Vec<String>,
    pub line_items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub note: Option<String>,
    pub custom_attributes: Vec<CustomAttribute>,
}

/// Inventory delta plus the marker that makes it findable later.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentInput {
    pub adjustment_id: String,
    pub variant_id: String,
    pub product_id: String,
    pub delta: i32,
    pub reason: AdjustmentReason,
    pub timestamp: DateTime<Utc>,
    pub marker_tag: String,
    pub reference_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedOrder {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

/// A previously applied, not yet reverted, marked adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedAdjustment {
    pub id: String,
    pub marker_tag: String,
    pub variant_id: String,
    pub product_id: String,
    /// Where the delta landed. Absent on entries written before it was recorded.
    pub inventory_item_id: Option<String>,
    pub location_id: Option<String>,
    pub delta: i32,
    pub reason: AdjustmentReason,
}

/// Remote store operations the pipeline depends on. Implementations carry
/// their own authorization.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    async fn fetch_catalog(&self, limit: usize) -> Result<Vec<CatalogItem>, CommerceError>;

    async fn create_order(&self, input: &DraftOrderInput) -> Result<AppliedItem, CommerceError>;

    async fn adjust_inventory(&self, input: &AdjustmentInput)
    -> Result<AppliedItem, CommerceError>;

    async fn tagged_orders(&self, marker_tag: &str) -> Result<Vec<TaggedOrder>, CommerceError>;

    async fn delete_order(&self, order: &TaggedOrder) -> Result<AppliedItem, CommerceError>;

    async fn tagged_adjustments(
        &self,
        marker_tag: &str,
    ) -> Result<Vec<TaggedAdjustment>, CommerceError>;

    /// Reverses the delta and drops the marked entry. An entry with nothing
    /// left to reverse is dropped and reported with `already_removed`. Any
    /// error leaves the entry listed, so a later call retries it.
    async fn revert_adjustment(
        &self,
        adjustment: &TaggedAdjustment,
    ) -> Result<AppliedItem, CommerceError>;
}

/// Builds an authorized store client for one request.
pub trait StoreConnector: Send + Sync {
    fn connect(
        &self,
        shop_url: &str,
        access_token: &str,
    ) -> Result<Arc<dyn CommerceApi>, PipelineError>;
}
