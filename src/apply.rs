use crate::commerce::{
    AdjustmentInput, CommerceApi, CommerceError, DraftOrderInput, TaggedAdjustment, TaggedOrder,
};
use crate::marker::Marker;
use crate::models::{AppliedItem, ApplyOutcome, FailedItem, InventoryAdjustment, OrderDraft};
use crate::pipeline::PipelineError;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde_json::{Map, Value, json};
use std::future::Future;
use tracing::{info, warn};
use uuid::Uuid;

/// Fields that identify a record in a failure report.
pub trait ApplyRecord {
    fn identity(&self) -> Map<String, Value>;
}

impl ApplyRecord for OrderDraft {
    fn identity(&self) -> Map<String, Value> {
        let mut identity = Map::new();
        identity.insert("email".into(), json!(self.email));
        identity.insert("items".into(), json!(self.line_items.len()));
        identity
    }
}

impl ApplyRecord for InventoryAdjustment {
    fn identity(&self) -> Map<String, Value> {
        let mut identity = Map::new();
        identity.insert("variant_id".into(), json!(self.variant_id));
        identity.insert("product_id".into(), json!(self.product_id));
        identity.insert("adjustment".into(), json!(self.adjustment));
        identity
    }
}

impl ApplyRecord for TaggedOrder {
    fn identity(&self) -> Map<String, Value> {
        let mut identity = Map::new();
        identity.insert("id".into(), json!(self.id));
        identity.insert("name".into(), json!(self.name));
        identity
    }
}

impl ApplyRecord for TaggedAdjustment {
    fn identity(&self) -> Map<String, Value> {
        let mut identity = Map::new();
        identity.insert("id".into(), json!(self.id));
        identity.insert("variant_id".into(), json!(self.variant_id));
        identity.insert("adjustment".into(), json!(self.delta));
        identity
    }
}

/// Applies records one by one against the store, isolating failures.
///
/// The first record is sent alone: if the store is unreachable for it the
/// whole call fails, otherwise every record ends up in exactly one of
/// `succeeded` or `failed`. The rest run with bounded concurrency, and both
/// lists keep input order.
#[derive(Debug, Clone)]
pub struct BatchApplier {
    marker: Marker,
    concurrency: usize,
}

impl BatchApplier {
    pub fn new(marker: Marker, concurrency: usize) -> Self {
        Self {
            marker,
            concurrency: concurrency.max(1),
        }
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub async fn apply<R, F, Fut>(
        &self,
        stage: &'static str,
        records: Vec<R>,
        create: F,
    ) -> Result<ApplyOutcome, PipelineError>
    where
        R: ApplyRecord,
        F: Fn(R) -> Fut,
        Fut: Future<Output = Result<AppliedItem, CommerceError>>,
    {
        let total = records.len();
        let mut records = records.into_iter();
        let Some(first) = records.next() else {
            return Ok(ApplyOutcome::default());
        };

        let mut results = Vec::with_capacity(total);
        let identity = first.identity();
        match create(first).await {
            Err(err) if err.is_unavailable() => {
                warn!(target = "synthstore.apply", stage, error = %err, "store_unreachable");
                return Err(PipelineError::upstream_unavailable(stage, err.to_string()));
            }
            result => results.push((0, identity, result)),
        }

        let rest: Vec<_> = stream::iter(records.enumerate().map(|(idx, record)| {
            let identity = record.identity();
            let pending = create(record);
            async move { (idx + 1, identity, pending.await) }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;
        results.extend(rest);
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut outcome = ApplyOutcome::default();
        for (idx, identity, result) in results {
            match result {
                Ok(item) => outcome.succeeded.push(item),
                Err(err) => {
                    warn!(target = "synthstore.apply", stage, index = idx, error = %err, "item_failed");
                    outcome.failed.push(FailedItem {
                        identity,
                        error: err.to_string(),
                    });
                }
            }
        }

        crate::metrics::apply_outcome(stage, outcome.succeeded.len(), outcome.failed.len());
        if outcome.failed.is_empty() {
            info!(target = "synthstore.apply", stage, succeeded = outcome.succeeded.len(), "batch_applied");
        } else {
            warn!(
                target = "synthstore.apply",
                stage,
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "batch_partially_applied"
            );
        }
        Ok(outcome)
    }

    /// Creates each order with the marker already in its create input.
    pub async fn apply_orders(
        &self,
        api: &dyn CommerceApi,
        drafts: Vec<OrderDraft>,
        generated_at: DateTime<Utc>,
    ) -> Result<ApplyOutcome, PipelineError> {
        let drafts = drafts
            .into_iter()
            .map(|mut draft| {
                self.marker.stamp_order(&mut draft, generated_at);
                draft
            })
            .collect();
        self.apply("apply_orders", drafts, |draft: OrderDraft| async move {
            api.create_order(&DraftOrderInput::from(draft)).await
        })
        .await
    }

    /// Adjusts stock, recording each delta under the marker in the same call.
    pub async fn apply_adjustments(
        &self,
        api: &dyn CommerceApi,
        adjustments: Vec<InventoryAdjustment>,
    ) -> Result<ApplyOutcome, PipelineError> {
        let marker = &self.marker;
        self.apply(
            "apply_adjustments",
            adjustments,
            |adjustment: InventoryAdjustment| async move {
                let adjustment_id = Uuid::new_v4().to_string();
                let input = AdjustmentInput {
                    reference_uri: marker.reference_uri(&adjustment_id),
                    adjustment_id,
                    variant_id: adjustment.variant_id,
                    product_id: adjustment.product_id,
                    delta: adjustment.adjustment,
                    reason: adjustment.reason,
                    timestamp: adjustment.timestamp,
                    marker_tag: marker.tag().to_string(),
                };
                api.adjust_inventory(&input).await
            },
        )
        .await
    }
}

impl From<OrderDraft> for DraftOrderInput {
    fn from(draft: OrderDraft) -> Self {
        Self {
            email: draft.email,
            tags: draft.tags,
            line_items: draft.line_items,
            shipping_address: draft.shipping_address,
            note: draft.note,
            custom_attributes: draft.custom_attributes,
        }
    }
}
