use crate::apply::BatchApplier;
use crate::commerce::{CommerceApi, CommerceError};
use crate::models::{AppliedItem, ApplyOutcome, RecordKind};
use crate::pipeline::PipelineError;
use tracing::info;

/// Finds entities carrying the marker and removes or reverses them. Running
/// either operation twice is safe: the second run finds nothing and returns an
/// empty outcome.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    applier: BatchApplier,
}

impl LifecycleManager {
    pub fn new(applier: BatchApplier) -> Self {
        Self { applier }
    }

    pub async fn clear_generated(
        &self,
        api: &dyn CommerceApi,
        kind: RecordKind,
    ) -> Result<ApplyOutcome, PipelineError> {
        match kind {
            RecordKind::Orders => self.clear_orders(api).await,
            RecordKind::InventoryAdjustments => self.reset_inventory(api).await,
        }
    }

    pub async fn clear_orders(&self, api: &dyn CommerceApi) -> Result<ApplyOutcome, PipelineError> {
        let marker = self.applier.marker();
        let orders: Vec<_> = api
            .tagged_orders(marker.tag())
            .await
            .map_err(|err| PipelineError::from_store("list_tagged_orders", err))?
            .into_iter()
            // the search index matches tag prefixes too
            .filter(|order| marker.matches_tags(&order.tags))
            .collect();
        info!(target = "synthstore.lifecycle", marker = marker.tag(), count = orders.len(), "clear_orders");

        self.applier
            .apply("clear_orders", orders, |order| async move {
                match api.delete_order(&order).await {
                    Err(CommerceError::NotFound(_)) => {
                        Ok(AppliedItem::new(order.id).with("already_removed", true))
                    }
                    other => other,
                }
            })
            .await
    }

    pub async fn reset_inventory(
        &self,
        api: &dyn CommerceApi,
    ) -> Result<ApplyOutcome, PipelineError> {
        let marker = self.applier.marker();
        let adjustments = api
            .tagged_adjustments(marker.tag())
            .await
            .map_err(|err| PipelineError::from_store("list_tagged_adjustments", err))?;
        info!(
            target = "synthstore.lifecycle",
            marker = marker.tag(),
            count = adjustments.len(),
            "reset_inventory"
        );

        // the store reports entries with nothing left to reverse itself; any
        // error here means the entry is still listed
        self.applier
            .apply("reset_inventory", adjustments, |adjustment| async move {
                api.revert_adjustment(&adjustment).await
            })
            .await
    }
}
