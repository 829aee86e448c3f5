use crate::commerce::CommerceApi;
use crate::config::MAX_CATALOG_LIMIT;
use crate::models::CatalogItem;
use crate::pipeline::PipelineError;
use tracing::{debug, warn};

/// Reads a fresh, bounded view of the store's catalog. Never cached: each
/// request grounds generation on what the store holds right now.
pub async fn fetch(api: &dyn CommerceApi, limit: usize) -> Result<Vec<CatalogItem>, PipelineError> {
    let limit = limit.clamp(1, MAX_CATALOG_LIMIT);
    // Any error status while reading the catalog means the store is unusable
    // for this request.
    let mut items = api
        .fetch_catalog(limit)
        .await
        .map_err(|err| PipelineError::upstream_unavailable("fetch_catalog", err.to_string()))?;

    let before = items.len();
    items.retain(|item| !item.variant_id.trim().is_empty() && !item.product_id.trim().is_empty());
    if items.len() != before {
        warn!(
            target = "synthstore.catalog",
            dropped = before - items.len(),
            "catalog_items_missing_ids"
        );
    }
    items.truncate(limit);

    if items.is_empty() {
        return Err(PipelineError::empty_catalog(
            "fetch_catalog",
            "No products found in store",
        ));
    }
    debug!(target = "synthstore.catalog", count = items.len(), "catalog_snapshot");
    Ok(items)
}
