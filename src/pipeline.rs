use crate::apply::BatchApplier;
use crate::catalog;
use crate::commerce::{CommerceApi, CommerceError};
use crate::config::PipelineConfig;
use crate::generator;
use crate::lifecycle::LifecycleManager;
use crate::llm::TextModel;
use crate::marker::Marker;
use crate::models::{
    CandidateRecord, CatalogItem, GenerationRequest, OperationResponse, OutcomeStatus, RecordKind,
};
use crate::prompt::compose;
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Catalog → prompt → validated generation, optionally followed by apply, and
/// the two lifecycle operations. One instance serves every store; the store
/// client is passed per call.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    model: Arc<dyn TextModel>,
    applier: BatchApplier,
    lifecycle: LifecycleManager,
}

/// Candidate records plus the size of the snapshot they were grounded on.
#[derive(Debug)]
pub struct PreviewResult {
    pub records: Vec<CandidateRecord>,
    pub available_products: usize,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, model: Arc<dyn TextModel>) -> Self {
        let applier = BatchApplier::new(config.marker.clone(), config.apply_concurrency);
        let lifecycle = LifecycleManager::new(applier.clone());
        Self {
            config: Arc::new(config),
            model,
            applier,
            lifecycle,
        }
    }

    pub fn marker(&self) -> &Marker {
        &self.config.marker
    }

    /// Generates without applying anything. Records are returned as the
    /// model produced them, without the marker.
    pub async fn preview(
        &self,
        api: &dyn CommerceApi,
        kind: RecordKind,
        count: usize,
        date_range_days: Option<u32>,
    ) -> Result<PreviewResult, PipelineError> {
        let request = GenerationRequest::new(kind, count, date_range_days, self.config.max_items)?;
        let (catalog, records) = self.generate(api, &request).await?;
        info!(
            target = "synthstore.pipeline",
            kind = kind.label(),
            count = records.len(),
            "preview_ready"
        );
        Ok(PreviewResult {
            records,
            available_products: catalog.len(),
        })
    }

    pub async fn generate_orders(
        &self,
        api: &dyn CommerceApi,
        count: usize,
        date_range_days: u32,
    ) -> Result<OperationResponse, PipelineError> {
        let request = GenerationRequest::new(
            RecordKind::Orders,
            count,
            Some(date_range_days),
            self.config.max_items,
        )?;
        let (_, records) = self.generate(api, &request).await?;
        let drafts = records
            .into_iter()
            .filter_map(|record| match record {
                CandidateRecord::Order(order) => Some(order),
                CandidateRecord::Adjustment(_) => None,
            })
            .collect();
        let outcome = self
            .capture_stage(
                "apply_orders",
                self.applier.apply_orders(api, drafts, Utc::now()),
            )
            .await?;
        let message = format!(
            "Successfully created {} orders, {} failed",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(report(message, outcome))
    }

    pub async fn generate_inventory(
        &self,
        api: &dyn CommerceApi,
        count: usize,
    ) -> Result<OperationResponse, PipelineError> {
        let request = GenerationRequest::new(
            RecordKind::InventoryAdjustments,
            count,
            None,
            self.config.max_items,
        )?;
        let (_, records) = self.generate(api, &request).await?;
        let adjustments = records
            .into_iter()
            .filter_map(|record| match record {
                CandidateRecord::Adjustment(adjustment) => Some(adjustment),
                CandidateRecord::Order(_) => None,
            })
            .collect();
        let outcome = self
            .capture_stage(
                "apply_adjustments",
                self.applier.apply_adjustments(api, adjustments),
            )
            .await?;
        let message = format!(
            "Applied {} inventory adjustments, {} failed",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(report(message, outcome))
    }

    pub async fn clear_generated_orders(
        &self,
        api: &dyn CommerceApi,
    ) -> Result<OperationResponse, PipelineError> {
        let outcome = self
            .capture_stage(
                "clear_orders",
                self.lifecycle.clear_generated(api, RecordKind::Orders),
            )
            .await?;
        let message = format!(
            "Deleted {} AI-generated orders, {} failed",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(report(message, outcome))
    }

    pub async fn reset_inventory(
        &self,
        api: &dyn CommerceApi,
    ) -> Result<OperationResponse, PipelineError> {
        let outcome = self
            .capture_stage(
                "reset_inventory",
                self.lifecycle
                    .clear_generated(api, RecordKind::InventoryAdjustments),
            )
            .await?;
        let message = format!(
            "Reverted {} inventory adjustments, {} failed",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(report(message, outcome))
    }

    async fn generate(
        &self,
        api: &dyn CommerceApi,
        request: &GenerationRequest,
    ) -> Result<(Vec<CatalogItem>, Vec<CandidateRecord>), PipelineError> {
        let catalog = self
            .capture_stage(
                "fetch_catalog",
                catalog::fetch(api, self.config.catalog_limit),
            )
            .await?;
        let prompt = compose(request, &catalog, Utc::now())?;
        let records = self
            .capture_stage(
                "generate",
                generator::generate(
                    self.model.as_ref(),
                    &prompt,
                    &catalog,
                    self.config.max_attempts,
                ),
            )
            .await?;
        Ok((catalog, records))
    }

    async fn capture_stage<T, Fut>(&self, name: &'static str, fut: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        debug!(
            target = "synthstore.pipeline",
            stage = name,
            elapsed_ms = elapsed_ms as u64,
            ok = result.is_ok(),
            "stage_finished"
        );
        result
    }
}

fn report(message: String, outcome: crate::models::ApplyOutcome) -> OperationResponse {
    match outcome.status() {
        OutcomeStatus::Complete => info!(target = "synthstore.pipeline", %message, "operation_complete"),
        OutcomeStatus::Partial | OutcomeStatus::Failed => {
            warn!(target = "synthstore.pipeline", %message, "operation_incomplete")
        }
    }
    OperationResponse::from_outcome(message, outcome)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    UpstreamUnavailable,
    /// The store answered but refused the request, e.g. a missing access scope.
    UpstreamRejected,
    EmptyCatalog,
    ModelUnavailable,
    GenerationInvalid,
    Internal,
}

impl PipelineErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineErrorKind::InvalidInput => "invalid_input",
            PipelineErrorKind::UpstreamUnavailable => "upstream_unavailable",
            PipelineErrorKind::UpstreamRejected => "upstream_rejected",
            PipelineErrorKind::EmptyCatalog => "empty_catalog",
            PipelineErrorKind::ModelUnavailable => "model_unavailable",
            PipelineErrorKind::GenerationInvalid => "generation_invalid",
            PipelineErrorKind::Internal => "internal",
        }
    }
}

impl PipelineError {
    fn new(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn upstream_unavailable(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::UpstreamUnavailable)
    }

    /// Keeps "could not reach the store" apart from "the store said no".
    pub fn from_store(stage: &'static str, err: CommerceError) -> Self {
        let kind = if err.is_unavailable() {
            PipelineErrorKind::UpstreamUnavailable
        } else {
            PipelineErrorKind::UpstreamRejected
        };
        Self::new(stage, err.to_string(), kind)
    }

    pub fn empty_catalog(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::EmptyCatalog)
    }

    pub fn model_unavailable(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::ModelUnavailable)
    }

    pub fn generation_invalid(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::GenerationInvalid)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Internal)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeStore, ScriptedModel, adjustments_json, catalog_of, orders_json_at,
    };
    use chrono::Duration;
    use std::collections::HashSet;

    fn pipeline_with(model: Arc<ScriptedModel>) -> Pipeline {
        Pipeline::new(PipelineConfig::default(), model)
    }

    #[tokio::test]
    async fn preview_returns_grounded_orders_without_applying() {
        let catalog = catalog_of(3);
        let store = FakeStore::with_catalog(catalog.clone());
        let model = Arc::new(ScriptedModel::new(vec![Ok(orders_json_at(
            Utc::now(),
            &catalog,
            5,
            30,
        ))]));

        let started = Utc::now();
        let preview = pipeline_with(model.clone())
            .preview(&store, RecordKind::Orders, 5, Some(30))
            .await
            .unwrap();

        assert_eq!(preview.records.len(), 5);
        assert_eq!(preview.available_products, 3);
        let variants: HashSet<_> = catalog.iter().map(|c| c.variant_id.clone()).collect();
        for record in &preview.records {
            let order = record.as_order().unwrap();
            assert!((1..=5).contains(&order.line_items.len()));
            assert!(order.line_items.iter().all(|l| variants.contains(&l.variant_id)));
            assert!(order.created_at >= started - Duration::days(30));
            assert!(order.created_at <= Utc::now());
            assert!(order.tags.is_empty());
        }
        assert!(store.created_orders().is_empty());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn generated_orders_are_all_accounted_for() {
        let catalog = catalog_of(3);
        let store = FakeStore::with_catalog(catalog.clone());
        store.reject_variant(&catalog[0].variant_id);
        let model = Arc::new(ScriptedModel::new(vec![Ok(orders_json_at(
            Utc::now(),
            &catalog,
            6,
            30,
        ))]));

        let response = pipeline_with(model)
            .generate_orders(&store, 6, 30)
            .await
            .unwrap();
        assert_eq!(response.items.len() + response.failed_items.len(), 6);
        assert!(!response.failed_items.is_empty());
        assert_eq!(
            response.message,
            format!(
                "Successfully created {} orders, {} failed",
                response.items.len(),
                response.failed_items.len()
            )
        );
        assert_eq!(response.status, OutcomeStatus::Partial);
    }

    #[tokio::test]
    async fn inventory_with_two_rejections_reports_eight_and_two() {
        let catalog = catalog_of(5);
        let store = FakeStore::with_catalog(catalog.clone());
        store.reject_variant(&catalog[2].variant_id);
        let model = Arc::new(ScriptedModel::new(vec![Ok(adjustments_json(&catalog, 10))]));

        let response = pipeline_with(model)
            .generate_inventory(&store, 10)
            .await
            .unwrap();
        assert_eq!(response.items.len(), 8);
        assert_eq!(response.failed_items.len(), 2);
        for failed in &response.failed_items {
            assert_eq!(failed.identity["variant_id"], catalog[2].variant_id.as_str());
            assert!(!failed.error.is_empty());
        }
        assert_eq!(response.message, "Applied 8 inventory adjustments, 2 failed");
    }

    #[tokio::test]
    async fn empty_store_stops_before_the_model() {
        let store = FakeStore::with_catalog(Vec::new());
        let model = Arc::new(ScriptedModel::repeating(Ok("{}".into())));
        let err = pipeline_with(model.clone())
            .generate_orders(&store, 3, 30)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::EmptyCatalog);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_generation_writes_nothing() {
        let catalog = catalog_of(2);
        let store = FakeStore::with_catalog(catalog);
        let model = Arc::new(ScriptedModel::repeating(Ok("{\"orders\": 3}".into())));
        let err = pipeline_with(model.clone())
            .generate_orders(&store, 2, 30)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::GenerationInvalid);
        assert_eq!(model.calls(), PipelineConfig::default().max_attempts);
        assert!(store.created_orders().is_empty());
    }

    #[tokio::test]
    async fn oversized_request_is_invalid_input() {
        let store = FakeStore::with_catalog(catalog_of(2));
        let model = Arc::new(ScriptedModel::repeating(Ok("{}".into())));
        let err = pipeline_with(model)
            .generate_inventory(&store, 500)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "request");
    }

    #[tokio::test]
    async fn generate_then_clear_round_trip() {
        let catalog = catalog_of(2);
        let store = FakeStore::with_catalog(catalog.clone());
        let model = Arc::new(ScriptedModel::new(vec![Ok(orders_json_at(
            Utc::now(),
            &catalog,
            3,
            10,
        ))]));
        let pipeline = pipeline_with(model);

        let created = pipeline.generate_orders(&store, 3, 10).await.unwrap();
        assert_eq!(created.items.len(), 3);
        let tag = pipeline.marker().tag().to_string();
        assert_eq!(store.tagged_orders(&tag).await.unwrap().len(), 3);

        let cleared = pipeline.clear_generated_orders(&store).await.unwrap();
        assert_eq!(cleared.message, "Deleted 3 AI-generated orders, 0 failed");
        assert!(store.tagged_orders(&tag).await.unwrap().is_empty());

        let again = pipeline.clear_generated_orders(&store).await.unwrap();
        assert!(again.items.is_empty());
        assert_eq!(again.status, OutcomeStatus::Complete);
    }

    #[tokio::test]
    async fn reset_on_untouched_store_is_empty() {
        let store = FakeStore::with_catalog(catalog_of(2));
        let model = Arc::new(ScriptedModel::repeating(Ok("{}".into())));
        let response = pipeline_with(model).reset_inventory(&store).await.unwrap();
        assert!(response.items.is_empty());
        assert!(response.failed_items.is_empty());
        assert!(response.success);
    }

    #[test]
    fn error_kinds_have_stable_labels() {
        let err = PipelineError::generation_invalid("generate", "still invalid");
        assert_eq!(err.kind().label(), "generation_invalid");
        assert_eq!(err.to_string(), "stage `generate` failed: still invalid");

        let refused = PipelineError::from_store(
            "list_tagged_orders",
            CommerceError::Rejected("Access denied for orders field".into()),
        );
        assert_eq!(refused.kind().label(), "upstream_rejected");
        let unreachable = PipelineError::from_store(
            "list_tagged_orders",
            CommerceError::Unavailable("connection refused".into()),
        );
        assert_eq!(unreachable.kind(), PipelineErrorKind::UpstreamUnavailable);
    }
}
