use crate::llm::{LlmMessage, TextModel};
use crate::models::{CandidateRecord, CatalogItem, InventoryAdjustment, OrderDraft, RecordKind};
use crate::pipeline::PipelineError;
use crate::prompt::{ComposedPrompt, correction};
use crate::schema;
use chrono::Duration;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Errors fed back to the model per rejected attempt.
pub const MAX_FEEDBACK_ERRORS: usize = 10;

/// Tolerated clock difference between the model's timestamps and ours.
const CLOCK_SKEW_MINUTES: i64 = 5;

/// Asks the model for records and accepts only output that parses, satisfies
/// the schema and references the snapshot it was grounded on. Invalid output
/// is answered with the concrete errors, up to `max_attempts` model calls in
/// total. A failing model call ends the request immediately.
pub async fn generate(
    model: &dyn TextModel,
    prompt: &ComposedPrompt,
    catalog: &[CatalogItem],
    max_attempts: usize,
) -> Result<Vec<CandidateRecord>, PipelineError> {
    schema::ensure_compiled(prompt.kind)
        .map_err(|err| PipelineError::internal("generate", err))?;

    let max_attempts = max_attempts.max(1);
    let mut messages = vec![
        LlmMessage::system(prompt.system.clone()),
        LlmMessage::user(prompt.text.clone()),
    ];
    let mut last_errors = Vec::new();

    for attempt in 1..=max_attempts {
        let raw = model
            .complete(&messages)
            .await
            .map_err(|err| PipelineError::model_unavailable("generate", err.to_string()))?;

        match validate(prompt, catalog, &raw) {
            Ok(records) => {
                crate::metrics::generation_attempts(prompt.kind.label(), attempt);
                info!(
                    target = "synthstore.generator",
                    kind = prompt.kind.label(),
                    count = records.len(),
                    attempt,
                    "generation_accepted"
                );
                return Ok(records);
            }
            Err(errors) => {
                warn!(
                    target = "synthstore.generator",
                    kind = prompt.kind.label(),
                    attempt,
                    max_attempts,
                    first_error = errors.first().map(String::as_str).unwrap_or_default(),
                    error_count = errors.len(),
                    "generation_rejected"
                );
                if attempt < max_attempts {
                    messages.push(LlmMessage::assistant(raw));
                    messages.push(LlmMessage::user(correction(prompt, attempt, &errors)?));
                }
                last_errors = errors;
            }
        }
    }

    crate::metrics::generation_attempts(prompt.kind.label(), max_attempts);
    Err(PipelineError::generation_invalid(
        "generate",
        format!(
            "model output failed validation after {max_attempts} attempts: {}",
            last_errors.join("; ")
        ),
    ))
}

/// One attempt's verdict: the records, or every reason they were refused.
pub fn validate(
    prompt: &ComposedPrompt,
    catalog: &[CatalogItem],
    raw: &str,
) -> Result<Vec<CandidateRecord>, Vec<String>> {
    let cleaned = extract_json(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|err| vec![format!("response is not valid JSON: {err}")])?;

    let violations =
        schema::violations(prompt.kind, &value, MAX_FEEDBACK_ERRORS).map_err(|err| vec![err])?;
    if !violations.is_empty() {
        return Err(violations);
    }

    let root = value
        .get(prompt.kind.root_key())
        .cloned()
        .unwrap_or(Value::Null);
    match prompt.kind {
        RecordKind::Orders => {
            let orders: Vec<OrderDraft> = serde_json::from_value(root)
                .map_err(|err| vec![format!("orders could not be read: {err}")])?;
            check_orders(prompt, catalog, orders)
                .map(|orders| orders.into_iter().map(CandidateRecord::Order).collect())
        }
        RecordKind::InventoryAdjustments => {
            let adjustments: Vec<InventoryAdjustment> = serde_json::from_value(root)
                .map_err(|err| vec![format!("adjustments could not be read: {err}")])?;
            check_adjustments(prompt, catalog, adjustments).map(|adjustments| {
                adjustments
                    .into_iter()
                    .map(CandidateRecord::Adjustment)
                    .collect()
            })
        }
    }
}

fn check_orders(
    prompt: &ComposedPrompt,
    catalog: &[CatalogItem],
    mut orders: Vec<OrderDraft>,
) -> Result<Vec<OrderDraft>, Vec<String>> {
    let variants: HashSet<&str> = catalog.iter().map(|item| item.variant_id.as_str()).collect();
    let latest = prompt.now + Duration::minutes(CLOCK_SKEW_MINUTES);
    let mut errors = Vec::new();

    for (idx, order) in orders.iter().enumerate() {
        for (line, item) in order.line_items.iter().enumerate() {
            if !variants.contains(item.variant_id.as_str()) {
                errors.push(format!(
                    "orders[{idx}].lineItems[{line}].variantId `{}` is not in the catalog",
                    item.variant_id
                ));
            }
        }
        if order.created_at > latest {
            errors.push(format!(
                "orders[{idx}].createdAt {} is in the future",
                order.created_at
            ));
        }
        if let Some(start) = prompt.window_start
            && order.created_at < start
        {
            errors.push(format!(
                "orders[{idx}].createdAt {} is before {start}",
                order.created_at
            ));
        }
    }

    check_count(prompt, orders.len(), &mut errors);
    if !errors.is_empty() {
        errors.truncate(MAX_FEEDBACK_ERRORS);
        return Err(errors);
    }
    trim_surplus(prompt, &mut orders);
    Ok(orders)
}

fn check_adjustments(
    prompt: &ComposedPrompt,
    catalog: &[CatalogItem],
    mut adjustments: Vec<InventoryAdjustment>,
) -> Result<Vec<InventoryAdjustment>, Vec<String>> {
    let owners: HashMap<&str, &str> = catalog
        .iter()
        .map(|item| (item.variant_id.as_str(), item.product_id.as_str()))
        .collect();
    let latest = prompt.now + Duration::minutes(CLOCK_SKEW_MINUTES);
    let mut errors = Vec::new();

    for (idx, adjustment) in adjustments.iter().enumerate() {
        match owners.get(adjustment.variant_id.as_str()) {
            None => errors.push(format!(
                "adjustments[{idx}].variant_id `{}` is not in the catalog",
                adjustment.variant_id
            )),
            Some(owner) if *owner != adjustment.product_id => errors.push(format!(
                "adjustments[{idx}].product_id `{}` does not own variant `{}` (expected `{owner}`)",
                adjustment.product_id, adjustment.variant_id
            )),
            Some(_) => {}
        }
        if adjustment.timestamp > latest {
            errors.push(format!(
                "adjustments[{idx}].timestamp {} is in the future",
                adjustment.timestamp
            ));
        }
    }

    check_count(prompt, adjustments.len(), &mut errors);
    if !errors.is_empty() {
        errors.truncate(MAX_FEEDBACK_ERRORS);
        return Err(errors);
    }
    trim_surplus(prompt, &mut adjustments);
    Ok(adjustments)
}

fn check_count(prompt: &ComposedPrompt, received: usize, errors: &mut Vec<String>) {
    if received < prompt.count {
        errors.push(format!(
            "expected exactly {} {} but received {received}",
            prompt.count,
            prompt.kind.root_key()
        ));
    }
}

fn trim_surplus<T>(prompt: &ComposedPrompt, records: &mut Vec<T>) {
    if records.len() > prompt.count {
        debug!(
            target = "synthstore.generator",
            received = records.len(),
            requested = prompt.count,
            "generation_surplus_trimmed"
        );
        records.truncate(prompt.count);
    }
}

/// Strips a markdown fence or surrounding prose from a model reply.
fn extract_json(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("```") {
        let mut body = Vec::new();
        for line in trimmed.lines().skip(1) {
            if line.trim_start().starts_with("```") {
                break;
            }
            body.push(line);
        }
        return body.join("\n");
    }
    if !trimmed.starts_with('{')
        && let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        return trimmed[start..=end].to_string();
    }
    trimmed.to_string()
}
