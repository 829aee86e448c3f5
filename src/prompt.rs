use crate::config::MAX_CATALOG_LIMIT;
use crate::models::{CatalogItem, GenerationRequest, RecordKind};
use crate::pipeline::PipelineError;
use crate::schema::response_schema;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct PromptTemplates {
    pub base_instructions: String,
    pub order_generation: String,
    pub inventory_generation: String,
    pub correction: String,
}

static TEMPLATES: Lazy<Result<PromptTemplates, String>> = Lazy::new(|| {
    serde_yaml::from_str(include_str!("../prompts/prompts.yaml")).map_err(|err| err.to_string())
});

pub fn templates() -> Result<&'static PromptTemplates, PipelineError> {
    TEMPLATES
        .as_ref()
        .map_err(|err| PipelineError::internal("compose_prompt", format!("prompts.yaml: {err}")))
}

/// Everything the generator needs for one request: the conversation opener,
/// the schema to enforce and the time window the output must respect.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub kind: RecordKind,
    pub count: usize,
    pub system: String,
    pub text: String,
    pub schema: &'static Value,
    pub now: DateTime<Utc>,
    pub window_start: Option<DateTime<Utc>>,
}

/// Builds the prompt for `request`. Output only varies with `now`.
pub fn compose(
    request: &GenerationRequest,
    catalog: &[CatalogItem],
    now: DateTime<Utc>,
) -> Result<ComposedPrompt, PipelineError> {
    let templates = templates()?;
    let schema = response_schema(request.kind());
    let schema_json = serde_json::to_string_pretty(schema)
        .map_err(|err| PipelineError::internal("compose_prompt", err.to_string()))?;
    let projection: Vec<&CatalogItem> = catalog.iter().take(MAX_CATALOG_LIMIT).collect();
    let catalog_json = serde_json::to_string_pretty(&projection)
        .map_err(|err| PipelineError::internal("compose_prompt", err.to_string()))?;

    let now_text = timestamp(now);
    let (text, window_start) = match request.kind() {
        RecordKind::Orders => {
            let days = request.constraints().date_range_days.unwrap_or(30);
            let start = now - Duration::days(i64::from(days));
            let text = render(
                &templates.order_generation,
                &[
                    ("count", request.count().to_string()),
                    ("date_range_days", days.to_string()),
                    ("window_start", timestamp(start)),
                    ("now", now_text),
                    ("catalog_json", catalog_json),
                    ("schema_json", schema_json),
                ],
            );
            (text, Some(start))
        }
        RecordKind::InventoryAdjustments => {
            let text = render(
                &templates.inventory_generation,
                &[
                    ("count", request.count().to_string()),
                    ("now", now_text),
                    ("catalog_json", catalog_json),
                    ("schema_json", schema_json),
                ],
            );
            (text, None)
        }
    };

    Ok(ComposedPrompt {
        kind: request.kind(),
        count: request.count(),
        system: templates.base_instructions.trim().to_string(),
        text,
        schema,
        now,
        window_start,
    })
}

/// Feedback message for a rejected attempt.
pub fn correction(
    prompt: &ComposedPrompt,
    attempt: usize,
    errors: &[String],
) -> Result<String, PipelineError> {
    let templates = templates()?;
    let bullets = errors
        .iter()
        .map(|err| format!("- {err}"))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(render(
        &templates.correction,
        &[
            ("attempt", attempt.to_string()),
            ("errors", bullets),
            ("count", prompt.count.to_string()),
            ("root_key", prompt.kind.root_key().to_string()),
        ],
    ))
}

/// Fills `{{name}}` placeholders in one pass over the template; substituted
/// text is never rescanned. Unknown names are left as written.
fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };
        let name = &after[..end];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
