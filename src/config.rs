use crate::llm::LlmConfig;
use crate::marker::{DEFAULT_MARKER_TAG, Marker};
use std::str::FromStr;

/// Upper bound on catalog items embedded into a prompt.
pub const MAX_CATALOG_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub body_limit: usize,
    pub metrics_key: Option<String>,
    pub http: HttpConfig,
    pub shopify_api_version: String,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_attempts: usize,
    pub catalog_limit: usize,
    pub max_items: usize,
    pub apply_concurrency: usize,
    pub marker: Marker,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            catalog_limit: 25,
            max_items: 50,
            apply_concurrency: 4,
            marker: Marker::new(DEFAULT_MARKER_TAG),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = PipelineConfig::default();
        let http_defaults = HttpConfig::default();

        let marker = lookup("SYNTHETIC_MARKER")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Marker::new)
            .unwrap_or(defaults.marker);

        let pipeline = PipelineConfig {
            max_attempts: parse_or(&lookup, "GENERATION_MAX_ATTEMPTS", defaults.max_attempts)
                .max(1),
            catalog_limit: parse_or(&lookup, "CATALOG_LIMIT", defaults.catalog_limit)
                .clamp(1, MAX_CATALOG_LIMIT),
            max_items: parse_or(&lookup, "MAX_ITEMS_PER_REQUEST", defaults.max_items).max(1),
            apply_concurrency: parse_or(&lookup, "APPLY_CONCURRENCY", defaults.apply_concurrency)
                .max(1),
            marker,
        };

        let llm = LlmConfig {
            base_url: lookup("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            api_key: lookup("LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")),
            model: lookup("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.7_f32).clamp(0.0, 2.0),
        };

        Self {
            port: parse_or(&lookup, "PORT", 8000),
            body_limit: parse_or(&lookup, "REQUEST_MAX_BYTES", 64 * 1024_usize).max(1024),
            metrics_key: lookup("METRICS_KEY").filter(|value| !value.trim().is_empty()),
            http: HttpConfig {
                timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", http_defaults.timeout_secs),
                connect_timeout_secs: parse_or(
                    &lookup,
                    "HTTP_CONNECT_TIMEOUT_SECS",
                    http_defaults.connect_timeout_secs,
                ),
            },
            shopify_api_version: lookup("SHOPIFY_API_VERSION")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "2024-10".into()),
            llm,
            pipeline,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}
