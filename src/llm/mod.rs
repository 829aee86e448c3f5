mod openai;

pub use openai::{LlmClient, LlmConfig, LlmError, LlmMessage};

use async_trait::async_trait;

/// Text completion seam: a conversation goes in, raw model text comes out.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, messages: &[LlmMessage]) -> Result<String, LlmError>;
}
