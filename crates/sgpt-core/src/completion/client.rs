use async_trait::async_trait;

use super::types::Turn;
use crate::Result;

/// Chat-completion backend (OpenAI today).
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// One completion call. `turns` is non-empty and ends with the user turn.
    async fn invoke(&self, turns: &[Turn]) -> Result<String>;
}
