use anyhow::Result;
use async_trait::async_trait;

use crate::schema::StructuredOutput;
use crate::OpenAiCompatClient;

/// Structured extraction against an LLM. The concrete output schema travels
/// with every call so the provider enforces it; tests implement this with
/// canned outputs.
#[async_trait]
pub trait ExtractAgent: Send + Sync {
    async fn extract_json(
        &self,
        instructions: &str,
        input: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Typed convenience on top of [`ExtractAgent`]: derives the schema from the
/// target type and deserializes the reply into it.
pub async fn extract_typed<T>(
    agent: &dyn ExtractAgent,
    instructions: &str,
    input: &str,
) -> Result<T>
where
    T: StructuredOutput,
{
    let schema = T::openai_schema();
    let value = agent.extract_json(instructions, input, &schema).await?;
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ExtractAgent for OpenAiCompatClient {
    async fn extract_json(
        &self,
        instructions: &str,
        input: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(self
            .extract_with_schema(instructions, input, schema.clone())
            .await?)
    }
}

/// Embedding provider.
#[async_trait]
pub trait EmbedAgent: Send + Sync {
    async fn embed(&self, text: String) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl EmbedAgent for OpenAiCompatClient {
    async fn embed(&self, text: String) -> Result<Vec<f32>> {
        Ok(OpenAiCompatClient::embed(self, text).await?)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(OpenAiCompatClient::embed_batch(self, texts).await?)
    }
}
