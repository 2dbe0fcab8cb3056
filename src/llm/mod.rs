use async_trait::async_trait;
use serde_json::Value;

/// A text-completion backend. The decision engine owns prompt construction
/// and output validation; providers only move bytes.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": config["max_tokens"].as_u64().unwrap_or(1000),
                "temperature": config["temperature"].as_f64().unwrap_or(0.2)
            }))
            .send()
            .await?;

        let result: Value = response.json().await?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    async fn generate(
        &self,
        prompt: &str,
        config: &Value,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": config["max_tokens"].as_u64().unwrap_or(1000),
                "messages": [{"role": "user", "content": prompt}]
            }))
            .send()
            .await?;

        let result: Value = response.json().await?;
        let content = result["content"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn openai_client_extracts_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"{\"action\":\"WAIT\"}"}}]}"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(
            "test-key".to_string(),
            Some(server.url()),
            "gpt-4o-mini".to_string(),
        );
        let out = client
            .generate("ping", &serde_json::json!({}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(out, "{\"action\":\"WAIT\"}");
    }

    #[tokio::test]
    async fn openai_client_returns_empty_on_unexpected_shape() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"overloaded"}}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(
            "test-key".to_string(),
            Some(server.url()),
            "gpt-4o-mini".to_string(),
        );
        let out = client
            .generate("ping", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
