use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{GenerationConfig, GenerationProvider};
use crate::error::{RagError, Result};
use crate::models::{
    ChatRequest, ChatResponse, Message, OllamaGenerateRequest, OllamaGenerateResponse,
};

/// A text-generation service: one prompt in, one completion out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::Generation(format!("failed to build HTTP client: {}", e)))
}

async fn error_body(response: reqwest::Response) -> RagError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    RagError::Generation(format!("request failed: {} - {}", status, error_text))
}

/// Completions from a local Ollama server via `/api/generate`.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(error_body(response).await);
        }

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid response: {}", e)))?;
        Ok(body.response)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Completions from any OpenAI-compatible `/chat/completions` endpoint
/// (LiteLLM, vLLM, llama.cpp server and similar).
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleGenerator {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn request_for(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: None,
            stream: Some(false),
        }
    }
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self.client.post(&url).json(&self.request_for(prompt));
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(error_body(response).await);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::Generation("response contained no choices".to_string()))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| RagError::Generation(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

pub fn generator_from_config(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match config.provider {
        GenerationProvider::Ollama => {
            tracing::info!("Using Ollama model '{}' at {}", config.model, config.base_url);
            Arc::new(OllamaGenerator::new(&config.base_url, &config.model, config.timeout())?)
        }
        GenerationProvider::OpenaiCompatible => {
            tracing::info!(
                "Using OpenAI-compatible model '{}' at {}",
                config.model,
                config.base_url
            );
            Arc::new(OpenAiCompatibleGenerator::new(
                &config.base_url,
                &config.model,
                config.api_key.clone(),
                config.timeout(),
            )?)
        }
    };
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_openai_request_carries_prompt_verbatim() {
        let generator =
            OpenAiCompatibleGenerator::new("http://localhost:4000/", "llama3.2", None, TIMEOUT)
                .unwrap();
        let request = generator.request_for("Reviews:\n- x\n");
        assert_eq!(generator.base_url, "http://localhost:4000");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
        assert_eq!(request.messages[0].content, "Reviews:\n- x\n");
    }

    #[test]
    fn test_ollama_request_shape() {
        let request = OllamaGenerateRequest { model: "llama3.2", prompt: "hi", stream: false };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"model": "llama3.2", "prompt": "hi", "stream": false}));
    }

    #[test]
    fn test_chat_response_parses_minimal_body() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Yes, fast."}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Yes, fast.");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_generation_error() {
        let generator =
            OllamaGenerator::new("http://127.0.0.1:9", "llama3.2", Duration::from_secs(2)).unwrap();
        let err = generator.generate("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }
}
