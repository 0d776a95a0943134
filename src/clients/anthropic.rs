//! Anthropic Messages API client for one-off completions.
//!
//! Used for pull-request body generation; the interactive agent work
//! goes through the Claude Code subprocess instead.

use std::sync::{Arc, OnceLock};

use serde_json::json;

use crate::clients::http::{error_for_status, HttpClient};
use crate::config::AnthropicConfiguration;
use crate::errors::{Error, Result};

static INSTANCE: OnceLock<Arc<AnthropicClient>> = OnceLock::new();

#[derive(Debug)]
pub struct AnthropicClient {
    http: HttpClient,
    model: String,
}

impl AnthropicClient {
    pub fn new(config: &AnthropicConfiguration) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| Error::config("anthropic.api_key is not configured"))?;
        let http = HttpClient::new(
            format!("https://{}", config.hostname),
            vec![
                ("x-api-key", api_key.expose().to_string()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
        )?;
        Ok(Self {
            http,
            model: config.model.clone(),
        })
    }

    /// Process-wide instance; the first configuration wins.
    pub fn get_instance(config: &AnthropicConfiguration) -> Result<Arc<Self>> {
        if let Some(instance) = INSTANCE.get() {
            return Ok(instance.clone());
        }
        let instance = Arc::new(Self::new(config)?);
        Ok(INSTANCE.get_or_init(|| instance).clone())
    }

    /// Single-prompt completion; returns the first text block.
    pub async fn query(&self, prompt: &str) -> Result<String> {
        let response = self
            .http
            .post("/v1/messages")
            .json(&json!({
                "model": self.model,
                "max_tokens": 8192,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let payload: serde_json::Value = response.json().await?;
        payload
            .get("content")
            .and_then(serde_json::Value::as_array)
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Agent("empty completion response".to_string()))
    }
}
