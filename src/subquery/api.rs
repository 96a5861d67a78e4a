//! OpenAI-compatible chat-completions backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{BackendAdapter, BackendResponse, SubQueryCall};
use crate::config::SubQueryConfig;
use crate::error::{RlmError, RlmResult};
use crate::types::TokenUsage;

pub struct ApiBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_output_tokens: u32,
    timeout: Duration,
}

impl ApiBackend {
    pub fn from_config(config: &SubQueryConfig) -> RlmResult<Self> {
        let client = Client::builder().timeout(config.api_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            max_output_tokens: config.max_output_tokens,
            timeout: config.api_timeout(),
        })
    }

    fn build_body(&self, call: &SubQueryCall<'_>) -> serde_json::Value {
        let mut messages = Vec::new();
        if !call.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": call.system_prompt}));
        }
        messages.push(json!({"role": "user", "content": call.user_message()}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if self.max_output_tokens > 0 {
            body["max_tokens"] = json!(self.max_output_tokens);
        }
        body
    }
}

fn parse_response(data: &serde_json::Value) -> RlmResult<BackendResponse> {
    let text = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| RlmError::Backend {
            backend: "api".into(),
            message: "response has no choices[0].message.content".into(),
        })?;

    let usage = data.get("usage").map(|u| {
        TokenUsage::new(
            u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        )
    });

    Ok(BackendResponse {
        text: text.to_string(),
        usage,
        cost_usd: None,
    })
}

#[async_trait]
impl BackendAdapter for ApiBackend {
    fn name(&self) -> &str {
        "api"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, call: SubQueryCall<'_>) -> RlmResult<BackendResponse> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RlmError::BackendUnavailable(
                "api backend needs RLM_SUB_QUERY_API_KEY or OPENAI_API_KEY".into(),
            )
        })?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&call);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RlmError::BackendTimeout {
                        backend: "api".into(),
                        timeout: self.timeout,
                    }
                } else {
                    RlmError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = if status.as_u16() == 429 {
                format!("rate limited (429): {body}")
            } else {
                format!("HTTP {status}: {body}")
            };
            return Err(RlmError::Backend {
                backend: "api".into(),
                message,
            });
        }

        let data: serde_json::Value = response.json().await?;
        parse_response(&data)
    }
}
