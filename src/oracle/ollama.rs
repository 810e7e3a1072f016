//! Ollama-compatible HTTP backend.
//!
//! Speaks the `/api/generate` protocol but tolerates the response
//! shapes of chat-style and OpenAI-compatible servers too, so pointing
//! the endpoint at a different local gateway keeps working.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::OracleError;
use crate::oracle::{GenerationOptions, Oracle};

pub struct OllamaOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: RequestOptions,
}

#[derive(Serialize)]
struct RequestOptions {
    num_ctx: u32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl OllamaOracle {
    pub fn new(endpoint: String, model: String, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::RequestFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(OllamaOracle {
            client,
            endpoint,
            model,
            timeout,
        })
    }
}

#[async_trait]
impl Oracle for OllamaOracle {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, OracleError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: RequestOptions {
                num_ctx: options.context_size,
                num_predict: options.max_output_tokens,
                temperature: options.temperature,
            },
        };

        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            num_ctx = options.context_size,
            "sending generation request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout)
                } else {
                    OracleError::RequestFailed {
                        endpoint: self.endpoint.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::RequestFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(OracleError::Http {
                status: status.as_u16(),
                body: body.chars().take(800).collect(),
            });
        }

        let data: Value = serde_json::from_str(&body)?;
        let (text, source) = extract_text(&data);
        debug!(source, length = text.len(), "extracted model response");

        let trimmed = text.trim();
        if trimmed.is_empty() {
            // A known field holding nothing is an empty generation; a
            // body without any known field is the wrong protocol.
            return Err(if has_text_field(&data) {
                OracleError::Empty
            } else {
                OracleError::InvalidResponse(body.chars().take(200).collect())
            });
        }
        Ok(trimmed.to_string())
    }
}

/// Pull the generated text out of whatever response shape the server
/// used. `thinking` is a last resort: some models put everything into
/// the reasoning field and leave the response empty; that text is
/// still repairable downstream.
fn extract_text(data: &Value) -> (String, &'static str) {
    let candidates: [(&'static str, Option<&str>); 8] = [
        (
            "message.content",
            data.pointer("/message/content").and_then(Value::as_str),
        ),
        (
            "choices.message.content",
            data.pointer("/choices/0/message/content")
                .and_then(Value::as_str),
        ),
        (
            "choices.text",
            data.pointer("/choices/0/text").and_then(Value::as_str),
        ),
        ("response", data.get("response").and_then(Value::as_str)),
        ("output", data.get("output").and_then(Value::as_str)),
        ("content", data.get("content").and_then(Value::as_str)),
        ("text", data.get("text").and_then(Value::as_str)),
        ("thinking", data.get("thinking").and_then(Value::as_str)),
    ];
    for (source, text) in candidates {
        if let Some(t) = text
            && !t.trim().is_empty()
        {
            return (t.to_string(), source);
        }
    }
    (String::new(), "none")
}

/// Whether the response carries any of the text fields we know,
/// regardless of content.
fn has_text_field(data: &Value) -> bool {
    ["response", "output", "content", "text", "thinking"]
        .iter()
        .any(|key| data.get(key).is_some())
        || data.pointer("/message/content").is_some()
        || data.pointer("/choices/0").is_some()
}
