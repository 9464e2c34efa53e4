use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::OracleError;
use crate::oracle::{CompletionRequest, Credential, Oracle};

pub fn chat_completions_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl ChatCompletionsOracle {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: chat_completions_endpoint(base_url),
            model: model.to_owned(),
        })
    }
}

#[async_trait]
impl Oracle for ChatCompletionsOracle {
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: &Credential,
    ) -> Result<String, OracleError> {
        let body = request_body(&self.model, request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(err, request.timeout))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| transport_error(err, request.timeout))?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(OracleError::RateLimited(message));
            }
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| OracleError::Transport(format!("parse completion response: {err}")))?;
        extract_message_text(&value)
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> OracleError {
    if err.is_timeout() {
        return OracleError::Timeout(timeout);
    }
    OracleError::Transport(format!("POST chat completions: {err}"))
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_text(value: &serde_json::Value) -> Result<String, OracleError> {
    let content = value
        .pointer("/choices/0/message/content")
        .ok_or_else(|| OracleError::Transport("missing `choices[0].message.content`".to_owned()))?;

    let mut text = String::new();
    match content {
        serde_json::Value::String(part) => text.push_str(part),
        serde_json::Value::Array(parts) => {
            for part in parts {
                if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                    text.push_str(part_text);
                }
            }
        }
        _ => {}
    }

    if text.trim().is_empty() {
        return Err(OracleError::EmptyOutput);
    }
    Ok(text)
}

fn request_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if !request.system.trim().is_empty() {
        messages.push(serde_json::json!({ "role": "system", "content": request.system }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": request.user }));

    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    })
}
