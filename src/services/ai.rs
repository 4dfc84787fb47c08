use rand::{thread_rng, Rng};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use std::{thread, time::Duration};

use crate::error::{Error, Result};
use crate::model::config::{LlmSettings, Provider};

/// The translation backend: system and user instructions in, raw text out.
pub trait Translator {
    fn translate(&self, system: &str, user: &str) -> Result<String>;
}

const BASE_DELAY_MS: u64 = 800;
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn backoff(attempt: usize) -> Duration {
    let jitter: u64 = thread_rng().gen_range(0..200);
    let ms = BASE_DELAY_MS * (2_u64.pow(attempt as u32)) + jitter;
    Duration::from_millis(ms)
}

fn endpoint_for(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "https://api.anthropic.com/v1/messages",
        Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
        Provider::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
    }
}

/// Blocking chat-completion client with bounded retries.
pub struct ChatClient {
    client: Client,
    settings: LlmSettings,
}

impl ChatClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {e}")))?;

        Ok(ChatClient { client, settings })
    }

    fn request(&self, system: &str, user: &str) -> RequestBuilder {
        let endpoint = endpoint_for(self.settings.provider);
        let body = request_body(&self.settings, system, user);

        let req = self.client.post(endpoint).json(&body);
        match self.settings.provider {
            Provider::Anthropic => req
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Provider::OpenAi | Provider::DeepSeek => req.bearer_auth(&self.settings.api_key),
        }
    }
}

impl Translator for ChatClient {
    fn translate(&self, system: &str, user: &str) -> Result<String> {
        let max_retries = self.settings.max_retries.max(1);
        let mut last_err = String::from("no attempt made");

        for attempt in 0..max_retries {
            let is_last = attempt + 1 >= max_retries;

            if attempt > 0 {
                warn!(attempt = attempt + 1, max_retries, error = %last_err, "retrying translation call");
            }

            let resp = match self.request(system, user).send() {
                Ok(r) => r,
                Err(err) => {
                    last_err = err.to_string();
                    if !is_last {
                        thread::sleep(backoff(attempt));
                    }
                    continue;
                }
            };

            let status = resp.status();

            // Read as text first so an error body is not lost when it is not JSON.
            let text = match resp.text() {
                Ok(t) => t,
                Err(err) => {
                    last_err = err.to_string();
                    if !is_last {
                        thread::sleep(backoff(attempt));
                    }
                    continue;
                }
            };

            if !status.is_success() {
                last_err = extract_error_message(status, &text);
                if should_retry_http(status) && !is_last {
                    thread::sleep(backoff(attempt));
                    continue;
                }
                break;
            }

            match serde_json::from_str::<Value>(&text) {
                Ok(v) => match extract_text(self.settings.provider, &v) {
                    Some(content) => {
                        debug!(chars = content.len(), "translation call succeeded");
                        return Ok(content);
                    }
                    None => last_err = "invalid response: no text content".into(),
                },
                Err(_) => last_err = "invalid JSON from translation backend".into(),
            }

            if !is_last {
                thread::sleep(backoff(attempt));
            }
        }

        Err(Error::TranslationCall(last_err))
    }
}

fn request_body(settings: &LlmSettings, system: &str, user: &str) -> Value {
    match settings.provider {
        Provider::Anthropic => json!({
            "model": settings.model,
            "max_tokens": settings.max_tokens,
            "temperature": settings.temperature,
            "system": system,
            "messages": [
                { "role": "user", "content": user }
            ]
        }),
        Provider::OpenAi | Provider::DeepSeek => json!({
            "model": settings.model,
            "max_tokens": settings.max_tokens,
            "temperature": settings.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        }),
    }
}

fn extract_text(provider: Provider, v: &Value) -> Option<String> {
    match provider {
        Provider::Anthropic => {
            let parts: Vec<&str> = v
                .get("content")?
                .as_array()?
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.concat())
            }
        }
        Provider::OpenAi | Provider::DeepSeek => v
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string),
    }
}

fn should_retry_http(status: StatusCode) -> bool {
    // 408/429/5xx are usually transient (including Anthropic's 529 "overloaded").
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn extract_error_message(status: StatusCode, body_text: &str) -> String {
    // Common shapes: { "error": { "message": "..." } } or { "message": "..." }
    if let Ok(v) = serde_json::from_str::<Value>(body_text) {
        if let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return format!("HTTP {}: {}", status.as_u16(), msg);
        }
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return format!("HTTP {}: {}", status.as_u16(), msg);
        }
    }

    let trimmed = body_text.trim();
    let snippet = if trimmed.chars().count() > 400 {
        let cut: String = trimmed.chars().take(400).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    };

    format!("HTTP {}: {}", status.as_u16(), snippet)
}
