// Translation through an OpenAI-compatible chat/completions endpoint

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TranslateSettings;
use crate::services::http::RetryPolicy;

const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct TranslateClient {
    client: Client,
    settings: TranslateSettings,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: serde_json::Value,
}

/// Translated fields; `None` means "use the original text"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub title: Option<String>,
    pub plot: Option<String>,
}

impl TranslateClient {
    pub fn new(settings: TranslateSettings) -> Self {
        Self {
            client: Client::builder()
                .timeout(TRANSLATE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            settings,
            retry: RetryPolicy::once(),
        }
    }

    fn completions_url(&self) -> Option<String> {
        let base = self.settings.api_base.trim().trim_end_matches('/');
        if base.is_empty() {
            None
        } else {
            Some(format!("{}/chat/completions", base))
        }
    }

    /// Translate the enabled fields. Failures are logged and yield `None` for that field.
    pub async fn translate_scene(&self, title: &str, plot: &str) -> Translation {
        if !self.settings.is_active() {
            return Translation::default();
        }

        let title = if self.settings.translate_title && !title.trim().is_empty() {
            self.translate(title, "title").await
        } else {
            None
        };

        let plot = if self.settings.translate_plot && !plot.trim().is_empty() {
            self.translate(plot, "plot").await
        } else {
            None
        };

        Translation { title, plot }
    }

    /// Translate a single text; never errors
    pub async fn translate(&self, text: &str, field: &str) -> Option<String> {
        let Some(url) = self.completions_url() else {
            tracing::error!("[translator] Missing API base URL, skipping {} translation", field);
            return None;
        };
        if self.settings.api_key.is_empty() || self.settings.model.is_empty() {
            tracing::error!("[translator] Missing API key or model, skipping {} translation", field);
            return None;
        }

        let label = format!("Translate {}", field);
        match self.retry.run(&label, || self.request(&url, text)).await {
            Ok(translated) if !translated.is_empty() => {
                tracing::debug!("[translator] {}: {:?} -> {:?}", field, text, translated);
                Some(translated)
            }
            Ok(_) => {
                tracing::warn!("[translator] Empty {} translation, keeping original", field);
                None
            }
            Err(e) => {
                tracing::error!("[translator] {} translation failed: {:#}", field, e);
                None
            }
        }
    }

    async fn request(&self, url: &str, text: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.settings.prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call translation API")?;

        if !response.status().is_success() {
            anyhow::bail!("Translation API returned {}", response.status());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse translation response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Translation response has no choices")?;

        // Some gateways wrap content in an object; fall back to its JSON text
        let text = match content {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => anyhow::bail!("Translation response content is null"),
            other => other.to_string(),
        };
        Ok(text.trim().to_string())
    }
}
