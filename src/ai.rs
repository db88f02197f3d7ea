//! Reply text generation through an OpenAI-compatible chat gateway.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;

const SYSTEM_PROMPT: &str = "你是一个乐于助人的中文论坛用户。";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
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
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Generates short forum replies from thread context.
pub struct ReplyGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ReplyGenerator {
    /// Build a generator from the AI section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build AI HTTP client")?;

        Ok(Self {
            client,
            base_url: config.ai_base_url.trim_end_matches('/').to_string(),
            api_key: config.ai_api_key.clone(),
            model: config.ai_model.clone(),
            temperature: config.ai_temperature,
            max_tokens: config.ai_max_tokens,
        })
    }

    /// Generate a short Chinese reply for the given thread context, with the
    /// configured signature appended when present.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway call fails or yields an empty reply.
    pub async fn generate_reply(&self, context: &str, signature: &str) -> Result<String> {
        let prompt = format!(
            "请根据下述帖子内容，以自然、友好的语气生成一条简短中文回复。\
             避免违禁词、避免重复、避免灌水口水话，最多100字。\n\n\
             帖子内容：\n{context}\n\n回复："
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.context("Failed to call AI gateway")?;
        if !response.status().is_success() {
            anyhow::bail!("AI gateway returned status {}", response.status());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse AI gateway response")?;

        let text = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string();

        if text.is_empty() {
            anyhow::bail!("AI gateway returned an empty reply");
        }

        if signature.is_empty() {
            Ok(text)
        } else {
            Ok(format!("{text}\n\n{signature}"))
        }
    }
}
