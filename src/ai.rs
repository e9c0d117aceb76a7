//! Optional AI usage analysis.
//!
//! Summarises recent utility bills into a prompt and sends it to an
//! OpenAI-compatible chat-completions endpoint. Which endpoint (hosted
//! OpenAI or a local LM Studio style server) comes from the settings store.
//! Produces advisory text only; never mutates core entities.

use chrono::{Duration, Local};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::entities::utility;
use crate::error::{AppError, Result};
use crate::settings;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

const SYSTEM_PROMPT: &str = "You are a helpful assistant analyzing home utility bill data. \
Provide insights into usage patterns, predict potential future trends (next month estimate \
if possible), and suggest practical cost-saving recommendations based ONLY on the provided \
data. Be concise and format your response clearly, perhaps using sections for Patterns, \
Predictions, and Recommendations.";

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

impl AiConfig {
    /// Resolves the provider from settings. `Validation` when analysis is
    /// disabled or the chosen provider is missing its key/endpoint.
    pub fn from_settings(conn: &Connection) -> Result<AiConfig> {
        let provider = settings::get_value(conn, "ai_provider")?.unwrap_or_default();
        match provider.as_str() {
            "openai" => {
                let api_key = settings::get_value(conn, "openai_api_key")?.ok_or_else(|| {
                    AppError::validation(
                        "AI provider 'openai' is configured but no API key is set in Settings",
                    )
                })?;
                let model = settings::get_value(conn, "local_llm_model_name")?
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
                Ok(AiConfig {
                    endpoint: OPENAI_ENDPOINT.to_string(),
                    api_key,
                    model,
                })
            }
            "local" => {
                let endpoint = settings::get_value(conn, "local_llm_endpoint")?.ok_or_else(|| {
                    AppError::validation(
                        "AI provider 'local' is configured but no endpoint is set in Settings",
                    )
                })?;
                let model = settings::get_value(conn, "local_llm_model_name")?
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
                Ok(AiConfig {
                    endpoint,
                    api_key: "not-needed".to_string(),
                    model,
                })
            }
            _ => Err(AppError::validation(
                "AI analysis is disabled. Please configure an AI provider in Settings.",
            )),
        }
    }
}

/// Plain-text summary of bills whose billing period ended within the last
/// `months` months. `None` when there is nothing to analyze.
pub fn usage_summary(conn: &Connection, months: i64) -> Result<Option<String>> {
    let cutoff = Local::now().date_naive() - Duration::days(months * 30);
    let bills = utility::list_bills_ending_since(conn, cutoff)?;
    if bills.is_empty() {
        return Ok(None);
    }

    let mut summary = String::from("Recent Utility Bills:\n");
    for bill in &bills {
        summary.push_str(&format!(
            "- {}: {} to {}, Amount: ${:.2}",
            bill.category_name.as_deref().unwrap_or("Unknown Category"),
            bill.billing_period_start,
            bill.billing_period_end,
            bill.total_amount
        ));
        if let Some(usage) = &bill.usage_data {
            summary.push_str(&format!(", Usage: {}", usage));
        }
        summary.push('\n');
    }
    Ok(Some(summary))
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Sends the usage summary to the configured provider and returns the
/// analysis text.
pub async fn analyze(config: &AiConfig, summary: &str) -> Result<String> {
    let request = ChatRequest {
        model: config.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "Here is the recent utility bill data:\n{}\nPlease analyze this data.",
                    summary
                ),
            },
        ],
        max_tokens: 500,
        temperature: 0.5,
    };

    let client = reqwest::Client::new();
    let response = client
        .post(&config.endpoint)
        .bearer_auth(&config.api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| {
            AppError::Upstream(format!(
                "Could not connect to the AI provider endpoint: {}",
                e
            ))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!(
            "AI provider returned {}: {}",
            status, body
        )));
    }

    let parsed: ChatResponse = response.json().await.map_err(|e| {
        AppError::Upstream(format!("Unexpected response from AI provider: {}", e))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.trim().to_string())
        .ok_or_else(|| AppError::Upstream("AI provider returned no choices".to_string()))
}
