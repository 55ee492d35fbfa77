//! Gemini model client
//!
//! Implements the `BrokerModel` boundary over the Gemini REST API with a
//! long-lived pooled HTTP client. The model is asked for strict outputs
//! (a single word for classification, a JSON object for extraction), and
//! responses are defensively cleaned before parsing. Confidence is derived
//! from the finish reason and response shape, since the API does not
//! report a calibrated score.

use crate::domain::errors::ModelError;
use crate::domain::repositories::broker_model::{
    BrokerModel, ClientSnapshot, MarketSnapshot, RawIntent, TradeOutcome, UtteranceKind,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: GEMINI_ENDPOINT.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_key: String, base_url: String) -> Self {
        let mut client = Self::new(api_key);
        client.base_url = base_url;
        client
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<(String, f64), ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::NotConfigured);
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        };

        debug!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                ModelError::CallFailed(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(ModelError::CallFailed(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            ModelError::Malformed(format!("Gemini parse error: {}", e))
        })?;

        let Some(candidate) = gemini_response.candidates.first() else {
            return Err(ModelError::Malformed("No candidates in response".to_string()));
        };

        let text = candidate
            .content
            .parts
            .first()
            .ok_or_else(|| ModelError::Malformed("Empty response from Gemini".to_string()))?
            .text
            .clone();

        let confidence = calculate_confidence(&gemini_response);
        info!("Gemini response received (confidence: {:.2})", confidence);

        Ok((text, confidence))
    }
}

#[async_trait]
impl BrokerModel for GeminiClient {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn classify_utterance(&self, utterance: &str) -> Result<UtteranceKind, ModelError> {
        let prompt = format!(
            "Classify the following statement from a client as either:\n\
             1. A TRADE order (intent to buy or sell stocks)\n\
             2. A CONVERSATION about markets, portfolio, advice, etc.\n\n\
             Client statement: \"{}\"\n\n\
             Output only \"TRADE\" or \"CONVERSATION\" based on your classification.",
            utterance
        );

        let (text, _) = self.generate(BROKER_PERSONA, &prompt).await?;
        let normalized = text.trim().to_uppercase();

        if normalized.contains("CONVERSATION") {
            Ok(UtteranceKind::Conversation)
        } else if normalized.contains("TRADE") {
            Ok(UtteranceKind::Trade)
        } else {
            Err(ModelError::Malformed(format!(
                "Unexpected classification: {}",
                text.trim()
            )))
        }
    }

    async fn extract_intent(&self, utterance: &str) -> Result<RawIntent, ModelError> {
        let prompt = format!(
            "Parse the following statement from a client into a trading action. \
             Extract the following fields:\n\
             - action: buy or sell\n\
             - ticker: the stock symbol\n\
             - quantity: the number of shares\n\n\
             Client statement: \"{}\"\n\n\
             Output the result as a JSON object with the fields: action, ticker, quantity.\n\
             If any field is missing or unclear, mark it as null.",
            utterance
        );

        let (text, confidence) = self.generate(BROKER_PERSONA, &prompt).await?;
        let cleaned = strip_code_fences(&text);

        let parsed: ExtractedIntent = serde_json::from_str(cleaned).map_err(|e| {
            ModelError::Malformed(format!("Intent JSON parse error: {} in '{}'", e, cleaned))
        })?;

        Ok(RawIntent {
            action: parsed.action,
            ticker: parsed.ticker,
            quantity: parsed.quantity,
            confidence,
        })
    }

    async fn broker_intro(
        &self,
        client: &ClientSnapshot,
        market: &MarketSnapshot,
    ) -> Result<String, ModelError> {
        let prompt = format!(
            "CURRENT MARKET DATA:\n\
             S&P 500: {}\nDow Jones: {}\nNasdaq: {}\n\n\
             CLIENT INFO:\nName: {}\nPortfolio value: ${:.2}\nCash balance: ${:.2}\n\n\
             PORTFOLIO POSITIONS:\n{}\n\n\
             RECENT TRADES:\n{}\n\n\
             INSTRUCTIONS:\n\
             1. Generate a personalized greeting that addresses the client by name\n\
             2. Give a quick, punchy summary of the market's current state using one key index\n\
             3. Comment briefly on the client's portfolio or recent trades\n\
             4. Ask how you can help them today\n\n\
             Keep it conversational and energetic, 4-6 sentences maximum.",
            market.sp500,
            market.dow,
            market.nasdaq,
            client.name,
            client.portfolio_value,
            client.cash_balance,
            format_positions(client),
            client.recent_trades,
        );

        let (text, _) = self.generate(BROKER_PERSONA, &prompt).await?;
        Ok(text.trim().to_string())
    }

    async fn trade_reply(
        &self,
        action: &str,
        ticker: &str,
        quantity: i64,
        outcome: &TradeOutcome,
    ) -> Result<String, ModelError> {
        let outcome_text = match outcome {
            TradeOutcome::Executed { price } => {
                format!("The trade succeeded at ${:.2}. Be congratulatory.", price)
            }
            TradeOutcome::Rejected { message } => format!(
                "The trade failed because: {}. Explain briefly in a sympathetic but upbeat way.",
                message
            ),
        };

        let prompt = format!(
            "Generate a brief, energetic response to your client after they wanted to {} {} \
             shares of {}.\n{}\n\
             Keep it to 1-2 short sentences.",
            action, quantity, ticker, outcome_text
        );

        let (text, _) = self.generate(BROKER_PERSONA, &prompt).await?;
        Ok(text.trim().to_string())
    }

    async fn conversation_reply(
        &self,
        query: &str,
        client: &ClientSnapshot,
        market: &MarketSnapshot,
    ) -> Result<String, ModelError> {
        let prompt = format!(
            "CLIENT INFO:\nName: {}\nPortfolio value: ${:.2}\nCash balance: ${:.2}\n\n\
             PORTFOLIO POSITIONS:\n{}\n\n\
             CURRENT MARKET DATA:\n\
             S&P 500: {}\nDow Jones: {}\nNasdaq: {}\n\n\
             Your client has asked: \"{}\"\n\n\
             Respond in your broker character with market insight or commentary. \
             Address them by name. Keep it concise (2-3 sentences) and conversational.",
            client.name,
            client.portfolio_value,
            client.cash_balance,
            format_positions(client),
            market.sp500,
            market.dow,
            market.nasdaq,
            query,
        );

        let (text, _) = self.generate(BROKER_PERSONA, &prompt).await?;
        Ok(text.trim().to_string())
    }
}

const BROKER_PERSONA: &str = "You are WOLF, an AI stock broker with the personality of a 1980s \
Wall Street broker - confident, sharp, and a bit aggressive but professional. You use \
period-appropriate slang, speak in short punchy sentences, always address the client by name, \
and are knowledgeable about markets and trading.";

fn format_positions(client: &ClientSnapshot) -> String {
    if client.positions.is_empty() {
        return "No current positions.".to_string();
    }
    client
        .positions
        .iter()
        .map(|p| {
            let status = if p.profit_loss_percent > 0.0 {
                "profitable"
            } else {
                "at a loss"
            };
            format!(
                "{}: {} shares worth ${:.2} ({:.2}% {})",
                p.ticker, p.quantity, p.value, p.profit_loss_percent, status
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Models love wrapping JSON in markdown fences; strip them before parsing.
fn strip_code_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ExtractedIntent {
    action: Option<String>,
    ticker: Option<String>,
    quantity: Option<f64>,
}

/// Derive a confidence score from finish reason and response shape.
fn calculate_confidence(response: &GeminiResponse) -> f64 {
    let base_confidence: f64 = 0.85;

    let finish_confidence = match response.candidates[0].finish_reason.as_deref() {
        Some("STOP") => 1.0,
        Some("LENGTH") => 0.8,
        Some("SAFETY") => 0.6,
        _ => 0.7,
    };

    let response_length = response.candidates[0]
        .content
        .parts
        .first()
        .map(|p| p.text.len())
        .unwrap_or(0);

    let length_confidence = if response_length < 4 { 0.6 } else { 1.0 };

    (base_confidence * finish_confidence * length_confidence).clamp(0.5, 0.98)
}
