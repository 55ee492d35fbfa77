//! Voice Trade Intent Parser
//!
//! Turns one recognized utterance into a validated trade instruction, a
//! clarification request, or a not-trade-related signal. The parser has no
//! side effects, so model calls are retried freely; after the retry budget
//! it degrades to keyword extraction rather than dropping the utterance.

use crate::config::IntentConfig;
use crate::domain::entities::trade::TradeAction;
use crate::domain::errors::TradeRejection;
use crate::domain::repositories::broker_model::{BrokerModel, RawIntent, UtteranceKind};
use crate::domain::services::ticker_directory;
use crate::domain::value_objects::{shares::Shares, ticker::Ticker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between model retry attempts
const MODEL_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Confidence assigned to keyword-extracted intents (the fallback path has
/// no model to report one)
const KEYWORD_CONFIDENCE: f64 = 0.8;

/// A fully validated trade instruction, ready for the execution engine.
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub action: TradeAction,
    pub ticker: Ticker,
    pub shares: Shares,
    pub confidence: f64,
}

/// Fields heard so far across an utterance and its clarifications. A
/// follow-up like "make it twenty shares" fills the gaps of the prior
/// partial instead of starting over.
#[derive(Debug, Clone, Default)]
pub struct PartialIntent {
    pub action: Option<TradeAction>,
    pub ticker: Option<Ticker>,
    pub quantity: Option<f64>,
}

impl PartialIntent {
    pub fn is_empty(&self) -> bool {
        self.action.is_none() && self.ticker.is_none() && self.quantity.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// A usable intent at or above the confidence threshold.
    Intent(TradeIntent),
    /// Something was missing or uncertain; `partial` carries what was heard
    /// so the next utterance can complete it.
    NeedsClarification {
        prompt: String,
        partial: PartialIntent,
    },
    /// Not trade-related (small talk, market questions).
    NoIntent,
    /// Validation failed in a way clarification cannot fix wholesale
    /// (unknown symbol, nonsense quantity).
    Rejected(TradeRejection),
}

pub struct IntentParser {
    model: Arc<dyn BrokerModel>,
    config: IntentConfig,
}

impl IntentParser {
    pub fn new(model: Arc<dyn BrokerModel>, config: IntentConfig) -> Self {
        Self { model, config }
    }

    /// Parse one utterance. `prior` is the partial intent from an earlier
    /// clarification round, if any.
    pub async fn parse(&self, utterance: &str, prior: Option<&PartialIntent>) -> ParseOutcome {
        let kind = match self.classify_with_retries(utterance).await {
            Some(kind) => kind,
            None => {
                // Model is down; the keyword path classifies too
                warn!("Classification budget exhausted, using keyword parsing");
                let raw = keyword_parse(utterance);
                if raw.action.is_none()
                    && raw.ticker.is_none()
                    && raw.quantity.is_none()
                    && prior.is_none()
                {
                    return ParseOutcome::NoIntent;
                }
                return self.validate(raw, prior);
            }
        };

        if kind == UtteranceKind::Conversation && prior.is_none() {
            debug!("Utterance classified as conversation: {}", utterance);
            return ParseOutcome::NoIntent;
        }

        let raw = match self.extract_with_retries(utterance).await {
            Some(raw) => raw,
            None => {
                warn!("Extraction budget exhausted, using keyword parsing");
                keyword_parse(utterance)
            }
        };

        self.validate(raw, prior)
    }

    async fn classify_with_retries(&self, utterance: &str) -> Option<UtteranceKind> {
        for attempt in 1..=self.config.model_max_attempts {
            match self.model.classify_utterance(utterance).await {
                Ok(kind) => return Some(kind),
                Err(e) => {
                    warn!(
                        "Utterance classification failed (attempt {}/{}): {}",
                        attempt, self.config.model_max_attempts, e
                    );
                    if attempt < self.config.model_max_attempts {
                        tokio::time::sleep(MODEL_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }

    async fn extract_with_retries(&self, utterance: &str) -> Option<RawIntent> {
        for attempt in 1..=self.config.model_max_attempts {
            match self.model.extract_intent(utterance).await {
                Ok(raw) => return Some(raw),
                Err(e) => {
                    warn!(
                        "Intent extraction failed (attempt {}/{}): {}",
                        attempt, self.config.model_max_attempts, e
                    );
                    if attempt < self.config.model_max_attempts {
                        tokio::time::sleep(MODEL_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }

    /// Merge with the prior partial, then validate field by field.
    fn validate(&self, raw: RawIntent, prior: Option<&PartialIntent>) -> ParseOutcome {
        let mut partial = PartialIntent::default();

        partial.action = raw
            .action
            .as_deref()
            .and_then(TradeAction::parse)
            .or_else(|| prior.and_then(|p| p.action));

        // Resolve before merging so a freshly-heard symbol wins over a
        // stale prior one.
        let heard_ticker = raw.ticker.as_deref().map(str::to_string);
        partial.ticker = match heard_ticker {
            Some(heard) => match ticker_directory::resolve(&heard) {
                Some(ticker) => Some(ticker),
                None => {
                    info!("Unresolvable ticker in utterance: {}", heard);
                    return ParseOutcome::Rejected(TradeRejection::UnresolvableTicker {
                        ticker: heard,
                    });
                }
            },
            None => prior.and_then(|p| p.ticker.clone()),
        };

        partial.quantity = raw.quantity.or_else(|| prior.and_then(|p| p.quantity));

        let Some(action) = partial.action else {
            return ParseOutcome::NeedsClarification {
                prompt: "Did you want to buy or sell?".to_string(),
                partial,
            };
        };

        let Some(ticker) = partial.ticker.clone() else {
            return ParseOutcome::NeedsClarification {
                prompt: format!("Which stock did you want to {}?", action),
                partial,
            };
        };

        let Some(quantity) = partial.quantity else {
            return ParseOutcome::NeedsClarification {
                prompt: format!("How many shares of {} should I {}?", ticker, action),
                partial,
            };
        };

        let shares = match Shares::from_f64(quantity) {
            Ok(shares) => shares,
            Err(e) => {
                info!("Invalid quantity in utterance: {}", quantity);
                return ParseOutcome::Rejected(TradeRejection::InvalidQuantity {
                    detail: e.to_string(),
                });
            }
        };

        if raw.confidence < self.config.confidence_threshold {
            debug!(
                "Intent confidence {:.2} below threshold {:.2}",
                raw.confidence, self.config.confidence_threshold
            );
            return ParseOutcome::NeedsClarification {
                prompt: format!(
                    "Just to confirm: {} {} shares of {}?",
                    action, shares, ticker
                ),
                partial,
            };
        }

        ParseOutcome::Intent(TradeIntent {
            action,
            ticker,
            shares,
            confidence: raw.confidence,
        })
    }
}

/// Keyword-based extraction used when the model is unavailable. Mirrors the
/// model contract: conversation detection first, then action / ticker /
/// quantity scavenging.
fn keyword_parse(utterance: &str) -> RawIntent {
    let text = utterance.to_lowercase();

    const CONVERSATION_KEYWORDS: [&str; 14] = [
        "what", "how", "when", "why", "tell me", "explain", "opinion", "thoughts", "think",
        "advice", "suggest", "recommend", "prediction", "forecast",
    ];
    if CONVERSATION_KEYWORDS.iter().any(|k| text.contains(k)) {
        debug!("Keyword parsing detected conversation: {}", utterance);
        return RawIntent::default();
    }

    let action = if text.contains("buy") {
        Some("buy".to_string())
    } else if text.contains("sell") || text.contains("sale") {
        Some("sell".to_string())
    } else {
        None
    };

    let ticker = text
        .split_whitespace()
        .find_map(|word| ticker_directory::resolve(word))
        .map(|t| t.as_str().to_string());

    let quantity = text
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| ",.!?".contains(c)))
        .find_map(|word| word.parse::<i64>().ok())
        .map(|n| n as f64);

    debug!(
        "Keyword parsing found: action={:?}, ticker={:?}, quantity={:?}",
        action, ticker, quantity
    );

    RawIntent {
        action,
        ticker,
        quantity,
        confidence: KEYWORD_CONFIDENCE,
    }
}
