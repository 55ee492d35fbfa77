use crate::domain::errors::ModelError;
use async_trait::async_trait;

/// Whether an utterance is a trade order or general conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    Trade,
    Conversation,
}

/// The model's unvalidated guess at a trade instruction. Fields the model
/// could not hear are `None`; quantity arrives as a raw JSON number and is
/// validated downstream.
#[derive(Debug, Clone, Default)]
pub struct RawIntent {
    pub action: Option<String>,
    pub ticker: Option<String>,
    pub quantity: Option<f64>,
    pub confidence: f64,
}

/// One line of a client's holdings, preformatted for prompt context.
#[derive(Debug, Clone)]
pub struct PositionLine {
    pub ticker: String,
    pub quantity: i64,
    pub value: f64,
    pub profit_loss_percent: f64,
}

/// Client context handed to script generation.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub name: String,
    pub portfolio_value: f64,
    pub cash_balance: f64,
    pub positions: Vec<PositionLine>,
    pub recent_trades: String,
}

/// Market context handed to script generation, already rendered as
/// speakable strings ("5,432.10 (0.45%)").
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub sp500: String,
    pub dow: String,
    pub nasdaq: String,
}

/// Result of a trade attempt, for rendering the broker's spoken reply.
#[derive(Debug, Clone)]
pub enum TradeOutcome {
    Executed { price: f64 },
    Rejected { message: String },
}

/// The language-understanding boundary: utterance classification, intent
/// extraction, and broker-persona script generation. Purely a translation
/// step with no side effects, so callers may retry on transient failure.
#[async_trait]
pub trait BrokerModel: Send + Sync {
    fn name(&self) -> &str;

    async fn classify_utterance(&self, utterance: &str) -> Result<UtteranceKind, ModelError>;

    async fn extract_intent(&self, utterance: &str) -> Result<RawIntent, ModelError>;

    async fn broker_intro(
        &self,
        client: &ClientSnapshot,
        market: &MarketSnapshot,
    ) -> Result<String, ModelError>;

    async fn trade_reply(
        &self,
        action: &str,
        ticker: &str,
        quantity: i64,
        outcome: &TradeOutcome,
    ) -> Result<String, ModelError>;

    async fn conversation_reply(
        &self,
        query: &str,
        client: &ClientSnapshot,
        market: &MarketSnapshot,
    ) -> Result<String, ModelError>;
}
