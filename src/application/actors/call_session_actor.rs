//! Call Session Actor
//!
//! One actor per live call. The mailbox is the concurrency contract: at
//! most one utterance is in flight per session, and both transcript lines
//! (the user's words and the broker's reply) are appended before the next
//! message is taken. Different calls run in their own actors and never
//! block each other.

use crate::domain::entities::transcript::{Speaker, TranscriptEntry};
use crate::domain::errors::ExecutionError;
use crate::domain::repositories::broker_model::{
    BrokerModel, ClientSnapshot, MarketSnapshot, TradeOutcome,
};
use crate::domain::services::intent::{IntentParser, ParseOutcome, PartialIntent};
use crate::domain::services::market_data::{Freshness, MarketDataService};
use crate::domain::services::scripts;
use crate::application::services::execution_engine::ExecutionEngine;
use crate::application::services::portfolio_service::PortfolioService;
use crate::persistence::repository::TranscriptRepository;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the voice gateway should speak next, and whether to keep listening.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SpokenReply {
    pub say: String,
    pub gather: bool,
}

impl SpokenReply {
    pub fn gather(say: String) -> Self {
        SpokenReply { say, gather: true }
    }

    pub fn hangup(say: String) -> Self {
        SpokenReply { say, gather: false }
    }
}

#[derive(Debug)]
pub enum CallActorMessage {
    /// The provider connected the call and wants the opening script.
    Intro { reply: mpsc::Sender<SpokenReply> },
    /// One recognized utterance from the caller.
    Utterance {
        text: String,
        reply: mpsc::Sender<SpokenReply>,
    },
    /// The call ended; drain and stop.
    Hangup,
}

/// Shared collaborators handed to every session actor.
#[derive(Clone)]
pub struct CallActorDeps {
    pub parser: Arc<IntentParser>,
    pub engine: Arc<ExecutionEngine>,
    pub portfolio: Arc<PortfolioService>,
    pub market: Arc<MarketDataService>,
    pub model: Arc<dyn BrokerModel>,
    pub transcripts: Arc<TranscriptRepository>,
}

pub struct CallSessionActor {
    session_id: String,
    user_id: String,
    deps: CallActorDeps,
    /// Partial intent carried across clarification rounds
    pending: Option<PartialIntent>,
}

impl CallSessionActor {
    /// Spawn the actor for one call session.
    pub fn spawn(session_id: String, user_id: String, deps: CallActorDeps) -> mpsc::Sender<CallActorMessage> {
        let (tx, rx) = mpsc::channel(16);

        let actor = Self {
            session_id: session_id.clone(),
            user_id,
            deps,
            pending: None,
        };

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        info!("Call actor spawned for session {}", session_id);
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<CallActorMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                CallActorMessage::Intro { reply } => {
                    let spoken = self.handle_intro().await;
                    if let Err(e) = reply.send(spoken).await {
                        error!("Failed to send intro reply: {:?}", e);
                    }
                }
                CallActorMessage::Utterance { text, reply } => {
                    let spoken = self.handle_utterance(&text).await;
                    if let Err(e) = reply.send(spoken).await {
                        error!("Failed to send utterance reply: {:?}", e);
                    }
                }
                CallActorMessage::Hangup => {
                    debug!("Call actor for session {} hanging up", self.session_id);
                    break;
                }
            }
        }

        info!("Call actor stopped for session {}", self.session_id);
    }

    /// Opening script: portfolio and market context rendered through the
    /// broker persona, with a template fallback so the call never opens on
    /// silence.
    async fn handle_intro(&mut self) -> SpokenReply {
        let client = self.client_snapshot().await;
        let market = self.market_snapshot().await;

        let intro = match self.deps.model.broker_intro(&client, &market).await {
            Ok(script) => script,
            Err(e) => {
                warn!("Broker intro generation failed: {}", e);
                scripts::fallback_intro(&client.name)
            }
        };

        self.append_transcript(Speaker::Broker, &intro).await;
        SpokenReply::gather(intro)
    }

    async fn handle_utterance(&mut self, text: &str) -> SpokenReply {
        self.append_transcript(Speaker::User, text).await;

        let outcome = self.deps.parser.parse(text, self.pending.as_ref()).await;

        let response = match outcome {
            ParseOutcome::NoIntent => {
                let client = self.client_snapshot().await;
                let market = self.market_snapshot().await;
                match self
                    .deps
                    .model
                    .conversation_reply(text, &client, &market)
                    .await
                {
                    Ok(script) => script,
                    Err(e) => {
                        warn!("Conversation reply generation failed: {}", e);
                        scripts::fallback_conversation_reply()
                    }
                }
            }
            ParseOutcome::NeedsClarification { prompt, partial } => {
                debug!(
                    "Session {} needs clarification: {}",
                    self.session_id, prompt
                );
                self.pending = if partial.is_empty() { None } else { Some(partial) };
                prompt
            }
            ParseOutcome::Rejected(rejection) => {
                info!("Session {} intent rejected: {}", self.session_id, rejection);
                self.pending = None;
                format!("No can do, {}. Want to try something else?", rejection)
            }
            ParseOutcome::Intent(intent) => {
                self.pending = None;
                let action = intent.action.as_str().to_string();
                let ticker = intent.ticker.as_str().to_string();
                let quantity = intent.shares.value();

                let outcome = match self
                    .deps
                    .engine
                    .execute(&self.user_id, &intent, Some(&self.session_id))
                    .await
                {
                    Ok(trade) => TradeOutcome::Executed { price: trade.price },
                    Err(ExecutionError::Rejected(rejection)) => TradeOutcome::Rejected {
                        message: rejection.to_string(),
                    },
                    Err(ExecutionError::Internal(e)) => {
                        error!("Trade execution fault in session {}: {}", self.session_id, e);
                        TradeOutcome::Rejected {
                            message: "trouble at the trading desk".to_string(),
                        }
                    }
                };

                match self
                    .deps
                    .model
                    .trade_reply(&action, &ticker, quantity, &outcome)
                    .await
                {
                    Ok(script) => script,
                    Err(e) => {
                        warn!("Trade reply generation failed: {}", e);
                        scripts::fallback_trade_reply(&action, &ticker, quantity, &outcome)
                    }
                }
            }
        };

        self.append_transcript(Speaker::Broker, &response).await;
        SpokenReply::gather(response)
    }

    async fn append_transcript(&self, speaker: Speaker, content: &str) {
        let entry = TranscriptEntry::new(self.session_id.clone(), speaker, content.to_string());
        if let Err(e) = self.deps.transcripts.append(&entry).await {
            // The call keeps going; a lost log line is better than a dead line
            error!("Failed to append transcript entry: {}", e);
        }
    }

    async fn client_snapshot(&self) -> ClientSnapshot {
        match self.deps.portfolio.summary(&self.user_id, false).await {
            Ok(summary) => summary.client_snapshot(),
            Err(e) => {
                warn!("Portfolio summary unavailable for intro: {}", e);
                ClientSnapshot {
                    name: "buddy".to_string(),
                    portfolio_value: 0.0,
                    cash_balance: 0.0,
                    positions: vec![],
                    recent_trades: "No recent trades.".to_string(),
                }
            }
        }
    }

    async fn market_snapshot(&self) -> MarketSnapshot {
        match self
            .deps
            .market
            .get_market_summary(Freshness::AllowCached)
            .await
        {
            Ok(summary) => summary.snapshot(),
            Err(e) => {
                warn!("Market summary unavailable: {}", e);
                MarketSnapshot {
                    sp500: "Unknown".to_string(),
                    dow: "Unknown".to_string(),
                    nasdaq: "Unknown".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::actors::broadcaster::Broadcaster;
    use crate::config::{IntentConfig, MarketDataConfig};
    use crate::domain::errors::{FeedError, ModelError};
    use crate::domain::repositories::broker_model::{RawIntent, UtteranceKind};
    use crate::domain::repositories::quote_feed::{IndexSnapshot, QuoteFeed};
    use crate::domain::entities::call_session::CallSession;
    use crate::persistence::models::CreateAccount;
    use crate::persistence::repository::{AccountRepository, CallRepository, TradeRepository};
    use crate::persistence::{init_database, DbPool};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedFeed(f64);

    #[async_trait]
    impl QuoteFeed for FixedFeed {
        fn name(&self) -> &str {
            "FixedFeed"
        }

        async fn fetch_price(&self, _ticker: &str) -> Result<f64, FeedError> {
            Ok(self.0)
        }

        async fn fetch_index(&self, _symbol: &str) -> Result<IndexSnapshot, FeedError> {
            Ok(IndexSnapshot {
                price: 5000.0,
                change: 10.0,
                change_percent: 0.2,
            })
        }
    }

    /// Scripted model: classifies everything as trade, extracts a fixed raw
    /// intent, and fails script generation so templates are exercised.
    struct ScriptedModel {
        raw: RawIntent,
    }

    #[async_trait]
    impl BrokerModel for ScriptedModel {
        fn name(&self) -> &str {
            "ScriptedModel"
        }

        async fn classify_utterance(&self, _u: &str) -> Result<UtteranceKind, ModelError> {
            Ok(UtteranceKind::Trade)
        }

        async fn extract_intent(&self, _u: &str) -> Result<RawIntent, ModelError> {
            Ok(self.raw.clone())
        }

        async fn broker_intro(
            &self,
            _c: &ClientSnapshot,
            _m: &MarketSnapshot,
        ) -> Result<String, ModelError> {
            Err(ModelError::NotConfigured)
        }

        async fn trade_reply(
            &self,
            _a: &str,
            _t: &str,
            _q: i64,
            _o: &TradeOutcome,
        ) -> Result<String, ModelError> {
            Err(ModelError::NotConfigured)
        }

        async fn conversation_reply(
            &self,
            _q: &str,
            _c: &ClientSnapshot,
            _m: &MarketSnapshot,
        ) -> Result<String, ModelError> {
            Err(ModelError::NotConfigured)
        }
    }

    async fn setup(raw: RawIntent) -> (mpsc::Sender<CallActorMessage>, DbPool, String) {
        let pool = init_database("sqlite::memory:").await.unwrap();
        AccountRepository::new(pool.clone())
            .create(CreateAccount {
                user_id: "user-1".to_string(),
                name: "Jordan".to_string(),
                phone_number: "+14155552671".to_string(),
                cash_balance: 10000.0,
            })
            .await
            .unwrap();

        // Production always creates the call-session row (via the orchestrator)
        // before the actor runs; transcripts carry a FK to calls(id), so mirror
        // that precondition here.
        let session_id = "session-1".to_string();
        let mut session =
            CallSession::new_outbound("user-1".to_string(), "+14155552671".to_string());
        session.id = session_id.clone();
        CallRepository::new(pool.clone())
            .create(&session)
            .await
            .unwrap();

        let market = Arc::new(MarketDataService::new(
            Arc::new(FixedFeed(150.0)),
            MarketDataConfig {
                fetch_base_backoff_ms: 1,
                ..Default::default()
            },
        ));
        let model: Arc<dyn BrokerModel> = Arc::new(ScriptedModel { raw });
        let deps = CallActorDeps {
            parser: Arc::new(IntentParser::new(model.clone(), IntentConfig::default())),
            engine: Arc::new(ExecutionEngine::new(
                pool.clone(),
                market.clone(),
                Arc::new(Broadcaster::new()),
            )),
            portfolio: Arc::new(PortfolioService::new(pool.clone(), market.clone())),
            market,
            model,
            transcripts: Arc::new(TranscriptRepository::new(pool.clone())),
        };

        let tx = CallSessionActor::spawn(session_id.clone(), "user-1".to_string(), deps);
        (tx, pool, session_id)
    }

    async fn ask(tx: &mpsc::Sender<CallActorMessage>, text: &str) -> SpokenReply {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        tx.send(CallActorMessage::Utterance {
            text: text.to_string(),
            reply: reply_tx,
        })
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), reply_rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_intro_falls_back_to_template() {
        let (tx, _pool, _session) = setup(RawIntent::default()).await;

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        tx.send(CallActorMessage::Intro { reply: reply_tx }).await.unwrap();
        let spoken = reply_rx.recv().await.unwrap();

        assert!(spoken.say.contains("Jordan"));
        assert!(spoken.gather);
    }

    #[tokio::test]
    async fn test_utterance_executes_trade_and_logs_transcript() {
        let raw = RawIntent {
            action: Some("buy".to_string()),
            ticker: Some("AAPL".to_string()),
            quantity: Some(10.0),
            confidence: 0.95,
        };
        let (tx, pool, session_id) = setup(raw).await;

        let spoken = ask(&tx, "buy ten shares of apple").await;
        assert!(spoken.say.contains("10 shares of AAPL"));

        let trades = TradeRepository::new(pool.clone())
            .get_recent_for_user("user-1", 10)
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].call_id.as_deref(), Some("session-1"));

        let transcript = TranscriptRepository::new(pool)
            .for_call(&session_id)
            .await
            .unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].speaker, "user");
        assert_eq!(transcript[1].speaker, "broker");
    }

    #[tokio::test]
    async fn test_incomplete_intent_asks_for_clarification() {
        let raw = RawIntent {
            action: Some("buy".to_string()),
            ticker: Some("AAPL".to_string()),
            quantity: None,
            confidence: 0.95,
        };
        let (tx, pool, _session) = setup(raw).await;

        let spoken = ask(&tx, "buy some apple").await;
        assert!(spoken.say.contains("How many"));
        assert!(spoken.gather);

        // Nothing executed while the intent is incomplete
        let trades = TradeRepository::new(pool)
            .get_recent_for_user("user-1", 10)
            .await
            .unwrap();
        assert!(trades.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_spoken_back() {
        let raw = RawIntent {
            action: Some("sell".to_string()),
            ticker: Some("AAPL".to_string()),
            quantity: Some(5.0),
            confidence: 0.95,
        };
        let (tx, _pool, _session) = setup(raw).await;

        // No position held; the sell is rejected and spoken back
        let spoken = ask(&tx, "sell five apple").await;
        assert!(spoken.say.to_lowercase().contains("insufficient shares"));
        assert!(spoken.gather);
    }
}
