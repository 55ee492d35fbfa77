//! Call Lifecycle Orchestrator
//!
//! Drives every call session from `requested` to a terminal state against
//! an at-least-once, out-of-order webhook stream. All transitions go
//! through the entity's monotonic state machine; webhook application is
//! serialized per provider call id so retried deliveries cannot interleave.

use crate::application::actors::broadcaster::{Broadcaster, BrokerEvent};
use crate::application::actors::call_session_actor::{
    CallActorDeps, CallActorMessage, CallSessionActor, SpokenReply,
};
use crate::config::CallConfig;
use crate::domain::entities::call_schedule::{CallSchedule, CallType};
use crate::domain::entities::call_session::{CallSession, CallStatus, Transition};
use crate::domain::errors::CallError;
use crate::domain::services::locks::KeyedLocks;
use crate::domain::services::scripts;
use crate::domain::repositories::telephony::TelephonyClient;
use crate::domain::value_objects::phone::PhoneNumber;
use crate::persistence::repository::{AccountRepository, CallRepository, ScheduleRepository};
use crate::persistence::DbPool;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How long to wait for a session actor to answer before falling back
const ACTOR_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// A status/recording event delivered by the telephony provider. This is
/// the boundary shape; the provider's own wire format is adapted outside
/// the core.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub call_id: String,
    pub status: String,
    #[serde(default)]
    pub recording_url: Option<String>,
}

/// Map the provider's status vocabulary onto the session state machine.
/// Unrecognized statuses are ignored by the caller.
fn map_provider_status(status: &str) -> Option<CallStatus> {
    match status {
        "queued" | "initiated" | "ringing" => Some(CallStatus::ProviderAccepted),
        "answered" | "in-progress" => Some(CallStatus::InProgress),
        "completed" => Some(CallStatus::Completed),
        "failed" | "busy" | "no-answer" | "canceled" => Some(CallStatus::Failed),
        _ => None,
    }
}

pub struct CallOrchestrator {
    calls: CallRepository,
    accounts: AccountRepository,
    schedules: ScheduleRepository,
    telephony: Arc<dyn TelephonyClient>,
    broadcaster: Arc<Broadcaster>,
    actor_deps: CallActorDeps,
    config: CallConfig,
    /// Live session actors, keyed by session id
    actors: Mutex<HashMap<String, mpsc::Sender<CallActorMessage>>>,
    /// Serializes webhook application per provider call id
    webhook_locks: KeyedLocks,
    /// Last minute each schedule fired, to keep the dispatcher idempotent
    /// within a minute
    fired: Mutex<HashMap<String, String>>,
    /// Handle to ourselves for detached tasks (the accept watchdog)
    self_ref: Weak<CallOrchestrator>,
}

impl CallOrchestrator {
    pub fn new(
        pool: DbPool,
        telephony: Arc<dyn TelephonyClient>,
        broadcaster: Arc<Broadcaster>,
        actor_deps: CallActorDeps,
        config: CallConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            calls: CallRepository::new(pool.clone()),
            accounts: AccountRepository::new(pool.clone()),
            schedules: ScheduleRepository::new(pool),
            telephony,
            broadcaster,
            actor_deps,
            config,
            actors: Mutex::new(HashMap::new()),
            webhook_locks: KeyedLocks::new(),
            fired: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Place an outbound call to a user. The session is persisted in
    /// `requested` before placement; a watchdog fails it if the provider
    /// never acknowledges.
    pub async fn initiate_call(&self, user_id: &str) -> Result<CallSession, CallError> {
        let account = self
            .accounts
            .get(user_id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?
            .ok_or_else(|| CallError::AccountNotFound(user_id.to_string()))?;

        let phone = PhoneNumber::new(&account.phone_number)
            .map_err(|e| CallError::InvalidInput(e.to_string()))?;

        let mut session = CallSession::new_outbound(user_id.to_string(), phone.as_str().to_string());
        self.calls
            .create(&session)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?;
        self.publish_status(&session).await;

        info!(
            "Initiating outbound call {} to {} for user {}",
            session.id, phone, user_id
        );

        self.spawn_accept_watchdog(session.id.clone());

        let placement = self.telephony.place_call(phone.as_str(), &session.id).await;

        // Re-read the row: the accept watchdog may have failed the session
        // while placement was in flight, and a terminal state must stick.
        let mut session = self
            .calls
            .get(&session.id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?
            .unwrap_or(session);

        match placement {
            Ok(placed) => {
                if session.accept(&placed.provider_call_id) == Transition::Applied {
                    self.calls
                        .update(&session)
                        .await
                        .map_err(|e| CallError::Database(e.to_string()))?;
                    self.publish_status(&session).await;
                    info!(
                        "Call {} accepted by provider as {}",
                        session.id, placed.provider_call_id
                    );
                }
                Ok(session)
            }
            Err(e) => {
                error!("Call placement failed for session {}: {}", session.id, e);
                if session.fail("provider_rejected") == Transition::Applied {
                    let _ = self.calls.update(&session).await;
                    self.publish_status(&session).await;
                }
                Err(e.into())
            }
        }
    }

    /// Handle an inbound call webhook. Unknown callers get a spoken
    /// brush-off and no session.
    pub async fn handle_inbound(
        &self,
        provider_call_id: &str,
        from: &str,
    ) -> Result<(Option<CallSession>, SpokenReply), CallError> {
        let normalized = PhoneNumber::new(from)
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|_| from.to_string());

        let account = match self
            .accounts
            .get_by_phone(&normalized)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?
        {
            Some(account) => Some(account),
            // Fall back to the raw caller id in case the stored number was
            // never normalized
            None => self
                .accounts
                .get_by_phone(from)
                .await
                .map_err(|e| CallError::Database(e.to_string()))?,
        };

        let Some(account) = account else {
            info!("Inbound call from unknown number {}", from);
            return Ok((None, SpokenReply::hangup(scripts::unknown_caller_reply())));
        };

        let mut session = CallSession::new_inbound(account.user_id.clone(), normalized);
        session.accept(provider_call_id);
        session.transition(CallStatus::InProgress);
        self.calls
            .create(&session)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?;
        self.publish_status(&session).await;

        info!(
            "Inbound call {} from user {} ({})",
            session.id, account.user_id, provider_call_id
        );

        let reply = self.intro_for(&session).await;
        Ok((Some(session), reply))
    }

    /// The provider connected an outbound call and wants the opening
    /// script.
    pub async fn handle_connect(&self, session_id: &str) -> Result<SpokenReply, CallError> {
        let mut session = self
            .calls
            .get(session_id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?
            .ok_or_else(|| CallError::SessionNotFound(session_id.to_string()))?;

        if session.transition(CallStatus::InProgress) == Transition::Applied {
            self.calls
                .update(&session)
                .await
                .map_err(|e| CallError::Database(e.to_string()))?;
            self.publish_status(&session).await;
        }

        Ok(self.intro_for(&session).await)
    }

    /// Route one recognized utterance into the session's actor. The actor
    /// mailbox guarantees transcript ordering and one in-flight intent.
    pub async fn handle_speech(
        &self,
        provider_call_id: &str,
        transcript: &str,
    ) -> Result<SpokenReply, CallError> {
        if transcript.trim().is_empty() {
            return Ok(SpokenReply::gather(scripts::repeat_prompt()));
        }

        let session = self
            .calls
            .get_by_provider_id(provider_call_id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?;

        let Some(session) = session else {
            warn!("Speech for unrecognized provider call id {}", provider_call_id);
            return Ok(SpokenReply::hangup(scripts::connection_trouble_reply()));
        };

        if session.status.is_terminal() {
            debug!("Speech for terminal session {}, ignoring", session.id);
            return Ok(SpokenReply::hangup(scripts::goodbye()));
        }

        let actor = self.actor_for(&session).await;
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        actor
            .send(CallActorMessage::Utterance {
                text: transcript.to_string(),
                reply: reply_tx,
            })
            .await?;

        match timeout(ACTOR_REPLY_TIMEOUT, reply_rx.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(CallError::NoResponse),
            Err(_) => {
                warn!("Session {} actor reply timed out", session.id);
                Ok(SpokenReply::gather(scripts::repeat_prompt()))
            }
        }
    }

    /// Apply one provider status event. At-least-once and out-of-order
    /// safe: duplicates and stale statuses fall out of the entity's
    /// monotonic transition, and unknown call ids are logged and ignored.
    pub async fn apply_provider_event(&self, event: ProviderEvent) -> Result<(), CallError> {
        let _guard = self.webhook_locks.acquire(&event.call_id).await;

        let session = self
            .calls
            .get_by_provider_id(&event.call_id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?;

        let Some(mut session) = session else {
            warn!("Webhook for unrecognized provider call id {}", event.call_id);
            return Ok(());
        };

        let mut dirty = false;

        // Recording URLs may arrive late; this is the one mutation a
        // terminal session still accepts.
        if let Some(url) = &event.recording_url {
            if session.recording_url.as_deref() != Some(url) {
                session.set_recording_url(url);
                dirty = true;
            }
        }

        match map_provider_status(&event.status) {
            Some(target) => {
                let transition = if target == CallStatus::Failed {
                    session.fail(&format!("provider_{}", event.status))
                } else {
                    session.transition(target)
                };
                match transition {
                    Transition::Applied => {
                        info!(
                            "Session {} -> {} (provider event '{}')",
                            session.id, session.status, event.status
                        );
                        dirty = true;
                        if session.status.is_terminal() {
                            self.stop_actor(&session.id).await;
                        }
                    }
                    Transition::Ignored => {
                        debug!(
                            "Ignoring stale/duplicate event '{}' for session {} ({})",
                            event.status, session.id, session.status
                        );
                    }
                }
            }
            None => {
                warn!(
                    "Unrecognized provider status '{}' for call {}",
                    event.status, event.call_id
                );
            }
        }

        if dirty {
            self.calls
                .update(&session)
                .await
                .map_err(|e| CallError::Database(e.to_string()))?;
            self.publish_status(&session).await;
        }

        Ok(())
    }

    /// Create a recurring call schedule.
    pub async fn create_schedule(
        &self,
        user_id: &str,
        phone_number: &str,
        call_time: &str,
        call_type: CallType,
    ) -> Result<CallSchedule, CallError> {
        let phone = PhoneNumber::new(phone_number)
            .map_err(|e| CallError::InvalidInput(e.to_string()))?;
        let schedule = CallSchedule::new(
            user_id.to_string(),
            phone.as_str().to_string(),
            call_time,
            call_type,
        )
        .map_err(|e| CallError::InvalidInput(e.to_string()))?;

        self.schedules
            .create(&schedule)
            .await
            .map_err(|e| CallError::Database(e.to_string()))?;

        info!(
            "Scheduled {} call for user {} at {}",
            schedule.call_type.as_str(),
            user_id,
            schedule.call_time
        );
        Ok(schedule)
    }

    pub async fn list_schedules(&self, user_id: &str) -> Result<Vec<CallSchedule>, CallError> {
        self.schedules
            .list_for_user(user_id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))
    }

    /// Cancel a schedule. Sessions already spawned from it keep running.
    pub async fn cancel_schedule(&self, schedule_id: &str) -> Result<bool, CallError> {
        self.schedules
            .cancel(schedule_id)
            .await
            .map_err(|e| CallError::Database(e.to_string()))
    }

    /// One dispatcher pass: place an outbound call for every schedule due
    /// in the minute containing `now`. Returns the number dispatched.
    pub async fn dispatch_due_schedules(&self, now: DateTime<Utc>) -> usize {
        let schedules = match self.schedules.list_scheduled().await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Failed to list schedules for dispatch: {}", e);
                return 0;
            }
        };

        let minute_key = now.format("%Y-%m-%d %H:%M").to_string();
        let mut dispatched = 0;

        for schedule in schedules.iter().filter(|s| s.is_due(now)) {
            {
                let mut fired = self.fired.lock().await;
                if fired.get(&schedule.id) == Some(&minute_key) {
                    continue; // already dispatched this minute
                }
                fired.insert(schedule.id.clone(), minute_key.clone());
            }

            info!(
                "Dispatching scheduled {} call for user {}",
                schedule.call_type.as_str(),
                schedule.user_id
            );
            match self.initiate_call(&schedule.user_id).await {
                Ok(_) => dispatched += 1,
                Err(e) => error!(
                    "Scheduled call dispatch failed for user {}: {}",
                    schedule.user_id, e
                ),
            }
        }

        dispatched
    }

    /// Fail the session if the provider never acknowledges within the
    /// configured bound. Re-reads the row at expiry, so a race with a real
    /// acceptance is absorbed by transition monotonicity.
    fn spawn_accept_watchdog(&self, session_id: String) {
        let Some(orchestrator) = self.self_ref.upgrade() else {
            return;
        };
        let wait = Duration::from_secs(orchestrator.config.provider_accept_timeout_secs);

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            let session = match orchestrator.calls.get(&session_id).await {
                Ok(Some(session)) => session,
                Ok(None) => return,
                Err(e) => {
                    error!("Watchdog failed to load session {}: {}", session_id, e);
                    return;
                }
            };

            if session.status != CallStatus::Requested {
                return;
            }

            warn!(
                "Session {} never acknowledged by provider, failing with provider_timeout",
                session_id
            );
            let mut session = session;
            if session.fail("provider_timeout") == Transition::Applied {
                if let Err(e) = orchestrator.calls.update(&session).await {
                    error!("Watchdog failed to persist timeout for {}: {}", session_id, e);
                    return;
                }
                orchestrator.publish_status(&session).await;
            }
        });
    }

    async fn intro_for(&self, session: &CallSession) -> SpokenReply {
        let actor = self.actor_for(session).await;
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        if actor
            .send(CallActorMessage::Intro { reply: reply_tx })
            .await
            .is_err()
        {
            return SpokenReply::hangup(scripts::connection_trouble_reply());
        }

        match timeout(ACTOR_REPLY_TIMEOUT, reply_rx.recv()).await {
            Ok(Some(reply)) => reply,
            _ => SpokenReply::hangup(scripts::connection_trouble_reply()),
        }
    }

    /// Get or spawn the actor for a session.
    async fn actor_for(&self, session: &CallSession) -> mpsc::Sender<CallActorMessage> {
        let mut actors = self.actors.lock().await;
        if let Some(sender) = actors.get(&session.id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        let sender = CallSessionActor::spawn(
            session.id.clone(),
            session.user_id.clone(),
            self.actor_deps.clone(),
        );
        actors.insert(session.id.clone(), sender.clone());
        sender
    }

    async fn stop_actor(&self, session_id: &str) {
        let sender = self.actors.lock().await.remove(session_id);
        if let Some(sender) = sender {
            let _ = sender.send(CallActorMessage::Hangup).await;
            debug!("Stopped actor for session {}", session_id);
        }
    }

    async fn publish_status(&self, session: &CallSession) {
        self.broadcaster
            .publish(
                &session.user_id,
                BrokerEvent::CallStatusChanged {
                    user_id: session.user_id.clone(),
                    call: session.clone(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::execution_engine::ExecutionEngine;
    use crate::application::services::portfolio_service::PortfolioService;
    use crate::config::{IntentConfig, MarketDataConfig};
    use crate::domain::errors::{FeedError, ModelError, TelephonyError};
    use crate::domain::repositories::broker_model::{
        BrokerModel, ClientSnapshot, MarketSnapshot, RawIntent, TradeOutcome, UtteranceKind,
    };
    use crate::domain::repositories::quote_feed::{IndexSnapshot, QuoteFeed};
    use crate::domain::repositories::telephony::ProviderCall;
    use crate::domain::services::intent::IntentParser;
    use crate::domain::services::market_data::MarketDataService;
    use crate::persistence::models::CreateAccount;
    use crate::persistence::repository::TranscriptRepository;
    use crate::persistence::init_database;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedFeed;

    #[async_trait]
    impl QuoteFeed for FixedFeed {
        fn name(&self) -> &str {
            "FixedFeed"
        }

        async fn fetch_price(&self, _ticker: &str) -> Result<f64, FeedError> {
            Ok(150.0)
        }

        async fn fetch_index(&self, _symbol: &str) -> Result<IndexSnapshot, FeedError> {
            Ok(IndexSnapshot {
                price: 5000.0,
                change: 10.0,
                change_percent: 0.2,
            })
        }
    }

    struct QuietModel;

    #[async_trait]
    impl BrokerModel for QuietModel {
        fn name(&self) -> &str {
            "QuietModel"
        }

        async fn classify_utterance(&self, _u: &str) -> Result<UtteranceKind, ModelError> {
            Ok(UtteranceKind::Conversation)
        }

        async fn extract_intent(&self, _u: &str) -> Result<RawIntent, ModelError> {
            Ok(RawIntent::default())
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

    /// Telephony mock: counts placements, optionally refuses
    struct MockTelephony {
        placements: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl TelephonyClient for MockTelephony {
        fn name(&self) -> &str {
            "MockTelephony"
        }

        async fn place_call(
            &self,
            _to: &str,
            session_id: &str,
        ) -> Result<ProviderCall, TelephonyError> {
            self.placements.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TelephonyError::PlacementFailed("refused".to_string()));
            }
            Ok(ProviderCall {
                provider_call_id: format!("CA-{}", session_id),
                status: "queued".to_string(),
            })
        }

        fn verify_webhook_signature(&self, _body: &[u8], _signature_hex: &str) -> bool {
            true
        }
    }

    async fn orchestrator_with(fail_placement: bool) -> (Arc<CallOrchestrator>, crate::persistence::DbPool) {
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

        let market = Arc::new(MarketDataService::new(
            Arc::new(FixedFeed),
            MarketDataConfig {
                fetch_base_backoff_ms: 1,
                ..Default::default()
            },
        ));
        let model: Arc<dyn BrokerModel> = Arc::new(QuietModel);
        let broadcaster = Arc::new(Broadcaster::new());
        let deps = CallActorDeps {
            parser: Arc::new(IntentParser::new(model.clone(), IntentConfig::default())),
            engine: Arc::new(ExecutionEngine::new(
                pool.clone(),
                market.clone(),
                broadcaster.clone(),
            )),
            portfolio: Arc::new(PortfolioService::new(pool.clone(), market.clone())),
            market,
            model,
            transcripts: Arc::new(TranscriptRepository::new(pool.clone())),
        };

        let orchestrator = CallOrchestrator::new(
            pool.clone(),
            Arc::new(MockTelephony {
                placements: AtomicU32::new(0),
                fail: fail_placement,
            }),
            broadcaster,
            deps,
            CallConfig {
                provider_accept_timeout_secs: 5,
                schedule_poll_secs: 60,
            },
        );
        (orchestrator, pool)
    }

    #[tokio::test]
    async fn test_initiate_call_accepts() {
        let (orchestrator, pool) = orchestrator_with(false).await;

        let session = orchestrator.initiate_call("user-1").await.unwrap();
        assert_eq!(session.status, CallStatus::ProviderAccepted);
        assert!(session.provider_call_id.is_some());

        let stored = CallRepository::new(pool)
            .get(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CallStatus::ProviderAccepted);
    }

    #[tokio::test]
    async fn test_initiate_call_placement_failure_fails_session() {
        let (orchestrator, pool) = orchestrator_with(true).await;

        let result = orchestrator.initiate_call("user-1").await;
        assert!(result.is_err());

        let sessions = CallRepository::new(pool).get_for_user("user-1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, CallStatus::Failed);
        assert_eq!(sessions[0].failure_reason.as_deref(), Some("provider_rejected"));
    }

    #[tokio::test]
    async fn test_initiate_call_unknown_account() {
        let (orchestrator, _pool) = orchestrator_with(false).await;
        let result = orchestrator.initiate_call("ghost").await;
        assert!(matches!(result, Err(CallError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_provider_event_lifecycle_and_duplicates() {
        let (orchestrator, pool) = orchestrator_with(false).await;
        let session = orchestrator.initiate_call("user-1").await.unwrap();
        let provider_id = session.provider_call_id.clone().unwrap();

        let event = |status: &str| ProviderEvent {
            call_id: provider_id.clone(),
            status: status.to_string(),
            recording_url: None,
        };

        orchestrator.apply_provider_event(event("in-progress")).await.unwrap();
        // Duplicate delivery
        orchestrator.apply_provider_event(event("in-progress")).await.unwrap();
        // Late, out-of-order acceptance
        orchestrator.apply_provider_event(event("ringing")).await.unwrap();

        let calls = CallRepository::new(pool.clone());
        let stored = calls.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::InProgress);

        orchestrator.apply_provider_event(event("completed")).await.unwrap();
        // Applying completion twice yields identical stored state
        orchestrator.apply_provider_event(event("completed")).await.unwrap();

        let stored = calls.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Completed);
        assert!(stored.ended_at.is_some());
        let first_ended = stored.ended_at;

        orchestrator.apply_provider_event(event("completed")).await.unwrap();
        let stored = calls.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.ended_at, first_ended);
    }

    #[tokio::test]
    async fn test_late_recording_url_on_terminal_session() {
        let (orchestrator, pool) = orchestrator_with(false).await;
        let session = orchestrator.initiate_call("user-1").await.unwrap();
        let provider_id = session.provider_call_id.clone().unwrap();

        orchestrator
            .apply_provider_event(ProviderEvent {
                call_id: provider_id.clone(),
                status: "completed".to_string(),
                recording_url: None,
            })
            .await
            .unwrap();

        // Recording arrives after completion
        orchestrator
            .apply_provider_event(ProviderEvent {
                call_id: provider_id,
                status: "completed".to_string(),
                recording_url: Some("https://rec.example/1.mp3".to_string()),
            })
            .await
            .unwrap();

        let stored = CallRepository::new(pool).get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Completed);
        assert_eq!(stored.recording_url.as_deref(), Some("https://rec.example/1.mp3"));
    }

    #[tokio::test]
    async fn test_unknown_provider_id_ignored() {
        let (orchestrator, _pool) = orchestrator_with(false).await;
        let result = orchestrator
            .apply_provider_event(ProviderEvent {
                call_id: "CA-nobody".to_string(),
                status: "completed".to_string(),
                recording_url: None,
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unrecognized_status_ignored() {
        let (orchestrator, pool) = orchestrator_with(false).await;
        let session = orchestrator.initiate_call("user-1").await.unwrap();
        let provider_id = session.provider_call_id.clone().unwrap();

        orchestrator
            .apply_provider_event(ProviderEvent {
                call_id: provider_id,
                status: "transmogrified".to_string(),
                recording_url: None,
            })
            .await
            .unwrap();

        let stored = CallRepository::new(pool).get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::ProviderAccepted);
    }

    #[tokio::test]
    async fn test_inbound_known_caller_gets_session_and_intro() {
        let (orchestrator, pool) = orchestrator_with(false).await;

        let (session, reply) = orchestrator
            .handle_inbound("CA-inbound-1", "+14155552671")
            .await
            .unwrap();

        let session = session.unwrap();
        assert_eq!(session.status, CallStatus::InProgress);
        assert!(reply.gather);
        assert!(reply.say.contains("Jordan"));

        let stored = CallRepository::new(pool)
            .get_by_provider_id("CA-inbound-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_inbound_unknown_caller_no_session() {
        let (orchestrator, pool) = orchestrator_with(false).await;

        let (session, reply) = orchestrator
            .handle_inbound("CA-inbound-2", "+19995550000")
            .await
            .unwrap();

        assert!(session.is_none());
        assert!(!reply.gather);

        let sessions = CallRepository::new(pool).get_for_user("user-1").await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_roundtrip_and_cancel() {
        let (orchestrator, _pool) = orchestrator_with(false).await;

        let schedule = orchestrator
            .create_schedule("user-1", "+14155552671", "09:30", CallType::MarketOpen)
            .await
            .unwrap();

        let listed = orchestrator.list_schedules("user-1").await.unwrap();
        assert_eq!(listed.len(), 1);

        assert!(orchestrator.cancel_schedule(&schedule.id).await.unwrap());
        assert!(!orchestrator.cancel_schedule(&schedule.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_dispatcher_fires_due_schedule_once() {
        let (orchestrator, pool) = orchestrator_with(false).await;

        orchestrator
            .create_schedule("user-1", "+14155552671", "14:30", CallType::MidDay)
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 10).unwrap();
        assert_eq!(orchestrator.dispatch_due_schedules(now).await, 1);
        // Second pass inside the same minute does not re-dial
        assert_eq!(orchestrator.dispatch_due_schedules(now).await, 0);
        // Off-minute pass does nothing
        let later = Utc.with_ymd_and_hms(2025, 6, 2, 14, 31, 0).unwrap();
        assert_eq!(orchestrator.dispatch_due_schedules(later).await, 0);

        let sessions = CallRepository::new(pool).get_for_user("user-1").await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_schedule_not_dispatched() {
        let (orchestrator, _pool) = orchestrator_with(false).await;

        let schedule = orchestrator
            .create_schedule("user-1", "+14155552671", "14:30", CallType::MidDay)
            .await
            .unwrap();
        orchestrator.cancel_schedule(&schedule.id).await.unwrap();

        let now = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        assert_eq!(orchestrator.dispatch_due_schedules(now).await, 0);
    }

    #[tokio::test]
    async fn test_speech_for_unknown_call_id() {
        let (orchestrator, _pool) = orchestrator_with(false).await;
        let reply = orchestrator
            .handle_speech("CA-nobody", "buy ten apple")
            .await
            .unwrap();
        assert!(!reply.gather);
    }

    #[tokio::test]
    async fn test_empty_speech_reprompts() {
        let (orchestrator, _pool) = orchestrator_with(false).await;
        let reply = orchestrator.handle_speech("CA-any", "   ").await.unwrap();
        assert!(reply.gather);
        assert!(reply.say.contains("didn't catch"));
    }
}
