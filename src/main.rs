mod application;
mod config;
mod domain;
mod infrastructure;
mod persistence;
mod rate_limit;

use crate::application::actors::broadcaster::Broadcaster;
use crate::application::actors::call_session_actor::CallActorDeps;
use crate::application::services::call_orchestrator::{CallOrchestrator, ProviderEvent};
use crate::application::services::execution_engine::ExecutionEngine;
use crate::application::services::portfolio_service::PortfolioService;
use crate::config::AppConfig;
use crate::domain::entities::call_schedule::CallType;
use crate::domain::entities::trade::TradeAction;
use crate::domain::errors::{CallError, ExecutionError, MarketDataError, TradeRejection};
use crate::domain::repositories::broker_model::BrokerModel;
use crate::domain::repositories::telephony::TelephonyClient;
use crate::domain::services::intent::{IntentParser, TradeIntent};
use crate::domain::services::market_data::{Freshness, MarketDataService};
use crate::domain::services::{ticker_directory, scripts};
use crate::domain::value_objects::shares::Shares;
use crate::infrastructure::gemini_client::GeminiClient;
use crate::infrastructure::quote_http_client::HttpQuoteFeed;
use crate::infrastructure::twilio_client::TwilioClient;
use crate::persistence::repository::{CallRepository, TradeRepository, TranscriptRepository};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<CallOrchestrator>,
    engine: Arc<ExecutionEngine>,
    portfolio: Arc<PortfolioService>,
    market: Arc<MarketDataService>,
    broadcaster: Arc<Broadcaster>,
    telephony: Arc<dyn TelephonyClient>,
    trades: Arc<TradeRepository>,
    calls: Arc<CallRepository>,
    transcripts: Arc<TranscriptRepository>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wolfline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    info!("Wolfline voice trading server starting...");
    info!(
        "Quote staleness window: {}s, intent confidence threshold: {:.2}",
        config.market.staleness_secs, config.intent.confidence_threshold
    );

    let pool = persistence::init_database(&config.database_url).await?;

    // Wire the boundary adapters
    let feed = Arc::new(HttpQuoteFeed::new(Duration::from_secs(
        config.market.request_timeout_secs,
    )));
    let market = Arc::new(MarketDataService::new(feed, config.market.clone()));
    let model: Arc<dyn BrokerModel> = Arc::new(GeminiClient::new(config.gemini_api_key.clone()));
    let telephony: Arc<dyn TelephonyClient> =
        Arc::new(TwilioClient::new(config.telephony.clone()));

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; intent parsing will use keyword fallback");
    }

    let broadcaster = Arc::new(Broadcaster::new());
    let engine = Arc::new(ExecutionEngine::new(
        pool.clone(),
        market.clone(),
        broadcaster.clone(),
    ));
    let portfolio = Arc::new(PortfolioService::new(pool.clone(), market.clone()));
    let parser = Arc::new(IntentParser::new(model.clone(), config.intent.clone()));

    let actor_deps = CallActorDeps {
        parser,
        engine: engine.clone(),
        portfolio: portfolio.clone(),
        market: market.clone(),
        model,
        transcripts: Arc::new(TranscriptRepository::new(pool.clone())),
    };

    let orchestrator = CallOrchestrator::new(
        pool.clone(),
        telephony.clone(),
        broadcaster.clone(),
        actor_deps,
        config.call.clone(),
    );

    // Background dispatcher for recurring call schedules
    let dispatcher = orchestrator.clone();
    let poll_secs = config.call.schedule_poll_secs;
    tokio::spawn(async move {
        schedule_dispatch_task(dispatcher, poll_secs).await;
    });

    let state = AppState {
        orchestrator,
        engine,
        portfolio,
        market,
        broadcaster,
        telephony,
        trades: Arc::new(TradeRepository::new(pool.clone())),
        calls: Arc::new(CallRepository::new(pool.clone())),
        transcripts: Arc::new(TranscriptRepository::new(pool)),
    };

    let limiter = rate_limit::create_rate_limiter(rate_limit::RateLimiterConfig {
        requests_per_minute: config.api_requests_per_minute,
    });

    let app = Router::new()
        .route("/", get(|| async { "Wolfline voice trading server is running!" }))
        .route("/health", get(health_check))
        .route("/api/trades/execute", post(execute_trade))
        .route("/api/trades/history/:user_id", get(trade_history))
        .route("/api/portfolio/:user_id", get(get_portfolio))
        .route("/api/market/summary", get(market_summary))
        .route("/api/market/quote/:ticker", get(market_quote))
        .route("/api/calls/initiate/:user_id", post(initiate_call))
        .route("/api/calls/connect/:session_id", post(connect_call))
        .route("/api/calls/inbound", post(inbound_call))
        .route("/api/calls/speech", post(process_speech))
        .route("/api/calls/events", post(call_events))
        .route("/api/calls/history/:user_id", get(call_history))
        .route("/api/calls/:session_id/transcript", get(call_transcript))
        .route("/api/schedules", post(create_schedule))
        .route("/api/schedules/user/:user_id", get(list_schedules))
        .route("/api/schedules/:schedule_id", delete(cancel_schedule))
        .route("/ws/:user_id", get(ws_subscribe))
        .layer(
            tower::ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(move |req, next| {
                    let limiter = limiter.clone();
                    async move { rate_limit::rate_limit_middleware(limiter, req, next).await }
                }))
                .layer(RequestBodyLimitLayer::new(64 * 1024)),
        )
        .with_state(state);

    let addr: std::net::SocketAddr = config.bind_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    // Graceful shutdown on ctrl-c / SIGTERM
    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");
    Ok(())
}

/// Background task that fires due call schedules once per poll interval.
async fn schedule_dispatch_task(orchestrator: Arc<CallOrchestrator>, poll_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(poll_secs));

    loop {
        interval.tick().await;
        let dispatched = orchestrator.dispatch_due_schedules(chrono::Utc::now()).await;
        if dispatched > 0 {
            info!("📞 Dispatched {} scheduled calls", dispatched);
        }
    }
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "running",
        "telephony": state.telephony.name(),
    }))
}

#[derive(Debug, Deserialize)]
struct ExecuteTradeRequest {
    user_id: String,
    action: String,
    ticker: String,
    quantity: i64,
}

/// Execute a paper trade on behalf of a user.
async fn execute_trade(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteTradeRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(action) = TradeAction::parse(&payload.action) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Action must be 'buy' or 'sell'"})),
        ));
    };

    let Some(ticker) = ticker_directory::resolve(&payload.ticker) else {
        let rejection = TradeRejection::UnresolvableTicker {
            ticker: payload.ticker.clone(),
        };
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"rejection": rejection})),
        ));
    };

    let shares = match Shares::new(payload.quantity) {
        Ok(shares) => shares,
        Err(e) => {
            let rejection = TradeRejection::InvalidQuantity {
                detail: e.to_string(),
            };
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"rejection": rejection})),
            ));
        }
    };

    let intent = TradeIntent {
        action,
        ticker,
        shares,
        confidence: 1.0, // direct API request, not a voice guess
    };

    match state.engine.execute(&payload.user_id, &intent, None).await {
        Ok(trade) => Ok(Json(serde_json::json!({
            "status": "success",
            "trade": trade,
        }))),
        Err(ExecutionError::Rejected(rejection)) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"rejection": rejection})),
        )),
        Err(ExecutionError::Internal(e)) => {
            error!("Trade execution fault: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Trade execution failed"})),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

/// Get the trade history for a user.
async fn trade_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    match state.trades.get_recent_for_user(&user_id, limit).await {
        Ok(trades) => Ok(Json(serde_json::json!({"trades": trades}))),
        Err(e) => {
            error!("Failed to get trade history: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshQuery {
    refresh: Option<bool>,
}

/// Get the current portfolio for a user, optionally forcing a fresh price
/// refresh first.
async fn get_portfolio(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let force_fresh = query.refresh.unwrap_or(false);
    match state.portfolio.summary(&user_id, force_fresh).await {
        Ok(summary) => Ok(Json(serde_json::json!(summary))),
        Err(e) if e.contains("not found") => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": e})),
        )),
        Err(e) => {
            error!("Failed to get portfolio: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e})),
            ))
        }
    }
}

/// Get the market summary (index-level aggregate).
async fn market_summary(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let freshness = if query.refresh.unwrap_or(false) {
        Freshness::ForceFresh
    } else {
        Freshness::AllowCached
    };

    match state.market.get_market_summary(freshness).await {
        Ok(summary) => Ok(Json(serde_json::json!(summary))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// Get a quote for a specific ticker.
async fn market_quote(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let freshness = if query.refresh.unwrap_or(false) {
        Freshness::ForceFresh
    } else {
        Freshness::AllowCached
    };

    match state.market.get_quote(&ticker, freshness).await {
        Ok(quote) => Ok(Json(serde_json::json!(quote))),
        Err(MarketDataError::UnknownTicker(t)) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown ticker: {}", t)})),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// Manually initiate an outbound call to a user now.
async fn initiate_call(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.orchestrator.initiate_call(&user_id).await {
        Ok(session) => Ok(Json(serde_json::json!({
            "status": "initiated",
            "call": session,
        }))),
        Err(CallError::AccountNotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Account not found"})),
        )),
        Err(CallError::Telephony(e)) => Err((
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
        Err(e) => {
            error!("Failed to initiate call: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            ))
        }
    }
}

/// Provider callback when an outbound call connects; returns the opening
/// script.
async fn connect_call(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.orchestrator.handle_connect(&session_id).await {
        Ok(reply) => Ok(Json(serde_json::json!(reply))),
        Err(CallError::SessionNotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Session not found"})),
        )),
        Err(e) => {
            error!("Failed to connect call: {}", e);
            Ok(Json(serde_json::json!({
                "say": scripts::connection_trouble_reply(),
                "gather": false,
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct InboundRequest {
    call_id: String,
    from: String,
}

/// Provider callback for an incoming call.
async fn inbound_call(
    State(state): State<AppState>,
    Json(payload): Json<InboundRequest>,
) -> Json<serde_json::Value> {
    match state
        .orchestrator
        .handle_inbound(&payload.call_id, &payload.from)
        .await
    {
        Ok((session, reply)) => Json(serde_json::json!({
            "call": session,
            "say": reply.say,
            "gather": reply.gather,
        })),
        Err(e) => {
            error!("Failed to handle inbound call: {}", e);
            Json(serde_json::json!({
                "say": scripts::connection_trouble_reply(),
                "gather": false,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpeechRequest {
    call_id: String,
    transcript: String,
}

/// Provider callback carrying one recognized utterance.
async fn process_speech(
    State(state): State<AppState>,
    Json(payload): Json<SpeechRequest>,
) -> Json<serde_json::Value> {
    match state
        .orchestrator
        .handle_speech(&payload.call_id, &payload.transcript)
        .await
    {
        Ok(reply) => Json(serde_json::json!(reply)),
        Err(e) => {
            error!("Failed to process speech: {}", e);
            Json(serde_json::json!({
                "say": scripts::repeat_prompt(),
                "gather": true,
            }))
        }
    }
}

/// Provider status/recording webhook. Signed, at-least-once, possibly out
/// of order; application is idempotent.
async fn call_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.telephony.verify_webhook_signature(&body, signature) {
        warn!("Rejected webhook with bad signature");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Invalid signature"})),
        ));
    }

    let event: ProviderEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Malformed event: {}", e)})),
            ))
        }
    };

    match state.orchestrator.apply_provider_event(event).await {
        Ok(()) => Ok(Json(serde_json::json!({"status": "ok"}))),
        Err(e) => {
            error!("Failed to apply provider event: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            ))
        }
    }
}

/// List a user's call sessions.
async fn call_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.calls.get_for_user(&user_id).await {
        Ok(sessions) => Ok(Json(serde_json::json!({"calls": sessions}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// Full conversation log for one call.
async fn call_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.transcripts.for_call(&session_id).await {
        Ok(entries) => Ok(Json(serde_json::json!({"transcript": entries}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct CreateScheduleRequest {
    user_id: String,
    phone_number: String,
    call_time: String,
    call_type: Option<String>,
}

/// Schedule a recurring broker call.
async fn create_schedule(
    State(state): State<AppState>,
    Json(payload): Json<CreateScheduleRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let call_type = match payload.call_type.as_deref() {
        None => CallType::MarketOpen,
        Some(raw) => match CallType::parse(raw) {
            Some(call_type) => call_type,
            None => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": "call_type must be market_open, mid_day, or market_close"
                    })),
                ))
            }
        },
    };

    match state
        .orchestrator
        .create_schedule(
            &payload.user_id,
            &payload.phone_number,
            &payload.call_time,
            call_type,
        )
        .await
    {
        Ok(schedule) => Ok(Json(serde_json::json!({
            "status": "scheduled",
            "schedule": schedule,
        }))),
        Err(CallError::InvalidInput(e)) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e})),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// List a user's call schedules.
async fn list_schedules(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.orchestrator.list_schedules(&user_id).await {
        Ok(schedules) => Ok(Json(serde_json::json!({"schedules": schedules}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// Cancel a call schedule. Sessions already spawned are unaffected.
async fn cancel_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.orchestrator.cancel_schedule(&schedule_id).await {
        Ok(true) => Ok(Json(serde_json::json!({"status": "cancelled"}))),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Schedule not found or already cancelled"})),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )),
    }
}

/// Open the live event stream for a user.
async fn ws_subscribe(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, user_id))
}

async fn handle_ws(socket: WebSocket, state: AppState, user_id: String) {
    let (subscriber_id, mut events) = state.broadcaster.subscribe(&user_id).await;
    info!("WebSocket subscriber {} connected for user {}", subscriber_id, user_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to serialize event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    // Clients only listen on this stream; inbound frames are
                    // ignored apart from keeping the connection alive
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }

    state.broadcaster.unsubscribe(&user_id, subscriber_id).await;
    info!("WebSocket subscriber {} disconnected for user {}", subscriber_id, user_id);
}
