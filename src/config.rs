use std::time::Duration;

/// Configuration for the quote cache and upstream market data fetches
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub staleness_secs: u64,        // Cache entries older than this are expired
    pub fetch_max_attempts: u32,    // Upstream attempts before giving up
    pub fetch_base_backoff_ms: u64, // First retry delay, doubled per attempt
    pub request_timeout_secs: u64,  // Per-request timeout on the feed client
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 30,
            fetch_max_attempts: 3,
            fetch_base_backoff_ms: 250,
            request_timeout_secs: 5,
        }
    }
}

impl MarketDataConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

/// Configuration for the intent parser
#[derive(Debug, Clone)]
pub struct IntentConfig {
    pub confidence_threshold: f64, // Minimum confidence to act on an intent
    pub model_max_attempts: u32,   // Model call attempts before keyword fallback
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            model_max_attempts: 2,
        }
    }
}

/// Configuration for call lifecycle handling
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub provider_accept_timeout_secs: u64, // requested -> failed(provider_timeout)
    pub schedule_poll_secs: u64,           // Dispatcher scan interval
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            provider_accept_timeout_secs: 30,
            schedule_poll_secs: 60,
        }
    }
}

/// Telephony provider credentials and callback routing
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub webhook_base_url: String, // Public base URL the provider calls back on
    pub webhook_secret: String,   // Shared secret for webhook signatures
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            webhook_base_url: "http://localhost:3000".to_string(),
            webhook_secret: String::new(),
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub api_requests_per_minute: u32,
    pub gemini_api_key: String,
    pub market: MarketDataConfig,
    pub intent: IntentConfig,
    pub call: CallConfig,
    pub telephony: TelephonyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            database_url: "sqlite://data/wolfline.db".to_string(),
            api_requests_per_minute: 100,
            gemini_api_key: String::new(),
            market: MarketDataConfig::default(),
            intent: IntentConfig::default(),
            call: CallConfig::default(),
            telephony: TelephonyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults and warning on out-of-range values.
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            if !addr.is_empty() {
                config.bind_addr = addr;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(rpm) = std::env::var("API_REQUESTS_PER_MINUTE") {
            match rpm.parse::<u32>() {
                Ok(value) if value > 0 => config.api_requests_per_minute = value,
                Ok(value) => {
                    tracing::warn!(
                        "Invalid API_REQUESTS_PER_MINUTE value: {} (must be > 0), using default: {}",
                        value,
                        config.api_requests_per_minute
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse API_REQUESTS_PER_MINUTE '{}': {}, using default: {}",
                        rpm,
                        e,
                        config.api_requests_per_minute
                    );
                }
            }
        }

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.gemini_api_key = key;
        }

        if let Ok(ttl) = std::env::var("QUOTE_STALENESS_SECONDS") {
            if let Ok(value) = ttl.parse::<u64>() {
                if (1..=600).contains(&value) {
                    config.market.staleness_secs = value;
                }
            }
        }

        if let Ok(attempts) = std::env::var("QUOTE_FETCH_MAX_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=10).contains(&value) {
                    config.market.fetch_max_attempts = value;
                }
            }
        }

        if let Ok(backoff) = std::env::var("QUOTE_FETCH_BASE_BACKOFF_MS") {
            if let Ok(value) = backoff.parse::<u64>() {
                if (10..=10_000).contains(&value) {
                    config.market.fetch_base_backoff_ms = value;
                }
            }
        }

        if let Ok(timeout) = std::env::var("QUOTE_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                if (1..=60).contains(&value) {
                    config.market.request_timeout_secs = value;
                }
            }
        }

        if let Ok(threshold) = std::env::var("INTENT_CONFIDENCE_THRESHOLD") {
            match threshold.parse::<f64>() {
                Ok(value) if (0.0..=1.0).contains(&value) => {
                    config.intent.confidence_threshold = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid INTENT_CONFIDENCE_THRESHOLD value: {} (must be between 0.0 and 1.0), using default: {}",
                        value,
                        config.intent.confidence_threshold
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse INTENT_CONFIDENCE_THRESHOLD '{}': {}, using default: {}",
                        threshold,
                        e,
                        config.intent.confidence_threshold
                    );
                }
            }
        }

        if let Ok(attempts) = std::env::var("INTENT_MODEL_MAX_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=5).contains(&value) {
                    config.intent.model_max_attempts = value;
                }
            }
        }

        if let Ok(timeout) = std::env::var("PROVIDER_ACCEPT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                if (5..=300).contains(&value) {
                    config.call.provider_accept_timeout_secs = value;
                }
            }
        }

        if let Ok(poll) = std::env::var("SCHEDULE_POLL_SECONDS") {
            if let Ok(value) = poll.parse::<u64>() {
                if (10..=600).contains(&value) {
                    config.call.schedule_poll_secs = value;
                }
            }
        }

        if let Ok(sid) = std::env::var("TELEPHONY_ACCOUNT_SID") {
            config.telephony.account_sid = sid;
        }
        if let Ok(token) = std::env::var("TELEPHONY_AUTH_TOKEN") {
            config.telephony.auth_token = token;
        }
        if let Ok(number) = std::env::var("TELEPHONY_FROM_NUMBER") {
            config.telephony.from_number = number;
        }
        if let Ok(base) = std::env::var("WEBHOOK_BASE_URL") {
            if url::Url::parse(&base).is_ok() {
                config.telephony.webhook_base_url = base.trim_end_matches('/').to_string();
            } else {
                tracing::warn!(
                    "Invalid WEBHOOK_BASE_URL '{}', using default: {}",
                    base,
                    config.telephony.webhook_base_url
                );
            }
        }
        if let Ok(secret) = std::env::var("WEBHOOK_SECRET") {
            config.telephony.webhook_secret = secret;
        }

        config
    }
}
