use std::env;

/// Gateway configuration loaded from environment variables.
///
/// Provider keys are all optional: with none configured the gateway can only
/// serve offline stub documents (when allowed) or 503.
#[derive(Debug, Clone)]
pub struct Config {
    // Providers
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    pub openrouter_fallback_model: String,
    pub groq_api_key: String,
    pub groq_model: String,
    pub gemini_api_key: String,
    pub gemini_generation_model: String,
    pub gemini_review_model: String,
    /// Force the primary provider even when a fallback is configured.
    pub force_primary: bool,

    // Generation
    pub allow_offline_generation: bool,
    pub review_enabled: bool,
    pub provider_timeout_secs: u64,
    pub backoff_initial_secs: f64,
    pub backoff_max_secs: f64,
    pub review_backoff_secs: f64,

    // Dedupe store
    pub dedupe_enabled: bool,
    pub dedupe_file: String,
    pub dedupe_max: usize,

    // Prefetch queue
    pub prefetch_dir: String,
    pub prefetch_batch_min: usize,
    pub prefetch_batch_max: usize,
    pub prefetch_low_water: usize,
    pub prefetch_fill_to: usize,
    pub prefetch_review_batch: usize,
    pub prefetch_max_workers: usize,
    pub prefetch_delay_ms: u64,
    pub prefetch_prewarm: usize,
    pub prefetch_token_secret: Option<String>,

    // Dispatcher
    pub counter_file: String,
    pub api_keys: Vec<String>,
    pub rate_max_requests: u32,
    pub rate_window_seconds: u64,
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        let api_keys: Vec<String> = env::var("API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            openrouter_model: env_or("OPENROUTER_MODEL", "openrouter/auto"),
            openrouter_fallback_model: env_or(
                "OPENROUTER_FALLBACK_MODEL",
                "meta-llama/llama-3.3-70b-instruct",
            ),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: env_or("GROQ_MODEL", "llama-3.3-70b-versatile"),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_generation_model: env_or("GEMINI_GENERATION_MODEL", "gemini-2.0-flash"),
            gemini_review_model: env_or("GEMINI_REVIEW_MODEL", "gemini-2.0-flash"),
            force_primary: env_flag("FORCE_OPENROUTER", false),
            allow_offline_generation: env_flag("ALLOW_OFFLINE_GENERATION", false),
            review_enabled: env_flag("REVIEW_ENABLED", true),
            provider_timeout_secs: env_parse("LLM_TIMEOUT_SECONDS", 75),
            backoff_initial_secs: env_parse("LLM_BACKOFF_INITIAL_SECONDS", 5.0),
            backoff_max_secs: env_parse("LLM_BACKOFF_MAX_SECONDS", 120.0),
            review_backoff_secs: env_parse("REVIEW_BACKOFF_SECONDS", 60.0),
            dedupe_enabled: env_flag("DEDUPE_ENABLED", true),
            dedupe_file: env_or("DEDUPE_RECENT_FILE", "cache/seen_pages.json"),
            dedupe_max: env_parse("DEDUPE_MAX", 200),
            prefetch_dir: env_or("PREFETCH_DIR", "cache/prefetch"),
            prefetch_batch_min: env_parse("PREFETCH_BATCH_MIN", 5),
            prefetch_batch_max: env_parse("PREFETCH_BATCH_MAX", 20),
            prefetch_low_water: env_parse("PREFETCH_LOW_WATER", 3),
            prefetch_fill_to: env_parse("PREFETCH_FILL_TO", 10),
            prefetch_review_batch: env_parse("PREFETCH_REVIEW_BATCH", 5),
            prefetch_max_workers: env_parse("PREFETCH_MAX_WORKERS", 2).max(1),
            prefetch_delay_ms: env_parse("PREFETCH_DELAY_MS", 0),
            prefetch_prewarm: env_parse("PREFETCH_PREWARM", 0),
            prefetch_token_secret: env::var("PREFETCH_TOKEN_SECRET").ok().filter(|s| !s.is_empty()),
            counter_file: env_or("COUNTER_FILE", "cache/counter.json"),
            api_keys,
            rate_max_requests: env_parse("RATE_MAX_REQUESTS", 15),
            rate_window_seconds: env_parse("RATE_WINDOW_SECONDS", 60),
            web_host: env_or("WEB_HOST", "0.0.0.0"),
            web_port: env_parse("WEB_PORT", 8000),
        }
    }

    /// The dedupe cap, widened so a full top-up cannot churn the store.
    pub fn effective_dedupe_max(&self) -> usize {
        self.dedupe_max.max(self.prefetch_fill_to)
    }

    /// True when at least one generation provider has credentials.
    pub fn has_llm_credentials(&self) -> bool {
        !self.openrouter_api_key.is_empty()
            || !self.groq_api_key.is_empty()
            || !self.gemini_api_key.is_empty()
    }

    /// Log which sensitive vars are present without leaking their values.
    pub fn log_redacted(&self) {
        let vars = [
            ("OPENROUTER_API_KEY", &self.openrouter_api_key),
            ("GROQ_API_KEY", &self.groq_api_key),
            ("GEMINI_API_KEY", &self.gemini_api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
