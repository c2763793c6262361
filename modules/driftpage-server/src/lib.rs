pub mod auth;
pub mod counter;
pub mod ratelimit;
pub mod routes;

use std::sync::Arc;

use driftpage_common::Config;
use driftpage_llm::{EngineMode, GenerationEngine};
use driftpage_prefetch::{Prefetcher, PrefetchQueue, SignatureStore};

use counter::ServedCounter;
use ratelimit::RateLimiter;

pub struct AppState {
    pub config: Config,
    pub engine: Arc<GenerationEngine>,
    pub queue: Arc<PrefetchQueue>,
    pub prefetcher: Arc<Prefetcher>,
    pub limiter: RateLimiter,
    pub counter: ServedCounter,
}

/// Wire the whole pipeline from configuration. The engine runs live when any
/// provider is credentialed; otherwise it serves offline stubs (when allowed)
/// or the dispatcher answers 503.
pub fn build_state(config: Config) -> Arc<AppState> {
    let mode = if !config.has_llm_credentials() && config.allow_offline_generation {
        EngineMode::Stub
    } else {
        // Unconfigured without the offline flag stays Live; the dispatcher
        // answers 503 before the engine is ever asked.
        EngineMode::Live
    };
    build_state_with_mode(config, mode)
}

/// Explicit-mode construction; tests use this to force the offline stub
/// engine while exercising the credentialed code paths.
pub fn build_state_with_mode(config: Config, mode: EngineMode) -> Arc<AppState> {
    let store = Arc::new(SignatureStore::from_config(&config));
    let engine = Arc::new(GenerationEngine::from_config(&config, store.clone(), mode));
    let queue = Arc::new(PrefetchQueue::from_config(&config, store.clone()));
    let prefetcher = Prefetcher::new(
        queue.clone(),
        engine.clone(),
        engine.reviewer(),
        store,
        &config,
    );
    let limiter = RateLimiter::new(config.rate_max_requests, config.rate_window_seconds);
    let counter = ServedCounter::new(&config.counter_file);

    Arc::new(AppState {
        config,
        engine,
        queue,
        prefetcher,
        limiter,
        counter,
    })
}
