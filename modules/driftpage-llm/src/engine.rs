//! Generation orchestration: provider order, dedupe retries, review gating.

use std::sync::Arc;
use std::time::Duration;

use driftpage_common::{epoch_seconds, signature_for_doc, Config, Doc, DriftpageError};
use futures::stream::{BoxStream, StreamExt};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backoff::BackoffRegistry;
use crate::categories::{CategoryDirective, CategoryRotator};
use crate::chat::ChatCompletionsClient;
use crate::gemini::GeminiClient;
use crate::provider::{PageProvider, ProviderId};
use crate::review::{ReviewService, Reviewer};

const MAX_ATTEMPTS: usize = 3;
const SEED_RANGE: u64 = 10_000_000;
const SEED_PERTURB: u64 = 7919;
const SEED_MODULUS: u64 = 10_000_019;

/// Recent-signature store consulted for dedupe. Implemented by the prefetch
/// layer's file-backed store; tests inject their own.
pub trait DedupeStore: Send + Sync {
    fn has(&self, sig: &str) -> bool;
    fn add(&self, sig: &str);
}

/// A provider capable of streaming several documents from one request.
pub trait BurstProvider: Send + Sync {
    fn id(&self) -> ProviderId;
    fn burst(&self, brief: &str, seed: u64, category_note: &str) -> BoxStream<'static, Doc>;
}

impl BurstProvider for GeminiClient {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn burst(&self, brief: &str, seed: u64, category_note: &str) -> BoxStream<'static, Doc> {
        GeminiClient::burst(self, brief, seed, category_note).boxed()
    }
}

/// Live generation against upstream providers, or deterministic offline
/// stubs when no provider should be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Live,
    Stub,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: Option<&'static str>,
    pub has_token: bool,
    pub burst: bool,
    pub review: bool,
    pub providers: Vec<&'static str>,
}

pub struct GenerationEngine {
    providers: Vec<Arc<dyn PageProvider>>,
    burst: Option<Arc<dyn BurstProvider>>,
    reviewer: Option<Arc<dyn ReviewService>>,
    rotator: CategoryRotator,
    backoff: Arc<BackoffRegistry>,
    store: Arc<dyn DedupeStore>,
    mode: EngineMode,
    review_enabled: bool,
}

impl GenerationEngine {
    /// Wire up clients from configuration. Providers without credentials are
    /// left out; Gemini joins the single-generation order only when nothing
    /// else is configured.
    pub fn from_config(config: &Config, store: Arc<dyn DedupeStore>, mode: EngineMode) -> Self {
        let backoff = Arc::new(BackoffRegistry::new(
            config.backoff_initial_secs,
            config.backoff_max_secs,
        ));
        let timeout = Duration::from_secs(config.provider_timeout_secs);

        let openrouter = Arc::new(ChatCompletionsClient::openrouter(
            &config.openrouter_api_key,
            &config.openrouter_model,
            &config.openrouter_fallback_model,
            timeout,
            backoff.clone(),
        ));
        let groq = Arc::new(ChatCompletionsClient::groq(
            &config.groq_api_key,
            &config.groq_model,
            timeout,
            backoff.clone(),
        ));
        let gemini = GeminiClient::new(
            &config.gemini_api_key,
            &config.gemini_generation_model,
            &config.gemini_review_model,
            timeout,
            backoff.clone(),
        );

        let mut providers: Vec<Arc<dyn PageProvider>> = Vec::new();
        if openrouter.has_credentials() || config.force_primary {
            providers.push(openrouter.clone());
        }
        if groq.has_credentials() && !config.force_primary {
            providers.push(groq);
        }
        if providers.is_empty() && gemini.has_credentials() {
            // Reserved provider: only reached when burst is the sole option.
            providers.push(Arc::new(gemini.clone()));
        }

        let burst: Option<Arc<dyn BurstProvider>> = gemini
            .has_credentials()
            .then(|| Arc::new(gemini.clone()) as Arc<dyn BurstProvider>);

        let reviewer = config.review_enabled.then(|| {
            Arc::new(Reviewer::new(
                gemini.has_credentials().then(|| gemini.clone()),
                openrouter.has_credentials().then_some(openrouter),
                backoff.clone(),
                config.review_backoff_secs,
            )) as Arc<dyn ReviewService>
        });

        Self {
            providers,
            burst,
            reviewer,
            rotator: CategoryRotator::new(),
            backoff,
            store,
            mode,
            review_enabled: config.review_enabled,
        }
    }

    /// Construct from explicit parts; this is the seam tests use to script
    /// providers and reviewers.
    pub fn new(
        providers: Vec<Arc<dyn PageProvider>>,
        burst: Option<Arc<dyn BurstProvider>>,
        reviewer: Option<Arc<dyn ReviewService>>,
        backoff: Arc<BackoffRegistry>,
        store: Arc<dyn DedupeStore>,
        mode: EngineMode,
        review_enabled: bool,
    ) -> Self {
        Self {
            providers,
            burst,
            reviewer,
            rotator: CategoryRotator::new(),
            backoff,
            store,
            mode,
            review_enabled,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// The reviewer used for inline review, shared with the top-up worker.
    pub fn reviewer(&self) -> Option<Arc<dyn ReviewService>> {
        self.reviewer.clone()
    }

    pub fn status(&self) -> ProviderStatus {
        let providers: Vec<&'static str> =
            self.providers.iter().map(|p| p.id().as_str()).collect();
        ProviderStatus {
            provider: providers.first().copied(),
            has_token: !providers.is_empty() || self.burst.is_some(),
            burst: self.burst.is_some(),
            review: self.review_enabled
                && self.reviewer.as_ref().is_some_and(|r| r.is_configured()),
            providers,
        }
    }

    /// Generate one reviewed, deduplicated document.
    pub async fn generate_page(
        &self,
        brief: &str,
        seed: Option<u64>,
        user_key: &str,
        run_review: bool,
    ) -> Result<Doc, DriftpageError> {
        self.generate_page_with_providers(brief, seed, user_key, run_review, None)
            .await
    }

    pub async fn generate_page_with_providers(
        &self,
        brief: &str,
        seed: Option<u64>,
        user_key: &str,
        run_review: bool,
        providers: Option<&[ProviderId]>,
    ) -> Result<Doc, DriftpageError> {
        let brief = normalize_brief(brief);
        let mut seed = normalize_seed(seed);

        if self.mode == EngineMode::Stub {
            let directive = self.rotator.next(user_key);
            return Ok(stub_doc(brief, seed, &directive));
        }

        let order: Vec<&Arc<dyn PageProvider>> = match providers {
            Some(wanted) => self
                .providers
                .iter()
                .filter(|p| wanted.contains(&p.id()))
                .collect(),
            None => self.providers.iter().collect(),
        };
        if order.is_empty() {
            return Err(DriftpageError::Provider("Model generation failed".into()));
        }

        // A reviewed doc that only failed the final dedupe re-check; served
        // as a last resort rather than wasting the review. Blocked drafts
        // never land here.
        let mut last_reviewed: Option<Doc> = None;

        for attempt in 0..MAX_ATTEMPTS {
            let directive = self.rotator.next(user_key);

            let mut doc = None;
            for provider in &order {
                if self.backoff.active(provider.id().as_str()) {
                    debug!(provider = %provider.id(), "skipping provider in backoff");
                    continue;
                }
                if let Some(d) = provider.generate(brief, seed, directive.note).await {
                    doc = Some(d);
                    break;
                }
            }
            let Some(mut doc) = doc else {
                return Err(DriftpageError::Provider("Model generation failed".into()));
            };
            doc.category = Some(directive.slug.to_string());

            let draft_sig = signature_for_doc(&doc);
            if !draft_sig.is_empty() && self.store.has(&draft_sig) {
                debug!(attempt, "draft is a structural duplicate, perturbing seed");
                seed = perturb_seed(seed);
                continue;
            }

            if run_review && self.review_enabled {
                if let Some(reviewer) = &self.reviewer {
                    let outcome = reviewer.review(&doc, brief, directive.note).await;
                    if !outcome.ok {
                        info!(attempt, "draft blocked by compliance review, retrying");
                        seed = perturb_seed(seed);
                        continue;
                    }
                    if let Some(corrected) = outcome.corrected {
                        doc = corrected;
                        doc.category = Some(directive.slug.to_string());
                    }
                    if let Some(mut record) = outcome.record {
                        record.doc = None;
                        doc.review = Some(record);
                    }
                }
            }

            let final_sig = signature_for_doc(&doc);
            if !final_sig.is_empty() && final_sig != draft_sig && self.store.has(&final_sig) {
                debug!(attempt, "reviewed doc is a structural duplicate, perturbing seed");
                last_reviewed = Some(doc);
                seed = perturb_seed(seed);
                continue;
            }

            if !final_sig.is_empty() {
                self.store.add(&final_sig);
            }
            doc.created_at = Some(epoch_seconds());
            return Ok(doc);
        }

        match last_reviewed {
            Some(mut doc) => {
                doc.created_at = Some(epoch_seconds());
                Ok(doc)
            }
            None => Err(DriftpageError::Provider("Model generation failed".into())),
        }
    }

    /// Lazy stream of up to ten documents from one burst request, falling
    /// back to single generation when the stream produces nothing. The
    /// stream's documents are neither reviewed nor deduplicated; callers
    /// enqueue spares through the queue's dedupe gate and defer review.
    pub fn generate_burst(
        &self,
        brief: &str,
        seed: Option<u64>,
        user_key: &str,
    ) -> BoxStream<'static, Doc> {
        let brief = normalize_brief(brief).to_string();
        let seed = normalize_seed(seed);
        let directive = self.rotator.next(user_key);

        if self.mode == EngineMode::Stub {
            let docs: Vec<Doc> = (0..3)
                .map(|i| stub_doc(&brief, seed.wrapping_add(i), &directive))
                .collect();
            return futures::stream::iter(docs).boxed();
        }

        let burst = self.burst.clone();
        let providers = self.providers.clone();
        let backoff = self.backoff.clone();

        let stream = async_stream::stream! {
            let mut yielded = 0usize;
            if let Some(burst) = &burst {
                if !backoff.active(burst.id().as_str()) {
                    let mut inner = burst.burst(&brief, seed, directive.note);
                    while let Some(mut doc) = inner.next().await {
                        doc.category = Some(directive.slug.to_string());
                        yielded += 1;
                        yield doc;
                    }
                }
            }
            if yielded == 0 {
                // Empty or failed burst: fall through to the single path.
                warn!("burst produced no documents, falling back to single generation");
                for provider in &providers {
                    if backoff.active(provider.id().as_str()) {
                        continue;
                    }
                    if let Some(mut doc) = provider.generate(&brief, seed, directive.note).await {
                        doc.category = Some(directive.slug.to_string());
                        yield doc;
                        break;
                    }
                }
            }
        };
        stream.boxed()
    }
}

fn normalize_brief(brief: &str) -> &str {
    let trimmed = brief.trim();
    let lowered = trimmed.to_lowercase();
    if matches!(lowered.as_str(), "" | "auto" | "random" | "surprise me") {
        ""
    } else {
        trimmed
    }
}

fn normalize_seed(seed: Option<u64>) -> u64 {
    match seed {
        Some(s) if s != 0 => s,
        _ => rand::rng().random_range(1..=SEED_RANGE),
    }
}

fn perturb_seed(seed: u64) -> u64 {
    (seed + SEED_PERTURB) % SEED_MODULUS
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Deterministic offline document. The seed-keyed class keeps stub docs
/// structurally distinct so they pass the dedupe gate.
fn stub_doc(brief: &str, seed: u64, directive: &CategoryDirective) -> Doc {
    let brief_text = if brief.is_empty() { "(auto)" } else { brief };
    let html = format!(
        "<!doctype html><html><head><title>Offline preview</title></head><body>\
         <main class=\"offline-preview seed-{seed}\"><h1>Offline preview</h1>\
         <p>brief: {}</p><p>seed: {seed}</p><p>category: {}</p></main></body></html>",
        escape_html(brief_text),
        directive.slug,
    );
    let mut doc = Doc::full_page(html);
    doc.category = Some(directive.slug.to_string());
    doc.created_at = Some(epoch_seconds());
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftpage_common::doc::DocBody;
    use std::collections::HashSet;
    use std::sync::Mutex;

    // --- Test doubles ---

    #[derive(Default)]
    struct MemoryStore {
        seen: Mutex<HashSet<String>>,
    }

    impl DedupeStore for MemoryStore {
        fn has(&self, sig: &str) -> bool {
            self.seen.lock().unwrap().contains(sig)
        }
        fn add(&self, sig: &str) {
            self.seen.lock().unwrap().insert(sig.to_string());
        }
    }

    /// Provider that pops scripted responses and records the prompts it saw.
    struct ScriptedProvider {
        id: ProviderId,
        responses: Mutex<Vec<Option<Doc>>>,
        notes_seen: Mutex<Vec<String>>,
        seeds_seen: Mutex<Vec<u64>>,
    }

    impl ScriptedProvider {
        fn new(id: ProviderId, responses: Vec<Option<Doc>>) -> Arc<Self> {
            Arc::new(Self {
                id,
                responses: Mutex::new(responses),
                notes_seen: Mutex::new(Vec::new()),
                seeds_seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl PageProvider for ScriptedProvider {
        fn id(&self) -> ProviderId {
            self.id
        }
        async fn generate(&self, _brief: &str, seed: u64, category_note: &str) -> Option<Doc> {
            self.notes_seen.lock().unwrap().push(category_note.to_string());
            self.seeds_seen.lock().unwrap().push(seed);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                responses.remove(0)
            }
        }
    }

    fn page(class: &str) -> Doc {
        Doc::full_page(format!(
            "<!doctype html><html><body><div class=\"{class}\"><p>text</p></div></body></html>"
        ))
    }

    fn engine_with(
        providers: Vec<Arc<dyn PageProvider>>,
        store: Arc<dyn DedupeStore>,
    ) -> GenerationEngine {
        GenerationEngine::new(
            providers,
            None,
            None,
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            store,
            EngineMode::Live,
            false,
        )
    }

    #[tokio::test]
    async fn first_provider_win_is_returned() {
        let provider = ScriptedProvider::new(ProviderId::OpenRouter, vec![Some(page("a"))]);
        let engine = engine_with(vec![provider.clone()], Arc::new(MemoryStore::default()));
        let doc = engine.generate_page("brief", Some(7), "u", false).await.unwrap();
        assert!(matches!(doc.body, DocBody::FullPage { .. }));
        assert_eq!(doc.category.as_deref(), Some("web-toy"));
        assert!(doc.created_at.is_some());
        assert_eq!(provider.seeds_seen.lock().unwrap().as_slice(), &[7]);
    }

    #[tokio::test]
    async fn category_notes_rotate_per_call() {
        let provider = ScriptedProvider::new(
            ProviderId::OpenRouter,
            (0..7).map(|i| Some(page(&format!("c{i}")))).collect(),
        );
        let engine = engine_with(vec![provider.clone()], Arc::new(MemoryStore::default()));
        for _ in 0..7 {
            engine.generate_page("", None, "user", false).await.unwrap();
        }
        let notes = provider.notes_seen.lock().unwrap();
        assert_eq!(notes.len(), 7);
        let expected: Vec<&str> = crate::categories::CATEGORY_DIRECTIVES
            .iter()
            .map(|d| d.note)
            .collect();
        assert_eq!(&notes[..5], expected.as_slice());
        assert_eq!(notes[5], notes[0]);
        assert_eq!(notes[6], notes[1]);
    }

    #[tokio::test]
    async fn fallback_provider_is_tried_in_order() {
        let primary = ScriptedProvider::new(ProviderId::OpenRouter, vec![None]);
        let fallback = ScriptedProvider::new(ProviderId::Groq, vec![Some(page("fb"))]);
        let engine = engine_with(
            vec![primary.clone(), fallback.clone()],
            Arc::new(MemoryStore::default()),
        );
        let doc = engine.generate_page("", Some(1), "u", false).await.unwrap();
        assert!(doc.primary_html().unwrap().contains("fb"));
        assert_eq!(primary.notes_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_providers_failing_is_an_error() {
        let provider = ScriptedProvider::new(ProviderId::OpenRouter, vec![None]);
        let engine = engine_with(vec![provider], Arc::new(MemoryStore::default()));
        let err = engine.generate_page("", Some(1), "u", false).await.unwrap_err();
        assert!(err.to_string().contains("Model generation failed"));
    }

    #[tokio::test]
    async fn duplicate_drafts_perturb_the_seed_then_fail() {
        // Three structurally identical drafts: every attempt collides.
        let provider = ScriptedProvider::new(
            ProviderId::OpenRouter,
            vec![Some(page("same")), Some(page("same")), Some(page("same"))],
        );
        let store = Arc::new(MemoryStore::default());
        store.add(&signature_for_doc(&page("same")));
        let engine = engine_with(vec![provider.clone()], store);

        let err = engine.generate_page("", Some(100), "u", false).await.unwrap_err();
        assert!(err.to_string().contains("Model generation failed"));

        let seeds = provider.seeds_seen.lock().unwrap();
        assert_eq!(seeds.as_slice(), &[100, 100 + 7919, 100 + 2 * 7919]);
    }

    #[tokio::test]
    async fn accepted_docs_are_recorded_in_the_store() {
        let provider = ScriptedProvider::new(
            ProviderId::OpenRouter,
            vec![Some(page("x")), Some(page("x"))],
        );
        let store = Arc::new(MemoryStore::default());
        let engine = engine_with(vec![provider], store.clone());

        engine.generate_page("", Some(1), "u", false).await.unwrap();
        assert!(store.has(&signature_for_doc(&page("x"))));
    }

    #[tokio::test]
    async fn providers_in_backoff_are_skipped() {
        let primary = ScriptedProvider::new(ProviderId::OpenRouter, vec![Some(page("p"))]);
        let fallback = ScriptedProvider::new(ProviderId::Groq, vec![Some(page("f"))]);
        let backoff = Arc::new(BackoffRegistry::new(30.0, 60.0));
        backoff.record(ProviderId::OpenRouter.as_str());
        let engine = GenerationEngine::new(
            vec![primary.clone(), fallback],
            None,
            None,
            backoff,
            Arc::new(MemoryStore::default()),
            EngineMode::Live,
            false,
        );
        let doc = engine.generate_page("", Some(1), "u", false).await.unwrap();
        assert!(doc.primary_html().unwrap().contains('f'));
        assert!(primary.notes_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_override_filters_the_order() {
        let primary = ScriptedProvider::new(ProviderId::OpenRouter, vec![Some(page("p"))]);
        let fallback = ScriptedProvider::new(ProviderId::Groq, vec![Some(page("f"))]);
        let engine = engine_with(
            vec![primary, fallback],
            Arc::new(MemoryStore::default()),
        );
        let doc = engine
            .generate_page_with_providers("", Some(1), "u", false, Some(&[ProviderId::Groq]))
            .await
            .unwrap();
        assert!(doc.primary_html().unwrap().contains('f'));
    }

    #[tokio::test]
    async fn stub_mode_is_deterministic_and_offline() {
        let engine = GenerationEngine::new(
            Vec::new(),
            None,
            None,
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            Arc::new(MemoryStore::default()),
            EngineMode::Stub,
            false,
        );
        let doc = engine
            .generate_page("a <script> brief", Some(5), "u", true)
            .await
            .unwrap();
        let html = doc.primary_html().unwrap();
        assert!(html.contains("seed-5"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("category: web-toy"));
    }

    #[tokio::test]
    async fn stub_burst_docs_are_structurally_distinct() {
        let engine = GenerationEngine::new(
            Vec::new(),
            None,
            None,
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            Arc::new(MemoryStore::default()),
            EngineMode::Stub,
            false,
        );
        let docs: Vec<Doc> = engine.generate_burst("", Some(9), "u").collect().await;
        assert_eq!(docs.len(), 3);
        let sigs: HashSet<String> = docs.iter().map(signature_for_doc).collect();
        assert_eq!(sigs.len(), 3);
    }

    #[tokio::test]
    async fn empty_burst_falls_back_to_single_generation() {
        struct EmptyBurst;
        impl BurstProvider for EmptyBurst {
            fn id(&self) -> ProviderId {
                ProviderId::Gemini
            }
            fn burst(&self, _: &str, _: u64, _: &str) -> BoxStream<'static, Doc> {
                futures::stream::iter(Vec::<Doc>::new()).boxed()
            }
        }
        let single = ScriptedProvider::new(ProviderId::OpenRouter, vec![Some(page("single"))]);
        let engine = GenerationEngine::new(
            vec![single],
            Some(Arc::new(EmptyBurst)),
            None,
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            Arc::new(MemoryStore::default()),
            EngineMode::Live,
            false,
        );
        let docs: Vec<Doc> = engine.generate_burst("", Some(1), "u").collect().await;
        assert_eq!(docs.len(), 1);
        assert!(docs[0].primary_html().unwrap().contains("single"));
    }

    /// Reviewer scripted with a queue of outcomes.
    struct ScriptedReviewer {
        outcomes: Mutex<Vec<ReviewOutcome>>,
    }

    impl ScriptedReviewer {
        fn new(outcomes: Vec<ReviewOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
            })
        }
    }

    #[async_trait::async_trait]
    impl crate::review::ReviewService for ScriptedReviewer {
        async fn review(&self, _doc: &Doc, _brief: &str, _note: &str) -> ReviewOutcome {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                ReviewOutcome {
                    record: None,
                    corrected: None,
                    ok: true,
                }
            } else {
                outcomes.remove(0)
            }
        }

        async fn review_batch(
            &self,
            docs: &[Doc],
        ) -> Vec<Option<driftpage_common::doc::ReviewRecord>> {
            (0..docs.len()).map(|_| None).collect()
        }
    }

    use crate::review::ReviewOutcome;
    use driftpage_common::doc::{Issue, ReviewRecord, Severity};

    fn blocked_outcome() -> ReviewOutcome {
        ReviewOutcome {
            record: Some(ReviewRecord {
                ok: false,
                issues: vec![Issue {
                    severity: Severity::Block,
                    field: "html".into(),
                    message: "unsafe".into(),
                }],
                notes: "blocked".into(),
                doc: None,
            }),
            corrected: None,
            ok: false,
        }
    }

    #[tokio::test]
    async fn blocked_reviews_retry_and_never_ship_the_draft() {
        let provider = ScriptedProvider::new(
            ProviderId::OpenRouter,
            vec![Some(page("r1")), Some(page("r2")), Some(page("r3"))],
        );
        let reviewer =
            ScriptedReviewer::new(vec![blocked_outcome(), blocked_outcome(), blocked_outcome()]);
        let engine = GenerationEngine::new(
            vec![provider.clone()],
            None,
            Some(reviewer),
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            Arc::new(MemoryStore::default()),
            EngineMode::Live,
            true,
        );
        let err = engine.generate_page("", Some(1), "u", true).await.unwrap_err();
        assert!(err.to_string().contains("Model generation failed"));
        assert_eq!(provider.seeds_seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn corrected_docs_replace_the_draft_and_carry_the_record() {
        let corrected = Doc::full_page(
            "<!doctype html><html><body><main id=\"shell\">Reviewed</main></body></html>",
        );
        let outcome = ReviewOutcome {
            record: Some(ReviewRecord {
                ok: true,
                issues: vec![Issue {
                    severity: Severity::Info,
                    field: "html".into(),
                    message: "tidied".into(),
                }],
                notes: "".into(),
                doc: Some(Box::new(corrected.clone())),
            }),
            corrected: Some(corrected),
            ok: true,
        };
        let provider = ScriptedProvider::new(ProviderId::OpenRouter, vec![Some(page("draft"))]);
        let engine = GenerationEngine::new(
            vec![provider],
            None,
            Some(ScriptedReviewer::new(vec![outcome])),
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            Arc::new(MemoryStore::default()),
            EngineMode::Live,
            true,
        );
        let doc = engine.generate_page("", Some(1), "u", true).await.unwrap();
        assert!(doc.primary_html().unwrap().contains("Reviewed"));
        let record = doc.review.unwrap();
        assert!(record.ok);
        // The attached record does not duplicate the payload.
        assert!(record.doc.is_none());
    }

    #[tokio::test]
    async fn run_review_false_skips_the_reviewer() {
        let provider = ScriptedProvider::new(ProviderId::OpenRouter, vec![Some(page("x"))]);
        let engine = GenerationEngine::new(
            vec![provider],
            None,
            Some(ScriptedReviewer::new(vec![blocked_outcome()])),
            Arc::new(BackoffRegistry::new(1.0, 10.0)),
            Arc::new(MemoryStore::default()),
            EngineMode::Live,
            true,
        );
        let doc = engine.generate_page("", Some(1), "u", false).await.unwrap();
        assert!(doc.review.is_none());
    }

    #[test]
    fn brief_normalization() {
        assert_eq!(normalize_brief("  Surprise Me "), "");
        assert_eq!(normalize_brief("auto"), "");
        assert_eq!(normalize_brief("RANDOM"), "");
        assert_eq!(normalize_brief(" a quiz "), "a quiz");
    }

    #[test]
    fn seed_normalization_and_perturbation() {
        assert_eq!(normalize_seed(Some(5)), 5);
        let s = normalize_seed(None);
        assert!((1..=SEED_RANGE).contains(&s));
        let z = normalize_seed(Some(0));
        assert!((1..=SEED_RANGE).contains(&z));
        assert_eq!(perturb_seed(10_000_019), 7919);
    }
}
