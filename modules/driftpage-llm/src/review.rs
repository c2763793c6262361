//! Compliance review of generated documents, single and batched.
//!
//! Review is best-effort: a reviewer that is unconfigured, cooling off or
//! unreachable fails open (the document proceeds unreviewed) rather than
//! blocking generation.

use std::sync::Arc;

use driftpage_common::doc::{
    normalize_doc, truncate_to_char_boundary, Doc, Issue, ReviewRecord, Severity,
};
use driftpage_common::extract::repair_json_loose;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backoff::BackoffRegistry;
use crate::chat::ChatCompletionsClient;
use crate::gemini::GeminiClient;
use crate::prompts::{
    build_batch_review_prompt, build_review_prompt, gemini_batch_review_schema,
    gemini_review_schema,
};
use crate::structured::openai_schema_for;

pub const REVIEWER_BACKOFF_KEY: &str = "reviewer";
const NOTES_MAX_CHARS: usize = 160;

// =============================================================================
// Wire shapes
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IssueWire {
    pub severity: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReviewWire {
    pub ok: bool,
    #[serde(default)]
    pub issues: Vec<IssueWire>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchItemWire {
    pub index: i64,
    pub ok: bool,
    #[serde(default)]
    pub issues: Vec<IssueWire>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchReviewWire {
    pub results: Vec<BatchItemWire>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one review pass. `ok == false` means the draft must not ship as
/// is; a present `corrected` doc is the repaired replacement.
#[derive(Debug)]
pub struct ReviewOutcome {
    pub record: Option<ReviewRecord>,
    pub corrected: Option<Doc>,
    pub ok: bool,
}

impl ReviewOutcome {
    fn skipped() -> Self {
        Self {
            record: None,
            corrected: None,
            ok: true,
        }
    }
}

/// Seam between the engine/top-up and the concrete reviewer; tests inject
/// scripted implementations.
#[async_trait::async_trait]
pub trait ReviewService: Send + Sync {
    /// Whether a reviewer backend is actually reachable with credentials.
    fn is_configured(&self) -> bool {
        true
    }
    async fn review(&self, doc: &Doc, brief: &str, category_note: &str) -> ReviewOutcome;
    async fn review_batch(&self, docs: &[Doc]) -> Vec<Option<ReviewRecord>>;
}

pub struct Reviewer {
    gemini: Option<GeminiClient>,
    repair: Option<Arc<ChatCompletionsClient>>,
    backoff: Arc<BackoffRegistry>,
    review_backoff_secs: f64,
}

#[async_trait::async_trait]
impl ReviewService for Reviewer {
    fn is_configured(&self) -> bool {
        Reviewer::is_configured(self)
    }

    async fn review(&self, doc: &Doc, brief: &str, category_note: &str) -> ReviewOutcome {
        Reviewer::review(self, doc, brief, category_note).await
    }

    async fn review_batch(&self, docs: &[Doc]) -> Vec<Option<ReviewRecord>> {
        Reviewer::review_batch(self, docs).await
    }
}

impl Reviewer {
    pub fn new(
        gemini: Option<GeminiClient>,
        repair: Option<Arc<ChatCompletionsClient>>,
        backoff: Arc<BackoffRegistry>,
        review_backoff_secs: f64,
    ) -> Self {
        Self {
            gemini,
            repair,
            backoff,
            review_backoff_secs,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.gemini.as_ref().is_some_and(|g| g.has_credentials())
    }

    fn available(&self) -> Option<&GeminiClient> {
        if self.backoff.active(REVIEWER_BACKOFF_KEY) {
            return None;
        }
        self.gemini.as_ref().filter(|g| g.has_credentials())
    }

    /// Review one document against its brief and category directive.
    pub async fn review(&self, doc: &Doc, brief: &str, category_note: &str) -> ReviewOutcome {
        let Some(gemini) = self.available() else {
            return ReviewOutcome::skipped();
        };

        let prompt = build_review_prompt(doc, brief, category_note);
        let raw = match gemini
            .generate_json(gemini.review_model(), &prompt, Some(gemini_review_schema()))
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                // Rate-limited: cool the reviewer off and fail open.
                self.backoff
                    .record_fixed(REVIEWER_BACKOFF_KEY, self.review_backoff_secs);
                return ReviewOutcome::skipped();
            }
            Err(e) => {
                warn!(error = %e, "Reviewer unreachable, skipping review");
                return ReviewOutcome::skipped();
            }
        };

        let Some(wire) = self.parse_or_repair::<ReviewWire>(&raw, "review").await else {
            return ReviewOutcome::skipped();
        };
        outcome_from_wire(wire)
    }

    /// Review `docs` in one indexed prompt. The returned vec is aligned with
    /// the input; `None` marks entries that could not be reviewed this round.
    pub async fn review_batch(&self, docs: &[Doc]) -> Vec<Option<ReviewRecord>> {
        let mut out: Vec<Option<ReviewRecord>> = (0..docs.len()).map(|_| None).collect();
        if docs.is_empty() {
            return out;
        }
        let Some(gemini) = self.available() else {
            return out;
        };

        let prompt = build_batch_review_prompt(docs);
        let raw = match gemini
            .generate_json(
                gemini.review_model(),
                &prompt,
                Some(gemini_batch_review_schema()),
            )
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.backoff
                    .record_fixed(REVIEWER_BACKOFF_KEY, self.review_backoff_secs);
                return out;
            }
            Err(e) => {
                warn!(error = %e, "Batch reviewer unreachable, falling back to singles");
                return self.review_singles(docs).await;
            }
        };

        let Some(wire) = self.parse_or_repair::<BatchReviewWire>(&raw, "batch_review").await
        else {
            return self.review_singles(docs).await;
        };

        for item in wire.results {
            let Ok(idx) = usize::try_from(item.index) else {
                continue;
            };
            if idx >= docs.len() {
                warn!(index = item.index, "Batch review verdict for unknown index, discarding");
                continue;
            }
            out[idx] = Some(record_from_wire(ReviewWire {
                ok: item.ok,
                issues: item.issues,
                notes: item.notes,
                doc: item.doc,
            }));
        }
        out
    }

    async fn review_singles(&self, docs: &[Doc]) -> Vec<Option<ReviewRecord>> {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let outcome = self.review(doc, "", "").await;
            out.push(outcome.record);
        }
        out
    }

    /// Parse reviewer output, trying loose truncation repair first, then a
    /// one-shot schema-constrained repair through the secondary provider.
    async fn parse_or_repair<T>(&self, raw: &str, name: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned + JsonSchema,
    {
        if let Ok(wire) = serde_json::from_str::<T>(raw) {
            return Some(wire);
        }
        if let Ok(wire) = serde_json::from_str::<T>(&repair_json_loose(raw)) {
            debug!(name, "Reviewer output repaired by closing truncation");
            return Some(wire);
        }
        if let Some(repair) = &self.repair {
            if repair.has_credentials() {
                let schema = openai_schema_for::<T>();
                if let Some(value) = repair.repair_to_schema(raw, schema, name).await {
                    if let Ok(wire) = serde_json::from_value::<T>(value) {
                        debug!(name, "Reviewer output repaired via secondary provider");
                        return Some(wire);
                    }
                }
            }
        }
        warn!(name, "Unparseable reviewer output, skipping review");
        None
    }
}

fn record_from_wire(wire: ReviewWire) -> ReviewRecord {
    let issues = wire
        .issues
        .into_iter()
        .map(|i| Issue {
            severity: i.severity.parse().unwrap_or(Severity::Warn),
            field: i.field,
            message: i.message,
        })
        .collect();
    let corrected = wire
        .doc
        .as_ref()
        .filter(|v| v.is_object())
        .and_then(|v| match normalize_doc(v) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "Reviewer-corrected doc failed normalization, ignoring");
                None
            }
        });
    ReviewRecord {
        ok: wire.ok,
        issues,
        notes: truncate_to_char_boundary(&wire.notes, NOTES_MAX_CHARS).to_string(),
        doc: corrected.map(Box::new),
    }
}

fn outcome_from_wire(wire: ReviewWire) -> ReviewOutcome {
    let record = record_from_wire(wire);
    let corrected = record.doc.as_deref().cloned();
    let ok = !record.blocks();
    ReviewOutcome {
        record: Some(record),
        corrected,
        ok,
    }
}
