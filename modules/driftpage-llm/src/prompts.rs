//! Prompt assembly for generation and compliance review.

use driftpage_common::Doc;
use serde_json::{json, Value};

/// Fixed description of the recognized document shapes, injected into every
/// generation prompt.
pub const SHAPE_HINT: &str = "\
OUTPUT FORMAT — respond with exactly one JSON object in one of these shapes:\n\
1. {\"kind\": \"ndw_snippet_v1\", \"title\": \"...\", \"background\": {\"style\": \"...\", \"class\": \"...\"}, \"css\": \"...\", \"html\": \"...\", \"js\": \"...\"}\n\
   At least one of css/html/js must be non-empty. html is a body fragment, not a full document.\n\
2. {\"kind\": \"full_page_html\", \"html\": \"<!doctype html>...\"}\n\
   html must be a complete standalone document starting with a doctype or <html>.\n\
3. {\"components\": [{\"id\": \"...\", \"type\": \"custom\", \"props\": {\"html\": \"...\", \"height\": 360}}]}\n\
   Each component's props.html is required; height is a pixel integer.\n\
Inline all CSS and JavaScript. Never reference external scripts, stylesheets,\n\
fonts or CDNs; Tailwind CSS, GSAP and Lucide are already available globally.\n\
No markdown fences, no commentary, JSON only.";

/// Prompt for a single page generation.
pub fn build_page_prompt(category_note: &str, brief: &str, seed: u64) -> String {
    let brief = if brief.trim().is_empty() {
        "(auto generated — pick something delightful)"
    } else {
        brief
    };
    format!(
        "{category_note}\n\n{SHAPE_HINT}\n\nBrief: {brief}\nSeed: {seed} (use it to vary palette and layout choices)"
    )
}

/// Prompt for a burst: one streamed response carrying an array of documents.
pub fn build_burst_prompt(category_note: &str, brief: &str, seed: u64, count: usize) -> String {
    format!(
        "{}\n\nProduce a JSON ARRAY of exactly {count} distinct documents, each in one of the shapes above. \
         Vary category, layout and palette between entries; no two entries may share a layout.",
        build_page_prompt(category_note, brief, seed)
    )
}

fn serialize_doc(doc: &Doc) -> String {
    serde_json::to_string_pretty(doc).unwrap_or_else(|_| format!("{doc:?}"))
}

/// Prompt for reviewing a single document.
pub fn build_review_prompt(doc: &Doc, brief: &str, category_note: &str) -> String {
    let brief = if brief.trim().is_empty() {
        "(auto generated)"
    } else {
        brief
    };
    format!(
        "You are a compliance reviewer and fixer for interactive web apps. \
         Inspect the provided JSON payload for safety, policy violations, markup/runtime bugs, or accessibility issues. \
         If problems are minor, repair them directly and return the corrected payload. \
         If the experience is unsafe or too broken to repair confidently, reject it. \
         Hard rules: remove any external <script src>, <link href>, or CSS @import urls (http/https). \
         Do not rely on external fonts/images/CDNs; assume GSAP, Tailwind CSS, and Lucide are already present globally. \
         Output JSON only. No explanations. \
         Respond with compact JSON using this schema:\n\
         {{\"ok\": true|false, \"issues\":[{{\"severity\":\"info|warn|block\",\"field\":\"...\",\"message\":\"...\"}}],\"notes\":\"optional summary\",\"doc\":{{...optional corrected payload...}} or null}}\n\
         Always include keys ok, issues, notes, and doc. If there are no issues, use an empty issues array. \
         Notes must be <= 160 characters and MUST be an empty string when there are no issues. \
         Always include doc; set doc to null if you made no corrections. \
         If you corrected the payload, include the corrected doc object. \
         Only set ok=true if the final payload (original or corrected) is safe, functional, and accessible.\n\n\
         Brief: {brief}\n\
         Category Instruction: {category_note}\n\n\
         App JSON:\n{payload}\n",
        payload = serialize_doc(doc),
    )
}

/// Prompt for reviewing a batch of documents in one call; results carry the
/// index of the entry they apply to.
pub fn build_batch_review_prompt(docs: &[Doc]) -> String {
    let sections: Vec<String> = docs
        .iter()
        .enumerate()
        .map(|(idx, doc)| format!("APP_INDEX: {idx}\nJSON:\n{}\n", serialize_doc(doc)))
        .collect();
    format!(
        "You are a compliance reviewer and fixer for interactive web apps. \
         Evaluate each document below. Return a JSON object with a 'results' array. \
         Each array element is:\n\
         {{\"index\": <matching APP_INDEX>, \"ok\": true|false, \"issues\":[{{\"severity\":\"info|warn|block\",\"field\":\"...\",\"message\":\"...\"}}], \"notes\":\"optional summary\", \"doc\":{{...optional corrected payload...}} or null}}\n\
         Output JSON only. No explanations. The first non-whitespace character MUST be '{{'. \
         Only set ok=true if the payload (original or corrected) is safe, functional, and accessible. \
         Hard rules: remove any external <script src>, <link href>, or CSS @import urls (http/https). \
         Do not rely on external fonts/images/CDNs; assume GSAP, Tailwind CSS, and Lucide are already present globally. \
         Always include ok, issues, notes, and doc in every result. If there are no issues, use an empty issues array. \
         Notes must be <= 160 characters and MUST be an empty string when there are no issues. \
         Always include doc; set doc to null if you made no corrections. \
         If a document is irreparable, set ok=false and set doc to null.\n\n---\n{}",
        sections.join("\n---\n"),
    )
}

// =============================================================================
// Gemini response schemas
// =============================================================================
// Gemini's responseSchema dialect rejects additionalProperties and maxLength,
// so these are kept looser than the prompt-described schema.

fn gemini_issue_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "severity": {"type": "string"},
            "field": {"type": "string"},
            "message": {"type": "string"},
        },
        "required": ["severity", "field", "message"],
    })
}

fn gemini_doc_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "kind": {"type": "string"},
            "html": {"type": "string"},
        },
        "required": ["kind", "html"],
    })
}

pub fn gemini_review_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ok": {"type": "boolean"},
            "issues": {"type": "array", "items": gemini_issue_schema()},
            "notes": {"type": "string"},
            "doc": gemini_doc_schema(),
        },
        "required": ["ok"],
    })
}

pub fn gemini_batch_review_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "results": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer"},
                        "ok": {"type": "boolean"},
                        "issues": {"type": "array", "items": gemini_issue_schema()},
                        "notes": {"type": "string"},
                        "doc": gemini_doc_schema(),
                    },
                    "required": ["index", "ok"],
                },
            },
        },
        "required": ["results"],
    })
}

/// Schema pinning a burst response to an array of up to `count` documents.
pub fn gemini_burst_schema(count: usize) -> Value {
    json!({
        "type": "array",
        "maxItems": count,
        "items": {
            "type": "object",
            "properties": {
                "kind": {"type": "string"},
                "title": {"type": "string"},
                "css": {"type": "string"},
                "html": {"type": "string"},
                "js": {"type": "string"},
            },
            "required": ["kind", "html"],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftpage_common::doc::normalize_doc;
    use serde_json::json;

    #[test]
    fn page_prompt_carries_category_brief_and_seed() {
        let p = build_page_prompt("CATEGORY: QUIZ\ndetails", "a color quiz", 42);
        assert!(p.starts_with("CATEGORY: QUIZ"));
        assert!(p.contains("ndw_snippet_v1"));
        assert!(p.contains("Brief: a color quiz"));
        assert!(p.contains("Seed: 42"));
    }

    #[test]
    fn empty_brief_becomes_auto() {
        let p = build_page_prompt("note", "  ", 1);
        assert!(p.contains("(auto generated"));
    }

    #[test]
    fn batch_prompt_indexes_every_doc() {
        let docs = vec![
            normalize_doc(&json!({"kind": "full_page_html", "html": "<p>a</p>"})).unwrap(),
            normalize_doc(&json!({"kind": "full_page_html", "html": "<p>b</p>"})).unwrap(),
        ];
        let p = build_batch_review_prompt(&docs);
        assert!(p.contains("APP_INDEX: 0"));
        assert!(p.contains("APP_INDEX: 1"));
        assert!(p.contains("'results' array"));
    }

    #[test]
    fn gemini_schemas_require_only_core_fields() {
        assert_eq!(gemini_review_schema()["required"], json!(["ok"]));
        let batch = gemini_batch_review_schema();
        assert_eq!(
            batch["properties"]["results"]["items"]["required"],
            json!(["index", "ok"])
        );
    }
}
