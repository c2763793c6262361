//! Structural signatures for layout-level deduplication.
//!
//! The signature hashes a skeleton of the document's markup: tags and their
//! attributes with comments, script/style bodies, text nodes and whitespace
//! removed. Two documents with the same structure but different copy collide
//! on purpose.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::doc::{Doc, DocBody};

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?>.*?</script\s*>").unwrap());
static STYLE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?>.*?</style\s*>").unwrap());
static TEXT_BETWEEN_TAGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">[^<]+<").unwrap());
static LEADING_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^<]+").unwrap());
static TRAILING_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^>]+$").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Reduce HTML to its structural skeleton. Tag order, nesting and attributes
/// (classes in particular) are what remains.
pub fn skeletonize(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let html = COMMENT_RE.replace_all(html, "");
    let html = SCRIPT_BLOCK_RE.replace_all(&html, "");
    let html = STYLE_BLOCK_RE.replace_all(&html, "");
    let html = TEXT_BETWEEN_TAGS_RE.replace_all(&html, "><");
    let html = LEADING_TEXT_RE.replace(&html, "");
    let html = TRAILING_TEXT_RE.replace(&html, "");
    WS_RE.replace_all(&html, "").into_owned()
}

/// Stable structural signature for a normalized document: 64 hex chars, or
/// the empty string when the document yields nothing hashable (callers treat
/// empty as "cannot dedupe").
pub fn signature_for_doc(doc: &Doc) -> String {
    let payload = match &doc.body {
        DocBody::Snippet(s) => {
            let mut p = skeletonize(s.html.as_deref().unwrap_or(""));
            p.push_str(s.css.as_deref().unwrap_or(""));
            p.push_str(s.js.as_deref().unwrap_or(""));
            p
        }
        DocBody::FullPage { html } => skeletonize(html),
        DocBody::Components { components } => components
            .first()
            .map(|c| skeletonize(&c.props.html))
            .unwrap_or_default(),
    };

    let payload = if payload.is_empty() {
        // serde_json maps are keyed in sorted order, so this serialization is
        // canonical for a given document.
        match serde_json::to_string(&doc.body) {
            Ok(json) => json,
            Err(_) => return String::new(),
        }
    } else {
        payload
    };

    if payload.is_empty() {
        return String::new();
    }

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::normalize_doc;
    use serde_json::json;

    #[test]
    fn skeleton_strips_content_keeps_structure() {
        let html = r#"
        <div class="p-6 bg-slate-100">
            <!-- Comment -->
            <h1 id="title" style="color:red">Hello World</h1>
            <p class="mt-2 text-slate-700">This is a test paragraph.</p>
            <script>console.log('hi');</script>
            <style>.foo { color: blue; }</style>
        </div>
        "#;
        let skeleton = skeletonize(html);
        assert!(skeleton.contains("<div"));
        assert!(skeleton.contains(r#"class="p-6bg-slate-100""#));
        assert!(skeleton.contains("<h1"));
        assert!(skeleton.contains("<p"));
        assert!(!skeleton.contains("Comment"));
        assert!(!skeleton.contains("Hello"));
        assert!(!skeleton.contains("paragraph"));
        assert!(!skeleton.contains("console.log"));
        assert!(!skeleton.contains(".foo"));
    }

    #[test]
    fn layout_twins_share_a_signature() {
        let d1 = Doc::full_page(r#"<div class="card"><h1>Title 1</h1><p>Text 1</p></div>"#);
        let d2 = Doc::full_page(r#"<div class="card"><h1>Other</h1><p>More text</p></div>"#);
        let s1 = signature_for_doc(&d1);
        assert_eq!(s1, signature_for_doc(&d2));
        assert_eq!(s1.len(), 64);
    }

    #[test]
    fn distinct_layouts_differ() {
        let d1 = Doc::full_page(r#"<div class="card"><h1>Title</h1></div>"#);
        let d2 = Doc::full_page(r#"<section class="hero"><h1>Title</h1></section>"#);
        assert_ne!(signature_for_doc(&d1), signature_for_doc(&d2));
    }

    #[test]
    fn snippet_css_and_js_feed_the_hash() {
        let base = json!({"kind": "ndw_snippet_v1", "html": "<button class=\"btn\">Click</button>"});
        let mut with_js = base.clone();
        with_js["js"] = json!("alert(1)");
        let d1 = normalize_doc(&base).unwrap();
        let d2 = normalize_doc(&with_js).unwrap();
        assert_eq!(signature_for_doc(&d1).len(), 64);
        assert_ne!(signature_for_doc(&d1), signature_for_doc(&d2));
    }

    #[test]
    fn signature_survives_normalization() {
        let raw = json!({"kind": "full_page_html", "html": "<main class=\"m\"><p>text</p></main>"});
        let doc = normalize_doc(&raw).unwrap();
        let renorm = normalize_doc(&serde_json::to_value(&doc).unwrap()).unwrap();
        assert_eq!(signature_for_doc(&doc), signature_for_doc(&renorm));
    }

    #[test]
    fn metadata_does_not_change_the_signature() {
        let mut d1 = Doc::full_page("<div class=\"x\"><p>t</p></div>");
        let d2 = d1.clone();
        d1.created_at = Some(123);
        d1.category = Some("web-toy".into());
        assert_eq!(signature_for_doc(&d1), signature_for_doc(&d2));
    }
}
