use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DriftpageError;
use crate::sanitize::{strip_external_assets, Removal};

// =============================================================================
// Document model
// =============================================================================

/// Issue severity reported by the sanitizer and the compliance reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown Severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub field: String,
    pub message: String,
}

/// Outcome of a compliance review, attached to documents that passed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub ok: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Box<Doc>>,
}

impl ReviewRecord {
    /// True iff the record explicitly rejects, or carries a `block` issue
    /// without a corrected doc.
    pub fn blocks(&self) -> bool {
        if !self.ok {
            return true;
        }
        self.doc.is_none() && self.issues.iter().any(|i| i.severity == Severity::Block)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NdwDebug {
    #[serde(default)]
    pub external_assets_removed: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Background {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snippet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Background>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentProps {
    pub html: String,
    pub height: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub comp_type: String,
    pub props: ComponentProps,
}

/// The three accepted document shapes, discriminated by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DocBody {
    #[serde(rename = "ndw_snippet_v1")]
    Snippet(Snippet),
    #[serde(rename = "full_page_html")]
    FullPage { html: String },
    #[serde(rename = "components")]
    Components { components: Vec<Component> },
}

/// A generated artifact: one of the three shapes plus shared metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    #[serde(flatten)]
    pub body: DocBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewRecord>,
    #[serde(rename = "ndw_debug", default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<NdwDebug>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibe: Option<String>,
}

impl Doc {
    pub fn full_page(html: impl Into<String>) -> Self {
        Self::from_body(DocBody::FullPage { html: html.into() })
    }

    pub fn from_body(body: DocBody) -> Self {
        Self {
            body,
            review: None,
            debug: None,
            created_at: None,
            category: None,
            vibe: None,
        }
    }

    /// The HTML used for skeleton signatures and previews.
    pub fn primary_html(&self) -> Option<&str> {
        match &self.body {
            DocBody::Snippet(s) => s.html.as_deref(),
            DocBody::FullPage { html } => Some(html),
            DocBody::Components { components } => {
                components.first().map(|c| c.props.html.as_str())
            }
        }
    }

    /// Preview title: explicit `title`, then `<title>`, then `<h1>`, then a
    /// component `props.title`, falling back to "Untitled".
    pub fn display_title(&self) -> String {
        if let DocBody::Snippet(s) = &self.body {
            if let Some(t) = s.title.as_deref() {
                if !t.trim().is_empty() {
                    return t.trim().to_string();
                }
            }
        }
        if let Some(html) = self.primary_html() {
            for re in [&*TITLE_TAG_RE, &*H1_TAG_RE] {
                if let Some(caps) = re.captures(html) {
                    let text = caps[1].trim();
                    if !text.is_empty() {
                        return text.to_string();
                    }
                }
            }
        }
        if let DocBody::Components { components } = &self.body {
            for comp in components {
                if let Some(t) = comp.props.extra.get("title").and_then(Value::as_str) {
                    if !t.trim().is_empty() {
                        return t.trim().to_string();
                    }
                }
            }
        }
        "Untitled".to_string()
    }

    fn record_removals(&mut self, removals: Vec<Issue>) {
        if removals.is_empty() {
            return;
        }
        self.debug
            .get_or_insert_with(NdwDebug::default)
            .external_assets_removed
            .extend(removals);
    }
}

static TITLE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").unwrap());
static H1_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>([^<]+)</h1>").unwrap());
static BACKGROUND_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*background\s*:\s*").unwrap());

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize raw model output into exactly one of the accepted shapes.
///
/// This is the only gate that deals with dirty input; everything downstream
/// requires a normalized [`Doc`]. Normalizing an already-normalized document
/// is a no-op.
pub fn normalize_doc(value: &Value) -> Result<Doc, DriftpageError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DriftpageError::Normalize("not a JSON object".into()))?;

    if let Some(err) = obj.get("error").and_then(Value::as_str) {
        return Err(DriftpageError::Upstream(
            truncate_to_char_boundary(err, 500).to_string(),
        ));
    }

    let body = normalize_body(obj)?;

    let mut doc = Doc {
        body,
        review: obj
            .get("review")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        debug: obj
            .get("ndw_debug")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        created_at: obj.get("created_at").and_then(Value::as_i64),
        category: non_empty_string(obj.get("category")),
        vibe: non_empty_string(obj.get("vibe")),
    };

    let removals = sanitize_body(&mut doc.body);
    doc.record_removals(removals);
    Ok(doc)
}

fn normalize_body(obj: &Map<String, Value>) -> Result<DocBody, DriftpageError> {
    // Bare snippet payloads: html/css/js keys with no kind, type or components.
    let looks_like_bare_snippet = (obj.contains_key("html")
        || obj.contains_key("css")
        || obj.contains_key("js"))
        && !obj.contains_key("components")
        && !obj.contains_key("kind")
        && !obj.contains_key("type");

    let mut kind = obj
        .get("kind")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    if matches!(
        kind.as_str(),
        "ndw_snippet" | "snippet_v1" | "ndw-canvas-snippet" | "canvas_snippet" | "canvas-snippet"
    ) {
        kind = "ndw_snippet_v1".to_string();
    }

    if looks_like_bare_snippet || kind == "ndw_snippet_v1" {
        return normalize_snippet(obj);
    }

    // Full-page synonyms on either discriminator key.
    for key in ["kind", "type"] {
        let k = obj
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if matches!(
            k.as_str(),
            "full_page_html" | "page_html" | "html_page" | "full_html"
        ) {
            for field in ["html", "content", "body"] {
                if let Some(html) = non_empty_string(obj.get(field)) {
                    return Ok(DocBody::FullPage { html });
                }
            }
        }
    }

    if let Some(html) = non_empty_string(obj.get("html")) {
        return Ok(DocBody::FullPage { html });
    }

    for key in ["content", "body", "page", "app", "markup"] {
        match obj.get(key) {
            Some(Value::String(s)) if looks_like_html(s) => {
                return Ok(DocBody::FullPage { html: s.clone() });
            }
            Some(Value::Object(inner)) => {
                if let Some(html) = non_empty_string(inner.get("html")) {
                    return Ok(DocBody::FullPage { html });
                }
            }
            _ => {}
        }
    }

    if let Some(components) = normalize_components(obj.get("components")) {
        return Ok(DocBody::Components { components });
    }

    if let Some(html) = find_html(&Value::Object(obj.clone()), 0) {
        return Ok(DocBody::FullPage { html });
    }

    Err(DriftpageError::Normalize("no renderable HTML found".into()))
}

fn normalize_snippet(obj: &Map<String, Value>) -> Result<DocBody, DriftpageError> {
    let mut out = Snippet {
        title: non_empty_string(obj.get("title")),
        ..Snippet::default()
    };

    if let Some(Value::Object(bg)) = obj.get("background") {
        let style = match bg.get("style") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        }
        .filter(|s| !s.trim().is_empty())
        .map(|s| BACKGROUND_PREFIX_RE.replace(&s, "").into_owned());

        let class = ["class", "className", "classes"]
            .iter()
            .find_map(|k| match bg.get(*k) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(items)) => Some(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty());

        if style.is_some() || class.is_some() {
            out.background = Some(Background { style, class });
        }
    }

    out.css = non_empty_string(obj.get("css"));
    out.html = non_empty_string(obj.get("html"));
    out.js = non_empty_string(obj.get("js"));

    if out.html.is_none() {
        // Derive markup from common nested keys when the model misplaced it.
        for key in ["content", "body", "markup"] {
            if let Some(Value::String(s)) = obj.get(key) {
                if looks_like_html(s) {
                    out.html = Some(s.clone());
                    break;
                }
            }
        }
    }

    if out.html.is_none() && out.css.is_none() && out.js.is_none() {
        return Err(DriftpageError::Normalize("snippet missing content".into()));
    }
    Ok(DocBody::Snippet(out))
}

fn normalize_components(value: Option<&Value>) -> Option<Vec<Component>> {
    let raw: Vec<&Map<String, Value>> = match value {
        Some(Value::Object(one)) => vec![one],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => return None,
    };

    let mut components = Vec::new();
    for (idx, comp) in raw.into_iter().enumerate() {
        let props = comp
            .get("props")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let html = non_empty_string(props.get("html"))
            .or_else(|| non_empty_string(comp.get("html")));
        let Some(html) = html else { continue };

        let height = parse_height(props.get("height").or_else(|| comp.get("height")));

        let id = comp
            .get("id")
            .map(|v| match v {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("custom-{}", idx + 1));

        let mut extra = props;
        extra.remove("html");
        extra.remove("height");

        components.push(Component {
            id,
            comp_type: "custom".to_string(),
            props: ComponentProps {
                html: html.trim().to_string(),
                height,
                extra,
            },
        });
    }

    if components.is_empty() {
        None
    } else {
        Some(components)
    }
}

/// Missing heights default to 360; values that are not cleanly numeric (e.g.
/// "100vh") fall back to a generous 720.
fn parse_height(value: Option<&Value>) -> i64 {
    match value {
        None | Some(Value::Null) => 360,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(720),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(720),
        Some(_) => 720,
    }
}

fn find_html(value: &Value, depth: usize) -> Option<String> {
    if depth > 2 {
        return None;
    }
    match value {
        Value::String(s) if looks_like_html(s) && s.len() > 20 => Some(s.clone()),
        Value::Object(map) => map.values().find_map(|v| find_html(v, depth + 1)),
        Value::Array(items) => items.iter().find_map(|v| find_html(v, depth + 1)),
        _ => None,
    }
}

fn looks_like_html(s: &str) -> bool {
    s.contains('<') && s.contains('>')
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn sanitize_body(body: &mut DocBody) -> Vec<Issue> {
    let mut issues = Vec::new();
    match body {
        DocBody::FullPage { html } => {
            let (sanitized, removals) = strip_external_assets(html);
            apply_removals(html, sanitized, removals, "html", &mut issues);
        }
        DocBody::Snippet(snippet) => {
            if let Some(html) = snippet.html.as_mut() {
                let (sanitized, removals) = strip_external_assets(html);
                apply_removals(html, sanitized, removals, "html", &mut issues);
            }
        }
        DocBody::Components { components } => {
            for comp in components.iter_mut() {
                let (sanitized, removals) = strip_external_assets(&comp.props.html);
                let field = format!("components[{}].html", comp.id);
                apply_removals(&mut comp.props.html, sanitized, removals, &field, &mut issues);
            }
        }
    }
    issues
}

fn apply_removals(
    html: &mut String,
    sanitized: String,
    removals: Vec<Removal>,
    field: &str,
    issues: &mut Vec<Issue>,
) {
    if sanitized != *html {
        *html = sanitized;
    }
    for removal in removals {
        issues.push(Issue {
            severity: removal.severity,
            field: field.to_string(),
            message: removal.message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snippet_round_trips_with_kind_tag() {
        let doc = normalize_doc(&json!({
            "kind": "ndw_snippet_v1",
            "title": "Bouncer",
            "html": "<button class=\"btn\">Go</button>",
            "css": ".btn { color: red; }",
        }))
        .unwrap();
        let wire = serde_json::to_value(&doc).unwrap();
        assert_eq!(wire["kind"], "ndw_snippet_v1");
        assert_eq!(wire["title"], "Bouncer");
        let back: Doc = serde_json::from_value(wire).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn bare_snippet_payload_is_coerced() {
        let doc = normalize_doc(&json!({
            "html": "<div>hi</div>",
            "js": "console.log(1)",
        }))
        .unwrap();
        assert!(matches!(doc.body, DocBody::Snippet(_)));
    }

    #[test]
    fn snippet_kind_synonyms_accepted() {
        for kind in ["ndw_snippet", "snippet_v1", "canvas-snippet"] {
            let doc = normalize_doc(&json!({"kind": kind, "html": "<p>x</p>"})).unwrap();
            assert!(matches!(doc.body, DocBody::Snippet(_)), "kind={kind}");
        }
    }

    #[test]
    fn background_style_list_is_joined_and_prefix_stripped() {
        let doc = normalize_doc(&json!({
            "kind": "ndw_snippet_v1",
            "html": "<div>x</div>",
            "background": {"style": "background: linear-gradient(red, blue)", "classes": ["bg-black", "text-white"]},
        }))
        .unwrap();
        let DocBody::Snippet(s) = &doc.body else {
            panic!("expected snippet")
        };
        let bg = s.background.as_ref().unwrap();
        assert_eq!(bg.style.as_deref(), Some("linear-gradient(red, blue)"));
        assert_eq!(bg.class.as_deref(), Some("bg-black text-white"));
    }

    #[test]
    fn empty_snippet_is_rejected() {
        let err = normalize_doc(&json!({"kind": "ndw_snippet_v1", "title": "t"})).unwrap_err();
        assert!(matches!(err, DriftpageError::Normalize(_)));
    }

    #[test]
    fn full_page_synonyms_and_fallback_keys() {
        let doc =
            normalize_doc(&json!({"kind": "page_html", "content": "<html><body>A</body></html>"}))
                .unwrap();
        assert!(matches!(doc.body, DocBody::FullPage { .. }));

        let doc = normalize_doc(&json!({"page": "<main>long enough content here</main>"})).unwrap();
        assert!(matches!(doc.body, DocBody::FullPage { .. }));
    }

    #[test]
    fn components_are_coerced_to_custom() {
        let doc = normalize_doc(&json!({
            "components": [
                {"id": "hero-1", "type": "hero", "props": {"html": " <div>H</div> ", "title": "Hero"}},
                {"type": "broken"},
                {"props": {"html": "<p>B</p>", "height": "100vh"}},
            ]
        }))
        .unwrap();
        let DocBody::Components { components } = &doc.body else {
            panic!("expected components")
        };
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].comp_type, "custom");
        assert_eq!(components[0].props.html, "<div>H</div>");
        assert_eq!(components[0].props.height, 360);
        assert_eq!(components[0].props.extra["title"], "Hero");
        assert_eq!(components[1].id, "custom-3");
        assert_eq!(components[1].props.height, 720);
    }

    #[test]
    fn component_numeric_string_height_parses() {
        let doc = normalize_doc(&json!({
            "components": [{"id": "a", "props": {"html": "<p>x</p>", "height": "420"}}]
        }))
        .unwrap();
        let DocBody::Components { components } = &doc.body else {
            panic!("expected components")
        };
        assert_eq!(components[0].props.height, 420);
    }

    #[test]
    fn upstream_error_docs_are_rejected() {
        let err = normalize_doc(&json!({"error": "boom"})).unwrap_err();
        assert!(matches!(err, DriftpageError::Upstream(_)));
    }

    #[test]
    fn nested_html_is_found_within_depth() {
        let doc = normalize_doc(&json!({
            "result": {"inner": "<section>some quite long markup</section>"}
        }))
        .unwrap();
        assert!(matches!(doc.body, DocBody::FullPage { .. }));
    }

    #[test]
    fn normalization_is_idempotent() {
        let first = normalize_doc(&json!({
            "kind": "full_page_html",
            "html": "<!doctype html><html><head><title>T</title></head><body><h1>A</h1></body></html>",
            "created_at": 1_700_000_000,
            "category": "web-toy",
        }))
        .unwrap();
        let again = normalize_doc(&serde_json::to_value(&first).unwrap()).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn display_title_fallback_chain() {
        let doc = Doc::full_page("<html><head><title>From Title</title></head></html>");
        assert_eq!(doc.display_title(), "From Title");

        let doc = Doc::full_page("<html><body><h1> Heading </h1></body></html>");
        assert_eq!(doc.display_title(), "Heading");

        let doc = normalize_doc(&json!({
            "components": [{"id": "c", "props": {"html": "<p>x</p>", "title": "Comp Title"}}]
        }))
        .unwrap();
        assert_eq!(doc.display_title(), "Comp Title");

        let doc = Doc::full_page("<div>no headings</div>");
        assert_eq!(doc.display_title(), "Untitled");
    }
}
