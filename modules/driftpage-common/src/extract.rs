//! Tolerant extraction of JSON (or raw HTML) from model output.
//!
//! Providers return anything from clean JSON to fenced blocks to bare
//! markup with prose around it. This module is the single place that deals
//! with that mess; everything downstream works on parsed values.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::DriftpageError;

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```json\s*([\s\S]*?)```").unwrap());
static FENCED_ANY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```\s*([\s\S]*?)```").unwrap());
static TRAILING_COMMA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());
static HTMLISH_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(?:!doctype|html|body|main|header|section|footer)\b").unwrap()
});

/// Extract a JSON value from raw model text.
///
/// Strategy, in order: leading HTML wraps as a full page; fenced ```json
/// then any fenced block; first balanced `{...}` slice; trailing-comma and
/// smart-quote cleanup; any HTML-like tag anywhere wraps the whole text as a
/// full page; otherwise fail.
pub fn json_from_text(text: &str) -> Result<Value, DriftpageError> {
    let t = text.trim();
    let lowered = t.to_lowercase();
    if ["<!doctype", "<html", "<div", "<body"]
        .iter()
        .any(|p| lowered.starts_with(p))
    {
        return Ok(json!({"kind": "full_page_html", "html": t}));
    }

    let candidate = FENCED_JSON_RE
        .captures(t)
        .or_else(|| FENCED_ANY_RE.captures(t))
        .map(|c| c[1].to_string())
        .or_else(|| balanced_json_slice(t).map(str::to_string));

    if let Some(candidate) = candidate {
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Ok(value);
        }
        let cleaned = TRAILING_COMMA_RE.replace_all(&candidate, "$1");
        let cleaned = cleaned
            .replace('\u{201c}', "\"")
            .replace('\u{201d}', "\"")
            .replace('\u{2019}', "'");
        if let Ok(value) = serde_json::from_str(&cleaned) {
            return Ok(value);
        }
    }

    if HTMLISH_TAG_RE.is_match(t) {
        return Ok(json!({"kind": "full_page_html", "html": t}));
    }

    Err(DriftpageError::Extraction(
        "no JSON or HTML content found".into(),
    ))
}

/// First balanced top-level `{...}` slice, string-aware.
fn balanced_json_slice(s: &str) -> Option<&str> {
    let mut in_str = false;
    let mut esc = false;
    let mut depth = 0usize;
    let mut start = None;
    for (i, ch) in s.char_indices() {
        if ch == '"' {
            if !esc {
                in_str = !in_str;
            }
            esc = false;
            continue;
        }
        if !in_str {
            if ch == '{' {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            } else if ch == '}' && depth > 0 {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = start {
                        return Some(&s[start..i + ch.len_utf8()]);
                    }
                }
            }
        }
        esc = ch == '\\' && !esc;
    }
    None
}

/// Best-effort repair for truncated JSON: close the open string, then any
/// open brackets and braces.
pub fn repair_json_loose(text: &str) -> String {
    let mut t = text.trim().to_string();
    if t.is_empty() {
        return t;
    }
    let mut in_str = false;
    let mut esc = false;
    let mut braces = 0i64;
    let mut brackets = 0i64;
    for ch in t.chars() {
        if ch == '"' && !esc {
            in_str = !in_str;
        }
        if !in_str {
            match ch {
                '{' => braces += 1,
                '}' => braces -= 1,
                '[' => brackets += 1,
                ']' => brackets -= 1,
                _ => {}
            }
        }
        esc = ch == '\\' && !esc;
    }
    if in_str {
        t.push('"');
    }
    for _ in 0..brackets.max(0) {
        t.push(']');
    }
    for _ in 0..braces.max(0) {
        t.push('}');
    }
    t
}

// =============================================================================
// Incremental array scanning (burst streams)
// =============================================================================

/// Brace-/quote-aware scanner that yields each completed top-level object of
/// a streamed JSON array as its closing brace arrives. Text between objects
/// (`[`, `,`, `]`, whitespace, garbage) is ignored.
#[derive(Debug, Default)]
pub struct ArrayObjectScanner {
    buf: String,
    pos: usize,
    depth: usize,
    in_str: bool,
    esc: bool,
    start: Option<usize>,
}

impl ArrayObjectScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed another text fragment; returns objects completed by it.
    pub fn push(&mut self, fragment: &str) -> Vec<Value> {
        self.buf.push_str(fragment);
        let mut completed = Vec::new();

        let bytes: Vec<(usize, char)> = self.buf[self.pos..]
            .char_indices()
            .map(|(i, c)| (i + self.pos, c))
            .collect();
        for (i, ch) in bytes {
            if self.depth > 0 {
                if ch == '"' && !self.esc {
                    self.in_str = !self.in_str;
                }
                if self.in_str {
                    self.esc = ch == '\\' && !self.esc;
                    continue;
                }
            }
            self.esc = false;
            match ch {
                '{' => {
                    if self.depth == 0 {
                        self.start = Some(i);
                    }
                    self.depth += 1;
                }
                '}' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        if let Some(start) = self.start.take() {
                            let candidate = &self.buf[start..i + 1];
                            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                                completed.push(value);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        self.pos = self.buf.len();

        // Drop consumed text so long streams stay bounded.
        if self.depth == 0 && self.start.is_none() {
            self.buf.clear();
            self.pos = 0;
        } else if let Some(start) = self.start {
            if start > 0 {
                self.buf.drain(..start);
                self.pos -= start;
                self.start = Some(0);
            }
        }

        completed
    }
}
