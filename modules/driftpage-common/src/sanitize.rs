//! Removal of external asset references from generated markup.
//!
//! Generated documents must be self-contained: any `<script src>`,
//! `<link href>` or CSS `@import` pointing at an http(s) origin is deleted,
//! except for three vendored CDNs which are rewritten to locally served
//! paths. Every change is reported so it can be surfaced under
//! `ndw_debug.external_assets_removed`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::doc::Severity;

/// One sanitizer action, later labelled with the field it applied to.
#[derive(Debug, Clone)]
pub struct Removal {
    pub severity: Severity,
    pub message: String,
}

static EXTERNAL_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?:)?//").unwrap());

static SCRIPT_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<script\b[^>]*\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^"'>\s]+))[^>]*>\s*</script\s*>"#,
    )
    .unwrap()
});

static LINK_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^"'>\s]+))[^>]*>"#)
        .unwrap()
});

static CSS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:url\(\s*([^)]+)\s*\)|("[^"]+"|'[^']+'))\s*;?"#).unwrap()
});

static SRC_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bsrc\s*=\s*(?:"[^"]*"|'[^']*'|[^"'>\s]+)"#).unwrap()
});

static TAILWIND_CDN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?:)?//cdn\.tailwindcss\.com(?:/|\?|$)").unwrap()
});
static GSAP_CDN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?:)?//cdnjs\.cloudflare\.com/ajax/libs/gsap/[^/]+/gsap(?:\.min)?\.js")
        .unwrap()
});
static LUCIDE_CDN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?:)?//unpkg\.com/lucide(?:@[^/]+)?(?:/.*)?$").unwrap()
});

fn is_external(url: &str) -> bool {
    EXTERNAL_URL_RE.is_match(url.trim())
}

/// Local path for the three whitelisted CDNs; everything else is removed.
fn rewrite_script_src(src: &str) -> Option<&'static str> {
    if TAILWIND_CDN_RE.is_match(src) {
        Some("/static/vendor/tailwind-play.js")
    } else if GSAP_CDN_RE.is_match(src) {
        Some("/static/vendor/gsap.min.js")
    } else if LUCIDE_CDN_RE.is_match(src) {
        Some("/static/vendor/lucide.min.js")
    } else {
        None
    }
}

fn captured_url<'a>(caps: &'a Captures<'a>) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// Strip (or rewrite) external asset references in `html`, returning the
/// sanitized markup and the list of actions taken.
pub fn strip_external_assets(html: &str) -> (String, Vec<Removal>) {
    let mut removals: Vec<Removal> = Vec::new();

    let html = SCRIPT_SRC_RE.replace_all(html, |caps: &Captures| {
        let src = captured_url(caps).to_string();
        if !is_external(&src) {
            return caps[0].to_string();
        }
        if let Some(local) = rewrite_script_src(&src) {
            removals.push(Removal {
                severity: Severity::Info,
                message: format!("Rewrote external script: {src} -> {local}"),
            });
            return SRC_ATTR_RE
                .replace(&caps[0], format!("src=\"{local}\""))
                .into_owned();
        }
        removals.push(Removal {
            severity: Severity::Warn,
            message: format!("Removed external script: {src}"),
        });
        String::new()
    });

    let html = LINK_HREF_RE.replace_all(&html, |caps: &Captures| {
        let href = captured_url(caps).to_string();
        if is_external(&href) {
            removals.push(Removal {
                severity: Severity::Warn,
                message: format!("Removed external stylesheet: {href}"),
            });
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    let html = CSS_IMPORT_RE.replace_all(&html, |caps: &Captures| {
        let raw = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or("");
        let url = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == ' ');
        if is_external(url) {
            removals.push(Removal {
                severity: Severity::Warn,
                message: format!("Removed external @import: {url}"),
            });
            String::new()
        } else {
            caps[0].to_string()
        }
    });

    (html.into_owned(), removals)
}
