use async_trait::async_trait;
use driftpage_common::Doc;

/// Upstream providers, in default preference order: primary first, then
/// fallbacks, with Gemini reserved for burst streaming (and last-resort
/// single generation when burst is unavailable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenRouter,
    Groq,
    Gemini,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Groq => "groq",
            ProviderId::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openrouter" => Ok(Self::OpenRouter),
            "groq" => Ok(Self::Groq),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// A single-document generation provider.
///
/// `generate` returns `None` for every failure mode the engine should route
/// around (transport errors, rate limits, unusable output); the details are
/// logged, not propagated.
#[async_trait]
pub trait PageProvider: Send + Sync {
    fn id(&self) -> ProviderId;
    async fn generate(&self, brief: &str, seed: u64, category_note: &str) -> Option<Doc>;
}
