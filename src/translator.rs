use async_trait::async_trait;
use thiserror::Error;

pub use self::gemini::GeminiTranslator;

pub mod gemini;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translator rejected the request: rate limited upstream")]
    RateLimited,

    #[error("model not available: {0}")]
    InvalidModel(String),

    #[error("translation request timed out after {0}s")]
    Timeout(u64),

    #[error("translator unavailable: {0}")]
    Unavailable(String),
}

/// A language model that rewrites text into a target language. One shared
/// instance serves every guild.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `text` into the language named by `target_language`
    /// (a display name like "Korean", not a code).
    async fn translate(&self, text: &str, target_language: &str)
        -> Result<String, TranslateError>;
}
