use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::TranslatorConfig;

use super::{TranslateError, Translator};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini `generateContent` client. Placeholders like `[e0]` and `[l0]` are
/// called out in the prompt so the model leaves them intact for splicing.
pub struct GeminiTranslator {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl GeminiTranslator {
    pub fn new(config: &TranslatorConfig, api_key: SecretString) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TranslateError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: config.request_timeout_secs,
        })
    }
}

fn build_prompt(text: &str, target_language: &str) -> String {
    format!(
        "Translate the following message into {target_language}. \
         Reply with only the translation, nothing else. \
         Keep bracketed tokens such as [e0], [l0], [everyone], [@123] or [#456] \
         exactly as they appear.\n\n{text}"
    )
}

fn parse_generate_response(body: &Value) -> Option<String> {
    let text = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()?;
    Some(text.trim().to_string())
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, TranslateError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url,
            self.model,
            self.api_key.expose_secret()
        );

        let body = json!({
            "contents": [{
                "parts": [{ "text": build_prompt(text, target_language) }]
            }]
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout(self.timeout_secs)
                } else {
                    TranslateError::Unavailable(e.to_string())
                }
            })?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(TranslateError::RateLimited),
            StatusCode::NOT_FOUND => {
                return Err(TranslateError::InvalidModel(self.model.clone()))
            }
            status if !status.is_success() => {
                let detail = response.text().await.unwrap_or_default();
                return Err(TranslateError::Unavailable(format!(
                    "upstream error ({status}): {detail}"
                )));
            }
            _ => {}
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TranslateError::Unavailable(format!("invalid response body: {e}")))?;

        debug!(target_language, "translation response received");

        parse_generate_response(&payload).ok_or_else(|| {
            TranslateError::Unavailable("response carried no candidate text".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_target_language_and_keeps_text() {
        let prompt = build_prompt("hello [e0]", "Korean");
        assert!(prompt.contains("into Korean"));
        assert!(prompt.ends_with("hello [e0]"));
    }

    #[test]
    fn parses_candidate_text() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "  안녕하세요  " }] }
            }]
        });
        assert_eq!(
            parse_generate_response(&body).as_deref(),
            Some("안녕하세요")
        );
    }

    #[test]
    fn missing_candidates_yield_none() {
        assert_eq!(parse_generate_response(&json!({})), None);
        assert_eq!(
            parse_generate_response(&json!({ "candidates": [] })),
            None
        );
    }
}
