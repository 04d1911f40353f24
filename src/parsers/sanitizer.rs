use once_cell::sync::Lazy;
use regex::Regex;

static CUSTOM_EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<a?:[a-zA-Z0-9_]+:\d+>").expect("custom emoji regex")
});
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("link regex"));
static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d+)>").expect("user mention regex"));
static ROLE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@&(\d+)>").expect("role mention regex"));
static CHANNEL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<#(\d+)>").expect("channel mention regex"));

/// Message text prepared for the translator. Custom emoji and links are
/// lifted out into indexed placeholders so the model cannot mangle them;
/// mentions are neutralized into non-pinging display forms.
#[derive(Debug, Clone)]
pub struct SanitizedText {
    pub text: String,
    emoji: Vec<String>,
    links: Vec<String>,
}

impl SanitizedText {
    /// Splices the lifted tokens back into translated text. Placeholders the
    /// model dropped are appended at the end so no token is ever lost.
    pub fn restore(&self, translated: &str) -> String {
        let mut result = translated.to_string();
        let mut dropped: Vec<&str> = Vec::new();

        for (i, original) in self.emoji.iter().enumerate() {
            let placeholder = format!("[e{i}]");
            if result.contains(&placeholder) {
                result = result.replace(&placeholder, original);
            } else {
                dropped.push(original);
            }
        }
        for (i, original) in self.links.iter().enumerate() {
            let placeholder = format!("[l{i}]");
            if result.contains(&placeholder) {
                result = result.replace(&placeholder, original);
            } else {
                dropped.push(original);
            }
        }

        for token in dropped {
            if !result.is_empty() {
                result.push(' ');
            }
            result.push_str(token);
        }
        result
    }
}

/// Prepares raw message content for translation.
///
/// Broadcast mentions become bracketed display forms and are never converted
/// back, so a relayed message can never ping `@everyone` in a target channel.
/// The transformation is idempotent: sanitizing already-sanitized text is a
/// no-op.
pub fn sanitize(content: &str) -> SanitizedText {
    let mut emoji = Vec::new();
    let text = CUSTOM_EMOJI
        .replace_all(content, |caps: &regex::Captures| {
            let placeholder = format!("[e{}]", emoji.len());
            emoji.push(caps[0].to_string());
            placeholder
        })
        .into_owned();

    let mut links = Vec::new();
    let text = LINK
        .replace_all(&text, |caps: &regex::Captures| {
            let placeholder = format!("[l{}]", links.len());
            links.push(caps[0].to_string());
            placeholder
        })
        .into_owned();

    let text = text
        .replace("@everyone", "[everyone]")
        .replace("@here", "[here]");
    let text = USER_MENTION.replace_all(&text, "[@$1]").into_owned();
    let text = ROLE_MENTION.replace_all(&text, "[@&$1]").into_owned();
    let text = CHANNEL_MENTION.replace_all(&text, "[#$1]").into_owned();

    SanitizedText { text, emoji, links }
}
