use once_cell::sync::Lazy;
use regex::Regex;

static CUSTOM_EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<a?:[a-zA-Z0-9_]+:\d+>").expect("custom emoji regex")
});
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("link regex"));

/// What a message is made of, which decides whether it is translated,
/// relayed verbatim, or carried alongside translated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Translatable text, possibly with inline emoji or links.
    PlainText,
    /// Only emoji (unicode or custom); relayed as-is without translation.
    EmojiOnly,
    /// Only stickers; relayed as-is without translation.
    StickerOnly,
    /// Only attachments; relayed as-is without translation.
    AttachmentOnly,
    /// Carries embeds (link previews); the text, if any, is translated and
    /// the previews regenerate from the restored links.
    EmbedCarrying,
    /// Translatable text plus attachments or stickers.
    Mixed,
    /// Nothing relayable.
    Empty,
}

fn is_emoji_char(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF   // pictographs, symbols, flags, regional indicators
        | 0x2600..=0x27BF   // misc symbols and dingbats
        | 0x2B00..=0x2BFF   // arrows and stars
        | 0xFE00..=0xFE0F   // variation selectors
        | 0x200D            // zero-width joiner
        | 0x20E3            // combining enclosing keycap
    )
}

fn is_emoji_only(text: &str) -> bool {
    let mut saw_emoji = CUSTOM_EMOJI.is_match(text);
    let stripped = CUSTOM_EMOJI.replace_all(text, "");
    for c in stripped.chars() {
        if c.is_whitespace() {
            continue;
        }
        if is_emoji_char(c) {
            saw_emoji = true;
        } else {
            return false;
        }
    }
    saw_emoji
}

/// Classifies a message from its content and non-text payload counts.
pub fn classify(
    content: &str,
    attachment_count: usize,
    sticker_count: usize,
    embed_count: usize,
) -> MessageKind {
    let trimmed = content.trim();
    let has_text = !trimmed.is_empty() && !is_emoji_only(trimmed);

    if has_text {
        if attachment_count > 0 || sticker_count > 0 {
            return MessageKind::Mixed;
        }
        if embed_count > 0 {
            return MessageKind::EmbedCarrying;
        }
        return MessageKind::PlainText;
    }

    if sticker_count > 0 {
        return MessageKind::StickerOnly;
    }
    if attachment_count > 0 {
        return MessageKind::AttachmentOnly;
    }
    if !trimmed.is_empty() {
        return MessageKind::EmojiOnly;
    }
    if embed_count > 0 {
        return MessageKind::EmbedCarrying;
    }
    MessageKind::Empty
}

/// Guesses the language a message is written in from its dominant script.
/// Deliberately coarse: it only has to catch a message already written in a
/// target channel's language, so that target gets the original text without
/// a model call. Returns `None` when no script clearly dominates.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut hangul = 0usize;
    let mut kana = 0usize;
    let mut han = 0usize;
    let mut cyrillic = 0usize;
    let mut latin = 0usize;
    let mut total = 0usize;

    for c in CUSTOM_EMOJI.replace_all(text, "").chars() {
        let code = c as u32;
        match code {
            0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => hangul += 1,
            0x3040..=0x30FF => kana += 1,
            0x4E00..=0x9FFF => han += 1,
            0x0400..=0x04FF => cyrillic += 1,
            _ if c.is_ascii_alphabetic() => latin += 1,
            _ => continue,
        }
        total += 1;
    }

    if total == 0 {
        return None;
    }
    let dominant = |count: usize| count * 2 > total;
    // Any kana marks Japanese: its prose mixes kana with han, while Korean
    // and Chinese use no kana at all.
    if kana > 0 && dominant(kana + han) {
        Some("ja")
    } else if dominant(hangul) {
        Some("ko")
    } else if dominant(han) {
        Some("zh")
    } else if dominant(cyrillic) {
        Some("ru")
    } else if dominant(latin) {
        Some("en")
    } else {
        None
    }
}

/// Bot commands and link dumps are not worth a model call. A message is
/// skipped when it starts with a command prefix or when more than half of
/// its whitespace-separated tokens are links.
pub fn is_command_or_link(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return false;
    }

    if let Some(first) = trimmed.chars().next() {
        if matches!(first, '/' | '!' | '?' | '.' | ',') {
            return true;
        }
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }
    let link_tokens = tokens.iter().filter(|t| LINK.is_match(t)).count();
    link_tokens * 2 > tokens.len()
}
