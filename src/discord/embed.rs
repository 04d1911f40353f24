use super::OutboundMessage;

pub const RELAY_EMBED_COLOR: u32 = 0x3498DB;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedAuthor {
    pub name: String,
    pub icon_url: Option<String>,
}

/// Backend-neutral embed shape; the serenity builders are assembled from
/// this at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEmbed {
    pub description: String,
    pub author: Option<EmbedAuthor>,
    pub color: u32,
    pub image_url: Option<String>,
}

fn is_image_url(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Presents a relayed message as the original author speaking: their name
/// and avatar in the embed header, translated text as the description. The
/// first image attachment becomes the embed image; remaining attachments are
/// appended as links so nothing is dropped.
pub fn build_relay_embed(message: &OutboundMessage) -> RelayEmbed {
    let mut description = message.content.clone();
    let mut image_url = None;

    for url in &message.attachment_urls {
        if image_url.is_none() && is_image_url(url) {
            image_url = Some(url.clone());
            continue;
        }
        if !description.is_empty() {
            description.push('\n');
        }
        description.push_str(url);
    }

    RelayEmbed {
        description,
        author: Some(EmbedAuthor {
            name: message.author_name.clone(),
            icon_url: message.author_avatar_url.clone(),
        }),
        color: RELAY_EMBED_COLOR,
        image_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(content: &str, attachments: Vec<String>) -> OutboundMessage {
        OutboundMessage {
            content: content.to_string(),
            author_name: "alice".to_string(),
            author_avatar_url: Some("https://cdn.example/alice.png".to_string()),
            attachment_urls: attachments,
            reply_to: None,
        }
    }

    #[test]
    fn embed_carries_author_and_translated_text() {
        let embed = build_relay_embed(&outbound("안녕하세요", vec![]));
        assert_eq!(embed.description, "안녕하세요");
        let author = embed.author.expect("author");
        assert_eq!(author.name, "alice");
        assert_eq!(
            author.icon_url.as_deref(),
            Some("https://cdn.example/alice.png")
        );
        assert!(embed.image_url.is_none());
    }

    #[test]
    fn first_image_attachment_becomes_embed_image() {
        let embed = build_relay_embed(&outbound(
            "look",
            vec![
                "https://cdn.example/a.png".to_string(),
                "https://cdn.example/b.jpg?size=1024".to_string(),
                "https://cdn.example/doc.pdf".to_string(),
            ],
        ));
        assert_eq!(embed.image_url.as_deref(), Some("https://cdn.example/a.png"));
        assert_eq!(
            embed.description,
            "look\nhttps://cdn.example/b.jpg?size=1024\nhttps://cdn.example/doc.pdf"
        );
    }

    #[test]
    fn non_image_attachments_are_linked_in_description() {
        let embed = build_relay_embed(&outbound(
            "",
            vec!["https://cdn.example/notes.txt".to_string()],
        ));
        assert_eq!(embed.description, "https://cdn.example/notes.txt");
    }
}
