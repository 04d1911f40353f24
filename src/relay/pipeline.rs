use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, GuildLimits};
use crate::db::{
    FeatureKind, GuildStore, LanguageChannelBinding, MappingStore, MessageMapping, UsageStore,
};
use crate::discord::{ChatClient, ChatError, OutboundMessage};
use crate::limits::{CostError, CostMonitor, RateLimiter};
use crate::parsers::{classify, detect_language, is_command_or_link, sanitize, MessageKind};
use crate::translator::Translator;
use crate::web::metrics::Metrics;

use super::{
    InboundMessage, MessageDelete, MessageEdit, MessageLockTable, RelayError, RelayOutcome,
    SkipReason,
};

/// Drives the relay of every message event: classification, admission
/// control, translation fan-out and edit/delete replay against the durable
/// message mapping.
pub struct RelayCore {
    guild_store: Arc<dyn GuildStore>,
    mapping_store: Arc<dyn MappingStore>,
    chat: Arc<dyn ChatClient>,
    translator: Arc<dyn Translator>,
    rate: RateLimiter,
    cost: CostMonitor,
    locks: MessageLockTable,
    default_limits: GuildLimits,
    cost_per_request: f64,
    mapping_retention: Duration,
}

fn map_cost_error(err: CostError) -> RelayError {
    match err {
        CostError::BudgetExceeded {
            month_to_date,
            ceiling,
            ..
        } => RelayError::BudgetExceeded {
            month_to_date,
            ceiling,
        },
        CostError::Database(db) => db.into(),
    }
}

fn skipped(reason: SkipReason) -> RelayOutcome {
    Metrics::message_skipped();
    RelayOutcome::Skipped(reason)
}

impl RelayCore {
    pub fn new(
        config: &Config,
        guild_store: Arc<dyn GuildStore>,
        mapping_store: Arc<dyn MappingStore>,
        usage_store: Arc<dyn UsageStore>,
        chat: Arc<dyn ChatClient>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            guild_store,
            mapping_store,
            chat,
            translator,
            rate: RateLimiter::new(),
            cost: CostMonitor::new(usage_store),
            locks: MessageLockTable::new(),
            default_limits: GuildLimits::from(&config.limits),
            cost_per_request: config.translator.cost_per_request_usd,
            mapping_retention: Duration::days(i64::from(config.relay.mapping_retention_days)),
        }
    }

    /// Fan-out of a newly created message. Holds the per-message lock for the
    /// whole create-translate-deliver-record sequence so a fast edit or
    /// delete of the same message observes either no mapping or the complete
    /// one.
    pub async fn handle_create(
        &self,
        message: InboundMessage,
    ) -> Result<RelayOutcome, RelayError> {
        Metrics::message_received();
        let _guard = self
            .locks
            .acquire(message.guild_id, message.message_id)
            .await;

        let guild = self
            .guild_store
            .get_guild_config(message.guild_id)
            .await?
            .filter(|g| g.is_initialized)
            .ok_or(RelayError::ConfigurationMissing(message.guild_id))?;
        if !guild.features.is_enabled(FeatureKind::Translation) {
            return Ok(skipped(SkipReason::TranslationDisabled));
        }

        let bindings = self.guild_store.get_bindings(message.guild_id).await?;
        if !bindings.iter().any(|b| b.channel_id == message.channel_id) {
            return Ok(skipped(SkipReason::SourceChannelUnbound));
        }
        let targets: Vec<&LanguageChannelBinding> = bindings
            .iter()
            .filter(|b| b.channel_id != message.channel_id)
            .collect();
        if targets.is_empty() {
            return Ok(skipped(SkipReason::NoTargetChannels));
        }

        if self
            .mapping_store
            .get(message.guild_id, message.message_id)
            .await?
            .is_some()
        {
            return Err(RelayError::DuplicateMapping {
                guild_id: message.guild_id,
                message_id: message.message_id,
            });
        }

        match classify(
            &message.content,
            message.attachment_urls.len(),
            message.sticker_urls.len(),
            message.embed_count,
        ) {
            MessageKind::Empty => return Ok(skipped(SkipReason::Empty)),
            MessageKind::EmojiOnly | MessageKind::StickerOnly | MessageKind::AttachmentOnly => {
                return self.relay_verbatim(&message, &targets).await;
            }
            // Link previews regenerate in the target channel once the
            // restored link is delivered; only the text needs work.
            MessageKind::EmbedCarrying if message.content.trim().is_empty() => {
                return Ok(skipped(SkipReason::Empty));
            }
            MessageKind::PlainText | MessageKind::Mixed | MessageKind::EmbedCarrying => {}
        }

        if is_command_or_link(&message.content) {
            return Ok(skipped(SkipReason::CommandOrLink));
        }

        let limits = guild
            .limits
            .clone()
            .unwrap_or_else(|| self.default_limits.clone());
        self.rate
            .admit(message.guild_id, &limits)
            .map_err(RelayError::RateLimited)?;

        let source_language = detect_language(&message.content);
        let chargeable = targets
            .iter()
            .filter(|t| source_language != Some(t.language_code.as_str()))
            .count();
        let projected = self.cost_per_request * chargeable as f64;
        self.cost
            .ensure_within_budget(message.guild_id, projected, &limits)
            .await
            .map_err(map_cost_error)?;

        let sanitized = sanitize(&message.content);
        let mut relay_urls = message.attachment_urls.clone();
        relay_urls.extend(message.sticker_urls.iter().cloned());
        let reply_mapping = match message.reply_to_message_id {
            Some(reply_id) => self.mapping_store.get(message.guild_id, reply_id).await?,
            None => None,
        };

        let mut translated_messages = HashMap::new();
        let mut failed = 0usize;
        let mut last_translate_error = None;
        let mut last_delivery_error = None;

        for target in &targets {
            // A message already written in the target's language skips the
            // model call; the target gets the original text, mentions still
            // neutralized.
            let translated = if source_language == Some(target.language_code.as_str()) {
                debug!(
                    guild_id = message.guild_id,
                    language = %target.language_code,
                    "source already in target language, relayed untranslated"
                );
                sanitized.restore(&sanitized.text)
            } else {
                // Every model call is paid for, successful or not.
                self.cost
                    .charge(
                        message.guild_id,
                        FeatureKind::Translation,
                        self.cost_per_request,
                        &limits,
                    )
                    .await
                    .map_err(map_cost_error)?;

                match self
                    .translator
                    .translate(&sanitized.text, &target.language_name)
                    .await
                {
                    Ok(text) => {
                        Metrics::translation_succeeded();
                        sanitized.restore(&text)
                    }
                    Err(err) => {
                        Metrics::translation_failed();
                        warn!(
                            guild_id = message.guild_id,
                            language = %target.language_code,
                            "translation failed: {err}"
                        );
                        failed += 1;
                        last_translate_error = Some(err);
                        continue;
                    }
                }
            };

            let reply_to = reply_mapping
                .as_ref()
                .and_then(|m| m.translated_messages.get(&target.language_code))
                .map(|id| (target.channel_id, *id));
            let outbound = OutboundMessage {
                content: translated,
                author_name: message.author_name.clone(),
                author_avatar_url: message.author_avatar_url.clone(),
                attachment_urls: relay_urls.clone(),
                reply_to,
            };

            match self.chat.send_embed(target.channel_id, &outbound).await {
                Ok(sent_id) => {
                    translated_messages.insert(target.language_code.clone(), sent_id);
                }
                Err(err) => {
                    Metrics::delivery_failed();
                    warn!(
                        guild_id = message.guild_id,
                        channel_id = target.channel_id,
                        "delivery failed: {err}"
                    );
                    failed += 1;
                    last_delivery_error = Some(err);
                }
            }
        }

        if translated_messages.is_empty() {
            Metrics::message_failed();
            if let Some(err) = last_delivery_error {
                return Err(RelayError::DeliveryFailed(err));
            }
            if let Some(err) = last_translate_error {
                return Err(RelayError::TranslationUnavailable(err));
            }
            return Ok(skipped(SkipReason::NoTargetChannels));
        }

        let delivered = translated_messages.len();
        let mapping = MessageMapping {
            id: 0,
            guild_id: message.guild_id,
            original_message_id: message.message_id,
            original_channel_id: message.channel_id,
            translated_messages,
            original_content: Some(message.content.clone()),
            created_at: Utc::now(),
        };
        self.mapping_store.create(&mapping).await?;

        Metrics::message_fanned_out();
        info!(
            guild_id = message.guild_id,
            message_id = message.message_id,
            delivered,
            failed,
            "message fanned out"
        );
        Ok(RelayOutcome::FannedOut { delivered, failed })
    }

    /// Emoji, sticker and attachment relays need no model call and keep no
    /// mapping; later edits or deletes of the original are not replayed.
    async fn relay_verbatim(
        &self,
        message: &InboundMessage,
        targets: &[&LanguageChannelBinding],
    ) -> Result<RelayOutcome, RelayError> {
        let mut urls = message.attachment_urls.clone();
        urls.extend(message.sticker_urls.iter().cloned());

        // Verbatim relays go out as plain text, so the author is carried in
        // the body instead of an embed header.
        let mut body = format!("**{}**:", message.author_name);
        if !message.content.trim().is_empty() {
            body.push(' ');
            body.push_str(&message.content);
        }
        for name in &message.sticker_names {
            body.push(' ');
            body.push_str(name);
        }

        let mut delivered = 0usize;
        for target in targets {
            match self
                .chat
                .send_plain(target.channel_id, &body, &urls)
                .await
            {
                Ok(_) => delivered += 1,
                Err(err) => {
                    Metrics::delivery_failed();
                    warn!(
                        guild_id = message.guild_id,
                        channel_id = target.channel_id,
                        "verbatim relay failed: {err}"
                    );
                }
            }
        }

        Metrics::verbatim_relayed();
        Ok(RelayOutcome::RelayedVerbatim { delivered })
    }

    /// Replays an edit against every mapped counterpart. Only the languages
    /// recorded at create time are touched; channels bound afterwards never
    /// receive back-filled messages.
    pub async fn handle_edit(&self, edit: MessageEdit) -> Result<RelayOutcome, RelayError> {
        let _guard = self.locks.acquire(edit.guild_id, edit.message_id).await;

        let Some(mapping) = self
            .mapping_store
            .get(edit.guild_id, edit.message_id)
            .await?
        else {
            return Ok(skipped(SkipReason::NoMapping));
        };
        if mapping.original_content.as_deref() == Some(edit.content.as_str()) {
            debug!(
                guild_id = edit.guild_id,
                message_id = edit.message_id,
                "edit carried unchanged content"
            );
            return Ok(skipped(SkipReason::Unchanged));
        }

        let guild = self
            .guild_store
            .get_guild_config(edit.guild_id)
            .await?
            .filter(|g| g.is_initialized)
            .ok_or(RelayError::ConfigurationMissing(edit.guild_id))?;
        let limits = guild
            .limits
            .clone()
            .unwrap_or_else(|| self.default_limits.clone());

        self.rate
            .admit(edit.guild_id, &limits)
            .map_err(RelayError::RateLimited)?;
        let source_language = detect_language(&edit.content);
        let chargeable = mapping
            .translated_messages
            .keys()
            .filter(|code| source_language != Some(code.as_str()))
            .count();
        let projected = self.cost_per_request * chargeable as f64;
        self.cost
            .ensure_within_budget(edit.guild_id, projected, &limits)
            .await
            .map_err(map_cost_error)?;

        let bindings = self.guild_store.get_bindings(edit.guild_id).await?;
        let by_code: HashMap<&str, &LanguageChannelBinding> = bindings
            .iter()
            .map(|b| (b.language_code.as_str(), b))
            .collect();

        let sanitized = sanitize(&edit.content);
        let mut edited = 0usize;
        let mut failed = 0usize;

        for (language_code, translated_id) in &mapping.translated_messages {
            let Some(binding) = by_code.get(language_code.as_str()) else {
                debug!(
                    guild_id = edit.guild_id,
                    language = %language_code,
                    "binding no longer exists, edit not replayed"
                );
                failed += 1;
                continue;
            };

            let translated = if source_language == Some(language_code.as_str()) {
                sanitized.restore(&sanitized.text)
            } else {
                self.cost
                    .charge(
                        edit.guild_id,
                        FeatureKind::Translation,
                        self.cost_per_request,
                        &limits,
                    )
                    .await
                    .map_err(map_cost_error)?;

                match self
                    .translator
                    .translate(&sanitized.text, &binding.language_name)
                    .await
                {
                    Ok(text) => {
                        Metrics::translation_succeeded();
                        sanitized.restore(&text)
                    }
                    Err(err) => {
                        Metrics::translation_failed();
                        warn!(
                            guild_id = edit.guild_id,
                            language = %language_code,
                            "edit translation failed: {err}"
                        );
                        failed += 1;
                        continue;
                    }
                }
            };

            let outbound = OutboundMessage {
                content: translated,
                author_name: edit.author_name.clone(),
                author_avatar_url: edit.author_avatar_url.clone(),
                attachment_urls: Vec::new(),
                reply_to: None,
            };
            match self
                .chat
                .edit_embed(binding.channel_id, *translated_id, &outbound)
                .await
            {
                Ok(()) => edited += 1,
                Err(err) => {
                    Metrics::delivery_failed();
                    warn!(
                        guild_id = edit.guild_id,
                        channel_id = binding.channel_id,
                        translated_id,
                        "edit replay failed: {err}"
                    );
                    failed += 1;
                }
            }
        }

        // Recorded even when some replays failed: the mapping tracks the
        // latest original content, not delivery success.
        self.mapping_store
            .update_content(
                edit.guild_id,
                edit.message_id,
                &mapping.translated_messages,
                &edit.content,
            )
            .await?;

        Metrics::edit_replayed();
        Ok(RelayOutcome::Edited { edited, failed })
    }

    /// Replays a delete against every mapped counterpart, then drops the
    /// mapping. A counterpart that is already gone counts as deleted.
    pub async fn handle_delete(&self, delete: MessageDelete) -> Result<RelayOutcome, RelayError> {
        let _guard = self.locks.acquire(delete.guild_id, delete.message_id).await;

        let Some(mapping) = self
            .mapping_store
            .get(delete.guild_id, delete.message_id)
            .await?
        else {
            return Ok(skipped(SkipReason::NoMapping));
        };

        let bindings = self.guild_store.get_bindings(delete.guild_id).await?;
        let by_code: HashMap<&str, &LanguageChannelBinding> = bindings
            .iter()
            .map(|b| (b.language_code.as_str(), b))
            .collect();

        let mut deleted = 0usize;
        for (language_code, translated_id) in &mapping.translated_messages {
            let Some(binding) = by_code.get(language_code.as_str()) else {
                continue;
            };
            match self
                .chat
                .delete_message(binding.channel_id, *translated_id)
                .await
            {
                Ok(()) => deleted += 1,
                Err(ChatError::NotFound) => {
                    debug!(
                        guild_id = delete.guild_id,
                        translated_id, "counterpart already gone"
                    );
                    deleted += 1;
                }
                Err(err) => {
                    Metrics::delivery_failed();
                    warn!(
                        guild_id = delete.guild_id,
                        channel_id = binding.channel_id,
                        translated_id,
                        "delete replay failed: {err}"
                    );
                }
            }
        }

        // The mapping goes regardless of replay failures; a half-deleted
        // fan-out must not resurrect on retry.
        self.mapping_store
            .delete(delete.guild_id, delete.message_id)
            .await?;

        Metrics::delete_replayed();
        Ok(RelayOutcome::Deleted { deleted })
    }

    /// Age-based mapping eviction, run periodically from a background task.
    pub async fn prune_expired_mappings(&self) -> Result<usize, RelayError> {
        let cutoff = Utc::now() - self.mapping_retention;
        let removed = self.mapping_store.prune_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, "pruned expired message mappings");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{DatabaseManager, GuildConfig, GuildFeatures};
    use crate::translator::TranslateError;

    const GUILD: i64 = 42;
    const EN_CHANNEL: i64 = 100;
    const KO_CHANNEL: i64 = 200;
    const JA_CHANNEL: i64 = 300;

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        channel_id: i64,
        message_id: i64,
        content: String,
        attachments: Vec<String>,
        reply_to: Option<(i64, i64)>,
        plain: bool,
    }

    #[derive(Default)]
    struct MockChatClient {
        sent: Mutex<Vec<Sent>>,
        edits: Mutex<Vec<(i64, i64, String)>>,
        deletes: Mutex<Vec<(i64, i64)>>,
        next_id: AtomicI64,
        failing_channels: Mutex<HashSet<i64>>,
        missing_messages: Mutex<HashSet<i64>>,
    }

    impl MockChatClient {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(9000),
                ..Self::default()
            }
        }

        fn fail_channel(&self, channel_id: i64) {
            self.failing_channels.lock().insert(channel_id);
        }

        fn mark_missing(&self, message_id: i64) {
            self.missing_messages.lock().insert(message_id);
        }

        fn sent_to(&self, channel_id: i64) -> Vec<Sent> {
            self.sent
                .lock()
                .iter()
                .filter(|s| s.channel_id == channel_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl ChatClient for MockChatClient {
        async fn send_embed(
            &self,
            channel_id: i64,
            message: &OutboundMessage,
        ) -> Result<i64, ChatError> {
            if self.failing_channels.lock().contains(&channel_id) {
                return Err(ChatError::Forbidden);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().push(Sent {
                channel_id,
                message_id: id,
                content: message.content.clone(),
                attachments: message.attachment_urls.clone(),
                reply_to: message.reply_to,
                plain: false,
            });
            Ok(id)
        }

        async fn send_plain(
            &self,
            channel_id: i64,
            content: &str,
            attachment_urls: &[String],
        ) -> Result<i64, ChatError> {
            if self.failing_channels.lock().contains(&channel_id) {
                return Err(ChatError::Forbidden);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut body = content.to_string();
            for url in attachment_urls {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(url);
            }
            self.sent.lock().push(Sent {
                channel_id,
                message_id: id,
                content: body,
                attachments: attachment_urls.to_vec(),
                reply_to: None,
                plain: true,
            });
            Ok(id)
        }

        async fn edit_embed(
            &self,
            channel_id: i64,
            message_id: i64,
            message: &OutboundMessage,
        ) -> Result<(), ChatError> {
            if self.missing_messages.lock().contains(&message_id) {
                return Err(ChatError::NotFound);
            }
            self.edits
                .lock()
                .push((channel_id, message_id, message.content.clone()));
            Ok(())
        }

        async fn delete_message(
            &self,
            channel_id: i64,
            message_id: i64,
        ) -> Result<(), ChatError> {
            if self.missing_messages.lock().contains(&message_id) {
                return Err(ChatError::NotFound);
            }
            self.deletes.lock().push((channel_id, message_id));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTranslator {
        calls: Mutex<Vec<String>>,
        failing_languages: Mutex<HashSet<String>>,
    }

    impl MockTranslator {
        fn fail_language(&self, language: &str) {
            self.failing_languages.lock().insert(language.to_string());
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(
            &self,
            text: &str,
            target_language: &str,
        ) -> Result<String, TranslateError> {
            self.calls.lock().push(target_language.to_string());
            if self.failing_languages.lock().contains(target_language) {
                return Err(TranslateError::Unavailable("mock failure".to_string()));
            }
            Ok(format!("[{target_language}] {text}"))
        }
    }

    struct Fixture {
        core: RelayCore,
        chat: Arc<MockChatClient>,
        translator: Arc<MockTranslator>,
        manager: DatabaseManager,
        _db_file: NamedTempFile,
    }

    fn test_config() -> Config {
        Config {
            relay: Default::default(),
            auth: crate::config::AuthConfig {
                bot_token: "token".to_string(),
                gemini_api_key: "key".to_string(),
                use_privileged_intents: false,
            },
            translator: Default::default(),
            logging: Default::default(),
            database: DatabaseConfig {
                url: None,
                filename: Some("unused".to_string()),
            },
            limits: Default::default(),
            web: Default::default(),
        }
    }

    async fn fixture() -> Fixture {
        let db_file = NamedTempFile::new().expect("temp sqlite file");
        let db_config = DatabaseConfig {
            url: None,
            filename: Some(db_file.path().to_string_lossy().to_string()),
        };
        let manager = DatabaseManager::new(&db_config).await.expect("db manager");
        manager.migrate().await.expect("migrate");

        let now = Utc::now();
        manager
            .guild_store()
            .upsert_guild_config(&GuildConfig {
                id: 0,
                guild_id: GUILD,
                guild_name: "test guild".to_string(),
                features: GuildFeatures {
                    translation: true,
                    tts: false,
                    music: false,
                },
                limits: None,
                is_initialized: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("guild config");

        for (code, name, channel) in [
            ("en", "English", EN_CHANNEL),
            ("ko", "Korean", KO_CHANNEL),
            ("ja", "Japanese", JA_CHANNEL),
        ] {
            manager
                .guild_store()
                .create_binding(&LanguageChannelBinding {
                    id: 0,
                    guild_id: GUILD,
                    language_code: code.to_string(),
                    language_name: name.to_string(),
                    channel_id: channel,
                    is_active: true,
                    created_at: now,
                })
                .await
                .expect("binding");
        }

        let chat = Arc::new(MockChatClient::new());
        let translator = Arc::new(MockTranslator::default());
        let core = RelayCore::new(
            &test_config(),
            manager.guild_store(),
            manager.mapping_store(),
            manager.usage_store(),
            chat.clone(),
            translator.clone(),
        );

        Fixture {
            core,
            chat,
            translator,
            manager,
            _db_file: db_file,
        }
    }

    fn inbound(message_id: i64, content: &str) -> InboundMessage {
        InboundMessage {
            guild_id: GUILD,
            channel_id: EN_CHANNEL,
            message_id,
            author_name: "alice".to_string(),
            author_avatar_url: None,
            content: content.to_string(),
            attachment_urls: Vec::new(),
            sticker_urls: Vec::new(),
            sticker_names: Vec::new(),
            embed_count: 0,
            reply_to_message_id: None,
        }
    }

    #[tokio::test]
    async fn create_fans_out_and_records_mapping() {
        let fx = fixture().await;

        let outcome = fx
            .core
            .handle_create(inbound(1, "hello world"))
            .await
            .expect("relay");
        assert_eq!(
            outcome,
            RelayOutcome::FannedOut {
                delivered: 2,
                failed: 0
            }
        );

        // Source channel receives nothing; both other languages do.
        assert!(fx.chat.sent_to(EN_CHANNEL).is_empty());
        assert_eq!(fx.chat.sent_to(KO_CHANNEL).len(), 1);
        assert_eq!(fx.chat.sent_to(JA_CHANNEL).len(), 1);
        assert_eq!(
            fx.chat.sent_to(KO_CHANNEL)[0].content,
            "[Korean] hello world"
        );

        let mapping = fx
            .manager
            .mapping_store()
            .get(GUILD, 1)
            .await
            .expect("query")
            .expect("mapping recorded");
        assert_eq!(mapping.translated_messages.len(), 2);
        assert_eq!(mapping.original_content.as_deref(), Some("hello world"));
        assert!(mapping.translated_messages.contains_key("ko"));
        assert!(mapping.translated_messages.contains_key("ja"));
    }

    #[tokio::test]
    async fn broadcast_mentions_stay_neutralized_in_delivery() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(2, "warning @everyone danger"))
            .await
            .expect("relay");

        for sent in fx.chat.sent.lock().iter() {
            assert!(!sent.content.contains("@everyone"));
            assert!(sent.content.contains("[everyone]"));
        }
    }

    #[tokio::test]
    async fn emoji_only_relays_verbatim_without_model_call() {
        let fx = fixture().await;

        let outcome = fx
            .core
            .handle_create(inbound(3, "🎉🎉"))
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::RelayedVerbatim { delivered: 2 });
        assert_eq!(fx.translator.call_count(), 0);
        assert!(fx.chat.sent_to(KO_CHANNEL)[0].plain);
        assert!(fx.chat.sent_to(KO_CHANNEL)[0].content.starts_with("**alice**:"));
        assert!(fx.chat.sent_to(KO_CHANNEL)[0].content.contains("🎉🎉"));

        // No durable mapping for verbatim relays.
        assert!(fx
            .manager
            .mapping_store()
            .get(GUILD, 3)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn sticker_relay_carries_author_and_sticker_name() {
        let fx = fixture().await;

        let mut message = inbound(30, "");
        message.sticker_urls = vec!["https://cdn.example/pog.png".to_string()];
        message.sticker_names = vec!["pog".to_string()];
        let outcome = fx.core.handle_create(message).await.expect("relay");
        assert_eq!(outcome, RelayOutcome::RelayedVerbatim { delivered: 2 });

        let sent = fx.chat.sent_to(KO_CHANNEL);
        assert!(sent[0].content.starts_with("**alice**:"));
        assert!(sent[0].content.contains("pog"));
        assert_eq!(
            sent[0].attachments,
            vec!["https://cdn.example/pog.png".to_string()]
        );
    }

    #[tokio::test]
    async fn mixed_message_keeps_sticker_url_alongside_translation() {
        let fx = fixture().await;

        let mut message = inbound(31, "check this out");
        message.attachment_urls = vec!["https://cdn.example/photo.jpg".to_string()];
        message.sticker_urls = vec!["https://cdn.example/pog.png".to_string()];
        message.sticker_names = vec!["pog".to_string()];
        fx.core.handle_create(message).await.expect("relay");

        let sent = fx.chat.sent_to(KO_CHANNEL);
        assert_eq!(sent[0].content, "[Korean] check this out");
        assert_eq!(
            sent[0].attachments,
            vec![
                "https://cdn.example/photo.jpg".to_string(),
                "https://cdn.example/pog.png".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn target_in_source_language_gets_original_without_model_call() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(32, "안녕하세요 여러분"))
            .await
            .expect("relay");

        // The Korean channel receives the original text untranslated; only
        // the Japanese target costs a model call.
        assert_eq!(fx.chat.sent_to(KO_CHANNEL)[0].content, "안녕하세요 여러분");
        assert!(fx.chat.sent_to(JA_CHANNEL)[0].content.starts_with("[Japanese]"));
        assert!(!fx.translator.calls.lock().contains(&"Korean".to_string()));

        let day = Utc::now().date_naive();
        let record = fx
            .manager
            .usage_store()
            .get_usage(GUILD, FeatureKind::Translation, day)
            .await
            .expect("query usage")
            .expect("usage row");
        assert_eq!(record.usage_count, 1);

        // Both counterparts are mapped, so edits and deletes replay to the
        // untranslated copy too.
        let mapping = fx
            .manager
            .mapping_store()
            .get(GUILD, 32)
            .await
            .expect("query")
            .expect("mapping");
        assert!(mapping.translated_messages.contains_key("ko"));
        assert!(mapping.translated_messages.contains_key("ja"));
    }

    #[tokio::test]
    async fn commands_are_skipped() {
        let fx = fixture().await;

        let outcome = fx
            .core
            .handle_create(inbound(4, "!play despacito"))
            .await
            .expect("relay");
        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::CommandOrLink));
        assert!(fx.chat.sent.lock().is_empty());
        assert_eq!(fx.translator.call_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(5, "first"))
            .await
            .expect("first relay");
        let err = fx
            .core
            .handle_create(inbound(5, "second"))
            .await
            .expect_err("duplicate rejected");
        assert!(matches!(
            err,
            RelayError::DuplicateMapping {
                guild_id: GUILD,
                message_id: 5,
            }
        ));
    }

    #[tokio::test]
    async fn partial_delivery_failure_records_surviving_pair() {
        let fx = fixture().await;
        fx.chat.fail_channel(JA_CHANNEL);

        let outcome = fx
            .core
            .handle_create(inbound(6, "partial"))
            .await
            .expect("relay");
        assert_eq!(
            outcome,
            RelayOutcome::FannedOut {
                delivered: 1,
                failed: 1
            }
        );

        let mapping = fx
            .manager
            .mapping_store()
            .get(GUILD, 6)
            .await
            .expect("query")
            .expect("mapping recorded");
        assert!(mapping.translated_messages.contains_key("ko"));
        assert!(!mapping.translated_messages.contains_key("ja"));
    }

    #[tokio::test]
    async fn total_translation_failure_records_nothing() {
        let fx = fixture().await;
        fx.translator.fail_language("Korean");
        fx.translator.fail_language("Japanese");

        let err = fx
            .core
            .handle_create(inbound(7, "doomed"))
            .await
            .expect_err("no translation available");
        assert!(matches!(err, RelayError::TranslationUnavailable(_)));
        assert!(fx
            .manager
            .mapping_store()
            .get(GUILD, 7)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn reply_links_to_mapped_counterpart() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(8, "original"))
            .await
            .expect("relay original");
        let mapping = fx
            .manager
            .mapping_store()
            .get(GUILD, 8)
            .await
            .expect("query")
            .expect("mapping");
        let ko_counterpart = mapping.translated_messages["ko"];

        let mut reply = inbound(9, "replying");
        reply.reply_to_message_id = Some(8);
        fx.core.handle_create(reply).await.expect("relay reply");

        let ko_sent = fx.chat.sent_to(KO_CHANNEL);
        assert_eq!(
            ko_sent.last().expect("reply sent").reply_to,
            Some((KO_CHANNEL, ko_counterpart))
        );
        let ja_sent = fx.chat.sent_to(JA_CHANNEL);
        assert!(ja_sent.last().expect("reply sent").reply_to.is_some());
    }

    #[tokio::test]
    async fn reply_to_unmapped_message_sends_without_reference() {
        let fx = fixture().await;

        let mut reply = inbound(10, "orphan reply");
        reply.reply_to_message_id = Some(999_999);
        fx.core.handle_create(reply).await.expect("relay");

        assert_eq!(fx.chat.sent_to(KO_CHANNEL)[0].reply_to, None);
    }

    #[tokio::test]
    async fn edit_replays_to_mapped_languages() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(11, "before edit"))
            .await
            .expect("relay");

        let outcome = fx
            .core
            .handle_edit(MessageEdit {
                guild_id: GUILD,
                message_id: 11,
                content: "after edit".to_string(),
                author_name: "alice".to_string(),
                author_avatar_url: None,
            })
            .await
            .expect("edit");
        assert_eq!(
            outcome,
            RelayOutcome::Edited {
                edited: 2,
                failed: 0
            }
        );

        let edits = fx.chat.edits.lock().clone();
        assert_eq!(edits.len(), 2);
        assert!(edits.iter().all(|(_, _, content)| content.contains("after edit")));

        let mapping = fx
            .manager
            .mapping_store()
            .get(GUILD, 11)
            .await
            .expect("query")
            .expect("mapping");
        assert_eq!(mapping.original_content.as_deref(), Some("after edit"));
    }

    #[tokio::test]
    async fn edit_without_mapping_is_skipped() {
        let fx = fixture().await;

        let outcome = fx
            .core
            .handle_edit(MessageEdit {
                guild_id: GUILD,
                message_id: 12345,
                content: "never relayed".to_string(),
                author_name: "alice".to_string(),
                author_avatar_url: None,
            })
            .await
            .expect("edit");
        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::NoMapping));
        assert_eq!(fx.translator.call_count(), 0);
    }

    #[tokio::test]
    async fn delete_removes_counterparts_and_mapping() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(13, "to be deleted"))
            .await
            .expect("relay");

        let outcome = fx
            .core
            .handle_delete(MessageDelete {
                guild_id: GUILD,
                message_id: 13,
            })
            .await
            .expect("delete");
        assert_eq!(outcome, RelayOutcome::Deleted { deleted: 2 });
        assert_eq!(fx.chat.deletes.lock().len(), 2);

        assert!(fx
            .manager
            .mapping_store()
            .get(GUILD, 13)
            .await
            .expect("query")
            .is_none());

        // Second delete finds no mapping and is a no-op.
        let outcome = fx
            .core
            .handle_delete(MessageDelete {
                guild_id: GUILD,
                message_id: 13,
            })
            .await
            .expect("second delete");
        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::NoMapping));
    }

    #[tokio::test]
    async fn delete_tolerates_already_missing_counterpart() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(14, "vanishing"))
            .await
            .expect("relay");
        let mapping = fx
            .manager
            .mapping_store()
            .get(GUILD, 14)
            .await
            .expect("query")
            .expect("mapping");
        fx.chat.mark_missing(mapping.translated_messages["ko"]);

        let outcome = fx
            .core
            .handle_delete(MessageDelete {
                guild_id: GUILD,
                message_id: 14,
            })
            .await
            .expect("delete");
        assert_eq!(outcome, RelayOutcome::Deleted { deleted: 2 });
    }

    #[tokio::test]
    async fn unconfigured_guild_is_an_error() {
        let fx = fixture().await;

        let mut message = inbound(15, "hello");
        message.guild_id = 777;
        let err = fx
            .core
            .handle_create(message)
            .await
            .expect_err("unconfigured guild");
        assert!(matches!(err, RelayError::ConfigurationMissing(777)));
    }

    #[tokio::test]
    async fn disabled_translation_is_skipped() {
        let fx = fixture().await;

        let now = Utc::now();
        fx.manager
            .guild_store()
            .upsert_guild_config(&GuildConfig {
                id: 0,
                guild_id: GUILD,
                guild_name: "test guild".to_string(),
                features: GuildFeatures::default(),
                limits: None,
                is_initialized: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("guild config");

        let outcome = fx
            .core
            .handle_create(inbound(16, "hello"))
            .await
            .expect("relay");
        assert_eq!(
            outcome,
            RelayOutcome::Skipped(SkipReason::TranslationDisabled)
        );
    }

    #[tokio::test]
    async fn unbound_source_channel_is_skipped() {
        let fx = fixture().await;

        let mut message = inbound(17, "hello");
        message.channel_id = 999;
        let outcome = fx.core.handle_create(message).await.expect("relay");
        assert_eq!(
            outcome,
            RelayOutcome::Skipped(SkipReason::SourceChannelUnbound)
        );
    }

    #[tokio::test]
    async fn rate_limit_rejects_before_any_delivery() {
        let fx = fixture().await;

        let now = Utc::now();
        fx.manager
            .guild_store()
            .upsert_guild_config(&GuildConfig {
                id: 0,
                guild_id: GUILD,
                guild_name: "test guild".to_string(),
                features: GuildFeatures {
                    translation: true,
                    tts: false,
                    music: false,
                },
                limits: Some(GuildLimits {
                    requests_per_minute: 1,
                    max_daily_requests: 10,
                    max_monthly_cost_usd: 10.0,
                    cost_alert_threshold_usd: 8.0,
                }),
                is_initialized: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("guild config");

        fx.core
            .handle_create(inbound(18, "first"))
            .await
            .expect("first relay");
        let sent_before = fx.chat.sent.lock().len();

        let err = fx
            .core
            .handle_create(inbound(19, "second"))
            .await
            .expect_err("rate limited");
        assert!(matches!(err, RelayError::RateLimited(_)));
        assert_eq!(fx.chat.sent.lock().len(), sent_before);
    }

    #[tokio::test]
    async fn budget_ceiling_rejects_fan_out() {
        let fx = fixture().await;

        let now = Utc::now();
        fx.manager
            .guild_store()
            .upsert_guild_config(&GuildConfig {
                id: 0,
                guild_id: GUILD,
                guild_name: "test guild".to_string(),
                features: GuildFeatures {
                    translation: true,
                    tts: false,
                    music: false,
                },
                limits: Some(GuildLimits {
                    requests_per_minute: 30,
                    max_daily_requests: 1000,
                    // Two target languages cost 0.002 per message.
                    max_monthly_cost_usd: 0.001,
                    cost_alert_threshold_usd: 0.001,
                }),
                is_initialized: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("guild config");

        let err = fx
            .core
            .handle_create(inbound(20, "too expensive"))
            .await
            .expect_err("over budget");
        assert!(matches!(err, RelayError::BudgetExceeded { .. }));
        assert!(fx.chat.sent.lock().is_empty());
        assert_eq!(fx.translator.call_count(), 0);
    }

    #[tokio::test]
    async fn prune_respects_retention_window() {
        let fx = fixture().await;

        fx.core
            .handle_create(inbound(21, "fresh"))
            .await
            .expect("relay");
        let removed = fx.core.prune_expired_mappings().await.expect("prune");
        assert_eq!(removed, 0);
        assert!(fx
            .manager
            .mapping_store()
            .get(GUILD, 21)
            .await
            .expect("query")
            .is_some());
    }
}
