use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayIntents, GuildId, Http,
    Message as SerenityMessage, MessageId, MessageReference, MessageUpdateEvent, Ready,
};
use serenity::builder::{CreateEmbed, CreateEmbedAuthor, CreateMessage, EditMessage};
use tokio::sync::{oneshot, RwLock};

use crate::config::Config;
use crate::relay::{InboundMessage, MessageDelete, MessageEdit, RelayCore};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;

pub mod embed;

pub use self::embed::{build_relay_embed, EmbedAuthor, RelayEmbed};

#[derive(Debug, Error)]
pub enum ChatError {
    /// The target message or channel no longer exists. Treated as benign by
    /// delete replay.
    #[error("target not found")]
    NotFound,

    #[error("missing permission for target channel")]
    Forbidden,

    #[error("chat delivery error: {0}")]
    Other(String),
}

/// A message ready for delivery to one target channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub content: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub attachment_urls: Vec<String>,
    /// (channel id, message id) of the mapped counterpart being replied to.
    pub reply_to: Option<(i64, i64)>,
}

/// Delivery seam between the relay core and the chat backend. Tests swap in
/// an in-memory implementation.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends an authored embed; returns the new message id.
    async fn send_embed(&self, channel_id: i64, message: &OutboundMessage)
        -> Result<i64, ChatError>;

    /// Sends untranslated content as-is (emoji, sticker and attachment
    /// relays); returns the new message id.
    async fn send_plain(
        &self,
        channel_id: i64,
        content: &str,
        attachment_urls: &[String],
    ) -> Result<i64, ChatError>;

    /// Replaces the embed of an earlier relayed message in place.
    async fn edit_embed(
        &self,
        channel_id: i64,
        message_id: i64,
        message: &OutboundMessage,
    ) -> Result<(), ChatError>;

    async fn delete_message(&self, channel_id: i64, message_id: i64) -> Result<(), ChatError>;
}

fn map_serenity_error(err: serenity::Error) -> ChatError {
    if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response)) = &err {
        match response.status_code.as_u16() {
            404 => return ChatError::NotFound,
            403 => return ChatError::Forbidden,
            _ => {}
        }
    }
    ChatError::Other(err.to_string())
}

fn to_create_embed(relay_embed: &RelayEmbed) -> CreateEmbed {
    let mut builder = CreateEmbed::new()
        .description(&relay_embed.description)
        .color(relay_embed.color);
    if let Some(author) = &relay_embed.author {
        let mut author_builder = CreateEmbedAuthor::new(&author.name);
        if let Some(icon_url) = &author.icon_url {
            author_builder = author_builder.icon_url(icon_url);
        }
        builder = builder.author(author_builder);
    }
    if let Some(image_url) = &relay_embed.image_url {
        builder = builder.image(image_url);
    }
    builder
}

/// serenity-backed [`ChatClient`]. The `Http` handle arrives asynchronously
/// once the gateway reports ready.
#[derive(Clone)]
pub struct DiscordChatClient {
    http: Arc<RwLock<Option<Arc<Http>>>>,
}

impl DiscordChatClient {
    fn new(http: Arc<RwLock<Option<Arc<Http>>>>) -> Self {
        Self { http }
    }

    async fn http(&self) -> Result<Arc<Http>, ChatError> {
        self.http
            .read()
            .await
            .clone()
            .ok_or_else(|| ChatError::Other("discord http client not available".to_string()))
    }
}

#[async_trait]
impl ChatClient for DiscordChatClient {
    async fn send_embed(
        &self,
        channel_id: i64,
        message: &OutboundMessage,
    ) -> Result<i64, ChatError> {
        let http = self.http().await?;
        let channel = ChannelId::new(channel_id as u64);

        let mut builder = CreateMessage::new().embed(to_create_embed(&build_relay_embed(message)));
        if let Some((reply_channel_id, reply_message_id)) = message.reply_to {
            builder = builder.reference_message(MessageReference::from((
                ChannelId::new(reply_channel_id as u64),
                MessageId::new(reply_message_id as u64),
            )));
        }

        let sent = channel
            .send_message(&http, builder)
            .await
            .map_err(map_serenity_error)?;
        debug!(channel_id, message_id = sent.id.get(), "sent relay embed");
        Ok(sent.id.get() as i64)
    }

    async fn send_plain(
        &self,
        channel_id: i64,
        content: &str,
        attachment_urls: &[String],
    ) -> Result<i64, ChatError> {
        let http = self.http().await?;
        let channel = ChannelId::new(channel_id as u64);

        let mut body = content.to_string();
        for url in attachment_urls {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(url);
        }

        let sent = channel
            .send_message(&http, CreateMessage::new().content(body))
            .await
            .map_err(map_serenity_error)?;
        debug!(channel_id, message_id = sent.id.get(), "sent verbatim relay");
        Ok(sent.id.get() as i64)
    }

    async fn edit_embed(
        &self,
        channel_id: i64,
        message_id: i64,
        message: &OutboundMessage,
    ) -> Result<(), ChatError> {
        let http = self.http().await?;
        ChannelId::new(channel_id as u64)
            .edit_message(
                &http,
                MessageId::new(message_id as u64),
                EditMessage::new().embed(to_create_embed(&build_relay_embed(message))),
            )
            .await
            .map_err(map_serenity_error)?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: i64, message_id: i64) -> Result<(), ChatError> {
        let http = self.http().await?;
        ChannelId::new(channel_id as u64)
            .delete_message(&http, MessageId::new(message_id as u64))
            .await
            .map_err(map_serenity_error)?;
        Ok(())
    }
}

struct RelayEventHandler {
    relay: Arc<RwLock<Option<Arc<RelayCore>>>>,
    ready_sender: Arc<tokio::sync::Mutex<Option<oneshot::Sender<()>>>>,
    http_sender: Arc<tokio::sync::Mutex<Option<oneshot::Sender<Arc<Http>>>>>,
}

#[serenity::async_trait]
impl SerenityEventHandler for RelayEventHandler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
        if let Some(sender) = self.http_sender.lock().await.take() {
            let _ = sender.send(ctx.http);
        }
    }

    async fn message(&self, _ctx: SerenityContext, msg: SerenityMessage) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let relay = self.relay.read().await.clone();
        let Some(relay) = relay else {
            debug!("ignoring discord message before relay binding");
            return;
        };

        let sticker_urls = msg
            .sticker_items
            .iter()
            .filter_map(|sticker| sticker.image_url())
            .collect();
        let sticker_names = msg
            .sticker_items
            .iter()
            .map(|sticker| sticker.name.clone())
            .collect();
        let inbound = InboundMessage {
            guild_id: guild_id.get() as i64,
            channel_id: msg.channel_id.get() as i64,
            message_id: msg.id.get() as i64,
            author_name: msg.author.name.clone(),
            author_avatar_url: msg.author.avatar_url(),
            content: msg.content.clone(),
            attachment_urls: msg.attachments.iter().map(|a| a.url.clone()).collect(),
            sticker_urls,
            sticker_names,
            embed_count: msg.embeds.len(),
            reply_to_message_id: msg.referenced_message.as_ref().map(|m| m.id.get() as i64),
        };

        if let Err(err) = relay.handle_create(inbound).await {
            error!("failed to relay discord message: {err}");
        }
    }

    async fn message_update(
        &self,
        _ctx: SerenityContext,
        _old_if_available: Option<SerenityMessage>,
        _new_if_available: Option<SerenityMessage>,
        update: MessageUpdateEvent,
    ) {
        if update.author.as_ref().is_some_and(|author| author.bot) {
            return;
        }
        let Some(guild_id) = update.guild_id else {
            return;
        };
        let Some(content) = update.content.clone() else {
            return;
        };

        let relay = self.relay.read().await.clone();
        let Some(relay) = relay else {
            return;
        };

        let edit = MessageEdit {
            guild_id: guild_id.get() as i64,
            message_id: update.id.get() as i64,
            content,
            author_name: update
                .author
                .as_ref()
                .map(|author| author.name.clone())
                .unwrap_or_default(),
            author_avatar_url: update.author.as_ref().and_then(|author| author.avatar_url()),
        };

        if let Err(err) = relay.handle_edit(edit).await {
            error!("failed to relay discord message edit: {err}");
        }
    }

    async fn message_delete(
        &self,
        _ctx: SerenityContext,
        _channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let Some(guild_id) = guild_id else {
            return;
        };

        let relay = self.relay.read().await.clone();
        let Some(relay) = relay else {
            return;
        };

        let delete = MessageDelete {
            guild_id: guild_id.get() as i64,
            message_id: deleted_message_id.get() as i64,
        };
        if let Err(err) = relay.handle_delete(delete).await {
            error!("failed to relay discord message delete: {err}");
        }
    }

    async fn message_delete_bulk(
        &self,
        _ctx: SerenityContext,
        _channel_id: ChannelId,
        deleted_message_ids: Vec<MessageId>,
        guild_id: Option<GuildId>,
    ) {
        let Some(guild_id) = guild_id else {
            return;
        };

        let relay = self.relay.read().await.clone();
        let Some(relay) = relay else {
            return;
        };

        for message_id in unique_message_ids(deleted_message_ids) {
            let delete = MessageDelete {
                guild_id: guild_id.get() as i64,
                message_id: message_id.get() as i64,
            };
            if let Err(err) = relay.handle_delete(delete).await {
                error!(
                    "failed to relay discord bulk message delete for {}: {err}",
                    message_id
                );
            }
        }
    }
}

fn unique_message_ids(ids: Vec<MessageId>) -> Vec<MessageId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Owns the serenity gateway connection and hands out the shared HTTP-backed
/// [`ChatClient`].
#[derive(Clone)]
pub struct DiscordGateway {
    config: Arc<Config>,
    relay: Arc<RwLock<Option<Arc<RelayCore>>>>,
    http: Arc<RwLock<Option<Arc<Http>>>>,
    login_state: Arc<tokio::sync::Mutex<LoginState>>,
}

#[derive(Default)]
struct LoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

impl DiscordGateway {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            relay: Arc::new(RwLock::new(None)),
            http: Arc::new(RwLock::new(None)),
            login_state: Arc::new(tokio::sync::Mutex::new(LoginState::default())),
        }
    }

    /// The relay core is constructed after the gateway (it needs the chat
    /// client), so it is bound late.
    pub async fn set_relay(&self, relay: Arc<RelayCore>) {
        *self.relay.write().await = Some(relay);
    }

    pub fn chat_client(&self) -> DiscordChatClient {
        DiscordChatClient::new(self.http.clone())
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let intents = if self.config.auth.use_privileged_intents {
            GatewayIntents::all()
        } else {
            GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let (http_tx, http_rx) = oneshot::channel();
        let event_handler = RelayEventHandler {
            relay: self.relay.clone(),
            ready_sender: Arc::new(tokio::sync::Mutex::new(Some(ready_tx))),
            http_sender: Arc::new(tokio::sync::Mutex::new(Some(http_tx))),
        };

        let mut gateway_client = SerenityClient::builder(&self.config.auth.bot_token, intents)
            .event_handler(event_handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(std::time::Duration::from_secs(30), ready_rx).await {
            Ok(Ok(())) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");

                if let Ok(Ok(http)) =
                    tokio::time::timeout(std::time::Duration::from_secs(5), http_rx).await
                {
                    *self.http.write().await = Some(http);
                }

                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!(
                    "discord gateway exited before receiving Ready event"
                ))
            }
            Err(_) => {
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord gateway is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord gateway: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    info!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        state.is_logged_in = false;
        info!("discord gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::unique_message_ids;
    use serenity::all::MessageId;

    #[test]
    fn unique_message_ids_deduplicates_and_preserves_order() {
        let ids = vec![
            MessageId::new(42),
            MessageId::new(99),
            MessageId::new(42),
            MessageId::new(7),
            MessageId::new(99),
        ];

        let deduped = unique_message_ids(ids);

        assert_eq!(
            deduped,
            vec![MessageId::new(42), MessageId::new(99), MessageId::new(7)]
        );
    }
}
