use thiserror::Error;

use crate::db::DatabaseError;
use crate::discord::ChatError;
use crate::limits::RateWindow;
use crate::translator::TranslateError;

pub use self::locks::MessageLockTable;
pub use self::pipeline::RelayCore;

pub mod locks;
pub mod pipeline;

/// An original message as received from the gateway, before any relay
/// decision has been made.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub content: String,
    pub attachment_urls: Vec<String>,
    pub sticker_urls: Vec<String>,
    pub sticker_names: Vec<String>,
    pub embed_count: usize,
    pub reply_to_message_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MessageEdit {
    pub guild_id: i64,
    pub message_id: i64,
    pub content: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageDelete {
    pub guild_id: i64,
    pub message_id: i64,
}

/// Why an event produced no relay work. All of these are normal operation,
/// not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Unchanged,
    CommandOrLink,
    TranslationDisabled,
    SourceChannelUnbound,
    NoTargetChannels,
    NoMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Skipped(SkipReason),
    /// Emoji, sticker or attachment relays: delivered as-is, no durable
    /// mapping is kept.
    RelayedVerbatim { delivered: usize },
    FannedOut { delivered: usize, failed: usize },
    Edited { edited: usize, failed: usize },
    Deleted { deleted: usize },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("guild rate limited on the {0:?} window")]
    RateLimited(RateWindow),

    #[error("monthly budget exceeded: {month_to_date:.4} of {ceiling:.2} USD spent")]
    BudgetExceeded { month_to_date: f64, ceiling: f64 },

    #[error("no translation could be produced: {0}")]
    TranslationUnavailable(TranslateError),

    #[error("no target channel accepted the relay: {0}")]
    DeliveryFailed(ChatError),

    #[error("a mapping already exists for guild {guild_id} message {message_id}")]
    DuplicateMapping { guild_id: i64, message_id: i64 },

    #[error("guild {0} has no initialized configuration")]
    ConfigurationMissing(i64),

    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for RelayError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::DuplicateMapping {
                guild_id,
                original_message_id,
            } => RelayError::DuplicateMapping {
                guild_id,
                message_id: original_message_id,
            },
            other => RelayError::Database(other),
        }
    }
}
