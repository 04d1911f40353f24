use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GuildLimits;

/// Feature toggles a guild can enable through setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Translation,
    Tts,
    Music,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Translation => "translation",
            FeatureKind::Tts => "tts",
            FeatureKind::Music => "music",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "translation" => Some(FeatureKind::Translation),
            "tts" => Some(FeatureKind::Tts),
            "music" => Some(FeatureKind::Music),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildFeatures {
    #[serde(default)]
    pub translation: bool,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub music: bool,
}

impl GuildFeatures {
    pub fn is_enabled(&self, feature: FeatureKind) -> bool {
        match feature {
            FeatureKind::Translation => self.translation,
            FeatureKind::Tts => self.tts,
            FeatureKind::Music => self.music,
        }
    }
}

/// One row per guild. Owned by configuration storage; the relay core only
/// reads it.
#[derive(Debug, Clone)]
pub struct GuildConfig {
    pub id: i64,
    pub guild_id: i64,
    pub guild_name: String,
    pub features: GuildFeatures,
    pub limits: Option<GuildLimits>,
    pub is_initialized: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// (guild, language code, channel id). Unique per guild on language code and
/// on channel id, so a channel carries at most one language.
#[derive(Debug, Clone)]
pub struct LanguageChannelBinding {
    pub id: i64,
    pub guild_id: i64,
    pub language_code: String,
    pub language_name: String,
    pub channel_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// The durable record linking one original message to its translated
/// counterparts, keyed by (guild, original message id). Only the languages
/// present at creation time are ever tracked.
#[derive(Debug, Clone)]
pub struct MessageMapping {
    pub id: i64,
    pub guild_id: i64,
    pub original_message_id: i64,
    pub original_channel_id: i64,
    /// language code -> translated message id
    pub translated_messages: HashMap<String, i64>,
    pub original_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-(guild, feature, day) usage ledger row, unique per day.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub id: i64,
    pub guild_id: i64,
    pub feature: FeatureKind,
    pub usage_count: i64,
    pub cost_usd: f64,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}
