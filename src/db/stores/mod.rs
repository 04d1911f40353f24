use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::DatabaseError;
use super::models::{
    FeatureKind, GuildConfig, LanguageChannelBinding, MessageMapping, UsageRecord,
};

#[async_trait]
pub trait GuildStore: Send + Sync {
    async fn get_guild_config(&self, guild_id: i64)
        -> Result<Option<GuildConfig>, DatabaseError>;
    async fn upsert_guild_config(&self, config: &GuildConfig) -> Result<(), DatabaseError>;
    async fn get_bindings(
        &self,
        guild_id: i64,
    ) -> Result<Vec<LanguageChannelBinding>, DatabaseError>;
    async fn create_binding(&self, binding: &LanguageChannelBinding)
        -> Result<(), DatabaseError>;
    async fn delete_binding(&self, id: i64) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Fails with [`DatabaseError::DuplicateMapping`] when a mapping already
    /// exists for (guild, original message id).
    async fn create(&self, mapping: &MessageMapping) -> Result<(), DatabaseError>;
    async fn get(
        &self,
        guild_id: i64,
        original_message_id: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError>;
    async fn update_content(
        &self,
        guild_id: i64,
        original_message_id: i64,
        translated_messages: &HashMap<String, i64>,
        original_content: &str,
    ) -> Result<(), DatabaseError>;
    async fn delete(&self, guild_id: i64, original_message_id: i64)
        -> Result<(), DatabaseError>;
    async fn count(&self) -> Result<i64, DatabaseError>;
    /// Age-based eviction; returns the number of mappings removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Adds one use and `cost_usd` to the (guild, feature, date) row,
    /// creating it on first use that day.
    async fn record_usage(
        &self,
        guild_id: i64,
        feature: FeatureKind,
        date: NaiveDate,
        cost_usd: f64,
    ) -> Result<(), DatabaseError>;
    async fn get_usage(
        &self,
        guild_id: i64,
        feature: FeatureKind,
        date: NaiveDate,
    ) -> Result<Option<UsageRecord>, DatabaseError>;
    /// Sum of accumulated cost across all features for the guild within
    /// [from, to] inclusive. Computed from persisted rows, never cached.
    async fn cost_between(
        &self,
        guild_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<f64, DatabaseError>;
}
