use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::config::GuildLimits;
use crate::db::schema_sqlite::{
    guild_configs, language_channel_bindings, message_mappings, usage_records,
};

use super::{
    DatabaseError,
    models::{FeatureKind, GuildConfig, GuildFeatures, LanguageChannelBinding, MessageMapping, UsageRecord},
};

// Timestamps and dates are stored as ISO-8601 text in SQLite.
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

fn date_to_string(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn string_to_date(s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Query(format!("invalid date format: {}", e)))
}

fn parse_feature(s: &str) -> Result<FeatureKind, DatabaseError> {
    FeatureKind::parse(s)
        .ok_or_else(|| DatabaseError::Query(format!("unknown feature kind: {}", s)))
}

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
type PooledSqliteConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Writers wait out a held lock instead of failing with "database is locked"
/// when several blocking tasks hit the file at once.
#[derive(Debug)]
struct ConnectionTuning;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionTuning {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn build_pool(path: &str) -> Result<SqlitePool, DatabaseError> {
    Pool::builder()
        .max_size(8)
        .connection_customizer(Box::new(ConnectionTuning))
        .build(ConnectionManager::new(path))
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

fn get_conn(pool: &SqlitePool) -> Result<PooledSqliteConnection, DatabaseError> {
    pool.get()
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

// SQLite uses i32 for INTEGER primary keys; the API keeps i64.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = guild_configs)]
struct DbGuildConfig {
    id: i32,
    guild_id: i64,
    guild_name: String,
    features: String,
    settings: Option<String>,
    is_initialized: bool,
    created_at: String,
    updated_at: String,
}

impl DbGuildConfig {
    fn to_guild_config(&self) -> Result<GuildConfig, DatabaseError> {
        let features: GuildFeatures = serde_json::from_str(&self.features)
            .map_err(|e| DatabaseError::Query(format!("invalid features json: {}", e)))?;
        let limits: Option<GuildLimits> = match &self.settings {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| DatabaseError::Query(format!("invalid settings json: {}", e)))?,
            None => None,
        };
        Ok(GuildConfig {
            id: self.id as i64,
            guild_id: self.guild_id,
            guild_name: self.guild_name.clone(),
            features,
            limits,
            is_initialized: self.is_initialized,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = guild_configs)]
struct NewGuildConfig<'a> {
    guild_id: i64,
    guild_name: &'a str,
    features: String,
    settings: Option<String>,
    is_initialized: bool,
    created_at: String,
    updated_at: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = guild_configs)]
struct UpdateGuildConfig<'a> {
    guild_name: &'a str,
    features: String,
    settings: Option<String>,
    is_initialized: bool,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = language_channel_bindings)]
struct DbLanguageChannelBinding {
    id: i32,
    guild_id: i64,
    language_code: String,
    language_name: String,
    channel_id: i64,
    is_active: bool,
    created_at: String,
}

impl DbLanguageChannelBinding {
    fn to_binding(&self) -> Result<LanguageChannelBinding, DatabaseError> {
        Ok(LanguageChannelBinding {
            id: self.id as i64,
            guild_id: self.guild_id,
            language_code: self.language_code.clone(),
            language_name: self.language_name.clone(),
            channel_id: self.channel_id,
            is_active: self.is_active,
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = language_channel_bindings)]
struct NewLanguageChannelBinding<'a> {
    guild_id: i64,
    language_code: &'a str,
    language_name: &'a str,
    channel_id: i64,
    is_active: bool,
    created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = message_mappings)]
struct DbMessageMapping {
    id: i32,
    guild_id: i64,
    original_message_id: i64,
    original_channel_id: i64,
    translated_messages: String,
    original_content: Option<String>,
    created_at: String,
}

impl DbMessageMapping {
    fn to_message_mapping(&self) -> Result<MessageMapping, DatabaseError> {
        let translated_messages: HashMap<String, i64> =
            serde_json::from_str(&self.translated_messages).map_err(|e| {
                DatabaseError::Query(format!("invalid translated_messages json: {}", e))
            })?;
        Ok(MessageMapping {
            id: self.id as i64,
            guild_id: self.guild_id,
            original_message_id: self.original_message_id,
            original_channel_id: self.original_channel_id,
            translated_messages,
            original_content: self.original_content.clone(),
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = message_mappings)]
struct NewMessageMapping<'a> {
    guild_id: i64,
    original_message_id: i64,
    original_channel_id: i64,
    translated_messages: String,
    original_content: Option<&'a str>,
    created_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = usage_records)]
struct DbUsageRecord {
    id: i32,
    guild_id: i64,
    feature: String,
    usage_count: i64,
    cost_usd: f64,
    date: String,
    created_at: String,
}

impl DbUsageRecord {
    fn to_usage_record(&self) -> Result<UsageRecord, DatabaseError> {
        Ok(UsageRecord {
            id: self.id as i64,
            guild_id: self.guild_id,
            feature: parse_feature(&self.feature)?,
            usage_count: self.usage_count,
            cost_usd: self.cost_usd,
            date: string_to_date(&self.date)?,
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = usage_records)]
struct NewUsageRecord<'a> {
    guild_id: i64,
    feature: &'a str,
    usage_count: i64,
    cost_usd: f64,
    date: String,
    created_at: String,
}

pub struct SqliteGuildStore {
    pool: SqlitePool,
}

impl SqliteGuildStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::GuildStore for SqliteGuildStore {
    async fn get_guild_config(
        &self,
        guild_id_param: i64,
    ) -> Result<Option<GuildConfig>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::guild_configs::dsl::*;
            guild_configs
                .filter(guild_id.eq(guild_id_param))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_guild_config())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_guild_config(&self, config: &GuildConfig) -> Result<(), DatabaseError> {
        let config = config.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::guild_configs::dsl::*;

            let features_json = serde_json::to_string(&config.features)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let settings_json = config
                .limits
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let existing = guild_configs
                .filter(guild_id.eq(config.guild_id))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if let Some(existing) = existing {
                let changes = UpdateGuildConfig {
                    guild_name: &config.guild_name,
                    features: features_json,
                    settings: settings_json,
                    is_initialized: config.is_initialized,
                    updated_at: datetime_to_string(&config.updated_at),
                };
                diesel::update(guild_configs.filter(id.eq(existing.id)))
                    .set(changes)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                let new_config = NewGuildConfig {
                    guild_id: config.guild_id,
                    guild_name: &config.guild_name,
                    features: features_json,
                    settings: settings_json,
                    is_initialized: config.is_initialized,
                    created_at: datetime_to_string(&config.created_at),
                    updated_at: datetime_to_string(&config.updated_at),
                };
                diesel::insert_into(guild_configs)
                    .values(new_config)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_bindings(
        &self,
        guild_id_param: i64,
    ) -> Result<Vec<LanguageChannelBinding>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::language_channel_bindings::dsl::*;
            let results = language_channel_bindings
                .filter(guild_id.eq(guild_id_param))
                .filter(is_active.eq(true))
                .order(language_code.asc())
                .select(DbLanguageChannelBinding::as_select())
                .load::<DbLanguageChannelBinding>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            results.into_iter().map(|b| b.to_binding()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn create_binding(
        &self,
        binding: &LanguageChannelBinding,
    ) -> Result<(), DatabaseError> {
        let binding = binding.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            let new_binding = NewLanguageChannelBinding {
                guild_id: binding.guild_id,
                language_code: &binding.language_code,
                language_name: &binding.language_name,
                channel_id: binding.channel_id,
                is_active: binding.is_active,
                created_at: datetime_to_string(&binding.created_at),
            };
            diesel::insert_into(language_channel_bindings::table)
                .values(new_binding)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_binding(&self, binding_id: i64) -> Result<(), DatabaseError> {
        let binding_id = binding_id as i32;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::language_channel_bindings::dsl::*;
            diesel::delete(language_channel_bindings.filter(id.eq(binding_id)))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteMappingStore {
    pool: SqlitePool,
}

impl SqliteMappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::MappingStore for SqliteMappingStore {
    async fn create(&self, mapping: &MessageMapping) -> Result<(), DatabaseError> {
        let mapping = mapping.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;

            let existing = message_mappings
                .filter(guild_id.eq(mapping.guild_id))
                .filter(original_message_id.eq(mapping.original_message_id))
                .count()
                .get_result::<i64>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if existing > 0 {
                return Err(DatabaseError::DuplicateMapping {
                    guild_id: mapping.guild_id,
                    original_message_id: mapping.original_message_id,
                });
            }

            let translated_json = serde_json::to_string(&mapping.translated_messages)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            let new_mapping = NewMessageMapping {
                guild_id: mapping.guild_id,
                original_message_id: mapping.original_message_id,
                original_channel_id: mapping.original_channel_id,
                translated_messages: translated_json,
                original_content: mapping.original_content.as_deref(),
                created_at: datetime_to_string(&mapping.created_at),
            };
            diesel::insert_into(message_mappings)
                .values(new_mapping)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get(
        &self,
        guild_id_param: i64,
        original_message_id_param: i64,
    ) -> Result<Option<MessageMapping>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            message_mappings
                .filter(guild_id.eq(guild_id_param))
                .filter(original_message_id.eq(original_message_id_param))
                .select(DbMessageMapping::as_select())
                .first::<DbMessageMapping>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|m| m.to_message_mapping())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn update_content(
        &self,
        guild_id_param: i64,
        original_message_id_param: i64,
        translated_messages_param: &HashMap<String, i64>,
        original_content_param: &str,
    ) -> Result<(), DatabaseError> {
        let translated_json = serde_json::to_string(translated_messages_param)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        let original_content_param = original_content_param.to_string();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            diesel::update(
                message_mappings
                    .filter(guild_id.eq(guild_id_param))
                    .filter(original_message_id.eq(original_message_id_param)),
            )
            .set((
                translated_messages.eq(translated_json),
                original_content.eq(Some(original_content_param)),
            ))
            .execute(&mut conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete(
        &self,
        guild_id_param: i64,
        original_message_id_param: i64,
    ) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            diesel::delete(
                message_mappings
                    .filter(guild_id.eq(guild_id_param))
                    .filter(original_message_id.eq(original_message_id_param)),
            )
            .execute(&mut conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn count(&self) -> Result<i64, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            message_mappings
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn prune_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let cutoff = datetime_to_string(&cutoff);
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::message_mappings::dsl::*;
            // RFC 3339 text compares chronologically for UTC timestamps.
            diesel::delete(message_mappings.filter(created_at.lt(cutoff)))
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteUsageStore {
    pool: SqlitePool,
}

impl SqliteUsageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::UsageStore for SqliteUsageStore {
    async fn record_usage(
        &self,
        guild_id_param: i64,
        feature_param: FeatureKind,
        date_param: NaiveDate,
        cost_usd_param: f64,
    ) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::usage_records::dsl::*;

            let new_record = NewUsageRecord {
                guild_id: guild_id_param,
                feature: feature_param.as_str(),
                usage_count: 1,
                cost_usd: cost_usd_param,
                date: date_to_string(&date_param),
                created_at: datetime_to_string(&Utc::now()),
            };

            // One statement so concurrent charges never lose an increment.
            diesel::insert_into(usage_records)
                .values(new_record)
                .on_conflict((guild_id, feature, date))
                .do_update()
                .set((
                    usage_count.eq(usage_count + 1),
                    cost_usd.eq(cost_usd + cost_usd_param),
                ))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_usage(
        &self,
        guild_id_param: i64,
        feature_param: FeatureKind,
        date_param: NaiveDate,
    ) -> Result<Option<UsageRecord>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::usage_records::dsl::*;
            usage_records
                .filter(guild_id.eq(guild_id_param))
                .filter(feature.eq(feature_param.as_str()))
                .filter(date.eq(date_to_string(&date_param)))
                .select(DbUsageRecord::as_select())
                .first::<DbUsageRecord>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|r| r.to_usage_record())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn cost_between(
        &self,
        guild_id_param: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<f64, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_conn(&pool)?;
            use crate::db::schema_sqlite::usage_records::dsl::*;
            // ISO-8601 date text compares chronologically.
            let rows = usage_records
                .filter(guild_id.eq(guild_id_param))
                .filter(date.ge(date_to_string(&from)))
                .filter(date.le(date_to_string(&to)))
                .select(DbUsageRecord::as_select())
                .load::<DbUsageRecord>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.iter().map(|r| r.cost_usd).sum())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
