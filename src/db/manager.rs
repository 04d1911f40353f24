use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::db::{DatabaseError, GuildStore, MappingStore, UsageStore};

use crate::db::sqlite::{
    build_pool, SqliteGuildStore, SqliteMappingStore, SqlitePool, SqliteUsageStore,
};
use diesel::RunQueryDsl;

#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
    guild_store: Arc<dyn GuildStore>,
    mapping_store: Arc<dyn MappingStore>,
    usage_store: Arc<dyn UsageStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.sqlite_path().ok_or_else(|| {
            DatabaseError::Connection("no sqlite database path configured".to_string())
        })?;
        let pool = build_pool(&path)?;

        let guild_store = Arc::new(SqliteGuildStore::new(pool.clone()));
        let mapping_store = Arc::new(SqliteMappingStore::new(pool.clone()));
        let usage_store = Arc::new(SqliteUsageStore::new(pool.clone()));

        Ok(Self {
            pool,
            guild_store,
            mapping_store,
            usage_store,
        })
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS guild_configs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id BIGINT NOT NULL UNIQUE,
                    guild_name TEXT NOT NULL,
                    features TEXT NOT NULL,
                    settings TEXT,
                    is_initialized BOOLEAN NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS language_channel_bindings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id BIGINT NOT NULL,
                    language_code TEXT NOT NULL,
                    language_name TEXT NOT NULL,
                    channel_id BIGINT NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (guild_id, language_code),
                    UNIQUE (guild_id, channel_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS message_mappings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id BIGINT NOT NULL,
                    original_message_id BIGINT NOT NULL,
                    original_channel_id BIGINT NOT NULL,
                    translated_messages TEXT NOT NULL,
                    original_content TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (guild_id, original_message_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS usage_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id BIGINT NOT NULL,
                    feature TEXT NOT NULL,
                    usage_count BIGINT NOT NULL DEFAULT 0,
                    cost_usd DOUBLE NOT NULL DEFAULT 0,
                    date TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (guild_id, feature, date)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_guild_configs_guild_id ON guild_configs(guild_id)",
                "CREATE INDEX IF NOT EXISTS idx_bindings_guild_id ON language_channel_bindings(guild_id)",
                "CREATE INDEX IF NOT EXISTS idx_message_mappings_lookup ON message_mappings(guild_id, original_message_id)",
                "CREATE INDEX IF NOT EXISTS idx_message_mappings_created_at ON message_mappings(created_at)",
                "CREATE INDEX IF NOT EXISTS idx_usage_records_lookup ON usage_records(guild_id, date)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn guild_store(&self) -> Arc<dyn GuildStore> {
        self.guild_store.clone()
    }

    pub fn mapping_store(&self) -> Arc<dyn MappingStore> {
        self.mapping_store.clone()
    }

    pub fn usage_store(&self) -> Arc<dyn UsageStore> {
        self.usage_store.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{Duration, NaiveDate, Utc};
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::{DatabaseError, FeatureKind, MessageMapping};

    async fn open_manager(db_path: String) -> DatabaseManager {
        let config = DatabaseConfig {
            url: None,
            filename: Some(db_path),
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        manager
    }

    fn sample_mapping(original_message_id: i64) -> MessageMapping {
        let mut translated = HashMap::new();
        translated.insert("ko".to_string(), 9001_i64);
        translated.insert("ja".to_string(), 9002_i64);
        MessageMapping {
            id: 0,
            guild_id: 42,
            original_message_id,
            original_channel_id: 777,
            translated_messages: translated,
            original_content: Some("hello world".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sqlite_message_mapping_roundtrip() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();
        let manager = open_manager(db_path.clone()).await;

        let mapping = sample_mapping(1001);
        manager
            .mapping_store()
            .create(&mapping)
            .await
            .expect("insert mapping");

        let fetched = manager
            .mapping_store()
            .get(42, 1001)
            .await
            .expect("query mapping")
            .expect("mapping exists");
        assert_eq!(fetched.translated_messages.get("ko"), Some(&9001));
        assert_eq!(fetched.original_content.as_deref(), Some("hello world"));

        let mut translated = fetched.translated_messages.clone();
        translated.insert("ko".to_string(), 9099);
        manager
            .mapping_store()
            .update_content(42, 1001, &translated, "hello edited")
            .await
            .expect("update mapping");

        // Persists across a reopen.
        let manager_reopened = open_manager(db_path).await;
        let persisted = manager_reopened
            .mapping_store()
            .get(42, 1001)
            .await
            .expect("query after reopen")
            .expect("mapping exists after reopen");
        assert_eq!(persisted.translated_messages.get("ko"), Some(&9099));
        assert_eq!(persisted.original_content.as_deref(), Some("hello edited"));

        manager_reopened
            .mapping_store()
            .delete(42, 1001)
            .await
            .expect("delete mapping");
        let after_delete = manager_reopened
            .mapping_store()
            .get(42, 1001)
            .await
            .expect("query mapping after delete");
        assert!(after_delete.is_none());
    }

    #[tokio::test]
    async fn duplicate_mapping_is_rejected() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let manager = open_manager(file.path().to_string_lossy().to_string()).await;

        let mapping = sample_mapping(2002);
        manager
            .mapping_store()
            .create(&mapping)
            .await
            .expect("first insert");

        let err = manager
            .mapping_store()
            .create(&mapping)
            .await
            .expect_err("second insert must fail");
        assert!(matches!(
            err,
            DatabaseError::DuplicateMapping {
                guild_id: 42,
                original_message_id: 2002,
            }
        ));
    }

    #[tokio::test]
    async fn prune_removes_only_old_mappings() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let manager = open_manager(file.path().to_string_lossy().to_string()).await;

        let mut old = sample_mapping(3001);
        old.created_at = Utc::now() - Duration::days(60);
        let fresh = sample_mapping(3002);

        manager.mapping_store().create(&old).await.expect("insert old");
        manager
            .mapping_store()
            .create(&fresh)
            .await
            .expect("insert fresh");

        let removed = manager
            .mapping_store()
            .prune_older_than(Utc::now() - Duration::days(30))
            .await
            .expect("prune");
        assert_eq!(removed, 1);

        assert!(manager
            .mapping_store()
            .get(42, 3001)
            .await
            .expect("query old")
            .is_none());
        assert!(manager
            .mapping_store()
            .get(42, 3002)
            .await
            .expect("query fresh")
            .is_some());
    }

    #[tokio::test]
    async fn usage_records_accumulate_per_day() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let manager = open_manager(file.path().to_string_lossy().to_string()).await;

        let day = NaiveDate::from_ymd_opt(2025, 6, 15).expect("date");
        for _ in 0..3 {
            manager
                .usage_store()
                .record_usage(42, FeatureKind::Translation, day, 0.001)
                .await
                .expect("record usage");
        }

        let record = manager
            .usage_store()
            .get_usage(42, FeatureKind::Translation, day)
            .await
            .expect("query usage")
            .expect("usage row exists");
        assert_eq!(record.usage_count, 3);
        assert!((record.cost_usd - 0.003).abs() < 1e-9);

        let month_start = NaiveDate::from_ymd_opt(2025, 6, 1).expect("date");
        let month_end = NaiveDate::from_ymd_opt(2025, 6, 30).expect("date");
        let total = manager
            .usage_store()
            .cost_between(42, month_start, month_end)
            .await
            .expect("cost between");
        assert!((total - 0.003).abs() < 1e-9);

        // Other guilds do not contribute.
        let other = manager
            .usage_store()
            .cost_between(43, month_start, month_end)
            .await
            .expect("cost between other guild");
        assert_eq!(other, 0.0);
    }

    #[tokio::test]
    async fn concurrent_usage_charges_all_land() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let manager = open_manager(file.path().to_string_lossy().to_string()).await;

        let day = NaiveDate::from_ymd_opt(2025, 6, 15).expect("date");
        let mut handles = Vec::new();
        for _ in 0..40 {
            let usage = manager.usage_store();
            handles.push(tokio::spawn(async move {
                usage.record_usage(42, FeatureKind::Translation, day, 0.001).await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("record usage");
        }

        let record = manager
            .usage_store()
            .get_usage(42, FeatureKind::Translation, day)
            .await
            .expect("query usage")
            .expect("usage row exists");
        assert_eq!(record.usage_count, 40);
        assert!((record.cost_usd - 0.04).abs() < 1e-9);
    }
}
