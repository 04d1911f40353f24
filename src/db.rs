pub use self::error::DatabaseError;
#[cfg(feature = "sqlite")]
pub use self::manager::DatabaseManager;
pub use self::models::{
    FeatureKind, GuildConfig, GuildFeatures, LanguageChannelBinding, MessageMapping, UsageRecord,
};
pub use self::stores::{GuildStore, MappingStore, UsageStore};

pub mod error;
#[cfg(feature = "sqlite")]
pub mod manager;
pub mod models;
pub mod stores;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;

#[cfg(feature = "sqlite")]
pub mod sqlite;
