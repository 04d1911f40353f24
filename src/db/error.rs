use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("database query error: {0}")]
    Query(String),

    #[error("a mapping already exists for guild {guild_id} message {original_message_id}")]
    DuplicateMapping {
        guild_id: i64,
        original_message_id: i64,
    },
}
