pub use self::parser::{
    AuthConfig, Config, DatabaseConfig, GuildLimits, LimitsConfig, LoggingConfig, RelayConfig,
    TranslatorConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
