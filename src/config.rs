pub use self::parser::{
    AuthConfig, Config, DatabaseConfig, DbType, LimitsConfig, LoggingConfig, ServerConfig,
    StaticIdentity,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
