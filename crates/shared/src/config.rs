use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),
    #[error("invalid integer value for {name}: {value}")]
    ParseInt { name: String, value: String },
    #[error("invalid boolean value for {name}: {value}")]
    ParseBool { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub db_name: String,
    pub smtp_starttls: bool,
    pub smtp_timeout_seconds: u64,
    pub default_reservation_lock_seconds: i64,
    pub default_worker_batch_size: i64,
    pub dispatcher_tick_seconds: u64,
    pub day_boundary_tz: String,
    pub log_level: String,
    pub mongo_max_pool_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            mongo_uri: require_env("MONGO_URI")?,
            db_name: require_env("DB_NAME")?,
            smtp_starttls: parse_bool_env("SMTP_STARTTLS", true)?,
            smtp_timeout_seconds: parse_u64_env("SMTP_TIMEOUT_SECONDS", 10)?,
            default_reservation_lock_seconds: parse_i64_env(
                "DEFAULT_RESERVATION_LOCK_SECONDS",
                30,
            )?,
            default_worker_batch_size: parse_i64_env("DEFAULT_WORKER_BATCH_SIZE", 20)?,
            dispatcher_tick_seconds: parse_u64_env("DISPATCHER_TICK_SECONDS", 15)?,
            day_boundary_tz: env::var("DAY_BOUNDARY_TZ").unwrap_or_else(|_| "UTC".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            mongo_max_pool_size: parse_u32_env("MONGO_MAX_POOL_SIZE", 10)?,
        })
    }

    pub fn verbose(&self) -> bool {
        self.log_level.eq_ignore_ascii_case("debug")
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name.to_string()))
}

fn parse_u32_env(name: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::ParseInt {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_u64_env(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::ParseInt {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_i64_env(name: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::ParseInt {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value,
            }),
        },
        Err(_) => Ok(default),
    }
}
