use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub binance: ExchangeSettings,
    pub bybit: ExchangeSettings,
    pub coinmarketcap: CoinMarketCapSettings,
    pub http: HttpSettings,
    pub logging: LoggingSettings,
    pub collector: CollectorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub base_url: String,
    /// Separate host for spot endpoints; `None` when spot shares `base_url`.
    pub spot_base_url: Option<String>,
    pub max_concurrent_requests: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinMarketCapSettings {
    pub api_key: String,
    pub base_url: String,
    pub max_concurrent_requests: usize,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub ssl_verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" | "" => Ok(LogFormat::Compact),
            other => Err(AppError::ConfigError(format!("Unknown LOG_FORMAT '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Seconds between cycles; 0 runs a single cycle.
    pub interval_seconds: u64,
}

/// Flat view of the environment, one field per variable.
#[derive(Debug, Deserialize)]
struct RawSettings {
    database_url: String,
    database_max_connections: u32,
    database_min_connections: u32,
    run_migrations: bool,
    binance_base_url: String,
    binance_spot_base_url: String,
    binance_max_concurrent_requests: usize,
    binance_batch_size: usize,
    binance_batch_delay_ms: u64,
    bybit_base_url: String,
    bybit_max_concurrent_requests: usize,
    bybit_batch_size: usize,
    bybit_batch_delay_ms: u64,
    coinmarketcap_api_key: String,
    coinmarketcap_base_url: String,
    coinmarketcap_max_concurrent_requests: usize,
    cmc_cache_ttl_seconds: u64,
    http_timeout_seconds: u64,
    http_max_retries: usize,
    http_retry_base_delay_ms: u64,
    ssl_verify: bool,
    log_level: String,
    log_format: String,
    log_file: String,
    collect_interval_seconds: u64,
}

impl Settings {
    /// Loads settings from the process environment over built-in defaults.
    pub fn new() -> Result<Self, AppError> {
        Self::from_builder(Config::builder().add_source(Environment::default().try_parsing(true)))
    }

    /// Applies the built-in defaults beneath whatever sources `builder` has.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, AppError> {
        let raw: RawSettings = with_defaults(builder)?.build()?.try_deserialize()?;
        raw.try_into()
    }

    /// Checks the values a collection run cannot do without.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.url.trim().is_empty() {
            return Err(AppError::ConfigError("DATABASE_URL must be set".to_string()));
        }
        if self.coinmarketcap.api_key.trim().is_empty() {
            return Err(AppError::ConfigError("COINMARKETCAP_API_KEY must be set".to_string()));
        }
        if self.binance.batch_size == 0 || self.bybit.batch_size == 0 {
            return Err(AppError::ConfigError("Batch sizes must be greater than zero".to_string()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(
                "DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ExchangeSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl CoinMarketCapSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn with_defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, AppError> {
    Ok(builder
        .set_default("database_url", "")?
        .set_default("database_max_connections", 10_i64)?
        .set_default("database_min_connections", 1_i64)?
        .set_default("run_migrations", true)?
        .set_default("binance_base_url", "https://fapi.binance.com")?
        .set_default("binance_spot_base_url", "https://api.binance.com")?
        .set_default("binance_max_concurrent_requests", 20_i64)?
        .set_default("binance_batch_size", 50_i64)?
        .set_default("binance_batch_delay_ms", 1000_i64)?
        .set_default("bybit_base_url", "https://api.bybit.com")?
        .set_default("bybit_max_concurrent_requests", 10_i64)?
        .set_default("bybit_batch_size", 30_i64)?
        .set_default("bybit_batch_delay_ms", 2000_i64)?
        .set_default("coinmarketcap_api_key", "")?
        .set_default("coinmarketcap_base_url", "https://pro-api.coinmarketcap.com")?
        .set_default("coinmarketcap_max_concurrent_requests", 5_i64)?
        .set_default("cmc_cache_ttl_seconds", 600_i64)?
        .set_default("http_timeout_seconds", 30_i64)?
        .set_default("http_max_retries", 3_i64)?
        .set_default("http_retry_base_delay_ms", 1000_i64)?
        .set_default("ssl_verify", true)?
        .set_default("log_level", "info")?
        .set_default("log_format", "compact")?
        .set_default("log_file", "script.log")?
        .set_default("collect_interval_seconds", 0_i64)?)
}

impl TryFrom<RawSettings> for Settings {
    type Error = AppError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        Ok(Settings {
            database: DatabaseSettings {
                url: raw.database_url,
                max_connections: raw.database_max_connections,
                min_connections: raw.database_min_connections,
                run_migrations: raw.run_migrations,
            },
            binance: ExchangeSettings {
                base_url: raw.binance_base_url,
                spot_base_url: non_empty(raw.binance_spot_base_url),
                max_concurrent_requests: raw.binance_max_concurrent_requests.max(1),
                batch_size: raw.binance_batch_size,
                batch_delay_ms: raw.binance_batch_delay_ms,
            },
            bybit: ExchangeSettings {
                base_url: raw.bybit_base_url,
                spot_base_url: None,
                max_concurrent_requests: raw.bybit_max_concurrent_requests.max(1),
                batch_size: raw.bybit_batch_size,
                batch_delay_ms: raw.bybit_batch_delay_ms,
            },
            coinmarketcap: CoinMarketCapSettings {
                api_key: raw.coinmarketcap_api_key,
                base_url: raw.coinmarketcap_base_url,
                max_concurrent_requests: raw.coinmarketcap_max_concurrent_requests.max(1),
                cache_ttl_seconds: raw.cmc_cache_ttl_seconds,
            },
            http: HttpSettings {
                timeout_seconds: raw.http_timeout_seconds,
                max_retries: raw.http_max_retries,
                retry_base_delay_ms: raw.http_retry_base_delay_ms,
                ssl_verify: raw.ssl_verify,
            },
            logging: LoggingSettings {
                level: raw.log_level,
                format: LogFormat::parse(&raw.log_format)?,
                file: non_empty(raw.log_file),
            },
            collector: CollectorSettings {
                interval_seconds: raw.collect_interval_seconds,
            },
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
