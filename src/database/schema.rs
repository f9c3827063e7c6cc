//! Column declarations of the market data schema.
//!
//! The SQL in `migrations/` is authoritative for PostgreSQL; these
//! descriptors mirror it so every repository implementation rounds and
//! rejects values the same way the database does.

use bigdecimal::{BigDecimal, RoundingMode};

use crate::error::AppError;

pub const TOKENS: &str = "tokens";
pub const FUTURES_PAIRS: &str = "futures_pairs";
pub const FUTURES_DATA: &str = "futures_data";
pub const SPOT_DATA: &str = "spot_data";
pub const API_ERRORS: &str = "api_errors";
pub const CMC_CACHE: &str = "cmc_cache";

pub const UQ_TOKENS_SYMBOL: &str = "uq_tokens_symbol";
pub const UQ_FUTURES_PAIRS_EXCHANGE_PAIR: &str = "uq_futures_pairs_exchange_pair";
pub const UQ_CMC_CACHE_SYMBOL: &str = "uq_cmc_cache_symbol";
pub const FK_FUTURES_PAIRS_TOKEN: &str = "fk_futures_pairs_token";
pub const FK_FUTURES_DATA_PAIR: &str = "fk_futures_data_pair";
pub const FK_SPOT_DATA_PAIR: &str = "fk_spot_data_pair";

/// Longest `api_errors.error_message` the collector keeps.
pub const API_ERROR_MESSAGE_MAX_CHARS: usize = 1000;

/// A `NUMERIC(precision, scale)` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalColumn {
    pub table: &'static str,
    pub name: &'static str,
    pub precision: u32,
    pub scale: u32,
}

impl DecimalColumn {
    pub const fn new(table: &'static str, name: &'static str, precision: u32, scale: u32) -> Self {
        Self { table, name, precision, scale }
    }

    /// Number of digits allowed left of the decimal point.
    pub fn integer_digits(&self) -> u32 {
        self.precision - self.scale
    }

    /// Rounds to the column scale (half away from zero) and rejects values
    /// whose integer part does not fit.
    pub fn fit(&self, value: &BigDecimal) -> Result<BigDecimal, AppError> {
        let rounded = value.with_scale_round(self.scale as i64, RoundingMode::HalfUp);
        let limit = (0..self.integer_digits()).fold(BigDecimal::from(1), |acc, _| acc * BigDecimal::from(10));

        if rounded.abs() >= limit {
            return Err(AppError::ValidationError(format!(
                "{}.{} value {} exceeds NUMERIC({}, {})",
                self.table, self.name, value, self.precision, self.scale
            )));
        }

        Ok(rounded)
    }

    pub fn fit_opt(&self, value: Option<&BigDecimal>) -> Result<Option<BigDecimal>, AppError> {
        value.map(|v| self.fit(v)).transpose()
    }
}

/// A `VARCHAR(n)` column; `n` counts characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextColumn {
    pub table: &'static str,
    pub name: &'static str,
    pub max_chars: usize,
}

impl TextColumn {
    pub const fn new(table: &'static str, name: &'static str, max_chars: usize) -> Self {
        Self { table, name, max_chars }
    }

    pub fn check(&self, value: &str) -> Result<(), AppError> {
        let length = value.chars().count();
        if length > self.max_chars {
            return Err(AppError::ValidationError(format!(
                "{}.{} is {} characters long, limit is {}",
                self.table, self.name, length, self.max_chars
            )));
        }
        Ok(())
    }
}

pub mod tokens {
    use super::*;

    pub const SYMBOL: TextColumn = TextColumn::new(TOKENS, "symbol", 50);
}

pub mod futures_pairs {
    use super::*;

    pub const EXCHANGE: TextColumn = TextColumn::new(FUTURES_PAIRS, "exchange", 50);
    pub const PAIR_SYMBOL: TextColumn = TextColumn::new(FUTURES_PAIRS, "pair_symbol", 50);
    pub const CONTRACT_TYPE: TextColumn = TextColumn::new(FUTURES_PAIRS, "contract_type", 20);
}

pub mod futures_data {
    use super::*;

    pub const OPEN_INTEREST_CONTRACTS: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "open_interest_contracts", 30, 8);
    pub const OPEN_INTEREST_USD: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "open_interest_usd", 30, 2);
    pub const FUNDING_RATE: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "funding_rate", 10, 8);
    pub const VOLUME_BTC: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "volume_btc", 30, 8);
    pub const VOLUME_USD: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "volume_usd", 30, 2);
    pub const PRICE_USD: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "price_usd", 30, 10);
    pub const MARKET_CAP_USD: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "market_cap_usd", 30, 2);
    pub const BTC_PRICE: DecimalColumn = DecimalColumn::new(FUTURES_DATA, "btc_price", 20, 2);
}

pub mod spot_data {
    use super::*;

    pub const VOLUME_BTC: DecimalColumn = DecimalColumn::new(SPOT_DATA, "volume_btc", 30, 8);
}

pub mod api_errors {
    use super::*;

    pub const EXCHANGE: TextColumn = TextColumn::new(API_ERRORS, "exchange", 50);
    pub const ENDPOINT: TextColumn = TextColumn::new(API_ERRORS, "endpoint", 255);
    pub const ERROR_CODE: TextColumn = TextColumn::new(API_ERRORS, "error_code", 50);
}

pub mod cmc_cache {
    use super::*;

    pub const SYMBOL: TextColumn = TextColumn::new(CMC_CACHE, "symbol", 50);
    pub const PRICE_USD: DecimalColumn = DecimalColumn::new(CMC_CACHE, "price_usd", 30, 10);
    pub const VOLUME_24H_USD: DecimalColumn = DecimalColumn::new(CMC_CACHE, "volume_24h_usd", 30, 2);
    pub const MARKET_CAP_USD: DecimalColumn = DecimalColumn::new(CMC_CACHE, "market_cap_usd", 30, 2);
}
