use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    ApiErrorRecord, CmcCacheEntry, CmcQuote, CreateApiError, CreateFuturesData, CreateFuturesPair,
    CreateSpotData, FuturesData, FuturesPair, FuturesPairWithToken, SpotData, Token,
};

/// Storage operations over the market data schema.
///
/// Implementations enforce the same rules the PostgreSQL schema declares:
/// unique symbols and (exchange, pair_symbol), foreign keys that cascade on
/// delete, and fixed-point columns with declared precision and scale.
#[async_trait]
pub trait MarketRepository: Send + Sync {
    // Tokens

    /// Inserts a new token; fails with a unique violation if the symbol exists.
    async fn insert_token(&self, symbol: &str) -> Result<Token, AppError>;

    /// Returns the id of the token with this symbol, creating it if needed.
    async fn get_or_create_token(&self, symbol: &str) -> Result<i32, AppError>;

    async fn find_token(&self, symbol: &str) -> Result<Option<Token>, AppError>;

    async fn list_tokens(&self) -> Result<Vec<Token>, AppError>;

    /// Deletes a token together with its pairs and their observations.
    async fn delete_token(&self, token_id: i32) -> Result<bool, AppError>;

    // Pairs

    /// Inserts a new pair; fails on a missing token or a duplicate
    /// (exchange, pair_symbol).
    async fn insert_futures_pair(&self, pair: &CreateFuturesPair) -> Result<FuturesPair, AppError>;

    /// Returns the id of the (exchange, pair_symbol) listing, creating it if
    /// needed. An existing listing keeps its original token and contract type.
    async fn get_or_create_futures_pair(&self, pair: &CreateFuturesPair) -> Result<i32, AppError>;

    async fn find_futures_pair(&self, exchange: &str, pair_symbol: &str) -> Result<Option<FuturesPair>, AppError>;

    async fn list_futures_pairs(&self) -> Result<Vec<FuturesPairWithToken>, AppError>;

    async fn delete_futures_pair(&self, pair_id: i32) -> Result<bool, AppError>;

    // Observations

    async fn insert_futures_data(&self, data: &CreateFuturesData) -> Result<i64, AppError>;

    /// Observations with `from <= timestamp <= to`, oldest first.
    async fn futures_data_for_pair(
        &self,
        pair_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FuturesData>, AppError>;

    async fn latest_futures_data(&self, pair_id: i32) -> Result<Option<FuturesData>, AppError>;

    async fn insert_spot_data(&self, data: &CreateSpotData) -> Result<i64, AppError>;

    async fn spot_data_for_pair(
        &self,
        pair_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SpotData>, AppError>;

    // Audit log

    async fn record_api_error(&self, error: &CreateApiError) -> Result<i32, AppError>;

    /// Errors logged for `exchange` at or after `since`, newest first.
    async fn api_errors_since(&self, exchange: &str, since: DateTime<Utc>) -> Result<Vec<ApiErrorRecord>, AppError>;

    // Quote cache

    /// Inserts or refreshes the single cache row for `quote.symbol`.
    async fn upsert_cmc_cache(&self, quote: &CmcQuote) -> Result<CmcCacheEntry, AppError>;

    async fn get_cmc_cache(&self, symbol: &str) -> Result<Option<CmcCacheEntry>, AppError>;

    /// Cache rows for `symbols` refreshed within `max_age`, keyed by symbol.
    async fn fresh_cmc_cache(
        &self,
        symbols: &[String],
        max_age: Duration,
    ) -> Result<HashMap<String, CmcCacheEntry>, AppError>;
}

/// Earliest `last_updated` still considered fresh. Ages reaching past the
/// representable range clamp to the Unix epoch, so every row is fresh.
pub(crate) fn freshness_cutoff(max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or_default()
}
