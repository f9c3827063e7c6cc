use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::database::repository::{freshness_cutoff, MarketRepository};
use crate::error::AppError;
use crate::models::{
    prepare_token_symbol, ApiErrorRecord, CmcCacheEntry, CmcQuote, CreateApiError, CreateFuturesData,
    CreateFuturesPair, CreateSpotData, FuturesData, FuturesPair, FuturesPairWithToken, SpotData, Token,
};

const TOKEN_COLUMNS: &str = "id, symbol, created_at, updated_at";
const PAIR_COLUMNS: &str = "id, token_id, exchange, pair_symbol, contract_type, created_at";
const FUTURES_DATA_COLUMNS: &str = "id, pair_id, timestamp, open_interest_contracts, open_interest_usd, \
     funding_rate, volume_btc, volume_usd, price_usd, market_cap_usd, btc_price";
const SPOT_DATA_COLUMNS: &str = "id, pair_id, timestamp, volume_btc";
const API_ERROR_COLUMNS: &str = "id, exchange, endpoint, error_code, error_message, timestamp";
const CMC_CACHE_COLUMNS: &str = "id, symbol, price_usd, volume_24h_usd, market_cap_usd, last_updated";

/// `MarketRepository` backed by PostgreSQL.
#[derive(Clone)]
pub struct PgMarketRepository {
    db_pool: PgPool,
}

impl PgMarketRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl MarketRepository for PgMarketRepository {
    async fn insert_token(&self, symbol: &str) -> Result<Token, AppError> {
        let symbol = prepare_token_symbol(symbol)?;

        let token = sqlx::query_as::<_, Token>(&format!(
            "INSERT INTO tokens (symbol) VALUES ($1) RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(&symbol)
        .fetch_one(&self.db_pool)
        .await?;

        debug!("Inserted token {} with id {}", token.symbol, token.id);
        Ok(token)
    }

    async fn get_or_create_token(&self, symbol: &str) -> Result<i32, AppError> {
        let symbol = prepare_token_symbol(symbol)?;

        let inserted: Option<i32> = sqlx::query_scalar(
            "INSERT INTO tokens (symbol) VALUES ($1) ON CONFLICT (symbol) DO NOTHING RETURNING id",
        )
        .bind(&symbol)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(id) = inserted {
            debug!("Created token {} with id {}", symbol, id);
            return Ok(id);
        }

        let id: i32 = sqlx::query_scalar("SELECT id FROM tokens WHERE symbol = $1")
            .bind(&symbol)
            .fetch_one(&self.db_pool)
            .await?;
        Ok(id)
    }

    async fn find_token(&self, symbol: &str) -> Result<Option<Token>, AppError> {
        let symbol = prepare_token_symbol(symbol)?;

        let token = sqlx::query_as::<_, Token>(&format!("SELECT {} FROM tokens WHERE symbol = $1", TOKEN_COLUMNS))
            .bind(&symbol)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(token)
    }

    async fn list_tokens(&self) -> Result<Vec<Token>, AppError> {
        let tokens = sqlx::query_as::<_, Token>(&format!("SELECT {} FROM tokens ORDER BY symbol", TOKEN_COLUMNS))
            .fetch_all(&self.db_pool)
            .await?;
        Ok(tokens)
    }

    async fn delete_token(&self, token_id: i32) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(token_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_futures_pair(&self, pair: &CreateFuturesPair) -> Result<FuturesPair, AppError> {
        pair.validate()?;

        let row = sqlx::query_as::<_, FuturesPair>(&format!(
            "INSERT INTO futures_pairs (token_id, exchange, pair_symbol, contract_type) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            PAIR_COLUMNS
        ))
        .bind(pair.token_id)
        .bind(&pair.exchange)
        .bind(&pair.pair_symbol)
        .bind(pair.contract_type.as_str())
        .fetch_one(&self.db_pool)
        .await?;
        Ok(row)
    }

    async fn get_or_create_futures_pair(&self, pair: &CreateFuturesPair) -> Result<i32, AppError> {
        pair.validate()?;

        let inserted: Option<i32> = sqlx::query_scalar(
            "INSERT INTO futures_pairs (token_id, exchange, pair_symbol, contract_type) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (exchange, pair_symbol) DO NOTHING RETURNING id",
        )
        .bind(pair.token_id)
        .bind(&pair.exchange)
        .bind(&pair.pair_symbol)
        .bind(pair.contract_type.as_str())
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(id) = inserted {
            debug!("Created pair {} {} with id {}", pair.exchange, pair.pair_symbol, id);
            return Ok(id);
        }

        let id: i32 = sqlx::query_scalar("SELECT id FROM futures_pairs WHERE exchange = $1 AND pair_symbol = $2")
            .bind(&pair.exchange)
            .bind(&pair.pair_symbol)
            .fetch_one(&self.db_pool)
            .await?;
        Ok(id)
    }

    async fn find_futures_pair(&self, exchange: &str, pair_symbol: &str) -> Result<Option<FuturesPair>, AppError> {
        let row = sqlx::query_as::<_, FuturesPair>(&format!(
            "SELECT {} FROM futures_pairs WHERE exchange = $1 AND pair_symbol = $2",
            PAIR_COLUMNS
        ))
        .bind(exchange)
        .bind(pair_symbol)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row)
    }

    async fn list_futures_pairs(&self) -> Result<Vec<FuturesPairWithToken>, AppError> {
        let rows = sqlx::query_as::<_, FuturesPairWithToken>(
            "SELECT fp.id, fp.token_id, fp.exchange, fp.pair_symbol, fp.contract_type, fp.created_at, \
                    t.symbol AS token_symbol \
             FROM futures_pairs fp \
             JOIN tokens t ON fp.token_id = t.id \
             ORDER BY fp.exchange, fp.pair_symbol",
        )
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows)
    }

    async fn delete_futures_pair(&self, pair_id: i32) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM futures_pairs WHERE id = $1")
            .bind(pair_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_futures_data(&self, data: &CreateFuturesData) -> Result<i64, AppError> {
        let data = data.normalized()?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO futures_data \
                 (pair_id, timestamp, open_interest_contracts, open_interest_usd, funding_rate, \
                  volume_btc, volume_usd, price_usd, market_cap_usd, btc_price) \
             VALUES ($1, COALESCE($2, NOW()), $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(data.pair_id)
        .bind(data.timestamp)
        .bind(data.open_interest_contracts)
        .bind(data.open_interest_usd)
        .bind(data.funding_rate)
        .bind(data.volume_btc)
        .bind(data.volume_usd)
        .bind(data.price_usd)
        .bind(data.market_cap_usd)
        .bind(data.btc_price)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(id)
    }

    async fn futures_data_for_pair(
        &self,
        pair_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FuturesData>, AppError> {
        let rows = sqlx::query_as::<_, FuturesData>(&format!(
            "SELECT {} FROM futures_data \
             WHERE pair_id = $1 AND timestamp >= $2 AND timestamp <= $3 \
             ORDER BY timestamp ASC, id ASC",
            FUTURES_DATA_COLUMNS
        ))
        .bind(pair_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows)
    }

    async fn latest_futures_data(&self, pair_id: i32) -> Result<Option<FuturesData>, AppError> {
        let row = sqlx::query_as::<_, FuturesData>(&format!(
            "SELECT {} FROM futures_data WHERE pair_id = $1 ORDER BY timestamp DESC, id DESC LIMIT 1",
            FUTURES_DATA_COLUMNS
        ))
        .bind(pair_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row)
    }

    async fn insert_spot_data(&self, data: &CreateSpotData) -> Result<i64, AppError> {
        let data = data.normalized()?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO spot_data (pair_id, timestamp, volume_btc) \
             VALUES ($1, COALESCE($2, NOW()), $3) RETURNING id",
        )
        .bind(data.pair_id)
        .bind(data.timestamp)
        .bind(data.volume_btc)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(id)
    }

    async fn spot_data_for_pair(
        &self,
        pair_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SpotData>, AppError> {
        let rows = sqlx::query_as::<_, SpotData>(&format!(
            "SELECT {} FROM spot_data \
             WHERE pair_id = $1 AND timestamp >= $2 AND timestamp <= $3 \
             ORDER BY timestamp ASC, id ASC",
            SPOT_DATA_COLUMNS
        ))
        .bind(pair_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows)
    }

    async fn record_api_error(&self, error: &CreateApiError) -> Result<i32, AppError> {
        let error = error.normalized()?;

        let id: i32 = sqlx::query_scalar(
            "INSERT INTO api_errors (exchange, endpoint, error_code, error_message) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&error.exchange)
        .bind(&error.endpoint)
        .bind(&error.error_code)
        .bind(&error.error_message)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(id)
    }

    async fn api_errors_since(&self, exchange: &str, since: DateTime<Utc>) -> Result<Vec<ApiErrorRecord>, AppError> {
        let rows = sqlx::query_as::<_, ApiErrorRecord>(&format!(
            "SELECT {} FROM api_errors WHERE exchange = $1 AND timestamp >= $2 ORDER BY timestamp DESC, id DESC",
            API_ERROR_COLUMNS
        ))
        .bind(exchange)
        .bind(since)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_cmc_cache(&self, quote: &CmcQuote) -> Result<CmcCacheEntry, AppError> {
        let quote = quote.normalized()?;

        let entry = sqlx::query_as::<_, CmcCacheEntry>(&format!(
            "INSERT INTO cmc_cache (symbol, price_usd, volume_24h_usd, market_cap_usd) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (symbol) DO UPDATE SET \
                 price_usd = EXCLUDED.price_usd, \
                 volume_24h_usd = EXCLUDED.volume_24h_usd, \
                 market_cap_usd = EXCLUDED.market_cap_usd, \
                 last_updated = NOW() \
             RETURNING {}",
            CMC_CACHE_COLUMNS
        ))
        .bind(&quote.symbol)
        .bind(quote.price_usd)
        .bind(quote.volume_24h_usd)
        .bind(quote.market_cap_usd)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(entry)
    }

    async fn get_cmc_cache(&self, symbol: &str) -> Result<Option<CmcCacheEntry>, AppError> {
        let entry = sqlx::query_as::<_, CmcCacheEntry>(&format!(
            "SELECT {} FROM cmc_cache WHERE symbol = $1",
            CMC_CACHE_COLUMNS
        ))
        .bind(prepare_token_symbol(symbol)?)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(entry)
    }

    async fn fresh_cmc_cache(
        &self,
        symbols: &[String],
        max_age: Duration,
    ) -> Result<HashMap<String, CmcCacheEntry>, AppError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let cutoff = freshness_cutoff(max_age);
        let symbols: Vec<String> = symbols.iter().map(|s| s.trim().to_uppercase()).collect();

        let rows = sqlx::query_as::<_, CmcCacheEntry>(&format!(
            "SELECT {} FROM cmc_cache WHERE symbol = ANY($1) AND last_updated > $2",
            CMC_CACHE_COLUMNS
        ))
        .bind(&symbols)
        .bind(cutoff)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(|entry| (entry.symbol.clone(), entry)).collect())
    }
}
