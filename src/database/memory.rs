use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;

use crate::database::repository::{freshness_cutoff, MarketRepository};
use crate::database::schema;
use crate::error::{AppError, ConstraintViolation};
use crate::models::{
    prepare_token_symbol, ApiErrorRecord, CmcCacheEntry, CmcQuote, CreateApiError, CreateFuturesData,
    CreateFuturesPair, CreateSpotData, FuturesData, FuturesPair, FuturesPairWithToken, SpotData, Token,
};

#[derive(Default)]
struct Tables {
    tokens: BTreeMap<i32, Token>,
    futures_pairs: BTreeMap<i32, FuturesPair>,
    futures_data: BTreeMap<i64, FuturesData>,
    spot_data: BTreeMap<i64, SpotData>,
    api_errors: BTreeMap<i32, ApiErrorRecord>,
    cmc_cache: BTreeMap<i32, CmcCacheEntry>,
    next_token_id: i32,
    next_pair_id: i32,
    next_futures_data_id: i64,
    next_spot_data_id: i64,
    next_api_error_id: i32,
    next_cmc_cache_id: i32,
}

impl Tables {
    fn token_by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.tokens.values().find(|t| t.symbol == symbol)
    }

    fn pair_by_key(&self, exchange: &str, pair_symbol: &str) -> Option<&FuturesPair> {
        self.futures_pairs
            .values()
            .find(|p| p.exchange == exchange && p.pair_symbol == pair_symbol)
    }

    fn insert_token(&mut self, symbol: String) -> Result<Token, AppError> {
        if self.token_by_symbol(&symbol).is_some() {
            return Err(ConstraintViolation::unique(
                schema::TOKENS,
                schema::UQ_TOKENS_SYMBOL,
                format!("symbol {} already exists", symbol),
            )
            .into());
        }

        self.next_token_id += 1;
        let now = db_now();
        let token = Token {
            id: self.next_token_id,
            symbol,
            created_at: now,
            updated_at: now,
        };
        self.tokens.insert(token.id, token.clone());
        Ok(token)
    }

    fn insert_pair(&mut self, pair: &CreateFuturesPair) -> Result<FuturesPair, AppError> {
        if !self.tokens.contains_key(&pair.token_id) {
            return Err(ConstraintViolation::foreign_key(
                schema::FUTURES_PAIRS,
                schema::FK_FUTURES_PAIRS_TOKEN,
                format!("token {} does not exist", pair.token_id),
            )
            .into());
        }
        if self.pair_by_key(&pair.exchange, &pair.pair_symbol).is_some() {
            return Err(ConstraintViolation::unique(
                schema::FUTURES_PAIRS,
                schema::UQ_FUTURES_PAIRS_EXCHANGE_PAIR,
                format!("pair {} on {} already exists", pair.pair_symbol, pair.exchange),
            )
            .into());
        }

        self.next_pair_id += 1;
        let row = FuturesPair {
            id: self.next_pair_id,
            token_id: pair.token_id,
            exchange: pair.exchange.clone(),
            pair_symbol: pair.pair_symbol.clone(),
            contract_type: pair.contract_type.as_str().to_string(),
            created_at: db_now(),
        };
        self.futures_pairs.insert(row.id, row.clone());
        Ok(row)
    }

    fn remove_pair_cascade(&mut self, pair_id: i32) -> bool {
        if self.futures_pairs.remove(&pair_id).is_none() {
            return false;
        }
        self.futures_data.retain(|_, row| row.pair_id != pair_id);
        self.spot_data.retain(|_, row| row.pair_id != pair_id);
        true
    }

    fn require_pair(&self, pair_id: i32, table: &str, constraint: &str) -> Result<(), AppError> {
        if self.futures_pairs.contains_key(&pair_id) {
            Ok(())
        } else {
            Err(ConstraintViolation::foreign_key(table, constraint, format!("pair {} does not exist", pair_id)).into())
        }
    }
}

/// `MarketRepository` kept entirely in memory.
///
/// Enforces the same unique, foreign key and cascade rules as the
/// PostgreSQL schema; used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryMarketRepository {
    tables: RwLock<Tables>,
}

impl InMemoryMarketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Current time at the resolution PostgreSQL stores.
fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn in_range(ts: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    ts >= from && ts <= to
}

#[async_trait]
impl MarketRepository for InMemoryMarketRepository {
    async fn insert_token(&self, symbol: &str) -> Result<Token, AppError> {
        let symbol = prepare_token_symbol(symbol)?;
        self.tables.write().await.insert_token(symbol)
    }

    async fn get_or_create_token(&self, symbol: &str) -> Result<i32, AppError> {
        let symbol = prepare_token_symbol(symbol)?;
        let mut tables = self.tables.write().await;

        if let Some(token) = tables.token_by_symbol(&symbol) {
            return Ok(token.id);
        }
        Ok(tables.insert_token(symbol)?.id)
    }

    async fn find_token(&self, symbol: &str) -> Result<Option<Token>, AppError> {
        let symbol = prepare_token_symbol(symbol)?;
        Ok(self.tables.read().await.token_by_symbol(&symbol).cloned())
    }

    async fn list_tokens(&self) -> Result<Vec<Token>, AppError> {
        let mut tokens: Vec<Token> = self.tables.read().await.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(tokens)
    }

    async fn delete_token(&self, token_id: i32) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        if tables.tokens.remove(&token_id).is_none() {
            return Ok(false);
        }

        let pair_ids: Vec<i32> = tables
            .futures_pairs
            .values()
            .filter(|p| p.token_id == token_id)
            .map(|p| p.id)
            .collect();
        for pair_id in pair_ids {
            tables.remove_pair_cascade(pair_id);
        }
        Ok(true)
    }

    async fn insert_futures_pair(&self, pair: &CreateFuturesPair) -> Result<FuturesPair, AppError> {
        pair.validate()?;
        self.tables.write().await.insert_pair(pair)
    }

    async fn get_or_create_futures_pair(&self, pair: &CreateFuturesPair) -> Result<i32, AppError> {
        pair.validate()?;
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.pair_by_key(&pair.exchange, &pair.pair_symbol) {
            return Ok(existing.id);
        }
        Ok(tables.insert_pair(pair)?.id)
    }

    async fn find_futures_pair(&self, exchange: &str, pair_symbol: &str) -> Result<Option<FuturesPair>, AppError> {
        Ok(self.tables.read().await.pair_by_key(exchange, pair_symbol).cloned())
    }

    async fn list_futures_pairs(&self) -> Result<Vec<FuturesPairWithToken>, AppError> {
        let tables = self.tables.read().await;

        let mut rows: Vec<FuturesPairWithToken> = tables
            .futures_pairs
            .values()
            .filter_map(|pair| {
                tables.tokens.get(&pair.token_id).map(|token| FuturesPairWithToken {
                    id: pair.id,
                    token_id: pair.token_id,
                    exchange: pair.exchange.clone(),
                    pair_symbol: pair.pair_symbol.clone(),
                    contract_type: pair.contract_type.clone(),
                    created_at: pair.created_at,
                    token_symbol: token.symbol.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| (&a.exchange, &a.pair_symbol).cmp(&(&b.exchange, &b.pair_symbol)));
        Ok(rows)
    }

    async fn delete_futures_pair(&self, pair_id: i32) -> Result<bool, AppError> {
        Ok(self.tables.write().await.remove_pair_cascade(pair_id))
    }

    async fn insert_futures_data(&self, data: &CreateFuturesData) -> Result<i64, AppError> {
        let data = data.normalized()?;
        let mut tables = self.tables.write().await;
        tables.require_pair(data.pair_id, schema::FUTURES_DATA, schema::FK_FUTURES_DATA_PAIR)?;

        tables.next_futures_data_id += 1;
        let id = tables.next_futures_data_id;
        tables.futures_data.insert(
            id,
            FuturesData {
                id,
                pair_id: data.pair_id,
                timestamp: data.timestamp.map(|ts| ts.trunc_subsecs(6)).unwrap_or_else(db_now),
                open_interest_contracts: data.open_interest_contracts,
                open_interest_usd: data.open_interest_usd,
                funding_rate: data.funding_rate,
                volume_btc: data.volume_btc,
                volume_usd: data.volume_usd,
                price_usd: data.price_usd,
                market_cap_usd: data.market_cap_usd,
                btc_price: data.btc_price,
            },
        );
        Ok(id)
    }

    async fn futures_data_for_pair(
        &self,
        pair_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FuturesData>, AppError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<FuturesData> = tables
            .futures_data
            .values()
            .filter(|row| row.pair_id == pair_id && in_range(row.timestamp, from, to))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        Ok(rows)
    }

    async fn latest_futures_data(&self, pair_id: i32) -> Result<Option<FuturesData>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .futures_data
            .values()
            .filter(|row| row.pair_id == pair_id)
            .max_by_key(|row| (row.timestamp, row.id))
            .cloned())
    }

    async fn insert_spot_data(&self, data: &CreateSpotData) -> Result<i64, AppError> {
        let data = data.normalized()?;
        let mut tables = self.tables.write().await;
        tables.require_pair(data.pair_id, schema::SPOT_DATA, schema::FK_SPOT_DATA_PAIR)?;

        tables.next_spot_data_id += 1;
        let id = tables.next_spot_data_id;
        tables.spot_data.insert(
            id,
            SpotData {
                id,
                pair_id: data.pair_id,
                timestamp: data.timestamp.map(|ts| ts.trunc_subsecs(6)).unwrap_or_else(db_now),
                volume_btc: data.volume_btc,
            },
        );
        Ok(id)
    }

    async fn spot_data_for_pair(
        &self,
        pair_id: i32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SpotData>, AppError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<SpotData> = tables
            .spot_data
            .values()
            .filter(|row| row.pair_id == pair_id && in_range(row.timestamp, from, to))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        Ok(rows)
    }

    async fn record_api_error(&self, error: &CreateApiError) -> Result<i32, AppError> {
        let error = error.normalized()?;
        let mut tables = self.tables.write().await;

        tables.next_api_error_id += 1;
        let id = tables.next_api_error_id;
        tables.api_errors.insert(
            id,
            ApiErrorRecord {
                id,
                exchange: error.exchange,
                endpoint: error.endpoint,
                error_code: error.error_code,
                error_message: error.error_message,
                timestamp: db_now(),
            },
        );
        Ok(id)
    }

    async fn api_errors_since(&self, exchange: &str, since: DateTime<Utc>) -> Result<Vec<ApiErrorRecord>, AppError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ApiErrorRecord> = tables
            .api_errors
            .values()
            .filter(|row| row.exchange == exchange && row.timestamp >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(rows)
    }

    async fn upsert_cmc_cache(&self, quote: &CmcQuote) -> Result<CmcCacheEntry, AppError> {
        let quote = quote.normalized()?;
        let mut tables = self.tables.write().await;

        if let Some(entry) = tables.cmc_cache.values_mut().find(|e| e.symbol == quote.symbol) {
            // last_updated strictly advances even when the clock has not ticked
            let now = db_now().max(entry.last_updated + chrono::Duration::microseconds(1));
            entry.price_usd = quote.price_usd;
            entry.volume_24h_usd = quote.volume_24h_usd;
            entry.market_cap_usd = quote.market_cap_usd;
            entry.last_updated = now;
            return Ok(entry.clone());
        }

        tables.next_cmc_cache_id += 1;
        let entry = CmcCacheEntry {
            id: tables.next_cmc_cache_id,
            symbol: quote.symbol,
            price_usd: quote.price_usd,
            volume_24h_usd: quote.volume_24h_usd,
            market_cap_usd: quote.market_cap_usd,
            last_updated: db_now(),
        };
        tables.cmc_cache.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_cmc_cache(&self, symbol: &str) -> Result<Option<CmcCacheEntry>, AppError> {
        let symbol = prepare_token_symbol(symbol)?;
        let tables = self.tables.read().await;
        Ok(tables.cmc_cache.values().find(|e| e.symbol == symbol).cloned())
    }

    async fn fresh_cmc_cache(
        &self,
        symbols: &[String],
        max_age: Duration,
    ) -> Result<HashMap<String, CmcCacheEntry>, AppError> {
        let cutoff = freshness_cutoff(max_age);
        let wanted: Vec<String> = symbols.iter().map(|s| s.trim().to_uppercase()).collect();
        let tables = self.tables.read().await;

        Ok(tables
            .cmc_cache
            .values()
            .filter(|e| wanted.contains(&e.symbol) && e.last_updated > cutoff)
            .map(|e| (e.symbol.clone(), e.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConstraintKind;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_get_or_create_token_is_idempotent() {
        let repo = InMemoryMarketRepository::new();
        let first = repo.get_or_create_token("sui").await.unwrap();
        let second = repo.get_or_create_token("SUI").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.list_tokens().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spot_data_requires_pair() {
        let repo = InMemoryMarketRepository::new();
        let err = repo
            .insert_spot_data(&CreateSpotData {
                pair_id: 42,
                timestamp: None,
                volume_btc: Some(BigDecimal::from(1)),
            })
            .await
            .unwrap_err();

        assert_eq!(err.constraint_kind(), Some(ConstraintKind::ForeignKey));
    }

    #[tokio::test]
    async fn test_delete_pair_keeps_token() {
        let repo = InMemoryMarketRepository::new();
        let token_id = repo.get_or_create_token("ETH").await.unwrap();
        let pair_id = repo
            .get_or_create_futures_pair(&CreateFuturesPair::perpetual(token_id, "Binance", "ETHUSDT"))
            .await
            .unwrap();
        repo.insert_futures_data(&CreateFuturesData {
            funding_rate: Some(BigDecimal::from_str("0.0001").unwrap()),
            ..CreateFuturesData::for_pair(pair_id)
        })
        .await
        .unwrap();

        assert!(repo.delete_futures_pair(pair_id).await.unwrap());
        assert!(repo.latest_futures_data(pair_id).await.unwrap().is_none());
        assert!(repo.find_token("ETH").await.unwrap().is_some());
        assert!(!repo.delete_futures_pair(pair_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fresh_cmc_cache_filters_by_symbol() {
        let repo = InMemoryMarketRepository::new();
        for symbol in ["BTC", "ETH"] {
            repo.upsert_cmc_cache(&CmcQuote {
                symbol: symbol.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let fresh = repo
            .fresh_cmc_cache(&["btc".to_string(), "DOGE".to_string()], Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert!(fresh.contains_key("BTC"));
    }

    #[tokio::test]
    async fn test_fresh_cmc_cache_with_huge_max_age() {
        let repo = InMemoryMarketRepository::new();
        repo.upsert_cmc_cache(&CmcQuote {
            symbol: "BTC".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let fresh = repo
            .fresh_cmc_cache(&["BTC".to_string()], Duration::from_secs(1_000_000_000_000_000))
            .await
            .unwrap();
        assert!(fresh.contains_key("BTC"));

        let fresh = repo
            .fresh_cmc_cache(&["BTC".to_string()], Duration::MAX)
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
    }
}
