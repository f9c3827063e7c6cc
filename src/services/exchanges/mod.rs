pub mod binance;
pub mod bybit;

pub use binance::BinanceClient;
pub use bybit::BybitClient;

use std::fmt;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Exchanges the collector knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Binance,
    Bybit,
}

impl Exchange {
    /// Name stored in `futures_pairs.exchange` and `api_errors.exchange`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "Binance",
            Exchange::Bybit => "Bybit",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tradable instrument as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairListing {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

/// Market figures for one perpetual pair at collection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub exchange: Exchange,
    pub symbol: String,
    pub base_asset: Option<String>,
    pub open_interest_contracts: Option<BigDecimal>,
    pub open_interest_usd: Option<BigDecimal>,
    pub funding_rate: Option<BigDecimal>,
    pub price: Option<BigDecimal>,
    /// 24h turnover in the quote currency (USD stablecoins).
    pub volume_24h: Option<BigDecimal>,
    pub trade_count_24h: Option<u64>,
}

impl PairSnapshot {
    pub fn empty(exchange: Exchange, listing: &PairListing) -> Self {
        Self {
            exchange,
            symbol: listing.symbol.clone(),
            base_asset: Some(listing.base_asset.clone()).filter(|b| !b.is_empty()),
            open_interest_contracts: None,
            open_interest_usd: None,
            funding_rate: None,
            price: None,
            volume_24h: None,
            trade_count_24h: None,
        }
    }

    /// Fills `open_interest_usd` from contracts and price when both are known.
    pub fn with_open_interest_usd(mut self) -> Self {
        if let (Some(contracts), Some(price)) = (&self.open_interest_contracts, &self.price) {
            self.open_interest_usd = Some(contracts * price);
        }
        self
    }
}

/// 24h spot turnover of a BTC-quoted pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotSnapshot {
    pub exchange: Exchange,
    pub symbol: String,
    pub base_asset: Option<String>,
    pub volume_btc: Option<BigDecimal>,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Actively trading perpetual contracts with a USD stablecoin quote.
    async fn futures_pairs(&self) -> Result<Vec<PairListing>, AppError>;

    /// Open interest, funding, price and volume for one perpetual.
    ///
    /// Individual figures that cannot be fetched are left empty; an error is
    /// returned only when nothing could be fetched.
    async fn collect_pair(&self, listing: &PairListing) -> Result<PairSnapshot, AppError>;

    /// Actively trading spot pairs quoted in BTC.
    async fn spot_pairs(&self) -> Result<Vec<PairListing>, AppError>;

    async fn collect_spot_pair(&self, listing: &PairListing) -> Result<SpotSnapshot, AppError>;
}

/// Keeps the value of a sub-request, logging and dropping its error.
pub(crate) fn keep_or_log<T>(exchange: Exchange, what: &str, symbol: &str, result: Result<T, AppError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("{} {} for {} unavailable: {}", exchange, what, symbol, e);
            None
        }
    }
}
