use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::schema;
use crate::error::AppError;
use crate::models::token::normalize_token_symbol;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CmcCacheEntry {
    pub id: i32,
    pub symbol: String,
    pub price_usd: Option<BigDecimal>,
    pub volume_24h_usd: Option<BigDecimal>,
    pub market_cap_usd: Option<BigDecimal>,
    pub last_updated: DateTime<Utc>,
}

impl CmcCacheEntry {
    pub fn to_quote(&self) -> CmcQuote {
        CmcQuote {
            symbol: self.symbol.clone(),
            price_usd: self.price_usd.clone(),
            volume_24h_usd: self.volume_24h_usd.clone(),
            market_cap_usd: self.market_cap_usd.clone(),
        }
    }
}

/// Latest market figures for one symbol as reported by CoinMarketCap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmcQuote {
    pub symbol: String,
    pub price_usd: Option<BigDecimal>,
    pub volume_24h_usd: Option<BigDecimal>,
    pub market_cap_usd: Option<BigDecimal>,
}

impl CmcQuote {
    pub fn normalized(&self) -> Result<Self, AppError> {
        use schema::cmc_cache as cols;

        let symbol = normalize_token_symbol(&self.symbol);
        if symbol.is_empty() {
            return Err(AppError::ValidationError("cmc_cache symbol must not be empty".to_string()));
        }
        cols::SYMBOL.check(&symbol)?;

        Ok(Self {
            symbol,
            price_usd: cols::PRICE_USD.fit_opt(self.price_usd.as_ref())?,
            volume_24h_usd: cols::VOLUME_24H_USD.fit_opt(self.volume_24h_usd.as_ref())?,
            market_cap_usd: cols::MARKET_CAP_USD.fit_opt(self.market_cap_usd.as_ref())?,
        })
    }
}
