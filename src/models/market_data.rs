use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::schema;
use crate::error::AppError;

/// One observation of a perpetual (or other derivative) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FuturesData {
    pub id: i64,
    pub pair_id: i32,
    pub timestamp: DateTime<Utc>,
    pub open_interest_contracts: Option<BigDecimal>,
    pub open_interest_usd: Option<BigDecimal>,
    pub funding_rate: Option<BigDecimal>,
    pub volume_btc: Option<BigDecimal>,
    pub volume_usd: Option<BigDecimal>,
    pub price_usd: Option<BigDecimal>,
    pub market_cap_usd: Option<BigDecimal>,
    pub btc_price: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateFuturesData {
    pub pair_id: i32,
    /// `None` lets the store stamp the row with its own clock.
    pub timestamp: Option<DateTime<Utc>>,
    pub open_interest_contracts: Option<BigDecimal>,
    pub open_interest_usd: Option<BigDecimal>,
    pub funding_rate: Option<BigDecimal>,
    pub volume_btc: Option<BigDecimal>,
    pub volume_usd: Option<BigDecimal>,
    pub price_usd: Option<BigDecimal>,
    pub market_cap_usd: Option<BigDecimal>,
    pub btc_price: Option<BigDecimal>,
}

impl CreateFuturesData {
    pub fn for_pair(pair_id: i32) -> Self {
        Self {
            pair_id,
            ..Default::default()
        }
    }

    /// Returns a copy with every decimal fitted to its column.
    pub fn normalized(&self) -> Result<Self, AppError> {
        use schema::futures_data as cols;

        Ok(Self {
            pair_id: self.pair_id,
            timestamp: self.timestamp,
            open_interest_contracts: cols::OPEN_INTEREST_CONTRACTS.fit_opt(self.open_interest_contracts.as_ref())?,
            open_interest_usd: cols::OPEN_INTEREST_USD.fit_opt(self.open_interest_usd.as_ref())?,
            funding_rate: cols::FUNDING_RATE.fit_opt(self.funding_rate.as_ref())?,
            volume_btc: cols::VOLUME_BTC.fit_opt(self.volume_btc.as_ref())?,
            volume_usd: cols::VOLUME_USD.fit_opt(self.volume_usd.as_ref())?,
            price_usd: cols::PRICE_USD.fit_opt(self.price_usd.as_ref())?,
            market_cap_usd: cols::MARKET_CAP_USD.fit_opt(self.market_cap_usd.as_ref())?,
            btc_price: cols::BTC_PRICE.fit_opt(self.btc_price.as_ref())?,
        })
    }
}

/// One observation of BTC-denominated spot volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SpotData {
    pub id: i64,
    pub pair_id: i32,
    pub timestamp: DateTime<Utc>,
    pub volume_btc: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateSpotData {
    pub pair_id: i32,
    pub timestamp: Option<DateTime<Utc>>,
    pub volume_btc: Option<BigDecimal>,
}

impl CreateSpotData {
    pub fn normalized(&self) -> Result<Self, AppError> {
        Ok(Self {
            pair_id: self.pair_id,
            timestamp: self.timestamp,
            volume_btc: schema::spot_data::VOLUME_BTC.fit_opt(self.volume_btc.as_ref())?,
        })
    }
}
