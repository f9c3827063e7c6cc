use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{ExchangeSettings, HttpSettings};
use crate::error::AppError;
use crate::services::converter::parse_decimal;
use crate::services::exchanges::{keep_or_log, Exchange, ExchangeClient, PairListing, PairSnapshot, SpotSnapshot};
use crate::services::http::ApiClient;

const FUTURES_QUOTES: [&str; 2] = ["USDT", "BUSD"];

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(default)]
    contract_type: Option<String>,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterest {
    open_interest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    #[serde(default)]
    last_funding_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    quote_volume: String,
    #[serde(default)]
    count: Option<u64>,
}

/// Binance USDⓈ-M futures (`/fapi`) and spot (`/api/v3`) market data.
pub struct BinanceClient {
    futures: ApiClient,
    spot: ApiClient,
}

impl BinanceClient {
    pub fn new(settings: &ExchangeSettings, http: &HttpSettings) -> Result<Self, AppError> {
        let futures = ApiClient::new("Binance", &settings.base_url, settings.max_concurrent_requests, http)?;
        let spot_url = settings.spot_base_url.as_deref().unwrap_or(&settings.base_url);
        let spot = ApiClient::new("Binance spot", spot_url, settings.max_concurrent_requests, http)?;
        debug!("Binance futures API at {}, spot API at {}", futures.base_url(), spot.base_url());
        Ok(Self::from_clients(futures, spot))
    }

    pub fn from_clients(futures: ApiClient, spot: ApiClient) -> Self {
        Self { futures, spot }
    }

    fn symbol_query(symbol: &str) -> [(&'static str, String); 1] {
        [("symbol", symbol.to_string())]
    }

    async fn open_interest(&self, symbol: &str) -> Result<BigDecimal, AppError> {
        let data: OpenInterest = self.futures.get_json("/fapi/v1/openInterest", &Self::symbol_query(symbol)).await?;
        required_decimal(&data.open_interest, "openInterest", symbol)
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<BigDecimal>, AppError> {
        let data: PremiumIndex = self.futures.get_json("/fapi/v1/premiumIndex", &Self::symbol_query(symbol)).await?;
        Ok(data.last_funding_rate.as_deref().and_then(parse_decimal))
    }

    async fn price(&self, symbol: &str) -> Result<BigDecimal, AppError> {
        let data: TickerPrice = self.futures.get_json("/fapi/v1/ticker/price", &Self::symbol_query(symbol)).await?;
        required_decimal(&data.price, "price", symbol)
    }

    async fn ticker_24h(&self, symbol: &str) -> Result<(BigDecimal, Option<u64>), AppError> {
        let data: Ticker24h = self.futures.get_json("/fapi/v1/ticker/24hr", &Self::symbol_query(symbol)).await?;
        Ok((required_decimal(&data.quote_volume, "quoteVolume", symbol)?, data.count))
    }
}

fn required_decimal(value: &str, field: &str, symbol: &str) -> Result<BigDecimal, AppError> {
    parse_decimal(value)
        .ok_or_else(|| AppError::ExternalApiError(format!("Binance {} for {} is not a number: {}", field, symbol, value)))
}

fn listing(info: SymbolInfo) -> PairListing {
    PairListing {
        symbol: info.symbol,
        base_asset: info.base_asset,
        quote_asset: info.quote_asset,
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn futures_pairs(&self) -> Result<Vec<PairListing>, AppError> {
        let info: ExchangeInfo = self.futures.get_json("/fapi/v1/exchangeInfo", &[]).await?;

        let pairs: Vec<PairListing> = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.status == "TRADING"
                    && s.contract_type.as_deref() == Some("PERPETUAL")
                    && FUTURES_QUOTES.contains(&s.quote_asset.as_str())
            })
            .map(listing)
            .collect();

        info!("Found {} active perpetual pairs on Binance", pairs.len());
        Ok(pairs)
    }

    async fn collect_pair(&self, listing: &PairListing) -> Result<PairSnapshot, AppError> {
        let symbol = listing.symbol.as_str();
        debug!("Collecting Binance pair {}", symbol);

        let (open_interest, funding_rate, price, ticker) = tokio::join!(
            self.open_interest(symbol),
            self.funding_rate(symbol),
            self.price(symbol),
            self.ticker_24h(symbol),
        );

        if let (Err(e), Err(_), Err(_), Err(_)) = (&open_interest, &funding_rate, &price, &ticker) {
            return Err(e.clone());
        }

        let exchange = self.exchange();
        let ticker = keep_or_log(exchange, "24h ticker", symbol, ticker);

        let snapshot = PairSnapshot {
            open_interest_contracts: keep_or_log(exchange, "open interest", symbol, open_interest),
            funding_rate: keep_or_log(exchange, "funding rate", symbol, funding_rate).flatten(),
            price: keep_or_log(exchange, "price", symbol, price),
            volume_24h: ticker.as_ref().map(|(volume, _)| volume.clone()),
            trade_count_24h: ticker.and_then(|(_, count)| count),
            ..PairSnapshot::empty(exchange, listing)
        };

        Ok(snapshot.with_open_interest_usd())
    }

    async fn spot_pairs(&self) -> Result<Vec<PairListing>, AppError> {
        let info: ExchangeInfo = self.spot.get_json("/api/v3/exchangeInfo", &[]).await?;

        let pairs: Vec<PairListing> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.quote_asset == "BTC")
            .map(listing)
            .collect();

        info!("Found {} BTC spot pairs on Binance", pairs.len());
        Ok(pairs)
    }

    async fn collect_spot_pair(&self, listing: &PairListing) -> Result<SpotSnapshot, AppError> {
        let data: Ticker24h = self
            .spot
            .get_json("/api/v3/ticker/24hr", &Self::symbol_query(&listing.symbol))
            .await?;

        Ok(SpotSnapshot {
            exchange: self.exchange(),
            symbol: listing.symbol.clone(),
            base_asset: Some(listing.base_asset.clone()).filter(|b| !b.is_empty()),
            // quote asset is BTC, so quote volume is BTC volume
            volume_btc: parse_decimal(&data.quote_volume),
        })
    }
}
