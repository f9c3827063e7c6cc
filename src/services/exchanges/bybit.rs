use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ExchangeSettings, HttpSettings};
use crate::error::AppError;
use crate::services::converter::parse_decimal;
use crate::services::exchanges::{keep_or_log, Exchange, ExchangeClient, PairListing, PairSnapshot, SpotSnapshot};
use crate::services::http::ApiClient;

const LINEAR_QUOTES: [&str; 2] = ["USDT", "USDC"];
const PAGE_LIMIT: &str = "1000";
const MAX_PAGES: usize = 100;
/// Bybit sends no `Retry-After`; its IP limit window is short.
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    status: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestEntry {
    open_interest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerEntry {
    last_price: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
}

#[derive(Debug, Clone, Copy)]
enum Category {
    Linear,
    Spot,
}

impl Category {
    fn as_str(&self) -> &'static str {
        match self {
            Category::Linear => "linear",
            Category::Spot => "spot",
        }
    }
}

/// Bybit v5 market data for linear perpetuals and spot.
pub struct BybitClient {
    api: ApiClient,
}

impl BybitClient {
    pub fn new(settings: &ExchangeSettings, http: &HttpSettings) -> Result<Self, AppError> {
        let api = ApiClient::new("Bybit", &settings.base_url, settings.max_concurrent_requests, http)?
            .with_default_retry_after(RATE_LIMIT_WAIT);
        debug!("Bybit API at {}", api.base_url());
        Ok(Self::from_client(api))
    }

    pub fn from_client(api: ApiClient) -> Self {
        Self { api }
    }

    /// Unwraps the v5 envelope; a non-zero `retCode` is an error.
    async fn request<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let envelope: Envelope<T> = self.api.get_json(path, query).await?;

        if envelope.ret_code != 0 {
            return Err(AppError::ExternalApiError(format!(
                "Bybit {} returned retCode {}: {}",
                path, envelope.ret_code, envelope.ret_msg
            )));
        }

        envelope
            .result
            .ok_or_else(|| AppError::ExternalApiError(format!("Bybit {} returned no result", path)))
    }

    async fn instruments(&self, category: Category) -> Result<Vec<Instrument>, AppError> {
        let mut instruments = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![("category", category.as_str().to_string()), ("limit", PAGE_LIMIT.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }

            let page: Page<Instrument> = self.request("/v5/market/instruments-info", &query).await?;
            instruments.extend(page.list);

            match page.next_page_cursor.filter(|next| !next.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(instruments),
            }
        }

        warn!("Bybit {} instruments exceeded {} pages, truncating", category.as_str(), MAX_PAGES);
        Ok(instruments)
    }

    async fn first<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let page: Page<T> = self.request(path, query).await?;
        page.list
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Bybit {} returned an empty list", path)))
    }

    async fn open_interest(&self, symbol: &str) -> Result<BigDecimal, AppError> {
        let entry: OpenInterestEntry = self
            .first(
                "/v5/market/open-interest",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", symbol.to_string()),
                    ("intervalTime", "5min".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        required_decimal(&entry.open_interest, "openInterest", symbol)
    }

    async fn funding_rate(&self, symbol: &str) -> Result<BigDecimal, AppError> {
        let entry: FundingEntry = self
            .first(
                "/v5/market/funding/history",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", symbol.to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        required_decimal(&entry.funding_rate, "fundingRate", symbol)
    }

    async fn ticker(&self, category: Category, symbol: &str) -> Result<TickerEntry, AppError> {
        self.first(
            "/v5/market/tickers",
            &[("category", category.as_str().to_string()), ("symbol", symbol.to_string())],
        )
        .await
    }
}

fn required_decimal(value: &str, field: &str, symbol: &str) -> Result<BigDecimal, AppError> {
    parse_decimal(value)
        .ok_or_else(|| AppError::ExternalApiError(format!("Bybit {} for {} is not a number: {}", field, symbol, value)))
}

fn listing(instrument: Instrument) -> PairListing {
    PairListing {
        symbol: instrument.symbol,
        base_asset: instrument.base_coin,
        quote_asset: instrument.quote_coin,
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    async fn futures_pairs(&self) -> Result<Vec<PairListing>, AppError> {
        let pairs: Vec<PairListing> = self
            .instruments(Category::Linear)
            .await?
            .into_iter()
            .filter(|i| {
                i.status == "Trading"
                    && LINEAR_QUOTES.contains(&i.quote_coin.as_str())
                    && i.contract_type.as_deref() == Some("LinearPerpetual")
            })
            .map(listing)
            .collect();

        info!("Found {} active perpetual pairs on Bybit", pairs.len());
        Ok(pairs)
    }

    async fn collect_pair(&self, listing: &PairListing) -> Result<PairSnapshot, AppError> {
        let symbol = listing.symbol.as_str();
        debug!("Collecting Bybit pair {}", symbol);

        let (open_interest, funding_rate, ticker) = tokio::join!(
            self.open_interest(symbol),
            self.funding_rate(symbol),
            self.ticker(Category::Linear, symbol),
        );

        if let (Err(e), Err(_), Err(_)) = (&open_interest, &funding_rate, &ticker) {
            return Err(e.clone());
        }

        let exchange = self.exchange();
        let ticker = keep_or_log(exchange, "ticker", symbol, ticker);

        let snapshot = PairSnapshot {
            // openInterest is quoted in the base coin
            open_interest_contracts: keep_or_log(exchange, "open interest", symbol, open_interest),
            funding_rate: keep_or_log(exchange, "funding rate", symbol, funding_rate),
            price: ticker.as_ref().and_then(|t| parse_decimal(&t.last_price)),
            // turnover24h is in the quote coin (USDT / USDC)
            volume_24h: ticker.as_ref().and_then(|t| parse_decimal(&t.turnover_24h)),
            ..PairSnapshot::empty(exchange, listing)
        };

        Ok(snapshot.with_open_interest_usd())
    }

    async fn spot_pairs(&self) -> Result<Vec<PairListing>, AppError> {
        let pairs: Vec<PairListing> = self
            .instruments(Category::Spot)
            .await?
            .into_iter()
            .filter(|i| i.status == "Trading" && i.quote_coin == "BTC")
            .map(listing)
            .collect();

        info!("Found {} BTC spot pairs on Bybit", pairs.len());
        Ok(pairs)
    }

    async fn collect_spot_pair(&self, listing: &PairListing) -> Result<SpotSnapshot, AppError> {
        let ticker = self.ticker(Category::Spot, &listing.symbol).await?;

        Ok(SpotSnapshot {
            exchange: self.exchange(),
            symbol: listing.symbol.clone(),
            base_asset: Some(listing.base_asset.clone()).filter(|b| !b.is_empty()),
            volume_btc: parse_decimal(&ticker.turnover_24h),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RetryConfig;
    use std::str::FromStr;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BybitClient {
        let http = HttpSettings {
            timeout_seconds: 5,
            max_retries: 0,
            retry_base_delay_ms: 0,
            ssl_verify: true,
        };
        BybitClient::from_client(
            ApiClient::new("Bybit", &server.uri(), 4, &http)
                .unwrap()
                .with_retry(RetryConfig::immediate(0)),
        )
    }

    fn ok(result: &str) -> String {
        format!(r#"{{"retCode":0,"retMsg":"OK","result":{},"time":1700000000000}}"#, result)
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_instruments_follow_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/instruments-info"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"category":"linear","list":[
                    {"symbol":"ETHPERP","status":"Trading","baseCoin":"ETH","quoteCoin":"USDC","contractType":"LinearPerpetual"}
                ],"nextPageCursor":""}"#,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/market/instruments-info"))
            .and(query_param("category", "linear"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"category":"linear","list":[
                    {"symbol":"SUIUSDT","status":"Trading","baseCoin":"SUI","quoteCoin":"USDT","contractType":"LinearPerpetual"},
                    {"symbol":"BTC-27JUN25","status":"Trading","baseCoin":"BTC","quoteCoin":"USDC","contractType":"LinearFutures"},
                    {"symbol":"OLDUSDT","status":"Closed","baseCoin":"OLD","quoteCoin":"USDT","contractType":"LinearPerpetual"}
                ],"nextPageCursor":"page2"}"#,
            )))
            .mount(&server)
            .await;

        let pairs = client(&server).futures_pairs().await.unwrap();
        let symbols: Vec<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["SUIUSDT", "ETHPERP"]);
    }

    #[tokio::test]
    async fn test_nonzero_ret_code_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"retCode":10001,"retMsg":"params error: symbol invalid","result":{},"time":1}"#),
            )
            .mount(&server)
            .await;

        match client(&server).futures_pairs().await {
            Err(AppError::ExternalApiError(msg)) => assert!(msg.contains("10001")),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_collect_pair_uses_ticker_price_for_usd_open_interest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/open-interest"))
            .and(query_param("intervalTime", "5min"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"symbol":"SUIUSDT","category":"linear","list":[{"openInterest":"2500","timestamp":"1700000000000"}],"nextPageCursor":""}"#,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/market/funding/history"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"category":"linear","list":[{"symbol":"SUIUSDT","fundingRate":"-0.0000375","fundingRateTimestamp":"1700000000000"}]}"#,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/market/tickers"))
            .and(query_param("category", "linear"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"category":"linear","list":[{"symbol":"SUIUSDT","lastPrice":"1.5","volume24h":"100","turnover24h":"150.25"}]}"#,
            )))
            .mount(&server)
            .await;

        let listing = PairListing {
            symbol: "SUIUSDT".to_string(),
            base_asset: "SUI".to_string(),
            quote_asset: "USDT".to_string(),
        };
        let snapshot = client(&server).collect_pair(&listing).await.unwrap();

        assert_eq!(snapshot.exchange, Exchange::Bybit);
        assert_eq!(snapshot.open_interest_contracts, Some(dec("2500")));
        assert_eq!(snapshot.open_interest_usd, Some(dec("3750")));
        assert_eq!(snapshot.funding_rate, Some(dec("-0.0000375")));
        assert_eq!(snapshot.price, Some(dec("1.5")));
        assert_eq!(snapshot.volume_24h, Some(dec("150.25")));
        assert_eq!(snapshot.trade_count_24h, None);
    }

    #[tokio::test]
    async fn test_spot_volume_from_turnover() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/instruments-info"))
            .and(query_param("category", "spot"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"category":"spot","list":[
                    {"symbol":"ETHBTC","status":"Trading","baseCoin":"ETH","quoteCoin":"BTC"},
                    {"symbol":"ETHUSDT","status":"Trading","baseCoin":"ETH","quoteCoin":"USDT"}
                ],"nextPageCursor":""}"#,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/market/tickers"))
            .and(query_param("category", "spot"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok(
                r#"{"category":"spot","list":[{"symbol":"ETHBTC","lastPrice":"0.052","volume24h":"1000","turnover24h":"52.00000000"}]}"#,
            )))
            .mount(&server)
            .await;

        let bybit = client(&server);
        let pairs = bybit.spot_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);

        let snapshot = bybit.collect_spot_pair(&pairs[0]).await.unwrap();
        assert_eq!(snapshot.volume_btc, Some(dec("52")));
    }
}
