use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{CoinMarketCapSettings, HttpSettings};
use crate::error::AppError;
use crate::models::CmcQuote;
use crate::services::converter::{decimal_from_json, normalize_symbol};
use crate::services::http::ApiClient;

/// Most symbols CoinMarketCap accepts in one quotes request.
pub const MAX_SYMBOLS_PER_REQUEST: usize = 200;
const CHUNK_PAUSE: Duration = Duration::from_secs(2);
const QUOTES_LATEST: &str = "/v1/cryptocurrency/quotes/latest";
const API_KEY_HEADER: &str = "x-cmc_pro_api_key";

/// Source of USD price, volume and market cap per token symbol.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Quotes keyed by upper-cased symbol. Unknown symbols are absent.
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, CmcQuote>, AppError>;
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    status: Status,
    #[serde(default)]
    data: HashMap<String, Asset>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    #[serde(default)]
    quote: HashMap<String, UsdQuote>,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    #[serde(default)]
    price: Value,
    #[serde(default)]
    volume_24h: Value,
    #[serde(default)]
    market_cap: Value,
}

pub struct CoinMarketCapClient {
    api: ApiClient,
    chunk_pause: Duration,
}

impl CoinMarketCapClient {
    pub fn new(settings: &CoinMarketCapSettings, http: &HttpSettings) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(&settings.api_key)
            .map_err(|_| AppError::ConfigError("COINMARKETCAP_API_KEY contains invalid characters".to_string()))?;
        key.set_sensitive(true);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let api = ApiClient::with_headers(
            "CoinMarketCap",
            &settings.base_url,
            settings.max_concurrent_requests,
            http,
            headers,
        )?;
        Ok(Self::from_client(api))
    }

    pub fn from_client(api: ApiClient) -> Self {
        Self {
            api,
            chunk_pause: CHUNK_PAUSE,
        }
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    async fn quotes_chunk(&self, symbols: &[String]) -> Result<HashMap<String, CmcQuote>, AppError> {
        let query = [("symbol", symbols.join(",")), ("convert", "USD".to_string())];
        let response: QuotesResponse = self.api.get_json(QUOTES_LATEST, &query).await?;

        if let Some(code) = response.status.error_code.filter(|code| *code != 0) {
            return Err(AppError::ExternalApiError(format!(
                "CoinMarketCap error {}: {}",
                code,
                response.status.error_message.unwrap_or_default()
            )));
        }

        Ok(response
            .data
            .into_iter()
            .filter_map(|(symbol, asset)| {
                let symbol = normalize_symbol(&symbol);
                asset.quote.get("USD").map(|usd| {
                    let quote = CmcQuote {
                        symbol: symbol.clone(),
                        price_usd: decimal_from_json(&usd.price),
                        volume_24h_usd: decimal_from_json(&usd.volume_24h),
                        market_cap_usd: decimal_from_json(&usd.market_cap),
                    };
                    (symbol, quote)
                })
            })
            .collect())
    }
}

#[async_trait]
impl QuoteProvider for CoinMarketCapClient {
    async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, CmcQuote>, AppError> {
        let unique: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if unique.is_empty() {
            warn!("No symbols to quote");
            return Ok(HashMap::new());
        }

        info!("Requesting CoinMarketCap quotes for {} symbols", unique.len());

        let mut quotes = HashMap::new();
        let chunks: Vec<&[String]> = unique.chunks(MAX_SYMBOLS_PER_REQUEST).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            quotes.extend(self.quotes_chunk(chunk).await?);

            if index + 1 < chunks.len() {
                tokio::time::sleep(self.chunk_pause).await;
            }
        }

        for symbol in unique.iter().filter(|s| !quotes.contains_key(*s)) {
            warn!("CoinMarketCap has no quote for {}", symbol);
        }

        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RetryConfig;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> (CoinMarketCapSettings, HttpSettings) {
        (
            CoinMarketCapSettings {
                api_key: "test-key".to_string(),
                base_url: server.uri(),
                max_concurrent_requests: 5,
                cache_ttl_seconds: 600,
            },
            HttpSettings {
                timeout_seconds: 5,
                max_retries: 0,
                retry_base_delay_ms: 0,
                ssl_verify: true,
            },
        )
    }

    fn client(server: &MockServer) -> CoinMarketCapClient {
        let (cmc, http) = settings(server);
        let client = CoinMarketCapClient::new(&cmc, &http).unwrap();
        CoinMarketCapClient {
            api: client.api.with_retry(RetryConfig::immediate(0)),
            chunk_pause: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_quotes_sends_key_and_parses_usd_figures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUOTES_LATEST))
            .and(header(API_KEY_HEADER, "test-key"))
            .and(query_param("symbol", "BTC,SUI"))
            .and(query_param("convert", "USD"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"status":{"error_code":0,"error_message":null},"data":{
                    "BTC":{"symbol":"BTC","quote":{"USD":{"price":67123.45,"volume_24h":31000000000.12,"market_cap":1320000000000.5}}},
                    "SUI":{"symbol":"SUI","quote":{"USD":{"price":1.2345678901,"volume_24h":456789012.34,"market_cap":null}}}
                }}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let quotes = client(&server)
            .quotes(&["sui".to_string(), "BTC".to_string(), "SUI".to_string()])
            .await
            .unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes["BTC"].price_usd, Some(BigDecimal::from_str("67123.45").unwrap()));
        assert_eq!(quotes["SUI"].price_usd, Some(BigDecimal::from_str("1.2345678901").unwrap()));
        assert_eq!(quotes["SUI"].market_cap_usd, None);
    }

    #[tokio::test]
    async fn test_long_numbers_keep_every_digit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUOTES_LATEST))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"status":{"error_code":0},"data":{
                    "PEPE":{"quote":{"USD":{"price":0.0000123456789012345678,"volume_24h":987654321098765432.12,"market_cap":12345678901234567.89}}}
                }}"#,
            ))
            .mount(&server)
            .await;

        let quotes = client(&server).quotes(&["PEPE".to_string()]).await.unwrap();
        let pepe = &quotes["PEPE"];

        assert_eq!(pepe.market_cap_usd, Some(BigDecimal::from_str("12345678901234567.89").unwrap()));
        assert_eq!(pepe.volume_24h_usd, Some(BigDecimal::from_str("987654321098765432.12").unwrap()));
        assert_eq!(pepe.price_usd, Some(BigDecimal::from_str("0.0000123456789012345678").unwrap()));

        let fitted = crate::database::schema::cmc_cache::MARKET_CAP_USD
            .fit(pepe.market_cap_usd.as_ref().unwrap())
            .unwrap();
        assert_eq!(fitted.as_bigint_and_exponent().0.to_string(), "1234567890123456789");
    }

    #[tokio::test]
    async fn test_status_error_code_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"status":{"error_code":1008,"error_message":"You've exceeded your API Key's HTTP request rate limit."}}"#,
            ))
            .mount(&server)
            .await;

        match client(&server).quotes(&["BTC".to_string()]).await {
            Err(AppError::ExternalApiError(msg)) => assert!(msg.contains("1008")),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_symbols_chunked_by_request_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUOTES_LATEST))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":{"error_code":0},"data":{}}"#))
            .expect(2)
            .mount(&server)
            .await;

        let symbols: Vec<String> = (0..250).map(|i| format!("TKN{}", i)).collect();
        let quotes = client(&server).quotes(&symbols).await.unwrap();
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_empty_symbol_list_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        assert!(client(&server).quotes(&["  ".to_string()]).await.unwrap().is_empty());
    }
}
