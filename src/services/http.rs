use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::config::HttpSettings;
use crate::error::AppError;
use crate::utils::{retry_with_backoff, RetryConfig};

/// Wait used when a 429 response carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);
const MAX_ERROR_BODY_CHARS: usize = 500;

/// JSON-over-HTTP client shared by the exchange and quote clients.
///
/// Caps in-flight requests with a semaphore, honors `Retry-After` on 429 and
/// retries transient failures with exponential backoff.
#[derive(Debug, Clone)]
pub struct ApiClient {
    name: String,
    client: Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
    retry: RetryConfig,
    default_retry_after: Duration,
}

impl ApiClient {
    pub fn new(name: &str, base_url: &str, max_concurrent_requests: usize, http: &HttpSettings) -> Result<Self, AppError> {
        Self::with_headers(name, base_url, max_concurrent_requests, http, HeaderMap::new())
    }

    pub fn with_headers(
        name: &str,
        base_url: &str,
        max_concurrent_requests: usize,
        http: &HttpSettings,
        headers: HeaderMap,
    ) -> Result<Self, AppError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid {} base URL '{}': {}", name, base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "{} base URL must be http or https, got '{}'",
                name, base_url
            )));
        }

        let client = Client::builder()
            .timeout(http.timeout())
            .user_agent("crypto-futures-collector/0.1")
            .default_headers(headers)
            .danger_accept_invalid_certs(!http.ssl_verify)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            retry: RetryConfig::from_http_settings(http),
            default_retry_after: DEFAULT_RETRY_AFTER,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Wait applied on 429 when the response names none.
    pub fn with_default_retry_after(mut self, wait: Duration) -> Self {
        self.default_retry_after = wait;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GETs `path` (relative to the base URL) and decodes the JSON body.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let operation_name = format!("{} GET {}", self.name, path);

        retry_with_backoff(|| self.get_once(&url, query), &self.retry, &operation_name).await
    }

    async fn get_once<T>(&self, url: &str, query: &[(&str, String)]) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AppError::InternalError(format!("{} request limiter closed", self.name)))?;

        debug!("{} GET {}", self.name, url);
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(response.headers(), self.default_retry_after);
            drop(permit);
            warn!("{} rate limited, waiting {:?}", self.name, wait);
            tokio::time::sleep(wait).await;
            return Err(AppError::RateLimitError(format!("{} returned 429 for {}", self.name, url)));
        }

        let body = response.text().await?;
        drop(permit);

        if !status.is_success() {
            let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(AppError::HttpStatus(status.as_u16(), snippet));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Seconds from a `Retry-After` header, bounded.
fn retry_after(headers: &HeaderMap, fallback: Duration) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(fallback)
        .min(MAX_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde::Deserialize;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Price {
        symbol: String,
        price: String,
    }

    fn http_settings() -> HttpSettings {
        HttpSettings {
            timeout_seconds: 5,
            max_retries: 2,
            retry_base_delay_ms: 0,
            ssl_verify: true,
        }
    }

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new("test", &server.uri(), 4, &http_settings())
            .unwrap()
            .with_retry(RetryConfig::immediate(2))
    }

    #[tokio::test]
    async fn test_get_json_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .and(query_param("symbol", "SUIUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"symbol":"SUIUSDT","price":"1.2345"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let price: Price = client(&server)
            .get_json("/fapi/v1/ticker/price", &[("symbol", "SUIUSDT".to_string())])
            .await
            .unwrap();

        assert_eq!(price.symbol, "SUIUSDT");
        assert_eq!(price.price, "1.2345");
    }

    #[tokio::test]
    async fn test_honors_retry_after_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"symbol":"BTCUSDT","price":"67000"}"#))
            .mount(&server)
            .await;

        let price: Price = client(&server).get_json("/limited", &[]).await.unwrap();
        assert_eq!(price.symbol, "BTCUSDT");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"code":-1121,"msg":"Invalid symbol."}"#))
            .expect(1)
            .mount(&server)
            .await;

        let result: Result<Price, AppError> = client(&server).get_json("/fapi/v1/openInterest", &[]).await;
        match result {
            Err(AppError::HttpStatus(400, body)) => assert!(body.contains("Invalid symbol")),
            other => panic!("expected HTTP 400, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_retried_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let result: Result<Price, AppError> = client(&server).get_json("/down", &[]).await;
        assert!(matches!(result, Err(AppError::HttpStatus(503, _))));
    }

    #[tokio::test]
    async fn test_malformed_body_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let result: Result<Price, AppError> = client(&server).get_json("/html", &[]).await;
        assert!(matches!(result, Err(AppError::ExternalApiError(_))));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers, DEFAULT_RETRY_AFTER), DEFAULT_RETRY_AFTER);
        assert_eq!(retry_after(&headers, Duration::from_secs(10)), Duration::from_secs(10));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers, DEFAULT_RETRY_AFTER), Duration::from_secs(7));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(retry_after(&headers, DEFAULT_RETRY_AFTER), MAX_RETRY_AFTER);
    }

    #[test]
    fn test_base_url_must_be_http() {
        let settings = http_settings();

        let err = tokio_test::assert_err!(ApiClient::new("test", "not a url", 1, &settings));
        assert!(matches!(err, AppError::ConfigError(_)));
        let err = tokio_test::assert_err!(ApiClient::new("test", "ftp://fapi.binance.com", 1, &settings));
        assert!(matches!(err, AppError::ConfigError(_)));

        let client = tokio_test::assert_ok!(ApiClient::new("test", "https://fapi.binance.com/", 1, &settings));
        assert_eq!(client.base_url(), "https://fapi.binance.com");
    }
}
