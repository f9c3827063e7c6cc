use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bigdecimal::{BigDecimal, Zero};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::database::MarketRepository;
use crate::error::AppError;
use crate::models::{CmcQuote, CreateApiError, CreateFuturesData, CreateFuturesPair, CreateSpotData};
use crate::services::coinmarketcap::QuoteProvider;
use crate::services::converter::{convert_to_btc, extract_token_from_spot_pair, extract_token_symbol, normalize_symbol};
use crate::services::exchanges::{ExchangeClient, PairListing, PairSnapshot, SpotSnapshot};

pub const QUOTE_PROVIDER_NAME: &str = "CoinMarketCap";
pub const FUTURES_ENDPOINT: &str = "collect_data";
pub const SPOT_ENDPOINT: &str = "collect_spot_data";
pub const QUOTES_ENDPOINT: &str = "quotes_latest";
pub const BTC: &str = "BTC";

/// An exchange together with how hard the collector may hit it.
#[derive(Clone)]
pub struct ExchangeSource {
    pub client: Arc<dyn ExchangeClient>,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl ExchangeSource {
    pub fn new(client: Arc<dyn ExchangeClient>, batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }
}

/// What one collection cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub futures_collected: usize,
    pub spot_collected: usize,
    pub futures_saved: usize,
    pub spot_saved: usize,
    pub save_errors: usize,
    pub api_errors_logged: usize,
    pub quotes_from_cache: usize,
    pub quotes_fetched: usize,
    pub duration_ms: u64,
}

/// Pulls exchange and quote data and appends it to the market schema.
pub struct FuturesDataCollector {
    repository: Arc<dyn MarketRepository>,
    sources: Vec<ExchangeSource>,
    quotes: Arc<dyn QuoteProvider>,
    cache_ttl: Duration,
}

impl FuturesDataCollector {
    pub fn new(
        repository: Arc<dyn MarketRepository>,
        sources: Vec<ExchangeSource>,
        quotes: Arc<dyn QuoteProvider>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            sources,
            quotes,
            cache_ttl,
        }
    }

    /// Runs one full cycle. Source failures are logged to `api_errors` and
    /// the cycle carries on with whatever was collected.
    pub async fn run_cycle(&self) -> Result<CycleReport, AppError> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        info!("Starting collection cycle");

        let futures_results = join_all(self.sources.iter().map(|source| self.collect_futures(source))).await;
        let mut futures_snapshots = Vec::new();
        for result in futures_results {
            report.api_errors_logged += usize::from(result.error_logged);
            futures_snapshots.extend(result.items);
        }
        report.futures_collected = futures_snapshots.len();
        info!("Collected {} futures snapshots", report.futures_collected);

        let spot_results = join_all(self.sources.iter().map(|source| self.collect_spot(source))).await;
        let mut spot_snapshots = Vec::new();
        for result in spot_results {
            report.api_errors_logged += usize::from(result.error_logged);
            spot_snapshots.extend(result.items);
        }
        report.spot_collected = spot_snapshots.len();
        info!("Collected {} spot snapshots", report.spot_collected);

        let mut symbols: BTreeSet<String> = futures_snapshots.iter().filter_map(futures_token_symbol).collect();
        symbols.insert(BTC.to_string());
        let symbols: Vec<String> = symbols.into_iter().collect();

        let quotes = self.load_quotes(&symbols, &mut report).await;

        self.save_futures(&futures_snapshots, &quotes, &mut report).await;
        self.save_spot(&spot_snapshots, &mut report).await;

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Cycle finished in {} ms: {} futures rows, {} spot rows, {} save errors",
            report.duration_ms, report.futures_saved, report.spot_saved, report.save_errors
        );
        Ok(report)
    }

    /// Runs cycles every `interval` until `shutdown` resolves.
    pub async fn run_forever<S>(&self, interval: Duration, shutdown: S) -> Result<(), AppError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        error!("Collection cycle failed: {}", e);
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, abandoning current cycle");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Empty when the pair list itself could not be fetched.
    async fn collect_futures(&self, source: &ExchangeSource) -> Collected<PairSnapshot> {
        let client = source.client.as_ref();
        let exchange = client.exchange();

        let listings = match client.futures_pairs().await {
            Ok(listings) => listings,
            Err(e) => {
                error!("Failed to list {} futures pairs: {}", exchange, e);
                return Collected::failed(self.log_api_error(exchange.as_str(), FUTURES_ENDPOINT, &e).await);
            }
        };

        Collected::ok(in_batches(source, &listings, |listing| client.collect_pair(listing)).await)
    }

    async fn collect_spot(&self, source: &ExchangeSource) -> Collected<SpotSnapshot> {
        let client = source.client.as_ref();
        let exchange = client.exchange();

        let listings = match client.spot_pairs().await {
            Ok(listings) => listings,
            Err(e) => {
                error!("Failed to list {} spot pairs: {}", exchange, e);
                return Collected::failed(self.log_api_error(exchange.as_str(), SPOT_ENDPOINT, &e).await);
            }
        };

        Collected::ok(in_batches(source, &listings, |listing| client.collect_spot_pair(listing)).await)
    }

    /// Fresh cache rows first; everything else from the provider, written
    /// back to the cache.
    async fn load_quotes(&self, symbols: &[String], report: &mut CycleReport) -> HashMap<String, CmcQuote> {
        let mut quotes: HashMap<String, CmcQuote> = match self.repository.fresh_cmc_cache(symbols, self.cache_ttl).await {
            Ok(cached) => cached.into_iter().map(|(symbol, entry)| (symbol, entry.to_quote())).collect(),
            Err(e) => {
                warn!("Quote cache unavailable: {}", e);
                HashMap::new()
            }
        };
        report.quotes_from_cache = quotes.len();

        let missing: Vec<String> = symbols.iter().filter(|s| !quotes.contains_key(*s)).cloned().collect();
        if missing.is_empty() {
            debug!("All {} quotes served from cache", quotes.len());
            return quotes;
        }

        match self.quotes.quotes(&missing).await {
            Ok(fetched) => {
                report.quotes_fetched = fetched.len();
                for (symbol, quote) in fetched {
                    match self.repository.upsert_cmc_cache(&quote).await {
                        Ok(entry) => {
                            quotes.insert(symbol, entry.to_quote());
                        }
                        Err(e) => {
                            warn!("Could not cache quote for {}: {}", symbol, e);
                            quotes.insert(symbol, quote);
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to fetch quotes: {}", e);
                if self.log_api_error(QUOTE_PROVIDER_NAME, QUOTES_ENDPOINT, &e).await {
                    report.api_errors_logged += 1;
                }
            }
        }

        quotes
    }

    async fn save_futures(&self, snapshots: &[PairSnapshot], quotes: &HashMap<String, CmcQuote>, report: &mut CycleReport) {
        let btc_price = quotes.get(BTC).and_then(|q| q.price_usd.clone());

        for snapshot in snapshots {
            let Some(token_symbol) = futures_token_symbol(snapshot) else {
                continue;
            };

            match self.save_futures_snapshot(snapshot, &token_symbol, quotes.get(&token_symbol), btc_price.as_ref()).await {
                Ok(_) => report.futures_saved += 1,
                Err(e) => {
                    error!("Failed to save {} {}: {}", snapshot.exchange, snapshot.symbol, e);
                    report.save_errors += 1;
                }
            }
        }
    }

    async fn save_futures_snapshot(
        &self,
        snapshot: &PairSnapshot,
        token_symbol: &str,
        quote: Option<&CmcQuote>,
        btc_price: Option<&BigDecimal>,
    ) -> Result<i64, AppError> {
        let token_id = self.repository.get_or_create_token(token_symbol).await?;
        let pair_id = self
            .repository
            .get_or_create_futures_pair(&CreateFuturesPair::perpetual(token_id, snapshot.exchange.as_str(), &snapshot.symbol))
            .await?;

        let volume_btc = match (&snapshot.volume_24h, btc_price) {
            (Some(volume), Some(btc)) if !btc.is_zero() => Some(convert_to_btc(volume, btc)),
            _ => None,
        };

        let data = CreateFuturesData {
            open_interest_contracts: snapshot.open_interest_contracts.clone(),
            open_interest_usd: snapshot.open_interest_usd.clone(),
            funding_rate: snapshot.funding_rate.clone(),
            volume_btc,
            volume_usd: quote.and_then(|q| q.volume_24h_usd.clone()),
            price_usd: quote.and_then(|q| q.price_usd.clone()),
            market_cap_usd: quote.and_then(|q| q.market_cap_usd.clone()),
            btc_price: btc_price.cloned(),
            ..CreateFuturesData::for_pair(pair_id)
        };

        debug!(
            "Saving {} {}: oi_usd={:?} price_usd={:?}",
            snapshot.exchange, snapshot.symbol, data.open_interest_usd, data.price_usd
        );
        self.repository.insert_futures_data(&data).await
    }

    async fn save_spot(&self, snapshots: &[SpotSnapshot], report: &mut CycleReport) {
        for snapshot in snapshots {
            let Some(token_symbol) = spot_token_symbol(snapshot) else {
                continue;
            };

            match self.save_spot_snapshot(snapshot, &token_symbol).await {
                Ok(_) => report.spot_saved += 1,
                Err(e) => {
                    error!("Failed to save spot {} {}: {}", snapshot.exchange, snapshot.symbol, e);
                    report.save_errors += 1;
                }
            }
        }
    }

    async fn save_spot_snapshot(&self, snapshot: &SpotSnapshot, token_symbol: &str) -> Result<i64, AppError> {
        let token_id = self.repository.get_or_create_token(token_symbol).await?;
        let pair_id = self
            .repository
            .get_or_create_futures_pair(&CreateFuturesPair::spot(token_id, snapshot.exchange.as_str(), &snapshot.symbol))
            .await?;

        self.repository
            .insert_spot_data(&CreateSpotData {
                pair_id,
                timestamp: None,
                volume_btc: snapshot.volume_btc.clone(),
            })
            .await
    }

    /// Writes an `api_errors` row; `true` when it was stored.
    async fn log_api_error(&self, exchange: &str, endpoint: &str, error: &AppError) -> bool {
        let record = CreateApiError::from_error(exchange, endpoint, error);
        match self.repository.record_api_error(&record).await {
            Ok(_) => true,
            Err(e) => {
                error!("Could not record API error for {}: {}", exchange, e);
                false
            }
        }
    }
}

/// Snapshots from one source, and whether a listing failure was recorded.
struct Collected<T> {
    items: Vec<T>,
    error_logged: bool,
}

impl<T> Collected<T> {
    fn ok(items: Vec<T>) -> Self {
        Self {
            items,
            error_logged: false,
        }
    }

    fn failed(error_logged: bool) -> Self {
        Self {
            items: Vec::new(),
            error_logged,
        }
    }
}

/// Collects `listings` in batches of `source.batch_size`, pausing
/// `source.batch_delay` between batches. Failed pairs are logged and skipped.
async fn in_batches<'a, T, F, Fut>(source: &ExchangeSource, listings: &'a [PairListing], collect: F) -> Vec<T>
where
    F: Fn(&'a PairListing) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let exchange = source.client.exchange();
    let batch_count = listings.len().div_ceil(source.batch_size);
    let mut collected = Vec::with_capacity(listings.len());

    for (index, batch) in listings.chunks(source.batch_size).enumerate() {
        let results = join_all(batch.iter().map(&collect)).await;

        for (listing, result) in batch.iter().zip(results) {
            match result {
                Ok(value) => collected.push(value),
                Err(e) => warn!("Skipping {} {}: {}", exchange, listing.symbol, e),
            }
        }

        if index + 1 < batch_count && !source.batch_delay.is_zero() {
            tokio::time::sleep(source.batch_delay).await;
        }
    }

    collected
}

fn futures_token_symbol(snapshot: &PairSnapshot) -> Option<String> {
    match &snapshot.base_asset {
        Some(base) if !base.trim().is_empty() => Some(normalize_symbol(base)),
        _ => extract_token_symbol(&snapshot.symbol),
    }
}

fn spot_token_symbol(snapshot: &SpotSnapshot) -> Option<String> {
    match &snapshot.base_asset {
        Some(base) if !base.trim().is_empty() => Some(normalize_symbol(base)),
        _ => extract_token_from_spot_pair(&snapshot.symbol),
    }
}
