pub mod coinmarketcap;
pub mod collector;
pub mod converter;
pub mod exchanges;
pub mod http;

pub use coinmarketcap::{CoinMarketCapClient, QuoteProvider};
pub use collector::{CycleReport, ExchangeSource, FuturesDataCollector};
pub use exchanges::{BinanceClient, BybitClient, Exchange, ExchangeClient, PairListing, PairSnapshot, SpotSnapshot};
pub use http::ApiClient;
