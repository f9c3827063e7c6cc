use std::sync::Arc;
use std::time::Duration;

use crypto_futures_collector::{
    config::Settings,
    database::{create_database_if_not_exists, establish_connection, run_migrations, test_connection, PgMarketRepository},
    services::{BinanceClient, BybitClient, CoinMarketCapClient, ExchangeSource, FuturesDataCollector},
    utils::init_logging,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_logging(&settings.logging)?;
    info!("Starting crypto futures collector");

    if let Err(e) = settings.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    if settings.database.run_migrations {
        create_database_if_not_exists(&settings.database.url).await?;
    }

    let db_pool = establish_connection(&settings.database.url, &settings.database).await?;
    test_connection(&db_pool).await?;
    info!("Database connection established");

    if settings.database.run_migrations {
        run_migrations(&db_pool).await?;
    }

    let repository = Arc::new(PgMarketRepository::new(db_pool));
    let binance = Arc::new(BinanceClient::new(&settings.binance, &settings.http)?);
    let bybit = Arc::new(BybitClient::new(&settings.bybit, &settings.http)?);
    let coinmarketcap = Arc::new(CoinMarketCapClient::new(&settings.coinmarketcap, &settings.http)?);

    let sources = vec![
        ExchangeSource::new(binance, settings.binance.batch_size, settings.binance.batch_delay()),
        ExchangeSource::new(bybit, settings.bybit.batch_size, settings.bybit.batch_delay()),
    ];

    let collector = FuturesDataCollector::new(repository, sources, coinmarketcap, settings.coinmarketcap.cache_ttl());

    if settings.collector.interval_seconds == 0 {
        let report = collector.run_cycle().await?;
        info!(
            "Single cycle complete: {} futures rows, {} spot rows, {} API errors",
            report.futures_saved, report.spot_saved, report.api_errors_logged
        );
        return Ok(());
    }

    let interval = Duration::from_secs(settings.collector.interval_seconds);
    info!("Collecting every {} seconds", interval.as_secs());

    collector
        .run_forever(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Shutting down crypto futures collector");
    Ok(())
}
