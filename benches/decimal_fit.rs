use std::str::FromStr;

use bigdecimal::BigDecimal;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crypto_futures_collector::{
    database::schema::{futures_data, spot_data},
    models::CreateFuturesData,
    services::converter::{convert_to_btc, extract_token_symbol, parse_decimal},
};

fn benchmark_decimal_fit(c: &mut Criterion) {
    let volume = BigDecimal::from_str("0.000125004999").unwrap();
    let price = BigDecimal::from_str("67123.456789012345").unwrap();

    c.bench_function("spot_volume_fit", |b| {
        b.iter(|| spot_data::VOLUME_BTC.fit(black_box(&volume)))
    });

    c.bench_function("price_usd_fit", |b| {
        b.iter(|| futures_data::PRICE_USD.fit(black_box(&price)))
    });

    let row = CreateFuturesData {
        open_interest_contracts: Some(BigDecimal::from_str("1234567.123456789").unwrap()),
        open_interest_usd: Some(BigDecimal::from_str("1851850.6851851835").unwrap()),
        funding_rate: Some(BigDecimal::from_str("0.000123456").unwrap()),
        volume_btc: Some(BigDecimal::from_str("10.123456789").unwrap()),
        volume_usd: Some(BigDecimal::from_str("456789012.345").unwrap()),
        price_usd: Some(BigDecimal::from_str("1.23456789012").unwrap()),
        market_cap_usd: Some(BigDecimal::from_str("4000000000.005").unwrap()),
        btc_price: Some(price.clone()),
        ..CreateFuturesData::for_pair(1)
    };

    c.bench_function("futures_row_normalize", |b| b.iter(|| black_box(&row).normalized()));
}

fn benchmark_conversions(c: &mut Criterion) {
    let volume_usd = BigDecimal::from_str("456789012.34").unwrap();
    let btc_price = BigDecimal::from_str("67123.45").unwrap();

    c.bench_function("convert_to_btc", |b| {
        b.iter(|| convert_to_btc(black_box(&volume_usd), black_box(&btc_price)))
    });

    c.bench_function("parse_decimal", |b| b.iter(|| parse_decimal(black_box("0.00012500"))));

    let symbols = ["SUIUSDT", "1000PEPEUSDT", "ETHBUSD", "BTCUSDC", "XRPUSD"];
    c.bench_function("extract_token_symbol", |b| {
        b.iter(|| {
            for symbol in symbols {
                black_box(extract_token_symbol(black_box(symbol)));
            }
        })
    });
}

criterion_group!(benches, benchmark_decimal_fit, benchmark_conversions);
criterion_main!(benches);
