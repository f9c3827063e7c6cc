use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::AppError;

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, AppError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| AppError::ConfigError(format!("Invalid LOG_LEVEL '{}': {}", settings.level, e))),
    }
}

/// Stdout in the configured format, plus a plain-text copy appended to
/// `settings.file` when one is set.
pub fn build_subscriber(
    settings: &LoggingSettings,
) -> Result<impl tracing::Subscriber + Send + Sync + 'static, AppError> {
    let filter = build_filter(settings)?;

    let stdout_layer = match settings.format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let file_layer = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AppError::ConfigError(format!("Cannot open log file {}: {}", path, e)))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer))
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), AppError> {
    let subscriber = build_subscriber(settings)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::InternalError(format!("Logging already initialized: {}", e)))?;

    info!("Logging initialized with level: {}", settings.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_layer_appends_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let settings = LoggingSettings {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file: Some(path.to_string_lossy().to_string()),
        };
        let subscriber = build_subscriber(&settings).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("stored 12 futures rows");
            tracing::debug!("hidden below info");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("previous run\n"));
        assert!(contents.contains("stored 12 futures rows"));
        assert!(!contents.contains("hidden below info"));
        assert!(!contents.contains("\u{1b}["));
    }

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let settings = LoggingSettings {
            level: "crypto_futures_collector=loud".to_string(),
            format: LogFormat::Json,
            file: None,
        };
        assert!(matches!(build_filter(&settings), Err(AppError::ConfigError(_))));
    }
}
