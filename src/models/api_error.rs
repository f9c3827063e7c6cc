use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::schema;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApiErrorRecord {
    pub id: i32,
    pub exchange: String,
    pub endpoint: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateApiError {
    pub exchange: String,
    pub endpoint: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl CreateApiError {
    pub fn new(exchange: &str, endpoint: &str, error_code: &str, error_message: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            endpoint: endpoint.to_string(),
            error_code: Some(error_code.to_string()),
            error_message: Some(error_message.to_string()),
        }
    }

    pub fn from_error(exchange: &str, endpoint: &str, error: &AppError) -> Self {
        Self::new(exchange, endpoint, &error.error_code(), &error.to_string())
    }

    /// Truncates the free-text fields and checks the bounded ones.
    pub fn normalized(&self) -> Result<Self, AppError> {
        schema::api_errors::EXCHANGE.check(&self.exchange)?;
        schema::api_errors::ENDPOINT.check(&self.endpoint)?;

        let error_code = self.error_code.as_deref().map(|code| truncate_chars(code, schema::api_errors::ERROR_CODE.max_chars));
        let error_message = self
            .error_message
            .as_deref()
            .map(|message| truncate_chars(message, schema::API_ERROR_MESSAGE_MAX_CHARS));

        Ok(Self {
            exchange: self.exchange.clone(),
            endpoint: self.endpoint.clone(),
            error_code,
            error_message,
        })
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_truncated_on_char_boundary() {
        let message = "ошибка ".repeat(300);
        let record = CreateApiError::new("Bybit", "collect_data", "ERROR", &message).normalized().unwrap();
        assert_eq!(record.error_message.unwrap().chars().count(), 1000);
    }

    #[test]
    fn test_from_error_uses_error_code() {
        let record = CreateApiError::from_error("Binance", "collect_data", &AppError::HttpStatus(503, "maintenance".to_string()));
        assert_eq!(record.error_code.as_deref(), Some("503"));
        assert_eq!(record.error_message.as_deref(), Some("HTTP 503: maintenance"));
    }
}
