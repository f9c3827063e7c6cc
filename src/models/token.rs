use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::schema;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: i32,
    pub symbol: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical form of a token symbol: trimmed and upper-cased.
pub fn normalize_token_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Normalizes and validates a symbol before it reaches `tokens`.
pub fn prepare_token_symbol(symbol: &str) -> Result<String, AppError> {
    let symbol = normalize_token_symbol(symbol);
    if symbol.is_empty() {
        return Err(AppError::ValidationError("token symbol must not be empty".to_string()));
    }
    schema::tokens::SYMBOL.check(&symbol)?;
    Ok(symbol)
}
