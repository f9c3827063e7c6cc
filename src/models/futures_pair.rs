use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::schema;
use crate::error::AppError;

/// Contract kind stored in `futures_pairs.contract_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractType {
    Perpetual,
    Spot,
    Other(String),
}

impl ContractType {
    pub fn as_str(&self) -> &str {
        match self {
            ContractType::Perpetual => "PERPETUAL",
            ContractType::Spot => "SPOT",
            ContractType::Other(value) => value.as_str(),
        }
    }
}

impl Default for ContractType {
    fn default() -> Self {
        ContractType::Perpetual
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FuturesPair {
    pub id: i32,
    pub token_id: i32,
    pub exchange: String,
    pub pair_symbol: String,
    pub contract_type: String,
    pub created_at: DateTime<Utc>,
}

/// A pair row joined with the symbol of its token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FuturesPairWithToken {
    pub id: i32,
    pub token_id: i32,
    pub exchange: String,
    pub pair_symbol: String,
    pub contract_type: String,
    pub created_at: DateTime<Utc>,
    pub token_symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFuturesPair {
    pub token_id: i32,
    pub exchange: String,
    pub pair_symbol: String,
    pub contract_type: ContractType,
}

impl CreateFuturesPair {
    pub fn perpetual(token_id: i32, exchange: &str, pair_symbol: &str) -> Self {
        Self {
            token_id,
            exchange: exchange.to_string(),
            pair_symbol: pair_symbol.to_string(),
            contract_type: ContractType::Perpetual,
        }
    }

    pub fn spot(token_id: i32, exchange: &str, pair_symbol: &str) -> Self {
        Self {
            contract_type: ContractType::Spot,
            ..Self::perpetual(token_id, exchange, pair_symbol)
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.exchange.trim().is_empty() || self.pair_symbol.trim().is_empty() {
            return Err(AppError::ValidationError("exchange and pair_symbol must not be empty".to_string()));
        }
        schema::futures_pairs::EXCHANGE.check(&self.exchange)?;
        schema::futures_pairs::PAIR_SYMBOL.check(&self.pair_symbol)?;
        schema::futures_pairs::CONTRACT_TYPE.check(self.contract_type.as_str())?;
        Ok(())
    }
}
