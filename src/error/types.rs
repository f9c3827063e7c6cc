use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of integrity rule a write broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
        }
    }
}

/// A rejected write, with enough context to tell which rule fired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind_name} constraint violated on {table}: {message}", kind_name = .kind.as_str())]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    pub table: String,
    pub constraint: Option<String>,
    pub message: String,
}

impl ConstraintViolation {
    pub fn unique(table: &str, constraint: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Unique,
            table: table.to_string(),
            constraint: Some(constraint.to_string()),
            message: message.into(),
        }
    }

    pub fn foreign_key(table: &str, constraint: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::ForeignKey,
            table: table.to_string(),
            constraint: Some(constraint.to_string()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppError {
    DatabaseError(String),
    ConstraintViolation(ConstraintViolation),
    ConfigError(String),
    ValidationError(String),
    NotFound(String),
    NetworkError(String),
    RateLimitError(String),
    HttpStatus(u16, String),
    ExternalApiError(String),
    InternalError(String),
}

impl AppError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::RateLimitError(_) => true,
            AppError::HttpStatus(status, _) => *status >= 500,
            _ => false,
        }
    }

    /// Short code stored in `api_errors.error_code`.
    pub fn error_code(&self) -> String {
        match self {
            AppError::HttpStatus(status, _) => status.to_string(),
            AppError::RateLimitError(_) => "429".to_string(),
            AppError::NetworkError(_) => "NETWORK".to_string(),
            AppError::ExternalApiError(_) => "API_ERROR".to_string(),
            AppError::DatabaseError(_) | AppError::ConstraintViolation(_) => "DATABASE".to_string(),
            AppError::ValidationError(_) => "VALIDATION".to_string(),
            _ => "ERROR".to_string(),
        }
    }

    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            AppError::ConstraintViolation(violation) => Some(violation.kind),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::ConstraintViolation(violation) => write!(f, "Constraint violation: {}", violation),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AppError::RateLimitError(msg) => write!(f, "Rate limit error: {}", msg),
            AppError::HttpStatus(status, msg) => write!(f, "HTTP {}: {}", status, msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<ConstraintViolation> for AppError {
    fn from(violation: ConstraintViolation) -> Self {
        AppError::ConstraintViolation(violation)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => classify_database_error(db_err.as_ref()),
            sqlx::Error::RowNotFound => AppError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => AppError::DatabaseError(format!("Connection problem: {}", err)),
            _ => AppError::DatabaseError(err.to_string()),
        }
    }
}

/// Maps a driver error onto the integrity rule (or data rule) it reports.
fn classify_database_error(db_err: &dyn sqlx::error::DatabaseError) -> AppError {
    use sqlx::error::ErrorKind;

    let kind = match db_err.kind() {
        ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
        ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
        ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
        ErrorKind::CheckViolation => Some(ConstraintKind::Check),
        _ => None,
    };

    if let Some(kind) = kind {
        return AppError::ConstraintViolation(ConstraintViolation {
            kind,
            table: db_err.table().unwrap_or("unknown").to_string(),
            constraint: db_err.constraint().map(str::to_string),
            message: db_err.message().to_string(),
        });
    }

    match db_err.code().as_deref() {
        // string_data_right_truncation, numeric_value_out_of_range
        Some("22001") | Some("22003") => AppError::ValidationError(db_err.message().to_string()),
        _ => AppError::DatabaseError(db_err.message().to_string()),
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(format!("Migration failed: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AppError::NetworkError(err.to_string())
        } else if let Some(status) = err.status() {
            AppError::HttpStatus(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            AppError::ExternalApiError(format!("Malformed response: {}", err))
        } else {
            AppError::InternalError(format!("HTTP request error: {}", err))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ExternalApiError(format!("JSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::NetworkError("reset".to_string()).is_transient());
        assert!(AppError::RateLimitError("slow down".to_string()).is_transient());
        assert!(AppError::HttpStatus(503, "unavailable".to_string()).is_transient());
        assert!(!AppError::HttpStatus(400, "bad symbol".to_string()).is_transient());
        assert!(!AppError::ValidationError("too long".to_string()).is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::HttpStatus(418, "teapot".to_string()).error_code(), "418");
        assert_eq!(AppError::RateLimitError("x".to_string()).error_code(), "429");
        assert_eq!(AppError::ExternalApiError("x".to_string()).error_code(), "API_ERROR");
        assert_eq!(AppError::ConfigError("x".to_string()).error_code(), "ERROR");
    }

    #[test]
    fn test_constraint_violation_display() {
        let err: AppError = ConstraintViolation::unique("tokens", "uq_tokens_symbol", "symbol SUI already exists").into();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::Unique));
        assert_eq!(
            err.to_string(),
            "Constraint violation: unique constraint violated on tokens: symbol SUI already exists"
        );
    }
}
