//! Error types for Dispatch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Geo/cost validation
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Distance {km:.2} km is outside the deliverable range of 1-1000 km")]
    InvalidDistance { km: f64 },

    #[error("Origin and destination must be different locations")]
    SameOriginAndDestination,

    #[error("Invalid delivery cost: {0}")]
    InvalidCost(String),

    #[error("Discount must be between 0 and 100 percent, got {0}")]
    InvalidDiscount(f64),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    // Order lifecycle
    #[error("Cannot change order status from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    // Entity validation
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Persistence
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("A transaction is already in progress.")]
    TransactionAlreadyActive,

    #[error("No transaction in progress to {0}.")]
    NoActiveTransaction(&'static str),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether repeating the operation with fresh state can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict(_))
    }

    /// Whether the error comes from a domain rule rather than infrastructure.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::InvalidCoordinate(_)
                | Error::InvalidDistance { .. }
                | Error::SameOriginAndDestination
                | Error::InvalidCost(_)
                | Error::InvalidDiscount(_)
                | Error::InvalidQuantity(_)
                | Error::InvalidStatusTransition { .. }
                | Error::Validation(_)
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_concurrency_conflicts_are_retryable() {
        assert!(Error::ConcurrencyConflict("order".into()).is_retryable());
        assert!(!Error::TransactionAlreadyActive.is_retryable());
        assert!(!Error::Database("down".into()).is_retryable());
    }

    #[test]
    fn test_transaction_messages() {
        assert_eq!(
            Error::TransactionAlreadyActive.to_string(),
            "A transaction is already in progress."
        );
        assert_eq!(
            Error::NoActiveTransaction("commit").to_string(),
            "No transaction in progress to commit."
        );
    }
}
