//! The module contains the errors the credit engine can throw.
use sea_orm::DbErr;
use thiserror::Error;

/// Credit engine custom errors.
#[derive(Error, Debug)]
pub enum CreditError {
    /// The deduction exceeds the current balance. Nothing was mutated.
    #[error("insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },
    /// An idempotency-key collision reported by the ledger store. Grant
    /// and deduct recover from this by returning the committed result.
    #[error("duplicate ledger entry for source \"{0}\"")]
    DuplicateEntry(String),
    #[error("\"{0}\" not found")]
    KeyNotFound(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for CreditError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::InsufficientCredits {
                    requested: a_req,
                    available: a_avail,
                },
                Self::InsufficientCredits {
                    requested: b_req,
                    available: b_avail,
                },
            ) => a_req == b_req && a_avail == b_avail,
            (Self::DuplicateEntry(a), Self::DuplicateEntry(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
