//! Error types for the billing service.
//!
//! Three layers: [`DomainError`] for rule violations inside aggregates and
//! value objects, [`RepoError`] for storage, and [`AppError`] for use-case
//! outcomes. `AppError` carries an explicit [`ErrorKind`] discriminant that
//! the HTTP adapter matches on.

use serde::{Deserialize, Serialize};

use crate::ports::GatewayError;

/// Domain-level errors (business rule violations).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Amount overflows the supported range")]
    AmountOverflow,

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("Escrow overfunded: expected {expected}, balance {balance}, requested {requested}")]
    EscrowOverfunded {
        expected: i64,
        balance: i64,
        requested: i64,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Which aggregate a write conflict was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConcurrencyKind {
    WalletModified,
    PaymentModified,
    EscrowModified,
    EventModified,
    /// The store refused a write because another transaction holds or
    /// already changed the data this one read.
    WriteConflict,
}

impl std::fmt::Display for ConcurrencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConcurrencyKind::WalletModified => "WALLET_MODIFIED",
            ConcurrencyKind::PaymentModified => "PAYMENT_MODIFIED",
            ConcurrencyKind::EscrowModified => "ESCROW_MODIFIED",
            ConcurrencyKind::EventModified => "EVENT_MODIFIED",
            ConcurrencyKind::WriteConflict => "WRITE_CONFLICT",
        };
        f.write_str(s)
    }
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A versioned row changed between read and write.
    #[error("Concurrent modification: {0}")]
    Concurrency(ConcurrencyKind),
}

/// Discriminant of [`AppError`], one per HTTP-visible category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Concurrency,
    Unauthorized,
    ExternalGateway,
    System,
}

/// Application-level errors returned by use-cases.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Escrow not found: {0}")]
    EscrowNotFound(String),

    #[error("Payout account not found for user {0}")]
    PayoutAccountNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Escrow overfunded: expected {expected}, balance {balance}, requested {requested}")]
    EscrowOverfunded {
        expected: i64,
        balance: i64,
        requested: i64,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification detected: {0}")]
    Concurrency(ConcurrencyKind),

    #[error("Webhook signature verification failed")]
    UnauthorizedWebhook,

    /// The caller identity the auth layer should have supplied is missing.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Payment provider error: {0}")]
    ExternalGateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::InsufficientFunds { .. } => ErrorKind::Validation,
            AppError::WalletNotFound(_)
            | AppError::PaymentNotFound(_)
            | AppError::ReferenceNotFound(_)
            | AppError::EscrowNotFound(_)
            | AppError::PayoutAccountNotFound(_)
            | AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::EscrowOverfunded { .. } | AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Concurrency(_) => ErrorKind::Concurrency,
            AppError::UnauthorizedWebhook | AppError::Unauthenticated(_) => {
                ErrorKind::Unauthorized
            }
            AppError::ExternalGateway(_) => ErrorKind::ExternalGateway,
            AppError::Internal(_) => ErrorKind::System,
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientFunds {
                available,
                requested,
            } => AppError::InsufficientFunds {
                available,
                requested,
            },
            DomainError::EscrowOverfunded {
                expected,
                balance,
                requested,
            } => AppError::EscrowOverfunded {
                expected,
                balance,
                requested,
            },
            DomainError::InvalidState(msg) => AppError::Conflict(msg),
            DomainError::NegativeAmount | DomainError::ZeroAmount | DomainError::AmountOverflow => {
                AppError::Validation(err.to_string())
            }
            DomainError::Validation(msg) => AppError::Validation(msg),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Conflict(msg) => AppError::Conflict(msg),
            RepoError::Concurrency(kind) => AppError::Concurrency(kind),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::ExternalGateway(err.to_string())
    }
}
