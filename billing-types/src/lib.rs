//! # Billing Types
//!
//! Domain types and port traits for the billing and escrow service.
//! This crate has ZERO external IO dependencies - only data structures,
//! business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Value objects and aggregates (Money, Wallet, Payment, EscrowAccount)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API boundaries
//! - `error/` - Domain, repository and application error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    AccountNumber, Actor, BankCode, ContractId, Currency, DomainEvent, EscrowAccount, EscrowId,
    EscrowStatus, EscrowTransaction, EscrowTransactionStatus, EscrowTransactionType, Money,
    OutboxEvent, OutboxStatus, Payment, PaymentId, PaymentStatus, PayoutAccount, Role, Transition,
    UserId, Wallet, WalletId, WalletStatus, Withdrawal, ledger_balance,
};
pub use dto::*;
pub use error::{AppError, ConcurrencyKind, DomainError, ErrorKind, RepoError};
pub use ports::{PaymentGateway, Scope, UnitOfWork};
