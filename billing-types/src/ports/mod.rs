//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The application layer depends on these traits, not concrete implementations.

mod gateway;
mod repository;

pub use gateway::{
    GatewayError, ChargeRequest, PaymentAuthorization, PaymentGateway,
    PaymentVerification, ProviderPaymentStatus, TransferReceipt, TransferRecipient,
    TransferRecipientRequest, TransferRequest,
};
pub use repository::{
    EscrowRepository, OutboxRepository, PaymentRepository, PayoutAccountRepository, Scope,
    UnitOfWork, WalletRepository, WithdrawalRepository,
};
