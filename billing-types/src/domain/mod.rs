//! Domain models for the billing service.

pub mod actor;
pub mod bank;
pub mod escrow;
pub mod event;
pub mod ids;
pub mod money;
pub mod payment;
pub mod payout;
pub mod wallet;

pub use actor::{Actor, Role};
pub use bank::{AccountNumber, BankCode};
pub use escrow::{
    EscrowAccount, EscrowStatus, EscrowTransaction, EscrowTransactionStatus,
    EscrowTransactionType, ledger_balance,
};
pub use event::{DomainEvent, OutboxEvent, OutboxStatus};
pub use ids::{
    ContractId, EscrowId, EscrowTransactionId, PaymentId, PayoutAccountId, UserId, WalletId,
    WithdrawalId,
};
pub use money::{Currency, Money};
pub use payment::{Payment, PaymentStatus, Transition, generate_reference};
pub use payout::{PayoutAccount, Withdrawal};
pub use wallet::{Wallet, WalletStatus};
