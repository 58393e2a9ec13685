//! Repository ports and the unit of work.
//!
//! A [`Scope`] is one open unit of work: every repository call made on it
//! participates in the same atomic transaction. Nothing is visible to other
//! scopes until [`Scope::commit`]; dropping a scope without committing
//! rolls everything back.

use crate::domain::{
    ContractId, EscrowAccount, EscrowId, EscrowTransaction, OutboxEvent, OutboxStatus, Payment,
    PaymentId, PayoutAccount, UserId, Wallet, WalletId, Withdrawal,
};
use crate::error::RepoError;

/// Wallet persistence.
///
/// `update_wallet` is an optimistic write: it fails with
/// `RepoError::Concurrency(WalletModified)` when the stored version differs
/// from `wallet.version`, and bumps `wallet.version` on success.
#[async_trait::async_trait]
pub trait WalletRepository: Send {
    /// Inserts a new wallet. A second wallet for the same user is a `Conflict`.
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), RepoError>;

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, RepoError>;

    async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>, RepoError>;

    async fn update_wallet(&mut self, wallet: &mut Wallet) -> Result<(), RepoError>;
}

#[async_trait::async_trait]
pub trait PaymentRepository: Send {
    /// Inserts a payment. Duplicate system references are a `Conflict`.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), RepoError>;

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, RepoError>;

    /// Exact-match lookup on the reference generated at initialization.
    async fn find_payment_by_system_reference(
        &mut self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError>;

    /// Exact-match lookup on the reference the provider assigned.
    async fn find_payment_by_provider_reference(
        &mut self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError>;

    /// Optimistic write, see [`WalletRepository::update_wallet`].
    async fn update_payment(&mut self, payment: &mut Payment) -> Result<(), RepoError>;
}

/// Escrow accounts and their ledger lines.
#[async_trait::async_trait]
pub trait EscrowRepository: Send {
    /// Inserts an escrow. A second escrow for the same contract is a `Conflict`.
    async fn insert_escrow(&mut self, escrow: &EscrowAccount) -> Result<(), RepoError>;

    async fn find_escrow(&mut self, id: EscrowId) -> Result<Option<EscrowAccount>, RepoError>;

    async fn find_escrow_by_contract(
        &mut self,
        contract_id: ContractId,
    ) -> Result<Option<EscrowAccount>, RepoError>;

    /// Optimistic write, see [`WalletRepository::update_wallet`].
    async fn update_escrow(&mut self, escrow: &mut EscrowAccount) -> Result<(), RepoError>;

    /// Appends a ledger line. Lines are never deleted.
    async fn insert_escrow_transaction(&mut self, entry: &EscrowTransaction)
    -> Result<(), RepoError>;

    /// Stores the settled status of a PENDING line. A line that already
    /// settled is `RepoError::Concurrency(EscrowModified)`.
    async fn settle_escrow_transaction(
        &mut self,
        entry: &EscrowTransaction,
    ) -> Result<(), RepoError>;

    /// Ledger lines of one escrow, oldest first.
    async fn list_escrow_transactions(
        &mut self,
        escrow_id: EscrowId,
    ) -> Result<Vec<EscrowTransaction>, RepoError>;
}

/// Verified payout destinations.
///
/// The store keeps at most one per user and never edits it. Whether callers
/// reuse the stored record or re-verify with the provider each time is
/// their decision; both work against this contract.
#[async_trait::async_trait]
pub trait PayoutAccountRepository: Send {
    /// Inserts a payout account. A second one for the same user is a `Conflict`.
    async fn insert_payout_account(&mut self, account: &PayoutAccount) -> Result<(), RepoError>;

    async fn find_payout_account_by_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<PayoutAccount>, RepoError>;
}

#[async_trait::async_trait]
pub trait WithdrawalRepository: Send {
    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), RepoError>;

    async fn list_withdrawals_for_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, RepoError>;
}

/// Durable event outbox.
#[async_trait::async_trait]
pub trait OutboxRepository: Send {
    async fn insert_event(&mut self, event: &OutboxEvent) -> Result<(), RepoError>;

    /// Pending events, oldest first.
    async fn pending_events(&mut self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError>;

    /// Records a dispatch attempt: sets `status`, `last_error` and
    /// `processed_at`, and increments `attempts`.
    ///
    /// Only pending events can be marked; anything else is
    /// `RepoError::Concurrency(EventModified)`.
    async fn mark_event(
        &mut self,
        id: uuid::Uuid,
        status: OutboxStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError>;
}

/// One open unit of work.
#[async_trait::async_trait]
pub trait Scope:
    WalletRepository
    + PaymentRepository
    + EscrowRepository
    + PayoutAccountRepository
    + WithdrawalRepository
    + OutboxRepository
    + Send
{
    /// Applies every write made through this scope atomically.
    async fn commit(self) -> Result<(), RepoError>;
}

/// Factory for units of work. Constructed once at startup and injected.
#[async_trait::async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    type Scope: Scope;

    async fn begin(&self) -> Result<Self::Scope, RepoError>;
}
