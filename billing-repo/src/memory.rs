//! In-memory storage adapter.
//!
//! Each [`MemoryScope`] works on a private snapshot of the committed state
//! and records every write it makes. On commit the writes are replayed
//! against the current committed state under the same checks (unique keys,
//! versions, pending-only outbox marks), so a scope that raced another one
//! fails with the same errors the SQL adapter produces. Commit yields to
//! the runtime before replaying, so concurrent use-cases interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use billing_types::ports::{
    EscrowRepository, OutboxRepository, PaymentRepository, PayoutAccountRepository,
    WalletRepository, WithdrawalRepository,
};
use billing_types::{
    ConcurrencyKind, ContractId, EscrowAccount, EscrowId, EscrowTransaction,
    EscrowTransactionStatus, OutboxEvent, OutboxStatus, Payment, PaymentId, PayoutAccount, RepoError, Scope, UnitOfWork, UserId, Wallet,
    WalletId, Withdrawal,
};

#[derive(Debug, Clone, Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    payments: HashMap<PaymentId, Payment>,
    escrows: HashMap<EscrowId, EscrowAccount>,
    escrow_transactions: Vec<EscrowTransaction>,
    payout_accounts: HashMap<UserId, PayoutAccount>,
    withdrawals: Vec<Withdrawal>,
    outbox: Vec<OutboxEvent>,
}

/// A write recorded by a scope, replayed on commit.
#[derive(Debug, Clone)]
enum Op {
    InsertWallet(Wallet),
    UpdateWallet(Wallet),
    InsertPayment(Payment),
    UpdatePayment(Payment),
    InsertEscrow(EscrowAccount),
    UpdateEscrow(EscrowAccount),
    InsertEscrowTransaction(EscrowTransaction),
    SettleEscrowTransaction(EscrowTransaction),
    InsertPayoutAccount(PayoutAccount),
    InsertWithdrawal(Withdrawal),
    InsertEvent(OutboxEvent),
    MarkEvent {
        id: Uuid,
        status: OutboxStatus,
        last_error: Option<String>,
        at: DateTime<Utc>,
    },
}

fn conflict(what: &str) -> RepoError {
    RepoError::Conflict(format!("{} already exists", what))
}

impl State {
    fn apply(&mut self, op: &Op) -> Result<(), RepoError> {
        match op {
            Op::InsertWallet(wallet) => {
                if self.wallets.contains_key(&wallet.id)
                    || self.wallets.values().any(|w| w.user_id == wallet.user_id)
                {
                    return Err(conflict("Wallet"));
                }
                self.wallets.insert(wallet.id, wallet.clone());
            }
            Op::UpdateWallet(wallet) => {
                let stored = self
                    .wallets
                    .get_mut(&wallet.id)
                    .filter(|stored| stored.version + 1 == wallet.version)
                    .ok_or(RepoError::Concurrency(ConcurrencyKind::WalletModified))?;
                *stored = wallet.clone();
            }
            Op::InsertPayment(payment) => {
                let duplicate = self.payments.values().any(|p| {
                    p.id == payment.id
                        || p.system_reference == payment.system_reference
                        || (payment.provider_reference.is_some()
                            && p.provider_reference == payment.provider_reference)
                });
                if duplicate {
                    return Err(conflict("Payment"));
                }
                self.payments.insert(payment.id, payment.clone());
            }
            Op::UpdatePayment(payment) => {
                let taken = payment.provider_reference.is_some()
                    && self.payments.values().any(|p| {
                        p.id != payment.id && p.provider_reference == payment.provider_reference
                    });
                if taken {
                    return Err(conflict("Provider reference"));
                }
                let stored = self
                    .payments
                    .get_mut(&payment.id)
                    .filter(|stored| stored.version + 1 == payment.version)
                    .ok_or(RepoError::Concurrency(ConcurrencyKind::PaymentModified))?;
                *stored = payment.clone();
            }
            Op::InsertEscrow(escrow) => {
                if self.escrows.contains_key(&escrow.id)
                    || self
                        .escrows
                        .values()
                        .any(|e| e.contract_id == escrow.contract_id)
                {
                    return Err(conflict("Escrow"));
                }
                self.escrows.insert(escrow.id, escrow.clone());
            }
            Op::UpdateEscrow(escrow) => {
                let stored = self
                    .escrows
                    .get_mut(&escrow.id)
                    .filter(|stored| stored.version + 1 == escrow.version)
                    .ok_or(RepoError::Concurrency(ConcurrencyKind::EscrowModified))?;
                *stored = escrow.clone();
            }
            Op::InsertEscrowTransaction(entry) => {
                if !self.escrows.contains_key(&entry.escrow_id) {
                    return Err(RepoError::NotFound);
                }
                if self
                    .escrow_transactions
                    .iter()
                    .any(|e| e.id == entry.id || e.reference == entry.reference)
                {
                    return Err(conflict("Escrow transaction"));
                }
                self.escrow_transactions.push(entry.clone());
            }
            Op::SettleEscrowTransaction(entry) => {
                let stored = self
                    .escrow_transactions
                    .iter_mut()
                    .find(|e| e.id == entry.id && e.status == EscrowTransactionStatus::Pending)
                    .ok_or(RepoError::Concurrency(ConcurrencyKind::EscrowModified))?;
                stored.status = entry.status;
            }
            Op::InsertPayoutAccount(account) => {
                if self.payout_accounts.contains_key(&account.user_id) {
                    return Err(conflict("Payout account"));
                }
                self.payout_accounts.insert(account.user_id, account.clone());
            }
            Op::InsertWithdrawal(withdrawal) => {
                if self
                    .withdrawals
                    .iter()
                    .any(|w| w.id == withdrawal.id || w.reference == withdrawal.reference)
                {
                    return Err(conflict("Withdrawal"));
                }
                self.withdrawals.push(withdrawal.clone());
            }
            Op::InsertEvent(event) => {
                if self.outbox.iter().any(|e| e.id == event.id) {
                    return Err(conflict("Event"));
                }
                self.outbox.push(event.clone());
            }
            Op::MarkEvent {
                id,
                status,
                last_error,
                at,
            } => {
                let event = self
                    .outbox
                    .iter_mut()
                    .find(|e| e.id == *id && e.status == OutboxStatus::Pending)
                    .ok_or(RepoError::Concurrency(ConcurrencyKind::EventModified))?;
                event.status = *status;
                event.last_error = last_error.clone();
                event.processed_at = Some(*at);
                event.attempts += 1;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local unit-of-work factory. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<State, RepoError> {
        self.committed
            .lock()
            .map(|state| state.clone())
            .map_err(|e| RepoError::Transaction(e.to_string()))
    }

    /// Every committed outbox row, in insertion order.
    pub fn outbox_events(&self) -> Result<Vec<OutboxEvent>, RepoError> {
        Ok(self.snapshot()?.outbox)
    }

    /// Every committed ledger line of one escrow, in insertion order.
    pub fn escrow_transactions(&self, escrow_id: EscrowId) -> Result<Vec<EscrowTransaction>, RepoError> {
        Ok(self
            .snapshot()?
            .escrow_transactions
            .into_iter()
            .filter(|e| e.escrow_id == escrow_id)
            .collect())
    }
}

#[async_trait]
impl UnitOfWork for MemoryStore {
    type Scope = MemoryScope;

    async fn begin(&self) -> Result<MemoryScope, RepoError> {
        Ok(MemoryScope {
            committed: Arc::clone(&self.committed),
            view: self.snapshot()?,
            ops: Vec::new(),
        })
    }
}

/// One open in-memory unit of work.
pub struct MemoryScope {
    committed: Arc<Mutex<State>>,
    view: State,
    ops: Vec<Op>,
}

impl MemoryScope {
    fn record(&mut self, op: Op) -> Result<(), RepoError> {
        self.view.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl Scope for MemoryScope {
    async fn commit(self) -> Result<(), RepoError> {
        // other tasks may commit first, as they would against a database
        tokio::task::yield_now().await;

        let mut committed = self
            .committed
            .lock()
            .map_err(|e| RepoError::Transaction(e.to_string()))?;

        let mut next = committed.clone();
        for op in &self.ops {
            next.apply(op)?;
        }
        *committed = next;
        Ok(())
    }
}

#[async_trait]
impl WalletRepository for MemoryScope {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), RepoError> {
        self.record(Op::InsertWallet(wallet.clone()))
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, RepoError> {
        Ok(self.view.wallets.get(&id).cloned())
    }

    async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>, RepoError> {
        Ok(self
            .view
            .wallets
            .values()
            .find(|w| w.user_id == user_id)
            .cloned())
    }

    async fn update_wallet(&mut self, wallet: &mut Wallet) -> Result<(), RepoError> {
        let mut next = wallet.clone();
        next.version += 1;
        self.record(Op::UpdateWallet(next))?;
        wallet.version += 1;
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryScope {
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), RepoError> {
        self.record(Op::InsertPayment(payment.clone()))
    }

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        Ok(self.view.payments.get(&id).cloned())
    }

    async fn find_payment_by_system_reference(
        &mut self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError> {
        Ok(self
            .view
            .payments
            .values()
            .find(|p| p.system_reference == reference)
            .cloned())
    }

    async fn find_payment_by_provider_reference(
        &mut self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError> {
        Ok(self
            .view
            .payments
            .values()
            .find(|p| p.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<(), RepoError> {
        let mut next = payment.clone();
        next.version += 1;
        self.record(Op::UpdatePayment(next))?;
        payment.version += 1;
        Ok(())
    }
}

#[async_trait]
impl EscrowRepository for MemoryScope {
    async fn insert_escrow(&mut self, escrow: &EscrowAccount) -> Result<(), RepoError> {
        self.record(Op::InsertEscrow(escrow.clone()))
    }

    async fn find_escrow(&mut self, id: EscrowId) -> Result<Option<EscrowAccount>, RepoError> {
        Ok(self.view.escrows.get(&id).cloned())
    }

    async fn find_escrow_by_contract(
        &mut self,
        contract_id: ContractId,
    ) -> Result<Option<EscrowAccount>, RepoError> {
        Ok(self
            .view
            .escrows
            .values()
            .find(|e| e.contract_id == contract_id)
            .cloned())
    }

    async fn update_escrow(&mut self, escrow: &mut EscrowAccount) -> Result<(), RepoError> {
        let mut next = escrow.clone();
        next.version += 1;
        self.record(Op::UpdateEscrow(next))?;
        escrow.version += 1;
        Ok(())
    }

    async fn insert_escrow_transaction(
        &mut self,
        entry: &EscrowTransaction,
    ) -> Result<(), RepoError> {
        self.record(Op::InsertEscrowTransaction(entry.clone()))
    }

    async fn settle_escrow_transaction(
        &mut self,
        entry: &EscrowTransaction,
    ) -> Result<(), RepoError> {
        self.record(Op::SettleEscrowTransaction(entry.clone()))
    }

    async fn list_escrow_transactions(
        &mut self,
        escrow_id: EscrowId,
    ) -> Result<Vec<EscrowTransaction>, RepoError> {
        Ok(self
            .view
            .escrow_transactions
            .iter()
            .filter(|e| e.escrow_id == escrow_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PayoutAccountRepository for MemoryScope {
    async fn insert_payout_account(&mut self, account: &PayoutAccount) -> Result<(), RepoError> {
        self.record(Op::InsertPayoutAccount(account.clone()))
    }

    async fn find_payout_account_by_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<PayoutAccount>, RepoError> {
        Ok(self.view.payout_accounts.get(&user_id).cloned())
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryScope {
    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), RepoError> {
        self.record(Op::InsertWithdrawal(withdrawal.clone()))
    }

    async fn list_withdrawals_for_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, RepoError> {
        let mut found: Vec<Withdrawal> = self
            .view
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }
}

#[async_trait]
impl OutboxRepository for MemoryScope {
    async fn insert_event(&mut self, event: &OutboxEvent) -> Result<(), RepoError> {
        self.record(Op::InsertEvent(event.clone()))
    }

    async fn pending_events(&mut self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .view
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_event(
        &mut self,
        id: Uuid,
        status: OutboxStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError> {
        self.record(Op::MarkEvent {
            id,
            status,
            last_error,
            at: Utc::now(),
        })
    }
}
