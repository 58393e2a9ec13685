//! SQLite storage adapter.
//!
//! A [`SqliteScope`] wraps one `sqlx` transaction; dropping it without
//! [`Scope::commit`] rolls back. Aggregate updates are versioned:
//! `UPDATE ... WHERE id = ? AND version = ?` affecting zero rows means
//! another transaction got there first.
//!
//! File databases run in WAL mode, so readers never block a commit. A
//! transaction whose snapshot went stale before its first write gets
//! `SQLITE_BUSY_SNAPSHOT`, which surfaces as a retryable
//! `RepoError::Concurrency(WriteConflict)` like a version mismatch does.
#![allow(clippy::collapsible_if)]

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use billing_types::ports::{
    EscrowRepository, OutboxRepository, PaymentRepository, PayoutAccountRepository,
    WalletRepository, WithdrawalRepository,
};
use billing_types::{
    ConcurrencyKind, ContractId, EscrowAccount, EscrowId, EscrowTransaction, OutboxEvent,
    OutboxStatus, Payment, PaymentId, PayoutAccount, RepoError, Scope, UnitOfWork, UserId, Wallet,
    WalletId, Withdrawal,
};

use crate::types::{
    DbEscrow, DbEscrowTransaction, DbOutboxEvent, DbPayment, DbPayoutAccount, DbWallet,
    DbWithdrawal, format_time,
};

const SCHEMA: &str = include_str!("../migrations/0001_create_tables.sql");

const SQLITE_BUSY: i32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// True for `SQLITE_BUSY` and its extended codes (`BUSY_SNAPSHOT` = 517).
fn is_busy(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| c & 0xff == SQLITE_BUSY)
}

fn db_err(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepoError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if is_busy(db.code().as_deref()) => {
            RepoError::Concurrency(ConcurrencyKind::WriteConflict)
        }
        _ => RepoError::Database(err.to_string()),
    }
}

fn tx_err(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Database(db) if is_busy(db.code().as_deref()) => {
            RepoError::Concurrency(ConcurrencyKind::WriteConflict)
        }
        _ => RepoError::Transaction(err.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite unit-of-work factory.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects and applies the schema.
    ///
    /// An in-memory database lives inside a single connection, so the pool
    /// is pinned to one connection that is never recycled.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if !in_memory {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        tracing::debug!("sqlite schema ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl UnitOfWork for SqliteStore {
    type Scope = SqliteScope;

    async fn begin(&self) -> Result<SqliteScope, RepoError> {
        let tx = self.pool.begin().await.map_err(tx_err)?;
        Ok(SqliteScope { tx })
    }
}

/// One open SQLite transaction.
pub struct SqliteScope {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl Scope for SqliteScope {
    async fn commit(self) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(tx_err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wallets
// ─────────────────────────────────────────────────────────────────────────────

const WALLET_COLUMNS: &str = "id, user_id, balance, status, version, created_at, updated_at";

#[async_trait]
impl WalletRepository for SqliteScope {
    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO wallets (id, user_id, balance, status, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(wallet.id.to_string())
        .bind(wallet.user_id.to_string())
        .bind(wallet.balance.minor())
        .bind(wallet.status.as_str())
        .bind(wallet.version)
        .bind(format_time(&wallet.created_at))
        .bind(format_time(&wallet.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>, RepoError> {
        let row: Option<DbWallet> =
            sqlx::query_as(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(db_err)?;

        row.map(DbWallet::into_domain).transpose()
    }

    async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>, RepoError> {
        let row: Option<DbWallet> =
            sqlx::query_as(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ?"))
                .bind(user_id.to_string())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(db_err)?;

        row.map(DbWallet::into_domain).transpose()
    }

    async fn update_wallet(&mut self, wallet: &mut Wallet) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE wallets SET balance = ?, status = ?, version = version + 1, updated_at = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(wallet.balance.minor())
        .bind(wallet.status.as_str())
        .bind(format_time(&wallet.updated_at))
        .bind(wallet.id.to_string())
        .bind(wallet.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Concurrency(ConcurrencyKind::WalletModified));
        }
        wallet.version += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payments
// ─────────────────────────────────────────────────────────────────────────────

const PAYMENT_COLUMNS: &str = "id, wallet_id, amount, currency, email, system_reference, \
     provider_reference, authorization_url, status, version, created_at, updated_at";

impl SqliteScope {
    async fn payment_where(
        &mut self,
        column: &str,
        value: String,
    ) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        row.map(DbPayment::into_domain).transpose()
    }
}

#[async_trait]
impl PaymentRepository for SqliteScope {
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO payments (id, wallet_id, amount, currency, email, system_reference,
                   provider_reference, authorization_url, status, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(payment.id.to_string())
        .bind(payment.wallet_id.to_string())
        .bind(payment.amount.minor())
        .bind(payment.currency.code())
        .bind(&payment.email)
        .bind(&payment.system_reference)
        .bind(&payment.provider_reference)
        .bind(&payment.authorization_url)
        .bind(payment.status.as_str())
        .bind(payment.version)
        .bind(format_time(&payment.created_at))
        .bind(format_time(&payment.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        self.payment_where("id", id.to_string()).await
    }

    async fn find_payment_by_system_reference(
        &mut self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError> {
        self.payment_where("system_reference", reference.to_string())
            .await
    }

    async fn find_payment_by_provider_reference(
        &mut self,
        reference: &str,
    ) -> Result<Option<Payment>, RepoError> {
        self.payment_where("provider_reference", reference.to_string())
            .await
    }

    async fn update_payment(&mut self, payment: &mut Payment) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE payments
               SET provider_reference = ?, authorization_url = ?, status = ?,
                   version = version + 1, updated_at = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(&payment.provider_reference)
        .bind(&payment.authorization_url)
        .bind(payment.status.as_str())
        .bind(format_time(&payment.updated_at))
        .bind(payment.id.to_string())
        .bind(payment.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Concurrency(ConcurrencyKind::PaymentModified));
        }
        payment.version += 1;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Escrow accounts and ledger
// ─────────────────────────────────────────────────────────────────────────────

const ESCROW_COLUMNS: &str = "id, contract_id, creator_id, freelancer_id, balance, \
     expected_amount, status, version, created_at, updated_at";

#[async_trait]
impl EscrowRepository for SqliteScope {
    async fn insert_escrow(&mut self, escrow: &EscrowAccount) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO escrow_accounts (id, contract_id, creator_id, freelancer_id, balance,
                   expected_amount, status, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(escrow.id.to_string())
        .bind(escrow.contract_id.to_string())
        .bind(escrow.creator_id.to_string())
        .bind(escrow.freelancer_id.to_string())
        .bind(escrow.balance.minor())
        .bind(escrow.expected_amount.minor())
        .bind(escrow.status.as_str())
        .bind(escrow.version)
        .bind(format_time(&escrow.created_at))
        .bind(format_time(&escrow.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_escrow(&mut self, id: EscrowId) -> Result<Option<EscrowAccount>, RepoError> {
        let row: Option<DbEscrow> = sqlx::query_as(&format!(
            "SELECT {ESCROW_COLUMNS} FROM escrow_accounts WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        row.map(DbEscrow::into_domain).transpose()
    }

    async fn find_escrow_by_contract(
        &mut self,
        contract_id: ContractId,
    ) -> Result<Option<EscrowAccount>, RepoError> {
        let row: Option<DbEscrow> = sqlx::query_as(&format!(
            "SELECT {ESCROW_COLUMNS} FROM escrow_accounts WHERE contract_id = ?"
        ))
        .bind(contract_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        row.map(DbEscrow::into_domain).transpose()
    }

    async fn update_escrow(&mut self, escrow: &mut EscrowAccount) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE escrow_accounts
               SET balance = ?, status = ?, version = version + 1, updated_at = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(escrow.balance.minor())
        .bind(escrow.status.as_str())
        .bind(format_time(&escrow.updated_at))
        .bind(escrow.id.to_string())
        .bind(escrow.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Concurrency(ConcurrencyKind::EscrowModified));
        }
        escrow.version += 1;
        Ok(())
    }

    async fn insert_escrow_transaction(
        &mut self,
        entry: &EscrowTransaction,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO escrow_transactions (id, escrow_id, transaction_type, amount, reference,
                   status, description, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.escrow_id.to_string())
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount.minor())
        .bind(&entry.reference)
        .bind(entry.status.as_str())
        .bind(&entry.description)
        .bind(format_time(&entry.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn settle_escrow_transaction(
        &mut self,
        entry: &EscrowTransaction,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE escrow_transactions SET status = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(entry.status.as_str())
        .bind(entry.id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Concurrency(ConcurrencyKind::EscrowModified));
        }
        Ok(())
    }

    async fn list_escrow_transactions(
        &mut self,
        escrow_id: EscrowId,
    ) -> Result<Vec<EscrowTransaction>, RepoError> {
        let rows: Vec<DbEscrowTransaction> = sqlx::query_as(
            r#"SELECT id, escrow_id, transaction_type, amount, reference, status, description, created_at
               FROM escrow_transactions WHERE escrow_id = ?
               ORDER BY created_at ASC, rowid ASC"#,
        )
        .bind(escrow_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(DbEscrowTransaction::into_domain)
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payout accounts and withdrawals
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PayoutAccountRepository for SqliteScope {
    async fn insert_payout_account(&mut self, account: &PayoutAccount) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO payout_accounts (id, user_id, account_name, account_number, bank_code,
                   recipient_code, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(account.id.to_string())
        .bind(account.user_id.to_string())
        .bind(&account.account_name)
        .bind(account.account_number.as_str())
        .bind(account.bank_code.as_str())
        .bind(&account.recipient_code)
        .bind(format_time(&account.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_payout_account_by_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<PayoutAccount>, RepoError> {
        let row: Option<DbPayoutAccount> = sqlx::query_as(
            r#"SELECT id, user_id, account_name, account_number, bank_code, recipient_code, created_at
               FROM payout_accounts WHERE user_id = ?"#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        row.map(DbPayoutAccount::into_domain).transpose()
    }
}

#[async_trait]
impl WithdrawalRepository for SqliteScope {
    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO withdrawals (id, user_id, wallet_id, amount, recipient_code,
                   account_number, bank_code, reference, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(withdrawal.id.to_string())
        .bind(withdrawal.user_id.to_string())
        .bind(withdrawal.wallet_id.to_string())
        .bind(withdrawal.amount.minor())
        .bind(&withdrawal.recipient_code)
        .bind(withdrawal.account_number.as_str())
        .bind(withdrawal.bank_code.as_str())
        .bind(&withdrawal.reference)
        .bind(withdrawal.status.as_str())
        .bind(format_time(&withdrawal.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_withdrawals_for_user(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, RepoError> {
        let rows: Vec<DbWithdrawal> = sqlx::query_as(
            r#"SELECT id, user_id, wallet_id, amount, recipient_code, account_number, bank_code,
                   reference, status, created_at
               FROM withdrawals WHERE user_id = ?
               ORDER BY created_at DESC"#,
        )
        .bind(user_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbWithdrawal::into_domain).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OutboxRepository for SqliteScope {
    async fn insert_event(&mut self, event: &OutboxEvent) -> Result<(), RepoError> {
        sqlx::query(
            r#"INSERT INTO outbox_events (id, event_type, payload, status, created_at, attempts)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(&event.event_type)
        .bind(event.payload.to_string())
        .bind(event.status.as_ref())
        .bind(format_time(&event.created_at))
        .bind(event.attempts)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn pending_events(&mut self, limit: i64) -> Result<Vec<OutboxEvent>, RepoError> {
        let rows: Vec<DbOutboxEvent> = sqlx::query_as(
            r#"SELECT id, event_type, payload, status, created_at, processed_at, attempts, last_error
               FROM outbox_events
               WHERE status = 'PENDING'
               ORDER BY created_at ASC, rowid ASC
               LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbOutboxEvent::into_domain).collect()
    }

    async fn mark_event(
        &mut self,
        id: Uuid,
        status: OutboxStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError> {
        let now = format_time(&chrono::Utc::now());

        let result = sqlx::query(
            r#"UPDATE outbox_events
               SET status = ?, processed_at = ?, last_error = ?, attempts = attempts + 1
               WHERE id = ? AND status = 'PENDING'"#,
        )
        .bind(status.as_ref())
        .bind(now)
        .bind(last_error)
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Concurrency(ConcurrencyKind::EventModified));
        }
        Ok(())
    }
}
