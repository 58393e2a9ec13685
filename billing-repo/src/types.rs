//! SQLite row types and their conversion into domain types.
//!
//! Ids are stored as TEXT uuids, timestamps as fixed-width RFC 3339 TEXT
//! (so lexical order is time order), money as INTEGER minor units.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use billing_types::{
    AccountNumber, BankCode, ContractId, EscrowAccount, EscrowId, EscrowTransaction, Money,
    OutboxEvent, Payment, PaymentId, PayoutAccount, RepoError, UserId, Wallet, WalletId,
    Withdrawal,
};
use billing_types::domain::{EscrowTransactionId, PayoutAccountId, WithdrawalId};

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_time(s: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepoError::Database(e.to_string()))
}

pub fn parse_uuid(s: &str) -> Result<Uuid, RepoError> {
    Uuid::parse_str(s).map_err(|e| RepoError::Database(e.to_string()))
}

fn parse_enum<T>(s: &str) -> Result<T, RepoError>
where
    T: std::str::FromStr<Err = billing_types::DomainError>,
{
    s.parse().map_err(|e: billing_types::DomainError| RepoError::Database(e.to_string()))
}

fn money(minor: i64) -> Result<Money, RepoError> {
    Money::from_minor(minor).map_err(|e| RepoError::Database(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Database row structs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
pub struct DbWallet {
    pub id: String,
    pub user_id: String,
    pub balance: i64,
    pub status: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DbWallet {
    pub fn into_domain(self) -> Result<Wallet, RepoError> {
        Ok(Wallet {
            id: WalletId::from_uuid(parse_uuid(&self.id)?),
            user_id: UserId::from_uuid(parse_uuid(&self.user_id)?),
            balance: money(self.balance)?,
            status: parse_enum(&self.status)?,
            version: self.version,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbPayment {
    pub id: String,
    pub wallet_id: String,
    pub amount: i64,
    pub currency: String,
    pub email: String,
    pub system_reference: String,
    pub provider_reference: Option<String>,
    pub authorization_url: Option<String>,
    pub status: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DbPayment {
    pub fn into_domain(self) -> Result<Payment, RepoError> {
        Ok(Payment {
            id: PaymentId::from_uuid(parse_uuid(&self.id)?),
            wallet_id: WalletId::from_uuid(parse_uuid(&self.wallet_id)?),
            amount: money(self.amount)?,
            currency: parse_enum(&self.currency)?,
            email: self.email,
            system_reference: self.system_reference,
            provider_reference: self.provider_reference,
            authorization_url: self.authorization_url,
            status: parse_enum(&self.status)?,
            version: self.version,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbEscrow {
    pub id: String,
    pub contract_id: String,
    pub creator_id: String,
    pub freelancer_id: String,
    pub balance: i64,
    pub expected_amount: i64,
    pub status: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl DbEscrow {
    pub fn into_domain(self) -> Result<EscrowAccount, RepoError> {
        Ok(EscrowAccount {
            id: EscrowId::from_uuid(parse_uuid(&self.id)?),
            contract_id: ContractId::from_uuid(parse_uuid(&self.contract_id)?),
            creator_id: UserId::from_uuid(parse_uuid(&self.creator_id)?),
            freelancer_id: UserId::from_uuid(parse_uuid(&self.freelancer_id)?),
            balance: money(self.balance)?,
            expected_amount: money(self.expected_amount)?,
            status: parse_enum(&self.status)?,
            version: self.version,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbEscrowTransaction {
    pub id: String,
    pub escrow_id: String,
    pub transaction_type: String,
    pub amount: i64,
    pub reference: String,
    pub status: String,
    pub description: String,
    pub created_at: String,
}

impl DbEscrowTransaction {
    pub fn into_domain(self) -> Result<EscrowTransaction, RepoError> {
        Ok(EscrowTransaction {
            id: EscrowTransactionId::from_uuid(parse_uuid(&self.id)?),
            escrow_id: EscrowId::from_uuid(parse_uuid(&self.escrow_id)?),
            transaction_type: parse_enum(&self.transaction_type)?,
            amount: money(self.amount)?,
            reference: self.reference,
            status: parse_enum(&self.status)?,
            description: self.description,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbPayoutAccount {
    pub id: String,
    pub user_id: String,
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
    pub recipient_code: String,
    pub created_at: String,
}

impl DbPayoutAccount {
    pub fn into_domain(self) -> Result<PayoutAccount, RepoError> {
        Ok(PayoutAccount {
            id: PayoutAccountId::from_uuid(parse_uuid(&self.id)?),
            user_id: UserId::from_uuid(parse_uuid(&self.user_id)?),
            account_name: self.account_name,
            account_number: AccountNumber::parse(&self.account_number)
                .map_err(|e| RepoError::Database(e.to_string()))?,
            bank_code: BankCode::parse(&self.bank_code)
                .map_err(|e| RepoError::Database(e.to_string()))?,
            recipient_code: self.recipient_code,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbWithdrawal {
    pub id: String,
    pub user_id: String,
    pub wallet_id: String,
    pub amount: i64,
    pub recipient_code: String,
    pub account_number: String,
    pub bank_code: String,
    pub reference: String,
    pub status: String,
    pub created_at: String,
}

impl DbWithdrawal {
    pub fn into_domain(self) -> Result<Withdrawal, RepoError> {
        Ok(Withdrawal {
            id: WithdrawalId::from_uuid(parse_uuid(&self.id)?),
            user_id: UserId::from_uuid(parse_uuid(&self.user_id)?),
            wallet_id: WalletId::from_uuid(parse_uuid(&self.wallet_id)?),
            amount: money(self.amount)?,
            recipient_code: self.recipient_code,
            account_number: AccountNumber::parse(&self.account_number)
                .map_err(|e| RepoError::Database(e.to_string()))?,
            bank_code: BankCode::parse(&self.bank_code)
                .map_err(|e| RepoError::Database(e.to_string()))?,
            reference: self.reference,
            status: parse_enum(&self.status)?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
pub struct DbOutboxEvent {
    pub id: String,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl DbOutboxEvent {
    pub fn into_domain(self) -> Result<OutboxEvent, RepoError> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| RepoError::Database(e.to_string()))?;

        let processed_at = self.processed_at.as_deref().map(parse_time).transpose()?;

        Ok(OutboxEvent {
            id: parse_uuid(&self.id)?,
            event_type: self.event_type,
            payload,
            status: parse_enum(&self.status)?,
            created_at: parse_time(&self.created_at)?,
            processed_at,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}
