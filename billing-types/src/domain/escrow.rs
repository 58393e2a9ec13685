//! Escrow account and its append-only ledger.
//!
//! Every balance movement on [`EscrowAccount`] returns the
//! [`EscrowTransaction`] that justifies it, so the two can only be
//! persisted together. The ledger invariant
//!
//! ```text
//! Σ SUCCESS FUND − Σ SUCCESS|PENDING (RELEASE + REFUND) == balance
//! ```
//!
//! is checked by [`ledger_balance`]. A PENDING outflow is money already
//! claimed from the balance while a payout is in flight; it ends as
//! SUCCESS, or as FAILED with the amount put back through
//! [`EscrowAccount::restore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::actor::{Actor, Role};
use super::ids::{ContractId, EscrowId, EscrowTransactionId, UserId};
use super::money::Money;
use super::payment::generate_reference;
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    AwaitingFunding,
    PartiallyFunded,
    Funded,
    /// Some money already left the escrow; no more funding accepted.
    Settling,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn accepts_funding(&self) -> bool {
        matches!(
            self,
            EscrowStatus::AwaitingFunding | EscrowStatus::PartiallyFunded | EscrowStatus::Funded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::AwaitingFunding => "AWAITING_FUNDING",
            EscrowStatus::PartiallyFunded => "PARTIALLY_FUNDED",
            EscrowStatus::Funded => "FUNDED",
            EscrowStatus::Settling => "SETTLING",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::str::FromStr for EscrowStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING_FUNDING" => Ok(EscrowStatus::AwaitingFunding),
            "PARTIALLY_FUNDED" => Ok(EscrowStatus::PartiallyFunded),
            "FUNDED" => Ok(EscrowStatus::Funded),
            "SETTLING" => Ok(EscrowStatus::Settling),
            "RELEASED" => Ok(EscrowStatus::Released),
            "REFUNDED" => Ok(EscrowStatus::Refunded),
            other => Err(DomainError::Validation(format!(
                "Unknown escrow status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowTransactionType {
    Fund,
    Release,
    Refund,
    Adjustment,
}

impl EscrowTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowTransactionType::Fund => "FUND",
            EscrowTransactionType::Release => "RELEASE",
            EscrowTransactionType::Refund => "REFUND",
            EscrowTransactionType::Adjustment => "ADJUSTMENT",
        }
    }
}

impl std::str::FromStr for EscrowTransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUND" => Ok(EscrowTransactionType::Fund),
            "RELEASE" => Ok(EscrowTransactionType::Release),
            "REFUND" => Ok(EscrowTransactionType::Refund),
            "ADJUSTMENT" => Ok(EscrowTransactionType::Adjustment),
            other => Err(DomainError::Validation(format!(
                "Unknown escrow transaction type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowTransactionStatus {
    Pending,
    Success,
    Failed,
}

impl EscrowTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowTransactionStatus::Pending => "PENDING",
            EscrowTransactionStatus::Success => "SUCCESS",
            EscrowTransactionStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for EscrowTransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EscrowTransactionStatus::Pending),
            "SUCCESS" => Ok(EscrowTransactionStatus::Success),
            "FAILED" => Ok(EscrowTransactionStatus::Failed),
            other => Err(DomainError::Validation(format!(
                "Unknown escrow transaction status: {}",
                other
            ))),
        }
    }
}

/// One ledger line. Immutable apart from its PENDING → SUCCESS/FAILED step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: EscrowTransactionId,
    pub escrow_id: EscrowId,
    pub transaction_type: EscrowTransactionType,
    pub amount: Money,
    pub reference: String,
    pub status: EscrowTransactionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl EscrowTransaction {
    fn pending(
        escrow_id: EscrowId,
        transaction_type: EscrowTransactionType,
        amount: Money,
        description: String,
    ) -> Self {
        Self {
            id: EscrowTransactionId::new(),
            escrow_id,
            transaction_type,
            amount,
            reference: generate_reference("ESC"),
            status: EscrowTransactionStatus::Pending,
            description,
            created_at: Utc::now(),
        }
    }

    /// Marks a pending line as settled.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.settle(EscrowTransactionStatus::Success)
    }

    pub fn fail(&mut self) -> Result<(), DomainError> {
        self.settle(EscrowTransactionStatus::Failed)
    }

    fn settle(&mut self, status: EscrowTransactionStatus) -> Result<(), DomainError> {
        if self.status != EscrowTransactionStatus::Pending {
            return Err(DomainError::InvalidState(format!(
                "Escrow transaction {} is already {}",
                self.reference,
                self.status.as_str()
            )));
        }
        self.status = status;
        Ok(())
    }
}

/// Funds held in trust for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub id: EscrowId,
    pub contract_id: ContractId,
    pub creator_id: UserId,
    pub freelancer_id: UserId,
    pub balance: Money,
    pub expected_amount: Money,
    pub status: EscrowStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowAccount {
    pub fn new(
        contract_id: ContractId,
        creator_id: UserId,
        freelancer_id: UserId,
        expected_amount: Money,
    ) -> Result<Self, DomainError> {
        if expected_amount.is_zero() {
            return Err(DomainError::ZeroAmount);
        }
        if creator_id == freelancer_id {
            return Err(DomainError::Validation(
                "Creator and freelancer must be different users".into(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: EscrowId::new(),
            contract_id,
            creator_id,
            freelancer_id,
            balance: Money::ZERO,
            expected_amount,
            status: EscrowStatus::AwaitingFunding,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Only the contract creator puts money in.
    pub fn can_fund(&self, user_id: UserId) -> bool {
        user_id == self.creator_id
    }

    /// The creator, or an arbitrator, pays the freelancer out.
    pub fn can_release(&self, actor: &Actor) -> bool {
        actor.user_id == self.creator_id || actor.role == Role::Arbitrator
    }

    /// The freelancer can hand money back; so can an arbitrator.
    pub fn can_refund(&self, actor: &Actor) -> bool {
        actor.user_id == self.freelancer_id || actor.role == Role::Arbitrator
    }

    /// Adds `amount` to the balance, never past the expected amount.
    pub fn fund(&mut self, amount: Money) -> Result<EscrowTransaction, DomainError> {
        if amount.is_zero() {
            return Err(DomainError::ZeroAmount);
        }
        if !self.status.accepts_funding() {
            return Err(DomainError::InvalidState(format!(
                "Escrow {} is {} and cannot be funded",
                self.id,
                self.status.as_str()
            )));
        }
        let new_balance = self.balance.checked_add(amount)?;
        if new_balance > self.expected_amount {
            return Err(DomainError::EscrowOverfunded {
                expected: self.expected_amount.minor(),
                balance: self.balance.minor(),
                requested: amount.minor(),
            });
        }
        self.balance = new_balance;
        self.status = if self.balance == self.expected_amount {
            EscrowStatus::Funded
        } else {
            EscrowStatus::PartiallyFunded
        };
        self.updated_at = Utc::now();

        Ok(EscrowTransaction::pending(
            self.id,
            EscrowTransactionType::Fund,
            amount,
            format!("Escrow funding for contract {}", self.contract_id),
        ))
    }

    /// Pays `amount` (or the whole balance) out to the freelancer.
    pub fn release(&mut self, amount: Option<Money>) -> Result<EscrowTransaction, DomainError> {
        let amount = self.drain(amount, EscrowStatus::Released)?;
        Ok(EscrowTransaction::pending(
            self.id,
            EscrowTransactionType::Release,
            amount,
            format!("Release to freelancer {}", self.freelancer_id),
        ))
    }

    /// Returns `amount` (or the whole balance) to the creator.
    pub fn refund(&mut self, amount: Option<Money>) -> Result<EscrowTransaction, DomainError> {
        let amount = self.drain(amount, EscrowStatus::Refunded)?;
        Ok(EscrowTransaction::pending(
            self.id,
            EscrowTransactionType::Refund,
            amount,
            format!("Refund to creator {}", self.creator_id),
        ))
    }

    /// Puts back an outflow that never reached the counterparty.
    ///
    /// `status` is what the escrow should read afterwards; the caller knows
    /// whether anything else moved in the meantime.
    pub fn restore(&mut self, amount: Money, status: EscrowStatus) -> Result<(), DomainError> {
        let balance = self.balance.checked_add(amount)?;
        if balance > self.expected_amount {
            return Err(DomainError::EscrowOverfunded {
                expected: self.expected_amount.minor(),
                balance: self.balance.minor(),
                requested: amount.minor(),
            });
        }
        self.balance = balance;
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn drain(&mut self, amount: Option<Money>, emptied: EscrowStatus) -> Result<Money, DomainError> {
        if self.balance.is_zero() {
            return Err(DomainError::InvalidState(format!(
                "Escrow {} has no balance",
                self.id
            )));
        }
        let amount = amount.unwrap_or(self.balance);
        if amount.is_zero() {
            return Err(DomainError::ZeroAmount);
        }
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(DomainError::InsufficientFunds {
                available: self.balance.minor(),
                requested: amount.minor(),
            })?;
        self.status = if self.balance.is_zero() {
            emptied
        } else {
            EscrowStatus::Settling
        };
        self.updated_at = Utc::now();
        Ok(amount)
    }
}

/// Recomputes an escrow balance from its ledger.
///
/// Funding counts once SUCCESS. Outflows count while PENDING too, since
/// their amount has already left the balance. FAILED lines and ADJUSTMENT
/// lines are ignored.
pub fn ledger_balance(entries: &[EscrowTransaction]) -> i64 {
    entries
        .iter()
        .map(|e| match (e.transaction_type, e.status) {
            (_, EscrowTransactionStatus::Failed) => 0,
            (EscrowTransactionType::Fund, EscrowTransactionStatus::Success) => e.amount.minor(),
            (EscrowTransactionType::Fund, EscrowTransactionStatus::Pending) => 0,
            (EscrowTransactionType::Release | EscrowTransactionType::Refund, _) => {
                -e.amount.minor()
            }
            (EscrowTransactionType::Adjustment, _) => 0,
        })
        .sum()
}
