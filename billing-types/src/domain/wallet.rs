//! Wallet domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{UserId, WalletId};
use super::money::Money;
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Suspended,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "ACTIVE",
            WalletStatus::Suspended => "SUSPENDED",
        }
    }
}

impl std::str::FromStr for WalletStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(WalletStatus::Active),
            "SUSPENDED" => Ok(WalletStatus::Suspended),
            other => Err(DomainError::Validation(format!(
                "Unknown wallet status: {}",
                other
            ))),
        }
    }
}

/// One user's custodial balance.
///
/// `version` is the optimistic-concurrency token: stores only accept an
/// update whose version matches the stored row, then bump it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Money,
    pub status: WalletStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Opens an empty, active wallet for a user.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            user_id,
            balance: Money::ZERO,
            status: WalletStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.status != WalletStatus::Active {
            return Err(DomainError::InvalidState(format!(
                "Wallet {} is not active",
                self.id
            )));
        }
        Ok(())
    }

    /// Adds money to the wallet.
    pub fn credit(&mut self, amount: Money) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.balance = self.balance.checked_add(amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Takes money out of the wallet, refusing to go below zero.
    pub fn debit(&mut self, amount: Money) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.balance =
            self.balance
                .checked_sub(amount)
                .ok_or(DomainError::InsufficientFunds {
                    available: self.balance.minor(),
                    requested: amount.minor(),
                })?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(minor: i64) -> Money {
        Money::from_minor(minor).unwrap()
    }

    #[test]
    fn test_wallet_starts_empty_and_active() {
        let wallet = Wallet::new(UserId::new());
        assert!(wallet.balance.is_zero());
        assert_eq!(wallet.status, WalletStatus::Active);
        assert_eq!(wallet.version, 0);
    }

    #[test]
    fn test_credit_then_debit() {
        let mut wallet = Wallet::new(UserId::new());
        wallet.credit(money(1000)).unwrap();
        wallet.debit(money(300)).unwrap();
        assert_eq!(wallet.balance.minor(), 700);
    }

    #[test]
    fn test_debit_beyond_balance_is_rejected_not_clamped() {
        let mut wallet = Wallet::new(UserId::new());
        wallet.credit(money(100)).unwrap();
        let result = wallet.debit(money(200));
        assert!(matches!(
            result,
            Err(DomainError::InsufficientFunds {
                available: 100,
                requested: 200
            })
        ));
        assert_eq!(wallet.balance.minor(), 100);
    }

    #[test]
    fn test_suspended_wallet_refuses_movement() {
        let mut wallet = Wallet::new(UserId::new());
        wallet.status = WalletStatus::Suspended;
        assert!(matches!(
            wallet.credit(money(1)),
            Err(DomainError::InvalidState(_))
        ));
    }
}
