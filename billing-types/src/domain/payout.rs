//! Payout destinations and withdrawals out of a wallet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bank::{AccountNumber, BankCode};
use super::ids::{PayoutAccountId, UserId, WalletId, WithdrawalId};
use super::money::Money;
use super::payment::{PaymentStatus, generate_reference};

/// A provider-verified bank destination. One per user, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub id: PayoutAccountId,
    pub user_id: UserId,
    /// Name as resolved by the provider, not as typed by the user.
    pub account_name: String,
    pub account_number: AccountNumber,
    pub bank_code: BankCode,
    /// Provider handle used when sending transfers.
    pub recipient_code: String,
    pub created_at: DateTime<Utc>,
}

impl PayoutAccount {
    pub fn verified(
        user_id: UserId,
        account_name: String,
        account_number: AccountNumber,
        bank_code: BankCode,
        recipient_code: String,
    ) -> Self {
        Self {
            id: PayoutAccountId::new(),
            user_id,
            account_name,
            account_number,
            bank_code,
            recipient_code,
            created_at: Utc::now(),
        }
    }
}

/// Tracks money debited from a wallet and owed to a bank account.
///
/// Shares the PENDING/SUCCESS/FAILED lifecycle of [`PaymentStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub amount: Money,
    pub recipient_code: String,
    pub account_number: AccountNumber,
    pub bank_code: BankCode,
    pub reference: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn pending(
        user_id: UserId,
        wallet_id: WalletId,
        amount: Money,
        recipient_code: String,
        account_number: AccountNumber,
        bank_code: BankCode,
    ) -> Self {
        Self {
            id: WithdrawalId::new(),
            user_id,
            wallet_id,
            amount,
            recipient_code,
            account_number,
            bank_code,
            reference: generate_reference("WDR"),
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
