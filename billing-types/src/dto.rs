//! Data Transfer Objects (DTOs) for requests and responses.
//!
//! Amounts arriving from clients are in major units and go through
//! [`Money::from_major`](crate::Money::from_major); amounts leaving are in
//! minor units.

use serde::{Deserialize, Serialize};

use crate::domain::{
    ContractId, Currency, EscrowAccount, EscrowTransaction, PaymentId, PaymentStatus, UserId,
    WalletId, WithdrawalId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Webhook DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// What an authenticated provider webhook did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The payment moved to a terminal status.
    Applied {
        system_reference: String,
        status: PaymentStatus,
    },
    /// The payment was already terminal; nothing was written.
    AlreadySettled { system_reference: String },
    /// Not a charge event, or a status that settles nothing.
    Ignored,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wallet DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub user_id: UserId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to start funding a wallet through the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializePaymentRequest {
    pub wallet_id: WalletId,
    pub email: String,
    /// Amount in major units (e.g. naira)
    pub amount: f64,
    #[serde(default)]
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializePaymentResponse {
    pub payment_id: PaymentId,
    pub system_reference: String,
    pub provider_reference: String,
    pub authorization_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub system_reference: String,
    pub status: PaymentStatus,
    /// Amount in minor units
    pub amount: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Escrow DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEscrowRequest {
    pub contract_id: ContractId,
    pub creator_id: UserId,
    pub freelancer_id: UserId,
    /// Contract amount in major units
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundEscrowRequest {
    /// Amount in major units
    pub amount: f64,
}

/// Body of release and refund calls. Without an amount the whole balance moves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettleEscrowRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

/// Result of a fund, release or refund: the escrow after the move and the
/// ledger line that justifies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowMovement {
    pub escrow: EscrowAccount,
    pub transaction: EscrowTransaction,
}

/// An escrow account together with its ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowDetails {
    pub escrow: EscrowAccount,
    pub transactions: Vec<EscrowTransaction>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Payout DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Raw bank destination as typed by the user; validated by the use-case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayoutAccountRequest {
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Amount in major units
    pub amount: f64,
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub withdrawal_id: WithdrawalId,
    pub reference: String,
    /// Amount in minor units
    pub amount: i64,
    /// Wallet balance after the debit, in minor units
    pub new_balance: i64,
    pub status: PaymentStatus,
}
